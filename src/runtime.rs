//! Allocation statistics and collector hooks.
//!
//! Objects and frames are reclaimed by reference counting alone. The
//! collector entry point only runs a mark phase from a root frame and the
//! registered roots, which tells how many live objects are still reachable;
//! the remainder are held alive by reference cycles. Sweeping is a hook that
//! reclaims nothing.
//!
//! Rust code that keeps values outside any environment registers them with
//! [`gc_add_root`] so that [`collect`] does not count them as cycle garbage.
//!
//! All counters are per thread, matching the single-threaded evaluation model.

use crate::ast::{Object, Value};
use crate::evaluator::Env;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

struct RuntimeState {
    live_objects: Cell<usize>,
    total_allocated: Cell<usize>,
    live_frames: Cell<usize>,
    collections: Cell<usize>,
    gc_enabled: Cell<bool>,
    debug_mode: Cell<bool>,
}

thread_local! {
    static STATE: RuntimeState = const {
        RuntimeState {
            live_objects: Cell::new(0),
            total_allocated: Cell::new(0),
            live_frames: Cell::new(0),
            collections: Cell::new(0),
            gc_enabled: Cell::new(true),
            debug_mode: Cell::new(false),
        }
    };

    static ROOTS: RefCell<Vec<Value>> = const { RefCell::new(Vec::new()) };
}

// Counters may be touched while thread-locals are being torn down, so every
// access goes through try_with and silently gives up at that point.

pub(crate) fn record_allocation() {
    let _ = STATE.try_with(|s| {
        s.live_objects.set(s.live_objects.get() + 1);
        s.total_allocated.set(s.total_allocated.get() + 1);
    });
}

pub(crate) fn record_release() {
    let _ = STATE.try_with(|s| s.live_objects.set(s.live_objects.get().saturating_sub(1)));
}

pub(crate) fn record_frame_created() {
    let _ = STATE.try_with(|s| s.live_frames.set(s.live_frames.get() + 1));
}

pub(crate) fn record_frame_released() {
    let _ = STATE.try_with(|s| s.live_frames.set(s.live_frames.get().saturating_sub(1)));
}

/// Objects currently alive on this thread, singletons included
pub fn object_count() -> usize {
    STATE.with(|s| s.live_objects.get())
}

/// Environment frames currently alive on this thread
pub fn frame_count() -> usize {
    STATE.with(|s| s.live_frames.get())
}

/// Mark `value` as reachable in every later [`collect`]. Registering the
/// same value twice needs two removals.
pub fn gc_add_root(value: &Value) {
    ROOTS.with(|roots| roots.borrow_mut().push(value.clone()));
}

/// Drop one registration of `value`; false if it was not registered.
pub fn gc_remove_root(value: &Value) -> bool {
    ROOTS.with(|roots| {
        let mut roots = roots.borrow_mut();
        match roots.iter().position(|root| root.is_eq(value)) {
            Some(index) => {
                roots.swap_remove(index);
                true
            }
            None => false,
        }
    })
}

pub fn root_count() -> usize {
    ROOTS.with(|roots| roots.borrow().len())
}

pub fn gc_enable() {
    STATE.with(|s| s.gc_enabled.set(true));
}

pub fn gc_disable() {
    STATE.with(|s| s.gc_enabled.set(false));
}

pub fn gc_is_enabled() -> bool {
    STATE.with(|s| s.gc_enabled.get())
}

pub fn set_debug_mode(enabled: bool) {
    STATE.with(|s| s.debug_mode.set(enabled));
    tracing::debug!(enabled, "runtime debug mode changed");
}

pub fn debug_mode() -> bool {
    STATE.with(|s| s.debug_mode.get())
}

/// Snapshot of the allocation counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub live_objects: usize,
    pub total_allocated: usize,
    pub live_frames: usize,
    pub collections: usize,
    pub gc_enabled: bool,
}

pub fn memory_stats() -> MemoryStats {
    STATE.with(|s| MemoryStats {
        live_objects: s.live_objects.get(),
        total_allocated: s.total_allocated.get(),
        live_frames: s.live_frames.get(),
        collections: s.collections.get(),
        gc_enabled: s.gc_enabled.get(),
    })
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Memory statistics:")?;
        writeln!(f, "  live objects:     {}", self.live_objects)?;
        writeln!(f, "  total allocated:  {}", self.total_allocated)?;
        writeln!(f, "  live frames:      {}", self.live_frames)?;
        writeln!(f, "  collections:      {}", self.collections)?;
        write!(
            f,
            "  gc:               {}",
            if self.gc_enabled { "enabled" } else { "disabled" }
        )
    }
}

/// Outcome of [`collect`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CollectionReport {
    /// Collection was requested while disabled
    pub skipped: bool,
    pub reachable_objects: usize,
    pub reachable_frames: usize,
    /// Values registered with [`gc_add_root`]
    pub registered_roots: usize,
    pub live_objects: usize,
    pub live_frames: usize,
    /// Objects freed by the sweep phase
    pub reclaimed: usize,
}

impl CollectionReport {
    /// Live objects no root reaches. Only reference cycles keep these alive,
    /// plus values Rust code holds without registering them.
    pub fn unreachable(&self) -> usize {
        self.live_objects.saturating_sub(self.reachable_objects)
    }
}

/// Run a collection rooted at `root` and the registered roots.
pub fn collect(root: &Env) -> CollectionReport {
    if !gc_is_enabled() {
        tracing::debug!("collection requested while gc is disabled");
        return CollectionReport {
            skipped: true,
            ..CollectionReport::default()
        };
    }

    let mut marker = Marker::default();
    marker.mark(vec![Rc::clone(root)], ROOTS.with(|roots| roots.borrow().clone()));
    let reclaimed = sweep(&marker);

    STATE.with(|s| s.collections.set(s.collections.get() + 1));

    let report = CollectionReport {
        skipped: false,
        // The three singletons are pinned outside any frame
        reachable_objects: marker.objects.len() + pinned_singletons(&marker),
        reachable_frames: marker.frames.len(),
        registered_roots: root_count(),
        live_objects: object_count(),
        live_frames: frame_count(),
        reclaimed,
    };

    if report.unreachable() > 0 {
        tracing::warn!(
            unreachable = report.unreachable(),
            "objects kept alive outside the root set"
        );
    }
    if debug_mode() {
        tracing::info!(?report, "collection finished");
    }
    report
}

fn pinned_singletons(marker: &Marker) -> usize {
    [Value::nil(), Value::boolean(true), Value::boolean(false)]
        .iter()
        .filter(|v| !marker.objects.contains(&v.addr()))
        .count()
}

/// Sweep hook. Reference counting has already freed every acyclic object,
/// and cycles cannot be broken safely without knowing which handles Rust
/// code still holds, so nothing is freed here.
fn sweep(_marker: &Marker) -> usize {
    0
}

#[derive(Default)]
struct Marker {
    objects: HashSet<usize>,
    frames: HashSet<usize>,
}

impl Marker {
    fn mark(&mut self, mut pending_frames: Vec<Env>, mut pending_values: Vec<Value>) {
        while !pending_frames.is_empty() || !pending_values.is_empty() {
            if let Some(frame) = pending_frames.pop() {
                if !self.frames.insert(Rc::as_ptr(&frame) as usize) {
                    continue;
                }
                pending_values.extend(frame.bindings().into_iter().map(|(_, v)| v));
                if let Some(parent) = frame.parent() {
                    pending_frames.push(Rc::clone(parent));
                }
            }
            if let Some(value) = pending_values.pop() {
                if !self.objects.insert(value.addr()) {
                    continue;
                }
                match &*value {
                    Object::Pair(pair) => {
                        pending_values.push(pair.car());
                        pending_values.push(pair.cdr());
                    }
                    Object::Closure(closure) => {
                        pending_values.push(closure.params.clone());
                        pending_values.push(closure.body.clone());
                        pending_frames.push(Rc::clone(&closure.env));
                    }
                    Object::Vector(items) => pending_values.extend(items.borrow().iter().cloned()),
                    _ => {}
                }
            }
        }
    }
}
