//! Chained binding frames.
//!
//! A frame owns its bindings and holds a strong reference to its parent, so
//! a frame stays alive as long as any child frame or closure refers to it.
//! Bindings keep insertion order; `define` on an existing name updates it in
//! place rather than shadowing.

use crate::Error;
use crate::ast::{Arity, Object, Value};
use crate::runtime;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Shared handle to a frame
pub type Env = Rc<Environment>;

/// One level of variable bindings
pub struct Environment {
    bindings: RefCell<Vec<(String, Value)>>,
    parent: Option<Env>,
}

impl Environment {
    /// Create a frame under `parent` (none for a global frame)
    pub fn new(parent: Option<Env>) -> Env {
        runtime::record_frame_created();
        Rc::new(Environment {
            bindings: RefCell::new(Vec::new()),
            parent,
        })
    }

    pub fn parent(&self) -> Option<&Env> {
        self.parent.as_ref()
    }

    /// Insert-or-update in this frame only; parent frames are never touched.
    pub fn define(&self, name: &str, value: Value) {
        let mut bindings = self.bindings.borrow_mut();
        match bindings.iter_mut().find(|(n, _)| n == name) {
            Some((_, slot)) => *slot = value,
            None => bindings.push((name.to_owned(), value)),
        }
    }

    /// Assign to the nearest binding of `name`, searching this frame first
    /// then each ancestor. Defines in this frame when no binding exists.
    pub fn set_variable(&self, name: &str, value: Value) {
        if let Err(value) = self.assign_existing(name, value) {
            self.define(name, value);
        }
    }

    /// Assign to the nearest existing binding. Returns false, binding
    /// nothing, when the name is unbound everywhere in the chain.
    pub fn set_existing(&self, name: &str, value: Value) -> bool {
        self.assign_existing(name, value).is_ok()
    }

    fn assign_existing(&self, name: &str, value: Value) -> Result<(), Value> {
        let mut frame = self;
        loop {
            if let Some((_, slot)) = frame
                .bindings
                .borrow_mut()
                .iter_mut()
                .find(|(n, _)| n == name)
            {
                *slot = value;
                return Ok(());
            }
            match &frame.parent {
                Some(parent) => frame = parent.as_ref(),
                None => return Err(value),
            }
        }
    }

    /// Nearest binding of `name` in the chain
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = self;
        loop {
            if let Some(value) = frame.lookup_local(name) {
                return Some(value);
            }
            frame = frame.parent.as_deref()?;
        }
    }

    pub fn lookup_local(&self, name: &str) -> Option<Value> {
        self.bindings
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, value)| value.clone())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }

    /// Number of bindings in this frame
    pub fn size(&self) -> usize {
        self.bindings.borrow().len()
    }

    /// Number of frames from this one up to the root, inclusive
    pub fn depth(&self) -> usize {
        let mut depth = 1;
        let mut frame = self;
        while let Some(parent) = &frame.parent {
            depth += 1;
            frame = parent.as_ref();
        }
        depth
    }

    /// Bindings of this frame in insertion order
    pub fn bindings(&self) -> Vec<(String, Value)> {
        self.bindings.borrow().clone()
    }

    /// All visible bindings of this frame and its ancestors, inner ones
    /// hiding outer ones, sorted by name
    pub fn get_all_bindings(&self) -> Vec<(String, Value)> {
        let mut visible = HashMap::new();
        let mut frame = Some(self);
        while let Some(current) = frame {
            for (name, value) in current.bindings.borrow().iter() {
                visible
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            frame = current.parent.as_deref();
        }
        let mut result: Vec<_> = visible.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    /// Create a child frame of `parent` binding `params` positionally to `args`.
    ///
    /// `params` is a list of symbols. An improper tail symbol, or a lone
    /// symbol in place of the list, receives the remaining arguments as a list.
    pub fn extend(parent: &Env, params: &Value, args: &[Value]) -> Result<Env, Error> {
        let frame = Environment::new(Some(Rc::clone(parent)));
        let mut remaining = args.iter();
        let mut required = 0;
        let mut cursor = params.clone();

        loop {
            let next = match &*cursor {
                Object::Pair(pair) => {
                    let param = pair.car();
                    let name = param.as_symbol().ok_or_else(|| {
                        Error::InvalidSyntax(format!("parameter must be a symbol, got {param}"))
                    })?;
                    required += 1;
                    match remaining.next() {
                        Some(arg) => frame.define(name, arg.clone()),
                        None => {
                            let arity = if pair.cdr().is_symbol() {
                                Arity::AtLeast(count_required(params))
                            } else {
                                Arity::Exact(count_required(params))
                            };
                            return Err(Error::arity_error_with_expr(
                                arity,
                                args.len(),
                                "procedure",
                            ));
                        }
                    }
                    pair.cdr()
                }
                Object::Symbol(rest) => {
                    frame.define(rest, Value::list(remaining.cloned()));
                    return Ok(frame);
                }
                Object::Nil => {
                    if remaining.next().is_some() {
                        return Err(Error::arity_error_with_expr(
                            Arity::Exact(required),
                            args.len(),
                            "procedure",
                        ));
                    }
                    return Ok(frame);
                }
                _ => {
                    return Err(Error::InvalidSyntax(format!(
                        "malformed parameter list: {params}"
                    )));
                }
            };
            cursor = next;
        }
    }
}

fn count_required(params: &Value) -> usize {
    params.iter().count()
}

impl Drop for Environment {
    fn drop(&mut self) {
        runtime::record_frame_released();
    }
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Environment")
            .field("size", &self.size())
            .field("depth", &self.depth())
            .finish()
    }
}
