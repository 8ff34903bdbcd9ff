//! The value model. Every runtime datum is a [`Value`], a shared handle to an
//! [`Object`]. Handles are reference counted: cloning a `Value` retains the
//! object and dropping it releases it. Pairs, closures and vectors own their
//! children, so releasing the last handle to a list releases the whole list.
//! Cycles (a pair mutated to point into its own list, two closures capturing
//! each other's frame) are never reclaimed; see [`crate::runtime::collect`].
//!
//! Three objects are singletons per thread: `()`, `#t` and `#f`. They are
//! pinned by a thread-local handle and live until the thread exits. Every
//! other constructor allocates a fresh object, symbols included, which is
//! what makes `eq?` on two equally named symbols false.
//!
//! Ergonomic helpers such as [`val`], [`sym`] and [`nil`] build values from
//! Rust literals for code and tests.

use crate::Error;
use crate::evaluator::Env;
use crate::runtime;
use std::cell::{Ref, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;

/// Non-alphanumeric characters allowed in symbol names
pub(crate) const SYMBOL_SPECIAL_CHARS: &str = "!$%&*+-./:<=>?@^_~";

pub(crate) fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

/// Numeric literal syntax shared by the reader and `string->number`:
/// optional sign, digits with an optional fraction and exponent, `#x` hex
/// integers, and the printer's `+inf.0`, `-inf.0`, `+nan.0` spellings.
pub(crate) fn parse_number_literal(token: &str) -> Option<f64> {
    match token {
        "+inf.0" => return Some(f64::INFINITY),
        "-inf.0" => return Some(f64::NEG_INFINITY),
        "+nan.0" | "-nan.0" => return Some(f64::NAN),
        _ => {}
    }

    if let Some(hex) = token.strip_prefix("#x").or_else(|| token.strip_prefix("#X")) {
        let (negative, digits) = match hex.strip_prefix('-') {
            Some(digits) => (true, digits),
            None => (false, hex.strip_prefix('+').unwrap_or(hex)),
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let magnitude = u64::from_str_radix(digits, 16).ok()? as f64;
        return Some(if negative { -magnitude } else { magnitude });
    }

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    let unsigned = token.strip_prefix(['+', '-']).unwrap_or(token);
    let (mantissa, exponent) = match unsigned.split_once(['e', 'E']) {
        Some((mantissa, exponent)) => (mantissa, Some(exponent)),
        None => (unsigned, None),
    };
    let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return None;
    }
    if let Some(exponent) = exponent {
        let digits = exponent.strip_prefix(['+', '-']).unwrap_or(exponent);
        if digits.is_empty() || !all_digits(digits) {
            return None;
        }
    }
    let normalized = format!(
        "{}{}.{}e{}",
        if token.starts_with('-') { "-" } else { "" },
        if whole.is_empty() { "0" } else { whole },
        if fraction.is_empty() { "0" } else { fraction },
        exponent.unwrap_or("0")
    );
    normalized.parse().ok()
}

/// Signature of a native procedure: evaluated arguments plus the caller's environment.
pub type PrimitiveFn = dyn Fn(&[Value], &Env) -> Result<Value, Error>;

/// Number of arguments a procedure or special form accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
    /// Inclusive bounds
    Range(usize, usize),
    Any,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        match *self {
            Arity::Exact(n) => count == n,
            Arity::AtLeast(n) => count >= n,
            Arity::Range(min, max) => (min..=max).contains(&count),
            Arity::Any => true,
        }
    }

    pub fn validate(&self, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error(*self, count))
        }
    }

    /// Like [`Arity::validate`] but names the rejecting procedure in the error.
    pub fn check(&self, name: &str, count: usize) -> Result<(), Error> {
        if self.accepts(count) {
            Ok(())
        } else {
            Err(Error::arity_error_with_expr(*self, count, name))
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::Exact(n) => write!(f, "{n}"),
            Arity::AtLeast(n) => write!(f, "at least {n}"),
            Arity::Range(min, max) => write!(f, "{min} to {max}"),
            Arity::Any => write!(f, "any number of"),
        }
    }
}

/// Mutable two-slot cell.
pub struct Pair {
    car: RefCell<Value>,
    cdr: RefCell<Value>,
}

impl Pair {
    pub fn car(&self) -> Value {
        self.car.borrow().clone()
    }

    pub fn cdr(&self) -> Value {
        self.cdr.borrow().clone()
    }

    pub fn set_car(&self, value: Value) {
        *self.car.borrow_mut() = value;
    }

    pub fn set_cdr(&self, value: Value) {
        *self.cdr.borrow_mut() = value;
    }
}

/// A user procedure: parameters, body forms and the frame it closed over.
pub struct Closure {
    /// A list of symbols, possibly improper (rest parameter), or a single symbol
    pub params: Value,
    /// List of body forms evaluated as an implicit `begin`
    pub body: Value,
    pub env: Env,
    /// Set when the closure was created by `(define (name ...) ...)`
    pub name: Option<String>,
}

pub struct Primitive {
    pub name: String,
    pub arity: Arity,
    pub func: Rc<PrimitiveFn>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    Input,
    Output,
}

/// I/O handle. Ports only name a standard stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,
}

/// The object a [`Value`] handle points at.
pub enum Object {
    Nil,
    Boolean(bool),
    Number(f64),
    /// Not interned: two symbols with the same name are distinct objects
    Symbol(String),
    String(RefCell<String>),
    Pair(Pair),
    Closure(Closure),
    Primitive(Primitive),
    /// Fixed length, mutable slots
    Vector(RefCell<Vec<Value>>),
    Port(Port),
}

impl Drop for Object {
    fn drop(&mut self) {
        runtime::record_release();

        // Unlink uniquely owned cdr chains one pair at a time so that dropping
        // a long list does not recurse once per element.
        let Object::Pair(pair) = self else { return };
        let Some(placeholder) = Value::try_nil() else {
            return;
        };
        let mut tail = pair.cdr.replace(placeholder.clone());
        loop {
            let Ok(object) = Rc::try_unwrap(tail.0) else {
                break;
            };
            let next = match &object {
                Object::Pair(next_pair) => next_pair.cdr.replace(placeholder.clone()),
                _ => break,
            };
            drop(object);
            tail = next;
        }
    }
}

/// Shared handle to a runtime object.
///
/// To build values, use the helpers:
/// - `val(42)` for numbers, `val("text")` for strings, `val(true)` for booleans
/// - `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists, `val(vec![sym("op"), val(42)])` for mixed lists
#[derive(Clone)]
pub struct Value(Rc<Object>);

thread_local! {
    static NIL: Value = Value::alloc(Object::Nil);
    static TRUE: Value = Value::alloc(Object::Boolean(true));
    static FALSE: Value = Value::alloc(Object::Boolean(false));
}

impl Deref for Value {
    type Target = Object;

    fn deref(&self) -> &Object {
        &self.0
    }
}

impl Value {
    fn alloc(object: Object) -> Value {
        runtime::record_allocation();
        Value(Rc::new(object))
    }

    pub fn nil() -> Value {
        NIL.with(Value::clone)
    }

    fn try_nil() -> Option<Value> {
        NIL.try_with(Value::clone).ok()
    }

    pub fn boolean(b: bool) -> Value {
        if b {
            TRUE.with(Value::clone)
        } else {
            FALSE.with(Value::clone)
        }
    }

    pub fn number(n: f64) -> Value {
        Value::alloc(Object::Number(n))
    }

    /// Always a fresh symbol object, never a shared one.
    pub fn symbol(name: impl Into<String>) -> Value {
        Value::alloc(Object::Symbol(name.into()))
    }

    pub fn string(s: impl Into<String>) -> Value {
        Value::alloc(Object::String(RefCell::new(s.into())))
    }

    pub fn cons(car: Value, cdr: Value) -> Value {
        Value::alloc(Object::Pair(Pair {
            car: RefCell::new(car),
            cdr: RefCell::new(cdr),
        }))
    }

    pub fn closure(params: Value, body: Value, env: Env, name: Option<String>) -> Value {
        Value::alloc(Object::Closure(Closure {
            params,
            body,
            env,
            name,
        }))
    }

    pub fn primitive<F>(name: impl Into<String>, arity: Arity, func: F) -> Value
    where
        F: Fn(&[Value], &Env) -> Result<Value, Error> + 'static,
    {
        Value::alloc(Object::Primitive(Primitive {
            name: name.into(),
            arity,
            func: Rc::new(func),
        }))
    }

    pub fn vector(items: Vec<Value>) -> Value {
        Value::alloc(Object::Vector(RefCell::new(items)))
    }

    pub fn port(name: impl Into<String>, direction: PortDirection) -> Value {
        Value::alloc(Object::Port(Port {
            name: name.into(),
            direction,
        }))
    }

    /// Build a proper list from the given items.
    pub fn list(items: impl IntoIterator<Item = Value>) -> Value {
        let items: Vec<Value> = items.into_iter().collect();
        Value::list_with_tail(items, Value::nil())
    }

    /// Build a list whose final cdr is `tail` (an improper list unless `tail` is nil).
    pub fn list_with_tail(items: Vec<Value>, tail: Value) -> Value {
        items
            .into_iter()
            .rev()
            .fold(tail, |acc, item| Value::cons(item, acc))
    }

    // Predicates

    pub fn is_nil(&self) -> bool {
        matches!(**self, Object::Nil)
    }

    /// Only `#f` is false.
    pub fn is_false(&self) -> bool {
        matches!(**self, Object::Boolean(false))
    }

    pub fn is_truthy(&self) -> bool {
        !self.is_false()
    }

    pub fn is_boolean(&self) -> bool {
        matches!(**self, Object::Boolean(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(**self, Object::Number(_))
    }

    pub fn is_symbol(&self) -> bool {
        matches!(**self, Object::Symbol(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(**self, Object::String(_))
    }

    pub fn is_pair(&self) -> bool {
        matches!(**self, Object::Pair(_))
    }

    pub fn is_vector(&self) -> bool {
        matches!(**self, Object::Vector(_))
    }

    pub fn is_procedure(&self) -> bool {
        matches!(**self, Object::Closure(_) | Object::Primitive(_))
    }

    /// True for nil-terminated, acyclic chains of pairs.
    pub fn is_list(&self) -> bool {
        let mut slow = self.clone();
        let mut fast = self.clone();
        loop {
            for _ in 0..2 {
                match *fast {
                    Object::Nil => return true,
                    Object::Pair(_) => {}
                    _ => return false,
                }
                fast = fast.cdr();
            }
            slow = slow.cdr();
            if fast.is_eq(&slow) {
                return false;
            }
        }
    }

    // Accessors. These fail softly: a mismatched variant yields nil or None.

    pub fn as_number(&self) -> Option<f64> {
        match **self {
            Object::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match &**self {
            Object::Symbol(name) => Some(name.as_str()),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<Ref<'_, String>> {
        match &**self {
            Object::String(s) => Some(s.borrow()),
            _ => None,
        }
    }

    pub fn as_pair(&self) -> Option<&Pair> {
        match &**self {
            Object::Pair(pair) => Some(pair),
            _ => None,
        }
    }

    pub fn car(&self) -> Value {
        self.as_pair().map_or_else(Value::nil, Pair::car)
    }

    pub fn cdr(&self) -> Value {
        self.as_pair().map_or_else(Value::nil, Pair::cdr)
    }

    /// Returns false when `self` is not a pair.
    pub fn set_car(&self, value: Value) -> bool {
        self.as_pair().map(|pair| pair.set_car(value)).is_some()
    }

    pub fn set_cdr(&self, value: Value) -> bool {
        self.as_pair().map(|pair| pair.set_cdr(value)).is_some()
    }

    /// Iterate over the cars of a chain of pairs, stopping at the first non-pair.
    pub fn iter(&self) -> ListIter {
        ListIter {
            current: self.clone(),
        }
    }

    /// Elements of a proper list, or None for improper or cyclic lists.
    pub fn list_to_vec(&self) -> Option<Vec<Value>> {
        if self.is_list() {
            Some(self.iter().collect())
        } else {
            None
        }
    }

    pub fn type_name(&self) -> &'static str {
        match **self {
            Object::Nil => "null",
            Object::Boolean(_) => "boolean",
            Object::Number(_) => "number",
            Object::Symbol(_) => "symbol",
            Object::String(_) => "string",
            Object::Pair(_) => "pair",
            Object::Closure(_) | Object::Primitive(_) => "procedure",
            Object::Vector(_) => "vector",
            Object::Port(_) => "port",
        }
    }

    /// Number of live handles to this object, including `self`.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Stable address of the underlying object, used to detect revisits when
    /// walking object graphs.
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    // Equality

    /// `eq?`: same object.
    pub fn is_eq(&self, other: &Value) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// `eqv?`: numbers, booleans and symbols by value, everything else by identity.
    pub fn is_eqv(&self, other: &Value) -> bool {
        match (&**self, &**other) {
            (Object::Nil, Object::Nil) => true,
            (Object::Boolean(a), Object::Boolean(b)) => a == b,
            (Object::Number(a), Object::Number(b)) => a == b,
            (Object::Symbol(a), Object::Symbol(b)) => a == b,
            _ => self.is_eq(other),
        }
    }

    /// `equal?`: structural over pairs, by content for numbers, strings and
    /// symbols, by identity for everything else. Terminates on cyclic lists.
    pub fn is_equal(&self, other: &Value) -> bool {
        self.equal_in(other, &mut HashSet::new())
    }

    /// `seen` holds the pairs of pairs already under comparison.
    fn equal_in(
        &self,
        other: &Value,
        seen: &mut HashSet<(*const Object, *const Object)>,
    ) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        loop {
            if a.is_eq(&b) {
                return true;
            }
            let (next_a, next_b) = match (&*a, &*b) {
                (Object::Pair(p), Object::Pair(q)) => {
                    if !seen.insert((Rc::as_ptr(&a.0), Rc::as_ptr(&b.0))) {
                        return true;
                    }
                    if !p.car().equal_in(&q.car(), seen) {
                        return false;
                    }
                    (p.cdr(), q.cdr())
                }
                (Object::Nil, Object::Nil) => return true,
                (Object::Boolean(x), Object::Boolean(y)) => return x == y,
                (Object::Number(x), Object::Number(y)) => return x == y,
                (Object::Symbol(x), Object::Symbol(y)) => return x == y,
                (Object::String(x), Object::String(y)) => return *x.borrow() == *y.borrow(),
                _ => return false,
            };
            a = next_a;
            b = next_b;
        }
    }

    /// Printer for `display`: strings without quotes or escapes.
    pub fn display_form(&self) -> impl fmt::Display + '_ {
        Printed {
            value: self,
            write: false,
        }
    }
}

pub struct ListIter {
    current: Value,
}

impl Iterator for ListIter {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        let pair = self.current.as_pair()?;
        let (item, rest) = (pair.car(), pair.cdr());
        self.current = rest;
        Some(item)
    }
}

/// Render a number the way the printer does: integral values without a
/// fractional part, non-finite values in Scheme notation.
pub(crate) fn format_number(n: f64) -> String {
    if n.is_nan() {
        "+nan.0".to_owned()
    } else if n.is_infinite() {
        let sign = if n > 0.0 { '+' } else { '-' };
        format!("{sign}inf.0")
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

fn write_escaped(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            '\r' => f.write_str("\\r")?,
            c => write!(f, "{c}")?,
        }
    }
    f.write_str("\"")
}

struct Printed<'a> {
    value: &'a Value,
    write: bool,
}

impl fmt::Display for Printed<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printer {
            write: self.write,
            open: HashSet::new(),
        }
        .print(f, self.value)
    }
}

/// Tracks the pairs and vectors still being printed; meeting one of them
/// again means the structure is cyclic, and it prints as `...`.
struct Printer {
    write: bool,
    open: HashSet<*const Object>,
}

impl Printer {
    fn print(&mut self, f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
        match &**value {
            Object::Nil => f.write_str("()"),
            Object::Boolean(b) => f.write_str(if *b { "#t" } else { "#f" }),
            Object::Number(n) => f.write_str(&format_number(*n)),
            Object::Symbol(name) => f.write_str(name),
            Object::String(s) if self.write => write_escaped(f, &s.borrow()),
            Object::String(s) => f.write_str(&s.borrow()),
            Object::Pair(_) => self.print_list(f, value),
            Object::Closure(closure) => match &closure.name {
                Some(name) => write!(f, "#<procedure {name}>"),
                None => f.write_str("#<procedure>"),
            },
            Object::Primitive(primitive) => write!(f, "#<primitive {}>", primitive.name),
            Object::Vector(items) => {
                let ptr = Rc::as_ptr(&value.0);
                if !self.open.insert(ptr) {
                    return f.write_str("...");
                }
                f.write_str("#(")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    self.print(f, item)?;
                }
                self.open.remove(&ptr);
                f.write_str(")")
            }
            Object::Port(port) => write!(f, "#<port {}>", port.name),
        }
    }

    fn print_list(&mut self, f: &mut fmt::Formatter<'_>, list: &Value) -> fmt::Result {
        if self.open.contains(&Rc::as_ptr(&list.0)) {
            return f.write_str("...");
        }
        let mut chain = Vec::new();
        let mut current = list.clone();
        f.write_str("(")?;
        loop {
            match &*current.clone() {
                Object::Pair(pair) => {
                    let ptr = Rc::as_ptr(&current.0);
                    if !self.open.insert(ptr) {
                        f.write_str(" . ...")?;
                        break;
                    }
                    chain.push(ptr);
                    if chain.len() > 1 {
                        f.write_str(" ")?;
                    }
                    self.print(f, &pair.car())?;
                    current = pair.cdr();
                }
                Object::Nil => break,
                _ => {
                    f.write_str(" . ")?;
                    self.print(f, &current)?;
                    break;
                }
            }
        }
        for ptr in chain {
            self.open.remove(&ptr);
        }
        f.write_str(")")
    }
}

/// The `write` representation: strings quoted and escaped.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Printed {
            value: self,
            write: true,
        }
        .fmt(f)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({self})", self.type_name())
    }
}

/// Structural equality (`equal?`).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.is_equal(other)
    }
}

// From trait implementations for Value - enables .into() conversion
impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::boolean(b)
    }
}

macro_rules! impl_from_number {
    ($($num_type:ty),*) => {
        $(
            impl From<$num_type> for Value {
                fn from(n: $num_type) -> Self {
                    Value::number(n as f64)
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, i64, u8, u16, u32, usize, f32, f64);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::list(v.into_iter().map(Into::into))
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::list(arr.into_iter().map(Into::into))
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::list(slice.iter().cloned().map(Into::into))
    }
}

impl TryFrom<&Value> for f64 {
    type Error = Error;

    fn try_from(value: &Value) -> Result<f64, Error> {
        value
            .as_number()
            .ok_or_else(|| Error::TypeError(format!("expected number, got {value}")))
    }
}

/// Helper for creating symbols; each call makes a distinct symbol object
pub fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::symbol(name.as_ref())
}

/// Helper for creating Values from anything convertible
pub fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// The empty list
pub fn nil() -> Value {
    Value::nil()
}
