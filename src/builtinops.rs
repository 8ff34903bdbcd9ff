//! Built-in procedure registry.
//!
//! Every primitive is declared once in [`BUILTIN_OPS`] with its Scheme name
//! and [`Arity`]. The evaluator checks arity before the native function runs,
//! so implementations may index `args` within their declared bounds.
//!
//! ```scheme
//! (+ 1 2 3)            ; arithmetic over doubles
//! (map car '((1) (2))) ; higher order primitives call back into the evaluator
//! (display "hi")       ; output to the current output port
//! ```
//!
//! Special forms are not in this registry; see [`crate::evaluator::SpecialForm`].
//!
//! ## Adding New Operations
//!
//! 1. Implement the function with the signature
//!    `fn(args: &[Value], env: &Env) -> Result<Value, Error>`
//! 2. Add it to `BUILTIN_OPS` with its Scheme identifier and arity
//! 3. Add tests covering edge cases and error conditions

use crate::Error;
use crate::ast::{Arity, Object, PortDirection, Value, format_number, parse_number_literal};
use crate::evaluator::{Env, apply};
use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::LazyLock;

/// Native implementation of a primitive
pub type BuiltinFn = fn(&[Value], &Env) -> Result<Value, Error>;

/// Definition of a built-in procedure
#[derive(Debug, Clone, Copy)]
pub struct BuiltinOp {
    /// The Scheme identifier for this procedure
    pub scheme_id: &'static str,
    pub func: BuiltinFn,
    /// Expected number of arguments
    pub arity: Arity,
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.scheme_id == other.scheme_id
    }
}

impl BuiltinOp {
    /// A fresh primitive value for binding in an environment
    pub fn to_value(&self) -> Value {
        Value::primitive(self.scheme_id, self.arity, self.func)
    }
}

//
// Argument helpers
//

fn number_arg(name: &str, value: &Value) -> Result<f64, Error> {
    value
        .as_number()
        .ok_or_else(|| Error::TypeError(format!("{name}: expected number, got {value}")))
}

fn numbers(name: &str, args: &[Value]) -> Result<Vec<f64>, Error> {
    args.iter().map(|arg| number_arg(name, arg)).collect()
}

/// Non-negative integral number usable as an index or size
fn index_arg(name: &str, value: &Value) -> Result<usize, Error> {
    match value.as_number() {
        Some(n) if n >= 0.0 && n.fract() == 0.0 => Ok(n as usize),
        _ => Err(Error::TypeError(format!(
            "{name}: expected a non-negative integer, got {value}"
        ))),
    }
}

fn string_arg(name: &str, value: &Value) -> Result<String, Error> {
    value
        .as_string()
        .map(|s| s.clone())
        .ok_or_else(|| Error::TypeError(format!("{name}: expected string, got {value}")))
}

fn list_arg(name: &str, value: &Value) -> Result<Vec<Value>, Error> {
    value
        .list_to_vec()
        .ok_or_else(|| Error::TypeError(format!("{name}: expected a proper list, got {value}")))
}

fn pair_arg<'a>(name: &str, value: &'a Value) -> Result<&'a crate::ast::Pair, Error> {
    value
        .as_pair()
        .ok_or_else(|| Error::TypeError(format!("{name}: expected pair, got {value}")))
}

fn procedure_arg(name: &str, value: &Value) -> Result<(), Error> {
    if value.is_procedure() {
        Ok(())
    } else {
        Err(Error::TypeError(format!(
            "{name}: expected procedure, got {value}"
        )))
    }
}

//
// Arithmetic
//

fn builtin_add(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::number(numbers("+", args)?.into_iter().sum()))
}

fn builtin_mul(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::number(numbers("*", args)?.into_iter().product()))
}

fn builtin_sub(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let nums = numbers("-", args)?;
    match nums.as_slice() {
        [only] => Ok(Value::number(-only)),
        [first, rest @ ..] => Ok(Value::number(rest.iter().fold(*first, |acc, n| acc - n))),
        [] => Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, "-")),
    }
}

fn builtin_div(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let nums = numbers("/", args)?;
    let (dividend, divisors) = match nums.as_slice() {
        [only] => (1.0, std::slice::from_ref(only)),
        [first, rest @ ..] => (*first, rest),
        [] => return Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, "/")),
    };
    divisors.iter().try_fold(dividend, |acc, &d| {
        if d == 0.0 {
            Err(Error::DivisionByZero(format!("/: {} / 0", format_number(acc))))
        } else {
            Ok(acc / d)
        }
    })
    .map(Value::number)
}

fn integer_division_args(name: &str, args: &[Value]) -> Result<(f64, f64), Error> {
    let a = number_arg(name, &args[0])?;
    let b = number_arg(name, &args[1])?;
    if b == 0.0 {
        return Err(Error::DivisionByZero(format!("{name}: division by zero")));
    }
    Ok((a, b))
}

/// Result takes the sign of the divisor
fn builtin_modulo(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let (a, b) = integer_division_args("modulo", args)?;
    let r = a % b;
    Ok(Value::number(if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }))
}

/// Result takes the sign of the dividend
fn builtin_remainder(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let (a, b) = integer_division_args("remainder", args)?;
    Ok(Value::number(a % b))
}

fn builtin_quotient(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let (a, b) = integer_division_args("quotient", args)?;
    Ok(Value::number((a / b).trunc()))
}

fn builtin_abs(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::number(number_arg("abs", &args[0])?.abs()))
}

fn builtin_max(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let nums = numbers("max", args)?;
    Ok(Value::number(nums.into_iter().fold(f64::NEG_INFINITY, f64::max)))
}

fn builtin_min(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let nums = numbers("min", args)?;
    Ok(Value::number(nums.into_iter().fold(f64::INFINITY, f64::min)))
}

//
// Comparison
//

macro_rules! numeric_comparison {
    ($name:ident, $op:tt, $op_str:expr) => {
        fn $name(args: &[Value], _env: &Env) -> Result<Value, Error> {
            let nums = numbers($op_str, args)?;
            Ok(Value::boolean(nums.windows(2).all(|pair| pair[0] $op pair[1])))
        }
    };
}

numeric_comparison!(builtin_num_eq, ==, "=");
numeric_comparison!(builtin_lt, <, "<");
numeric_comparison!(builtin_le, <=, "<=");
numeric_comparison!(builtin_gt, >, ">");
numeric_comparison!(builtin_ge, >=, ">=");

fn builtin_eq(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::boolean(args[0].is_eq(&args[1])))
}

fn builtin_eqv(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::boolean(args[0].is_eqv(&args[1])))
}

fn builtin_equal(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::boolean(args[0].is_equal(&args[1])))
}

//
// Pairs and lists
//

fn builtin_cons(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::cons(args[0].clone(), args[1].clone()))
}

fn builtin_car(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(pair_arg("car", &args[0])?.car())
}

fn builtin_cdr(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(pair_arg("cdr", &args[0])?.cdr())
}

fn builtin_set_car(args: &[Value], _env: &Env) -> Result<Value, Error> {
    pair_arg("set-car!", &args[0])?.set_car(args[1].clone());
    Ok(Value::nil())
}

fn builtin_set_cdr(args: &[Value], _env: &Env) -> Result<Value, Error> {
    pair_arg("set-cdr!", &args[0])?.set_cdr(args[1].clone());
    Ok(Value::nil())
}

fn builtin_list(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::list(args.iter().cloned()))
}

fn builtin_length(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::from(list_arg("length", &args[0])?.len()))
}

/// Every argument but the last is copied; the result shares the last one.
fn builtin_append(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let Some((last, init)) = args.split_last() else {
        return Ok(Value::nil());
    };
    let mut items = Vec::new();
    for list in init {
        items.extend(list_arg("append", list)?);
    }
    Ok(Value::list_with_tail(items, last.clone()))
}

fn builtin_reverse(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let items = list_arg("reverse", &args[0])?;
    Ok(Value::list(items.into_iter().rev()))
}

fn builtin_list_ref(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let index = index_arg("list-ref", &args[1])?;
    args[0].iter().nth(index).ok_or_else(|| {
        Error::RuntimeError(format!("list-ref: index {index} out of range for {}", args[0]))
    })
}

//
// Type predicates
//

macro_rules! type_predicate {
    ($name:ident, $method:ident) => {
        fn $name(args: &[Value], _env: &Env) -> Result<Value, Error> {
            Ok(Value::boolean(args[0].$method()))
        }
    };
}

type_predicate!(builtin_null_p, is_nil);
type_predicate!(builtin_pair_p, is_pair);
type_predicate!(builtin_list_p, is_list);
type_predicate!(builtin_number_p, is_number);
type_predicate!(builtin_string_p, is_string);
type_predicate!(builtin_symbol_p, is_symbol);
type_predicate!(builtin_boolean_p, is_boolean);
type_predicate!(builtin_procedure_p, is_procedure);
type_predicate!(builtin_vector_p, is_vector);

fn builtin_not(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::boolean(args[0].is_false()))
}

//
// Strings and symbols
//

fn builtin_string_length(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::from(string_arg("string-length", &args[0])?.chars().count()))
}

/// There is no character type: returns a one-character string.
fn builtin_string_ref(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let s = string_arg("string-ref", &args[0])?;
    let index = index_arg("string-ref", &args[1])?;
    s.chars()
        .nth(index)
        .map(|c| Value::string(c.to_string()))
        .ok_or_else(|| Error::RuntimeError(format!("string-ref: index {index} out of range")))
}

/// `(string-set! s k "c")` stores the single character of a one-character string
fn builtin_string_set(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let Object::String(buffer) = &*args[0] else {
        return Err(Error::TypeError(format!(
            "string-set!: expected string, got {}",
            args[0]
        )));
    };
    let index = index_arg("string-set!", &args[1])?;
    let replacement = string_arg("string-set!", &args[2])?;
    let mut chars = replacement.chars();
    let (Some(c), None) = (chars.next(), chars.next()) else {
        return Err(Error::TypeError(format!(
            "string-set!: expected a one-character string, got {}",
            args[2]
        )));
    };

    let mut buffer = buffer.borrow_mut();
    let Some((offset, old)) = buffer.char_indices().nth(index) else {
        return Err(Error::RuntimeError(format!(
            "string-set!: index {index} out of range"
        )));
    };
    buffer.replace_range(offset..offset + old.len_utf8(), c.encode_utf8(&mut [0; 4]));
    Ok(Value::nil())
}

fn builtin_string_append(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let parts = args
        .iter()
        .map(|arg| string_arg("string-append", arg))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Value::string(parts.concat()))
}

fn builtin_symbol_to_string(args: &[Value], _env: &Env) -> Result<Value, Error> {
    args[0]
        .as_symbol()
        .map(Value::string)
        .ok_or_else(|| {
            Error::TypeError(format!(
                "symbol->string: expected symbol, got {}",
                args[0]
            ))
        })
}

/// Builds a new, distinct symbol on every call
fn builtin_string_to_symbol(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::symbol(string_arg("string->symbol", &args[0])?))
}

fn builtin_number_to_string(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::string(format_number(number_arg(
        "number->string",
        &args[0],
    )?)))
}

fn builtin_string_to_number(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let s = string_arg("string->number", &args[0])?;
    Ok(parse_number_literal(s.trim()).map_or_else(|| Value::boolean(false), Value::number))
}

//
// Vectors
//

/// Longest vector `make-vector` will build
pub const MAX_VECTOR_LENGTH: usize = 1 << 24;

fn vector_items<'a>(
    name: &str,
    value: &'a Value,
) -> Result<&'a std::cell::RefCell<Vec<Value>>, Error> {
    match &**value {
        Object::Vector(items) => Ok(items),
        _ => Err(Error::TypeError(format!("{name}: expected vector, got {value}"))),
    }
}

fn builtin_vector(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::vector(args.to_vec()))
}

fn builtin_make_vector(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let size = index_arg("make-vector", &args[0])?;
    if size > MAX_VECTOR_LENGTH {
        return Err(Error::RuntimeError(format!(
            "make-vector: length {size} exceeds the maximum of {MAX_VECTOR_LENGTH}"
        )));
    }
    let mut items = Vec::new();
    items.try_reserve_exact(size).map_err(|e| {
        Error::RuntimeError(format!("make-vector: cannot allocate {size} elements: {e}"))
    })?;
    let fill = args.get(1).cloned().unwrap_or_else(Value::nil);
    items.resize(size, fill);
    Ok(Value::vector(items))
}

fn builtin_vector_length(args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::from(vector_items("vector-length", &args[0])?.borrow().len()))
}

fn builtin_vector_ref(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let index = index_arg("vector-ref", &args[1])?;
    let items = vector_items("vector-ref", &args[0])?.borrow();
    items
        .get(index)
        .cloned()
        .ok_or_else(|| Error::RuntimeError(format!("vector-ref: index {index} out of range")))
}

fn builtin_vector_set(args: &[Value], _env: &Env) -> Result<Value, Error> {
    // The index check may print the vector, so no borrow is held yet
    let index = index_arg("vector-set!", &args[1])?;
    let mut items = vector_items("vector-set!", &args[0])?.borrow_mut();
    let slot = items
        .get_mut(index)
        .ok_or_else(|| Error::RuntimeError(format!("vector-set!: index {index} out of range")))?;
    *slot = args[2].clone();
    Ok(Value::nil())
}

//
// Control
//

/// `(apply f a b '(c d))` calls `(f a b c d)`
fn builtin_apply(args: &[Value], env: &Env) -> Result<Value, Error> {
    let (procedure, rest) = args
        .split_first()
        .ok_or_else(|| Error::arity_error_with_expr(Arity::AtLeast(2), 0, "apply"))?;
    procedure_arg("apply", procedure)?;
    let Some((spread, fixed)) = rest.split_last() else {
        return Err(Error::arity_error_with_expr(Arity::AtLeast(2), 1, "apply"));
    };
    let mut call_args = fixed.to_vec();
    call_args.extend(list_arg("apply", spread)?);
    apply(procedure, &call_args, env)
}

/// Apply `procedure` across the lists in `args[1..]`, stopping at the shortest
fn map_lists(name: &str, args: &[Value], env: &Env) -> Result<Vec<Value>, Error> {
    let procedure = &args[0];
    procedure_arg(name, procedure)?;
    let lists = args[1..]
        .iter()
        .map(|list| list_arg(name, list))
        .collect::<Result<Vec<_>, _>>()?;
    let shortest = lists.iter().map(Vec::len).min().unwrap_or(0);
    (0..shortest)
        .map(|i| {
            let call_args: Vec<Value> = lists.iter().map(|list| list[i].clone()).collect();
            apply(procedure, &call_args, env)
        })
        .collect()
}

fn builtin_map(args: &[Value], env: &Env) -> Result<Value, Error> {
    Ok(Value::list(map_lists("map", args, env)?))
}

fn builtin_for_each(args: &[Value], env: &Env) -> Result<Value, Error> {
    map_lists("for-each", args, env)?;
    Ok(Value::nil())
}

fn builtin_error(args: &[Value], _env: &Env) -> Result<Value, Error> {
    let parts: Vec<String> = args
        .iter()
        .map(|arg| arg.display_form().to_string())
        .collect();
    let message = if parts.is_empty() {
        "Error".to_owned()
    } else {
        parts.join(" ")
    };
    Err(Error::RuntimeError(message))
}

//
// Output
//

/// Name of the output stream selected by an optional port argument
fn output_target<'a>(name: &str, port: Option<&'a Value>) -> Result<&'a str, Error> {
    match port.map(|p| (p, &**p)) {
        None => Ok("stdout"),
        Some((_, Object::Port(port))) if port.direction == PortDirection::Output => {
            Ok(port.name.as_str())
        }
        Some((value, _)) => Err(Error::TypeError(format!(
            "{name}: expected output port, got {value}"
        ))),
    }
}

fn write_output(name: &str, port: Option<&Value>, text: &str) -> Result<Value, Error> {
    let target = output_target(name, port)?;
    let result = if target == "stderr" {
        let mut stream = io::stderr().lock();
        stream.write_all(text.as_bytes()).and_then(|()| stream.flush())
    } else {
        let mut stream = io::stdout().lock();
        stream.write_all(text.as_bytes()).and_then(|()| stream.flush())
    };
    result.map_err(|e| Error::RuntimeError(format!("{name}: {e}")))?;
    Ok(Value::nil())
}

fn builtin_display(args: &[Value], _env: &Env) -> Result<Value, Error> {
    write_output("display", args.get(1), &args[0].display_form().to_string())
}

fn builtin_write(args: &[Value], _env: &Env) -> Result<Value, Error> {
    write_output("write", args.get(1), &args[0].to_string())
}

fn builtin_newline(args: &[Value], _env: &Env) -> Result<Value, Error> {
    write_output("newline", args.first(), "\n")
}

fn builtin_current_output_port(_args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::port("stdout", PortDirection::Output))
}

fn builtin_current_error_port(_args: &[Value], _env: &Env) -> Result<Value, Error> {
    Ok(Value::port("stderr", PortDirection::Output))
}

/// Global registry of all built-in procedures.
static BUILTIN_OPS: &[BuiltinOp] = &[
    // Arithmetic
    BuiltinOp {
        scheme_id: "+",
        func: builtin_add,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "-",
        func: builtin_sub,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "*",
        func: builtin_mul,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "/",
        func: builtin_div,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "modulo",
        func: builtin_modulo,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "remainder",
        func: builtin_remainder,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "quotient",
        func: builtin_quotient,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "abs",
        func: builtin_abs,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "max",
        func: builtin_max,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "min",
        func: builtin_min,
        arity: Arity::AtLeast(1),
    },
    // Comparison
    BuiltinOp {
        scheme_id: "=",
        func: builtin_num_eq,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "<",
        func: builtin_lt,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "<=",
        func: builtin_le,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: ">",
        func: builtin_gt,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: ">=",
        func: builtin_ge,
        arity: Arity::AtLeast(1),
    },
    BuiltinOp {
        scheme_id: "eq?",
        func: builtin_eq,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "eqv?",
        func: builtin_eqv,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "equal?",
        func: builtin_equal,
        arity: Arity::Exact(2),
    },
    // Pairs and lists
    BuiltinOp {
        scheme_id: "cons",
        func: builtin_cons,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "car",
        func: builtin_car,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "cdr",
        func: builtin_cdr,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "set-car!",
        func: builtin_set_car,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "set-cdr!",
        func: builtin_set_cdr,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "list",
        func: builtin_list,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "length",
        func: builtin_length,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "append",
        func: builtin_append,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "reverse",
        func: builtin_reverse,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "list-ref",
        func: builtin_list_ref,
        arity: Arity::Exact(2),
    },
    // Type predicates
    BuiltinOp {
        scheme_id: "null?",
        func: builtin_null_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "pair?",
        func: builtin_pair_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "list?",
        func: builtin_list_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "number?",
        func: builtin_number_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "string?",
        func: builtin_string_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "symbol?",
        func: builtin_symbol_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "boolean?",
        func: builtin_boolean_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "procedure?",
        func: builtin_procedure_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "vector?",
        func: builtin_vector_p,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "not",
        func: builtin_not,
        arity: Arity::Exact(1),
    },
    // Strings and symbols
    BuiltinOp {
        scheme_id: "string-length",
        func: builtin_string_length,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "string-ref",
        func: builtin_string_ref,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "string-set!",
        func: builtin_string_set,
        arity: Arity::Exact(3),
    },
    BuiltinOp {
        scheme_id: "string-append",
        func: builtin_string_append,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "symbol->string",
        func: builtin_symbol_to_string,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "string->symbol",
        func: builtin_string_to_symbol,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "number->string",
        func: builtin_number_to_string,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "string->number",
        func: builtin_string_to_number,
        arity: Arity::Exact(1),
    },
    // Vectors
    BuiltinOp {
        scheme_id: "vector",
        func: builtin_vector,
        arity: Arity::Any,
    },
    BuiltinOp {
        scheme_id: "make-vector",
        func: builtin_make_vector,
        arity: Arity::Range(1, 2),
    },
    BuiltinOp {
        scheme_id: "vector-length",
        func: builtin_vector_length,
        arity: Arity::Exact(1),
    },
    BuiltinOp {
        scheme_id: "vector-ref",
        func: builtin_vector_ref,
        arity: Arity::Exact(2),
    },
    BuiltinOp {
        scheme_id: "vector-set!",
        func: builtin_vector_set,
        arity: Arity::Exact(3),
    },
    // Control
    BuiltinOp {
        scheme_id: "apply",
        func: builtin_apply,
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        scheme_id: "map",
        func: builtin_map,
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        scheme_id: "for-each",
        func: builtin_for_each,
        arity: Arity::AtLeast(2),
    },
    BuiltinOp {
        scheme_id: "error",
        func: builtin_error,
        arity: Arity::Any,
    },
    // Output
    BuiltinOp {
        scheme_id: "display",
        func: builtin_display,
        arity: Arity::Range(1, 2),
    },
    BuiltinOp {
        scheme_id: "write",
        func: builtin_write,
        arity: Arity::Range(1, 2),
    },
    BuiltinOp {
        scheme_id: "newline",
        func: builtin_newline,
        arity: Arity::Range(0, 1),
    },
    BuiltinOp {
        scheme_id: "current-output-port",
        func: builtin_current_output_port,
        arity: Arity::Exact(0),
    },
    BuiltinOp {
        scheme_id: "current-error-port",
        func: builtin_current_error_port,
        arity: Arity::Exact(0),
    },
];

/// Lazy static map from scheme_id to BuiltinOp (use find_scheme_op)
static BUILTIN_SCHEME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| BUILTIN_OPS.iter().map(|op| (op.scheme_id, op)).collect());

/// All builtin procedures, in registration order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS
}

/// Find a builtin procedure by its Scheme identifier
pub fn find_scheme_op(id: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_SCHEME.get(id).copied()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ErrorKind;
    use crate::ast::{nil, sym, val};
    use crate::evaluator::{Environment, create_global_env};

    /// Micro-helper for success cases
    fn success<T: Into<Value>>(value: T) -> Option<Value> {
        Some(val(value))
    }

    /// Invoke a builtin through the registry, checking arity the way the
    /// evaluator does
    fn call_builtin(name: &str, args: &[Value]) -> Result<Value, Error> {
        let op = find_scheme_op(name).unwrap();
        let env = create_global_env();
        op.arity.check(name, args.len())?;
        (op.func)(args, &env)
    }

    fn procedure(name: &str) -> Value {
        find_scheme_op(name).unwrap().to_value()
    }

    /// Macro to create test cases, invoking builtins via the registry.
    macro_rules! test {
        ($name:expr, $args:expr, $expected:expr) => {
            ($name, call_builtin($name, $args), $expected)
        };
    }

    #[test]
    fn test_builtin_ops_registry() {
        let not_op = find_scheme_op("not").unwrap();
        assert_eq!(not_op.arity, Arity::Exact(1));

        let add_op = find_scheme_op("+").unwrap();
        assert_eq!(add_op.arity, Arity::Any);
        let result = (add_op.func)(&[val(1), val(2)], &Environment::new(None)).unwrap();
        assert_eq!(result, val(3));

        assert!(find_scheme_op("unknown").is_none());
        // Special forms live in the evaluator, not here
        assert!(find_scheme_op("if").is_none());
        assert!(find_scheme_op("quote").is_none());

        // No duplicate names
        assert_eq!(BUILTIN_SCHEME.len(), get_builtin_ops().len());
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_builtin_function_implementations() {
        type TestCase = (&'static str, Result<Value, Error>, Option<Value>);

        let int_list = val([1, 2, 3]);
        let many_ones: Vec<Value> = (0..100).map(|_| val(1)).collect();
        let nested = val([val([val([1])])]);
        let complex1 = val([val(1), val("test"), val([val(2)])]);
        let complex2 = val([val(1), val("test"), val([val(2)])]);
        let complex3 = val([val(1), val("test"), val([val(3)])]);
        let shared = val("same");

        let test_cases: Vec<TestCase> = vec![
            // =================================================================
            // ARITHMETIC
            // =================================================================
            test!("+", &[], success(0)),
            test!("+", &[val(1), val(2), val(3)], success(6)),
            test!("+", &[val(0.5), val(0.25)], success(0.75)),
            test!("+", &many_ones, success(100)),
            test!("+", &[val(1), val("a")], None),
            test!("-", &[val(5)], success(-5)),
            test!("-", &[val(10), val(3), val(2)], success(5)),
            test!("-", &[], None),
            test!("*", &[], success(1)),
            test!("*", &[val(2), val(3), val(4)], success(24)),
            test!("/", &[val(4)], success(0.25)),
            test!("/", &[val(12), val(2), val(3)], success(2)),
            test!("/", &[val(1), val(0)], None),
            test!("/", &[val(0)], None),
            test!("/", &[val(7), val(2)], success(3.5)),
            test!("modulo", &[val(7), val(3)], success(1)),
            test!("modulo", &[val(-7), val(3)], success(2)),
            test!("modulo", &[val(7), val(-3)], success(-2)),
            test!("modulo", &[val(6), val(3)], success(0)),
            test!("modulo", &[val(1), val(0)], None),
            test!("remainder", &[val(-7), val(3)], success(-1)),
            test!("quotient", &[val(-7), val(2)], success(-3)),
            test!("quotient", &[val(7), val(0)], None),
            test!("abs", &[val(-3)], success(3)),
            test!("abs", &[val(2.5)], success(2.5)),
            test!("max", &[val(1), val(5), val(3)], success(5)),
            test!("min", &[val(4), val(-2), val(3)], success(-2)),
            test!("max", &[], None),
            // =================================================================
            // COMPARISON
            // =================================================================
            test!("=", &[val(1), val(1), val(1)], success(true)),
            test!("=", &[val(1), val(2)], success(false)),
            test!("=", &[val(1)], success(true)),
            test!("<", &[val(1), val(2), val(3)], success(true)),
            test!("<", &[val(1), val(3), val(2)], success(false)),
            test!("<=", &[val(1), val(1), val(2)], success(true)),
            test!(">", &[val(3), val(2), val(1)], success(true)),
            test!(">=", &[val(3), val(3), val(4)], success(false)),
            test!("<", &[val(1), val("2")], None),
            test!("eq?", &[shared.clone(), shared.clone()], success(true)),
            test!("eq?", &[val("same"), val("same")], success(false)),
            test!("eq?", &[sym("a"), sym("a")], success(false)),
            test!("eqv?", &[sym("a"), sym("a")], success(true)),
            test!("eqv?", &[val(2), val(2)], success(true)),
            test!("eqv?", &[val("s"), val("s")], success(false)),
            test!("equal?", &[complex1.clone(), complex2.clone()], success(true)),
            test!("equal?", &[complex1.clone(), complex3.clone()], success(false)),
            test!("equal?", &[val(1)], None),
            // =================================================================
            // PAIRS AND LISTS
            // =================================================================
            test!("cons", &[val(1), val(2)], Some(Value::cons(val(1), val(2)))),
            test!("cons", &[val(1), nil()], success([1])),
            test!("car", &[int_list.clone()], success(1)),
            test!("cdr", &[int_list.clone()], success([2, 3])),
            test!("car", &[nested.clone()], Some(val([val([1])]))),
            test!("car", &[nil()], None),
            test!("cdr", &[val(1)], None),
            test!("list", &[], Some(nil())),
            test!("list", &[val(1), val("a")], Some(val(vec![val(1), val("a")]))),
            test!("length", &[int_list.clone()], success(3)),
            test!("length", &[nil()], success(0)),
            test!("length", &[Value::cons(val(1), val(2))], None),
            test!("append", &[], Some(nil())),
            test!("append", &[val([1, 2]), val([3]), nil()], success([1, 2, 3])),
            test!(
                "append",
                &[val([1]), val(2)],
                Some(Value::cons(val(1), val(2)))
            ),
            test!("append", &[val(1), val([2])], None),
            test!("reverse", &[int_list.clone()], success([3, 2, 1])),
            test!("reverse", &[nil()], Some(nil())),
            test!("reverse", &[val(1)], None),
            test!("list-ref", &[int_list.clone(), val(0)], success(1)),
            test!("list-ref", &[int_list.clone(), val(2)], success(3)),
            test!("list-ref", &[int_list.clone(), val(3)], None),
            test!("list-ref", &[int_list.clone(), val(-1)], None),
            test!("list-ref", &[int_list.clone(), val(0.5)], None),
            // =================================================================
            // PREDICATES
            // =================================================================
            test!("null?", &[nil()], success(true)),
            test!("null?", &[int_list.clone()], success(false)),
            test!("pair?", &[int_list.clone()], success(true)),
            test!("pair?", &[nil()], success(false)),
            test!("list?", &[int_list.clone()], success(true)),
            test!("list?", &[nil()], success(true)),
            test!("list?", &[Value::cons(val(1), val(2))], success(false)),
            test!("number?", &[val(1)], success(true)),
            test!("number?", &[val("1")], success(false)),
            test!("string?", &[val("1")], success(true)),
            test!("symbol?", &[sym("a")], success(true)),
            test!("symbol?", &[val("a")], success(false)),
            test!("boolean?", &[val(false)], success(true)),
            test!("boolean?", &[nil()], success(false)),
            test!("procedure?", &[procedure("car")], success(true)),
            test!("procedure?", &[sym("car")], success(false)),
            test!("vector?", &[Value::vector(vec![])], success(true)),
            test!("not", &[val(false)], success(true)),
            test!("not", &[val(0)], success(false)),
            test!("not", &[nil()], success(false)),
            test!("not", &[], None),
            // =================================================================
            // STRINGS AND SYMBOLS
            // =================================================================
            test!("string-length", &[val("hello")], success(5)),
            test!("string-length", &[val("")], success(0)),
            test!("string-length", &[val(5)], None),
            test!("string-ref", &[val("abc"), val(1)], success("b")),
            test!("string-ref", &[val("abc"), val(3)], None),
            test!("string-append", &[], success("")),
            test!("string-append", &[val("ab"), val("cd")], success("abcd")),
            test!("string-append", &[val("ab"), val(1)], None),
            test!("symbol->string", &[sym("foo")], success("foo")),
            test!("symbol->string", &[val("foo")], None),
            test!("string->symbol", &[val("foo")], Some(sym("foo"))),
            test!("number->string", &[val(42)], success("42")),
            test!("number->string", &[val(2.5)], success("2.5")),
            test!("string->number", &[val("42")], success(42)),
            test!("string->number", &[val("-1.5e2")], success(-150)),
            test!("string->number", &[val("abc")], success(false)),
            // =================================================================
            // VECTORS
            // =================================================================
            test!("vector-length", &[Value::vector(vec![val(1), val(2)])], success(2)),
            test!("vector-ref", &[Value::vector(vec![val(1), val(2)]), val(1)], success(2)),
            test!("vector-ref", &[Value::vector(vec![val(1)]), val(1)], None),
            test!("vector-ref", &[int_list.clone(), val(0)], None),
            test!("make-vector", &[val(-1)], None),
            test!("make-vector", &[val(1e19)], None),
            // =================================================================
            // CONTROL
            // =================================================================
            test!("apply", &[procedure("+"), val([1, 2, 3])], success(6)),
            test!("apply", &[procedure("+"), val(1), val(2), val([3])], success(6)),
            test!("apply", &[procedure("+"), val(1)], None),
            test!("apply", &[val(1), nil()], None),
            test!("map", &[procedure("car"), val([val([1]), val([2])])], success([1, 2])),
            test!("map", &[procedure("+"), val([1, 2, 3]), val([10, 20])], success([11, 22])),
            test!("map", &[procedure("car"), nil()], Some(nil())),
            test!("map", &[procedure("car"), val([1])], None),
            test!("for-each", &[procedure("car"), val([val([1])])], Some(nil())),
            test!("error", &[val("bad thing:"), val(42)], None),
        ];

        for (i, (name, actual, expected)) in test_cases.into_iter().enumerate() {
            match (actual, expected) {
                (Ok(actual), Some(expected)) => assert!(
                    actual == expected,
                    "Test #{} ({name}): expected {expected:?}, got {actual:?}",
                    i + 1
                ),
                (Err(_), None) => {}
                (actual, expected) => panic!(
                    "Test #{} ({name}): expected {expected:?}, got {actual:?}",
                    i + 1
                ),
            }
        }
    }

    #[test]
    fn test_error_kinds() {
        let cases: Vec<(&str, Vec<Value>, ErrorKind)> = vec![
            ("/", vec![val(1), val(0)], ErrorKind::DivisionByZero),
            ("modulo", vec![val(1), val(0)], ErrorKind::DivisionByZero),
            ("car", vec![val(1)], ErrorKind::WrongType),
            ("car", vec![], ErrorKind::WrongArity),
            ("cons", vec![val(1)], ErrorKind::WrongArity),
            ("error", vec![val("x")], ErrorKind::Runtime),
            ("list-ref", vec![nil(), val(0)], ErrorKind::Runtime),
            ("make-vector", vec![val(1e19)], ErrorKind::Runtime),
            ("make-vector", vec![val((MAX_VECTOR_LENGTH + 1) as f64)], ErrorKind::Runtime),
            ("make-vector", vec![val(1.5)], ErrorKind::WrongType),
        ];
        for (name, args, kind) in cases {
            let err = call_builtin(name, &args).unwrap_err();
            assert_eq!(err.kind(), kind, "{name} failed with {err}");
        }
    }

    #[test]
    fn test_error_message_construction() {
        type ErrorTest = (Vec<Value>, &'static str);
        let test_cases: Vec<ErrorTest> = vec![
            (vec![], "Error"),
            (vec![val("Simple message")], "Simple message"),
            (
                vec![val("Code:"), val(404), val("Not Found")],
                "Code: 404 Not Found",
            ),
            (
                vec![val(true), val(42), val("mixed"), nil()],
                "#t 42 mixed ()",
            ),
        ];

        for (args, expected_msg) in test_cases {
            match call_builtin("error", &args).unwrap_err() {
                Error::RuntimeError(msg) => {
                    assert_eq!(msg, expected_msg, "Failed for args: {args:?}");
                }
                other => panic!("Expected RuntimeError for args: {args:?}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_mutators() {
        let pair = Value::cons(val(1), val(2));
        call_builtin("set-car!", &[pair.clone(), val(10)]).unwrap();
        call_builtin("set-cdr!", &[pair.clone(), nil()]).unwrap();
        assert_eq!(pair, val([10]));

        let vector = call_builtin("make-vector", &[val(3)]).unwrap();
        assert_eq!(vector.to_string(), "#(() () ())");
        call_builtin("vector-set!", &[vector.clone(), val(1), val("x")]).unwrap();
        assert_eq!(vector.to_string(), "#(() \"x\" ())");
        assert!(call_builtin("vector-set!", &[vector.clone(), val(3), val(0)]).is_err());
        let filled = call_builtin("make-vector", &[val(2), val(0)]).unwrap();
        assert_eq!(filled.to_string(), "#(0 0)");

        let s = val("héllo");
        call_builtin("string-set!", &[s.clone(), val(1), val("e")]).unwrap();
        assert_eq!(s, val("hello"));
        assert!(call_builtin("string-set!", &[s.clone(), val(0), val("ab")]).is_err());
        assert!(call_builtin("string-set!", &[s.clone(), val(9), val("a")]).is_err());
    }

    #[test]
    fn test_vector_as_its_own_index() {
        let vector = Value::vector(vec![val(1), val(2)]);
        for name in ["vector-set!", "vector-ref"] {
            let args = [vector.clone(), vector.clone(), val(0)];
            let arity = if name == "vector-set!" { 3 } else { 2 };
            let err = call_builtin(name, &args[..arity]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::WrongType, "{name}: {err}");
        }
        assert_eq!(vector.to_string(), "#(1 2)");
    }

    #[test]
    fn test_string_to_symbol_is_fresh() {
        let a = call_builtin("string->symbol", &[val("x")]).unwrap();
        let b = call_builtin("string->symbol", &[val("x")]).unwrap();
        assert!(!a.is_eq(&b));
        assert!(a.is_eqv(&b));
    }

    #[test]
    fn test_ports() {
        let out = call_builtin("current-output-port", &[]).unwrap();
        assert_eq!(out.to_string(), "#<port stdout>");
        let err = call_builtin("current-error-port", &[]).unwrap();
        assert_eq!(err.to_string(), "#<port stderr>");
        assert!(call_builtin("newline", &[out]).unwrap().is_nil());
        assert!(call_builtin("display", &[val(""), err]).unwrap().is_nil());
        assert!(call_builtin("display", &[val(1), val(2)]).is_err());
    }

    #[test]
    fn test_every_builtin_is_bound_globally() {
        let env = create_global_env();
        for op in get_builtin_ops() {
            let value = env.lookup(op.scheme_id).unwrap();
            assert!(value.is_procedure(), "{} is not a procedure", op.scheme_id);
        }
    }
}
