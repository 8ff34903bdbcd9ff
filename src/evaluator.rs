//! Expression evaluation.
//!
//! [`eval`] classifies an expression and either returns it (self-evaluating
//! atoms), looks it up (symbols), dispatches to a special form (a pair whose
//! head names one), or applies a procedure to evaluated operands.
//!
//! Every nested evaluation counts one level against a depth limit. There are
//! no proper tail calls, so a deep Scheme recursion fails with a runtime
//! error once the limit is reached instead of exhausting the host stack.

mod environment;

pub use environment::{Env, Environment};

use crate::ast::{Arity, Object, Value};
use crate::builtinops::get_builtin_ops;
use crate::{Error, MAX_EVAL_DEPTH};
use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::LazyLock;

/// Remaining stack below which a new segment is allocated before recursing
const RED_ZONE: usize = 100 * 1024;
/// Size of each newly allocated stack segment
const STACK_PER_RECURSION: usize = 1024 * 1024;

fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}

/// Current nesting level and the limit it may not reach.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Depth {
    level: usize,
    limit: usize,
}

impl Depth {
    pub(crate) fn root(limit: usize) -> Self {
        Depth { level: 0, limit }
    }

    fn next(self) -> Self {
        Depth {
            level: self.level + 1,
            ..self
        }
    }

    fn check(self) -> Result<(), Error> {
        if self.level >= self.limit {
            Err(Error::RuntimeError(format!(
                "Evaluation depth limit exceeded (max: {})",
                self.limit
            )))
        } else {
            Ok(())
        }
    }
}

thread_local! {
    /// Depth of the application that invoked the running primitive, so that
    /// primitives calling back into [`apply`] keep counting from there.
    static PRIMITIVE_DEPTH: Cell<Option<Depth>> = const { Cell::new(None) };
}

/// The closed set of syntactic forms the evaluator handles itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialForm {
    Quote,
    If,
    Define,
    Set,
    Lambda,
    Begin,
    And,
    Or,
    Cond,
    Let,
    LetStar,
    Letrec,
    Quasiquote,
    Unquote,
    UnquoteSplicing,
}

static SPECIAL_FORMS: LazyLock<HashMap<&'static str, SpecialForm>> = LazyLock::new(|| {
    use SpecialForm::*;
    [
        Quote,
        If,
        Define,
        Set,
        Lambda,
        Begin,
        And,
        Or,
        Cond,
        Let,
        LetStar,
        Letrec,
        Quasiquote,
        Unquote,
        UnquoteSplicing,
    ]
    .into_iter()
    .map(|form| (form.name(), form))
    .collect()
});

impl SpecialForm {
    pub fn from_name(name: &str) -> Option<SpecialForm> {
        SPECIAL_FORMS.get(name).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            SpecialForm::Quote => "quote",
            SpecialForm::If => "if",
            SpecialForm::Define => "define",
            SpecialForm::Set => "set!",
            SpecialForm::Lambda => "lambda",
            SpecialForm::Begin => "begin",
            SpecialForm::And => "and",
            SpecialForm::Or => "or",
            SpecialForm::Cond => "cond",
            SpecialForm::Let => "let",
            SpecialForm::LetStar => "let*",
            SpecialForm::Letrec => "letrec",
            SpecialForm::Quasiquote => "quasiquote",
            SpecialForm::Unquote => "unquote",
            SpecialForm::UnquoteSplicing => "unquote-splicing",
        }
    }
}

/// Evaluate an expression in `env` with the default depth limit
pub fn eval(expr: &Value, env: &Env) -> Result<Value, Error> {
    eval_with_limit(expr, env, MAX_EVAL_DEPTH)
}

/// Evaluate an expression in `env`, failing once nesting reaches `max_depth`
pub fn eval_with_limit(expr: &Value, env: &Env, max_depth: usize) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, Depth::root(max_depth))
}

fn eval_with_depth_tracking(expr: &Value, env: &Env, depth: Depth) -> Result<Value, Error> {
    depth.check()?;
    ensure_sufficient_stack(|| match &**expr {
        Object::Nil | Object::Boolean(_) | Object::Number(_) | Object::String(_) => {
            Ok(expr.clone())
        }

        Object::Symbol(name) => env
            .lookup(name)
            .ok_or_else(|| Error::UnboundVariable(name.clone())),

        Object::Pair(pair) => {
            let head = pair.car();
            let operands = pair.cdr();
            if let Some(name) = head.as_symbol()
                && let Some(form) = SpecialForm::from_name(name)
            {
                return eval_special_form(form, &operands, env, depth);
            }
            eval_application(&head, &operands, env, depth)
        }

        Object::Closure(_) | Object::Primitive(_) | Object::Vector(_) | Object::Port(_) => Err(
            Error::InvalidSyntax(format!("cannot evaluate {}: {expr}", expr.type_name())),
        ),
    })
}

fn eval_special_form(
    form: SpecialForm,
    operands: &Value,
    env: &Env,
    depth: Depth,
) -> Result<Value, Error> {
    let args = operands.list_to_vec().ok_or_else(|| {
        Error::InvalidSyntax(format!("{}: improper operand list {operands}", form.name()))
    })?;
    match form {
        SpecialForm::Quote => eval_quote(&args),
        SpecialForm::If => eval_if(&args, env, depth),
        SpecialForm::Define => eval_define(&args, env, depth),
        SpecialForm::Set => eval_set(&args, env, depth),
        SpecialForm::Lambda => eval_lambda(&args, env),
        SpecialForm::Begin => eval_sequence(&args, env, depth),
        SpecialForm::And => eval_and(&args, env, depth),
        SpecialForm::Or => eval_or(&args, env, depth),
        SpecialForm::Cond => eval_cond(&args, env, depth),
        SpecialForm::Let => eval_let(&args, env, depth),
        SpecialForm::LetStar => eval_let_star(&args, env, depth),
        SpecialForm::Letrec => eval_letrec(&args, env, depth),
        SpecialForm::Quasiquote | SpecialForm::Unquote | SpecialForm::UnquoteSplicing => Err(
            Error::RuntimeError(format!("{} is not supported", form.name())),
        ),
    }
}

/// Evaluate forms in order, returning the last value (nil when empty)
fn eval_sequence(forms: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let mut result = Value::nil();
    for form in forms {
        result = eval_with_depth_tracking(form, env, depth.next())?;
    }
    Ok(result)
}

fn eval_quote(args: &[Value]) -> Result<Value, Error> {
    match args {
        [expr] => Ok(expr.clone()),
        _ => Err(Error::arity_error_with_expr(
            Arity::Exact(1),
            args.len(),
            "quote",
        )),
    }
}

fn eval_if(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let (test, then_branch, else_branch) = match args {
        [test, then_branch] => (test, then_branch, None),
        [test, then_branch, else_branch] => (test, then_branch, Some(else_branch)),
        _ => {
            return Err(Error::arity_error_with_expr(
                Arity::Range(2, 3),
                args.len(),
                "if",
            ));
        }
    };
    if eval_with_depth_tracking(test, env, depth.next())?.is_truthy() {
        eval_with_depth_tracking(then_branch, env, depth.next())
    } else {
        match else_branch {
            Some(expr) => eval_with_depth_tracking(expr, env, depth.next()),
            None => Ok(Value::nil()),
        }
    }
}

fn eval_define(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let [target, rest @ ..] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::AtLeast(1),
            0,
            "define",
        ));
    };
    match &**target {
        Object::Symbol(name) => {
            let [expr] = rest else {
                return Err(Error::arity_error_with_expr(
                    Arity::Exact(2),
                    args.len(),
                    "define",
                ));
            };
            let value = eval_with_depth_tracking(expr, env, depth.next())?;
            env.define(name, value);
            Ok(Value::nil())
        }
        // (define (name . params) body...)
        Object::Pair(signature) => {
            let name = signature.car();
            let name = name.as_symbol().ok_or_else(|| {
                Error::InvalidSyntax(format!("define: procedure name must be a symbol, got {name}"))
            })?;
            let params = signature.cdr();
            validate_params(&params)?;
            let closure = Value::closure(
                params,
                Value::list(rest.iter().cloned()),
                Rc::clone(env),
                Some(name.to_owned()),
            );
            env.define(name, closure);
            Ok(Value::nil())
        }
        _ => Err(Error::InvalidSyntax(format!(
            "define: expected a symbol or (name . params), got {target}"
        ))),
    }
}

fn eval_set(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let [target, expr] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::Exact(2),
            args.len(),
            "set!",
        ));
    };
    let name = target
        .as_symbol()
        .ok_or_else(|| Error::InvalidSyntax(format!("set!: expected a symbol, got {target}")))?;
    let value = eval_with_depth_tracking(expr, env, depth.next())?;
    if env.set_existing(name, value) {
        Ok(Value::nil())
    } else {
        Err(Error::RuntimeError(format!("set!: unbound variable {name}")))
    }
}

fn eval_lambda(args: &[Value], env: &Env) -> Result<Value, Error> {
    let [params, body @ ..] = args else {
        return Err(Error::arity_error_with_expr(
            Arity::AtLeast(1),
            0,
            "lambda",
        ));
    };
    validate_params(params)?;
    Ok(Value::closure(
        params.clone(),
        Value::list(body.iter().cloned()),
        Rc::clone(env),
        None,
    ))
}

/// Parameter specs are a possibly improper list of distinct symbols, or a
/// single symbol collecting every argument.
fn validate_params(params: &Value) -> Result<(), Error> {
    let mut seen = HashSet::new();
    let mut check = |param: &Value| -> Result<(), Error> {
        let name = param.as_symbol().ok_or_else(|| {
            Error::InvalidSyntax(format!("parameters must be symbols, got {param}"))
        })?;
        if !seen.insert(name.to_owned()) {
            return Err(Error::InvalidSyntax(format!(
                "duplicate parameter name: {name}"
            )));
        }
        Ok(())
    };

    let mut cursor = params.clone();
    loop {
        let next = match &*cursor {
            Object::Nil => return Ok(()),
            Object::Symbol(_) => return check(&cursor),
            Object::Pair(pair) => {
                check(&pair.car())?;
                pair.cdr()
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

fn eval_and(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let mut result = Value::boolean(true);
    for arg in args {
        result = eval_with_depth_tracking(arg, env, depth.next())?;
        if result.is_false() {
            return Ok(Value::boolean(false));
        }
    }
    Ok(result)
}

fn eval_or(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    for arg in args {
        let result = eval_with_depth_tracking(arg, env, depth.next())?;
        if result.is_truthy() {
            return Ok(result);
        }
    }
    Ok(Value::boolean(false))
}

fn eval_cond(clauses: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    for (i, clause) in clauses.iter().enumerate() {
        let parts = clause.list_to_vec().unwrap_or_default();
        let [test, body @ ..] = parts.as_slice() else {
            return Err(Error::InvalidSyntax(format!(
                "cond: clause must be a non-empty list, got {clause}"
            )));
        };

        if test.as_symbol() == Some("else") {
            if i + 1 != clauses.len() {
                return Err(Error::InvalidSyntax(
                    "cond: else clause must be last".to_owned(),
                ));
            }
            return eval_sequence(body, env, depth);
        }

        let value = eval_with_depth_tracking(test, env, depth.next())?;
        if value.is_truthy() {
            return if body.is_empty() {
                Ok(value)
            } else {
                eval_sequence(body, env, depth)
            };
        }
    }
    Ok(Value::nil())
}

/// Split `((name expr) ...)` into names and value expressions
fn parse_bindings(form: &str, bindings: &Value) -> Result<Vec<(String, Value)>, Error> {
    let bindings = bindings.list_to_vec().ok_or_else(|| {
        Error::InvalidSyntax(format!("{form}: bindings must be a list, got {bindings}"))
    })?;
    bindings
        .iter()
        .map(|binding| {
            let parts = binding.list_to_vec().unwrap_or_default();
            match parts.as_slice() {
                [name, expr] if name.is_symbol() => {
                    Ok((name.as_symbol().unwrap_or_default().to_owned(), expr.clone()))
                }
                _ => Err(Error::InvalidSyntax(format!(
                    "{form}: binding must be (name expr), got {binding}"
                ))),
            }
        })
        .collect()
}

fn split_let_form<'a>(form: &str, args: &'a [Value]) -> Result<(&'a Value, &'a [Value]), Error> {
    match args {
        [bindings, body @ ..] => Ok((bindings, body)),
        [] => Err(Error::arity_error_with_expr(Arity::AtLeast(1), 0, form)),
    }
}

/// Values are computed in the outer environment before any name is bound
fn eval_let(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let (bindings, body) = split_let_form("let", args)?;
    let bindings = parse_bindings("let", bindings)?;
    let values = bindings
        .iter()
        .map(|(_, expr)| eval_with_depth_tracking(expr, env, depth.next()))
        .collect::<Result<Vec<_>, _>>()?;

    let frame = Environment::new(Some(Rc::clone(env)));
    for ((name, _), value) in bindings.iter().zip(values) {
        frame.define(name, value);
    }
    eval_sequence(body, &frame, depth)
}

/// One frame; each value sees the bindings before it
fn eval_let_star(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let (bindings, body) = split_let_form("let*", args)?;
    let bindings = parse_bindings("let*", bindings)?;
    let frame = Environment::new(Some(Rc::clone(env)));
    for (name, expr) in &bindings {
        let value = eval_with_depth_tracking(expr, &frame, depth.next())?;
        frame.define(name, value);
    }
    eval_sequence(body, &frame, depth)
}

/// All names are bound to nil first, then assigned in order. A value
/// expression reading a sibling that is not assigned yet sees nil.
fn eval_letrec(args: &[Value], env: &Env, depth: Depth) -> Result<Value, Error> {
    let (bindings, body) = split_let_form("letrec", args)?;
    let bindings = parse_bindings("letrec", bindings)?;
    let frame = Environment::new(Some(Rc::clone(env)));
    for (name, _) in &bindings {
        frame.define(name, Value::nil());
    }
    for (name, expr) in &bindings {
        let value = eval_with_depth_tracking(expr, &frame, depth.next())?;
        frame.define(name, value);
    }
    eval_sequence(body, &frame, depth)
}

fn eval_application(
    head: &Value,
    operands: &Value,
    env: &Env,
    depth: Depth,
) -> Result<Value, Error> {
    let procedure = eval_with_depth_tracking(head, env, depth.next())?;
    let arg_exprs = operands.list_to_vec().ok_or_else(|| {
        Error::InvalidSyntax(format!("improper argument list in application: {operands}"))
    })?;
    let args = eval_args(&arg_exprs, env, depth)?;
    apply_procedure(&procedure, &args, env, depth)
}

/// Evaluate operands left to right, stopping at the first failure
fn eval_args(args: &[Value], env: &Env, depth: Depth) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth.next()))
        .collect()
}

fn apply_procedure(
    procedure: &Value,
    args: &[Value],
    env: &Env,
    depth: Depth,
) -> Result<Value, Error> {
    match &**procedure {
        // Primitives get the caller's environment, not one captured at definition
        Object::Primitive(primitive) => {
            primitive.arity.check(&primitive.name, args.len())?;
            let outer = PRIMITIVE_DEPTH.replace(Some(depth));
            let result = (primitive.func)(args, env);
            PRIMITIVE_DEPTH.set(outer);
            result
        }
        Object::Closure(closure) => {
            tracing::trace!(
                procedure = closure.name.as_deref().unwrap_or("lambda"),
                args = args.len(),
                "applying closure"
            );
            let frame =
                Environment::extend(&closure.env, &closure.params, args).map_err(|err| match err {
                    Error::ArityError { expected, got, .. } => Error::arity_error_with_expr(
                        expected,
                        got,
                        closure.name.as_deref().unwrap_or("#<procedure>"),
                    ),
                    other => other,
                })?;
            let body = closure.body.list_to_vec().unwrap_or_default();
            eval_sequence(&body, &frame, depth.next())
        }
        _ => Err(Error::TypeError(format!(
            "not a procedure: {procedure}"
        ))),
    }
}

/// Apply a procedure to already evaluated arguments.
///
/// Used by primitives such as `apply` and `map`. When called from inside a
/// primitive, depth keeps counting from the application that invoked it.
pub fn apply(procedure: &Value, args: &[Value], env: &Env) -> Result<Value, Error> {
    let depth = PRIMITIVE_DEPTH
        .get()
        .map_or(Depth::root(MAX_EVAL_DEPTH), Depth::next);
    depth.check()?;
    ensure_sufficient_stack(|| apply_procedure(procedure, args, env, depth))
}

/// Create a global environment holding every primitive
pub fn create_global_env() -> Env {
    let env = Environment::new(None);
    for op in get_builtin_ops() {
        env.define(op.scheme_id, op.to_value());
    }
    env
}
