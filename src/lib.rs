//! rscheme - a small Scheme interpreter
//!
//! This crate reads symbolic-expression programs and evaluates them directly.
//! The interesting parts are the value model and its ownership rules, the
//! chained environment model, and the evaluator with its special forms and
//! procedure application.
//!
//! ```scheme
//! (define (make-adder n) (lambda (x) (+ x n)))
//! (define add5 (make-adder 5))
//! (add5 10)                      ; => 15
//! (let ((x 1)) (let ((x 2) (y x)) y)) ; => 1
//! ```
//!
//! ## Semantics worth knowing
//!
//! - Only `#f` is false. `0` and `()` are true.
//! - Symbols are not interned: `(eq? 'a 'a)` is `#f`, `(eqv? 'a 'a)` is `#t`.
//! - There are no proper tail calls. Evaluation depth is bounded by
//!   [`MAX_EVAL_DEPTH`] (configurable per [`interpreter::Interpreter`]).
//! - Values are reference counted. Cyclic structures are never reclaimed;
//!   [`runtime::collect`] reports them.
//!
//! ## Modules
//!
//! - `ast`: the value model
//! - `evaluator`: special forms, application and environments
//! - `builtinops`: the primitive library
//! - `scheme`: S-expression reader
//! - `runtime`: allocation statistics and collector hooks
//! - `interpreter`: evaluation contexts with their own fault slot

use crate::ast::Arity;
use std::fmt;

/// Maximum parsing depth to prevent stack overflow on deeply nested input
pub const MAX_PARSE_DEPTH: usize = 256;

/// Default maximum evaluation depth.
/// Every nested evaluation (argument, body form, special-form operand) counts one level.
pub const MAX_EVAL_DEPTH: usize = 20_000;

/// Reader options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseConfig {
    /// Skip `;` line comments. When off, `;` is a syntax error.
    pub handle_comments: bool,
}

impl Default for ParseConfig {
    fn default() -> Self {
        ParseConfig {
            handle_comments: true,
        }
    }
}

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (bad tokens, malformed expressions)
    InvalidSyntax,
    /// Input ended before the expression was complete (EOF, unterminated string, unclosed parens)
    Incomplete,
    /// Expression nesting exceeded the maximum parse depth
    TooDeeplyNested,
    /// Extra input found after a complete, valid expression
    TrailingContent,
    /// Valid Scheme syntax that this reader does not support (character literals, ...)
    Unsupported,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted around a byte offset of `input`
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const BEFORE: usize = 20;
        const MAX_CONTEXT: usize = 80;

        let error_offset = error_offset.min(input.len());
        let start = input[..error_offset]
            .char_indices()
            .rev()
            .nth(BEFORE - 1)
            .map_or(0, |(i, _)| i);
        let snippet: String = input[start..].chars().take(MAX_CONTEXT).collect();

        let mut context = String::new();
        if start > 0 {
            context.push_str("[...]");
        }
        context.push_str(&snippet);
        if start + snippet.len() < input.len() {
            context.push_str("[...]");
        }
        let context = context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

/// The kind of a fault, independent of its message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    UnboundVariable,
    WrongType,
    WrongArity,
    InvalidSyntax,
    DivisionByZero,
    FileNotFound,
    Runtime,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::UnboundVariable => "unbound variable",
            ErrorKind::WrongType => "wrong type",
            ErrorKind::WrongArity => "wrong arity",
            ErrorKind::InvalidSyntax => "invalid syntax",
            ErrorKind::DivisionByZero => "division by zero",
            ErrorKind::FileNotFound => "file not found",
            ErrorKind::Runtime => "runtime error",
        };
        f.write_str(name)
    }
}

/// Error types for the interpreter
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("Unbound variable: {0}")]
    UnboundVariable(String),
    #[error("Type error: {0}")]
    TypeError(String),
    #[error("{}", format_arity_error(expected, *got, expression.as_deref()))]
    ArityError {
        expected: Arity,
        got: usize,
        expression: Option<String>,
    },
    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),
    #[error("Division by zero: {0}")]
    DivisionByZero(String),
    #[error("File not found: {0}")]
    FileNotFound(String),
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

fn format_arity_error(expected: &Arity, got: usize, expression: Option<&str>) -> String {
    match expression {
        Some(expr) => format!("ArityError: {expr}: expected {expected} arguments, got {got}"),
        None => format!("ArityError: expected {expected} arguments, got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: Arity, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the procedure or form that rejected the call
    pub fn arity_error_with_expr(
        expected: Arity,
        got: usize,
        expression: impl Into<String>,
    ) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression.into()),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ParseError(_) => ErrorKind::Parse,
            Error::UnboundVariable(_) => ErrorKind::UnboundVariable,
            Error::TypeError(_) => ErrorKind::WrongType,
            Error::ArityError { .. } => ErrorKind::WrongArity,
            Error::InvalidSyntax(_) => ErrorKind::InvalidSyntax,
            Error::DivisionByZero(_) => ErrorKind::DivisionByZero,
            Error::FileNotFound(_) => ErrorKind::FileNotFound,
            Error::RuntimeError(_) => ErrorKind::Runtime,
        }
    }

    /// True when the reader ran out of input mid-expression; the REPL uses
    /// this to ask for a continuation line.
    pub fn is_incomplete_input(&self) -> bool {
        matches!(self, Error::ParseError(e) if e.kind == ParseErrorKind::Incomplete)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod interpreter;
pub mod runtime;

#[cfg(feature = "scheme")]
pub mod scheme;

pub use ast::Value;
pub use evaluator::{Env, Environment, create_global_env, eval};
pub use interpreter::{Interpreter, InterpreterConfig};
