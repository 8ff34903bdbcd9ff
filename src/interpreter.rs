//! Evaluation contexts.
//!
//! An [`Interpreter`] owns a global environment and a fault slot. The slot
//! holds the first error raised since it was last cleared; later errors are
//! still returned to the caller but never replace a pending fault. Top-level
//! drivers clear the slot before each form, so one failed form does not
//! poison the next one.
//!
//! ```
//! use rscheme::Interpreter;
//!
//! let mut interp = Interpreter::new();
//! let value = interp.eval_str("(define (sq x) (* x x)) (sq 7)").unwrap();
//! assert_eq!(value.to_string(), "49");
//! ```

use crate::ast::{Arity, Value};
use crate::evaluator::{self, Env, create_global_env};
use crate::{Error, MAX_EVAL_DEPTH, ParseConfig};
#[cfg(feature = "scheme")]
use std::path::Path;

/// Settings for an [`Interpreter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpreterConfig {
    /// Nested evaluations allowed before a form fails
    pub max_eval_depth: usize,
    pub parse: ParseConfig,
    /// Print each top-level result of a loaded file
    pub echo_results: bool,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        InterpreterConfig {
            max_eval_depth: MAX_EVAL_DEPTH,
            parse: ParseConfig::default(),
            echo_results: false,
        }
    }
}

pub struct Interpreter {
    env: Env,
    config: InterpreterConfig,
    fault: Option<Error>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    /// A context with the primitive library bound in a fresh global frame
    pub fn new() -> Self {
        Self::with_config(InterpreterConfig::default())
    }

    pub fn with_config(config: InterpreterConfig) -> Self {
        Interpreter {
            env: create_global_env(),
            config,
            fault: None,
        }
    }

    pub fn global_env(&self) -> &Env {
        &self.env
    }

    pub fn config(&self) -> &InterpreterConfig {
        &self.config
    }

    /// Evaluate `expr` in the global environment, recording a failure in the
    /// fault slot unless one is already pending.
    pub fn eval(&mut self, expr: &Value) -> Result<Value, Error> {
        evaluator::eval_with_limit(expr, &self.env, self.config.max_eval_depth)
            .inspect_err(|e| self.record_fault(e))
    }

    fn record_fault(&mut self, error: &Error) {
        if self.fault.is_none() {
            self.fault = Some(error.clone());
        }
    }

    pub fn fault(&self) -> Option<&Error> {
        self.fault.as_ref()
    }

    pub fn has_fault(&self) -> bool {
        self.fault.is_some()
    }

    pub fn clear_fault(&mut self) {
        self.fault = None;
    }

    pub fn take_fault(&mut self) -> Option<Error> {
        self.fault.take()
    }

    /// Read and evaluate every form in `input`. Stops at the first failing
    /// form; returns the value of the last form, or Nil for empty input.
    #[cfg(feature = "scheme")]
    pub fn eval_str(&mut self, input: &str) -> Result<Value, Error> {
        let forms = crate::scheme::parse_program_with_config(input, self.config.parse)
            .inspect_err(|e| self.record_fault(e))?;
        self.run_forms(&forms, false)
    }

    /// Read and evaluate a source file, with the same per-form fault
    /// handling as [`Interpreter::eval_str`].
    #[cfg(feature = "scheme")]
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<Value, Error> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => Error::FileNotFound(path.display().to_string()),
                _ => Error::RuntimeError(format!("cannot read {}: {e}", path.display())),
            })
            .inspect_err(|e| self.record_fault(e))?;

        let forms = crate::scheme::parse_program_with_config(&source, self.config.parse)
            .inspect_err(|e| self.record_fault(e))?;
        tracing::debug!(path = %path.display(), forms = forms.len(), "loading file");
        self.run_forms(&forms, self.config.echo_results)
    }

    #[cfg(feature = "scheme")]
    fn run_forms(&mut self, forms: &[Value], echo: bool) -> Result<Value, Error> {
        let mut last = Value::nil();
        for form in forms {
            self.clear_fault();
            tracing::debug!(%form, "evaluating top-level form");
            last = self.eval(form)?;
            if echo && !last.is_nil() {
                println!("{last}");
            }
        }
        Ok(last)
    }

    /// Bind `name` in the global environment
    pub fn define(&self, name: &str, value: Value) {
        self.env.define(name, value);
    }

    /// Bind a native procedure in the global environment
    pub fn register_primitive<F>(&self, name: &str, arity: Arity, func: F)
    where
        F: Fn(&[Value], &Env) -> Result<Value, Error> + 'static,
    {
        self.env.define(name, Value::primitive(name, arity, func));
    }
}
