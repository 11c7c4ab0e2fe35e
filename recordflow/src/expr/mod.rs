//! Sandboxed expression evaluator for user-authored transformation formulas.
//!
//! Expressions are lexed, parsed into an AST and interpreted against a
//! caller-supplied record with no access to ambient process state. Every
//! evaluation builds a fresh scope, runs under a deadline (default 5s) and
//! returns a structured [`EvalOutcome`]; lex, parse, runtime and timeout
//! failures never escape as panics or `Err` values past [`Evaluator::evaluate`].
//!
//! The input record is bound under the aliases `input`, `record`, `data` and
//! `value`, so `input.price * 1.1` and `record.price * 1.1` are equivalent.

mod eval;
mod functions;
mod parser;
mod token;

pub use eval::{EvalOutcome, Evaluator, DEFAULT_EVAL_TIMEOUT};
pub(crate) use eval::is_truthy;
pub use functions::{CustomFunction, FunctionRegistry};
pub use parser::{parse, BinaryOp, Expr, UnaryOp};
pub use token::{tokenize, Token};

use thiserror::Error;

/// Errors produced while evaluating an expression.
///
/// These are carried inside [`EvalOutcome`] rather than returned from the
/// evaluator's public entry points.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    /// The expression text could not be tokenized or parsed.
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// A root identifier is not bound in the evaluation scope.
    #[error("Undefined identifier '{0}'")]
    UndefinedIdentifier(String),

    /// A called function is not in the registry.
    #[error("Unknown function '{0}'")]
    UnknownFunction(String),

    /// A library function rejected its arguments.
    #[error("Function '{name}': {message}")]
    Function {
        /// The function that failed.
        name: String,
        /// Why it failed.
        message: String,
    },

    /// An operator was applied to incompatible operand types.
    #[error("Type error: {0}")]
    Type(String),

    /// The evaluation exceeded its time budget.
    #[error("Evaluation timed out after {elapsed_ms}ms")]
    Timeout {
        /// Elapsed wall-clock time when the deadline was hit.
        elapsed_ms: u64,
    },
}
