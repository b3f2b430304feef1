//! Error taxonomy shared by the store, the validator, the compiler and
//! the sandbox.
//!
//! Every failure is returned as a value. The console maps each variant
//! to a stable `kind` token through [`Error::kind`].

use thiserror::Error;

use crate::procedure::ParamType;
use crate::schema::ValueTag;

/// Rejected input: a missing record field, a missing argument, or an
/// argument whose dynamic type does not match its declaration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("missing required parameter: {0}")]
    MissingRequiredParam(String),

    #[error("parameter {name} must be {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        actual: ValueTag,
    },

    /// Two params of one procedure share a name.
    #[error("duplicate parameter name: {0}")]
    DuplicateParam(String),
}

/// The implementation text could not be turned into a callable.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct CompileError {
    pub reason: String,
}

impl CompileError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Evaluation of a callable failed inside the sandbox.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct RuntimeError {
    pub message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("procedure not found: {0}")]
    NotFound(String),

    #[error("compile error: {0}")]
    Compile(#[from] CompileError),

    #[error("execution error: {0}")]
    Runtime(#[from] RuntimeError),
}

impl Error {
    /// Stable token for the boundary layer (`validation`, `not_found`,
    /// `compile`, `runtime`).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::NotFound(_) => "not_found",
            Error::Compile(_) => "compile",
            Error::Runtime(_) => "runtime",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
