//! Execution sandbox for procedure implementations.
//!
//! Snippets are evaluated by an embedded interpreter over a small
//! JavaScript-like language. The only binding a snippet receives from the
//! host is `args`, a deep copy of the invocation arguments; built-ins are
//! pure functions over sandbox values. There is no filesystem, network,
//! clock or environment access to take away.
//!
//! The security model is layered:
//!
//! 1. Closed grammar: only the parser's constructs exist
//! 2. Fresh global scope per run, holding built-ins and `args`
//! 3. Step budget and call-depth limit, not catchable by the script
//! 4. Dedicated thread with a large stack; a panic is reported, not propagated

pub mod ast;
mod interpreter;
mod intrinsics;
mod lexer;
pub mod parser;
mod value;

use tracing::debug;

use crate::compiler::Callable;
use crate::config::SandboxConfig;
use crate::error::RuntimeError;
use crate::procedure::Args;
use interpreter::{Fault, Interpreter};
pub use parser::ParseError;
use value::Value;

/// Stack for the evaluation thread. Interpreter recursion follows the
/// nesting of the snippet.
const SANDBOX_STACK_SIZE: usize = 64 * 1024 * 1024;

pub struct SandboxExecutor {
    config: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runs `callable` with `args` as its only input.
    ///
    /// Every failure, including budget exhaustion and interpreter panics,
    /// comes back as a [`RuntimeError`].
    pub fn run(&self, callable: &Callable, args: &Args) -> Result<serde_json::Value, RuntimeError> {
        let outcome = std::thread::scope(|scope| {
            std::thread::Builder::new()
                .name("sandbox".to_string())
                .stack_size(SANDBOX_STACK_SIZE)
                .spawn_scoped(scope, || evaluate(&self.config, callable, args))
                .map(|handle| handle.join())
        });
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RuntimeError::new("evaluation aborted unexpectedly")),
            Err(e) => Err(RuntimeError::new(format!(
                "failed to start sandbox thread: {e}"
            ))),
        }
    }
}

fn evaluate(
    config: &SandboxConfig,
    callable: &Callable,
    args: &Args,
) -> Result<serde_json::Value, RuntimeError> {
    let mut interpreter = Interpreter::new(config);
    let outcome = interpreter.run(callable, args);
    debug!(steps = interpreter.steps(), "evaluation finished");
    match outcome {
        Ok(value) => value.to_json().map_err(RuntimeError::new),
        Err(Fault::Halt(reason)) => Err(RuntimeError::new(reason)),
        Err(Fault::Throw(thrown)) => Err(RuntimeError::new(thrown_message(&thrown))),
    }
}

/// `message` of a thrown error object, or the thrown value as text.
fn thrown_message(thrown: &Value) -> String {
    if let Value::Object(entries) = thrown {
        if let Some(message) = entries.borrow().get("message") {
            return message.to_display();
        }
    }
    thrown.to_display()
}
