//! Normalizes implementation text into a [`Callable`]. Nothing is
//! executed here.

use std::sync::Arc;

use crate::error::CompileError;
use crate::sandbox::ast::{contains_return, Expr, FunctionDef, Stmt};
use crate::sandbox::parser::{parse_expression, parse_function, parse_program};
use crate::sandbox::ParseError;

/// A compiled implementation, ready for the sandbox.
#[derive(Debug, Clone)]
pub struct Callable {
    shape: Shape,
}

#[derive(Debug, Clone)]
pub(crate) enum Shape {
    /// Function expression, called with `args` as its only argument.
    Function(Arc<FunctionDef>),
    /// Statements whose `return` gives the result.
    Block(Vec<Stmt>),
    /// Single expression whose value is the result.
    Expression(Expr),
}

impl Callable {
    pub(crate) fn shape(&self) -> &Shape {
        &self.shape
    }

    /// `function`, `block` or `expression`, for logs.
    pub fn kind(&self) -> &'static str {
        match self.shape {
            Shape::Function(_) => "function",
            Shape::Block(_) => "block",
            Shape::Expression(_) => "expression",
        }
    }
}

pub struct ImplementationCompiler;

impl ImplementationCompiler {
    /// Tries, in order: a function expression, a statement list containing
    /// `return`, a single expression.
    pub fn compile(source: &str) -> Result<Callable, CompileError> {
        let source = source.trim();
        if source.is_empty() {
            return Err(CompileError::new("implementation is empty"));
        }

        if let Ok(def) = parse_function(source) {
            return Ok(Callable {
                shape: Shape::Function(def),
            });
        }

        let program = parse_program(source);
        if matches!(&program, Ok(stmts) if contains_return(stmts)) {
            return Ok(Callable {
                shape: Shape::Block(program.unwrap_or_default()),
            });
        }

        match parse_expression(source) {
            Ok(expr) => Ok(Callable {
                shape: Shape::Expression(expr),
            }),
            Err(expr_err) => match program {
                Ok(_) => Err(CompileError::new(
                    "statements without a return statement; add `return` or use a single expression",
                )),
                // report whichever parse got further into the text
                Err(program_err) if program_err.offset > expr_err.offset => {
                    Err(describe(source, &program_err))
                }
                Err(_) => Err(describe(source, &expr_err)),
            },
        }
    }
}

fn describe(source: &str, err: &ParseError) -> CompileError {
    let (line, col) = err.position(source);
    CompileError::new(format!("line {line}, column {col}: {}", err.message))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(source: &str) -> &'static str {
        ImplementationCompiler::compile(source).unwrap().kind()
    }

    #[test]
    fn test_function_shapes() {
        assert_eq!(kind("(args) => args.x * 2"), "function");
        assert_eq!(kind("args => args.x"), "function");
        assert_eq!(kind("function (args) { return args.x; }"), "function");
        assert_eq!(kind("async function (args) { return 1; }"), "function");
        assert_eq!(kind("  \n async (a) => a  "), "function");
    }

    #[test]
    fn test_function_takes_precedence_over_return() {
        // the body has a return, the whole text is still a function
        assert_eq!(kind("(args) => { return args.x; }"), "function");
    }

    #[test]
    fn test_block_shape() {
        assert_eq!(kind("return args.x + 1;"), "block");
        assert_eq!(kind("const y = 2;\nreturn y;"), "block");
        assert_eq!(kind("if (args.a) { return 1 } else { return 2 }"), "block");
        assert_eq!(kind("return { ok: true };"), "block");
    }

    #[test]
    fn test_expression_shape() {
        assert_eq!(kind("args.x + 1"), "expression");
        assert_eq!(kind("args.x + 1;"), "expression");
        // a return inside a nested function does not make a block
        assert_eq!(kind("[1, 2].map(x => { return x * 2; })"), "expression");
    }

    #[test]
    fn test_empty_source() {
        assert!(ImplementationCompiler::compile("").is_err());
        let err = ImplementationCompiler::compile("   \n\t").unwrap_err();
        assert_eq!(err.reason, "implementation is empty");
    }

    #[test]
    fn test_statements_without_return() {
        let err = ImplementationCompiler::compile("let x = 1; x++;").unwrap_err();
        assert!(err.reason.contains("without a return"));
    }

    #[test]
    fn test_syntax_error_has_position() {
        let err = ImplementationCompiler::compile("return (1 + ;").unwrap_err();
        assert!(err.reason.starts_with("line 1, column "), "{}", err.reason);

        let err = ImplementationCompiler::compile("const a = 1;\nreturn a +* 2;").unwrap_err();
        assert!(err.reason.starts_with("line 2, "), "{}", err.reason);
    }

    #[test]
    fn test_compile_does_not_execute() {
        // would fail at run time, compiles fine
        assert_eq!(kind("throw new Error('x'); return 1;"), "block");
        assert_eq!(kind("undefinedFunction()"), "expression");
    }
}
