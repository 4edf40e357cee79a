// Compiler: Lua source -> optimized function prototype.

pub mod ast;
mod codegen;
pub mod lexer;
mod parser;

pub use codegen::CodeGen;
pub use parser::Parser;

use crate::lua_value::Chunk;
use crate::lua_vm::{LuaError, LuaResult};
use crate::optimizer::{OptLevel, Optimizer};

pub struct Compiler;

impl Compiler {
    /// Compile with the default optimization level.
    pub fn compile(source: &str, chunk_name: &str) -> LuaResult<Chunk> {
        Self::compile_with_level(source, chunk_name, OptLevel::Standard)
    }

    pub fn compile_with_level(
        source: &str,
        chunk_name: &str,
        level: OptLevel,
    ) -> LuaResult<Chunk> {
        let program = Parser::new(source, chunk_name).parse();
        if !program.is_ok() {
            return Err(aggregate_errors(program.errors));
        }
        let chunk = CodeGen::generate(&program, chunk_name)?;
        let mut optimizer = Optimizer::new(level);
        Ok(optimizer.optimize(chunk))
    }

    /// Parse only; always yields a Program, with errors recorded on it.
    pub fn parse(source: &str, chunk_name: &str) -> ast::Program {
        Parser::new(source, chunk_name).parse()
    }
}

/// Collapse a batch of recorded syntax errors into one reportable error,
/// keeping the first one's location.
fn aggregate_errors(errors: Vec<LuaError>) -> LuaError {
    debug_assert!(!errors.is_empty());
    if errors.len() == 1 {
        return errors.into_iter().next().unwrap();
    }
    let location = errors[0].location.clone();
    let message = errors
        .iter()
        .map(|e| match &e.location {
            Some(loc) => format!("{}: {}", loc, e.message),
            None => e.message.clone(),
        })
        .collect::<Vec<_>>()
        .join("\n");
    let mut combined = LuaError::new(crate::lua_vm::ErrorKind::Syntax, message);
    combined.location = location;
    combined
}
