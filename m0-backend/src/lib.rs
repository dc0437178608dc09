pub mod backend;
pub mod ir;

use thiserror::Error;

pub use backend::{CodegenError, SpillPolicy};
pub use ir::reader::ReadError;

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("IR read error: {0}")]
    Read(#[from] ReadError),

    #[error("Codegen error: {0}")]
    Codegen(#[from] CodegenError),
}

/// Compile an already-parsed program to x86 assembly text.
pub fn compile_ir(
    program: &mut ir::Program,
    policy: SpillPolicy,
) -> Result<String, CompileError> {
    Ok(backend::compile_program(program, policy)?.join())
}

/// Parse a textual IR dump and compile it to x86 assembly text.
pub fn compile_ir_text(source: &str, policy: SpillPolicy) -> Result<String, CompileError> {
    let mut program = ir::reader::parse(source)?;
    compile_ir(&mut program, policy)
}
