//! x86 backend — lowers three-address IR to 32-bit AT&T assembly.
//!
//! Module layout:
//! - `abi`         — register definitions and calling-convention constants
//! - `instruction` — typed machine instructions and assembly output items
//! - `block`       — basic-block discovery over flat instruction lists
//! - `liveness`    — per-block next-use annotation
//! - `regalloc`    — frame layout and descriptor-based register allocation
//! - `codegen`     — code generation driver (IR → assembly)

pub mod abi;
pub mod block;
pub mod instruction;
pub mod liveness;
pub mod regalloc;
mod codegen;

// Re-export the public API at `backend::` level.
pub use codegen::{Asm, Codegen};
pub use regalloc::SpillPolicy;

use crate::ir::Program;
use thiserror::Error;

/// Fatal conditions detected while lowering a program.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The same name was registered twice in one function's frame.
    #[error("function `{func}`: variable `{name}` declared twice")]
    DuplicateVar { func: String, name: String },

    /// An instruction's shape rules out lowering it (a non-variable
    /// definition target, or a call through a non-label operand).
    #[error("function `{func}`: malformed instruction `{instr}`")]
    MalformedInstr { func: String, instr: String },
}

/// Compile a program to x86 assembly text with the default spill policy.
pub fn compile_program_text(program: &mut Program) -> Result<String, CodegenError> {
    Ok(compile_program(program, SpillPolicy::default())?.join())
}

/// Compile a program to x86 assembly with a specific spill policy.
pub fn compile_program(
    program: &mut Program,
    policy: SpillPolicy,
) -> Result<Asm, CodegenError> {
    let mut cg = Codegen::new(policy);
    cg.emit_program(program)?;
    Ok(cg.finish())
}
