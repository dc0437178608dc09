//! Basic-block discovery over a function's flat instruction list.
//!
//! Blocks are produced lazily, one at a time, as `(start, end)` index
//! ranges into the borrowed instruction slice; they never own or copy
//! instructions.  Every instruction belongs to exactly one block, blocks
//! are contiguous, and concatenating them in order reproduces the
//! function's instruction sequence.

use crate::ir::Instr;

/// A contiguous instruction range `[start, end]` (both inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BasicBlock {
    pub start: usize,
    pub end: usize,
}

impl BasicBlock {
    /// Number of instructions in the block (always at least one).
    pub fn instr_count(&self) -> usize {
        self.end - self.start + 1
    }
}

/// How an instruction participates in block boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrClass {
    /// Labels begin a new block.
    BlockStart,
    /// Jumps and branches end the current block (and belong to it).
    BlockEnd,
    /// Everything else.
    Plain,
}

pub fn classify(instr: &Instr) -> InstrClass {
    match instr {
        Instr::Label(_) => InstrClass::BlockStart,
        Instr::Goto(_) | Instr::If { .. } | Instr::IfFalse { .. } => InstrClass::BlockEnd,
        _ => InstrClass::Plain,
    }
}

/// Lazy iterator over a function's basic blocks, in program order.
pub struct BlockIter<'a> {
    code: &'a [Instr],
    cursor: usize,
}

/// Iterate the basic blocks of an instruction list.
pub fn blocks(code: &[Instr]) -> BlockIter<'_> {
    BlockIter { code, cursor: 0 }
}

impl Iterator for BlockIter<'_> {
    type Item = BasicBlock;

    fn next(&mut self) -> Option<BasicBlock> {
        if self.cursor >= self.code.len() {
            return None;
        }

        let start = self.cursor;
        let mut i = start;

        // A leading label is consumed as part of this block.
        if classify(&self.code[i]) == InstrClass::BlockStart {
            i += 1;
        }

        while i < self.code.len() {
            match classify(&self.code[i]) {
                // The jump ends the block and belongs to it.
                InstrClass::BlockEnd => {
                    self.cursor = i + 1;
                    return Some(BasicBlock { start, end: i });
                }
                // A new label means implicit fallthrough: the block ends
                // one instruction earlier, the label starts the next one.
                InstrClass::BlockStart => {
                    self.cursor = i;
                    return Some(BasicBlock { start, end: i - 1 });
                }
                InstrClass::Plain => i += 1,
            }
        }

        // End of the list ends the final block.
        self.cursor = self.code.len();
        Some(BasicBlock {
            start,
            end: self.code.len() - 1,
        })
    }
}
