//! Next-use liveness annotation for one basic block.
//!
//! A single backward walk over the block writes, onto every variable
//! operand, the distance in instructions to its next read within the block
//! (`None` when there is none), plus a conservative live-beyond-block flag.
//! No cross-block dataflow is performed: locals, parameters, and globals
//! are always assumed live at block exit, compiler temporaries never are.
//! Pure annotation; cannot fail on a well-formed block.

use super::block::BasicBlock;
use crate::ir::{Addr, AddrKind, Instr};
use std::collections::HashMap;

/// Annotate every variable operand in `block` with its next-use distance.
pub fn annotate(code: &mut [Instr], block: &BasicBlock) {
    // Variable name -> absolute index of its next read, seen from the
    // position currently being processed.
    let mut next_read: HashMap<String, usize> = HashMap::new();

    for i in (block.start..=block.end).rev() {
        // Annotate all operands from the table as it stands for positions
        // strictly after i, before recording position i itself.
        if let Some(def) = code[i].def_mut() {
            mark(def, &next_read, i);
        }
        for used in code[i].uses_mut() {
            mark(used, &next_read, i);
        }

        // A definition kills the variable for earlier positions.
        let killed = code[i].def_mut().and_then(|d| d.var_name().map(String::from));
        if let Some(name) = killed {
            next_read.remove(&name);
        }

        // Reads at position i become the nearest upcoming use for
        // everything before it.
        let read_here: Vec<String> = {
            let mut names = Vec::new();
            for used in code[i].uses_mut() {
                if let Some(name) = used.var_name() {
                    names.push(name.to_string());
                }
            }
            names
        };
        for name in read_here {
            next_read.insert(name, i);
        }
    }
}

/// Write the annotations for one operand occurrence at position `i`.
fn mark(addr: &mut Addr, next_read: &HashMap<String, usize>, i: usize) {
    match &addr.kind {
        AddrKind::Temp(name) => {
            addr.next_use = next_read.get(name).map(|&j| (j - i) as u32);
            addr.live_out = false;
        }
        AddrKind::Local(name) | AddrKind::Global(name) => {
            addr.next_use = next_read.get(name).map(|&j| (j - i) as u32);
            addr.live_out = true;
        }
        // Numbers, labels, and string refs carry no liveness.
        _ => {
            addr.next_use = None;
            addr.live_out = false;
        }
    }
}
