//! Per-block register allocation by next-use.
//!
//! [`RegAlloc`] maintains the register descriptor (which variable each pool
//! register currently holds) and the address descriptor (where each
//! variable's current value can be found: register, memory home, or both).
//! Resolving an operand guarantees a register with an up-to-date copy,
//! emitting loads and spill stores as a side effect.  All state is scoped
//! to one basic block; [`RegAlloc::flush_block`] writes live values back to
//! memory and clears both descriptors at every block boundary.

use super::abi::Register;
use super::instruction::{emit_c, AnnotatedInstr, Home, MachInstr, Src};
use super::CodegenError;
use crate::ir::{Addr, AddrKind, Function};
use std::collections::HashMap;

const POOL: usize = Register::POOL.len();

// ============================================================================
// Spill-victim policy
// ============================================================================

/// How to pick a register to evict when the pool is full.
///
/// `Fixed` reproduces the classic single low-priority victim (the last pool
/// register); `Lru` evicts the least recently touched one.  The choice is a
/// single decision point and nothing else in the allocator changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpillPolicy {
    #[default]
    Fixed,
    Lru,
}

// ============================================================================
// Frame layout
// ============================================================================

/// Per-function memory layout: every parameter, local, and temporary gets a
/// home slot; anything else addressed by name is a global cell.
#[derive(Debug, Clone)]
pub struct Frame {
    homes: HashMap<String, Home>,
    /// Bytes to reserve below `%ebp` for locals and temporaries.
    pub size: u32,
}

impl Frame {
    /// Lay out a function's frame.
    ///
    /// Parameters sit above the saved `%ebp` at `8(%ebp)`, `12(%ebp)`, …;
    /// locals then temporaries below it at `-4(%ebp)`, `-8(%ebp)`, ….
    /// A name registered twice in the same scope is an internal compiler
    /// error: the backend cannot produce a unique mapping.
    pub fn build(func: &Function) -> Result<Frame, CodegenError> {
        let mut homes = HashMap::new();
        let mut register = |name: &str, home: Home| -> Result<(), CodegenError> {
            if homes.insert(name.to_string(), home).is_some() {
                return Err(CodegenError::DuplicateVar {
                    func: func.name.clone(),
                    name: name.to_string(),
                });
            }
            Ok(())
        };

        for (i, p) in func.params.iter().enumerate() {
            register(p, Home::Frame(8 + 4 * i as i32))?;
        }
        let mut slot = 0i32;
        for name in func.locals.iter().chain(func.temps.iter()) {
            slot += 4;
            register(name, Home::Frame(-slot))?;
        }

        Ok(Frame {
            homes,
            size: slot as u32,
        })
    }

    /// The home location of a variable; unregistered names are globals.
    pub fn home_of(&self, name: &str) -> Home {
        self.homes
            .get(name)
            .cloned()
            .unwrap_or_else(|| Home::Global(name.to_string()))
    }
}

// ============================================================================
// Descriptors
// ============================================================================

/// Address-descriptor entry: the locations holding a variable's current value.
#[derive(Debug, Clone)]
struct VarLoc {
    /// Pool index of the register copy, if any.
    reg: Option<usize>,
    /// Whether the memory home also holds the current value.
    in_memory: bool,
    /// Whether the value must survive the block (locals/params/globals).
    write_back: bool,
}

/// The per-block register allocator.
pub struct RegAlloc {
    policy: SpillPolicy,
    frame: Frame,
    /// Register descriptor: current occupant of each pool register.
    held: [Option<String>; POOL],
    /// Address descriptor.
    vars: HashMap<String, VarLoc>,
    /// Registers pinned for the instruction currently being emitted.
    pinned: [bool; POOL],
    /// LRU clock.
    clock: u64,
    last_touch: [u64; POOL],
}

impl RegAlloc {
    pub fn new(frame: Frame, policy: SpillPolicy) -> Self {
        RegAlloc {
            policy,
            frame,
            held: Default::default(),
            vars: HashMap::new(),
            pinned: [false; POOL],
            clock: 0,
            last_touch: [0; POOL],
        }
    }

    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Reset both descriptors at a block boundary.  Nothing is stored;
    /// callers wanting correctness across the boundary use
    /// [`RegAlloc::flush_block`].
    pub fn begin_block(&mut self) {
        self.held = Default::default();
        self.vars.clear();
        self.pinned = [false; POOL];
    }

    /// Release the per-instruction pins.  Called after every emitted
    /// instruction so operand registers become evictable again.
    pub fn clear_pins(&mut self) {
        self.pinned = [false; POOL];
    }

    fn touch(&mut self, idx: usize) {
        self.clock += 1;
        self.last_touch[idx] = self.clock;
    }

    fn claim(&mut self, idx: usize) -> Register {
        self.pinned[idx] = true;
        self.touch(idx);
        Register::POOL[idx]
    }

    // ── Operand resolution ──────────────────────────────────────────────

    /// Resolve an operand to a `Src`: constants and string refs stay
    /// immediate, variables are brought into a register.
    pub fn ensure_src(&mut self, addr: &Addr, out: &mut Vec<AnnotatedInstr>) -> Src {
        match &addr.kind {
            AddrKind::Number(n) => Src::Imm(*n),
            AddrKind::StringRef(label) => Src::Label(label.clone()),
            _ => Src::Reg(self.ensure_reg(addr, out)),
        }
    }

    /// Resolve an operand all the way into a register, materializing
    /// constants into a scratch pool register when needed.
    pub fn ensure_reg(&mut self, addr: &Addr, out: &mut Vec<AnnotatedInstr>) -> Register {
        match &addr.kind {
            AddrKind::Number(n) => {
                let n = *n;
                let idx = self.free_or_victim(out);
                let reg = self.claim(idx);
                out.push((
                    MachInstr::Mov {
                        src: Src::Imm(n),
                        dst: reg,
                    },
                    None,
                ));
                reg
            }
            AddrKind::StringRef(label) => {
                let label = label.clone();
                let idx = self.free_or_victim(out);
                let reg = self.claim(idx);
                emit_c(
                    out,
                    MachInstr::Mov {
                        src: Src::Label(label.clone()),
                        dst: reg,
                    },
                    format!("&{label}"),
                );
                reg
            }
            _ => self.resolve(addr, out),
        }
    }

    /// Core decision procedure for a variable operand: an existing
    /// register copy wins; otherwise an empty register is claimed and the
    /// value loaded; otherwise a victim is spilled first.
    fn resolve(&mut self, addr: &Addr, out: &mut Vec<AnnotatedInstr>) -> Register {
        let name = match addr.var_name() {
            Some(n) => n.to_string(),
            None => unreachable!("resolve() called on a non-variable operand"),
        };

        if let Some(loc) = self.vars.get(&name) {
            if let Some(idx) = loc.reg {
                return self.claim(idx);
            }
        }

        let idx = self.free_or_victim(out);
        let reg = Register::POOL[idx];
        let spilled_before = self.vars.contains_key(&name);
        emit_c(
            out,
            MachInstr::Load {
                home: self.frame.home_of(&name),
                dst: reg,
            },
            format!("{} {name}", if spilled_before { "reload" } else { "load" }),
        );
        self.held[idx] = Some(name.clone());
        self.vars.insert(
            name,
            VarLoc {
                reg: Some(idx),
                in_memory: true,
                write_back: addr.live_out,
            },
        );
        self.claim(idx)
    }

    /// Pick a register for a definition target.  Uses the same
    /// register-choice procedure as [`RegAlloc::ensure_reg`] but never
    /// loads the stale value.  The binding is recorded by
    /// [`RegAlloc::bind_def`] once the defining instruction has emitted.
    pub fn prepare_def(&mut self, name: &str, out: &mut Vec<AnnotatedInstr>) -> Register {
        if let Some(loc) = self.vars.get(name) {
            if let Some(idx) = loc.reg {
                return self.claim(idx);
            }
        }
        let idx = self.free_or_victim(out);
        self.claim(idx)
    }

    /// Record that `reg` now holds the freshly computed value of `name`.
    /// The address descriptor is replaced to point only at the register;
    /// any memory copy is now stale.
    pub fn bind_def(&mut self, name: &str, reg: Register, live_out: bool) {
        let idx = match reg.pool_index() {
            Some(i) => i,
            None => unreachable!("definition bound to non-pool register {reg}"),
        };
        // Clear the variable's previous register association, if different.
        if let Some(loc) = self.vars.get(name) {
            if let Some(old) = loc.reg {
                if old != idx {
                    self.held[old] = None;
                }
            }
        }
        // Clear the register's previous occupant (already spilled or dead).
        if let Some(prev) = self.held[idx].take() {
            if prev != name {
                if let Some(loc) = self.vars.get_mut(&prev) {
                    loc.reg = None;
                }
            }
        }
        self.held[idx] = Some(name.to_string());
        self.vars.insert(
            name.to_string(),
            VarLoc {
                reg: Some(idx),
                in_memory: false,
                write_back: live_out,
            },
        );
    }

    /// Record a write-through definition: the memory home holds the only
    /// current copy (plain `Set` to a memory-resident destination).
    pub fn set_in_memory(&mut self, name: &str, live_out: bool) {
        if let Some(loc) = self.vars.get(name) {
            if let Some(idx) = loc.reg {
                self.held[idx] = None;
            }
        }
        self.vars.insert(
            name.to_string(),
            VarLoc {
                reg: None,
                in_memory: true,
                write_back: live_out,
            },
        );
    }

    // ── Eviction ────────────────────────────────────────────────────────

    fn free_or_victim(&mut self, out: &mut Vec<AnnotatedInstr>) -> usize {
        for idx in 0..POOL {
            if self.held[idx].is_none() && !self.pinned[idx] {
                return idx;
            }
        }
        let victim = self.victim();
        self.spill(victim, out);
        victim
    }

    /// The single policy decision point.
    fn victim(&self) -> usize {
        match self.policy {
            SpillPolicy::Fixed => match (0..POOL).rev().find(|&i| !self.pinned[i]) {
                Some(idx) => idx,
                None => unreachable!("all pool registers pinned"),
            },
            SpillPolicy::Lru => match (0..POOL)
                .filter(|&i| !self.pinned[i])
                .min_by_key(|&i| self.last_touch[i])
            {
                Some(idx) => idx,
                None => unreachable!("all pool registers pinned"),
            },
        }
    }

    /// Evict the occupant of a pool register, storing it back to memory
    /// first if the register holds the sole up-to-date copy.
    pub fn spill(&mut self, idx: usize, out: &mut Vec<AnnotatedInstr>) {
        if let Some(name) = self.held[idx].take() {
            if let Some(loc) = self.vars.get_mut(&name) {
                loc.reg = None;
                if !loc.in_memory {
                    emit_c(
                        out,
                        MachInstr::Store {
                            src: Src::Reg(Register::POOL[idx]),
                            home: self.frame.home_of(&name),
                        },
                        format!("spill {name}"),
                    );
                    loc.in_memory = true;
                }
            }
        }
    }

    /// Drop a dead variable from both descriptors without any store.
    pub fn discard(&mut self, name: &str) {
        if let Some(loc) = self.vars.remove(name) {
            if let Some(idx) = loc.reg {
                self.held[idx] = None;
            }
        }
    }

    /// Store every live register-resident value back to its memory home
    /// and clear both descriptors.  Called at every block boundary and
    /// before anything that clobbers the pool (calls, returns).
    pub fn flush_block(&mut self, out: &mut Vec<AnnotatedInstr>) {
        for idx in 0..POOL {
            if let Some(name) = self.held[idx].clone() {
                if let Some(loc) = self.vars.get(&name) {
                    if !loc.in_memory && loc.write_back {
                        emit_c(
                            out,
                            MachInstr::Store {
                                src: Src::Reg(Register::POOL[idx]),
                                home: self.frame.home_of(&name),
                            },
                            format!("writeback {name}"),
                        );
                    }
                }
            }
        }
        self.begin_block();
    }

    // ── Introspection (used by tests and diagnostics) ───────────────────

    /// The current occupant of a pool register.
    pub fn holder(&self, reg: Register) -> Option<&str> {
        reg.pool_index()
            .and_then(|idx| self.held[idx].as_deref())
    }

    /// The register currently holding a variable, if any.
    pub fn reg_of(&self, name: &str) -> Option<Register> {
        self.vars
            .get(name)
            .and_then(|loc| loc.reg)
            .map(|idx| Register::POOL[idx])
    }

    /// Whether the variable's memory home holds its current value.
    pub fn memory_current(&self, name: &str) -> bool {
        self.vars.get(name).map(|loc| loc.in_memory).unwrap_or(true)
    }
}
