use std::fmt;

/// The six x86-32 registers the backend works with.
///
/// Only the [`Register::POOL`] registers are multiplexed by the allocator;
/// the rest are reserved for fixed roles (see the associated constants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    Eax,
    Ebx,
    Ecx,
    Edx,
    Esi,
    Edi,
}

impl Register {
    /// General-purpose pool managed by the register/address descriptors.
    pub const POOL: [Register; 3] = [Register::Ebx, Register::Esi, Register::Edi];

    /// Return value, binary-op scratch, and division quotient.
    pub const RETURN: Register = Register::Eax;

    /// Byte-store shuttle (the only reserved register with a byte
    /// sub-register free of other duties).
    pub const BYTE_SHUTTLE: Register = Register::Ecx;

    /// Clobbered by `cdq`/`idivl` (sign extension and remainder).
    pub const DIV_REMAINDER: Register = Register::Edx;

    /// Index of this register within [`Register::POOL`], if it is pooled.
    pub fn pool_index(self) -> Option<usize> {
        Register::POOL.iter().position(|&r| r == self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Register::Eax => "%eax",
            Register::Ebx => "%ebx",
            Register::Ecx => "%ecx",
            Register::Edx => "%edx",
            Register::Esi => "%esi",
            Register::Edi => "%edi",
        }
    }

    /// Low byte sub-register name.
    ///
    /// `%esi`/`%edi` have none in 32-bit mode; byte stores are routed through
    /// [`Register::BYTE_SHUTTLE`] by the emitter, so reaching this with a
    /// sub-register-less operand is a backend bug.
    pub fn byte_name(self) -> &'static str {
        match self {
            Register::Eax => "%al",
            Register::Ebx => "%bl",
            Register::Ecx => "%cl",
            Register::Edx => "%dl",
            Register::Esi | Register::Edi => {
                unreachable!("register {} has no byte sub-register", self.as_str())
            }
        }
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
