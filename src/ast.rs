//! Components relating to the instructions executed by the kernel.
//!
//! This module holds:
//! - [`Reg`], an index into a process's register file,
//! - and [`instr`], the bytecode instruction descriptor and its codec.

pub mod instr;

use std::num::TryFromIntError;

/// A register. Must be between 0 and 7.
///
/// This `Reg` struct can either be constructed by selecting a register from [`reg_consts`],
/// or by using [`Reg::try_from`].
///
/// Register 7 is the instruction pointer. Registers 5 and 6 are only special by
/// convention (scratch and stack pointer), and register 0 holds the syscall selector
/// when a syscall executes and its primary result when it returns.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Reg(pub(crate) u8);

/// Register constants!
pub mod reg_consts {
    use super::Reg;

    /// The 0th register in the register file (syscall selector/result).
    pub const R0: Reg = Reg(0);
    /// The 1st register in the register file.
    pub const R1: Reg = Reg(1);
    /// The 2nd register in the register file.
    pub const R2: Reg = Reg(2);
    /// The 3rd register in the register file.
    pub const R3: Reg = Reg(3);
    /// The 4th register in the register file.
    pub const R4: Reg = Reg(4);
    /// The 5th register in the register file.
    pub const R5: Reg = Reg(5);
    /// The 6th register in the register file (stack pointer by convention).
    pub const R6: Reg = Reg(6);
    /// The 7th register in the register file (the instruction pointer).
    pub const R7: Reg = Reg(7);
    /// Alias for [`R7`].
    pub const IP: Reg = R7;
}
impl Reg {
    /// Gets the register number of this [`Reg`]. This is always between 0 and 7.
    pub fn reg_no(self) -> u8 {
        self.0
    }

    /// Creates a register from the 3 least-significant bits of the given value.
    pub(crate) fn from_bits(bits: u16) -> Self {
        Reg((bits & 0b111) as u8)
    }
}
impl std::fmt::Display for Reg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "r{}", self.0)
    }
}
impl From<Reg> for usize {
    // Used for indexing the reg file.
    fn from(value: Reg) -> Self {
        usize::from(value.0)
    }
}
impl TryFrom<u8> for Reg {
    type Error = TryFromIntError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0..=7 => Ok(Reg(value)),
            // there's no public constructor for this error
            _     => u8::try_from(256u16).map(|_| unreachable!("should've been TryFromIntError")),
        }
    }
}
