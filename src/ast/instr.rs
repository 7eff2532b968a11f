//! The bytecode instruction set.
//!
//! Instructions are 1, 2, or 3 bytes long. The top bits of the first byte select the class:
//!
//! ```text
//! 0b00DDDSSS                      store byte:  mem[rD] = rS
//! 0b01DDDSSS                      load byte:   rD = mem[rS]
//! 0b10......                      (reserved)
//! 0b1100XXXX                      misc short:  0 = nop, 1 = syscall, 2 = clear instruction cache
//! 0b11010DDD VVVVVVVV             set8:        rD = V
//! 0b11011DDD VVVVVVVV VVVVVVVV    set16:       rD = V (big-endian)
//! 0b111OOOOD DDAAABBB             ALU:         op O, destination D, operands A and B
//! ```
//!
//! The length of an instruction can be computed from its first byte alone ([`instr_len`]),
//! which lets the fetch stage pull exactly as many bytes as it needs before decoding.

use std::borrow::Cow;

use super::Reg;

/// Misc-long first bytes that begin a 3-byte instruction (`first >> 3`).
const LONG_MISC_PATTERN: u8 = 0b11011;

/// Number of bytes in the instruction that starts with the given byte.
///
/// ```
/// use bytekernel::ast::instr::instr_len;
///
/// assert_eq!(instr_len(0x47), 1); // load byte
/// assert_eq!(instr_len(0xC1), 1); // syscall
/// assert_eq!(instr_len(0xD3), 2); // set8
/// assert_eq!(instr_len(0xE0), 2); // ALU
/// assert_eq!(instr_len(0xDF), 3); // set16
/// ```
pub fn instr_len(first: u8) -> usize {
    if first < 0xD0 {
        1
    } else if first >> 3 != LONG_MISC_PATTERN {
        2
    } else {
        3
    }
}

/// An increment or decrement step, between 1 and 64 (inclusive).
///
/// This is stored in the 6 low bits of an `Inc`/`Dec` instruction as `step - 1`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub struct Step(u8);
impl Step {
    /// The smallest step.
    pub const ONE: Step = Step(1);

    /// Creates a step, returning `None` if it is not in `1..=64`.
    pub fn new(n: u8) -> Option<Self> {
        (1..=64).contains(&n).then_some(Step(n))
    }
    /// Gets the value of the step.
    pub fn get(self) -> u8 {
        self.0
    }
}

/// Flags written by a [`AluInstr::Cmp`] instruction.
///
/// Each constant is the bit index of the flag inside the result register,
/// which is the same index a [`AluInstr::Skip`] instruction tests.
pub mod cmp_flags {
    /// `a == b`
    pub const EQ: u8 = 0;
    /// `a == 0`
    pub const EQ_ZERO: u8 = 1;
    /// `a != b`
    pub const NE: u8 = 2;
    /// `a != 0`
    pub const NE_ZERO: u8 = 3;
    /// `a < b`
    pub const LT: u8 = 4;
    /// `a <= b`
    pub const LE: u8 = 5;
    /// `a > b`
    pub const GT: u8 = 6;
    /// `a >= b`
    pub const GE: u8 = 7;

    /// Computes the (unsigned) comparison mask of two values.
    ///
    /// ```
    /// use bytekernel::ast::instr::cmp_flags::{self, compare};
    ///
    /// let mask = compare(3, 5);
    /// assert_ne!(mask & (1 << cmp_flags::LT), 0);
    /// assert_eq!(mask & (1 << cmp_flags::EQ), 0);
    /// ```
    pub fn compare(a: u16, b: u16) -> u16 {
        let flags = [
            (EQ, a == b),
            (EQ_ZERO, a == 0),
            (NE, a != b),
            (NE_ZERO, a != 0),
            (LT, a < b),
            (LE, a <= b),
            (GT, a > b),
            (GE, a >= b),
        ];

        flags.into_iter()
            .filter(|&(_, set)| set)
            .fold(0, |acc, (bit, _)| acc | (1 << bit))
    }
}

/// A memory instruction (1 byte).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MemInstr {
    /// Stores the low byte of `src` at the address in `addr`.
    StoreByte {
        #[allow(missing_docs)]
        addr: Reg,
        #[allow(missing_docs)]
        src: Reg
    },
    /// Loads the byte at the address in `addr` into `dst`.
    LoadByte {
        #[allow(missing_docs)]
        dst: Reg,
        #[allow(missing_docs)]
        addr: Reg
    },
}

/// An ALU instruction (2 bytes).
///
/// For three-operand variants, the order is `(dst, a, b)`.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum AluInstr {
    /// `dst = a + b`
    Add(Reg, Reg, Reg),
    /// `dst = a - b`
    Sub(Reg, Reg, Reg),
    /// `dst = a * b`
    Mul(Reg, Reg, Reg),
    /// `dst = a / b` (dividing by zero is fatal)
    Div(Reg, Reg, Reg),
    /// `dst = a ^ b`
    Xor(Reg, Reg, Reg),
    /// `dst = a | b`
    Or(Reg, Reg, Reg),
    /// `dst = a & b`
    And(Reg, Reg, Reg),
    /// `dst = !a`
    Not(Reg, Reg),
    /// `dst = compare(a, b)`; see [`cmp_flags`].
    Cmp(Reg, Reg, Reg),
    /// `dst = a << b`
    Shl(Reg, Reg, Reg),
    /// `dst = a >> b`
    Shr(Reg, Reg, Reg),
    /// Skips the next instruction if bit `.1` (0-7) of the register is set.
    Skip(Reg, u8),
    /// Stores the 16-bit value of `.1` at the address in `.0` (big-endian).
    Store16(Reg, Reg),
    /// Loads the 16-bit value at the address in `.1` into `.0` (big-endian).
    Load16(Reg, Reg),
    /// `dst += step`
    Inc(Reg, Step),
    /// `dst -= step`
    Dec(Reg, Step),
}

/// A miscellaneous instruction (1, 2, or 3 bytes).
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum MiscInstr {
    /// Does nothing.
    Nop,
    /// Calls into the kernel with `r0` as the selector.
    Syscall,
    /// Empties the instruction cache.
    ClearInstrCache,
    /// Loads an 8-bit immediate.
    Set8(Reg, u8),
    /// Loads a 16-bit immediate.
    Set16(Reg, u16),
}

/// A decoded bytecode instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Instr {
    #[allow(missing_docs)]
    Mem(MemInstr),
    #[allow(missing_docs)]
    Alu(AluInstr),
    #[allow(missing_docs)]
    Misc(MiscInstr),
}

/// Errors from decoding an instruction.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum DecodeErr {
    /// The memory instruction uses the reserved sub-op (`0b10`).
    ReservedMemOp(u8),
    /// The misc-short selector is not one of nop, syscall, or clear-instruction-cache.
    UnknownMisc(u8),
    /// Fewer bytes were provided than the first byte requires.
    Truncated,
}
impl std::fmt::Display for DecodeErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeErr::ReservedMemOp(b) => write!(f, "reserved memory operation (byte x{b:02X})"),
            DecodeErr::UnknownMisc(b)   => write!(f, "unknown misc operation (byte x{b:02X})"),
            DecodeErr::Truncated        => f.write_str("instruction is missing bytes"),
        }
    }
}
impl std::error::Error for DecodeErr {}
impl crate::err::Error for DecodeErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            DecodeErr::ReservedMemOp(_) => Some(Cow::from("bytes x80-xBF do not begin any instruction")),
            DecodeErr::UnknownMisc(_)   => Some(Cow::from("only xC0, xC1, and xC2 are defined misc-short instructions")),
            DecodeErr::Truncated        => None,
        }
    }
}

mod alu_op {
    pub const ADD: u16 = 0;
    pub const SUB: u16 = 1;
    pub const MUL: u16 = 2;
    pub const DIV: u16 = 3;
    pub const XOR: u16 = 4;
    pub const OR: u16 = 5;
    pub const AND: u16 = 6;
    pub const NOT: u16 = 7;
    pub const CMP: u16 = 8;
    pub const SHL: u16 = 9;
    pub const SHR: u16 = 10;
    pub const SKIP: u16 = 11;
    pub const STORE16: u16 = 12;
    pub const LOAD16: u16 = 13;
    pub const INC: u16 = 14;
    pub const DEC: u16 = 15;
}

impl Instr {
    /// Decodes the instruction at the start of `bytes`.
    ///
    /// Only the first [`instr_len`] bytes are read. This fails
    /// on the reserved memory sub-op and on unknown misc-short selectors;
    /// every other bit pattern decodes into some instruction.
    ///
    /// ```
    /// use bytekernel::ast::instr::{Instr, MiscInstr};
    /// use bytekernel::ast::reg_consts::R1;
    ///
    /// assert_eq!(Instr::decode(&[0xD1, 7]), Ok(Instr::Misc(MiscInstr::Set8(R1, 7))));
    /// assert!(Instr::decode(&[0x80]).is_err());
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeErr> {
        let &first = bytes.first().ok_or(DecodeErr::Truncated)?;
        let bytes = bytes.get(..instr_len(first)).ok_or(DecodeErr::Truncated)?;

        match first >> 6 {
            0b00 => Ok(Instr::Mem(MemInstr::StoreByte {
                addr: Reg::from_bits(u16::from(first >> 3)),
                src: Reg::from_bits(u16::from(first))
            })),
            0b01 => Ok(Instr::Mem(MemInstr::LoadByte {
                dst: Reg::from_bits(u16::from(first >> 3)),
                addr: Reg::from_bits(u16::from(first))
            })),
            0b10 => Err(DecodeErr::ReservedMemOp(first)),
            _ if first & 0b0010_0000 != 0 => {
                let word = u16::from_be_bytes([bytes[0], bytes[1]]);
                Ok(Instr::Alu(decode_alu(word)))
            },
            _ if first & 0b0001_0000 == 0 => match first & 0x0F {
                0 => Ok(Instr::Misc(MiscInstr::Nop)),
                1 => Ok(Instr::Misc(MiscInstr::Syscall)),
                2 => Ok(Instr::Misc(MiscInstr::ClearInstrCache)),
                _ => Err(DecodeErr::UnknownMisc(first)),
            },
            _ => {
                let dst = Reg::from_bits(u16::from(first));
                match first & 0b1000 != 0 {
                    false => Ok(Instr::Misc(MiscInstr::Set8(dst, bytes[1]))),
                    true  => Ok(Instr::Misc(MiscInstr::Set16(dst, u16::from_be_bytes([bytes[1], bytes[2]])))),
                }
            }
        }
    }

    /// Appends the byte encoding of this instruction to `out`.
    ///
    /// The skip bit of [`AluInstr::Skip`] is truncated to 3 bits.
    pub fn encode(&self, out: &mut Vec<u8>) {
        fn alu(op: u16, d: Reg, a: u16, b: u16) -> [u8; 2] {
            let word = 0xE000
                | (op << 9)
                | (u16::from(d.0) << 6)
                | ((a & 0b111) << 3)
                | (b & 0b111);
            word.to_be_bytes()
        }
        fn alu3(op: u16, d: Reg, a: Reg, b: Reg) -> [u8; 2] {
            alu(op, d, u16::from(a.0), u16::from(b.0))
        }
        fn step(op: u16, d: Reg, s: Step) -> [u8; 2] {
            let bits = u16::from(s.0 - 1);
            alu(op, d, bits >> 3, bits)
        }

        match *self {
            Instr::Mem(MemInstr::StoreByte { addr, src }) => out.push((addr.0 << 3) | src.0),
            Instr::Mem(MemInstr::LoadByte { dst, addr }) => out.push(0b0100_0000 | (dst.0 << 3) | addr.0),
            Instr::Alu(instr) => out.extend(match instr {
                AluInstr::Add(d, a, b) => alu3(alu_op::ADD, d, a, b),
                AluInstr::Sub(d, a, b) => alu3(alu_op::SUB, d, a, b),
                AluInstr::Mul(d, a, b) => alu3(alu_op::MUL, d, a, b),
                AluInstr::Div(d, a, b) => alu3(alu_op::DIV, d, a, b),
                AluInstr::Xor(d, a, b) => alu3(alu_op::XOR, d, a, b),
                AluInstr::Or(d, a, b)  => alu3(alu_op::OR, d, a, b),
                AluInstr::And(d, a, b) => alu3(alu_op::AND, d, a, b),
                AluInstr::Not(d, a)    => alu(alu_op::NOT, d, u16::from(a.0), 0),
                AluInstr::Cmp(d, a, b) => alu3(alu_op::CMP, d, a, b),
                AluInstr::Shl(d, a, b) => alu3(alu_op::SHL, d, a, b),
                AluInstr::Shr(d, a, b) => alu3(alu_op::SHR, d, a, b),
                AluInstr::Skip(r, bit) => alu(alu_op::SKIP, r, u16::from(bit), 0),
                AluInstr::Store16(addr, src) => alu(alu_op::STORE16, addr, u16::from(src.0), 0),
                AluInstr::Load16(dst, addr)  => alu(alu_op::LOAD16, dst, u16::from(addr.0), 0),
                AluInstr::Inc(d, s) => step(alu_op::INC, d, s),
                AluInstr::Dec(d, s) => step(alu_op::DEC, d, s),
            }),
            Instr::Misc(MiscInstr::Nop) => out.push(0xC0),
            Instr::Misc(MiscInstr::Syscall) => out.push(0xC1),
            Instr::Misc(MiscInstr::ClearInstrCache) => out.push(0xC2),
            Instr::Misc(MiscInstr::Set8(d, v)) => out.extend([0xD0 | d.0, v]),
            Instr::Misc(MiscInstr::Set16(d, v)) => {
                out.push(0xD8 | d.0);
                out.extend(v.to_be_bytes());
            },
        }
    }

    /// The number of bytes this instruction encodes into.
    pub fn len(&self) -> usize {
        match self {
            Instr::Mem(_) => 1,
            Instr::Alu(_) => 2,
            Instr::Misc(MiscInstr::Set8(..)) => 2,
            Instr::Misc(MiscInstr::Set16(..)) => 3,
            Instr::Misc(_) => 1,
        }
    }
}

fn decode_alu(word: u16) -> AluInstr {
    let op = (word >> 9) & 0xF;
    let d = Reg::from_bits(word >> 6);
    let a = Reg::from_bits(word >> 3);
    let b = Reg::from_bits(word);

    match op {
        alu_op::ADD => AluInstr::Add(d, a, b),
        alu_op::SUB => AluInstr::Sub(d, a, b),
        alu_op::MUL => AluInstr::Mul(d, a, b),
        alu_op::DIV => AluInstr::Div(d, a, b),
        alu_op::XOR => AluInstr::Xor(d, a, b),
        alu_op::OR  => AluInstr::Or(d, a, b),
        alu_op::AND => AluInstr::And(d, a, b),
        alu_op::NOT => AluInstr::Not(d, a),
        alu_op::CMP => AluInstr::Cmp(d, a, b),
        alu_op::SHL => AluInstr::Shl(d, a, b),
        alu_op::SHR => AluInstr::Shr(d, a, b),
        alu_op::SKIP => AluInstr::Skip(d, a.0),
        alu_op::STORE16 => AluInstr::Store16(d, a),
        alu_op::LOAD16  => AluInstr::Load16(d, a),
        // 6 low bits hold step - 1, so this is always in 1..=64
        alu_op::INC => AluInstr::Inc(d, Step((word & 0x3F) as u8 + 1)),
        _           => AluInstr::Dec(d, Step((word & 0x3F) as u8 + 1)),
    }
}

impl std::fmt::Display for Instr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Instr::Mem(MemInstr::StoreByte { addr, src }) => write!(f, "STB [{addr}], {src}"),
            Instr::Mem(MemInstr::LoadByte { dst, addr }) => write!(f, "LDB {dst}, [{addr}]"),
            Instr::Alu(AluInstr::Add(d, a, b)) => write!(f, "ADD {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Sub(d, a, b)) => write!(f, "SUB {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Mul(d, a, b)) => write!(f, "MUL {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Div(d, a, b)) => write!(f, "DIV {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Xor(d, a, b)) => write!(f, "XOR {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Or(d, a, b))  => write!(f, "OR {d}, {a}, {b}"),
            Instr::Alu(AluInstr::And(d, a, b)) => write!(f, "AND {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Not(d, a))    => write!(f, "NOT {d}, {a}"),
            Instr::Alu(AluInstr::Cmp(d, a, b)) => write!(f, "CMP {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Shl(d, a, b)) => write!(f, "SHL {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Shr(d, a, b)) => write!(f, "SHR {d}, {a}, {b}"),
            Instr::Alu(AluInstr::Skip(r, bit)) => write!(f, "SKIP {r}, #{bit}"),
            Instr::Alu(AluInstr::Store16(addr, src)) => write!(f, "STW [{addr}], {src}"),
            Instr::Alu(AluInstr::Load16(dst, addr))  => write!(f, "LDW {dst}, [{addr}]"),
            Instr::Alu(AluInstr::Inc(d, s)) => write!(f, "INC {d}, #{}", s.get()),
            Instr::Alu(AluInstr::Dec(d, s)) => write!(f, "DEC {d}, #{}", s.get()),
            Instr::Misc(MiscInstr::Nop) => f.write_str("NOP"),
            Instr::Misc(MiscInstr::Syscall) => f.write_str("SYSCALL"),
            Instr::Misc(MiscInstr::ClearInstrCache) => f.write_str("CLRICACHE"),
            Instr::Misc(MiscInstr::Set8(d, v))  => write!(f, "SET8 {d}, x{v:02X}"),
            Instr::Misc(MiscInstr::Set16(d, v)) => write!(f, "SET16 {d}, x{v:04X}"),
        }
    }
}
