//! A tiny cooperative multi-process kernel for a byte-addressed, 16-bit register virtual machine.
//!
//! Programs are raw bytecode files stored in a [`fs::FileSystem`].
//! The kernel runs them as isolated processes, each with its own registers,
//! a read-only program region, and a private data region persisted in a backing file.
//!
//! # Usage
//!
//! Bytecode can be built from instructions with [`ast::instr::Instr::encode`]:
//! ```
//! use bytekernel::ast::instr::{AluInstr, Instr, MiscInstr};
//! use bytekernel::ast::reg_consts::{R0, R1, R2};
//!
//! let mut prog = vec![];
//! Instr::Misc(MiscInstr::Set8(R1, 20)).encode(&mut prog);
//! Instr::Misc(MiscInstr::Set8(R2, 22)).encode(&mut prog);
//! Instr::Alu(AluInstr::Add(R1, R1, R2)).encode(&mut prog);
//! Instr::Misc(MiscInstr::Set8(R0, 0)).encode(&mut prog); // exit
//! Instr::Misc(MiscInstr::Syscall).encode(&mut prog);
//!
//! assert_eq!(Instr::decode(&prog), Ok(Instr::Misc(MiscInstr::Set8(R1, 20))));
//! ```
//!
//! Once a program is in a file system, it can be spawned and run:
//! ```
//! # use bytekernel::ast::instr::{AluInstr, Instr, MiscInstr};
//! # use bytekernel::ast::reg_consts::{R0, R1, R2};
//! # let mut prog = vec![];
//! # Instr::Misc(MiscInstr::Set8(R1, 20)).encode(&mut prog);
//! # Instr::Misc(MiscInstr::Set8(R2, 22)).encode(&mut prog);
//! # Instr::Alu(AluInstr::Add(R1, R1, R2)).encode(&mut prog);
//! # Instr::Misc(MiscInstr::Set8(R0, 0)).encode(&mut prog);
//! # Instr::Misc(MiscInstr::Syscall).encode(&mut prog);
//! use bytekernel::fs::MemFs;
//! use bytekernel::kernel::Kernel;
//!
//! let mut fs = MemFs::new();
//! fs.mkdir("/tmp");
//! fs.add_file("/bin/answer", prog);
//!
//! let mut kernel = Kernel::new(fs, Default::default());
//! let pid = kernel.spawn("/bin/answer").unwrap();
//! kernel.run_until_idle(100);
//! assert_eq!(kernel.exit_status(pid), Some(42));
//! ```
//!
//! See the [`kernel`] module for details on scheduling and the syscall interface.
#![warn(missing_docs)]

pub mod ast;
pub mod err;
pub mod fs;
pub mod kernel;
