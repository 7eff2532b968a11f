//! The persisted process-state block.
//!
//! Every process owns one backing file. The file starts with a fixed-size
//! state block ([`STATE_LEN`] bytes), followed by the process's data region.
//!
//! ```text
//! offset  size  field
//!      0    16  registers r0..r7
//!     16     1  flags (bit 0: skip next instruction)
//!     17     1  argc
//!     18     8  signal handlers (Interrupt, User1, User2, Suicide)
//!     26     2  stdio handle
//!     28     2  data-region length
//!     30     8  argv offsets
//!     38    64  present working directory (NUL-padded)
//!    102    64  search path (NUL-padded)
//! ```
//!
//! All 16-bit fields are big-endian.

use crate::fs::{FileSystem, Handle};

use super::mem::RegFile;
use super::Fault;

/// Size of the state block in bytes.
pub const STATE_LEN: u32 = 166;

/// Maximum number of arguments a process can have (including the program path).
pub const ARGV_MAX: usize = 4;

/// Space reserved for each environment string, including the NUL terminator.
pub const ENV_STR_LEN: usize = 64;

const FLAG_SKIP: u8 = 0b1;

const REGS: usize = 0;
const FLAGS: usize = 16;
const ARGC: usize = 17;
const HANDLERS: usize = 18;
const STDIO: usize = 26;
const RAM_LEN: usize = 28;
const ARGV: usize = 30;
const PWD: usize = 38;
const PATH: usize = PWD + ENV_STR_LEN;

/// Environment of a process.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct Env {
    /// Present working directory.
    pub pwd: String,
    /// Search path: directories separated by `:`.
    pub path: String,
    /// The handle the process uses for standard IO.
    pub stdio: Handle,
    /// Number of valid entries in `argv`.
    pub argc: u8,
    /// Data-region offsets of each NUL-terminated argument.
    pub argv: [u16; ARGV_MAX],
}

/// Everything the kernel keeps about a process between its turns.
#[derive(Debug, Default, PartialEq, Eq, Clone)]
pub struct ProcState {
    /// The register file.
    pub regs: RegFile,
    /// Whether the next fetched instruction is discarded.
    pub skip: bool,
    /// Signal handler addresses, indexed by [`Signal`](super::signal::Signal). `0` is unset.
    pub handlers: [u16; 4],
    /// Current length of the data region.
    pub ram_len: u16,
    /// The process environment.
    pub env: Env,
}

impl ProcState {
    /// Serializes the block.
    pub fn to_bytes(&self) -> [u8; STATE_LEN as usize] {
        let mut out = [0; STATE_LEN as usize];

        for (i, r) in self.regs.as_array().iter().enumerate() {
            put16(&mut out, REGS + 2 * i, *r);
        }
        out[FLAGS] = if self.skip { FLAG_SKIP } else { 0 };
        out[ARGC] = self.env.argc;
        for (i, &h) in self.handlers.iter().enumerate() {
            put16(&mut out, HANDLERS + 2 * i, h);
        }
        put16(&mut out, STDIO, self.env.stdio.get());
        put16(&mut out, RAM_LEN, self.ram_len);
        for (i, &a) in self.env.argv.iter().enumerate() {
            put16(&mut out, ARGV + 2 * i, a);
        }
        put_str(&mut out[PWD..PWD + ENV_STR_LEN], &self.env.pwd);
        put_str(&mut out[PATH..PATH + ENV_STR_LEN], &self.env.path);

        out
    }

    /// Deserializes a block, failing if it is too short or its fields are out of range.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Fault> {
        let bytes = bytes.get(..STATE_LEN as usize).ok_or(Fault::StateCorrupt)?;

        let argc = bytes[ARGC];
        if usize::from(argc) > ARGV_MAX { return Err(Fault::StateCorrupt); }

        Ok(Self {
            regs: RegFile::from_array(std::array::from_fn(|i| get16(bytes, REGS + 2 * i))),
            skip: bytes[FLAGS] & FLAG_SKIP != 0,
            handlers: std::array::from_fn(|i| get16(bytes, HANDLERS + 2 * i)),
            ram_len: get16(bytes, RAM_LEN),
            env: Env {
                pwd: get_str(&bytes[PWD..PWD + ENV_STR_LEN]),
                path: get_str(&bytes[PATH..PATH + ENV_STR_LEN]),
                stdio: Handle(get16(bytes, STDIO)),
                argc,
                argv: std::array::from_fn(|i| get16(bytes, ARGV + 2 * i)),
            },
        })
    }

    /// Reads the block from the start of a backing file.
    pub(crate) fn load(fs: &mut dyn FileSystem, handle: Handle) -> Result<Self, Fault> {
        let mut buf = [0; STATE_LEN as usize];
        match fs.read(handle, 0, &mut buf) == buf.len() {
            true  => Self::from_bytes(&buf),
            false => Err(Fault::StateCorrupt),
        }
    }

    /// Writes the block to the start of a backing file.
    pub(crate) fn store(&self, fs: &mut dyn FileSystem, handle: Handle) -> Result<(), Fault> {
        let buf = self.to_bytes();
        match fs.write(handle, 0, &buf) == buf.len() {
            true  => Ok(()),
            false => Err(Fault::Storage),
        }
    }
}

fn put16(out: &mut [u8], at: usize, value: u16) {
    out[at..at + 2].copy_from_slice(&value.to_be_bytes());
}
fn get16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}
/// Copies the string, truncating so at least one NUL remains.
fn put_str(out: &mut [u8], s: &str) {
    let n = s.len().min(out.len() - 1);
    out[..n].copy_from_slice(&s.as_bytes()[..n]);
}
fn get_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}
