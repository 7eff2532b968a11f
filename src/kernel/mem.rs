//! Memory handling for processes.
//!
//! This module consists of:
//! - [`RegFile`]: A process's register file.
//! - [`RamInitStrategy`]: How freshly grown data-region bytes are filled.
//! - [`AddrSpace`]: The split address space of one process, as seen by executing code.
//!
//! # Address space
//!
//! Addresses below [`SPLIT`] index the program region, which is read-only and
//! read through a small per-turn [`InstrCache`].
//! Addresses at or above [`SPLIT`] index the data region, which lives in the
//! process's backing file right after its state block (see [`STATE_LEN`]).
//!
//! [`STATE_LEN`]: super::state::STATE_LEN

use rand::rngs::StdRng;
use rand::Rng;

use crate::ast::Reg;
use crate::fs::{FileSystem, Handle};

use super::state::STATE_LEN;
use super::Fault;

/// The first address of the data region.
pub const SPLIT: u16 = 0x8000;

/// Extra headroom tried (in order) when the data region has to grow.
const GROWTH_HEADROOM: [u16; 5] = [16, 8, 4, 2, 1];

/// How many program bytes the instruction cache pulls in at a time.
const CACHE_LINE: usize = 32;

/// The register file.
///
/// This struct can be indexed with a [`Reg`]
/// (which can be constructed using the [`crate::ast::reg_consts`] module or via [`Reg::try_from`]).
///
/// # Example
///
/// ```
/// use bytekernel::kernel::mem::RegFile;
/// use bytekernel::ast::reg_consts::{R0, IP};
///
/// let mut reg = RegFile::new();
/// reg[R0] = 11;
/// assert_eq!(reg[R0], 11);
/// assert_eq!(reg[IP], 0);
/// ```
#[derive(Debug, Default, PartialEq, Eq, Clone, Copy)]
pub struct RegFile([u16; 8]);
impl RegFile {
    /// Creates a register file with every register cleared.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a register file from raw register values.
    pub fn from_array(regs: [u16; 8]) -> Self {
        Self(regs)
    }
    /// Gets the raw register values.
    pub fn as_array(&self) -> &[u16; 8] {
        &self.0
    }
}
impl std::ops::Index<Reg> for RegFile {
    type Output = u16;

    fn index(&self, index: Reg) -> &Self::Output {
        &self.0[usize::from(index)]
    }
}
impl std::ops::IndexMut<Reg> for RegFile {
    fn index_mut(&mut self, index: Reg) -> &mut Self::Output {
        &mut self.0[usize::from(index)]
    }
}

/// Trait that describes types that can be used to fill new data-region bytes.
pub trait ByteFiller {
    /// Generate the data.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each byte to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to fill data-region bytes created by growth.
///
/// Programs should not rely on the contents of memory they have not written.
/// The random strategies help flush out programs that do.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RamInitStrategy {
    /// Fills each byte randomly and non-deterministically.
    Unseeded,

    /// Fills each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Fills each byte with a known value.
    Known {
        /// The value to fill each byte with.
        value: u8
    }
}
impl Default for RamInitStrategy {
    fn default() -> Self {
        RamInitStrategy::Known { value: 0 }
    }
}
impl RamInitStrategy {
    pub(super) fn generator(&self) -> RamFiller {
        use rand::SeedableRng;

        match self {
            RamInitStrategy::Unseeded => RamFiller::Unseeded,
            RamInitStrategy::Seeded { seed } => RamFiller::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            RamInitStrategy::Known { value } => RamFiller::Known(*value),
        }
    }
}

#[derive(Debug)]
pub(super) enum RamFiller {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u8)
}
impl RamFiller {
    fn fill(&mut self, n: usize) -> Option<Vec<u8>> {
        // Resized files are already zero-filled.
        if let RamFiller::Known(0) = self { return None; }
        Some(std::iter::repeat_with(|| self.generate()).take(n).collect())
    }
}
impl ByteFiller for RamFiller {
    fn generate(&mut self) -> u8 {
        match self {
            RamFiller::Unseeded  => ().generate(),
            RamFiller::Seeded(r) => r.generate(),
            RamFiller::Known(k)  => k.generate(),
        }
    }
}

/// A window of program-region bytes kept for the duration of a turn.
#[derive(Debug, Default)]
pub(crate) struct InstrCache {
    base: u16,
    bytes: Vec<u8>
}
impl InstrCache {
    /// Empties the cache.
    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    fn get(&mut self, fs: &mut dyn FileSystem, prog: Handle, addr: u16) -> Result<u8, Fault> {
        if let Some(&b) = addr.checked_sub(self.base).and_then(|i| self.bytes.get(usize::from(i))) {
            return Ok(b);
        }

        let line = CACHE_LINE.min(usize::from(SPLIT - addr));
        self.bytes.resize(line, 0);
        let n = fs.read(prog, u32::from(addr), &mut self.bytes);
        self.bytes.truncate(n);
        self.base = addr;

        self.bytes.first().copied().ok_or(Fault::ProgramRead(addr))
    }
}

/// The address space of one process.
///
/// This borrows everything it needs from the kernel and the loaded process for the
/// duration of an access, and is cheap to construct.
pub(crate) struct AddrSpace<'a> {
    pub fs: &'a mut dyn FileSystem,
    pub filler: &'a mut RamFiller,
    pub limit: u16,
    pub prog: Handle,
    pub data: Handle,
    pub data_path: &'a str,
    pub data_len: &'a mut u16,
    pub cache: &'a mut InstrCache,
}
impl AddrSpace<'_> {
    /// Reads the byte at the given address.
    ///
    /// Reading a data-region address past the current length of the region is a fault.
    pub fn read(&mut self, addr: u16) -> Result<u8, Fault> {
        let Some(index) = addr.checked_sub(SPLIT) else {
            return self.cache.get(self.fs, self.prog, addr);
        };
        if index >= *self.data_len { return Err(Fault::DataRead(addr)); }

        let mut buf = [0];
        match self.fs.read(self.data, STATE_LEN + u32::from(index), &mut buf) {
            1 => Ok(buf[0]),
            _ => Err(Fault::DataRead(addr)),
        }
    }

    /// Writes a byte to the given address, growing the data region if needed.
    pub fn write(&mut self, addr: u16, byte: u8) -> Result<(), Fault> {
        let Some(index) = addr.checked_sub(SPLIT) else {
            return Err(Fault::ReadOnly(addr));
        };
        if index >= *self.data_len {
            self.grow(addr, index)?;
        }

        match self.fs.write(self.data, STATE_LEN + u32::from(index), &[byte]) {
            1 => Ok(()),
            _ => Err(Fault::Storage),
        }
    }

    /// Reads a big-endian 16-bit value.
    pub fn read16(&mut self, addr: u16) -> Result<u16, Fault> {
        let hi = self.read(addr)?;
        let lo = self.read(addr.wrapping_add(1))?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    /// Writes a big-endian 16-bit value.
    pub fn write16(&mut self, addr: u16, value: u16) -> Result<(), Fault> {
        let [hi, lo] = value.to_be_bytes();
        self.write(addr, hi)?;
        self.write(addr.wrapping_add(1), lo)
    }

    /// Reads bytes starting at `addr` up to (not including) a NUL,
    /// reading at most `max` bytes.
    pub fn read_cstr(&mut self, addr: u16, max: usize) -> Result<Vec<u8>, Fault> {
        let mut out = vec![];
        for i in 0..max {
            let b = self.read(addr.wrapping_add(i as u16))?;
            if b == 0 { break; }
            out.push(b);
        }
        Ok(out)
    }

    /// Writes the bytes followed by a NUL terminator.
    pub fn write_cstr(&mut self, addr: u16, bytes: &[u8]) -> Result<(), Fault> {
        for (i, &b) in bytes.iter().chain(&[0]).enumerate() {
            self.write(addr.wrapping_add(i as u16), b)?;
        }
        Ok(())
    }

    fn grow(&mut self, addr: u16, index: u16) -> Result<(), Fault> {
        if index >= self.limit { return Err(Fault::GrowthFailed(addr)); }

        let old_len = *self.data_len;
        let new_len = GROWTH_HEADROOM.iter()
            .map(|&extra| (u32::from(index) + 1 + u32::from(extra)).min(u32::from(self.limit)))
            .find(|&len| self.fs.resize(self.data_path, STATE_LEN + len))
            .ok_or(Fault::GrowthFailed(addr))?;

        if let Some(fill) = self.filler.fill(new_len as usize - usize::from(old_len)) {
            self.fs.write(self.data, STATE_LEN + u32::from(old_len), &fill);
        }
        // new_len is clamped to a u16 limit
        *self.data_len = new_len as u16;
        Ok(())
    }
}
