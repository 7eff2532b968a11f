//! The file-system interface consumed by the kernel.
//!
//! The kernel never touches storage directly. Programs, process-state blocks,
//! data regions and devices are all reached through the [`FileSystem`] trait,
//! using [`Handle`]s to refer to open resources.
//!
//! This module also provides:
//! - [`path`]: path lexing, normalisation and splitting.
//! - [`MemFs`]: an in-memory implementation used for host simulation and testing.
//! - [`device`]: byte devices which can be mounted into a [`MemFs`].

pub mod path;
pub mod device;
mod memfs;

pub use memfs::MemFs;

/// An opaque reference to an open resource.
///
/// Handles are passed to programs as raw 16-bit values, so
/// `0` is reserved to mean "no handle" ([`Handle::INVALID`]).
#[derive(Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Clone, Copy, Default)]
pub struct Handle(pub u16);
impl Handle {
    /// The invalid handle, returned when an open fails.
    pub const INVALID: Handle = Handle(0);

    /// Checks whether this is not [`Handle::INVALID`].
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
    /// Gets the raw value of this handle.
    pub fn get(self) -> u16 {
        self.0
    }
}
impl From<u16> for Handle {
    fn from(value: u16) -> Self {
        Handle(value)
    }
}
impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "fd{}", self.0)
    }
}

/// A virtual file system.
///
/// All paths given to this trait are expected to already be normalised
/// (see [`path::normalise`]).
///
/// Offsets are 32-bit so that a process-state block and its data region
/// can sit in one file without overflowing the 16-bit address space.
pub trait FileSystem {
    /// Opens the file, directory, or device at the given path.
    fn open(&mut self, path: &str) -> Option<Handle>;

    /// Closes the handle. Closing an unknown handle does nothing.
    fn close(&mut self, handle: Handle);

    /// Reads into `buf` starting at `offset`, returning how many bytes were read.
    ///
    /// Devices ignore the offset.
    fn read(&mut self, handle: Handle, offset: u32, buf: &mut [u8]) -> usize;

    /// Writes `data` starting at `offset`, returning how many bytes were written.
    ///
    /// Writes never extend a file; bytes past the end of the file are not written.
    fn write(&mut self, handle: Handle, offset: u32, data: &[u8]) -> usize;

    /// Creates a zero-filled file with the given size, returning whether it succeeded.
    fn create(&mut self, path: &str, size: u32) -> bool;

    /// Resizes an existing file, returning whether it succeeded.
    ///
    /// Handles to the file remain valid after a resize.
    fn resize(&mut self, path: &str, size: u32) -> bool;

    /// Deletes a file or an empty directory, returning whether it succeeded.
    ///
    /// Anything that still has an open handle can't be deleted.
    fn delete(&mut self, path: &str) -> bool;

    /// Checks whether anything exists at the path.
    fn exists(&self, path: &str) -> bool;

    /// Checks whether the path is a directory.
    fn is_dir(&self, path: &str) -> bool;

    /// Gets the length of the file at the path.
    fn len(&self, path: &str) -> Option<u32>;

    /// Gets the canonical path of an open handle.
    fn path_of(&self, handle: Handle) -> Option<String>;

    /// Gets the full path of the `n`-th child of an open directory.
    fn child(&self, handle: Handle, n: u16) -> Option<String>;

    /// Checks whether a read from the handle can complete without waiting.
    fn can_read(&mut self, handle: Handle) -> bool;
}
