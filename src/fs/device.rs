//! Byte devices.
//!
//! The interface for devices is defined with the [`Device`] trait.
//! Devices are mounted into a [`MemFs`](super::MemFs) with [`MemFs::add_device`](super::MemFs::add_device),
//! after which processes can open them by path and use them as stdio.
//!
//! Besides the trait, this module also includes:
//! - [`NullDevice`]: A device that never has data and swallows all writes.
//! - [`BufferedDevice`]: A device reading from an input buffer and writing to an output buffer.
//! - [`ChannelDevice`]: A device reading from and writing to threads through channels.

use std::collections::VecDeque;
use std::sync::{Arc, RwLock, RwLockWriteGuard, TryLockError};
use std::thread::JoinHandle;

use crossbeam_channel as cbc;

/// A byte-at-a-time device.
///
/// Devices do not have offsets. A read takes the next available byte
/// and a write appends a byte.
pub trait Device {
    /// Takes the next byte from the device, if one is available.
    fn read_byte(&mut self) -> Option<u8>;

    /// Writes a byte to the device, returning whether it was accepted.
    fn write_byte(&mut self, byte: u8) -> bool;

    /// Checks whether [`Device::read_byte`] would currently return a byte.
    fn ready(&mut self) -> bool;
}
impl dyn Device {} // assert Device is dyn safe

/// No data. Reads never produce a byte, writes are accepted and dropped.
///
/// A process reading from this device waits forever (or until interrupted by a signal).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDevice;
impl Device for NullDevice {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn write_byte(&mut self, _byte: u8) -> bool {
        true
    }

    fn ready(&mut self) -> bool {
        false
    }
}

/// A device that reads from an input buffer and writes to an output buffer.
///
/// The buffers can be accessed in code via [`BufferedDevice::get_input`] and [`BufferedDevice::get_output`].
/// Cloning this device produces a second view of the same buffers, so a host can keep one
/// copy while the file system owns another.
///
/// Note that while a lock guard to one of the buffers is held, the kernel sees
/// the device as not ready. A lock guard should never be leaked.
#[derive(Clone, Default)]
pub struct BufferedDevice {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>
}
impl BufferedDevice {
    /// Creates a new device with empty buffers.
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new device from already defined buffers.
    pub fn with_bufs(input: Arc<RwLock<VecDeque<u8>>>, output: Arc<RwLock<Vec<u8>>>) -> Self {
        Self { input, output }
    }

    fn try_input(&self) -> Option<RwLockWriteGuard<'_, VecDeque<u8>>> {
        match self.input.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }
    fn try_output(&self) -> Option<RwLockWriteGuard<'_, Vec<u8>>> {
        match self.output.try_write() {
            Ok(g) => Some(g),
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    /// Gets a reference to the input buffer.
    pub fn get_input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }
    /// Gets a reference to the output buffer.
    pub fn get_output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    /// Appends bytes to the input buffer.
    pub fn push_input(&self, bytes: &[u8]) {
        let mut inp = match self.input.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        inp.extend(bytes);
    }
    /// Takes everything written to the output buffer so far.
    pub fn take_output(&self) -> Vec<u8> {
        let mut out = match self.output.write() {
            Ok(g) => g,
            Err(e) => e.into_inner(),
        };
        std::mem::take(&mut *out)
    }
}
impl Device for BufferedDevice {
    fn read_byte(&mut self) -> Option<u8> {
        self.try_input()?.pop_front()
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        match self.try_output() {
            Some(mut out) => {
                out.push(byte);
                true
            },
            None => false
        }
    }

    fn ready(&mut self) -> bool {
        // Ready once we can lock the input AND it has data.
        self.try_input().is_some_and(|inp| !inp.is_empty())
    }
}

/// A helper struct for [`ChannelDevice::new`],
/// indicating the channel is closed and no more reads/writes will come from it.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Stop;

/// A device that reads from one channel and writes to another.
///
/// Each channel is serviced by its own thread, so the reader and writer
/// functions are free to block.
pub struct ChannelDevice {
    read_data:    cbc::Receiver<u8>,
    #[allow(unused)]
    read_handler: JoinHandle<()>,

    write_data:    cbc::Sender<u8>,
    write_handler: JoinHandle<()>
}
impl ChannelDevice {
    /// Creates a new channel device with the given reader and writer.
    ///
    /// The reader function is called every time the device needs another input byte.
    /// It should block until a byte is ready, or return `Stop` if there are no more bytes to read.
    ///
    /// The writer function is called every time a byte is written to the device.
    ///
    /// The reader thread polls ahead by one byte, even while no process is reading.
    pub fn new(
        mut reader: impl FnMut() -> Result<u8, Stop> + Send + 'static,
        mut writer: impl FnMut(u8) -> Result<(), Stop> + Send + 'static
    ) -> Self {
        let (read_tx, read_rx) = cbc::bounded(1);
        let (write_tx, write_rx) = cbc::unbounded();

        // Reader thread:
        let read_handler = std::thread::spawn(move || loop {
            let Ok(byte) = reader() else { return };
            let Ok(()) = read_tx.send(byte) else { return };
        });

        // Writer thread:
        let write_handler = std::thread::spawn(move || {
            for byte in write_rx {
                let Ok(()) = writer(byte) else { return };
            }
        });

        Self {
            read_data: read_rx,
            read_handler,
            write_data: write_tx,
            write_handler
        }
    }

    /// Creates a channel device with stdin being the read data and stdout being the write data.
    ///
    /// Note that due to how stdin works in terminals, data is only sent once a new line is typed.
    /// Additionally, this flushes stdout every time a byte is written.
    pub fn stdio() -> Self {
        use std::io::{self, BufRead, Write};

        Self::new(
            || {
                let mut stdin = io::stdin().lock();
                let &[byte, ..] = stdin.fill_buf().map_err(|_| Stop)? else {
                    return Err(Stop);
                };

                stdin.consume(1);
                Ok(byte)
            },
            |byte| {
                let mut stdout = io::stdout().lock();
                stdout.write_all(&[byte]).map_err(|_| Stop)?;
                stdout.flush().map_err(|_| Stop)
            }
        )
    }

    /// Closes the device, waiting for all written bytes to be handed to the writer.
    pub fn close(self) {
        let Self { read_data, read_handler: _, write_data, write_handler } = self;

        std::mem::drop(read_data);
        std::mem::drop(write_data);

        // The reader thread can be stuck in its reader, so only the writer is joined.
        let _ = write_handler.join();
    }
}
impl Device for ChannelDevice {
    fn read_byte(&mut self) -> Option<u8> {
        // Disconnected means the reader stopped, which is the same as no data.
        self.read_data.try_recv().ok()
    }

    fn write_byte(&mut self, byte: u8) -> bool {
        self.write_data.send(byte).is_ok()
    }

    fn ready(&mut self) -> bool {
        !self.read_data.is_empty()
    }
}
