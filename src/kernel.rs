//! The process execution engine.
//!
//! This module is focused on running bytecode programs as isolated, cooperatively scheduled processes.
//!
//! This module consists of:
//! - [`Kernel`]: The struct that owns the process table and schedules processes.
//! - [`mem`]: The module handling registers and the split address space.
//! - [`state`]: The module handling the persisted process-state block.
//! - [`syscall`]: The syscall numeric table and its sentinel values.
//! - [`signal`]: The signal kinds deliverable to a process.
//! - [`clock`]: Monotonic time sources.
//!
//! # Usage
//!
//! A kernel is created over a [`FileSystem`], which holds the programs to run and
//! a temporary directory for per-process backing files.
//!
//! ```
//! use bytekernel::ast::instr::{Instr, MiscInstr};
//! use bytekernel::ast::reg_consts::{R0, R1};
//! use bytekernel::fs::MemFs;
//! use bytekernel::kernel::Kernel;
//!
//! // set8 r1, 7; set8 r0, 0; syscall (exit)
//! let mut prog = vec![];
//! Instr::Misc(MiscInstr::Set8(R1, 7)).encode(&mut prog);
//! Instr::Misc(MiscInstr::Set8(R0, 0)).encode(&mut prog);
//! Instr::Misc(MiscInstr::Syscall).encode(&mut prog);
//!
//! let mut fs = MemFs::new();
//! fs.mkdir("/tmp");
//! fs.add_file("/bin/init", prog);
//!
//! let mut kernel = Kernel::new(fs, Default::default());
//! let pid = kernel.spawn("/bin/init").unwrap();
//! assert_eq!(pid, 0);
//!
//! kernel.tick();
//! assert_eq!(kernel.live_count(), 0);
//! assert_eq!(kernel.exit_status(pid), Some(7));
//! ```
//!
//! ## Flags
//!
//! The kernel can be configured through [`KernelFlags`]:
//!
//! ```
//! # use bytekernel::fs::MemFs;
//! use bytekernel::kernel::{Kernel, KernelFlags};
//!
//! let kernel = Kernel::new(MemFs::new(), KernelFlags { budget: 16, ..Default::default() });
//! ```
//!
//! ## Scheduling
//!
//! Each [`Kernel::tick`] visits every process slot in pid order. A process that is
//! runnable (or whose wait condition now holds) executes up to `budget` instructions.
//! Its turn ends early if it blocks, exits, faults, or yields (after `fork` and `exec`).
//!
//! A process's state block is loaded from its backing file at the start of its turn
//! and stored back at the end.

pub mod clock;
pub mod mem;
pub mod signal;
pub mod state;
pub mod syscall;
mod proc;

use std::borrow::Cow;

use crate::ast::instr::{cmp_flags, instr_len, AluInstr, DecodeErr, Instr, MemInstr, MiscInstr};
use crate::ast::reg_consts::{IP, R0};
use crate::fs::{path, FileSystem, Handle};

use self::clock::{Clock, SystemClock};
use self::mem::{AddrSpace, InstrCache, RamFiller, RamInitStrategy};
use self::state::ProcState;
use self::syscall::{EXIT_FAULT, WAIT_NO_PROCESS, WAIT_TIMEOUT};

pub use self::proc::ProcStatus;
use self::proc::ProcTable;

/// Capacity of the process table.
pub const PROC_MAX: usize = 16;

/// Conditions that are fatal to a process.
///
/// A fault never propagates out of the kernel. The faulting process is
/// killed with [`EXIT_FAULT`] and the fault is logged.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Fault {
    /// The bytes at the instruction pointer do not decode.
    IllegalInstr(DecodeErr),
    /// The program region has no byte at this address.
    ProgramRead(u16),
    /// A write targeted the program region.
    ReadOnly(u16),
    /// A read targeted a data-region address past the end of the region.
    DataRead(u16),
    /// The data region could not grow to include this address.
    GrowthFailed(u16),
    /// Integer division by zero.
    DivideByZero,
    /// The process-state block could not be read back.
    StateCorrupt,
    /// The backing file could not be written.
    Storage,
    /// `r0` did not name a syscall.
    UnknownSyscall(u16),
}
impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Fault::IllegalInstr(e)    => write!(f, "illegal instruction: {e}"),
            Fault::ProgramRead(a)     => write!(f, "read past the end of the program at x{a:04X}"),
            Fault::ReadOnly(a)        => write!(f, "write to read-only address x{a:04X}"),
            Fault::DataRead(a)        => write!(f, "read of unallocated address x{a:04X}"),
            Fault::GrowthFailed(a)    => write!(f, "could not grow memory to fit x{a:04X}"),
            Fault::DivideByZero       => f.write_str("division by zero"),
            Fault::StateCorrupt       => f.write_str("process state is corrupt"),
            Fault::Storage            => f.write_str("could not write to process storage"),
            Fault::UnknownSyscall(n)  => write!(f, "unknown syscall {n}"),
        }
    }
}
impl std::error::Error for Fault {}
impl crate::err::Error for Fault {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            Fault::IllegalInstr(e) => crate::err::Error::help(e),
            Fault::ReadOnly(_) => Some(Cow::from("addresses below x8000 belong to the program and cannot be written")),
            Fault::DataRead(_) => Some(Cow::from("memory must be written before it is read")),
            Fault::GrowthFailed(_) => Some(Cow::from("the memory limit was reached or storage is full")),
            Fault::UnknownSyscall(_) => Some(Cow::from("syscall numbers are grouped by hundreds starting at 0, 256, 512, 768, and 1024")),
            _ => None,
        }
    }
}

/// Errors from creating a process.
///
/// On any of these errors, everything opened for the process has been released.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum SpawnErr {
    /// Every slot in the process table is in use.
    TableFull,
    /// The path is empty, too long, or contains a NUL.
    InvalidPath,
    /// No program file exists at the path.
    ProgramNotFound(String),
    /// The backing file could not be created or written.
    Storage,
}
impl std::fmt::Display for SpawnErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SpawnErr::TableFull          => f.write_str("process table is full"),
            SpawnErr::InvalidPath        => f.write_str("invalid program path"),
            SpawnErr::ProgramNotFound(p) => write!(f, "no program at {p}"),
            SpawnErr::Storage            => f.write_str("could not create process storage"),
        }
    }
}
impl std::error::Error for SpawnErr {}
impl crate::err::Error for SpawnErr {
    fn help(&self) -> Option<Cow<str>> {
        match self {
            SpawnErr::TableFull   => Some(Cow::from(format!("at most {PROC_MAX} processes can be alive at once"))),
            SpawnErr::InvalidPath => Some(Cow::from(format!("paths must be between 1 and {} bytes", path::PATH_MAX))),
            SpawnErr::Storage     => Some(Cow::from("check that the temporary directory exists and has space")),
            SpawnErr::ProgramNotFound(_) => None,
        }
    }
}

/// Anything that can cause a process's turn to end before its budget runs out.
#[derive(Debug)]
enum StepBreak {
    /// The process gave up the rest of its turn.
    Yield,
    /// The process is now waiting.
    Blocked,
    /// The process no longer exists.
    Exited,
    /// The process faulted.
    Fault(Fault),
}
impl From<Fault> for StepBreak {
    fn from(value: Fault) -> Self {
        Self::Fault(value)
    }
}

/// Configuration flags for [`Kernel`].
///
/// These can be modified after the `Kernel` is created with [`Kernel::new`]
/// and their effects should still apply (except where noted).
///
/// Read the field descriptions for more details.
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct KernelFlags {
    /// The number of instructions each process may execute per tick.
    ///
    /// By default, this is `8`.
    pub budget: u8,

    /// How often (in ticks) every instruction counter is reset to 0.
    ///
    /// `0` disables the reset.
    ///
    /// By default, this is `3072`.
    pub counter_reset_ticks: u32,

    /// Directory holding each process's backing file (`proc<pid>`).
    ///
    /// This directory has to exist in the file system.
    ///
    /// By default, this is `/tmp`.
    pub tmp_dir: String,

    /// The search path new processes start with.
    ///
    /// By default, this is `/bin`.
    pub default_search_path: String,

    /// The maximum length of a data region.
    ///
    /// By default, this is `0x8000` (the entire upper half of the address space).
    pub ram_limit: u16,

    /// The fill used for bytes added to a data region by growth.
    ///
    /// This flag only goes into effect after a `Kernel::new` call.
    ///
    /// By default, this is [`RamInitStrategy::default`].
    pub ram_init: RamInitStrategy,
}
impl Default for KernelFlags {
    fn default() -> Self {
        Self {
            budget: 8,
            counter_reset_ticks: 3072,
            tmp_dir: "/tmp".to_string(),
            default_search_path: "/bin".to_string(),
            ram_limit: 0x8000,
            ram_init: RamInitStrategy::default(),
        }
    }
}

/// A process loaded for execution (or for modification by the kernel).
#[derive(Debug)]
struct Ctx {
    pid: u16,
    prog: Handle,
    data: Handle,
    data_path: String,
    state: ProcState,
    cache: InstrCache,
}

/// Runs bytecode processes over a file system.
pub struct Kernel<F> {
    fs: F,

    /// The configuration for this kernel.
    ///
    /// See [`KernelFlags`] for details.
    pub flags: KernelFlags,

    table: ProcTable,
    clock: Box<dyn Clock>,
    filler: RamFiller,
    ticks: u64,
}
impl<F> std::fmt::Debug for Kernel<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("flags", &self.flags)
            .field("table", &self.table)
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

impl<F: FileSystem> Kernel<F> {
    /// Creates a kernel using the host's monotonic clock.
    pub fn new(fs: F, flags: KernelFlags) -> Self {
        Self::with_clock(fs, flags, SystemClock::new())
    }

    /// Creates a kernel using the given clock.
    pub fn with_clock(fs: F, flags: KernelFlags, clock: impl Clock + 'static) -> Self {
        Self {
            fs,
            filler: flags.ram_init.generator(),
            flags,
            table: ProcTable::new(),
            clock: Box::new(clock),
            ticks: 0,
        }
    }

    /// Gets a reference to the file system.
    pub fn fs(&self) -> &F {
        &self.fs
    }
    /// Gets a mutable reference to the file system.
    pub fn fs_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    /// The number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// The number of live processes.
    pub fn live_count(&self) -> usize {
        self.table.live().count()
    }

    /// The lifecycle state of a process, or `None` if the pid is out of range.
    pub fn status(&self, pid: u16) -> Option<ProcStatus> {
        self.table.get(pid).map(|r| r.status)
    }

    /// The exit status of a dead process.
    ///
    /// This is `None` while the process is alive, or if the slot has never held a process.
    pub fn exit_status(&self, pid: u16) -> Option<u16> {
        self.table.get(pid)
            .filter(|r| r.status == ProcStatus::Unused)
            .and_then(|r| r.last_exit)
    }

    /// The instruction counter of every slot.
    pub fn instruction_counts(&self) -> [u16; PROC_MAX] {
        self.table.counters()
    }

    /// Reads the persisted state of a live process.
    ///
    /// Between ticks, this is the state the process will resume from.
    pub fn state(&mut self, pid: u16) -> Option<ProcState> {
        let rec = self.table.get(pid).filter(|r| r.is_live())?;
        ProcState::load(&mut self.fs, rec.state_fd).ok()
    }

    /// Runs one pass of the scheduler over the process table.
    pub fn tick(&mut self) {
        self.ticks += 1;
        let reset = u64::from(self.flags.counter_reset_ticks);
        if reset != 0 && self.ticks % reset == 0 {
            self.table.reset_counters();
        }

        for pid in 0..PROC_MAX as u16 {
            let Some(rec) = self.table.get(pid) else { continue };

            let wake_r0 = match rec.status {
                ProcStatus::Unused => continue,
                ProcStatus::Active => None,
                ProcStatus::WaitingOnProcess { pid: target, deadline } => {
                    if !self.table.is_live(target) {
                        Some(WAIT_NO_PROCESS)
                    } else if deadline.is_some_and(|d| self.clock.now_secs() >= d) {
                        Some(WAIT_TIMEOUT)
                    } else {
                        continue
                    }
                },
                // a handle closed while waiting resumes too, so the read can fail
                ProcStatus::WaitingOnRead { fd } => match self.fs.can_read(fd) || self.fs.path_of(fd).is_none() {
                    true  => None,
                    false => continue,
                },
            };

            self.run_turn(pid, wake_r0);
        }
    }

    /// Ticks until no process is alive or `max_ticks` ticks have run,
    /// returning how many ticks ran.
    pub fn run_until_idle(&mut self, max_ticks: u64) -> u64 {
        let mut n = 0;
        while n < max_ticks && self.live_count() > 0 {
            self.tick();
            n += 1;
        }
        n
    }

    fn run_turn(&mut self, pid: u16, wake_r0: Option<u16>) {
        let mut ctx = match self.load_ctx(pid) {
            Ok(ctx) => ctx,
            Err(f) => return self.fault(pid, f),
        };
        if let Some(r0) = wake_r0 {
            log::debug!("pid {pid} woken with r0 = x{r0:04X}");
            ctx.state.regs[R0] = r0;
        }
        self.table.set_status(pid, ProcStatus::Active);

        let result = (0..self.flags.budget).try_for_each(|_| self.step(&mut ctx));
        match result {
            Ok(()) | Err(StepBreak::Yield | StepBreak::Blocked) => {
                if let Err(f) = self.store_ctx(&ctx) {
                    self.fault(pid, f);
                }
            },
            Err(StepBreak::Exited) => {},
            Err(StepBreak::Fault(f)) => self.fault(pid, f),
        }
    }

    fn fault(&mut self, pid: u16, fault: Fault) {
        log::warn!("pid {pid} faulted: {fault}");
        self.kill_proc(pid, EXIT_FAULT);
    }

    /// Executes (or discards) one instruction.
    fn step(&mut self, ctx: &mut Ctx) -> Result<(), StepBreak> {
        let ip = ctx.state.regs[IP];

        if ctx.state.skip {
            let first = self.space(ctx).read(ip)?;
            ctx.state.regs[IP] = ip.wrapping_add(instr_len(first) as u16);
            ctx.state.skip = false;
            return Ok(());
        }

        let instr = self.fetch(ctx, ip)?;
        ctx.state.regs[IP] = ip.wrapping_add(instr.len() as u16);
        self.table.count(ctx.pid);

        match instr {
            Instr::Mem(MemInstr::StoreByte { addr, src }) => {
                let (a, v) = (ctx.state.regs[addr], ctx.state.regs[src]);
                self.space(ctx).write(a, v as u8)?;
            },
            Instr::Mem(MemInstr::LoadByte { dst, addr }) => {
                let a = ctx.state.regs[addr];
                let v = self.space(ctx).read(a)?;
                ctx.state.regs[dst] = u16::from(v);
            },
            Instr::Alu(op) => self.alu(ctx, op)?,
            Instr::Misc(MiscInstr::Nop) => {},
            Instr::Misc(MiscInstr::Syscall) => self.syscall(ctx)?,
            Instr::Misc(MiscInstr::ClearInstrCache) => ctx.cache.clear(),
            Instr::Misc(MiscInstr::Set8(d, v)) => ctx.state.regs[d] = u16::from(v),
            Instr::Misc(MiscInstr::Set16(d, v)) => ctx.state.regs[d] = v,
        }

        Ok(())
    }

    fn alu(&mut self, ctx: &mut Ctx, op: AluInstr) -> Result<(), Fault> {
        let r = ctx.state.regs;
        let (dst, result) = match op {
            AluInstr::Add(d, a, b) => (d, r[a].wrapping_add(r[b])),
            AluInstr::Sub(d, a, b) => (d, r[a].wrapping_sub(r[b])),
            AluInstr::Mul(d, a, b) => (d, r[a].wrapping_mul(r[b])),
            AluInstr::Div(d, a, b) => (d, r[a].checked_div(r[b]).ok_or(Fault::DivideByZero)?),
            AluInstr::Xor(d, a, b) => (d, r[a] ^ r[b]),
            AluInstr::Or(d, a, b)  => (d, r[a] | r[b]),
            AluInstr::And(d, a, b) => (d, r[a] & r[b]),
            AluInstr::Not(d, a)    => (d, !r[a]),
            AluInstr::Cmp(d, a, b) => (d, cmp_flags::compare(r[a], r[b])),
            AluInstr::Shl(d, a, b) => (d, r[a].checked_shl(u32::from(r[b])).unwrap_or(0)),
            AluInstr::Shr(d, a, b) => (d, r[a].checked_shr(u32::from(r[b])).unwrap_or(0)),
            AluInstr::Inc(d, s)    => (d, r[d].wrapping_add(u16::from(s.get()))),
            AluInstr::Dec(d, s)    => (d, r[d].wrapping_sub(u16::from(s.get()))),
            AluInstr::Load16(d, a) => (d, self.space(ctx).read16(r[a])?),
            AluInstr::Store16(a, s) => return self.space(ctx).write16(r[a], r[s]),
            AluInstr::Skip(s, bit) => {
                if r[s] & (1 << bit) != 0 {
                    ctx.state.skip = true;
                }
                return Ok(());
            },
        };

        ctx.state.regs[dst] = result;
        Ok(())
    }

    fn fetch(&mut self, ctx: &mut Ctx, ip: u16) -> Result<Instr, Fault> {
        let mut space = self.space(ctx);

        let first = space.read(ip)?;
        let mut bytes = [first, 0, 0];
        for (i, b) in bytes.iter_mut().enumerate().take(instr_len(first)).skip(1) {
            *b = space.read(ip.wrapping_add(i as u16))?;
        }

        Instr::decode(&bytes).map_err(Fault::IllegalInstr)
    }

    fn space<'a>(&'a mut self, ctx: &'a mut Ctx) -> AddrSpace<'a> {
        AddrSpace {
            fs: &mut self.fs,
            filler: &mut self.filler,
            limit: self.flags.ram_limit,
            prog: ctx.prog,
            data: ctx.data,
            data_path: &ctx.data_path,
            data_len: &mut ctx.state.ram_len,
            cache: &mut ctx.cache,
        }
    }

    fn proc_path(&self, pid: u16) -> String {
        path::join(&self.flags.tmp_dir, &format!("proc{pid}"))
    }

    fn load_ctx(&mut self, pid: u16) -> Result<Ctx, Fault> {
        let rec = self.table.get(pid)
            .filter(|r| r.is_live())
            .ok_or(Fault::StateCorrupt)?;
        let (prog, data) = (rec.prog, rec.state_fd);

        Ok(Ctx {
            pid,
            prog,
            data,
            data_path: self.proc_path(pid),
            state: ProcState::load(&mut self.fs, data)?,
            cache: InstrCache::default(),
        })
    }

    fn store_ctx(&mut self, ctx: &Ctx) -> Result<(), Fault> {
        ctx.state.store(&mut self.fs, ctx.data)
    }

    /// Loads another process, applies `f` to it, and stores it back.
    ///
    /// If the process can't be loaded or stored, it is killed.
    fn with_ctx<T>(&mut self, pid: u16, f: impl FnOnce(&mut Self, &mut Ctx) -> Result<T, Fault>) -> Option<T> {
        let result = self.load_ctx(pid).and_then(|mut ctx| {
            let value = f(self, &mut ctx)?;
            self.store_ctx(&ctx)?;
            Ok(value)
        });

        match result {
            Ok(value) => Some(value),
            Err(fault) => {
                self.fault(pid, fault);
                None
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use crate::ast::instr::{AluInstr, Step};
    use crate::ast::reg_consts::{R0, R1, R2, R3, R4, R5, IP};
    use crate::ast::instr::cmp_flags;
    use crate::fs::FileSystem;
    use crate::kernel::state::STATE_LEN;

    use super::syscall::{EXIT_FAULT, WAIT_TIMEOUT};
    use super::testing::{boot, boot_with, Prog};
    use super::{KernelFlags, ProcStatus, PROC_MAX};

    #[test]
    fn test_exit_scenario() {
        let prog = Prog::new()
            .set(R1, 7)
            .sys(0)
            .build();
        let mut b = boot(&[("/bin/init", prog)]);
        let pid = b.kernel.spawn("/bin/init").unwrap();

        b.kernel.tick();
        assert_eq!(b.kernel.live_count(), 0);
        assert_eq!(b.kernel.exit_status(pid), Some(7));
        assert!(!b.kernel.fs().exists("/tmp/proc0"));
    }

    #[test]
    fn test_budget() {
        let mut p = Prog::new();
        for _ in 0..20 {
            p.inc(R1, 1);
        }
        p.spin();
        let mut b = boot(&[("/bin/p", p.build())]);
        b.kernel.spawn("/bin/p").unwrap();

        b.kernel.tick();
        assert_eq!(b.kernel.state(0).unwrap().regs[R1], 8);
        assert_eq!(b.kernel.instruction_counts()[0], 8);
        b.kernel.tick();
        assert_eq!(b.kernel.state(0).unwrap().regs[R1], 16);
    }

    #[test]
    fn test_counter_reset() {
        let prog = Prog::new().spin().build();
        let flags = KernelFlags { counter_reset_ticks: 3, ..Default::default() };
        let mut b = boot_with(flags, &[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();

        b.kernel.tick();
        b.kernel.tick();
        assert_eq!(b.kernel.instruction_counts()[0], 16);
        b.kernel.tick();
        assert_eq!(b.kernel.instruction_counts()[0], 8);
        assert_eq!(b.kernel.instruction_counts()[1..], [0; PROC_MAX - 1]);
    }

    #[test]
    fn test_alu() {
        let prog = Prog::new()
            .set(R1, 100)
            .set(R2, 7)
            .alu(AluInstr::Div(R3, R1, R2))
            .alu(AluInstr::Sub(R4, R2, R1))
            .alu(AluInstr::Shl(R5, R2, R2))
            .alu(AluInstr::Not(R1, R1))
            .alu(AluInstr::Dec(R2, Step::new(64).unwrap()))
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let regs = b.kernel.state(0).unwrap().regs;
        assert_eq!(regs[R3], 14);
        assert_eq!(regs[R4], 7u16.wrapping_sub(100));
        assert_eq!(regs[R5], 7 << 7);
        assert_eq!(regs[R1], !100);
        assert_eq!(regs[R2], 7u16.wrapping_sub(64));
    }

    #[test]
    fn test_divide_by_zero() {
        let prog = Prog::new()
            .set(R1, 1)
            .alu(AluInstr::Div(R3, R1, R2))
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }

    #[test]
    fn test_skip() {
        let prog = Prog::new()
            .set(R1, 0b1)
            .alu(AluInstr::Skip(R1, 0))
            .set(R2, 9)
            .set(R3, 5)
            .alu(AluInstr::Skip(R1, 1))
            .set(R4, 6)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let st = b.kernel.state(0).unwrap();
        assert_eq!(st.regs[R2], 0);
        assert_eq!(st.regs[R3], 5);
        assert_eq!(st.regs[R4], 6);
        assert!(!st.skip);
        // the skipped instruction counts against the budget, not the counter
        assert_eq!(b.kernel.instruction_counts()[0], 7);
    }

    #[test]
    fn test_skip_on_compare() {
        let prog = Prog::new()
            .set(R1, 3)
            .set(R2, 3)
            .alu(AluInstr::Cmp(R3, R1, R2))
            .alu(AluInstr::Skip(R3, cmp_flags::NE))
            .set(R4, 1)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        assert_eq!(b.kernel.state(0).unwrap().regs[R4], 1);
    }

    #[test]
    fn test_memory_roundtrip() {
        for k in [0u16, 1, 100, 0x7FFF] {
            let prog = Prog::new()
                .set(R1, 0x8000 + k)
                .set(R2, 0x5A)
                .store(R1, R2)
                .load(R3, R1)
                .spin()
                .build();
            let mut b = boot(&[("/bin/p", prog)]);
            b.kernel.spawn("/bin/p").unwrap();
            b.kernel.tick();

            assert_eq!(b.kernel.state(0).unwrap().regs[R3], 0x5A, "k = {k}");
        }
    }

    #[test]
    fn test_memory_words() {
        let prog = Prog::new()
            .set(R1, 0x8004)
            .set(R2, 0xA1B2)
            .alu(AluInstr::Store16(R1, R2))
            .alu(AluInstr::Load16(R3, R1))
            .load(R4, R1)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let st = b.kernel.state(0).unwrap();
        assert_eq!((st.regs[R3], st.regs[R4]), (0xA1B2, 0xA1));
        let data = &b.kernel.fs().contents("/tmp/proc0").unwrap()[STATE_LEN as usize..];
        assert_eq!(&data[4..6], &[0xA1, 0xB2]);
    }

    #[test]
    fn test_word_store_across_split_faults() {
        let prog = Prog::new()
            .set(R1, 0xFFFF)
            .alu(AluInstr::Store16(R1, R1))
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        // the low byte lands on x0000
        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }

    #[test]
    fn test_read_before_write_faults() {
        let prog = Prog::new()
            .set(R2, 0x8000)
            .load(R1, R2)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }

    #[test]
    fn test_write_program_region_faults() {
        let prog = Prog::new()
            .set(R2, 0x10)
            .store(R2, R2)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
        assert_eq!(b.kernel.live_count(), 0);
    }

    #[test]
    fn test_run_off_program_faults() {
        let prog = Prog::new().set(R1, 1).build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();

        assert_eq!(b.kernel.run_until_idle(10), 1);
        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }

    #[test]
    fn test_illegal_instruction() {
        let mut b = boot(&[("/bin/p", vec![0xC0, 0x85])]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
        assert_eq!(b.kernel.instruction_counts()[0], 0);
    }

    #[test]
    fn test_jump_via_ip() {
        let mut p = Prog::new();
        p.set(R1, 1);
        let target = p.here() + 5;
        p.jump(target)   // 3 bytes
            .set(R2, 1)  // 2 bytes, jumped over
            .set(R3, 1)
            .spin();
        let mut b = boot(&[("/bin/p", p.build())]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let st = b.kernel.state(0).unwrap();
        assert_eq!((st.regs[R2], st.regs[R3]), (0, 1));
        assert_eq!(st.regs[IP], target + 2);
    }

    #[test]
    fn test_waitpid_timeout() {
        let waiter = Prog::new()
            .set(R1, 1)
            .set(R2, 5)
            .sys(6)
            .spin()
            .build();
        let sleeper = Prog::new().spin().build();
        let mut b = boot(&[("/bin/waiter", waiter), ("/bin/sleeper", sleeper)]);
        b.kernel.spawn("/bin/waiter").unwrap();
        b.kernel.spawn("/bin/sleeper").unwrap();

        b.kernel.tick();
        assert_eq!(b.kernel.status(0), Some(ProcStatus::WaitingOnProcess { pid: 1, deadline: Some(5) }));

        b.clock.set(4);
        b.kernel.tick();
        assert!(matches!(b.kernel.status(0), Some(ProcStatus::WaitingOnProcess { .. })));

        b.clock.set(5);
        b.kernel.tick();
        assert_eq!(b.kernel.status(0), Some(ProcStatus::Active));
        assert_eq!(b.kernel.state(0).unwrap().regs[R0], WAIT_TIMEOUT);
    }

    #[test]
    fn test_bad_state_kills() {
        let prog = Prog::new().spin().build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();

        b.kernel.fs_mut().resize("/tmp/proc0", 3);
        b.kernel.tick();
        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }
}
