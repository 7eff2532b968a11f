//! System calls.
//!
//! A process calls into the kernel by executing the `syscall` instruction.
//! `r0` selects the call, arguments are passed in `r1` onwards,
//! and the primary result is returned in `r0`.
//!
//! Calls are grouped by hundreds:
//!
//! | range  | group           |
//! |--------|-----------------|
//! | 0..    | process control |
//! | 256..  | file IO         |
//! | 512..  | environment     |
//! | 768..  | time            |
//! | 1024.. | signals         |
//!
//! Soft failures (such as opening a path that doesn't exist) are reported
//! through sentinel values in `r0`. Memory faults while copying arguments
//! in or results out are fatal to the caller.

use crate::ast::reg_consts::{IP, R0, R1, R2, R3, R4};
use crate::fs::{path, FileSystem, Handle};

use super::mem::SPLIT;
use super::signal::Signal;
use super::state::ENV_STR_LEN;
use super::{Ctx, Fault, Kernel, ProcStatus, StepBreak, PROC_MAX};

/// `fork` result when no child could be created.
pub const PID_INVALID: u16 = 0xFFFF;
/// `waitpid` result when the pid names no live process.
pub const WAIT_NO_PROCESS: u16 = 0xFFFF;
/// `waitpid` result when the timeout passed first.
pub const WAIT_TIMEOUT: u16 = 0xFFFE;
/// `waitpid` result when a signal interrupted the wait.
pub const WAIT_INTERRUPTED: u16 = 0xFFFD;
/// Exit status of a process killed by a fault.
pub const EXIT_FAULT: u16 = 0xFFFC;
/// Exit status of a process killed by the `kill` syscall.
pub const EXIT_KILLED: u16 = 0xFFFB;
/// `read` result when a signal interrupted the read.
pub const READ_NO_DATA: u16 = 0;
/// `tryreadbyte` result when no byte is available.
pub const TRY_READ_NONE: u16 = 256;

/// Syscall numbers.
pub mod nr {
    #![allow(missing_docs)]

    pub const EXIT: u16 = 0;
    pub const GETPID: u16 = 1;
    pub const GETARGC: u16 = 2;
    pub const GETARGVN: u16 = 3;
    pub const FORK: u16 = 4;
    pub const EXEC: u16 = 5;
    pub const WAITPID: u16 = 6;
    pub const GETPIDPATH: u16 = 7;
    pub const GETPIDSTATE: u16 = 8;
    pub const GETALLCPUCOUNTS: u16 = 9;
    pub const KILL: u16 = 10;
    pub const GETPIDRAM: u16 = 11;

    pub const READ: u16 = 256;
    pub const WRITE: u16 = 257;
    pub const OPEN: u16 = 258;
    pub const CLOSE: u16 = 259;
    pub const DIRGETCHILDN: u16 = 260;
    pub const GETPATH: u16 = 261;
    pub const RESIZEFILE: u16 = 262;
    pub const FILEGETLEN: u16 = 263;
    pub const TRYREADBYTE: u16 = 264;
    pub const ISDIR: u16 = 265;
    pub const FILEEXISTS: u16 = 266;
    pub const DELETE: u16 = 267;

    pub const ENVGETSTDIOFD: u16 = 512;
    pub const ENVSETSTDIOFD: u16 = 513;
    pub const ENVGETPWD: u16 = 514;
    pub const ENVSETPWD: u16 = 515;
    pub const ENVGETPATH: u16 = 516;
    pub const ENVSETPATH: u16 = 517;

    pub const TIMEMONOTONIC: u16 = 768;

    pub const REGISTERSIGNALHANDLER: u16 = 1024;
    pub const SENDSIGNAL: u16 = 1025;
}

/// Longest string copied in from process memory, including room to detect overlong strings.
const STR_MAX: usize = path::PATH_MAX + 1;

fn flag(b: bool) -> u16 {
    u16::from(b)
}

impl<F: FileSystem> Kernel<F> {
    pub(super) fn syscall(&mut self, ctx: &mut Ctx) -> Result<(), StepBreak> {
        let regs = ctx.state.regs;
        let (n, a1, a2, a3, a4) = (regs[R0], regs[R1], regs[R2], regs[R3], regs[R4]);
        log::trace!("pid {} syscall {n} ({a1:04X}, {a2:04X}, {a3:04X}, {a4:04X})", ctx.pid);

        let result = match n {
            nr::EXIT => {
                self.kill_proc(ctx.pid, a1);
                return Err(StepBreak::Exited);
            },
            nr::GETPID => ctx.pid,
            nr::GETARGC => u16::from(ctx.state.env.argc),
            nr::GETARGVN => self.getargvn(ctx, a1, a2)?,
            nr::FORK => {
                let child = self.fork(ctx).unwrap_or_else(|e| {
                    log::debug!("pid {} fork failed: {e}", ctx.pid);
                    PID_INVALID
                });
                ctx.state.regs[R0] = child;
                return Err(StepBreak::Yield);
            },
            nr::EXEC => {
                let name = self.space(ctx).read_cstr(a1, STR_MAX)?;
                let mut args = vec![];
                for addr in [a2, a3, a4].into_iter().filter(|&a| a != 0) {
                    args.push(self.space(ctx).read_cstr(addr, STR_MAX)?);
                }

                match self.exec(ctx, &name, &args)? {
                    true  => return Err(StepBreak::Yield),
                    false => 0,
                }
            },
            nr::WAITPID => return self.waitpid(ctx, a1, a2),
            nr::GETPIDPATH => {
                let found = self.table.get(a1)
                    .filter(|r| r.is_live())
                    .and_then(|r| self.fs.path_of(r.prog));
                self.write_result_str(ctx, a2, found)?
            },
            nr::GETPIDSTATE => {
                let state = match self.table.get(a1).map(|r| r.status) {
                    Some(ProcStatus::Active) => Some("active"),
                    Some(ProcStatus::WaitingOnProcess { .. }) => Some("waitpid"),
                    Some(ProcStatus::WaitingOnRead { .. }) => Some("waitread"),
                    Some(ProcStatus::Unused) | None => None,
                };
                self.write_result_str(ctx, a2, state.map(String::from))?
            },
            nr::GETALLCPUCOUNTS => {
                let counts = self.table.counters();
                let mut space = self.space(ctx);
                for (i, c) in counts.into_iter().enumerate() {
                    space.write16(a1.wrapping_add(2 * i as u16), c)?;
                }
                ctx.state.regs[R0]
            },
            nr::KILL => {
                self.kill_syscall(ctx, a1)?;
                ctx.state.regs[R0]
            },
            nr::GETPIDRAM => match self.table.is_live(a1) {
                true => {
                    let file = self.proc_path(a1);
                    self.fs.len(&file).map_or(0, |n| u16::try_from(n).unwrap_or(u16::MAX))
                },
                false => 0,
            },

            nr::READ => return self.read_handle(ctx, Handle(a1), a2, a3, a4),
            nr::WRITE => {
                let fd = Handle(a1);
                let mut count = 0;
                while count < a4 {
                    let b = self.space(ctx).read(a3.wrapping_add(count))?;
                    if self.fs.write(fd, u32::from(a2) + u32::from(count), &[b]) != 1 { break; }
                    count += 1;
                }
                count
            },
            nr::OPEN => match self.read_path(ctx, a1)? {
                Some(p) => self.fs.open(&p).unwrap_or(Handle::INVALID).get(),
                None => Handle::INVALID.get(),
            },
            nr::CLOSE => {
                let fd = Handle(a1);
                if !self.table.handle_in_use(fd, None) {
                    self.fs.close(fd);
                }
                ctx.state.regs[R0]
            },
            nr::DIRGETCHILDN => {
                let child = self.fs.child(Handle(a1), a2);
                self.write_result_str(ctx, a3, child)?
            },
            nr::GETPATH => {
                let p = self.fs.path_of(Handle(a1));
                self.write_result_str(ctx, a2, p)?
            },
            nr::RESIZEFILE => match self.read_path(ctx, a1)? {
                Some(p) if self.fs.exists(&p) => flag(self.fs.resize(&p, u32::from(a2))),
                Some(p) => flag(self.fs.create(&p, u32::from(a2))),
                None => 0,
            },
            nr::FILEGETLEN => match self.read_path(ctx, a1)? {
                Some(p) => self.fs.len(&p).map_or(0, |n| u16::try_from(n).unwrap_or(u16::MAX)),
                None => 0,
            },
            nr::TRYREADBYTE => {
                let fd = Handle(a1);
                let mut buf = [0];
                match self.fs.can_read(fd) && self.fs.read(fd, 0, &mut buf) == 1 {
                    true  => u16::from(buf[0]),
                    false => TRY_READ_NONE,
                }
            },
            nr::ISDIR => match self.read_path(ctx, a1)? {
                Some(p) => flag(self.fs.is_dir(&p)),
                None => 0,
            },
            nr::FILEEXISTS => match self.read_path(ctx, a1)? {
                Some(p) => flag(self.fs.exists(&p)),
                None => 0,
            },
            nr::DELETE => match self.read_path(ctx, a1)? {
                Some(p) => flag(self.fs.delete(&p)),
                None => 0,
            },

            nr::ENVGETSTDIOFD => ctx.state.env.stdio.get(),
            nr::ENVSETSTDIOFD => {
                ctx.state.env.stdio = Handle(a1);
                ctx.state.regs[R0]
            },
            nr::ENVGETPWD => {
                let pwd = ctx.state.env.pwd.clone();
                self.space(ctx).write_cstr(a1, pwd.as_bytes())?;
                ctx.state.regs[R0]
            },
            nr::ENVSETPWD => {
                if let Some(p) = self.read_path(ctx, a1)?.filter(|p| p.len() < ENV_STR_LEN) {
                    ctx.state.env.pwd = p;
                }
                ctx.state.regs[R0]
            },
            nr::ENVGETPATH => {
                let search = ctx.state.env.path.clone();
                self.space(ctx).write_cstr(a1, search.as_bytes())?;
                ctx.state.regs[R0]
            },
            nr::ENVSETPATH => {
                let raw = self.space(ctx).read_cstr(a1, ENV_STR_LEN)?;
                if raw.len() < ENV_STR_LEN {
                    ctx.state.env.path = String::from_utf8_lossy(&raw).into_owned();
                }
                ctx.state.regs[R0]
            },

            // truncated to 16 bits
            nr::TIMEMONOTONIC => self.clock.now_secs() as u16,

            nr::REGISTERSIGNALHANDLER => {
                if let Ok(sig) = Signal::try_from(a1) {
                    ctx.state.handlers[sig.index()] = a2;
                }
                ctx.state.regs[R0]
            },
            nr::SENDSIGNAL => match Signal::try_from(a2) {
                Ok(sig) if a1 == ctx.pid => flag(self.deliver(ctx, sig)?),
                Ok(sig) => flag(self.send_signal(a1, sig)),
                Err(()) => 0,
            },

            _ => return Err(Fault::UnknownSyscall(n).into()),
        };

        ctx.state.regs[R0] = result;
        Ok(())
    }

    /// Reads a path argument and resolves it against the working directory.
    ///
    /// Returns `None` if the string isn't a valid path.
    fn read_path(&mut self, ctx: &mut Ctx, addr: u16) -> Result<Option<String>, Fault> {
        let raw = self.space(ctx).read_cstr(addr, STR_MAX)?;
        let Ok(s) = std::str::from_utf8(&raw) else { return Ok(None) };

        match path::is_valid(s) {
            true  => Ok(Some(path::join(&ctx.state.env.pwd, s))),
            false => Ok(None),
        }
    }

    /// Writes an optional string result, returning the found flag.
    fn write_result_str(&mut self, ctx: &mut Ctx, addr: u16, s: Option<String>) -> Result<u16, Fault> {
        match s {
            Some(s) => {
                self.space(ctx).write_cstr(addr, s.as_bytes())?;
                Ok(1)
            },
            None => Ok(0),
        }
    }

    fn getargvn(&mut self, ctx: &mut Ctx, n: u16, buf: u16) -> Result<u16, Fault> {
        let env = &ctx.state.env;
        if n >= u16::from(env.argc) { return Ok(0); }
        let Some(&offset) = env.argv.get(usize::from(n)) else { return Ok(0) };

        // An argument may sit at the very end of the region (the empty argument of a fresh process).
        let mut arg = vec![];
        let mut i = offset;
        while i < ctx.state.ram_len && arg.len() < STR_MAX {
            let b = self.space(ctx).read(SPLIT + i)?;
            if b == 0 { break; }
            arg.push(b);
            i += 1;
        }

        self.space(ctx).write_cstr(buf, &arg)?;
        Ok(arg.len() as u16)
    }

    fn waitpid(&mut self, ctx: &mut Ctx, pid: u16, timeout: u16) -> Result<(), StepBreak> {
        if pid == ctx.pid || !self.table.is_live(pid) {
            ctx.state.regs[R0] = WAIT_NO_PROCESS;
            return Ok(());
        }

        let deadline = (timeout != 0).then(|| self.clock.now_secs().saturating_add(u32::from(timeout)));
        self.table.set_status(ctx.pid, ProcStatus::WaitingOnProcess { pid, deadline });
        log::debug!("pid {} waiting on pid {pid}", ctx.pid);
        Err(StepBreak::Blocked)
    }

    fn read_handle(&mut self, ctx: &mut Ctx, fd: Handle, offset: u16, buf: u16, len: u16) -> Result<(), StepBreak> {
        if self.fs.path_of(fd).is_none() {
            ctx.state.regs[R0] = 0;
            return Ok(());
        }
        if len != 0 && !self.fs.can_read(fd) {
            // Run the syscall again once data is available.
            ctx.state.regs[IP] = ctx.state.regs[IP].wrapping_sub(1);
            self.table.set_status(ctx.pid, ProcStatus::WaitingOnRead { fd });
            log::debug!("pid {} waiting to read {fd}", ctx.pid);
            return Err(StepBreak::Blocked);
        }

        let mut count = 0;
        while count < len {
            let mut b = [0];
            if self.fs.read(fd, u32::from(offset) + u32::from(count), &mut b) != 1 { break; }
            self.space(ctx).write(buf.wrapping_add(count), b[0])?;
            count += 1;
        }

        ctx.state.regs[R0] = count;
        Ok(())
    }

    /// Kills another process (or the caller), giving it a chance to handle [`Signal::Suicide`] first.
    fn kill_syscall(&mut self, ctx: &mut Ctx, pid: u16) -> Result<(), StepBreak> {
        if pid == 0 || usize::from(pid) >= PROC_MAX { return Ok(()); }

        if pid == ctx.pid {
            if self.deliver(ctx, Signal::Suicide)? {
                ctx.state.handlers[Signal::Suicide.index()] = 0;
                return Ok(());
            }
            self.kill_proc(pid, EXIT_KILLED);
            return Err(StepBreak::Exited);
        }

        let handled = self.table.is_live(pid) && self.with_ctx(pid, |k, target| {
            let handled = k.deliver(target, Signal::Suicide)?;
            if handled {
                target.state.handlers[Signal::Suicide.index()] = 0;
            }
            Ok(handled)
        }).unwrap_or(true);

        if !handled {
            self.kill_proc(pid, EXIT_KILLED);
        }
        Ok(())
    }
}
