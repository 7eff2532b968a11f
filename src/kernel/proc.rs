//! The process table and process lifecycle (new, fork, exec, kill).

use crate::ast::reg_consts::{IP, R0};
use crate::fs::{path, FileSystem, Handle};

use super::mem::InstrCache;
use super::state::{Env, ProcState, ARGV_MAX, STATE_LEN};
use super::{Ctx, Fault, Kernel, SpawnErr, PROC_MAX};

/// The lifecycle state of a process table slot.
#[derive(Debug, Default, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ProcStatus {
    /// The slot holds no process.
    #[default]
    Unused,
    /// The process runs on every tick.
    Active,
    /// The process waits for another process to die.
    WaitingOnProcess {
        /// The process being waited on.
        pid: u16,
        /// Monotonic second at which the wait times out, if any.
        deadline: Option<u32>
    },
    /// The process waits for a handle to have data.
    WaitingOnRead {
        /// The handle being read.
        fd: Handle
    },
}

#[derive(Debug, Default, Clone, Copy)]
pub(super) struct ProcRecord {
    pub status: ProcStatus,
    pub counter: u16,
    pub prog: Handle,
    pub state_fd: Handle,
    pub last_exit: Option<u16>,
}
impl ProcRecord {
    pub fn is_live(&self) -> bool {
        self.status != ProcStatus::Unused
    }
}

/// Fixed-capacity table of processes, indexed by pid.
#[derive(Debug)]
pub(super) struct ProcTable {
    slots: [ProcRecord; PROC_MAX],
    init_used: bool,
}
impl ProcTable {
    pub fn new() -> Self {
        Self { slots: [ProcRecord::default(); PROC_MAX], init_used: false }
    }

    pub fn get(&self, pid: u16) -> Option<&ProcRecord> {
        self.slots.get(usize::from(pid))
    }
    fn get_mut(&mut self, pid: u16) -> Option<&mut ProcRecord> {
        self.slots.get_mut(usize::from(pid))
    }

    pub fn is_live(&self, pid: u16) -> bool {
        self.get(pid).is_some_and(ProcRecord::is_live)
    }

    /// Iterates over the pids of live processes.
    pub fn live(&self) -> impl Iterator<Item = u16> + '_ {
        (0..PROC_MAX as u16).filter(|&pid| self.is_live(pid))
    }

    pub fn set_status(&mut self, pid: u16, status: ProcStatus) {
        if let Some(rec) = self.get_mut(pid) {
            rec.status = status;
        }
    }

    pub fn count(&mut self, pid: u16) {
        if let Some(rec) = self.get_mut(pid) {
            rec.counter = rec.counter.wrapping_add(1);
        }
    }
    pub fn counters(&self) -> [u16; PROC_MAX] {
        std::array::from_fn(|i| self.slots[i].counter)
    }
    pub fn reset_counters(&mut self) {
        for rec in &mut self.slots {
            rec.counter = 0;
        }
    }

    /// Finds a free pid. Slot 0 is only ever handed out once.
    fn alloc(&self) -> Option<u16> {
        let start = match self.init_used {
            true  => 1,
            false => 0,
        };
        (start..PROC_MAX as u16).find(|&pid| !self.is_live(pid))
    }

    /// Checks whether any live process other than `pid` uses `handle` as its program or backing file.
    pub fn handle_in_use(&self, handle: Handle, except: Option<u16>) -> bool {
        self.live()
            .filter(|&p| Some(p) != except)
            .filter_map(|p| self.get(p))
            .any(|r| r.prog == handle || r.state_fd == handle)
    }
}

/// Packs argument strings into a data region, returning the region and each string's offset.
fn pack_argv(args: &[Vec<u8>]) -> (Vec<u8>, [u16; ARGV_MAX]) {
    let mut data = vec![];
    let mut offsets = [0; ARGV_MAX];
    for (slot, arg) in offsets.iter_mut().zip(args) {
        *slot = data.len() as u16;
        data.extend_from_slice(arg);
        data.push(0);
    }
    (data, offsets)
}

impl<F: FileSystem> Kernel<F> {
    /// Creates a process running the program at the given path.
    ///
    /// The process starts with cleared registers, no signal handlers, no stdio handle,
    /// an empty data region, and its working directory set to the program's directory.
    ///
    /// The first process created gets pid 0. After that, pid 0 is never handed out again.
    pub fn spawn(&mut self, program: &str) -> Result<u16, SpawnErr> {
        if !path::is_valid(program) { return Err(SpawnErr::InvalidPath); }
        let program = path::normalise(program);

        let pid = self.table.alloc().ok_or(SpawnErr::TableFull)?;
        if self.fs.is_dir(&program) { return Err(SpawnErr::ProgramNotFound(program)); }
        let prog = self.fs.open(&program).ok_or_else(|| SpawnErr::ProgramNotFound(program.clone()))?;

        let state = ProcState {
            env: Env {
                pwd: path::split(&program).0,
                path: self.flags.default_search_path.clone(),
                argc: 1,
                ..Default::default()
            },
            ..Default::default()
        };

        let state_fd = match self.create_backing(pid, &state, &[]) {
            Ok(fd) => fd,
            Err(e) => {
                self.fs.close(prog);
                return Err(e);
            }
        };

        self.occupy(pid, prog, state_fd);
        log::debug!("spawned pid {pid} running {program}");
        Ok(pid)
    }

    /// Creates and fills a backing file. On failure, nothing is left behind.
    fn create_backing(&mut self, pid: u16, state: &ProcState, data: &[u8]) -> Result<Handle, SpawnErr> {
        let file = self.proc_path(pid);
        let size = STATE_LEN + data.len() as u32;

        if !self.fs.create(&file, size) { return Err(SpawnErr::Storage); }
        let Some(fd) = self.fs.open(&file) else {
            self.fs.delete(&file);
            return Err(SpawnErr::Storage);
        };

        let written = state.store(&mut self.fs, fd).is_ok()
            && self.fs.write(fd, STATE_LEN, data) == data.len();
        if !written {
            self.fs.close(fd);
            self.fs.delete(&file);
            return Err(SpawnErr::Storage);
        }
        Ok(fd)
    }

    fn occupy(&mut self, pid: u16, prog: Handle, state_fd: Handle) {
        if pid == 0 {
            self.table.init_used = true;
        }
        if let Some(rec) = self.table.get_mut(pid) {
            *rec = ProcRecord { status: ProcStatus::Active, counter: 0, prog, state_fd, last_exit: None };
        }
    }

    /// Forks the loaded process, returning the child's pid.
    ///
    /// The child gets a copy of the parent's state (with `r0 = 0`) and data region,
    /// and shares the parent's program handle.
    pub(super) fn fork(&mut self, parent: &Ctx) -> Result<u16, SpawnErr> {
        let pid = self.table.alloc().ok_or(SpawnErr::TableFull)?;

        let mut data = vec![0; usize::from(parent.state.ram_len)];
        if self.fs.read(parent.data, STATE_LEN, &mut data) != data.len() {
            return Err(SpawnErr::Storage);
        }

        let mut state = parent.state.clone();
        state.regs[R0] = 0;
        let state_fd = self.create_backing(pid, &state, &data)?;

        self.occupy(pid, parent.prog, state_fd);
        log::debug!("pid {} forked into pid {pid}", parent.pid);
        Ok(pid)
    }

    /// Finds the program an exec of `name` refers to.
    ///
    /// Absolute paths are used as is and paths with a `/` are relative to the working directory.
    /// Bare names are tried in the working directory, then in each search-path entry.
    fn resolve_program(&self, env: &Env, name: &str) -> Option<String> {
        let candidates: Vec<String> = if name.starts_with('/') {
            vec![path::normalise(name)]
        } else if name.contains('/') {
            vec![path::join(&env.pwd, name)]
        } else {
            std::iter::once(path::join(&env.pwd, name))
                .chain(env.path.split(':').filter(|d| !d.is_empty()).map(|d| path::join(d, name)))
                .collect()
        };

        candidates.into_iter()
            .find(|p| self.fs.exists(p) && !self.fs.is_dir(p))
    }

    /// Replaces the program of the loaded process.
    ///
    /// Returns `Ok(false)` (leaving the process untouched) if the program can't be found or opened.
    /// Failing to write the new arguments is a fault.
    pub(super) fn exec(&mut self, ctx: &mut Ctx, name: &[u8], args: &[Vec<u8>]) -> Result<bool, Fault> {
        let Ok(name) = std::str::from_utf8(name) else { return Ok(false) };
        if !path::is_valid(name) { return Ok(false); }

        let Some(program) = self.resolve_program(&ctx.state.env, name) else { return Ok(false) };
        let Some(prog) = self.fs.open(&program) else { return Ok(false) };

        let old = ctx.prog;
        ctx.prog = prog;
        if let Some(rec) = self.table.get_mut(ctx.pid) {
            rec.prog = prog;
        }
        self.release_prog(ctx.pid, old);
        ctx.cache = InstrCache::default();

        let argv: Vec<_> = std::iter::once(program.clone().into_bytes())
            .chain(args.iter().cloned())
            .take(ARGV_MAX)
            .collect();
        let (data, offsets) = pack_argv(&argv);

        let state = &mut ctx.state;
        state.regs[IP] = 0;
        state.skip = false;
        state.handlers = [0; 4];
        state.env.argc = argv.len() as u8;
        state.env.argv = offsets;
        state.ram_len = data.len() as u16;

        if !self.fs.resize(&ctx.data_path, STATE_LEN + data.len() as u32)
            || self.fs.write(ctx.data, STATE_LEN, &data) != data.len() {
            return Err(Fault::Storage);
        }

        log::debug!("pid {} exec {program}", ctx.pid);
        Ok(true)
    }

    /// Closes a program handle unless another live process still runs it.
    fn release_prog(&mut self, pid: u16, prog: Handle) {
        if !self.table.handle_in_use(prog, Some(pid)) {
            self.fs.close(prog);
        }
    }

    /// Terminates a process with the given exit status.
    ///
    /// This returns false if no process has the given pid.
    /// Unlike the `kill` syscall, this does not give the process a chance to handle the kill.
    pub fn kill(&mut self, pid: u16, status: u16) -> bool {
        self.kill_proc(pid, status)
    }

    pub(super) fn kill_proc(&mut self, pid: u16, status: u16) -> bool {
        let Some(rec) = self.table.get_mut(pid).filter(|r| r.is_live()) else { return false };
        let (prog, state_fd) = (rec.prog, rec.state_fd);
        *rec = ProcRecord { last_exit: Some(status), ..Default::default() };

        self.release_prog(pid, prog);
        self.fs.close(state_fd);
        let file = self.proc_path(pid);
        self.fs.delete(&file);
        log::debug!("pid {pid} exited with status x{status:04X}");

        let waiters: Vec<_> = self.table.live()
            .filter(|&w| matches!(
                self.table.get(w).map(|r| r.status),
                Some(ProcStatus::WaitingOnProcess { pid: target, .. }) if target == pid
            ))
            .collect();
        for w in waiters {
            self.wake(w, status);
        }

        true
    }

    /// Makes a waiting process active with the given result in `r0`.
    pub(super) fn wake(&mut self, pid: u16, r0: u16) {
        let woke = self.with_ctx(pid, |_, ctx| {
            ctx.state.regs[R0] = r0;
            Ok(())
        });
        if woke.is_some() {
            log::debug!("pid {pid} woken with r0 = x{r0:04X}");
            self.table.set_status(pid, ProcStatus::Active);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::instr::{AluInstr, cmp_flags};
    use crate::ast::reg_consts::{R0, R1, R2, R3, R4, R5, R6};
    use crate::fs::FileSystem;
    use crate::kernel::state::STATE_LEN;
    use crate::kernel::syscall::EXIT_FAULT;
    use crate::kernel::testing::{boot, Prog};
    use crate::kernel::{ProcStatus, SpawnErr, PROC_MAX};

    use super::pack_argv;

    #[test]
    fn test_spawn() {
        let mut b = boot(&[("/usr/bin/prog", Prog::new().spin().build())]);
        let pid = b.kernel.spawn("/usr/bin/../bin/prog").unwrap();
        assert_eq!(pid, 0);

        let st = b.kernel.state(pid).unwrap();
        assert_eq!(st.env.pwd, "/usr/bin");
        assert_eq!(st.env.path, "/bin");
        assert_eq!(st.env.argc, 1);
        assert!(!st.env.stdio.is_valid());
        assert_eq!(st.ram_len, 0);
        assert_eq!(b.kernel.status(pid), Some(ProcStatus::Active));
        assert_eq!(b.kernel.fs().len("/tmp/proc0"), Some(STATE_LEN));
    }

    #[test]
    fn test_spawn_errors() {
        let mut b = boot(&[("/bin/p", Prog::new().spin().build())]);
        assert_eq!(b.kernel.spawn(""), Err(SpawnErr::InvalidPath));
        assert_eq!(b.kernel.spawn("/bin/nope"), Err(SpawnErr::ProgramNotFound("/bin/nope".to_string())));
        assert_eq!(b.kernel.spawn("/bin"), Err(SpawnErr::ProgramNotFound("/bin".to_string())));

        for _ in 0..PROC_MAX {
            b.kernel.spawn("/bin/p").unwrap();
        }
        assert_eq!(b.kernel.spawn("/bin/p"), Err(SpawnErr::TableFull));
    }

    #[test]
    fn test_spawn_rollback() {
        let mut b = boot(&[("/bin/p", Prog::new().spin().build())]);
        b.kernel.fs_mut().delete("/tmp");
        let handles = b.kernel.fs().open_handles();

        assert_eq!(b.kernel.spawn("/bin/p"), Err(SpawnErr::Storage));
        assert_eq!(b.kernel.fs().open_handles(), handles);
        assert_eq!(b.kernel.live_count(), 0);
    }

    #[test]
    fn test_pid0_not_reused() {
        let prog = Prog::new().spin().build();
        let mut b = boot(&[("/bin/p", prog)]);
        assert_eq!(b.kernel.spawn("/bin/p"), Ok(0));
        assert!(b.kernel.kill(0, 1));
        assert!(!b.kernel.kill(0, 1));
        assert_eq!(b.kernel.spawn("/bin/p"), Ok(1));
        assert_eq!(b.kernel.exit_status(0), Some(1));
    }

    #[test]
    fn test_fork_scenario() {
        let prog = Prog::new().sys(4).spin().build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();

        b.kernel.tick();
        assert_eq!(b.kernel.live_count(), 2);
        assert_eq!(b.kernel.state(0).unwrap().regs[R0], 1);
        assert_eq!(b.kernel.state(1).unwrap().regs[R0], 0);
    }

    fn fork_then_diverge() -> Vec<u8> {
        let mut p = Prog::new();
        p.set(R1, 0x8000)
            .set(R2, 0x11)
            .store(R1, R2)
            .sys(4)
            .set(R3, 0)
            .alu(AluInstr::Cmp(R4, R0, R3))
            .alu(AluInstr::Skip(R4, cmp_flags::EQ))
            .spin()
            .set(R2, 0x22)
            .store(R1, R2)
            .spin();
        p.build()
    }

    #[test]
    fn test_fork_copies_state() {
        let prog = Prog::new()
            .set(R1, 0x8000)
            .set(R2, 0x11)
            .store(R1, R2)
            .sys(4)
            .spin()
            .build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let parent = b.kernel.state(0).unwrap();
        let child = b.kernel.state(1).unwrap();
        let mut expected = parent.clone();
        expected.regs[R0] = 0;
        assert_eq!(child, expected);

        let fs = b.kernel.fs();
        let (pdata, cdata) = (fs.contents("/tmp/proc0").unwrap(), fs.contents("/tmp/proc1").unwrap());
        assert_eq!(pdata[STATE_LEN as usize..], cdata[STATE_LEN as usize..]);
    }

    #[test]
    fn test_fork_isolation() {
        let mut b = boot(&[("/bin/p", fork_then_diverge())]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();
        b.kernel.tick();

        let fs = b.kernel.fs();
        assert_eq!(fs.contents("/tmp/proc0").unwrap()[STATE_LEN as usize], 0x11);
        assert_eq!(fs.contents("/tmp/proc1").unwrap()[STATE_LEN as usize], 0x22);
    }

    #[test]
    fn test_shared_program_handle() {
        let prog = Prog::new().sys(4).spin().build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let prog_fd = b.kernel.table.get(0).unwrap().prog;
        assert_eq!(b.kernel.table.get(1).unwrap().prog, prog_fd);

        b.kernel.kill(0, 0);
        assert_eq!(b.kernel.fs().path_of(prog_fd).as_deref(), Some("/bin/p"));
        b.kernel.tick();
        assert_eq!(b.kernel.status(1), Some(ProcStatus::Active));

        b.kernel.kill(1, 0);
        assert_eq!(b.kernel.fs().path_of(prog_fd), None);
        assert_eq!(b.kernel.fs().open_handles(), 0);
    }

    #[test]
    fn test_exec_after_fork_keeps_sibling_program() {
        let mut p = Prog::new();
        p.sys(4)
            .set(R3, 0)
            .alu(AluInstr::Cmp(R4, R0, R3))
            .alu(AluInstr::Skip(R4, cmp_flags::EQ))
            .spin()
            .put_str(0x8000, "other", R5, R6)
            .set(R1, 0x8000)
            .set(R2, 0)
            .set(R3, 0)
            .set(R4, 0)
            .sys(5)
            .spin();
        let mut b = boot(&[("/bin/p", p.build()), ("/bin/other", Prog::new().spin().build())]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.flags.budget = 255;
        b.kernel.tick();

        let prog_of = |b: &crate::kernel::testing::Boot, pid| {
            b.kernel.fs().path_of(b.kernel.table.get(pid).unwrap().prog)
        };
        assert_eq!(prog_of(&b, 0).as_deref(), Some("/bin/p"));
        assert_eq!(prog_of(&b, 1).as_deref(), Some("/bin/other"));

        b.kernel.tick();
        assert_eq!(b.kernel.status(0), Some(ProcStatus::Active));
        assert_eq!(b.kernel.status(1), Some(ProcStatus::Active));

        b.kernel.kill(0, 0);
        b.kernel.kill(1, 0);
        assert_eq!(b.kernel.fs().open_handles(), 0);
    }

    #[test]
    fn test_exec_storage_failure_faults() {
        let prog = Prog::new()
            .put_str(0x8000, "other", R5, R6)
            .put_str(0x8008, "aaaaaaaaaaaaaaaaaaaa", R5, R6)
            .set(R1, 0x8000)
            .set(R2, 0x8008)
            .set(R3, 0x8008)
            .set(R4, 0x8008)
            .sys(5)
            .spin()
            .build();
        let other = Prog::new().spin().build();
        let used = prog.len() as u32 + other.len() as u32 + STATE_LEN;

        let mut b = boot(&[("/bin/p", prog), ("/bin/other", other)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.flags.budget = 255;
        // room for the argument strings, but not for the packed argv
        b.kernel.fs_mut().set_capacity(Some(used + 40));
        b.kernel.tick();

        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
        assert!(!b.kernel.fs().exists("/tmp/proc0"));
        assert_eq!(b.kernel.fs().open_handles(), 0);
    }

    #[test]
    fn test_kill_wakes_waiters() {
        let waiter = Prog::new().set(R1, 1).sys(6).spin().build();
        let sleeper = Prog::new().spin().build();
        let mut b = boot(&[("/bin/waiter", waiter), ("/bin/sleeper", sleeper)]);
        b.kernel.spawn("/bin/waiter").unwrap();
        b.kernel.spawn("/bin/sleeper").unwrap();

        b.kernel.tick();
        assert_eq!(b.kernel.status(0), Some(ProcStatus::WaitingOnProcess { pid: 1, deadline: None }));

        assert!(b.kernel.kill(1, 42));
        assert_eq!(b.kernel.status(0), Some(ProcStatus::Active));
        assert_eq!(b.kernel.state(0).unwrap().regs[R0], 42);

        b.kernel.tick();
        assert_eq!(b.kernel.state(0).unwrap().regs[R0], 42);
    }

    #[test]
    fn test_argv_packing() {
        let (data, offsets) = pack_argv(&[b"/bin/ls".to_vec(), b"-l".to_vec(), vec![]]);
        assert_eq!(data, b"/bin/ls\0-l\0\0");
        assert_eq!(offsets, [0, 8, 11, 0]);
    }
}
