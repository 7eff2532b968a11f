//! Signals.
//!
//! A signal redirects a process into a handler it registered earlier
//! (with the `registersignalhandler` syscall). Delivery works like a call:
//! the current instruction pointer is pushed as a 16-bit big-endian value at
//! the address in `r6`, `r6` is advanced by 2, and execution continues at the handler.
//!
//! Signals for which the process has no handler are dropped.
//!
//! A waiting process that receives a signal stops waiting. A `waitpid` then returns
//! [`WAIT_INTERRUPTED`] and a `read` returns [`READ_NO_DATA`].

use crate::ast::reg_consts::{IP, R0, R6};
use crate::fs::FileSystem;

use super::syscall::{READ_NO_DATA, WAIT_INTERRUPTED};
use super::{Ctx, Fault, Kernel, ProcStatus};

/// Kinds of signals.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum Signal {
    /// Interrupt, typically requested by a user.
    Interrupt = 0,
    /// Program-defined signal.
    User1 = 1,
    /// Program-defined signal.
    User2 = 2,
    /// Sent by the `kill` syscall before the process is terminated.
    ///
    /// A process that handles this signal survives the first kill,
    /// but its handler is unregistered so a second kill is final.
    Suicide = 3,
}
impl Signal {
    /// Index of this signal's handler in [`ProcState::handlers`](super::state::ProcState::handlers).
    pub fn index(self) -> usize {
        self as usize
    }
}
impl TryFrom<u16> for Signal {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Signal::Interrupt),
            1 => Ok(Signal::User1),
            2 => Ok(Signal::User2),
            3 => Ok(Signal::Suicide),
            _ => Err(()),
        }
    }
}

impl<F: FileSystem> Kernel<F> {
    /// Sends a signal to a process, returning whether a handler was run.
    ///
    /// If pushing the return address faults, the process is killed.
    pub fn send_signal(&mut self, pid: u16, signal: Signal) -> bool {
        if !self.table.is_live(pid) { return false; }
        self.with_ctx(pid, |k, ctx| k.deliver(ctx, signal))
            .unwrap_or(false)
    }

    /// Redirects a loaded process into its handler for the signal.
    pub(super) fn deliver(&mut self, ctx: &mut Ctx, signal: Signal) -> Result<bool, Fault> {
        let handler = ctx.state.handlers[signal.index()];
        if handler == 0 { return Ok(false); }

        let regs = &mut ctx.state.regs;
        match self.table.get(ctx.pid).map(|r| r.status) {
            Some(ProcStatus::WaitingOnProcess { .. }) => regs[R0] = WAIT_INTERRUPTED,
            Some(ProcStatus::WaitingOnRead { .. }) => {
                // The read was rewound to run again. Step past it instead.
                regs[R0] = READ_NO_DATA;
                regs[IP] = regs[IP].wrapping_add(1);
            },
            _ => {},
        }
        self.table.set_status(ctx.pid, ProcStatus::Active);

        let (ret, sp) = (regs[IP], regs[R6]);
        self.space(ctx).write16(sp, ret)?;

        let regs = &mut ctx.state.regs;
        regs[R6] = sp.wrapping_add(2);
        regs[IP] = handler;
        log::debug!("pid {} took signal {signal:?} at x{handler:04X}", ctx.pid);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use crate::ast::reg_consts::{R0, R1, R2, R3, R6, IP};
    use crate::fs::Handle;
    use crate::kernel::state::STATE_LEN;
    use crate::kernel::syscall::{EXIT_FAULT, READ_NO_DATA, WAIT_INTERRUPTED};
    use crate::kernel::testing::{boot, Prog};
    use crate::kernel::ProcStatus;

    use super::Signal;

    /// Registers a User1 handler, sets up a stack at x8000, then spins.
    fn with_handler(handler_body: impl FnOnce(&mut Prog)) -> Vec<u8> {
        let mut p = Prog::new();
        p.set(R1, Signal::User1 as u16);
        let patch = usize::from(p.here()) + 1;
        p.set16(R2, 0).sys(1024).set(R6, 0x8000).spin();

        let handler = p.here();
        handler_body(&mut p);

        let mut bytes = p.build();
        bytes[patch..patch + 2].copy_from_slice(&handler.to_be_bytes());
        bytes
    }

    #[test]
    fn test_signal_runs_handler() {
        let prog = with_handler(|p| { p.set(R3, 99).spin(); });
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let before = b.kernel.state(0).unwrap();
        assert!(b.kernel.send_signal(0, Signal::User1));
        let after = b.kernel.state(0).unwrap();
        assert_eq!(after.regs[R6], 0x8002);
        assert_ne!(after.regs[IP], before.regs[IP]);

        b.kernel.tick();
        let st = b.kernel.state(0).unwrap();
        assert_eq!(st.regs[R3], 99);

        // the return address sits at the old stack pointer
        let data = &b.kernel.fs().contents("/tmp/proc0").unwrap()[STATE_LEN as usize..];
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), before.regs[IP]);
    }

    #[test]
    fn test_unhandled_signal_dropped() {
        let prog = Prog::new().spin().build();
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let before = b.kernel.state(0).unwrap();
        assert!(!b.kernel.send_signal(0, Signal::Interrupt));
        assert!(!b.kernel.send_signal(5, Signal::Interrupt));
        assert_eq!(b.kernel.state(0).unwrap(), before);
    }

    #[test]
    fn test_signal_interrupts_waitpid() {
        let prog = with_handler(|p| { p.spin(); });
        let mut b = boot(&[("/bin/p", prog), ("/bin/sleeper", Prog::new().spin().build())]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.spawn("/bin/sleeper").unwrap();
        b.kernel.tick();

        b.kernel.table.set_status(0, ProcStatus::WaitingOnProcess { pid: 1, deadline: None });
        assert!(b.kernel.send_signal(0, Signal::User1));
        assert_eq!(b.kernel.status(0), Some(ProcStatus::Active));
        assert_eq!(b.kernel.state(0).unwrap().regs[R0], WAIT_INTERRUPTED);
    }

    #[test]
    fn test_signal_interrupts_read() {
        let prog = with_handler(|p| { p.spin(); });
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let ip = b.kernel.state(0).unwrap().regs[IP];
        b.kernel.table.set_status(0, ProcStatus::WaitingOnRead { fd: Handle(9) });
        assert!(b.kernel.send_signal(0, Signal::User1));

        let st = b.kernel.state(0).unwrap();
        assert_eq!(st.regs[R0], READ_NO_DATA);
        let data = &b.kernel.fs().contents("/tmp/proc0").unwrap()[STATE_LEN as usize..];
        assert_eq!(u16::from_be_bytes([data[0], data[1]]), ip + 1);
    }

    #[test]
    fn test_bad_stack_kills() {
        let prog = with_handler(|p| { p.spin(); });
        let mut b = boot(&[("/bin/p", prog)]);
        b.kernel.spawn("/bin/p").unwrap();
        b.kernel.tick();

        let mut st = b.kernel.state(0).unwrap();
        st.regs[R6] = 0x0100;
        let fd = b.kernel.table.get(0).unwrap().state_fd;
        st.store(b.kernel.fs_mut(), fd).unwrap();

        assert!(!b.kernel.send_signal(0, Signal::User1));
        assert_eq!(b.kernel.exit_status(0), Some(EXIT_FAULT));
    }

    #[test]
    fn test_signal_numbers() {
        assert_eq!(Signal::try_from(3), Ok(Signal::Suicide));
        assert_eq!(Signal::try_from(4), Err(()));
        assert_eq!(Signal::User2.index(), 2);
    }
}
