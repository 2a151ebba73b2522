//! Signal dispositions, terminal ownership and blocking waits on process groups.

use log::{debug, warn};
use nix::errno::Errno;
use nix::sys::signal::{SigHandler, Signal, signal};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::{Pid, getpgrp, setpgid, tcsetpgrp};
use std::io::{self, IsTerminal};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

/// Terminal-generated signals the shell itself must survive.
pub const JOB_CONTROL_SIGNALS: [Signal; 4] = [
    Signal::SIGTTOU,
    Signal::SIGTTIN,
    Signal::SIGTSTP,
    Signal::SIGINT,
];

/// Ignore [`JOB_CONTROL_SIGNALS`] in the shell process.
pub fn ignore_job_control_signals() -> nix::Result<()> {
    for sig in JOB_CONTROL_SIGNALS {
        // SAFETY: installing SIG_IGN does not run any handler code.
        unsafe { signal(sig, SigHandler::SigIgn) }?;
    }
    Ok(())
}

/// Child-side setup, run between `fork` and `exec`.
///
/// The child already sits in its process group. When `tty` is given the
/// group is made the terminal's foreground group before the job-control
/// signals get their default actions back, so that no stage can run (or be
/// stopped by SIGTTOU) before ownership is settled. Only async-signal-safe
/// calls are made here.
pub fn prepare_child(tty: Option<RawFd>) -> io::Result<()> {
    if let Some(fd) = tty {
        // SAFETY: the descriptor is owned by the parent's `Terminal` and
        // stays open until `exec` closes it.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        let _ = tcsetpgrp(fd, getpgrp());
    }
    for sig in JOB_CONTROL_SIGNALS {
        // SAFETY: restoring SIG_DFL does not run any handler code.
        unsafe { signal(sig, SigHandler::SigDfl) }.map_err(io::Error::from)?;
    }
    Ok(())
}

/// The controlling terminal, when the shell has one.
///
/// Without a terminal every ownership transfer is a no-op; process groups
/// and the job table still work.
#[derive(Debug)]
pub struct Terminal {
    tty: Option<OwnedFd>,
    shell_pgid: Pid,
}

impl Terminal {
    /// Put the shell in its own process group and take the terminal, if
    /// standard input is one.
    pub fn acquire() -> Self {
        let stdin = io::stdin();
        if !stdin.is_terminal() {
            debug!("stdin is not a terminal, job control runs without one");
            return Self::detached();
        }

        // Fails with EPERM for a session leader, which already leads its group.
        if let Err(e) = setpgid(Pid::from_raw(0), Pid::from_raw(0)) {
            debug!("setpgid for the shell failed: {e}");
        }
        let shell_pgid = getpgrp();
        let tty = match stdin.as_fd().try_clone_to_owned() {
            Ok(fd) => Some(fd),
            Err(e) => {
                warn!("could not duplicate the terminal descriptor: {e}");
                None
            }
        };
        let terminal = Self { tty, shell_pgid };
        terminal.reclaim();
        terminal
    }

    /// A terminal handle that never transfers ownership.
    pub fn detached() -> Self {
        Self {
            tty: None,
            shell_pgid: getpgrp(),
        }
    }

    /// Raw descriptor for [`prepare_child`]; valid while `self` lives.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.tty.as_ref().map(|fd| fd.as_raw_fd())
    }

    /// Make `pgid` the foreground group.
    pub fn give_to(&self, pgid: Pid) {
        if let Some(fd) = &self.tty {
            if let Err(e) = tcsetpgrp(fd, pgid) {
                warn!("tcsetpgrp to {pgid} failed: {e}");
            }
        }
    }

    /// Make the shell's own group the foreground group again.
    pub fn reclaim(&self) {
        self.give_to(self.shell_pgid);
    }
}

/// How a foreground wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupOutcome {
    /// Every member is gone; carries the pipeline's status.
    Exited(i32),
    /// A member was stopped; the group is still alive.
    Stopped,
}

/// Shell status for a process killed by `sig`.
pub fn signal_status(sig: Signal) -> i32 {
    128 + sig as i32
}

/// Block until every member of `pgid` has exited or one of them stops.
///
/// The status is the one of `last` (the final pipeline stage) when given,
/// otherwise that of the last member reaped.
pub fn wait_for_group(pgid: Pid, last: Option<Pid>) -> GroupOutcome {
    let mut status = 0;
    loop {
        let (pid, code) = match waitpid(Pid::from_raw(-pgid.as_raw()), Some(WaitPidFlag::WUNTRACED)) {
            Ok(WaitStatus::Exited(pid, code)) => (pid, code),
            Ok(WaitStatus::Signaled(pid, sig, _)) => (pid, signal_status(sig)),
            Ok(WaitStatus::Stopped(pid, sig)) => {
                debug!("pid {pid} in group {pgid} stopped by {sig}");
                return GroupOutcome::Stopped;
            }
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(Errno::ECHILD) => return GroupOutcome::Exited(status),
            Err(e) => {
                warn!("waitpid on group {pgid} failed: {e}");
                return GroupOutcome::Exited(status);
            }
        };
        if last.is_none_or(|last| last == pid) {
            status = code;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::killpg;
    use std::os::unix::process::CommandExt;
    use std::process::Command;

    fn spawn_in_group(script: &str, pgid: Option<Pid>) -> Pid {
        let child = Command::new("sh")
            .args(["-c", script])
            .process_group(pgid.map_or(0, Pid::as_raw))
            .spawn()
            .expect("spawn sh");
        Pid::from_raw(child.id() as i32)
    }

    #[test]
    fn status_comes_from_the_last_stage() {
        let leader = spawn_in_group("exit 3", None);
        let last = spawn_in_group("sleep 0.1; exit 5", Some(leader));
        assert_eq!(wait_for_group(leader, Some(last)), GroupOutcome::Exited(5));
    }

    #[test]
    fn signal_death_maps_to_128_plus_signal() {
        let leader = spawn_in_group("kill -TERM $$", None);
        assert_eq!(
            wait_for_group(leader, Some(leader)),
            GroupOutcome::Exited(128 + 15)
        );
    }

    #[test]
    fn stop_is_reported_and_group_survives() {
        let leader = spawn_in_group("kill -STOP $$; exit 0", None);
        assert_eq!(wait_for_group(leader, Some(leader)), GroupOutcome::Stopped);

        killpg(leader, Signal::SIGCONT).unwrap();
        assert_eq!(wait_for_group(leader, None), GroupOutcome::Exited(0));
    }

    #[test]
    fn detached_terminal_is_not_interactive() {
        let terminal = Terminal::detached();
        assert_eq!(terminal.raw_fd(), None);
        // Transfers are no-ops without a terminal.
        terminal.give_to(Pid::from_raw(1));
        terminal.reclaim();
    }
}
