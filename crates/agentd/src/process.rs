//! Child process lifecycle.
//!
//! A [`Process`] owns one spawned child: a starter that forks and execs,
//! the child pid, and a running flag. `running` is true only between a
//! successful start and the completion of the waiter after a stop or
//! kill.

use agentd_wire::status::{Service, error_status, process as reason};
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitPidFlag, waitpid};
use nix::unistd::Pid;
use thiserror::Error;

/// Process lifecycle failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProcessError {
    /// The process was already spawned.
    #[error("process already spawned")]
    AlreadySpawned,

    /// The process is not running.
    #[error("process not active")]
    NotActive,

    /// The starter failed to produce a child.
    #[error("process start failed with status 0x{0:08x}")]
    StartFailed(u32),

    /// Signalling the child failed.
    #[error("kill failed: {0}")]
    KillFailed(nix::errno::Errno),

    /// Waiting on the child failed.
    #[error("wait failed: {0}")]
    WaitFailed(nix::errno::Errno),
}

impl ProcessError {
    /// The wire status code for this error.
    pub fn status_code(&self) -> u32 {
        match self {
            ProcessError::AlreadySpawned => {
                error_status(Service::Supervisor, reason::ALREADY_SPAWNED)
            }
            ProcessError::NotActive => error_status(Service::Supervisor, reason::NOT_ACTIVE),
            ProcessError::StartFailed(status) => *status,
            ProcessError::KillFailed(_) => error_status(Service::Supervisor, reason::KILL_FAILURE),
            ProcessError::WaitFailed(_) => error_status(Service::Supervisor, reason::WAIT_FAILURE),
        }
    }
}

/// The starter forks and execs, returning the child pid.
pub type Starter = Box<dyn FnMut() -> Result<Pid, ProcessError>>;

/// A supervised child process.
pub struct Process {
    name: String,
    starter: Starter,
    pid: Option<Pid>,
    running: bool,
}

impl Process {
    /// Creates an idle process record.
    pub fn new(name: &str, starter: Starter) -> Process {
        Process {
            name: name.to_string(),
            starter,
            pid: None,
            running: false,
        }
    }

    /// The service name this record supervises.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The child pid while spawned.
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    /// True between a successful start and a completed stop.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Starts the child.
    pub fn start(&mut self) -> Result<(), ProcessError> {
        if self.running {
            return Err(ProcessError::AlreadySpawned);
        }
        let pid = (self.starter)()?;
        self.pid = Some(pid);
        self.running = true;
        Ok(())
    }

    /// Stops the child with SIGTERM and waits for it to exit.
    pub fn stop(&mut self) -> Result<(), ProcessError> {
        self.stop_with(Signal::SIGTERM, WaitPidFlag::empty())
    }

    /// Stops the child with `sig` and waits with `options`.
    ///
    /// With default (blocking) options the call returns after the child is
    /// reaped and clears `running`; with non-blocking options `running`
    /// stays set and the caller reaps later.
    pub fn stop_with(&mut self, sig: Signal, options: WaitPidFlag) -> Result<(), ProcessError> {
        if !self.running {
            return Err(ProcessError::NotActive);
        }
        let pid = self.pid.expect("running process has a pid");

        kill(pid, sig).map_err(ProcessError::KillFailed)?;
        waitpid(pid, Some(options)).map_err(ProcessError::WaitFailed)?;

        if options.is_empty() {
            self.running = false;
        }
        Ok(())
    }

    /// Kills the child with SIGKILL and waits synchronously.
    pub fn kill(&mut self) -> Result<(), ProcessError> {
        self.stop_with(Signal::SIGKILL, WaitPidFlag::empty())
    }

    /// Records that the child was reaped elsewhere (SIGCHLD path).
    pub fn mark_reaped(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::{ForkResult, fork};

    /// Forks a child that sleeps until signalled.
    fn sleeper() -> Starter {
        Box::new(|| {
            // The child only sleeps until signalled; nothing allocates or
            // locks between fork and the pause loop.
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => Ok(child),
                Ok(ForkResult::Child) => loop {
                    std::thread::sleep(std::time::Duration::from_secs(60));
                },
                Err(_) => Err(ProcessError::StartFailed(0x0800_0000)),
            }
        })
    }

    #[test]
    fn start_stop_round_trip() {
        let mut proc = Process::new("sleeper", sleeper());
        assert!(!proc.is_running());

        proc.start().unwrap();
        assert!(proc.is_running());
        assert!(proc.pid().is_some());

        proc.stop().unwrap();
        assert!(!proc.is_running());
    }

    #[test]
    fn double_start_is_rejected() {
        let mut proc = Process::new("sleeper", sleeper());
        proc.start().unwrap();
        assert_eq!(proc.start(), Err(ProcessError::AlreadySpawned));
        proc.kill().unwrap();
    }

    #[test]
    fn stop_when_idle_is_rejected() {
        let mut proc = Process::new("sleeper", sleeper());
        assert_eq!(proc.stop(), Err(ProcessError::NotActive));
    }

    #[test]
    fn kill_reaps_the_child() {
        let mut proc = Process::new("sleeper", sleeper());
        proc.start().unwrap();
        proc.kill().unwrap();
        assert!(!proc.is_running());
        assert_eq!(proc.stop(), Err(ProcessError::NotActive));
    }

    #[test]
    fn status_codes_are_supervisor_scoped() {
        use agentd_wire::status::{status_reason, status_service};

        let code = ProcessError::AlreadySpawned.status_code();
        assert_eq!(status_service(code), Some(Service::Supervisor));
        assert_eq!(status_reason(code), reason::ALREADY_SPAWNED);
    }
}
