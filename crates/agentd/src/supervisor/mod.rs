//! The supervisor.
//!
//! `command_start` takes the PID-file lock and hands off to the outer
//! supervisor flow: verify root, fork, and either forward signals to the
//! child (foreground) or detach (daemon). The child re-acquires the lock
//! inside the chroot, writes its pid, parks the PID descriptor at its
//! well-known slot and execs the private `supervisor` sub-command — which
//! does the real wiring in [`wiring`].

mod wiring;

pub use wiring::private_command_supervisor;

use crate::bootstrap::BootstrapConfig;
use crate::fds;
use crate::privsep;
use crate::strings::concat_all;
use agentd_ipc::signal;
use nix::fcntl::{FlockArg, OFlag, flock, open};
use nix::sys::stat::Mode;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork, getpid, setsid, write};
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicI32, Ordering};

/// Exit code for a generic bootstrap failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code for PID-lock contention: another supervisor is live.
pub const EXIT_LOCK_CONTENTION: i32 = 2;

/// PID file location relative to the prefix.
const PID_FILE: &str = "/var/pid/agentd.pid";

/// The foreground child's pid, readable from the signal forwarders.
static FOREGROUND_CHILD: AtomicI32 = AtomicI32::new(0);

extern "C" fn forward_signal(sig: libc::c_int) {
    if sig == libc::SIGCHLD {
        // SAFETY: async-signal-safe reap of the exited child.
        #[allow(unsafe_code)]
        unsafe {
            libc::wait(std::ptr::null_mut());
        }
        return;
    }
    let child = FOREGROUND_CHILD.load(Ordering::SeqCst);
    if child > 0 {
        // SAFETY: kill is async-signal-safe.
        #[allow(unsafe_code)]
        unsafe {
            libc::kill(child, sig);
        }
    }
}

/// The `start` command: create and probe-lock the PID file, then run the
/// supervisor flow.
pub fn command_start(bconf: &BootstrapConfig) -> i32 {
    let Some(prefix) = bconf.prefix_dir.as_deref() else {
        eprintln!("agentd: cannot resolve installation prefix.");
        return EXIT_FAILURE;
    };

    let pid_path = concat_all(&[prefix, PID_FILE]);
    let pid_fd = match open(
        pid_path.as_str(),
        OFlag::O_CREAT | OFlag::O_RDWR,
        Mode::S_IRUSR | Mode::S_IWUSR,
    ) {
        Ok(fd) => fd,
        Err(e) => {
            eprintln!("agentd: cannot create pid file {pid_path}: {e}");
            return EXIT_FAILURE;
        }
    };

    // Probe the lock: a live supervisor holds it exclusively.
    if flock(pid_fd, FlockArg::LockExclusiveNonblock).is_err() {
        eprintln!("agentd: another instance holds {pid_path}.");
        let _ = nix::unistd::close(pid_fd);
        return EXIT_LOCK_CONTENTION;
    }
    if flock(pid_fd, FlockArg::UnlockNonblock).is_err() {
        eprintln!("agentd: cannot release probe lock on {pid_path}.");
        let _ = nix::unistd::close(pid_fd);
        return EXIT_LOCK_CONTENTION;
    }

    let status = supervisor_proc(bconf, prefix, pid_fd);
    let _ = nix::unistd::close(pid_fd);
    status
}

/// Forks the privileged supervisor child and supervises it from the
/// parent side.
fn supervisor_proc(bconf: &BootstrapConfig, prefix: &str, pid_fd: RawFd) -> i32 {
    if !nix::unistd::geteuid().is_root() {
        eprintln!("agentd must be run as root.");
        return EXIT_FAILURE;
    }

    // SAFETY: the child branch only runs exec-bound setup.
    #[allow(unsafe_code)]
    let fork_result = unsafe { fork() };

    match fork_result {
        Err(e) => {
            eprintln!("agentd: fork failed: {e}");
            EXIT_FAILURE
        }
        Ok(ForkResult::Child) => {
            let status = supervisor_child(bconf, prefix, pid_fd);
            std::process::exit(status);
        }
        Ok(ForkResult::Parent { child }) => {
            if !bconf.foreground {
                // Daemon mode: the parent's work is done.
                return 0;
            }

            FOREGROUND_CHILD.store(child.as_raw(), Ordering::SeqCst);
            // The kernel refuses a SIGKILL handler; the attempt is part
            // of the forwarded set and its failure is harmless.
            for sig in [libc::SIGHUP, libc::SIGKILL, libc::SIGTERM, libc::SIGCHLD] {
                let _ = signal::install(sig, forward_signal);
            }

            wait_for(child)
        }
    }
}

/// Everything the supervisor child does before exec.
fn supervisor_child(bconf: &BootstrapConfig, prefix: &str, pid_fd: RawFd) -> i32 {
    if !bconf.foreground && setsid().is_err() {
        eprintln!("agentd: setsid failed.");
        return EXIT_FAILURE;
    }

    if let Err(e) = privsep::chroot(prefix) {
        eprintln!("agentd: chroot into {prefix} failed: {e}");
        return EXIT_FAILURE;
    }

    // Hold the real lock for the supervisor's lifetime.
    if flock(pid_fd, FlockArg::LockExclusiveNonblock).is_err() {
        return EXIT_LOCK_CONTENTION;
    }
    let pid_text = getpid().as_raw().to_string();
    if write(pid_fd, pid_text.as_bytes()).is_err() {
        eprintln!("agentd: cannot write pid file.");
        return EXIT_FAILURE;
    }

    // Daemons keep no terminal descriptors, and in every mode slot 2
    // becomes the PID file next. Nothing may print past this point; the
    // private supervisor logs to its log file.
    if !bconf.foreground && privsep::close_standard_fds().is_err() {
        return EXIT_FAILURE;
    }
    if privsep::setfds(&[(pid_fd, fds::SUPERVISOR_PID)]).is_err() {
        return EXIT_FAILURE;
    }

    match privsep::exec_private("supervisor") {
        Ok(never) => match never {},
        Err(_) => EXIT_FAILURE,
    }
}

fn wait_for(child: Pid) -> i32 {
    loop {
        match waitpid(child, None) {
            Ok(WaitStatus::Exited(_, status)) => return status,
            Ok(WaitStatus::Signaled(_, _, _)) => return EXIT_FAILURE,
            Ok(_) => continue,
            // The SIGCHLD forwarder may have reaped it first.
            Err(nix::errno::Errno::ECHILD) => return 0,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return EXIT_FAILURE,
        }
    }
}
