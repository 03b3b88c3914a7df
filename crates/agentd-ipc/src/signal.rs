//! Signal flags for event-loop shutdown.
//!
//! Handlers installed here only set a process-wide atomic flag; the event
//! loop polls it between readiness batches. Anything beyond flag-setting
//! (the supervisor's forwarding handler, for example) installs its own
//! handler through [`install`].

use crate::error::IpcError;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

static EXIT_REQUESTED: AtomicBool = AtomicBool::new(false);

extern "C" fn flag_exit(_sig: libc::c_int) {
    EXIT_REQUESTED.store(true, Ordering::SeqCst);
}

/// Installs a handler for `sig`.
///
/// The handler must be async-signal-safe: set a flag, nothing else.
pub fn install(sig: libc::c_int, handler: extern "C" fn(libc::c_int)) -> Result<(), IpcError> {
    // SAFETY: sigaction with a handler that only touches atomics.
    #[allow(unsafe_code)]
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = handler as usize;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
            return Err(IpcError::SignalInstall(nix::errno::Errno::last()));
        }
    }
    Ok(())
}

/// Arranges for [`exit_requested`] to become true when `sig` is delivered.
pub fn exit_on_signal(sig: libc::c_int) -> Result<(), IpcError> {
    install(sig, flag_exit)
}

/// True once a registered shutdown signal has been delivered.
pub fn exit_requested() -> bool {
    EXIT_REQUESTED.load(Ordering::SeqCst)
}

/// Clears the shutdown flag. Test support and supervisor re-arm.
pub fn reset() {
    EXIT_REQUESTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raised_signal_sets_flag() {
        reset();
        exit_on_signal(libc::SIGUSR2).unwrap();
        assert!(!exit_requested());

        // SAFETY: raising a signal we just installed a flag handler for.
        #[allow(unsafe_code)]
        unsafe {
            libc::raise(libc::SIGUSR2);
        }
        assert!(exit_requested());
        reset();
    }
}
