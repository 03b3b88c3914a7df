//! Privilege separation.
//!
//! Everything a freshly forked service child does between `fork` and
//! `exec`: resolve the unprivileged identity, change the filesystem root,
//! drop user and group, rearrange the descriptor table to the well-known
//! slots, close everything else, and replace the process image with a
//! private sub-command under a scrubbed environment.

use agentd_wire::status::{Service, error_status, general};
use nix::unistd::{Gid, Uid};
use std::convert::Infallible;
use std::ffi::CString;
use std::os::unix::io::RawFd;
use thiserror::Error;

/// First slot used when parking descriptors out of the remap range.
const PROTECT_BASE: RawFd = 500;

/// Privilege separation failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PrivsepError {
    /// User name lookup failed.
    #[error("user lookup failed for {0}")]
    UserLookup(String),

    /// Group name lookup failed.
    #[error("group lookup failed for {0}")]
    GroupLookup(String),

    /// Changing the working directory failed.
    #[error("chdir failed: {0}")]
    Chdir(nix::errno::Errno),

    /// Changing the filesystem root failed.
    #[error("chroot failed: {0}")]
    Chroot(nix::errno::Errno),

    /// Setting the effective group id failed.
    #[error("setegid failed: {0}")]
    SetEgid(nix::errno::Errno),

    /// Setting the effective user id failed.
    #[error("seteuid failed: {0}")]
    SetEuid(nix::errno::Errno),

    /// Setting the real group id failed.
    #[error("setgid failed: {0}")]
    SetGid(nix::errno::Errno),

    /// Setting the real user id failed.
    #[error("setuid failed: {0}")]
    SetUid(nix::errno::Errno),

    /// A descriptor remap failed.
    #[error("dup2 failed: {0}")]
    Dup2(nix::errno::Errno),

    /// A descriptor pair list held a negative slot.
    #[error("descriptor list is malformed")]
    BadDescriptor,

    /// Closing a descriptor failed.
    #[error("close failed on descriptor {0}")]
    Close(RawFd),

    /// The private-command exec failed.
    #[error("exec of private command failed: {0}")]
    Exec(nix::errno::Errno),
}

impl PrivsepError {
    /// The wire status code for this error.
    pub fn status_code(&self) -> u32 {
        let reason = match self {
            PrivsepError::UserLookup(_) => general::GETPWNAM_FAILURE,
            PrivsepError::GroupLookup(_) => general::GETGRNAM_FAILURE,
            PrivsepError::Chdir(_) => general::CHDIR_FAILURE,
            PrivsepError::Chroot(_) => general::CHROOT_FAILURE,
            PrivsepError::SetEgid(_) => general::SETEGID_FAILURE,
            PrivsepError::SetEuid(_) => general::SETEUID_FAILURE,
            PrivsepError::SetGid(_) => general::SETGID_FAILURE,
            PrivsepError::SetUid(_) => general::SETUID_FAILURE,
            PrivsepError::Dup2(_) => general::SETFDS_DUP2_FAILURE,
            PrivsepError::BadDescriptor => general::SETFDS_BAD_ARGUMENT,
            PrivsepError::Close(0) => general::CLOSE_STDIN_FAILURE,
            PrivsepError::Close(1) => general::CLOSE_STDOUT_FAILURE,
            PrivsepError::Close(2) => general::CLOSE_STDERR_FAILURE,
            PrivsepError::Close(_) => general::CLOSE_FAILURE,
            PrivsepError::Exec(_) => general::EXEC_PRIVATE_EXEC_FAILURE,
        };
        error_status(Service::General, reason)
    }
}

/// Resolves user and group names to numeric ids.
pub fn lookup_usergroup(user: &str, group: &str) -> Result<(Uid, Gid), PrivsepError> {
    let pwd = nix::unistd::User::from_name(user)
        .ok()
        .flatten()
        .ok_or_else(|| PrivsepError::UserLookup(user.to_string()))?;
    let grp = nix::unistd::Group::from_name(group)
        .ok()
        .flatten()
        .ok_or_else(|| PrivsepError::GroupLookup(group.to_string()))?;
    Ok((pwd.uid, grp.gid))
}

/// Changes the working directory to `dir`, then the filesystem root.
///
/// Must be root.
pub fn chroot(dir: &str) -> Result<(), PrivsepError> {
    nix::unistd::chdir(dir).map_err(PrivsepError::Chdir)?;
    nix::unistd::chroot(dir).map_err(PrivsepError::Chroot)?;
    Ok(())
}

/// Assumes the given identity, dropping root.
///
/// Group first, then user. On hosts that require explicitly lowering the
/// effective ids first, that happens before the real ids.
pub fn drop_privileges(uid: Uid, gid: Gid) -> Result<(), PrivsepError> {
    #[cfg(target_os = "openbsd")]
    {
        nix::unistd::setegid(gid).map_err(PrivsepError::SetEgid)?;
        nix::unistd::seteuid(uid).map_err(PrivsepError::SetEuid)?;
    }

    nix::unistd::setgid(gid).map_err(PrivsepError::SetGid)?;
    nix::unistd::setuid(uid).map_err(PrivsepError::SetUid)?;
    Ok(())
}

/// Parks each referenced descriptor at a high slot (500 upward) and closes
/// the original, so a subsequent remap cannot overwrite a descriptor
/// another argument still points at.
pub fn protect_descriptors(descs: &mut [&mut RawFd]) -> Result<(), PrivsepError> {
    let mut high = PROTECT_BASE;
    for desc in descs.iter_mut() {
        nix::unistd::dup2(**desc, high).map_err(PrivsepError::Dup2)?;
        nix::unistd::close(**desc).map_err(|_| PrivsepError::Close(**desc))?;
        **desc = high;
        high += 1;
    }
    Ok(())
}

/// Remaps descriptors: for each `(curr, mapped)` pair, duplicates `curr`
/// onto `mapped`.
pub fn setfds(pairs: &[(RawFd, RawFd)]) -> Result<(), PrivsepError> {
    for &(curr, mapped) in pairs {
        if curr < 0 || mapped < 0 {
            return Err(PrivsepError::BadDescriptor);
        }
        nix::unistd::dup2(curr, mapped).map_err(PrivsepError::Dup2)?;
    }
    Ok(())
}

/// Closes standard input, output and error.
pub fn close_standard_fds() -> Result<(), PrivsepError> {
    for fd in 0..3 {
        nix::unistd::close(fd).map_err(|_| PrivsepError::Close(fd))?;
    }
    Ok(())
}

/// Closes every descriptor strictly greater than `fd`, up to the
/// select-set maximum.
pub fn close_other_fds(fd: RawFd) {
    for i in fd + 1..=libc::FD_SETSIZE as RawFd {
        let _ = nix::unistd::close(i);
    }
}

/// Replaces the process image with `agentd -P <sub>`.
///
/// The new image sees only `PATH=/bin` and
/// `LD_LIBRARY_PATH=/lib:/usr/libexec`. Does not return on success.
pub fn exec_private(sub: &str) -> Result<Infallible, PrivsepError> {
    let path = CString::new("/bin/agentd").expect("static path");
    let args = [
        CString::new("agentd").expect("static arg"),
        CString::new("-P").expect("static arg"),
        CString::new(sub).map_err(|_| PrivsepError::Exec(nix::errno::Errno::EINVAL))?,
    ];
    let env = [
        CString::new("PATH=/bin").expect("static env"),
        CString::new("LD_LIBRARY_PATH=/lib:/usr/libexec").expect("static env"),
    ];

    match nix::unistd::execve(&path, &args, &env) {
        Ok(infallible) => match infallible {},
        Err(e) => Err(PrivsepError::Exec(e)),
    }
}
