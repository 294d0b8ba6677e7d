//! Scoped network namespace switching for the calling thread.
//!
//! Dialing with [`Config::net_ns`](crate::Config::net_ns) creates the socket
//! inside a target namespace without any visible thread switch. When a
//! namespace descriptor is not enough — for example when a whole sequence of
//! syscalls must run in the target namespace — [`ThreadNetns`] switches the
//! calling thread and restores the previous namespace when dropped, on every
//! exit path including panics.
//!
//! The switch affects the current OS thread only. Do not hold a guard across
//! an `.await`: the task may resume on a different thread.

use std::fs::File;
use std::os::fd::RawFd;
use std::path::Path;

use crate::error::{Error, Result};

#[cfg(target_os = "linux")]
use std::os::fd::AsRawFd;

/// The runtime directory where named network namespaces live.
pub const NETNS_RUN_DIR: &str = "/var/run/netns";

/// A guard holding the calling thread inside another network namespace.
#[derive(Debug)]
pub struct ThreadNetns {
    #[cfg_attr(not(target_os = "linux"), allow(dead_code))]
    orig: File,
}

impl ThreadNetns {
    /// Switch the calling thread into the namespace behind `fd`.
    ///
    /// The previous namespace is reopened first so the drop handler can
    /// restore it.
    #[cfg(target_os = "linux")]
    pub fn enter(fd: RawFd) -> Result<Self> {
        let orig = File::open("/proc/self/ns/net").map_err(|e| Error::io("netns-open", e))?;

        // SAFETY: fd is caller-provided and validated by the kernel;
        // CLONE_NEWNET restricts the switch to the network namespace.
        if unsafe { libc::setns(fd, libc::CLONE_NEWNET) } != 0 {
            return Err(Error::io("netns-enter", std::io::Error::last_os_error()));
        }

        Ok(Self { orig })
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enter(_fd: RawFd) -> Result<Self> {
        Err(Error::not_supported("netns-enter"))
    }

    /// Switch into the namespace at a filesystem path, such as
    /// `/var/run/netns/<name>` or `/proc/<pid>/ns/net`.
    #[cfg(target_os = "linux")]
    pub fn enter_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let ns = File::open(path.as_ref()).map_err(|e| Error::io("netns-open", e))?;
        Self::enter(ns.as_raw_fd())
    }

    #[cfg(not(target_os = "linux"))]
    pub fn enter_path<P: AsRef<Path>>(_path: P) -> Result<Self> {
        Err(Error::not_supported("netns-enter"))
    }

    /// Switch into a named namespace under [`NETNS_RUN_DIR`].
    pub fn enter_named(name: &str) -> Result<Self> {
        Self::enter_path(Path::new(NETNS_RUN_DIR).join(name))
    }
}

impl Drop for ThreadNetns {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        {
            // SAFETY: orig was opened from /proc/self/ns/net and stays open
            // for the guard's lifetime.
            if unsafe { libc::setns(self.orig.as_raw_fd(), libc::CLONE_NEWNET) } != 0 {
                // The thread is stranded in the target namespace; surface it
                // loudly but do not panic in a destructor.
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "failed to restore original network namespace"
                );
            }
        }
    }
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    #[test]
    fn enter_current_namespace_round_trips() {
        // Entering our own namespace is a no-op switch that exercises the
        // save/enter/restore path. setns needs CAP_SYS_ADMIN, so tolerate a
        // permission failure when running unprivileged.
        let own = File::open("/proc/self/ns/net").unwrap();
        match ThreadNetns::enter(own.as_raw_fd()) {
            Ok(guard) => drop(guard),
            Err(e) => assert!(e.is_permission_denied()),
        }
    }

    #[test]
    fn enter_path_missing_namespace_fails() {
        let err = ThreadNetns::enter_path("/var/run/netns/nlwire-does-not-exist").unwrap_err();
        assert!(err.is_not_exist());
    }
}
