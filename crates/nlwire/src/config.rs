//! Dial configuration and socket option names.

use std::os::fd::RawFd;

/// Optional configuration for [`Conn::dial`](crate::Conn::dial).
///
/// The zero value of every field selects the default behavior.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Bitmask of multicast groups to join at bind time. 0 means unicast
    /// only; groups can also be joined later with
    /// [`Conn::join_group`](crate::Conn::join_group).
    pub groups: u32,

    /// Explicit netlink port ID to bind. 0 lets the kernel assign one.
    ///
    /// This is not a process ID: the kernel hands out a unique port ID per
    /// socket.
    pub pid: u32,

    /// Enable extended acknowledgements and strict dump validation at dial.
    ///
    /// Unlike toggling the options individually, a kernel that rejects
    /// either one fails the dial, so callers never run with silently
    /// degraded validation.
    pub strict: bool,

    /// An open network namespace file descriptor (for example
    /// `/var/run/netns/<name>` or `/proc/<pid>/ns/net`). The socket is
    /// created inside this namespace and stays bound to it.
    pub net_ns: Option<RawFd>,

    /// Suppress the best-effort enabling of
    /// [`ConnOption::ListenAllNsid`] at dial.
    pub disable_nsid: bool,
}

/// Netlink socket options settable through
/// [`Conn::set_option`](crate::Conn::set_option).
///
/// Options unknown to the running kernel fail with the kernel's
/// `ENOPROTOOPT`, which
/// [`Error::is_not_supported`](crate::Error::is_not_supported) recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnOption {
    /// Deliver peer source information as control messages.
    PacketInfo,
    /// Report errors for multicast sends.
    BroadcastError,
    /// Drop silently on receive buffer overflow instead of returning
    /// ENOBUFS.
    NoEnobufs,
    /// Receive notifications for every namespace this socket can see.
    ListenAllNsid,
    /// Do not echo the original request payload in error replies.
    CapAcknowledge,
    /// Enable TLV-enriched error replies (message, offset, policy).
    ExtendedAcknowledge,
    /// Enable kernel-side strict validation of dump requests.
    GetStrictCheck,
}
