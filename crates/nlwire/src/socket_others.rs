//! Stub back-end for platforms without a kernel netlink peer.
//!
//! The surface matches the Linux back-end so dependents compile everywhere,
//! but every operation fails with a not-supported error. No portable
//! emulation is attempted: only Linux has something real to talk to.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::socket::{Protocol, Socket};

/// Placeholder netlink socket for non-Linux builds.
pub struct NetlinkSocket {
    protocol: Protocol,
}

impl NetlinkSocket {
    /// Always fails: netlink sockets exist only on Linux.
    pub fn dial(_protocol: Protocol, _config: &Config) -> Result<Self> {
        Err(Error::not_supported("dial"))
    }

    /// The port ID bound to this socket.
    pub fn pid(&self) -> u32 {
        0
    }

    /// The protocol family this socket speaks.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }
}

impl Socket for NetlinkSocket {
    async fn send(&self, _message: &Message) -> Result<()> {
        Err(Error::not_supported("send"))
    }

    async fn send_batch(&self, _messages: &[Message]) -> Result<()> {
        Err(Error::not_supported("send"))
    }

    async fn receive(&self) -> Result<Vec<Message>> {
        Err(Error::not_supported("receive"))
    }

    fn close(&self) -> Result<()> {
        Err(Error::not_supported("close"))
    }
}
