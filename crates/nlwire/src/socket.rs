//! The socket seam between the connection and the operating system.

use std::future::Future;
use std::os::fd::RawFd;
use std::time::Instant;

use crate::bpf::RawInstruction;
use crate::config::ConnOption;
use crate::error::{Error, Result};
use crate::message::Message;

/// Netlink protocol families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    /// Routing and device hook (links, addresses, routes, TC).
    Route,
    /// Generic netlink multiplexer.
    Generic,
    /// Netfilter subsystem.
    Netfilter,
    /// Socket diagnostics.
    SockDiag,
    /// Kernel connector.
    Connector,
    /// Kobject uevents.
    KobjectUevent,
    /// Audit subsystem.
    Audit,
    /// Any other family by its raw protocol number.
    Other(isize),
}

/// The operations a netlink socket back-end provides to [`Conn`](crate::Conn).
///
/// The connection layers sequencing, multipart reassembly, and validation on
/// top; the back-end owns the descriptor and the I/O discipline. Optional
/// capabilities (multicast membership, filters, buffer tuning, deadlines)
/// default to [`Error::NotSupported`] so reduced back-ends — the non-Linux
/// stub, fakes in tests — only implement what they can.
pub trait Socket: Send + Sync {
    /// Marshal and deliver one message to the kernel.
    fn send(&self, message: &Message) -> impl Future<Output = Result<()>> + Send;

    /// Marshal, concatenate, and deliver several messages in one syscall.
    fn send_batch(&self, messages: &[Message]) -> impl Future<Output = Result<()>> + Send;

    /// Receive one datagram and parse it into whole messages.
    fn receive(&self) -> impl Future<Output = Result<Vec<Message>>> + Send;

    /// Close the socket. Idempotent; wakes blocked senders and receivers.
    fn close(&self) -> Result<()>;

    /// Join a multicast group by ID.
    fn join_group(&self, _group: u32) -> Result<()> {
        Err(Error::not_supported("join-group"))
    }

    /// Leave a multicast group by ID.
    fn leave_group(&self, _group: u32) -> Result<()> {
        Err(Error::not_supported("leave-group"))
    }

    /// Enable or disable a netlink socket option.
    fn set_option(&self, _option: ConnOption, _enable: bool) -> Result<()> {
        Err(Error::not_supported("set-option"))
    }

    /// Attach a classic BPF filter to the socket.
    fn set_filter(&self, _program: &[RawInstruction]) -> Result<()> {
        Err(Error::not_supported("set-filter"))
    }

    /// Detach the classic BPF filter from the socket.
    fn remove_filter(&self) -> Result<()> {
        Err(Error::not_supported("remove-filter"))
    }

    /// Set the kernel receive buffer size.
    fn set_read_buffer(&self, _bytes: usize) -> Result<()> {
        Err(Error::not_supported("set-read-buffer"))
    }

    /// Set the kernel transmit buffer size.
    fn set_write_buffer(&self, _bytes: usize) -> Result<()> {
        Err(Error::not_supported("set-write-buffer"))
    }

    /// Read back the kernel receive buffer size.
    fn read_buffer(&self) -> Result<usize> {
        Err(Error::not_supported("read-buffer"))
    }

    /// Read back the kernel transmit buffer size.
    fn write_buffer(&self) -> Result<usize> {
        Err(Error::not_supported("write-buffer"))
    }

    /// Apply a deadline to future sends and receives. `None` clears it.
    fn set_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::not_supported("set-deadline"))
    }

    /// Apply a deadline to future receives. `None` clears it.
    fn set_read_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::not_supported("set-deadline"))
    }

    /// Apply a deadline to future sends. `None` clears it.
    fn set_write_deadline(&self, _deadline: Option<Instant>) -> Result<()> {
        Err(Error::not_supported("set-deadline"))
    }

    /// Expose the raw descriptor for out-of-band syscalls.
    fn raw_fd(&self) -> Result<RawFd> {
        Err(Error::not_supported("syscall-conn"))
    }
}
