//! High-level netlink connection: request sequencing, multipart reassembly,
//! and reply validation layered over a [`Socket`] back-end.

use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crate::NetlinkSocket;
use crate::bpf::RawInstruction;
use crate::config::{Config, ConnOption};
use crate::debug::Debugger;
use crate::error::{Error, Result, check_message};
use crate::message::{Message, NLMSG_HDRLEN, nlmsg_align};
use crate::socket::{Protocol, Socket};

/// A connection to netlink.
///
/// A connection owns one bound socket and can be shared freely across tasks
/// and threads: sequence numbers come from an atomic counter and
/// [`close`](Self::close) wakes any in-flight operation. Callers that need
/// strict request/reply correlation should use [`execute`](Self::execute)
/// and avoid racing other sends on the same connection between its send and
/// receive; the connection deliberately takes no lock across the pair.
///
/// The type parameter selects the back-end; the default is the platform
/// socket. [`from_socket`](Self::from_socket) composes any other
/// [`Socket`] implementation, which is how family-specific layers and test
/// back-ends plug in.
pub struct Conn<S: Socket = NetlinkSocket> {
    socket: S,
    pid: u32,
    seq: AtomicU32,
    debug: Option<Debugger>,
}

impl Conn {
    /// Dial a connection for the given netlink protocol family.
    ///
    /// Must be called inside a tokio runtime: the socket registers with the
    /// reactor immediately.
    pub fn dial(protocol: Protocol, config: Config) -> Result<Self> {
        let socket = NetlinkSocket::dial(protocol, &config)?;
        let pid = socket.pid();
        Ok(Self::from_socket(socket, pid))
    }
}

impl<S: Socket> Conn<S> {
    /// Build a connection over an existing back-end bound to `pid`.
    pub fn from_socket(socket: S, pid: u32) -> Self {
        Self {
            socket,
            pid,
            seq: AtomicU32::new(0),
            debug: Debugger::from_env(),
        }
    }

    /// The port ID this connection is bound to.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The underlying socket back-end.
    pub fn socket(&self) -> &S {
        &self.socket
    }

    /// Send one message to the kernel.
    ///
    /// Header fields left at zero are populated before sending: `length`
    /// from the payload, `sequence` from the connection's counter, and
    /// `pid` from the bound port ID. The populated copy is returned so it
    /// can be handed to [`validate`] later.
    pub async fn send(&self, mut m: Message) -> Result<Message> {
        self.fill(&mut m)?;
        if let Some(d) = &self.debug {
            d.message("send", &m);
        }

        self.socket.send(&m).await?;
        Ok(m)
    }

    /// Send several messages in a single syscall.
    ///
    /// Zeroed header fields are populated per message exactly as in
    /// [`send`](Self::send); rtnetlink-style batched updates rely on the
    /// messages sharing one datagram.
    pub async fn send_batch(&self, mut messages: Vec<Message>) -> Result<Vec<Message>> {
        for m in &mut messages {
            self.fill(m)?;
            if let Some(d) = &self.debug {
                d.message("send", m);
            }
        }

        self.socket.send_batch(&messages).await?;
        Ok(messages)
    }

    /// Receive one or more messages from the kernel.
    ///
    /// Multipart streams are reassembled transparently: reads continue
    /// until the `done` terminator, which is stripped, and the fragments
    /// are returned in arrival order. If any message reports a kernel
    /// error the whole result is discarded and the error surfaced. An
    /// error reply with code zero is an acknowledgement and is yielded
    /// untouched.
    pub async fn receive(&self) -> Result<Vec<Message>> {
        let mut msgs = Vec::new();
        let mut saw_multi = false;

        loop {
            let batch = self.socket.receive().await?;
            let mut saw_done = false;

            for m in batch {
                if let Some(d) = &self.debug {
                    d.message("recv", &m);
                }

                // A kernel error collapses the stream; partial fragments
                // are never returned.
                check_message(&m)?;

                if m.header.is_multi() {
                    if m.header.is_done() {
                        saw_done = true;
                        continue;
                    }
                    saw_multi = true;
                }

                msgs.push(m);
            }

            if !saw_multi || saw_done {
                return Ok(msgs);
            }
        }
    }

    /// Send a request, receive its replies, and validate them against the
    /// request's sequence and port ID.
    ///
    /// This is the only operation with end-to-end correlation checking;
    /// callers mixing raw [`send`](Self::send) and
    /// [`receive`](Self::receive) take on validation themselves.
    pub async fn execute(&self, m: Message) -> Result<Vec<Message>> {
        let req = self.send(m).await?;
        let replies = self.receive().await?;
        validate(&req, &replies)?;
        Ok(replies)
    }

    /// Close the connection. Idempotent, and safe to call while another
    /// task or thread is blocked in [`receive`](Self::receive) or
    /// [`send`](Self::send): the blocked operation wakes and reports a
    /// closed connection.
    pub fn close(&self) -> Result<()> {
        self.socket.close()
    }

    /// Join a multicast group by ID.
    pub fn join_group(&self, group: u32) -> Result<()> {
        self.socket.join_group(group)
    }

    /// Leave a multicast group by ID.
    pub fn leave_group(&self, group: u32) -> Result<()> {
        self.socket.leave_group(group)
    }

    /// Enable or disable a socket option.
    pub fn set_option(&self, option: ConnOption, enable: bool) -> Result<()> {
        self.socket.set_option(option, enable)
    }

    /// Attach a classic BPF filter to the connection's socket.
    pub fn set_filter(&self, program: &[RawInstruction]) -> Result<()> {
        self.socket.set_filter(program)
    }

    /// Detach the classic BPF filter.
    pub fn remove_filter(&self) -> Result<()> {
        self.socket.remove_filter()
    }

    /// Set the kernel receive buffer size.
    pub fn set_read_buffer(&self, bytes: usize) -> Result<()> {
        self.socket.set_read_buffer(bytes)
    }

    /// Set the kernel transmit buffer size.
    pub fn set_write_buffer(&self, bytes: usize) -> Result<()> {
        self.socket.set_write_buffer(bytes)
    }

    /// Read back the kernel receive buffer size.
    pub fn read_buffer(&self) -> Result<usize> {
        self.socket.read_buffer()
    }

    /// Read back the kernel transmit buffer size.
    pub fn write_buffer(&self) -> Result<usize> {
        self.socket.write_buffer()
    }

    /// Apply a deadline to future sends and receives. `None` clears it; a
    /// deadline already in the past times the next operation out
    /// immediately.
    pub fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.socket.set_deadline(deadline)
    }

    /// Apply a deadline to future receives.
    pub fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.socket.set_read_deadline(deadline)
    }

    /// Apply a deadline to future sends.
    pub fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.socket.set_write_deadline(deadline)
    }

    /// Expose the raw descriptor for out-of-band syscalls.
    pub fn raw_fd(&self) -> Result<RawFd> {
        self.socket.raw_fd()
    }

    fn fill(&self, m: &mut Message) -> Result<()> {
        let ml = nlmsg_align(NLMSG_HDRLEN + m.data.len());
        if ml > u32::MAX as usize {
            return Err(Error::InvalidMessage("netlink message data too large".into()));
        }

        if m.header.length == 0 {
            m.header.length = ml as u32;
        }
        if m.header.sequence == 0 {
            m.header.sequence = self.next_sequence();
        }
        if m.header.pid == 0 {
            m.header.pid = self.pid;
        }
        Ok(())
    }

    fn next_sequence(&self) -> u32 {
        self.seq.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }
}

/// Validate reply messages against the request that produced them.
///
/// Every reply must carry the request's sequence number and port ID, with
/// two exceptions: a request sequence of zero disables the sequence check
/// (multicast subscriptions have no request), and a zero port ID on either
/// side disables the PID check (the kernel sends multicast replies with
/// PID 0).
pub fn validate(request: &Message, replies: &[Message]) -> Result<()> {
    for m in replies {
        if request.header.sequence != 0 && m.header.sequence != request.header.sequence {
            return Err(Error::MismatchedSequence {
                request: request.header.sequence,
                reply: m.header.sequence,
            });
        }

        if request.header.pid != 0 && m.header.pid != 0 && m.header.pid != request.header.pid {
            return Err(Error::MismatchedPid {
                request: request.header.pid,
                reply: m.header.pid,
            });
        }
    }

    Ok(())
}
