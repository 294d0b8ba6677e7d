//! Linux netlink socket back-end on the tokio reactor.
//!
//! The socket is non-blocking and registered with the reactor; operations
//! park on readiness and retry, so a blocked `receive` costs no thread. A
//! sticky closed flag plus a [`Notify`] wake every parked operation when the
//! connection is closed from another task or thread.

use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use netlink_sys::{Socket as SysSocket, SocketAddr};
use tokio::io::Interest;
use tokio::io::unix::{AsyncFd, AsyncFdReadyGuard};
use tokio::sync::Notify;

use crate::bpf::RawInstruction;
use crate::config::{Config, ConnOption};
use crate::error::{Error, Result};
use crate::message::{self, Message, nlmsg_align};
use crate::netns::ThreadNetns;
use crate::socket::{Protocol, Socket};

impl Protocol {
    fn as_isize(self) -> isize {
        use netlink_sys::protocols;

        match self {
            Protocol::Route => protocols::NETLINK_ROUTE,
            Protocol::Generic => protocols::NETLINK_GENERIC,
            Protocol::Netfilter => protocols::NETLINK_NETFILTER,
            Protocol::SockDiag => protocols::NETLINK_SOCK_DIAG,
            Protocol::Connector => protocols::NETLINK_CONNECTOR,
            Protocol::KobjectUevent => protocols::NETLINK_KOBJECT_UEVENT,
            Protocol::Audit => protocols::NETLINK_AUDIT,
            Protocol::Other(n) => n,
        }
    }
}

// SOL_NETLINK socket options (linux/netlink.h).
const NETLINK_ADD_MEMBERSHIP: libc::c_int = 1;
const NETLINK_DROP_MEMBERSHIP: libc::c_int = 2;
const NETLINK_PKTINFO: libc::c_int = 3;
const NETLINK_BROADCAST_ERROR: libc::c_int = 4;
const NETLINK_NO_ENOBUFS: libc::c_int = 5;
const NETLINK_LISTEN_ALL_NSID: libc::c_int = 8;
const NETLINK_CAP_ACK: libc::c_int = 10;
const NETLINK_EXT_ACK: libc::c_int = 11;
const NETLINK_GET_STRICT_CHK: libc::c_int = 12;

/// A bound netlink socket driven by the tokio reactor.
pub struct NetlinkSocket {
    fd: AsyncFd<SysSocket>,
    pid: u32,
    protocol: Protocol,
    closed: AtomicBool,
    shutdown: Notify,
    read_deadline: Mutex<Option<Instant>>,
    write_deadline: Mutex<Option<Instant>>,
}

impl NetlinkSocket {
    /// Open a bound netlink socket for the given protocol family.
    pub fn dial(protocol: Protocol, config: &Config) -> Result<Self> {
        let sock = match config.net_ns {
            Some(ns) => {
                // The guard restores the caller's namespace once the socket
                // exists; the socket stays bound to the target namespace.
                let _netns = ThreadNetns::enter(ns)?;
                Self::open(protocol, config)?
            }
            None => Self::open(protocol, config)?,
        };

        if config.strict {
            // A kernel that rejects either option fails the dial outright
            // rather than leaving the caller with degraded validation.
            for option in [ConnOption::ExtendedAcknowledge, ConnOption::GetStrictCheck] {
                sock.set_option(option, true)?;
            }
        }

        if !config.disable_nsid {
            // Older kernels lack the option; membership in every visible
            // namespace is opportunistic.
            let _ = sock.set_option(ConnOption::ListenAllNsid, true);
        }

        tracing::debug!(?protocol, pid = sock.pid, "dialed netlink socket");
        Ok(sock)
    }

    // Dropping the partially built socket on any error path closes the
    // descriptor, so a failed bind cannot leak it.
    fn open(protocol: Protocol, config: &Config) -> Result<Self> {
        let mut socket =
            SysSocket::new(protocol.as_isize()).map_err(|e| Error::io("socket", e))?;
        socket
            .set_non_blocking(true)
            .map_err(|e| Error::io("set-nonblocking", e))?;

        let mut addr = SocketAddr::new(config.pid, config.groups);
        socket.bind(&addr).map_err(|e| Error::io("bind", e))?;

        // Read back the port ID the kernel actually assigned.
        socket
            .get_address(&mut addr)
            .map_err(|e| Error::io("getsockname", e))?;
        let pid = addr.port_number();

        let fd = AsyncFd::new(socket).map_err(|e| Error::io("register", e))?;

        Ok(Self {
            fd,
            pid,
            protocol,
            closed: AtomicBool::new(false),
            shutdown: Notify::new(),
            read_deadline: Mutex::new(None),
            write_deadline: Mutex::new(None),
        })
    }

    /// The port ID bound to this socket.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// The protocol family this socket speaks.
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self, op: &'static str) -> Result<()> {
        if self.is_closed() {
            Err(Error::closed(op))
        } else {
            Ok(())
        }
    }

    /// Wait for readiness, or wake with a closed error if `close` runs
    /// first. The shutdown waiter is registered before the closed flag is
    /// re-checked, so a close between the check and the select cannot be
    /// missed.
    async fn ready(
        &self,
        op: &'static str,
        interest: Interest,
    ) -> Result<AsyncFdReadyGuard<'_, SysSocket>> {
        let shutdown = self.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();

        if self.is_closed() {
            return Err(Error::closed(op));
        }

        tokio::select! {
            res = self.fd.ready(interest) => res.map_err(|e| Error::io(op, e)),
            _ = &mut shutdown => Err(Error::closed(op)),
        }
    }

    async fn with_deadline<T>(
        &self,
        op: &'static str,
        deadline: Option<Instant>,
        fut: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match deadline {
            None => fut.await,
            Some(d) => {
                match tokio::time::timeout_at(tokio::time::Instant::from_std(d), fut).await {
                    Ok(res) => res,
                    Err(_elapsed) => Err(Error::io(
                        op,
                        io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded"),
                    )),
                }
            }
        }
    }

    async fn send_bytes(&self, buf: &[u8]) -> Result<()> {
        const OP: &str = "send";

        self.ensure_open(OP)?;
        let deadline = *self.write_deadline.lock().unwrap();

        self.with_deadline(OP, deadline, async {
            loop {
                let mut guard = self.ready(OP, Interest::WRITABLE).await?;

                match guard.try_io(|inner| inner.get_ref().send(buf, 0)) {
                    Ok(res) => {
                        res.map_err(|e| Error::io(OP, e))?;
                        return Ok(());
                    }
                    Err(_would_block) => continue,
                }
            }
        })
        .await
    }

    async fn recv_messages(&self) -> Result<Vec<Message>> {
        const OP: &str = "receive";

        self.ensure_open(OP)?;
        let deadline = *self.read_deadline.lock().unwrap();
        self.with_deadline(OP, deadline, self.recv_grow()).await
    }

    async fn recv_grow(&self) -> Result<Vec<Message>> {
        const OP: &str = "receive";

        let mut buf = vec![0u8; page_size()];
        loop {
            let mut guard = self.ready(OP, Interest::READABLE).await?;

            // Peek first: a peek that fills the buffer may have been
            // truncated, so double the buffer and peek again. Kernel
            // datagrams can be as large as the socket buffer allows.
            let peeked = match guard
                .try_io(|inner| recv(inner.get_ref().as_raw_fd(), &mut buf, libc::MSG_PEEK))
            {
                Ok(res) => res.map_err(|e| Error::io(OP, e))?,
                Err(_would_block) => continue,
            };

            if peeked == 0 {
                // Transient empty peek: drain the empty datagram so it
                // cannot wedge the queue, then wait for a real one.
                let _ = guard.try_io(|inner| recv(inner.get_ref().as_raw_fd(), &mut buf, 0));
                continue;
            }
            if peeked == buf.len() {
                let doubled = buf.len() * 2;
                buf.resize(doubled, 0);
                continue;
            }

            // The datagram fits; drain it.
            let n = match guard
                .try_io(|inner| recv(inner.get_ref().as_raw_fd(), &mut buf, 0))
            {
                Ok(res) => res.map_err(|e| Error::io(OP, e))?,
                Err(_would_block) => continue,
            };

            return message::parse_messages(&buf[..nlmsg_align(n).min(buf.len())]);
        }
    }

    fn setsockopt<T>(
        &self,
        op: &'static str,
        level: libc::c_int,
        name: libc::c_int,
        value: &T,
    ) -> Result<()> {
        self.ensure_open(op)?;

        // SAFETY: value points to a live T of the advertised length.
        let ret = unsafe {
            libc::setsockopt(
                self.fd.get_ref().as_raw_fd(),
                level,
                name,
                value as *const T as *const libc::c_void,
                std::mem::size_of::<T>() as libc::socklen_t,
            )
        };
        if ret != 0 {
            return Err(Error::io(op, io::Error::last_os_error()));
        }
        Ok(())
    }

    fn getsockopt_int(
        &self,
        op: &'static str,
        level: libc::c_int,
        name: libc::c_int,
    ) -> Result<libc::c_int> {
        self.ensure_open(op)?;

        let mut value: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        // SAFETY: value and len are live locals of the advertised length.
        let ret = unsafe {
            libc::getsockopt(
                self.fd.get_ref().as_raw_fd(),
                level,
                name,
                &mut value as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if ret != 0 {
            return Err(Error::io(op, io::Error::last_os_error()));
        }
        Ok(value)
    }
}

impl Socket for NetlinkSocket {
    async fn send(&self, message: &Message) -> Result<()> {
        let buf = message.marshal()?;
        self.send_bytes(&buf).await
    }

    async fn send_batch(&self, messages: &[Message]) -> Result<()> {
        let mut buf = Vec::new();
        for m in messages {
            buf.extend_from_slice(&m.marshal()?);
        }
        self.send_bytes(&buf).await
    }

    async fn receive(&self) -> Result<Vec<Message>> {
        self.recv_messages().await
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.shutdown.notify_waiters();
            tracing::debug!(pid = self.pid, "closed netlink socket");
        }
        Ok(())
    }

    fn join_group(&self, group: u32) -> Result<()> {
        self.setsockopt(
            "join-group",
            libc::SOL_NETLINK,
            NETLINK_ADD_MEMBERSHIP,
            &(group as libc::c_int),
        )
    }

    fn leave_group(&self, group: u32) -> Result<()> {
        self.setsockopt(
            "leave-group",
            libc::SOL_NETLINK,
            NETLINK_DROP_MEMBERSHIP,
            &(group as libc::c_int),
        )
    }

    fn set_option(&self, option: ConnOption, enable: bool) -> Result<()> {
        let name = match option {
            ConnOption::PacketInfo => NETLINK_PKTINFO,
            ConnOption::BroadcastError => NETLINK_BROADCAST_ERROR,
            ConnOption::NoEnobufs => NETLINK_NO_ENOBUFS,
            ConnOption::ListenAllNsid => NETLINK_LISTEN_ALL_NSID,
            ConnOption::CapAcknowledge => NETLINK_CAP_ACK,
            ConnOption::ExtendedAcknowledge => NETLINK_EXT_ACK,
            ConnOption::GetStrictCheck => NETLINK_GET_STRICT_CHK,
        };

        self.setsockopt(
            "set-option",
            libc::SOL_NETLINK,
            name,
            &(enable as libc::c_int),
        )
    }

    fn set_filter(&self, program: &[RawInstruction]) -> Result<()> {
        const OP: &str = "set-filter";

        if program.is_empty() || program.len() > u16::MAX as usize {
            return Err(Error::io(OP, io::Error::from_raw_os_error(libc::EINVAL)));
        }

        let fprog = libc::sock_fprog {
            len: program.len() as u16,
            // RawInstruction is layout-compatible with sock_filter.
            filter: program.as_ptr() as *mut libc::sock_filter,
        };
        self.setsockopt(OP, libc::SOL_SOCKET, libc::SO_ATTACH_FILTER, &fprog)
    }

    fn remove_filter(&self) -> Result<()> {
        self.setsockopt(
            "remove-filter",
            libc::SOL_SOCKET,
            libc::SO_DETACH_FILTER,
            &(0 as libc::c_int),
        )
    }

    fn set_read_buffer(&self, bytes: usize) -> Result<()> {
        self.setsockopt(
            "set-read-buffer",
            libc::SOL_SOCKET,
            libc::SO_RCVBUF,
            &(bytes as libc::c_int),
        )
    }

    fn set_write_buffer(&self, bytes: usize) -> Result<()> {
        self.setsockopt(
            "set-write-buffer",
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            &(bytes as libc::c_int),
        )
    }

    fn read_buffer(&self) -> Result<usize> {
        // Linux reports double the requested size.
        self.getsockopt_int("read-buffer", libc::SOL_SOCKET, libc::SO_RCVBUF)
            .map(|v| v as usize)
    }

    fn write_buffer(&self) -> Result<usize> {
        self.getsockopt_int("write-buffer", libc::SOL_SOCKET, libc::SO_SNDBUF)
            .map(|v| v as usize)
    }

    fn set_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.set_read_deadline(deadline)?;
        self.set_write_deadline(deadline)
    }

    fn set_read_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.ensure_open("set-deadline")?;
        *self.read_deadline.lock().unwrap() = deadline;
        Ok(())
    }

    fn set_write_deadline(&self, deadline: Option<Instant>) -> Result<()> {
        self.ensure_open("set-deadline")?;
        *self.write_deadline.lock().unwrap() = deadline;
        Ok(())
    }

    fn raw_fd(&self) -> Result<RawFd> {
        self.ensure_open("syscall-conn")?;
        Ok(self.fd.get_ref().as_raw_fd())
    }
}

impl AsRawFd for NetlinkSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.get_ref().as_raw_fd()
    }
}

fn recv(fd: RawFd, buf: &mut [u8], flags: libc::c_int) -> io::Result<usize> {
    // SAFETY: buf is valid for writes of buf.len() bytes.
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), flags) };
    if n < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(n as usize)
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf reads a constant; no preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        n if n > 0 => n as usize,
        _ => 4096,
    }
}
