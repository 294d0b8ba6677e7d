//! Error taxonomy, kernel error reply parsing, and reply validation helpers.

use std::fmt;
use std::io;

use crate::attr::AttributeDecoder;
use crate::message::{Message, MsgType, NLMSG_HDRLEN, NLM_F_ACK_TLVS};
use crate::nlenc;

/// Result type for netlink operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during netlink operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O-level failure from the operating system. `op` names the failing
    /// step ("send", "receive", "set-option", "join-group", ...).
    #[error("netlink {op}: {source}")]
    Io {
        op: &'static str,
        source: io::Error,
    },

    /// The kernel answered with a netlink error message carrying a non-zero
    /// code.
    #[error(transparent)]
    Kernel(#[from] KernelError),

    /// A reply's sequence number does not match the request.
    #[error("mismatched sequence in netlink reply: request {request}, reply {reply}")]
    MismatchedSequence { request: u32, reply: u32 },

    /// A reply's port ID does not match the request.
    #[error("mismatched port ID in netlink reply: request {request}, reply {reply}")]
    MismatchedPid { request: u32, reply: u32 },

    /// Malformed message framing: short, misaligned, or inconsistent lengths.
    #[error("invalid netlink message: {0}")]
    InvalidMessage(String),

    /// Malformed attribute framing or an illegal flag combination.
    #[error("invalid netlink attribute: {0}")]
    InvalidAttribute(String),

    /// The operation is not available on this platform or kernel.
    #[error("netlink {op}: operation not supported")]
    NotSupported { op: &'static str },
}

impl Error {
    /// Wrap an I/O error with the operation that produced it.
    pub fn io(op: &'static str, source: io::Error) -> Self {
        Self::Io { op, source }
    }

    /// The error every operation returns once the connection is closed.
    pub(crate) fn closed(op: &'static str) -> Self {
        Self::Io {
            op,
            source: io::Error::from_raw_os_error(libc::EBADF),
        }
    }

    /// Concise constructor for "not supported" errors.
    pub fn not_supported(op: &'static str) -> Self {
        Self::NotSupported { op }
    }

    /// The kernel errno behind this error, if there is one. Positive.
    pub fn errno(&self) -> Option<i32> {
        match self {
            Self::Kernel(k) => Some(k.errno),
            Self::Io { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }

    /// Check whether this error means the queried object does not exist.
    pub fn is_not_exist(&self) -> bool {
        matches!(self.errno(), Some(libc::ENOENT) | Some(libc::ENODEV))
    }

    /// Check whether this error means the object already exists.
    pub fn is_exist(&self) -> bool {
        self.errno() == Some(libc::EEXIST)
    }

    /// Check whether this error is a permission failure.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self.errno(), Some(libc::EPERM) | Some(libc::EACCES))
    }

    /// Check whether this error was caused by an expired deadline.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }

    /// Check whether this error means the operation or socket option is not
    /// supported, either by this build or by the running kernel.
    pub fn is_not_supported(&self) -> bool {
        match self {
            Self::NotSupported { .. } => true,
            Self::Io { source, .. } => source.raw_os_error() == Some(libc::ENOPROTOOPT),
            _ => false,
        }
    }

    /// Check whether this error reports a closed connection.
    pub fn is_closed(&self) -> bool {
        self.errno() == Some(libc::EBADF)
    }
}

/// A netlink error reply: a kernel errno, optionally enriched by extended
/// acknowledgement attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelError {
    /// The errno reported by the kernel, as a positive number.
    pub errno: i32,
    /// Human-readable diagnostic from an extended acknowledgement.
    pub message: Option<String>,
    /// Byte offset into the original request identifying the bad attribute.
    pub offset: Option<usize>,
    /// Opaque kernel policy information, surfaced as raw bytes.
    pub policy: Option<Vec<u8>>,
}

impl KernelError {
    /// Build an error from the raw negative code in an error reply.
    pub fn from_code(code: i32) -> Self {
        Self {
            errno: -code,
            message: None,
            offset: None,
            policy: None,
        }
    }

    /// The errno as an [`io::Error`] for interoperating with code that
    /// matches on OS error values.
    pub fn io_error(&self) -> io::Error {
        io::Error::from_raw_os_error(self.errno)
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "netlink receive: {} (errno {})", self.io_error(), self.errno)?;
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        if let Some(off) = self.offset {
            write!(f, " (offset {})", off)?;
        }
        Ok(())
    }
}

impl std::error::Error for KernelError {}

/// Extended acknowledgement attribute types carried in error and done
/// replies that have [`NLM_F_ACK_TLVS`] set.
pub mod extack {
    /// NUL-terminated diagnostic text.
    pub const MSG: u16 = 1;
    /// Byte offset into the offending request.
    pub const OFFSET: u16 = 2;
    /// Kernel policy information, opaque to this crate.
    pub const POLICY: u16 = 3;
}

/// Inspect one reply message for a kernel-reported error.
///
/// Only `error` messages and `done` terminators of multipart streams carry
/// an error code; a code of zero is success and leaves the message
/// untouched. When the reply advertises extended acknowledgement TLVs they
/// are decoded best-effort into the returned [`KernelError`].
pub fn check_message(m: &Message) -> Result<()> {
    // An error reply embeds the original request header after the code; a
    // done terminator carries the code alone.
    let has_header = if m.header.message_type == MsgType::ERROR {
        true
    } else if m.header.is_multi() && m.header.message_type == MsgType::DONE {
        false
    } else {
        return Ok(());
    };

    if !has_header && m.data.is_empty() {
        // Some families terminate dumps with an empty done message.
        return Ok(());
    }
    if m.data.len() < 4 {
        return Err(Error::InvalidMessage(
            "not enough data for netlink error code".into(),
        ));
    }

    let code = nlenc::int32(&m.data[0..4]);
    if code == 0 {
        return Ok(());
    }

    let mut kerr = KernelError::from_code(code);

    if m.header.flags & NLM_F_ACK_TLVS != 0 {
        let off = if has_header { 4 + NLMSG_HDRLEN } else { 4 };
        if m.data.len() > off {
            // Best-effort: a malformed TLV block never masks the errno.
            let mut ad = AttributeDecoder::new(&m.data[off..]);
            while ad.next() {
                match ad.kind() {
                    extack::MSG => kerr.message = Some(ad.string()),
                    extack::OFFSET => kerr.offset = Some(ad.uint32() as usize),
                    extack::POLICY => kerr.policy = Some(ad.bytes()),
                    _ => {}
                }
            }
            let _ = ad.finish();
        }
    }

    Err(Error::Kernel(kerr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attr::AttributeEncoder;
    use crate::message::{Header, NLM_F_MULTI};

    fn error_reply(code: i32, flags: u16, extra: &[u8]) -> Message {
        let mut data = code.to_ne_bytes().to_vec();
        // Embedded header of the offending request.
        data.extend_from_slice(Header::default().as_bytes());
        data.extend_from_slice(extra);

        Message {
            header: Header {
                length: (NLMSG_HDRLEN + data.len()) as u32,
                message_type: MsgType::ERROR,
                flags,
                sequence: 1,
                pid: 1,
            },
            data,
        }
    }

    #[test]
    fn ack_passes_through() {
        let m = error_reply(0, 0, &[]);
        check_message(&m).unwrap();
    }

    #[test]
    fn enoent_becomes_kernel_error() {
        let m = error_reply(-2, 0, &[]);
        let err = check_message(&m).unwrap_err();
        assert_eq!(err.errno(), Some(libc::ENOENT));
        assert!(err.is_not_exist());
        assert!(!err.is_exist());
    }

    #[test]
    fn short_error_payload_is_framing_error() {
        let m = Message {
            header: Header {
                length: (NLMSG_HDRLEN + 2) as u32,
                message_type: MsgType::ERROR,
                ..Default::default()
            },
            data: vec![0x01, 0x02],
        };
        assert!(matches!(
            check_message(&m),
            Err(Error::InvalidMessage(_))
        ));
    }

    #[test]
    fn extended_ack_attributes() {
        let mut ae = AttributeEncoder::new();
        ae.string(extack::MSG, "no device matches name");
        ae.uint32(extack::OFFSET, 24);
        let tlvs = ae.encode().unwrap();

        let m = error_reply(-19, NLM_F_ACK_TLVS, &tlvs);
        let err = check_message(&m).unwrap_err();

        match err {
            Error::Kernel(k) => {
                assert_eq!(k.errno, libc::ENODEV);
                assert_eq!(k.message.as_deref(), Some("no device matches name"));
                assert_eq!(k.offset, Some(24));
                let text = k.to_string();
                assert!(text.contains("no device matches name"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn extended_ack_ignored_without_flag() {
        let mut ae = AttributeEncoder::new();
        ae.string(extack::MSG, "ignored");
        let tlvs = ae.encode().unwrap();

        let m = error_reply(-1, 0, &tlvs);
        match check_message(&m).unwrap_err() {
            Error::Kernel(k) => assert!(k.message.is_none()),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn done_with_error_code() {
        let m = Message {
            header: Header {
                length: (NLMSG_HDRLEN + 4) as u32,
                message_type: MsgType::DONE,
                flags: NLM_F_MULTI,
                ..Default::default()
            },
            data: (-13i32).to_ne_bytes().to_vec(),
        };
        let err = check_message(&m).unwrap_err();
        assert!(err.is_permission_denied());
    }

    #[test]
    fn done_with_extack_tlvs() {
        let mut ae = AttributeEncoder::new();
        ae.string(extack::MSG, "dump was interrupted");
        let tlvs = ae.encode().unwrap();

        let mut data = (-4i32).to_ne_bytes().to_vec();
        data.extend_from_slice(&tlvs);
        let m = Message {
            header: Header {
                length: (NLMSG_HDRLEN + data.len()) as u32,
                message_type: MsgType::DONE,
                flags: NLM_F_MULTI | NLM_F_ACK_TLVS,
                ..Default::default()
            },
            data,
        };

        match check_message(&m).unwrap_err() {
            Error::Kernel(k) => {
                assert_eq!(k.errno, libc::EINTR);
                assert_eq!(k.message.as_deref(), Some("dump was interrupted"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn clean_done_terminators() {
        // Zero code.
        let m = Message {
            header: Header {
                length: (NLMSG_HDRLEN + 4) as u32,
                message_type: MsgType::DONE,
                flags: NLM_F_MULTI,
                ..Default::default()
            },
            data: vec![0; 4],
        };
        check_message(&m).unwrap();

        // Empty payload.
        let m = Message {
            header: Header {
                length: NLMSG_HDRLEN as u32,
                message_type: MsgType::DONE,
                flags: NLM_F_MULTI,
                ..Default::default()
            },
            data: vec![],
        };
        check_message(&m).unwrap();
    }

    #[test]
    fn data_messages_pass_through() {
        let m = Message {
            header: Header {
                length: NLMSG_HDRLEN as u32,
                message_type: MsgType::MIN_TYPE,
                ..Default::default()
            },
            data: vec![],
        };
        check_message(&m).unwrap();
    }

    #[test]
    fn predicates() {
        assert!(Error::closed("receive").is_closed());
        assert!(Error::io(
            "receive",
            io::Error::new(io::ErrorKind::TimedOut, "deadline exceeded")
        )
        .is_timeout());
        assert!(Error::not_supported("set-filter").is_not_supported());
        assert!(Error::io(
            "set-option",
            io::Error::from_raw_os_error(libc::ENOPROTOOPT)
        )
        .is_not_supported());
        assert!(Error::Kernel(KernelError::from_code(-libc::EEXIST)).is_exist());
    }
}
