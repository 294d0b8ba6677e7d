//! Netlink message header and framing codec.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::{Error, Result};

/// Netlink message alignment.
pub const NLMSG_ALIGNTO: usize = 4;

/// Align a length to the next NLMSG_ALIGNTO boundary.
#[inline]
pub const fn nlmsg_align(len: usize) -> usize {
    (len + NLMSG_ALIGNTO - 1) & !(NLMSG_ALIGNTO - 1)
}

/// Size of the netlink message header.
pub const NLMSG_HDRLEN: usize = nlmsg_align(std::mem::size_of::<Header>());

/// Netlink message header (mirrors struct nlmsghdr, host byte order).
#[repr(C)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct Header {
    /// Total length of the message, including this header.
    pub length: u32,
    /// Message type.
    pub message_type: u16,
    /// Header flags (NLM_F_*).
    pub flags: u16,
    /// Sequence number correlating requests and replies.
    pub sequence: u32,
    /// Sender port ID. Not a process ID: the kernel assigns one per socket.
    pub pid: u32,
}

impl Header {
    /// Get the payload length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(NLMSG_HDRLEN)
    }

    /// Check if this is an error (or ACK) message.
    pub fn is_error(&self) -> bool {
        self.message_type == MsgType::ERROR
    }

    /// Check if this is a multipart terminator.
    pub fn is_done(&self) -> bool {
        self.message_type == MsgType::DONE
    }

    /// Check if this message carries the multipart flag.
    pub fn is_multi(&self) -> bool {
        self.flags & NLM_F_MULTI != 0
    }

    /// Convert the header to its wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse a header from the front of a buffer.
    ///
    /// The header is copied out, so the buffer needs no particular
    /// alignment.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read_from_prefix(data)
            .map(|(h, _)| h)
            .map_err(|_| Error::InvalidMessage("not enough data for a netlink header".into()))
    }
}

/// Standard netlink message types. Subsystem-specific types start at
/// [`MsgType::MIN_TYPE`].
pub struct MsgType;

impl MsgType {
    /// No operation, message must be discarded.
    pub const NOOP: u16 = 1;
    /// Error message or ACK (code 0).
    pub const ERROR: u16 = 2;
    /// End of a multipart message.
    pub const DONE: u16 = 3;
    /// Data lost, request resend.
    pub const OVERRUN: u16 = 4;

    /// First message type reserved for subsystems.
    pub const MIN_TYPE: u16 = 0x10;
}

/// Netlink header flags.
pub const NLM_F_REQUEST: u16 = 0x01;
pub const NLM_F_MULTI: u16 = 0x02;
pub const NLM_F_ACK: u16 = 0x04;
pub const NLM_F_ECHO: u16 = 0x08;
pub const NLM_F_DUMP_INTR: u16 = 0x10;
pub const NLM_F_DUMP_FILTERED: u16 = 0x20;

// Modifiers to GET requests.
pub const NLM_F_ROOT: u16 = 0x100;
pub const NLM_F_MATCH: u16 = 0x200;
pub const NLM_F_ATOMIC: u16 = 0x400;
pub const NLM_F_DUMP: u16 = NLM_F_ROOT | NLM_F_MATCH;

// Modifiers to NEW requests. These reuse the GET modifier bits; the
// interpretation depends on the message type.
pub const NLM_F_REPLACE: u16 = 0x100;
pub const NLM_F_EXCL: u16 = 0x200;
pub const NLM_F_CREATE: u16 = 0x400;
pub const NLM_F_APPEND: u16 = 0x800;

// Modifiers set by the kernel on error replies.
pub const NLM_F_CAPPED: u16 = 0x100;
pub const NLM_F_ACK_TLVS: u16 = 0x200;

/// A netlink message: a [`Header`] plus an opaque payload.
///
/// The payload is host-endian; use [`crate::nlenc`] to pack and unpack
/// integers and [`crate::attr`] for attribute TLVs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub header: Header,
    pub data: Vec<u8>,
}

impl Message {
    /// Marshal the message into its wire form, zero-padded to alignment.
    ///
    /// The header's `length` must already be populated and consistent:
    /// at least a header's worth, equal to its own aligned value, and large
    /// enough to hold the payload. [`crate::Conn::send`] fills the field
    /// automatically when it is zero.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        let ml = nlmsg_align(self.header.length as usize);
        if ml < NLMSG_HDRLEN || ml != self.header.length as usize {
            return Err(Error::InvalidMessage(
                "netlink message header length incorrect".into(),
            ));
        }
        if NLMSG_HDRLEN + self.data.len() > ml {
            return Err(Error::InvalidMessage(
                "netlink message payload exceeds header length".into(),
            ));
        }

        let mut b = vec![0u8; ml];
        b[..NLMSG_HDRLEN].copy_from_slice(self.header.as_bytes());
        b[NLMSG_HDRLEN..NLMSG_HDRLEN + self.data.len()].copy_from_slice(&self.data);
        Ok(b)
    }

    /// Unmarshal a single message from a buffer.
    ///
    /// The buffer must hold exactly one aligned message whose header length
    /// matches the buffer size.
    pub fn unmarshal(b: &[u8]) -> Result<Message> {
        if b.len() < NLMSG_HDRLEN {
            return Err(Error::InvalidMessage(
                "not enough data to create a netlink message".into(),
            ));
        }
        if b.len() != nlmsg_align(b.len()) {
            return Err(Error::InvalidMessage(
                "input data is not properly aligned for netlink message".into(),
            ));
        }

        let header = Header::from_bytes(b)?;
        if header.length as usize != b.len() {
            return Err(Error::InvalidMessage(
                "netlink message header length does not match buffer".into(),
            ));
        }

        Ok(Message {
            header,
            data: b[NLMSG_HDRLEN..].to_vec(),
        })
    }
}

/// Parse one datagram of concatenated netlink messages.
///
/// Each message's header length gives the offset of the next, aligned to 4
/// bytes. Trailing bytes too short for a header are ignored, matching the
/// kernel's framing.
pub fn parse_messages(mut b: &[u8]) -> Result<Vec<Message>> {
    let mut msgs = Vec::new();

    while b.len() >= NLMSG_HDRLEN {
        let header = Header::from_bytes(b)?;

        let len = header.length as usize;
        if len < NLMSG_HDRLEN || len > b.len() {
            return Err(Error::InvalidMessage(format!(
                "invalid netlink message length: {}",
                len
            )));
        }

        msgs.push(Message {
            header,
            data: b[NLMSG_HDRLEN..len].to_vec(),
        });

        let aligned = nlmsg_align(len);
        if aligned >= b.len() {
            b = &[];
        } else {
            b = &b[aligned..];
        }
    }

    Ok(msgs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn align() {
        assert_eq!(nlmsg_align(0), 0);
        assert_eq!(nlmsg_align(1), 4);
        assert_eq!(nlmsg_align(4), 4);
        assert_eq!(nlmsg_align(17), 20);
        assert_eq!(NLMSG_HDRLEN, 16);
    }

    // Byte fixtures are host-endian; they match on the little-endian
    // targets netlink code actually runs on.
    #[test]
    #[cfg(target_endian = "little")]
    fn marshal_error_message() {
        let m = Message {
            header: Header {
                length: 20,
                message_type: MsgType::ERROR,
                flags: NLM_F_REQUEST,
                sequence: 1,
                pid: 10,
            },
            data: vec![0x01, 0x02, 0x03],
        };

        let b = m.marshal().unwrap();
        assert_eq!(
            b,
            [
                0x14, 0x00, 0x00, 0x00, // length 20
                0x02, 0x00, // type error
                0x01, 0x00, // flags request
                0x01, 0x00, 0x00, 0x00, // sequence 1
                0x0a, 0x00, 0x00, 0x00, // pid 10
                0x01, 0x02, 0x03, 0x00, // payload + pad
            ]
        );
    }

    #[test]
    fn marshal_rejects_bad_lengths() {
        // Below header size.
        let m = Message {
            header: Header {
                length: 8,
                ..Default::default()
            },
            data: vec![],
        };
        assert!(m.marshal().is_err());

        // Unaligned declared length.
        let m = Message {
            header: Header {
                length: 17,
                ..Default::default()
            },
            data: vec![0x01],
        };
        assert!(m.marshal().is_err());

        // Payload larger than declared length.
        let m = Message {
            header: Header {
                length: 20,
                ..Default::default()
            },
            data: vec![0u8; 8],
        };
        assert!(m.marshal().is_err());
    }

    #[test]
    fn unmarshal_rejects_bad_input() {
        // Short.
        assert!(Message::unmarshal(&[0u8; 8]).is_err());

        // Unaligned.
        assert!(Message::unmarshal(&[0u8; 17]).is_err());

        // Header length disagrees with the buffer.
        let mut b = vec![0u8; 20];
        b[0] = 16;
        assert!(Message::unmarshal(&b).is_err());
    }

    #[test]
    fn unmarshal_round_trip() {
        let m = Message {
            header: Header {
                length: 24,
                message_type: MsgType::MIN_TYPE,
                flags: NLM_F_REQUEST | NLM_F_ACK,
                sequence: 0x01020304,
                pid: 0x05060708,
            },
            data: vec![0xaa; 8],
        };

        let got = Message::unmarshal(&m.marshal().unwrap()).unwrap();
        assert_eq!(got, m);
    }

    #[test]
    fn parse_concatenated_messages() {
        let a = Message {
            header: Header {
                length: 20,
                message_type: MsgType::MIN_TYPE,
                flags: NLM_F_MULTI,
                sequence: 1,
                pid: 1,
            },
            data: vec![0xff, 0xee, 0xdd],
        };
        let b = Message {
            header: Header {
                length: 16,
                message_type: MsgType::DONE,
                flags: NLM_F_MULTI,
                sequence: 1,
                pid: 1,
            },
            data: vec![],
        };

        let mut buf = a.marshal().unwrap();
        buf.extend_from_slice(&b.marshal().unwrap());

        let msgs = parse_messages(&buf).unwrap();
        assert_eq!(msgs.len(), 2);
        // Parsing trims padding down to the declared length.
        assert_eq!(msgs[0].data, vec![0xff, 0xee, 0xdd]);
        assert_eq!(msgs[1].header.message_type, MsgType::DONE);
    }

    #[test]
    fn parse_rejects_overlong_length() {
        let mut b = vec![0u8; 16];
        b[0] = 32; // claims more data than the buffer holds
        assert!(parse_messages(&b).is_err());
    }

    proptest! {
        #[test]
        fn marshal_unmarshal_round_trip(
            message_type in any::<u16>(),
            flags in any::<u16>(),
            sequence in any::<u32>(),
            pid in any::<u32>(),
            // Aligned payload: padding is not recoverable on unmarshal.
            words in proptest::collection::vec(any::<u32>(), 0..64),
        ) {
            let data: Vec<u8> = words.iter().flat_map(|w| w.to_ne_bytes()).collect();
            let m = Message {
                header: Header {
                    length: (NLMSG_HDRLEN + data.len()) as u32,
                    message_type,
                    flags,
                    sequence,
                    pid,
                },
                data,
            };

            let b = m.marshal().unwrap();
            prop_assert_eq!(b.len() % 4, 0);
            prop_assert_eq!(Message::unmarshal(&b).unwrap(), m);
        }
    }
}
