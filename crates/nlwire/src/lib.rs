//! Low-level netlink transport for Linux.
//!
//! This crate speaks the netlink wire protocol: bit-exact framing of
//! headers and attribute TLVs, and a connection that sequences requests,
//! reassembles multipart dumps, surfaces kernel errors (including extended
//! acknowledgements), and stays safe under concurrent senders, receivers,
//! and closers. Family-specific layers (rtnetlink, generic netlink, ...)
//! are built on top of it.
//!
//! # Quick start
//!
//! ```ignore
//! use nlwire::{Config, Conn, Message, Protocol};
//! use nlwire::message::{MsgType, NLM_F_ACK, NLM_F_REQUEST};
//!
//! #[tokio::main]
//! async fn main() -> nlwire::Result<()> {
//!     let conn = Conn::dial(Protocol::Route, Config::default())?;
//!
//!     // Ask for an acknowledgement; execute() fills in length, sequence,
//!     // and port ID, then validates the reply against the request.
//!     let replies = conn.execute(Message {
//!         header: nlwire::Header {
//!             message_type: MsgType::NOOP,
//!             flags: NLM_F_REQUEST | NLM_F_ACK,
//!             ..Default::default()
//!         },
//!         data: vec![],
//!     }).await?;
//!
//!     println!("{} reply messages", replies.len());
//!     Ok(())
//! }
//! ```
//!
//! # Attributes
//!
//! Payloads for most families are trees of attribute TLVs:
//!
//! ```
//! use nlwire::{AttributeDecoder, AttributeEncoder};
//!
//! # fn main() -> nlwire::Result<()> {
//! let mut ae = AttributeEncoder::new();
//! ae.uint16(1, 1);
//! ae.string(2, "hello world");
//! ae.nested(3, |nae| {
//!     nae.uint32(1, 2);
//!     nae.uint32(2, 3);
//!     Ok(())
//! });
//! let buf = ae.encode()?;
//!
//! let mut ad = AttributeDecoder::new(&buf);
//! while ad.next() {
//!     match ad.kind() {
//!         2 => println!("greeting: {}", ad.string()),
//!         _ => {}
//!     }
//! }
//! ad.finish()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Multicast subscriptions
//!
//! Dial with [`Config::groups`] set (or call [`Conn::join_group`]) and loop
//! over [`Conn::receive`]. Replies delivered for multicast traffic carry
//! port ID 0; [`validate`] knows about the exception.
//!
//! # Platform support
//!
//! Only Linux has a kernel netlink peer. Other platforms compile against
//! the same surface, but every operation fails with a not-supported error.
//!
//! # Debugging
//!
//! Set `NLDEBUG=level=1` to dump every message crossing a connection to
//! stderr in the mnl binary layout (colorized iff stdout is a terminal),
//! or `NLDEBUG=format=log` for compact `tracing` events. Debug output
//! never changes behavior.

pub mod attr;
pub mod bpf;
mod config;
mod conn;
mod debug;
pub mod error;
pub mod message;
pub mod netns;
pub mod nlenc;
mod socket;
#[cfg(target_os = "linux")]
mod socket_linux;
#[cfg(not(target_os = "linux"))]
mod socket_others;

pub use attr::{Attribute, AttributeDecoder, AttributeEncoder};
pub use config::{Config, ConnOption};
pub use conn::{Conn, validate};
pub use error::{Error, KernelError, Result};
pub use message::{Header, Message, MsgType};
pub use socket::{Protocol, Socket};

#[cfg(target_os = "linux")]
pub use socket_linux::NetlinkSocket;
#[cfg(not(target_os = "linux"))]
pub use socket_others::NetlinkSocket;
