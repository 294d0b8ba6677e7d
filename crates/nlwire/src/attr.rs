//! Netlink attribute (TLV) codec.
//!
//! Attributes are packed into the payload of a [`Message`](crate::Message)
//! for most netlink families. Two APIs are provided:
//!
//! - [`Attribute`] with [`marshal_attributes`]/[`unmarshal_attributes`] for
//!   working with flat slices of attributes.
//! - [`AttributeEncoder`]/[`AttributeDecoder`] for building and walking
//!   attribute streams with typed accessors and nested trees.
//!
//! The decoder is lazy: it advances one attribute per [`AttributeDecoder::next`]
//! call and keeps a sticky terminal error, so decoding code stays linear and
//! checks a single error at the end.

use crate::error::{Error, Result};
use crate::nlenc;

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to the next NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4;

/// Attribute type flag: the payload is itself a sequence of attributes.
pub const NLA_F_NESTED: u16 = 1 << 15;
/// Attribute type flag: integer payloads are in network (big-endian) order.
pub const NLA_F_NET_BYTEORDER: u16 = 1 << 14;
/// Mask selecting the 14-bit attribute ID.
pub const NLA_TYPE_MASK: u16 = !(NLA_F_NESTED | NLA_F_NET_BYTEORDER);

/// A netlink attribute: a 16-bit type, flag bits, and an opaque payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attribute {
    /// Length of the attribute: header plus payload, not counting padding.
    pub length: u16,
    /// The raw type field, including the flag bits.
    pub attr_type: u16,
    /// The payload, interpreted according to the attribute's type.
    pub data: Vec<u8>,
}

impl Attribute {
    /// The 14-bit attribute ID with the flag bits masked off.
    pub fn kind(&self) -> u16 {
        self.attr_type & NLA_TYPE_MASK
    }

    /// Whether the payload is a nested attribute sequence.
    pub fn is_nested(&self) -> bool {
        self.attr_type & NLA_F_NESTED != 0
    }

    /// Whether integer payloads are in network byte order.
    pub fn is_net_byte_order(&self) -> bool {
        self.attr_type & NLA_F_NET_BYTEORDER != 0
    }

    /// Marshal the attribute into its padded wire form.
    pub fn marshal(&self) -> Result<Vec<u8>> {
        if self.is_nested() && self.is_net_byte_order() {
            return Err(Error::InvalidAttribute(
                "nested and net byte order flags are mutually exclusive".into(),
            ));
        }
        let len = self.length as usize;
        if len < NLA_HDRLEN || len != NLA_HDRLEN + self.data.len() {
            return Err(Error::InvalidAttribute(
                "attribute length disagrees with payload".into(),
            ));
        }

        let mut b = vec![0u8; nla_align(len)];
        nlenc::put_uint16(&mut b[0..2], self.length);
        nlenc::put_uint16(&mut b[2..4], self.attr_type);
        b[NLA_HDRLEN..len].copy_from_slice(&self.data);
        Ok(b)
    }

    /// Unmarshal one attribute from the front of a buffer.
    pub fn unmarshal(b: &[u8]) -> Result<Attribute> {
        if b.len() < NLA_HDRLEN {
            return Err(Error::InvalidAttribute(
                "length too short or too large for buffer".into(),
            ));
        }

        let length = nlenc::uint16(&b[0..2]);
        let attr_type = nlenc::uint16(&b[2..4]);

        // A zero length is tolerated so iteration can skip it.
        if length == 0 {
            return Ok(Attribute {
                length,
                attr_type,
                data: Vec::new(),
            });
        }

        let len = length as usize;
        if len < NLA_HDRLEN || nla_align(len) > b.len() {
            return Err(Error::InvalidAttribute(
                "length too short or too large for buffer".into(),
            ));
        }

        Ok(Attribute {
            length,
            attr_type,
            data: b[NLA_HDRLEN..len].to_vec(),
        })
    }
}

/// Pack a slice of attributes into one byte buffer.
///
/// An attribute with `length` 0 has it computed from the payload.
pub fn marshal_attributes(attrs: &[Attribute]) -> Result<Vec<u8>> {
    let mut b = Vec::with_capacity(attrs.iter().map(|a| NLA_HDRLEN + nla_align(a.data.len())).sum());

    for a in attrs {
        let mut a = a.clone();
        if a.length == 0 {
            let len = NLA_HDRLEN + a.data.len();
            if len > u16::MAX as usize {
                return Err(Error::InvalidAttribute(format!(
                    "attribute payload too large: {} bytes",
                    a.data.len()
                )));
            }
            a.length = len as u16;
        }

        b.extend_from_slice(&a.marshal()?);
    }

    Ok(b)
}

/// Unpack a byte buffer into a flat slice of attributes.
///
/// Zero-length attributes are skipped, matching the kernel's iteration.
pub fn unmarshal_attributes(b: &[u8]) -> Result<Vec<Attribute>> {
    let mut attrs = Vec::new();
    let mut i = 0;

    while i < b.len() {
        let a = Attribute::unmarshal(&b[i..])?;

        if a.length == 0 {
            i += NLA_HDRLEN;
            continue;
        }

        i += nla_align(a.length as usize);
        attrs.push(a);
    }

    Ok(attrs)
}

/// Builds an attribute stream through typed appenders.
///
/// Errors encountered while appending are stashed; [`encode`](Self::encode)
/// surfaces the first one. With
/// [`set_network_byte_order`](Self::set_network_byte_order) enabled, integer
/// appenders emit big-endian payloads and set [`NLA_F_NET_BYTEORDER`] on the
/// emitted attributes.
#[derive(Debug, Default)]
pub struct AttributeEncoder {
    buf: Vec<u8>,
    net_byte_order: bool,
    err: Option<Error>,
}

macro_rules! encode_int {
    ($name:ident, $ty:ty) => {
        /// Append an integer attribute.
        pub fn $name(&mut self, attr_type: u16, value: $ty) {
            let data = if self.net_byte_order {
                value.to_be_bytes()
            } else {
                value.to_ne_bytes()
            };
            let attr_type = if self.net_byte_order {
                attr_type | NLA_F_NET_BYTEORDER
            } else {
                attr_type
            };
            self.append(attr_type, &data);
        }
    };
}

impl AttributeEncoder {
    /// Create an empty encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle network byte order for subsequently appended integers.
    pub fn set_network_byte_order(&mut self, enabled: bool) {
        self.net_byte_order = enabled;
    }

    encode_int!(uint8, u8);
    encode_int!(uint16, u16);
    encode_int!(uint32, u32);
    encode_int!(uint64, u64);
    encode_int!(int8, i8);
    encode_int!(int16, i16);
    encode_int!(int32, i32);
    encode_int!(int64, i64);

    /// Append an empty attribute when `value` is true; no-op otherwise.
    pub fn flag(&mut self, attr_type: u16, value: bool) {
        if value {
            self.append(attr_type, &[]);
        }
    }

    /// Append a raw byte attribute.
    pub fn bytes(&mut self, attr_type: u16, data: &[u8]) {
        self.append(attr_type, data);
    }

    /// Append a NUL-terminated string attribute.
    pub fn string(&mut self, attr_type: u16, value: &str) {
        if self.err.is_some() {
            return;
        }
        if value.contains('\0') {
            self.err = Some(Error::InvalidAttribute(
                "string attribute must not contain NUL".into(),
            ));
            return;
        }
        self.append(attr_type, &nlenc::bytes(value));
    }

    /// Append a nested attribute built by a child encoder.
    ///
    /// The child inherits the byte-order mode; its output is framed as one
    /// attribute with [`NLA_F_NESTED`] set.
    pub fn nested<F>(&mut self, attr_type: u16, f: F)
    where
        F: FnOnce(&mut AttributeEncoder) -> Result<()>,
    {
        if self.err.is_some() {
            return;
        }

        let mut child = AttributeEncoder::new();
        child.net_byte_order = self.net_byte_order;

        if let Err(e) = f(&mut child) {
            self.err = Some(e);
            return;
        }

        match child.encode() {
            Ok(data) => self.append(attr_type | NLA_F_NESTED, &data),
            Err(e) => self.err = Some(e),
        }
    }

    /// Return the encoded buffer, or the first error stashed while encoding.
    pub fn encode(self) -> Result<Vec<u8>> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.buf),
        }
    }

    fn append(&mut self, attr_type: u16, data: &[u8]) {
        if self.err.is_some() {
            return;
        }
        if attr_type & NLA_F_NESTED != 0 && attr_type & NLA_F_NET_BYTEORDER != 0 {
            self.err = Some(Error::InvalidAttribute(
                "nested and net byte order flags are mutually exclusive".into(),
            ));
            return;
        }
        if NLA_HDRLEN + data.len() > u16::MAX as usize {
            self.err = Some(Error::InvalidAttribute(format!(
                "attribute payload too large: {} bytes",
                data.len()
            )));
            return;
        }

        let mut hdr = [0u8; NLA_HDRLEN];
        nlenc::put_uint16(&mut hdr[0..2], (NLA_HDRLEN + data.len()) as u16);
        nlenc::put_uint16(&mut hdr[2..4], attr_type);

        self.buf.extend_from_slice(&hdr);
        self.buf.extend_from_slice(data);

        let aligned = nla_align(self.buf.len());
        self.buf.resize(aligned, 0);
    }
}

/// Walks an attribute stream one attribute at a time.
///
/// Scalar accessors apply to the attribute most recently yielded by
/// [`next`](Self::next). Any parse error is stashed: subsequent accessors
/// return zero values, `next` returns `false`, and [`finish`](Self::finish)
/// reports the single terminal error.
#[derive(Debug)]
pub struct AttributeDecoder<'a> {
    b: &'a [u8],
    i: usize,

    // Current attribute, valid after a successful next().
    attr_type: u16,
    data: &'a [u8],

    net_byte_order: bool,
    err: Option<Error>,
}

macro_rules! decode_int {
    ($name:ident, $ty:ty, $width:expr) => {
        /// Decode the current attribute as an integer.
        ///
        /// Returns 0 and stashes an error if the payload width is wrong.
        pub fn $name(&mut self) -> $ty {
            match self.scalar(concat!("length ", stringify!($width)), $width) {
                Some(d) => {
                    let mut raw = [0u8; $width];
                    raw.copy_from_slice(d);
                    if self.net_byte_order {
                        <$ty>::from_be_bytes(raw)
                    } else {
                        <$ty>::from_ne_bytes(raw)
                    }
                }
                None => 0,
            }
        }
    };
}

impl<'a> AttributeDecoder<'a> {
    /// Create a decoder over an attribute stream.
    pub fn new(b: &'a [u8]) -> AttributeDecoder<'a> {
        AttributeDecoder {
            b,
            i: 0,
            attr_type: 0,
            data: &[],
            net_byte_order: false,
            err: None,
        }
    }

    /// Toggle network byte order for integer accessors.
    pub fn set_network_byte_order(&mut self, enabled: bool) {
        self.net_byte_order = enabled;
    }

    /// Advance to the next attribute. Returns `false` at the end of the
    /// stream or after an error has been stashed.
    pub fn next(&mut self) -> bool {
        if self.err.is_some() {
            return false;
        }

        loop {
            if self.i >= self.b.len() {
                return false;
            }

            let rem = &self.b[self.i..];
            if rem.len() < NLA_HDRLEN {
                self.set_err(Error::InvalidAttribute(
                    "length too short or too large for buffer".into(),
                ));
                return false;
            }

            let length = nlenc::uint16(&rem[0..2]) as usize;
            let attr_type = nlenc::uint16(&rem[2..4]);

            // Zero-length attributes are skipped, matching the kernel.
            if length == 0 {
                self.i += NLA_HDRLEN;
                continue;
            }

            if length < NLA_HDRLEN || nla_align(length) > rem.len() {
                self.set_err(Error::InvalidAttribute(
                    "length too short or too large for buffer".into(),
                ));
                return false;
            }

            self.attr_type = attr_type;
            self.data = &rem[NLA_HDRLEN..length];
            self.i += nla_align(length);
            return true;
        }
    }

    /// The current attribute's 14-bit ID, flag bits masked off.
    pub fn kind(&self) -> u16 {
        self.attr_type & NLA_TYPE_MASK
    }

    /// The current attribute's raw 16-bit type field, flag bits included.
    pub fn type_flags(&self) -> u16 {
        self.attr_type
    }

    decode_int!(uint8, u8, 1);
    decode_int!(uint16, u16, 2);
    decode_int!(uint32, u32, 4);
    decode_int!(uint64, u64, 8);
    decode_int!(int8, i8, 1);
    decode_int!(int16, i16, 2);
    decode_int!(int32, i32, 4);
    decode_int!(int64, i64, 8);

    /// Interpret the current attribute as a presence flag.
    pub fn flag(&mut self) -> bool {
        self.err.is_none() && self.data.is_empty()
    }

    /// Copy the current attribute's payload.
    pub fn bytes(&mut self) -> Vec<u8> {
        if self.err.is_some() {
            return Vec::new();
        }
        self.data.to_vec()
    }

    /// Decode the current attribute as a NUL-terminated string.
    pub fn string(&mut self) -> String {
        if self.err.is_some() {
            return String::new();
        }

        let end = self.data.iter().position(|&c| c == 0).unwrap_or(self.data.len());
        match std::str::from_utf8(&self.data[..end]) {
            Ok(s) => s.to_owned(),
            Err(_) => {
                self.set_err(Error::InvalidAttribute(
                    "string attribute is not valid UTF-8".into(),
                ));
                String::new()
            }
        }
    }

    /// Decode the current attribute's payload as a nested attribute stream.
    ///
    /// The child decoder inherits the byte-order mode; errors from the
    /// closure or stashed in the child propagate to this decoder.
    pub fn nested<F>(&mut self, f: F)
    where
        F: FnOnce(&mut AttributeDecoder<'a>) -> Result<()>,
    {
        if self.err.is_some() {
            return;
        }

        let mut child = AttributeDecoder::new(self.data);
        child.net_byte_order = self.net_byte_order;

        if let Err(e) = f(&mut child) {
            self.set_err(e);
            return;
        }
        if let Err(e) = child.finish() {
            self.set_err(e);
        }
    }

    /// Surface the terminal error, if any accessor stashed one.
    pub fn finish(self) -> Result<()> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn scalar(&mut self, what: &str, width: usize) -> Option<&'a [u8]> {
        if self.err.is_some() {
            return None;
        }
        if self.data.len() != width {
            self.set_err(Error::InvalidAttribute(format!(
                "unexpected attribute {}, got: {}",
                what,
                self.data.len()
            )));
            return None;
        }
        Some(self.data)
    }

    fn set_err(&mut self, e: Error) {
        if self.err.is_none() {
            self.err = Some(e);
        }
    }
}
