//! Native-endian integer and string encoding for netlink payloads.
//!
//! Netlink carries integers in the host's byte order. These helpers read and
//! write fixed-width integers at exact offsets in a payload buffer.
//!
//! Every function requires a slice of exactly the integer's width and panics
//! otherwise: a mis-sized slice is a programming error in the caller, not a
//! condition to recover from at runtime.

macro_rules! int_codec {
    ($get:ident, $put:ident, $ty:ty, $width:expr) => {
        /// Decodes the value from `b` using native endianness.
        ///
        /// Panics unless `b` is exactly the integer's width.
        pub fn $get(b: &[u8]) -> $ty {
            assert!(
                b.len() == $width,
                concat!(stringify!($get), ": unexpected byte slice length: {}"),
                b.len()
            );

            let mut raw = [0u8; $width];
            raw.copy_from_slice(b);
            <$ty>::from_ne_bytes(raw)
        }

        /// Encodes the value into `b` using native endianness.
        ///
        /// Panics unless `b` is exactly the integer's width.
        pub fn $put(b: &mut [u8], v: $ty) {
            assert!(
                b.len() == $width,
                concat!(stringify!($put), ": unexpected byte slice length: {}"),
                b.len()
            );

            b.copy_from_slice(&v.to_ne_bytes());
        }
    };
}

int_codec!(uint8, put_uint8, u8, 1);
int_codec!(uint16, put_uint16, u16, 2);
int_codec!(uint32, put_uint32, u32, 4);
int_codec!(uint64, put_uint64, u64, 8);
int_codec!(int8, put_int8, i8, 1);
int_codec!(int16, put_int16, i16, 2);
int_codec!(int32, put_int32, i32, 4);
int_codec!(int64, put_int64, i64, 8);

/// Encodes a string as a NUL-terminated byte payload.
///
/// Panics if `s` contains an interior NUL byte.
pub fn bytes(s: &str) -> Vec<u8> {
    assert!(
        !s.contains('\0'),
        "bytes: input string must not contain NUL: {:?}",
        s
    );

    let mut b = Vec::with_capacity(s.len() + 1);
    b.extend_from_slice(s.as_bytes());
    b.push(0);
    b
}

/// Decodes a NUL-terminated byte payload into a string.
///
/// The payload is cut at the first NUL; a payload with no terminator is
/// consumed whole. Non-UTF-8 bytes are replaced.
pub fn string(b: &[u8]) -> String {
    let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
    String::from_utf8_lossy(&b[..end]).into_owned()
}
