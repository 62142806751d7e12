//! Remaining Length encoding/decoding (MQTT 3.1.1 §2.2.3).
//!
//! Seven value bits per byte, least significant group first, high bit set
//! while more bytes follow:
//! - 0-127: 1 byte
//! - 128-16383: 2 bytes
//! - 16384-2097151: 3 bytes
//! - 2097152-268435455: 4 bytes

use crate::error::{Error, ProtocolError, Result};

/// Largest value a four-byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

/// Maximum number of bytes in an encoded remaining length.
pub const MAX_ENCODED_LEN: usize = 4;

/// Decode a remaining length from the start of `buf`.
///
/// Returns `(value, bytes_consumed)`. Fails with [`Error::Incomplete`] when
/// `buf` ends before a terminating byte, and with
/// [`ProtocolError::InvalidRemainingLength`] when the fourth byte still has
/// its continuation bit set.
///
/// # Example
/// ```
/// use wavemq_core::varint::decode_remaining_length;
/// let (value, consumed) = decode_remaining_length(&[0x80, 0x01]).unwrap();
/// assert_eq!(value, 128);
/// assert_eq!(consumed, 2);
/// ```
pub fn decode_remaining_length(buf: &[u8]) -> Result<(u32, usize)> {
    let mut multiplier = 1u32;
    let mut value = 0u32;

    for (i, &byte) in buf.iter().enumerate().take(MAX_ENCODED_LEN) {
        value += ((byte & 0x7F) as u32) * multiplier;

        if (byte & 0x80) == 0 {
            return Ok((value, i + 1));
        }

        if i + 1 == MAX_ENCODED_LEN {
            return Err(ProtocolError::InvalidRemainingLength.into());
        }

        multiplier *= 128;
    }

    Err(Error::Incomplete {
        needed: buf.len() + 1,
        have: buf.len(),
    })
}

/// Encode a remaining length, appending to `buf`.
///
/// Returns the number of bytes written (1 to 4). Values above
/// [`MAX_REMAINING_LENGTH`] are rejected without touching `buf`.
///
/// # Example
/// ```
/// use wavemq_core::varint::encode_remaining_length;
/// let mut buf = Vec::new();
/// let written = encode_remaining_length(300, &mut buf).unwrap();
/// assert_eq!(written, 2);
/// assert_eq!(&buf, &[0xAC, 0x02]);
/// ```
pub fn encode_remaining_length(
    mut value: usize,
    buf: &mut Vec<u8>,
) -> std::result::Result<usize, ProtocolError> {
    if value > MAX_REMAINING_LENGTH {
        return Err(ProtocolError::RemainingLengthTooLarge(value));
    }

    let start = buf.len();
    loop {
        let mut byte = (value % 128) as u8;
        value /= 128;
        if value > 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Number of bytes needed to encode `value`.
///
/// # Example
/// ```
/// use wavemq_core::varint::encoded_len;
/// assert_eq!(encoded_len(0), 1);
/// assert_eq!(encoded_len(127), 1);
/// assert_eq!(encoded_len(128), 2);
/// assert_eq!(encoded_len(16384), 3);
/// ```
pub fn encoded_len(mut value: usize) -> usize {
    let mut len = 0;
    loop {
        len += 1;
        value /= 128;
        if value == 0 {
            break;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_decode_single_byte() {
        assert_eq!(decode_remaining_length(&[0]).unwrap(), (0, 1));
        assert_eq!(decode_remaining_length(&[0x7F]).unwrap(), (127, 1));
    }

    #[test]
    fn test_decode_boundaries() {
        assert_eq!(decode_remaining_length(&[0x80, 0x01]).unwrap(), (128, 2));
        assert_eq!(decode_remaining_length(&[0xFF, 0x7F]).unwrap(), (16383, 2));
        assert_eq!(
            decode_remaining_length(&[0x80, 0x80, 0x01]).unwrap(),
            (16384, 3)
        );
        assert_eq!(
            decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0x7F]).unwrap(),
            (268_435_455, 4)
        );
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        assert_eq!(decode_remaining_length(&[0x05, 0xFF, 0xFF]).unwrap(), (5, 1));
    }

    #[test]
    fn test_decode_incomplete() {
        assert!(decode_remaining_length(&[]).unwrap_err().is_incomplete());
        assert!(decode_remaining_length(&[0x80]).unwrap_err().is_incomplete());
        assert!(decode_remaining_length(&[0x80, 0x80, 0x80])
            .unwrap_err()
            .is_incomplete());
    }

    #[test]
    fn test_decode_five_bytes_is_malformed() {
        let err = decode_remaining_length(&[0x80, 0x80, 0x80, 0x80, 0x01]).unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::InvalidRemainingLength));

        // The fourth continuation byte alone is enough to know
        let err = decode_remaining_length(&[0xFF, 0xFF, 0xFF, 0xFF]).unwrap_err();
        assert_eq!(err, Error::Protocol(ProtocolError::InvalidRemainingLength));
    }

    #[test]
    fn test_encode() {
        let mut buf = Vec::new();
        assert_eq!(encode_remaining_length(0, &mut buf).unwrap(), 1);
        assert_eq!(&buf, &[0]);

        buf.clear();
        assert_eq!(encode_remaining_length(127, &mut buf).unwrap(), 1);
        assert_eq!(&buf, &[0x7F]);

        buf.clear();
        assert_eq!(encode_remaining_length(128, &mut buf).unwrap(), 2);
        assert_eq!(&buf, &[0x80, 0x01]);

        buf.clear();
        assert_eq!(encode_remaining_length(268_435_455, &mut buf).unwrap(), 4);
        assert_eq!(&buf, &[0xFF, 0xFF, 0xFF, 0x7F]);
    }

    #[test]
    fn test_encode_too_large() {
        let mut buf = vec![0xAA];
        assert_eq!(
            encode_remaining_length(268_435_456, &mut buf),
            Err(ProtocolError::RemainingLengthTooLarge(268_435_456))
        );
        assert_eq!(buf, vec![0xAA]);
    }

    #[test]
    fn test_encoded_len() {
        assert_eq!(encoded_len(0), 1);
        assert_eq!(encoded_len(16383), 2);
        assert_eq!(encoded_len(2097151), 3);
        assert_eq!(encoded_len(2097152), 4);
        assert_eq!(encoded_len(268_435_455), 4);
    }

    proptest! {
        #[test]
        fn prop_remaining_length_round_trip(value in 0usize..=MAX_REMAINING_LENGTH) {
            let mut buf = Vec::new();
            let written = encode_remaining_length(value, &mut buf).unwrap();
            prop_assert!(written <= MAX_ENCODED_LEN);
            prop_assert_eq!(written, encoded_len(value));

            let (decoded, consumed) = decode_remaining_length(&buf).unwrap();
            prop_assert_eq!(decoded as usize, value);
            prop_assert_eq!(consumed, written);
        }
    }
}
