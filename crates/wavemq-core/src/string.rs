//! Length-prefixed UTF-8 strings and binary fields (MQTT 3.1.1 §1.5.3).

use crate::error::ProtocolError;

/// Longest string or binary field a 16-bit length prefix can describe.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// True for U+0000, the C0 controls and DEL plus the C1 controls.
#[inline]
fn is_disallowed(ch: char) -> bool {
    matches!(ch, '\u{0000}'..='\u{001F}' | '\u{007F}'..='\u{009F}')
}

/// Check a string against the character and length rules.
pub fn validate(s: &str) -> Result<(), ProtocolError> {
    if s.len() > MAX_FIELD_LEN {
        return Err(ProtocolError::StringTooLong(s.len()));
    }
    match s.chars().find(|&ch| is_disallowed(ch)) {
        Some(ch) => Err(ProtocolError::DisallowedCharacter(ch as u32)),
        None => Ok(()),
    }
}

/// Validate raw bytes read off the wire and copy them into an owned string.
pub fn from_wire(bytes: &[u8]) -> Result<String, ProtocolError> {
    let s = std::str::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)?;
    validate(s)?;
    Ok(s.to_owned())
}

/// Bytes the string occupies on the wire, prefix included.
#[inline]
pub fn wire_len(s: &str) -> usize {
    2 + s.len()
}

/// Append a validated, length-prefixed string.
pub fn write_str(s: &str, buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    validate(s)?;
    buf.extend_from_slice(&(s.len() as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Append a length-prefixed binary field.
pub fn write_binary(data: &[u8], buf: &mut Vec<u8>) -> Result<(), ProtocolError> {
    if data.len() > MAX_FIELD_LEN {
        return Err(ProtocolError::FieldTooLong(data.len()));
    }
    buf.extend_from_slice(&(data.len() as u16).to_be_bytes());
    buf.extend_from_slice(data);
    Ok(())
}
