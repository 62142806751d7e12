//! Error types for the MQTT codec.

use thiserror::Error;

use crate::packet::PacketType;

/// Codec error.
///
/// `Incomplete` is not a protocol violation: the caller should buffer more
/// bytes and call the decoder again with the longer window.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Incomplete packet: need {needed} bytes, have {have}")]
    Incomplete { needed: usize, have: usize },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl Error {
    /// True when more input could turn this into a successful decode.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::Incomplete { .. })
    }

    /// The protocol violation, if this is not an incomplete-input error.
    pub fn protocol(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(e) => Some(e),
            Error::Incomplete { .. } => None,
        }
    }
}

/// MQTT protocol errors (malformed input or unencodable records).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Reserved flag violation: {packet_type:?} requires flags {expected:#04x}, got {actual:#04x}")]
    ReservedFlags {
        packet_type: PacketType,
        expected: u8,
        actual: u8,
    },

    #[error("Invalid QoS: {0}")]
    InvalidQoS(u8),

    #[error("Invalid remaining length encoding")]
    InvalidRemainingLength,

    #[error("Remaining length {0} exceeds 268435455")]
    RemainingLengthTooLarge(usize),

    #[error("Packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("Disallowed character U+{0:04X} in UTF-8 string")]
    DisallowedCharacter(u32),

    #[error("String too long: {0} bytes (max 65535)")]
    StringTooLong(usize),

    #[error("Binary field too long: {0} bytes (max 65535)")]
    FieldTooLong(usize),

    #[error("Invalid protocol name: expected 'MQTT', got '{0}'")]
    InvalidProtocolName(String),

    #[error("Unsupported protocol level: {0}")]
    UnsupportedProtocolVersion(u8),

    #[error("Invalid connect flags: {0:#04x}")]
    InvalidConnectFlags(u8),

    #[error("Invalid client identifier: {0:?}")]
    InvalidClientId(String),

    #[error("Invalid CONNACK: {0}")]
    InvalidConnack(String),

    #[error("Invalid topic name: {0:?}")]
    InvalidTopicName(String),

    #[error("Invalid topic filter: {0:?}")]
    InvalidTopicFilter(String),

    #[error("{0:?} must carry at least one topic")]
    EmptyTopicList(PacketType),

    #[error("{0:?} packet identifier must be non-zero")]
    ZeroPacketId(PacketType),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),
}

pub type Result<T> = std::result::Result<T, Error>;
