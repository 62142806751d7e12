//! Delivery error types.

use thiserror::Error;
use wavemq_core::{PacketType, ProtocolError};

/// Protocol-sequence violations detected by the delivery state machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Packet identifier {0} is already in flight")]
    IdentifierInUse(u16),

    #[error("Unexpected {packet_type:?} for packet identifier {packet_id}")]
    UnexpectedAck {
        packet_type: PacketType,
        packet_id: u16,
    },

    #[error("No in-flight exchange for packet identifier {0}")]
    UnknownIdentifier(u16),

    #[error("QoS 1/2 PUBLISH requires a non-zero packet identifier")]
    InvalidPacketId,

    #[error("In-flight limit of {0} reached")]
    InflightLimitReached(usize),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, DeliveryError>;
