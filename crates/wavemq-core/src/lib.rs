//! wavemq-core - MQTT 3.1.1 packet codec.
//!
//! This crate encodes and decodes the fourteen MQTT 3.1.1 control packets.
//! It works on plain byte slices and owned records; transport and delivery
//! tracking live elsewhere.

pub mod codec;
pub mod error;
pub mod packet;
pub mod string;
pub mod varint;

pub use codec::{decode_packet, decode_packet_with_limit, encode_packet, FixedHeader};
pub use error::{Error, ProtocolError, Result};
pub use packet::*;
