//! MQTT 3.1.1 packet encoding and decoding.
//!
//! Decoding is all-or-nothing: a packet is parsed only once its whole frame
//! is in the buffer, and an [`Error::Incomplete`] leaves nothing behind.

use bytes::Bytes;
use log::trace;

use crate::error::{Error, ProtocolError, Result};
use crate::packet::{
    Connack, ConnackCode, Connect, Packet, PacketType, Publish, QoS, Suback, SubackCode,
    Subscribe, Unsubscribe, Will,
};
use crate::string;
use crate::varint;

/// Protocol name carried in every CONNECT.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol level for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Longest client identifier accepted.
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Parsed fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedHeader {
    pub packet_type: PacketType,
    pub flags: u8,
    pub remaining_length: usize,
    /// First byte plus the remaining length bytes.
    pub header_len: usize,
}

impl FixedHeader {
    /// Parse the fixed header at the start of `buf`.
    ///
    /// The type and flags nibbles are checked from the first byte alone, so a
    /// bad header is reported even when the rest of the packet has not arrived.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let Some(&first) = buf.first() else {
            return Err(Error::Incomplete { needed: 2, have: 0 });
        };

        let packet_type = PacketType::try_from(first >> 4)?;
        let flags = first & 0x0F;

        match packet_type.required_flags() {
            // MQTT-2.2.2-2: reserved flags MUST match the table
            Some(expected) if expected != flags => {
                return Err(ProtocolError::ReservedFlags {
                    packet_type,
                    expected,
                    actual: flags,
                }
                .into());
            }
            Some(_) => {}
            // MQTT-3.3.1-4: both QoS bits set is malformed
            None => {
                QoS::try_from((flags >> 1) & 0x03)?;
            }
        }

        let (remaining_length, len_bytes) = match varint::decode_remaining_length(&buf[1..]) {
            Ok(decoded) => decoded,
            Err(Error::Incomplete { needed, have }) => {
                return Err(Error::Incomplete {
                    needed: needed + 1,
                    have: have + 1,
                })
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            packet_type,
            flags,
            remaining_length: remaining_length as usize,
            header_len: 1 + len_bytes,
        })
    }

    /// Size of the whole packet on the wire.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.header_len + self.remaining_length
    }
}

/// Cursor over the body of one complete packet.
///
/// Running out of bytes here means the remaining length lied about the
/// body, so short reads are malformed rather than incomplete.
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_u8(&mut self) -> std::result::Result<u8, ProtocolError> {
        let b = self.read_bytes(1)?[0];
        Ok(b)
    }

    fn read_u16(&mut self) -> std::result::Result<u16, ProtocolError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn read_bytes(&mut self, len: usize) -> std::result::Result<&'a [u8], ProtocolError> {
        if self.remaining() < len {
            return Err(ProtocolError::MalformedPacket(format!(
                "Unexpected end of packet: need {} bytes, have {}",
                len,
                self.remaining()
            )));
        }
        let bytes = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_string(&mut self) -> std::result::Result<String, ProtocolError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        string::from_wire(bytes)
    }

    fn read_binary(&mut self) -> std::result::Result<Bytes, ProtocolError> {
        let len = self.read_u16()? as usize;
        let bytes = self.read_bytes(len)?;
        Ok(Bytes::copy_from_slice(bytes))
    }

    fn read_rest(&mut self) -> &'a [u8] {
        let bytes = &self.buf[self.pos..];
        self.pos = self.buf.len();
        bytes
    }

    fn read_packet_id(
        &mut self,
        packet_type: PacketType,
    ) -> std::result::Result<u16, ProtocolError> {
        let packet_id = self.read_u16()?;
        check_packet_id(packet_type, packet_id)?;
        Ok(packet_id)
    }

    /// Fail if any of the body was left unread.
    fn finish(self, packet_type: PacketType) -> std::result::Result<(), ProtocolError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(ProtocolError::MalformedPacket(format!(
                "{:?} has {} unexpected trailing bytes",
                packet_type, extra
            ))),
        }
    }
}

/// Decode one packet from the start of `buf`.
///
/// Returns the packet and the number of bytes it occupied.
pub fn decode_packet(buf: &[u8]) -> Result<(Packet, usize)> {
    decode_packet_with_limit(buf, 0)
}

/// Decode one packet, rejecting any whose total size exceeds
/// `max_packet_size` (0 = no limit).
///
/// The limit is enforced as soon as the remaining length is known, before
/// the body has arrived.
pub fn decode_packet_with_limit(buf: &[u8], max_packet_size: usize) -> Result<(Packet, usize)> {
    let header = FixedHeader::parse(buf)?;
    let total_len = header.total_len();

    if max_packet_size > 0 && total_len > max_packet_size {
        return Err(ProtocolError::PacketTooLarge {
            size: total_len,
            max: max_packet_size,
        }
        .into());
    }

    if buf.len() < total_len {
        return Err(Error::Incomplete {
            needed: total_len,
            have: buf.len(),
        });
    }

    let body = &buf[header.header_len..total_len];

    let packet = match header.packet_type {
        PacketType::Connect => decode_connect(body)?,
        PacketType::Connack => decode_connack(body)?,
        PacketType::Publish => decode_publish(header.flags, body)?,
        PacketType::Puback => Packet::Puback {
            packet_id: decode_ack(PacketType::Puback, body)?,
        },
        PacketType::Pubrec => Packet::Pubrec {
            packet_id: decode_ack(PacketType::Pubrec, body)?,
        },
        PacketType::Pubrel => Packet::Pubrel {
            packet_id: decode_ack(PacketType::Pubrel, body)?,
        },
        PacketType::Pubcomp => Packet::Pubcomp {
            packet_id: decode_ack(PacketType::Pubcomp, body)?,
        },
        PacketType::Subscribe => decode_subscribe(body)?,
        PacketType::Suback => decode_suback(body)?,
        PacketType::Unsubscribe => decode_unsubscribe(body)?,
        PacketType::Unsuback => Packet::Unsuback {
            packet_id: decode_ack(PacketType::Unsuback, body)?,
        },
        PacketType::Pingreq => {
            Decoder::new(body).finish(PacketType::Pingreq)?;
            Packet::Pingreq
        }
        PacketType::Pingresp => {
            Decoder::new(body).finish(PacketType::Pingresp)?;
            Packet::Pingresp
        }
        PacketType::Disconnect => {
            Decoder::new(body).finish(PacketType::Disconnect)?;
            Packet::Disconnect
        }
    };

    trace!("Decoded {:?} ({} bytes)", header.packet_type, total_len);

    Ok((packet, total_len))
}

fn decode_connect(body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let mut dec = Decoder::new(body);

    let protocol_name = dec.read_string()?;
    if protocol_name != PROTOCOL_NAME {
        return Err(ProtocolError::InvalidProtocolName(protocol_name));
    }

    let level = dec.read_u8()?;
    if level != PROTOCOL_LEVEL {
        return Err(ProtocolError::UnsupportedProtocolVersion(level));
    }

    let flags = dec.read_u8()?;
    let clean_session = (flags & 0x02) != 0;
    let will_flag = (flags & 0x04) != 0;
    let will_qos = QoS::try_from((flags >> 3) & 0x03)?;
    let will_retain = (flags & 0x20) != 0;
    let password_flag = (flags & 0x40) != 0;
    let username_flag = (flags & 0x80) != 0;

    // MQTT-3.1.2-3: reserved bit must be 0
    if (flags & 0x01) != 0 {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    // MQTT-3.1.2-13/15: no will means will QoS and will retain are 0
    if !will_flag && (will_qos != QoS::AtMostOnce || will_retain) {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    // MQTT-3.1.2-22: password requires username
    if password_flag && !username_flag {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    let keep_alive = dec.read_u16()?;

    let client_id = dec.read_string()?;
    validate_client_id(&client_id)?;

    let will = if will_flag {
        let topic = dec.read_string()?;
        validate_topic_name(&topic)?;
        let message = dec.read_binary()?;
        Some(Will {
            topic,
            message,
            qos: will_qos,
            retain: will_retain,
        })
    } else {
        None
    };

    let username = if username_flag {
        Some(dec.read_string()?)
    } else {
        None
    };

    let password = if password_flag {
        Some(dec.read_binary()?)
    } else {
        None
    };

    dec.finish(PacketType::Connect)?;

    Ok(Packet::Connect(Connect {
        clean_session,
        keep_alive,
        client_id,
        will,
        username,
        password,
    }))
}

fn decode_connack(body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let mut dec = Decoder::new(body);

    let ack_flags = dec.read_u8()?;
    // MQTT-3.2.2-1: bits 7-1 are reserved
    if (ack_flags & 0xFE) != 0 {
        return Err(ProtocolError::InvalidConnack(format!(
            "reserved acknowledge flags set: {:#04x}",
            ack_flags
        )));
    }
    let code = ConnackCode::try_from(dec.read_u8()?)?;
    dec.finish(PacketType::Connack)?;

    let connack = Connack {
        session_present: (ack_flags & 0x01) != 0,
        code,
    };
    check_connack(&connack)?;

    Ok(Packet::Connack(connack))
}

fn decode_publish(flags: u8, body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let dup = (flags & 0x08) != 0;
    let qos = QoS::try_from((flags >> 1) & 0x03)?;
    let retain = (flags & 0x01) != 0;

    // MQTT-3.3.1-2: DUP must be 0 for QoS 0
    if dup && qos == QoS::AtMostOnce {
        return Err(ProtocolError::MalformedPacket(
            "DUP flag set on a QoS 0 PUBLISH".into(),
        ));
    }

    let mut dec = Decoder::new(body);

    let topic = dec.read_string()?;
    validate_topic_name(&topic)?;

    let packet_id = if qos != QoS::AtMostOnce {
        Some(dec.read_packet_id(PacketType::Publish)?)
    } else {
        None
    };

    let payload = Bytes::copy_from_slice(dec.read_rest());

    Ok(Packet::Publish(Publish {
        dup,
        qos,
        retain,
        topic,
        packet_id,
        payload,
    }))
}

/// Body of PUBACK, PUBREC, PUBREL, PUBCOMP and UNSUBACK: exactly one packet id.
fn decode_ack(packet_type: PacketType, body: &[u8]) -> std::result::Result<u16, ProtocolError> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id(packet_type)?;
    dec.finish(packet_type)?;
    Ok(packet_id)
}

fn decode_subscribe(body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id(PacketType::Subscribe)?;

    let mut topics = Vec::new();
    while dec.remaining() > 0 {
        let filter = dec.read_string()?;
        validate_topic_filter(&filter)?;

        // MQTT-3.8.3-4: upper six bits of the requested QoS byte are reserved
        let options = dec.read_u8()?;
        if (options & 0xFC) != 0 {
            return Err(ProtocolError::MalformedPacket(format!(
                "Reserved bits set in requested QoS byte: {:#04x}",
                options
            )));
        }
        topics.push((filter, QoS::try_from(options)?));
    }

    // MQTT-3.8.3-3: at least one topic filter
    if topics.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Subscribe));
    }

    Ok(Packet::Subscribe(Subscribe { packet_id, topics }))
}

fn decode_suback(body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id(PacketType::Suback)?;

    let return_codes = dec
        .read_rest()
        .iter()
        .map(|&b| SubackCode::try_from(b))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    if return_codes.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Suback));
    }

    Ok(Packet::Suback(Suback {
        packet_id,
        return_codes,
    }))
}

fn decode_unsubscribe(body: &[u8]) -> std::result::Result<Packet, ProtocolError> {
    let mut dec = Decoder::new(body);
    let packet_id = dec.read_packet_id(PacketType::Unsubscribe)?;

    let mut topics = Vec::new();
    while dec.remaining() > 0 {
        let filter = dec.read_string()?;
        validate_topic_filter(&filter)?;
        topics.push(filter);
    }

    // MQTT-3.10.3-2: at least one topic filter
    if topics.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Unsubscribe));
    }

    Ok(Packet::Unsubscribe(Unsubscribe { packet_id, topics }))
}

// === Encoding ===

/// Encode `packet`, appending the complete frame to `buf`.
///
/// On error `buf` is left exactly as it was.
pub fn encode_packet(packet: &Packet, buf: &mut Vec<u8>) -> std::result::Result<(), ProtocolError> {
    let packet_type = packet.packet_type();
    let mut body = Vec::new();

    let first = match packet {
        Packet::Connect(connect) => {
            encode_connect(connect, &mut body)?;
            packet_type.header_byte()
        }
        Packet::Connack(connack) => {
            encode_connack(connack, &mut body)?;
            packet_type.header_byte()
        }
        Packet::Publish(publish) => {
            encode_publish(publish, &mut body)?;
            ((PacketType::Publish as u8) << 4) | publish.flags()
        }
        Packet::Puback { packet_id }
        | Packet::Pubrec { packet_id }
        | Packet::Pubrel { packet_id }
        | Packet::Pubcomp { packet_id }
        | Packet::Unsuback { packet_id } => {
            check_packet_id(packet_type, *packet_id)?;
            body.extend_from_slice(&packet_id.to_be_bytes());
            packet_type.header_byte()
        }
        Packet::Subscribe(subscribe) => {
            encode_subscribe(subscribe, &mut body)?;
            packet_type.header_byte()
        }
        Packet::Suback(suback) => {
            encode_suback(suback, &mut body)?;
            packet_type.header_byte()
        }
        Packet::Unsubscribe(unsubscribe) => {
            encode_unsubscribe(unsubscribe, &mut body)?;
            packet_type.header_byte()
        }
        Packet::Pingreq | Packet::Pingresp | Packet::Disconnect => packet_type.header_byte(),
    };

    // Header goes to a scratch buffer so an oversized body never leaves a
    // partial frame behind.
    let mut header = Vec::with_capacity(1 + varint::MAX_ENCODED_LEN);
    header.push(first);
    varint::encode_remaining_length(body.len(), &mut header)?;

    buf.reserve(header.len() + body.len());
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&body);

    trace!("Encoded {:?} ({} bytes)", packet_type, header.len() + body.len());

    Ok(())
}

impl Packet {
    /// Encode into a freshly allocated buffer.
    pub fn encode_to_vec(&self) -> std::result::Result<Vec<u8>, ProtocolError> {
        let mut buf = Vec::new();
        encode_packet(self, &mut buf)?;
        Ok(buf)
    }
}

fn encode_connect(connect: &Connect, buf: &mut Vec<u8>) -> std::result::Result<(), ProtocolError> {
    validate_client_id(&connect.client_id)?;

    let mut flags = 0u8;
    if connect.clean_session {
        flags |= 0x02;
    }
    if let Some(will) = &connect.will {
        validate_topic_name(&will.topic)?;
        flags |= 0x04;
        flags |= (will.qos as u8) << 3;
        if will.retain {
            flags |= 0x20;
        }
    }
    if connect.password.is_some() {
        flags |= 0x40;
    }
    if connect.username.is_some() {
        flags |= 0x80;
    }

    // MQTT-3.1.2-22: password requires username
    if connect.password.is_some() && connect.username.is_none() {
        return Err(ProtocolError::InvalidConnectFlags(flags));
    }

    string::write_str(PROTOCOL_NAME, buf)?;
    buf.push(PROTOCOL_LEVEL);
    buf.push(flags);
    buf.extend_from_slice(&connect.keep_alive.to_be_bytes());

    string::write_str(&connect.client_id, buf)?;
    if let Some(will) = &connect.will {
        string::write_str(&will.topic, buf)?;
        string::write_binary(&will.message, buf)?;
    }
    if let Some(username) = &connect.username {
        string::write_str(username, buf)?;
    }
    if let Some(password) = &connect.password {
        string::write_binary(password, buf)?;
    }

    Ok(())
}

fn encode_connack(connack: &Connack, buf: &mut Vec<u8>) -> std::result::Result<(), ProtocolError> {
    check_connack(connack)?;
    buf.push(u8::from(connack.session_present));
    buf.push(connack.code as u8);
    Ok(())
}

fn encode_publish(publish: &Publish, buf: &mut Vec<u8>) -> std::result::Result<(), ProtocolError> {
    validate_publish(publish)?;

    string::write_str(&publish.topic, buf)?;
    if let Some(id) = publish.packet_id {
        buf.extend_from_slice(&id.to_be_bytes());
    }
    buf.extend_from_slice(&publish.payload);
    Ok(())
}

fn encode_subscribe(
    subscribe: &Subscribe,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), ProtocolError> {
    check_packet_id(PacketType::Subscribe, subscribe.packet_id)?;
    if subscribe.topics.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Subscribe));
    }

    buf.extend_from_slice(&subscribe.packet_id.to_be_bytes());
    for (filter, qos) in &subscribe.topics {
        validate_topic_filter(filter)?;
        string::write_str(filter, buf)?;
        buf.push(*qos as u8);
    }
    Ok(())
}

fn encode_suback(suback: &Suback, buf: &mut Vec<u8>) -> std::result::Result<(), ProtocolError> {
    check_packet_id(PacketType::Suback, suback.packet_id)?;
    if suback.return_codes.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Suback));
    }

    buf.extend_from_slice(&suback.packet_id.to_be_bytes());
    buf.extend(suback.return_codes.iter().map(|code| code.to_byte()));
    Ok(())
}

fn encode_unsubscribe(
    unsubscribe: &Unsubscribe,
    buf: &mut Vec<u8>,
) -> std::result::Result<(), ProtocolError> {
    check_packet_id(PacketType::Unsubscribe, unsubscribe.packet_id)?;
    if unsubscribe.topics.is_empty() {
        return Err(ProtocolError::EmptyTopicList(PacketType::Unsubscribe));
    }

    buf.extend_from_slice(&unsubscribe.packet_id.to_be_bytes());
    for filter in &unsubscribe.topics {
        validate_topic_filter(filter)?;
        string::write_str(filter, buf)?;
    }
    Ok(())
}

// === Validation ===

#[inline]
fn check_packet_id(packet_type: PacketType, packet_id: u16) -> std::result::Result<(), ProtocolError> {
    if packet_id == 0 {
        return Err(ProtocolError::ZeroPacketId(packet_type));
    }
    Ok(())
}

fn check_connack(connack: &Connack) -> std::result::Result<(), ProtocolError> {
    // MQTT-3.2.2-4: a refused connection never has a session
    if connack.session_present && connack.code != ConnackCode::Accepted {
        return Err(ProtocolError::InvalidConnack(format!(
            "session present with return code {:?}",
            connack.code
        )));
    }
    Ok(())
}

/// Check that `publish` would encode: flag and identifier rules, topic
/// characters and length, and a remaining length within the varint range.
pub fn validate_publish(publish: &Publish) -> std::result::Result<(), ProtocolError> {
    if publish.dup && publish.qos == QoS::AtMostOnce {
        return Err(ProtocolError::MalformedPacket(
            "DUP flag set on a QoS 0 PUBLISH".into(),
        ));
    }
    validate_topic_name(&publish.topic)?;
    string::validate(&publish.topic)?;

    match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, None) => {}
        (QoS::AtMostOnce, Some(_)) => {
            return Err(ProtocolError::MalformedPacket(
                "QoS 0 PUBLISH must not carry a packet identifier".into(),
            ))
        }
        (qos, None) => {
            return Err(ProtocolError::MalformedPacket(format!(
                "QoS {} PUBLISH requires a packet identifier",
                qos as u8
            )))
        }
        (_, Some(id)) => check_packet_id(PacketType::Publish, id)?,
    }

    let id_len = if publish.packet_id.is_some() { 2 } else { 0 };
    let remaining = string::wire_len(&publish.topic) + id_len + publish.payload.len();
    if remaining > varint::MAX_REMAINING_LENGTH {
        return Err(ProtocolError::RemainingLengthTooLarge(remaining));
    }
    Ok(())
}

/// Client identifiers are 1-23 characters of `[A-Za-z0-9]`.
pub fn validate_client_id(client_id: &str) -> std::result::Result<(), ProtocolError> {
    let len_ok = (1..=MAX_CLIENT_ID_LEN).contains(&client_id.len());
    if !len_ok || !client_id.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ProtocolError::InvalidClientId(client_id.to_owned()));
    }
    Ok(())
}

/// Topic names are non-empty and never contain wildcards.
pub fn validate_topic_name(topic: &str) -> std::result::Result<(), ProtocolError> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(ProtocolError::InvalidTopicName(topic.to_owned()));
    }
    Ok(())
}

/// Topic filters are non-empty; `+` must fill a whole level and `#` must
/// fill the last one.
pub fn validate_topic_filter(filter: &str) -> std::result::Result<(), ProtocolError> {
    if filter.is_empty() {
        return Err(ProtocolError::InvalidTopicFilter(String::new()));
    }

    let mut levels = filter.split('/').peekable();
    while let Some(level) = levels.next() {
        let valid = match level {
            "#" => levels.peek().is_none(),
            "+" => true,
            _ => !level.contains(['+', '#']),
        };
        if !valid {
            return Err(ProtocolError::InvalidTopicFilter(filter.to_owned()));
        }
    }
    Ok(())
}
