use wavemq_core::{decode_packet, Error, Packet, PacketType, ProtocolError, Publish, QoS};

/// PUBLISH "a/b", QoS 1, id 5, 11-byte payload: 2 + 18 bytes.
fn twenty_byte_publish() -> (Publish, Vec<u8>) {
    let publish = Publish::new("a/b", &b"hello world"[..], QoS::AtLeastOnce, 5);
    let buf = Packet::Publish(publish.clone()).encode_to_vec().unwrap();
    (publish, buf)
}

#[test]
fn test_partial_buffer_is_incomplete_until_last_byte() {
    let (publish, buf) = twenty_byte_publish();
    assert_eq!(buf.len(), 20);
    assert_eq!(buf[1], 18);

    for len in 1..buf.len() {
        match decode_packet(&buf[..len]) {
            Err(Error::Incomplete { have, .. }) => assert_eq!(have, len),
            other => panic!("prefix of {} bytes: {:?}", len, other),
        }
    }

    let (packet, consumed) = decode_packet(&buf).unwrap();
    assert_eq!(consumed, 20);
    assert_eq!(packet, Packet::Publish(publish));
}

#[test]
fn test_incomplete_reports_frame_size_once_header_known() {
    let (_, buf) = twenty_byte_publish();
    assert_eq!(
        decode_packet(&buf[..2]),
        Err(Error::Incomplete {
            needed: 20,
            have: 2
        })
    );
}

#[test]
fn test_pubrel_reserved_flags() {
    assert_eq!(
        decode_packet(&[0x60, 0x02, 0x00, 0x01]),
        Err(Error::Protocol(ProtocolError::ReservedFlags {
            packet_type: PacketType::Pubrel,
            expected: 0x02,
            actual: 0x00,
        }))
    );

    let (packet, consumed) = decode_packet(&[0x62, 0x02, 0x00, 0x01]).unwrap();
    assert_eq!(packet, Packet::Pubrel { packet_id: 1 });
    assert_eq!(consumed, 4);
}

#[test]
fn test_reserved_flags_on_other_kinds() {
    // SUBSCRIBE and UNSUBSCRIBE need 0x02, PUBACK needs 0x00
    for first in [0x80u8, 0x83, 0xA0, 0x41, 0xC1, 0xE2] {
        let err = decode_packet(&[first, 0x00]).unwrap_err();
        assert!(
            matches!(err, Error::Protocol(ProtocolError::ReservedFlags { .. })),
            "{:#04x}: {:?}",
            first,
            err
        );
    }
}

#[test]
fn test_five_byte_remaining_length_is_malformed() {
    let buf = [0x30, 0x80, 0x80, 0x80, 0x80, 0x01];
    assert_eq!(
        decode_packet(&buf),
        Err(Error::Protocol(ProtocolError::InvalidRemainingLength))
    );
}

#[test]
fn test_trailing_bytes_inside_frame_are_malformed() {
    // PUBREL claiming 3 bytes of body
    let err = decode_packet(&[0x62, 0x03, 0x00, 0x01, 0x00]).unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(ProtocolError::MalformedPacket(_))
    ));
}
