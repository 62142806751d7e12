//! QoS 1 and QoS 2 delivery state for one connection.
//!
//! Tracks MQTT 3.1.1 §4.3 acknowledgement flows:
//! - Outbound QoS 1: PUBLISH → PUBACK
//! - Outbound QoS 2: PUBLISH → PUBREC → PUBREL → PUBCOMP
//! - Inbound QoS 2: PUBLISH → PUBREC, then PUBREL → PUBCOMP
//!
//! Nothing here does I/O or reads the clock. Callers pass `now` in and send
//! whatever packets come back.
//!
//! Key requirements:
//! - [MQTT-4.3.3-2] An inbound QoS 2 message is handed to the application once
//! - [MQTT-4.4.0-1] On session resume, unacknowledged packets are re-sent
//! - [MQTT-4.6.0-1] Re-sends go out in the order originally sent

use std::time::{Duration, Instant};

use ahash::AHashMap;
use log::{debug, warn};
use wavemq_core::codec::validate_publish;
use wavemq_core::{Packet, PacketType, Publish, QoS};

use crate::config::DeliveryConfig;
use crate::error::{DeliveryError, Result};
use crate::timer::RetryTimers;

/// Where an outbound exchange is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundState {
    /// QoS 1 PUBLISH sent, awaiting PUBACK
    AwaitingPuback,
    /// QoS 2 PUBLISH sent, awaiting PUBREC
    AwaitingPubrec,
    /// PUBREC received, PUBREL sent, awaiting PUBCOMP
    AwaitingPubcomp,
}

/// An outbound QoS 1 or QoS 2 exchange in flight.
#[derive(Debug, Clone)]
pub struct OutboundRecord {
    /// The PUBLISH as first sent
    pub publish: Publish,
    pub state: OutboundState,
    /// Re-sends so far
    pub retry_count: u32,
    pub first_sent: Instant,
    /// When the next re-send is due
    pub deadline: Instant,
    /// Send order, for resume
    seq: u64,
}

impl OutboundRecord {
    /// The packet to send again for the current state.
    fn resend_packet(&self, packet_id: u16) -> Packet {
        match self.state {
            OutboundState::AwaitingPubcomp => Packet::Pubrel { packet_id },
            OutboundState::AwaitingPuback | OutboundState::AwaitingPubrec => {
                let mut publish = self.publish.clone();
                publish.dup = true;
                Packet::Publish(publish)
            }
        }
    }
}

/// An inbound QoS 2 exchange: PUBLISH received, PUBREC sent, awaiting PUBREL.
#[derive(Debug, Clone)]
pub struct InboundRecord {
    pub packet_id: u16,
    pub received_at: Instant,
}

/// Result of processing one received packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reaction {
    /// Packet to send back to the peer.
    pub reply: Option<Packet>,
    /// Application message to hand upward.
    pub deliver: Option<Publish>,
}

impl Reaction {
    fn reply(packet: Packet) -> Self {
        Self {
            reply: Some(packet),
            deliver: None,
        }
    }
}

/// Delivery state machine for one connection.
#[derive(Debug)]
pub struct Delivery {
    retry_interval: Duration,
    /// Max outbound exchanges in flight (0 = unlimited)
    max_inflight: usize,
    outbound: AHashMap<u16, OutboundRecord>,
    inbound: AHashMap<u16, InboundRecord>,
    timers: RetryTimers,
    next_seq: u64,
}

impl Delivery {
    pub fn new(retry_interval: Duration) -> Self {
        Self {
            retry_interval,
            max_inflight: 0,
            outbound: AHashMap::new(),
            inbound: AHashMap::new(),
            timers: RetryTimers::new(),
            next_seq: 0,
        }
    }

    pub fn from_config(config: &DeliveryConfig) -> Self {
        Self::new(config.retry_interval()).with_max_inflight(config.max_inflight)
    }

    /// Limit outbound exchanges in flight (0 = unlimited).
    pub fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Register a PUBLISH the caller is about to send.
    ///
    /// QoS 0 is accepted and not tracked. A PUBLISH that would not encode is
    /// rejected before any record or timer exists.
    pub fn begin_send(&mut self, publish: &Publish, now: Instant) -> Result<()> {
        if publish.qos != QoS::AtMostOnce && publish.packet_id.map_or(true, |id| id == 0) {
            return Err(DeliveryError::InvalidPacketId);
        }
        validate_publish(publish)?;

        let state = match publish.qos {
            QoS::AtMostOnce => return Ok(()),
            QoS::AtLeastOnce => OutboundState::AwaitingPuback,
            QoS::ExactlyOnce => OutboundState::AwaitingPubrec,
        };

        let Some(packet_id) = publish.packet_id else {
            return Err(DeliveryError::InvalidPacketId);
        };

        if self.outbound.contains_key(&packet_id) {
            return Err(DeliveryError::IdentifierInUse(packet_id));
        }

        if self.max_inflight > 0 && self.outbound.len() >= self.max_inflight {
            return Err(DeliveryError::InflightLimitReached(self.max_inflight));
        }

        let deadline = now + self.retry_interval;
        self.outbound.insert(
            packet_id,
            OutboundRecord {
                publish: publish.clone(),
                state,
                retry_count: 0,
                first_sent: now,
                deadline,
                seq: self.next_seq,
            },
        );
        self.next_seq += 1;
        self.timers.arm(packet_id, deadline);

        debug!("Packet {} sent, {:?}", packet_id, state);
        Ok(())
    }

    /// Process a packet received from the peer.
    ///
    /// Acknowledgements that match no exchange, or arrive in the wrong
    /// state, are rejected and leave every table untouched.
    pub fn on_packet_received(&mut self, packet: Packet, now: Instant) -> Result<Reaction> {
        match packet {
            Packet::Publish(publish) => self.on_publish(publish, now),
            Packet::Puback { packet_id } => self.on_puback(packet_id),
            Packet::Pubrec { packet_id } => self.on_pubrec(packet_id, now),
            Packet::Pubrel { packet_id } => self.on_pubrel(packet_id),
            Packet::Pubcomp { packet_id } => self.on_pubcomp(packet_id),
            _ => Ok(Reaction::default()),
        }
    }

    fn on_publish(&mut self, publish: Publish, now: Instant) -> Result<Reaction> {
        match publish.qos {
            QoS::AtMostOnce => Ok(Reaction {
                reply: None,
                deliver: Some(publish),
            }),
            QoS::AtLeastOnce => {
                let packet_id = inbound_packet_id(&publish)?;
                Ok(Reaction {
                    reply: Some(Packet::Puback { packet_id }),
                    deliver: Some(publish),
                })
            }
            QoS::ExactlyOnce => {
                let packet_id = inbound_packet_id(&publish)?;
                if self.inbound.contains_key(&packet_id) {
                    // Peer missed our PUBREC; it was already delivered
                    debug!("Duplicate QoS 2 PUBLISH {}, re-sending PUBREC", packet_id);
                    return Ok(Reaction::reply(Packet::Pubrec { packet_id }));
                }

                self.inbound.insert(
                    packet_id,
                    InboundRecord {
                        packet_id,
                        received_at: now,
                    },
                );
                debug!("QoS 2 PUBLISH {} received, awaiting PUBREL", packet_id);
                Ok(Reaction {
                    reply: Some(Packet::Pubrec { packet_id }),
                    deliver: Some(publish),
                })
            }
        }
    }

    fn on_puback(&mut self, packet_id: u16) -> Result<Reaction> {
        match self.outbound_state(packet_id) {
            Some(OutboundState::AwaitingPuback) => {
                self.complete(packet_id);
                Ok(Reaction::default())
            }
            _ => Err(self.unexpected(PacketType::Puback, packet_id)),
        }
    }

    fn on_pubrec(&mut self, packet_id: u16, now: Instant) -> Result<Reaction> {
        // A lost PUBREL is recovered by the retry timer, not by a second PUBREC
        if self.outbound_state(packet_id) != Some(OutboundState::AwaitingPubrec) {
            return Err(self.unexpected(PacketType::Pubrec, packet_id));
        }

        let deadline = now + self.retry_interval;
        if let Some(record) = self.outbound.get_mut(&packet_id) {
            record.state = OutboundState::AwaitingPubcomp;
            record.deadline = deadline;
        }
        self.timers.arm(packet_id, deadline);
        debug!("Packet {} PUBREC received, awaiting PUBCOMP", packet_id);
        Ok(Reaction::reply(Packet::Pubrel { packet_id }))
    }

    fn on_pubcomp(&mut self, packet_id: u16) -> Result<Reaction> {
        match self.outbound_state(packet_id) {
            Some(OutboundState::AwaitingPubcomp) => {
                self.complete(packet_id);
                Ok(Reaction::default())
            }
            _ => Err(self.unexpected(PacketType::Pubcomp, packet_id)),
        }
    }

    fn on_pubrel(&mut self, packet_id: u16) -> Result<Reaction> {
        if self.inbound.remove(&packet_id).is_none() {
            return Err(self.unexpected(PacketType::Pubrel, packet_id));
        }
        debug!("QoS 2 packet {} released", packet_id);
        Ok(Reaction::reply(Packet::Pubcomp { packet_id }))
    }

    /// Drop a finished outbound exchange and its timer together.
    fn complete(&mut self, packet_id: u16) {
        self.outbound.remove(&packet_id);
        self.timers.cancel(packet_id);
        debug!("Packet {} acknowledged", packet_id);
    }

    fn unexpected(&self, packet_type: PacketType, packet_id: u16) -> DeliveryError {
        warn!(
            "Unexpected {:?} for packet {} (outbound state {:?})",
            packet_type,
            packet_id,
            self.outbound_state(packet_id)
        );
        DeliveryError::UnexpectedAck {
            packet_type,
            packet_id,
        }
    }

    /// Re-send for one exchange whose retry timer fired.
    ///
    /// Returns the PUBLISH with DUP set, or the PUBREL once PUBREC has been
    /// seen. The state is unchanged and the timer is re-armed.
    pub fn on_timer_expired(&mut self, packet_id: u16, now: Instant) -> Result<Packet> {
        let record = self
            .outbound
            .get_mut(&packet_id)
            .ok_or(DeliveryError::UnknownIdentifier(packet_id))?;

        record.retry_count += 1;
        record.deadline = now + self.retry_interval;
        self.timers.arm(packet_id, record.deadline);

        debug!(
            "Packet {} timed out in {:?}, resend #{}",
            packet_id, record.state, record.retry_count
        );
        Ok(record.resend_packet(packet_id))
    }

    /// Fire every timer due at `now`, earliest first.
    pub fn poll_expired(&mut self, now: Instant) -> Vec<Packet> {
        let mut resends = Vec::new();
        for packet_id in self.timers.pop_expired(now) {
            match self.on_timer_expired(packet_id, now) {
                Ok(packet) => resends.push(packet),
                Err(e) => warn!("Retry timer for packet {} fired: {}", packet_id, e),
            }
        }
        resends
    }

    /// When the next retry timer is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Discard all in-flight state (clean session).
    pub fn reset(&mut self) {
        debug!(
            "Discarding {} outbound and {} inbound exchanges",
            self.outbound.len(),
            self.inbound.len()
        );
        self.outbound.clear();
        self.inbound.clear();
        self.timers.clear();
    }

    /// Re-send every outbound exchange in original send order (session
    /// resumed). Inbound records are kept; the peer re-sends its PUBRELs.
    pub fn resume(&mut self, now: Instant) -> Vec<Packet> {
        let mut ids: Vec<(u64, u16)> = self
            .outbound
            .iter()
            .map(|(&packet_id, record)| (record.seq, packet_id))
            .collect();
        ids.sort_unstable();

        debug!("Resuming session, re-sending {} packets", ids.len());

        let mut resends = Vec::with_capacity(ids.len());
        for (_, packet_id) in ids {
            match self.on_timer_expired(packet_id, now) {
                Ok(packet) => resends.push(packet),
                Err(e) => warn!("Resume of packet {} skipped: {}", packet_id, e),
            }
        }
        resends
    }

    /// Drop inbound QoS 2 records older than `max_age` whose PUBREL never
    /// arrived. Returns the identifiers removed, oldest first.
    ///
    /// A PUBLISH re-sent after its record expired is delivered again.
    pub fn expire_inbound(&mut self, max_age: Duration, now: Instant) -> Vec<u16> {
        let mut stale: Vec<(Instant, u16)> = self
            .inbound
            .values()
            .filter(|record| now.saturating_duration_since(record.received_at) >= max_age)
            .map(|record| (record.received_at, record.packet_id))
            .collect();
        stale.sort_unstable();

        for &(_, packet_id) in &stale {
            self.inbound.remove(&packet_id);
            warn!("Inbound packet {} never released, discarding", packet_id);
        }
        stale.into_iter().map(|(_, packet_id)| packet_id).collect()
    }

    pub fn inbound(&self, packet_id: u16) -> Option<&InboundRecord> {
        self.inbound.get(&packet_id)
    }

    pub fn outbound(&self, packet_id: u16) -> Option<&OutboundRecord> {
        self.outbound.get(&packet_id)
    }

    pub fn outbound_state(&self, packet_id: u16) -> Option<OutboundState> {
        self.outbound.get(&packet_id).map(|r| r.state)
    }

    pub fn retry_count(&self, packet_id: u16) -> Option<u32> {
        self.outbound.get(&packet_id).map(|r| r.retry_count)
    }

    pub fn has_inbound(&self, packet_id: u16) -> bool {
        self.inbound.contains_key(&packet_id)
    }

    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.inbound.is_empty()
    }
}

fn inbound_packet_id(publish: &Publish) -> Result<u16> {
    match publish.packet_id {
        Some(id) if id != 0 => Ok(id),
        _ => Err(DeliveryError::InvalidPacketId),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wavemq_core::ProtocolError;

    const RETRY: Duration = Duration::from_secs(5);

    fn publish(qos: QoS, packet_id: u16) -> Publish {
        Publish::new("test/topic", &b"payload"[..], qos, packet_id)
    }

    #[test]
    fn test_qos0_not_tracked() {
        let mut delivery = Delivery::new(RETRY);
        delivery
            .begin_send(&publish(QoS::AtMostOnce, 0), Instant::now())
            .unwrap();
        assert!(delivery.is_empty());
        assert_eq!(delivery.next_deadline(), None);
    }

    #[test]
    fn test_begin_send_arms_timer() {
        let t0 = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::ExactlyOnce, 3), t0).unwrap();

        let record = delivery.outbound(3).unwrap();
        assert_eq!(record.state, OutboundState::AwaitingPubrec);
        assert_eq!(record.retry_count, 0);
        assert_eq!(record.first_sent, t0);
        assert_eq!(delivery.next_deadline(), Some(t0 + RETRY));
    }

    #[test]
    fn test_identifier_in_use() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).unwrap();
        assert_eq!(
            delivery.begin_send(&publish(QoS::ExactlyOnce, 1), now),
            Err(DeliveryError::IdentifierInUse(1))
        );
        assert_eq!(delivery.outbound_state(1), Some(OutboundState::AwaitingPuback));
    }

    #[test]
    fn test_invalid_packet_id() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        let mut p = publish(QoS::AtLeastOnce, 1);
        p.packet_id = None;
        assert_eq!(delivery.begin_send(&p, now), Err(DeliveryError::InvalidPacketId));
        p.packet_id = Some(0);
        assert_eq!(delivery.begin_send(&p, now), Err(DeliveryError::InvalidPacketId));
    }

    #[test]
    fn test_invalid_topic() {
        let mut delivery = Delivery::new(RETRY);
        let p = Publish::new("a/#", &b""[..], QoS::AtLeastOnce, 1);
        assert!(matches!(
            delivery.begin_send(&p, Instant::now()),
            Err(DeliveryError::Protocol(_))
        ));
        assert!(delivery.is_empty());
    }

    #[test]
    fn test_unencodable_publish_not_tracked() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);

        let p = Publish::new("a\u{0}b", &b"x"[..], QoS::AtLeastOnce, 1);
        assert_eq!(
            delivery.begin_send(&p, now),
            Err(DeliveryError::Protocol(ProtocolError::DisallowedCharacter(0)))
        );

        let p = Publish::new("a\u{9f}", &b"x"[..], QoS::ExactlyOnce, 2);
        assert_eq!(
            delivery.begin_send(&p, now),
            Err(DeliveryError::Protocol(ProtocolError::DisallowedCharacter(0x9f)))
        );

        let p = Publish::new("t".repeat(70_000), &b"x"[..], QoS::AtLeastOnce, 3);
        assert_eq!(
            delivery.begin_send(&p, now),
            Err(DeliveryError::Protocol(ProtocolError::StringTooLong(70_000)))
        );

        assert_eq!(delivery.outbound_len(), 0);
        assert_eq!(delivery.next_deadline(), None);
        assert!(delivery.poll_expired(now + RETRY).is_empty());
    }

    #[test]
    fn test_identifier_reusable_after_completion() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).unwrap();
        delivery
            .on_packet_received(Packet::Puback { packet_id: 1 }, now)
            .unwrap();
        assert!(delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).is_ok());
    }

    #[test]
    fn test_max_inflight() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY).with_max_inflight(2);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).unwrap();
        delivery.begin_send(&publish(QoS::ExactlyOnce, 2), now).unwrap();
        assert_eq!(
            delivery.begin_send(&publish(QoS::AtLeastOnce, 3), now),
            Err(DeliveryError::InflightLimitReached(2))
        );
        // QoS 0 is never limited
        assert!(delivery.begin_send(&publish(QoS::AtMostOnce, 0), now).is_ok());
    }

    #[test]
    fn test_wrong_state_acks_leave_tables_untouched() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).unwrap();
        delivery.begin_send(&publish(QoS::ExactlyOnce, 2), now).unwrap();

        let cases = [
            (Packet::Pubrec { packet_id: 1 }, PacketType::Pubrec, 1),
            (Packet::Pubcomp { packet_id: 1 }, PacketType::Pubcomp, 1),
            (Packet::Puback { packet_id: 2 }, PacketType::Puback, 2),
            (Packet::Pubcomp { packet_id: 2 }, PacketType::Pubcomp, 2),
            (Packet::Puback { packet_id: 9 }, PacketType::Puback, 9),
            (Packet::Pubrel { packet_id: 9 }, PacketType::Pubrel, 9),
        ];
        for (packet, packet_type, packet_id) in cases {
            assert_eq!(
                delivery.on_packet_received(packet, now),
                Err(DeliveryError::UnexpectedAck {
                    packet_type,
                    packet_id
                })
            );
        }

        assert_eq!(delivery.outbound_state(1), Some(OutboundState::AwaitingPuback));
        assert_eq!(delivery.outbound_state(2), Some(OutboundState::AwaitingPubrec));
        assert_eq!(delivery.outbound_len(), 2);
    }

    #[test]
    fn test_pubrec_rearms_timer() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(2);
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::ExactlyOnce, 4), t0).unwrap();

        let reaction = delivery
            .on_packet_received(Packet::Pubrec { packet_id: 4 }, t1)
            .unwrap();
        assert_eq!(reaction, Reaction::reply(Packet::Pubrel { packet_id: 4 }));
        assert_eq!(delivery.next_deadline(), Some(t1 + RETRY));
    }

    #[test]
    fn test_duplicate_pubrec_is_unexpected() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(1);
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::ExactlyOnce, 4), t0).unwrap();
        delivery
            .on_packet_received(Packet::Pubrec { packet_id: 4 }, t0)
            .unwrap();

        assert_eq!(
            delivery.on_packet_received(Packet::Pubrec { packet_id: 4 }, t1),
            Err(DeliveryError::UnexpectedAck {
                packet_type: PacketType::Pubrec,
                packet_id: 4,
            })
        );
        assert_eq!(delivery.outbound_state(4), Some(OutboundState::AwaitingPubcomp));
        assert_eq!(delivery.next_deadline(), Some(t0 + RETRY));

        // The retry timer still re-sends PUBREL
        assert_eq!(
            delivery.poll_expired(t0 + RETRY),
            vec![Packet::Pubrel { packet_id: 4 }]
        );
    }

    #[test]
    fn test_timer_in_awaiting_pubcomp_resends_pubrel() {
        let t0 = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::ExactlyOnce, 8), t0).unwrap();
        delivery
            .on_packet_received(Packet::Pubrec { packet_id: 8 }, t0)
            .unwrap();

        let resend = delivery.on_timer_expired(8, t0 + RETRY).unwrap();
        assert_eq!(resend, Packet::Pubrel { packet_id: 8 });
        assert_eq!(delivery.retry_count(8), Some(1));
        assert_eq!(delivery.outbound_state(8), Some(OutboundState::AwaitingPubcomp));
    }

    #[test]
    fn test_timer_unknown_identifier() {
        let mut delivery = Delivery::new(RETRY);
        assert_eq!(
            delivery.on_timer_expired(5, Instant::now()),
            Err(DeliveryError::UnknownIdentifier(5))
        );
    }

    #[test]
    fn test_completed_exchange_never_fires() {
        let t0 = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), t0).unwrap();
        delivery
            .on_packet_received(Packet::Puback { packet_id: 1 }, t0)
            .unwrap();

        assert!(delivery.poll_expired(t0 + RETRY * 10).is_empty());
        assert_eq!(delivery.next_deadline(), None);
    }

    #[test]
    fn test_poll_expired_only_due_timers() {
        let t0 = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), t0).unwrap();
        delivery
            .begin_send(&publish(QoS::AtLeastOnce, 2), t0 + Duration::from_secs(3))
            .unwrap();

        let resends = delivery.poll_expired(t0 + RETRY);
        assert_eq!(resends.len(), 1);
        assert_eq!(resends[0].packet_id(), Some(1));
        assert_eq!(delivery.retry_count(2), Some(0));
        assert_eq!(
            delivery.next_deadline(),
            Some(t0 + Duration::from_secs(3) + RETRY)
        );
    }

    #[test]
    fn test_inbound_qos1_not_tracked() {
        let mut delivery = Delivery::new(RETRY);
        let p = publish(QoS::AtLeastOnce, 11);
        let reaction = delivery
            .on_packet_received(Packet::Publish(p.clone()), Instant::now())
            .unwrap();
        assert_eq!(reaction.reply, Some(Packet::Puback { packet_id: 11 }));
        assert_eq!(reaction.deliver, Some(p));
        assert!(delivery.is_empty());
    }

    #[test]
    fn test_other_packets_pass_through() {
        let mut delivery = Delivery::new(RETRY);
        for packet in [Packet::Pingresp, Packet::Unsuback { packet_id: 1 }] {
            assert_eq!(
                delivery.on_packet_received(packet, Instant::now()),
                Ok(Reaction::default())
            );
        }
    }

    #[test]
    fn test_expire_inbound() {
        let t0 = Instant::now();
        let max_age = Duration::from_secs(60);
        let mut delivery = Delivery::new(RETRY);
        delivery
            .on_packet_received(Packet::Publish(publish(QoS::ExactlyOnce, 2)), t0)
            .unwrap();
        delivery
            .on_packet_received(
                Packet::Publish(publish(QoS::ExactlyOnce, 1)),
                t0 + Duration::from_secs(10),
            )
            .unwrap();
        assert_eq!(delivery.inbound(2).unwrap().received_at, t0);

        assert!(delivery.expire_inbound(max_age, t0 + Duration::from_secs(59)).is_empty());
        assert_eq!(delivery.expire_inbound(max_age, t0 + max_age), vec![2]);
        assert!(!delivery.has_inbound(2));
        assert!(delivery.has_inbound(1));

        // A late PUBREL for the discarded record is a violation
        assert!(matches!(
            delivery.on_packet_received(Packet::Pubrel { packet_id: 2 }, t0 + max_age),
            Err(DeliveryError::UnexpectedAck { .. })
        ));
        assert_eq!(
            delivery.expire_inbound(max_age, t0 + Duration::from_secs(120)),
            vec![1]
        );
        assert!(delivery.is_empty());
    }

    #[test]
    fn test_reset_discards_everything() {
        let now = Instant::now();
        let mut delivery = Delivery::new(RETRY);
        delivery.begin_send(&publish(QoS::AtLeastOnce, 1), now).unwrap();
        delivery
            .on_packet_received(Packet::Publish(publish(QoS::ExactlyOnce, 2)), now)
            .unwrap();
        assert!(!delivery.is_empty());

        delivery.reset();
        assert!(delivery.is_empty());
        assert_eq!(delivery.next_deadline(), None);
        assert!(delivery.poll_expired(now + RETRY).is_empty());
    }
}
