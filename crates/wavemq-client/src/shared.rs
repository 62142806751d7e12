//! Thread-safe handle to a connection's delivery state.
//!
//! Senders and the ack reader clone the handle; every table mutation goes
//! through one lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use wavemq_core::{Packet, Publish};

use crate::delivery::{Delivery, OutboundState, Reaction};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct SharedDelivery {
    inner: Arc<Mutex<Delivery>>,
}

impl SharedDelivery {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            inner: Arc::new(Mutex::new(delivery)),
        }
    }

    /// Lock for several operations in a row.
    pub fn lock(&self) -> MutexGuard<'_, Delivery> {
        self.inner.lock()
    }

    pub fn begin_send(&self, publish: &Publish, now: Instant) -> Result<()> {
        self.inner.lock().begin_send(publish, now)
    }

    pub fn on_packet_received(&self, packet: Packet, now: Instant) -> Result<Reaction> {
        self.inner.lock().on_packet_received(packet, now)
    }

    pub fn on_timer_expired(&self, packet_id: u16, now: Instant) -> Result<Packet> {
        self.inner.lock().on_timer_expired(packet_id, now)
    }

    pub fn poll_expired(&self, now: Instant) -> Vec<Packet> {
        self.inner.lock().poll_expired(now)
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.inner.lock().next_deadline()
    }

    pub fn reset(&self) {
        self.inner.lock().reset()
    }

    pub fn resume(&self, now: Instant) -> Vec<Packet> {
        self.inner.lock().resume(now)
    }

    pub fn expire_inbound(&self, max_age: Duration, now: Instant) -> Vec<u16> {
        self.inner.lock().expire_inbound(max_age, now)
    }

    pub fn outbound_state(&self, packet_id: u16) -> Option<OutboundState> {
        self.inner.lock().outbound_state(packet_id)
    }

    pub fn outbound_len(&self) -> usize {
        self.inner.lock().outbound_len()
    }

    pub fn inbound_len(&self) -> usize {
        self.inner.lock().inbound_len()
    }
}
