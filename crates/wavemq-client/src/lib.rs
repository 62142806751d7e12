//! wavemq-client - QoS 1/2 delivery assurance for MQTT 3.1.1.
//!
//! [`Delivery`] tracks in-flight exchanges for one connection and tells the
//! caller what to send and what to hand to the application. It performs no
//! I/O; pair it with the codec in `wavemq-core` and any transport.
//!
//! # Example
//!
//! ```
//! use std::time::{Duration, Instant};
//! use wavemq_client::Delivery;
//! use wavemq_core::{Packet, Publish, QoS};
//!
//! let mut delivery = Delivery::new(Duration::from_secs(5));
//! let now = Instant::now();
//!
//! let publish = Publish::new("sensors/temp", &b"21.5"[..], QoS::AtLeastOnce, 7);
//! delivery.begin_send(&publish, now).unwrap();
//!
//! delivery
//!     .on_packet_received(Packet::Puback { packet_id: 7 }, now)
//!     .unwrap();
//! assert!(delivery.is_empty());
//! ```

pub mod config;
pub mod delivery;
pub mod error;
pub mod shared;
pub mod timer;

pub use config::{CodecConfig, Config, ConfigError, DeliveryConfig, LogConfig};
pub use delivery::{Delivery, InboundRecord, OutboundRecord, OutboundState, Reaction};
pub use error::{DeliveryError, Result};
pub use shared::SharedDelivery;
pub use timer::RetryTimers;
