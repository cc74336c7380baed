use mooz_core::IceServerConfig;
use std::time::Duration;

/// How a signaling session learns about inbound messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Drain the relay every `interval`.
    Poll { interval: Duration },
    /// Subscribe for pushes; poll every `fallback_interval` if the relay
    /// cannot push or the subscription drops.
    Push { fallback_interval: Duration },
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Most messages handed to the relay per pacing tick.
    pub batch_size: usize,
    /// Minimum time between two pacing ticks.
    pub flush_interval: Duration,
    /// Attempts per message before it is dropped.
    pub max_send_attempts: u32,
    /// A relay call that takes longer counts as a failed attempt.
    pub send_timeout: Duration,
    /// How long a pairwise negotiation may go without connecting before it
    /// is abandoned.
    pub negotiation_timeout: Duration,
    pub delivery: Delivery,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            flush_interval: Duration::from_millis(50),
            max_send_attempts: 5,
            send_timeout: Duration::from_secs(10),
            negotiation_timeout: Duration::from_secs(30),
            delivery: Delivery::Poll {
                interval: Duration::from_millis(250),
            },
        }
    }
}

/// Configuration handed to every peer connection.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig::stun("stun:stun.l.google.com:19302")],
        }
    }
}
