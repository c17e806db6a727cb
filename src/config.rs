/// Connection tunables
///
/// Every timing and sizing knob of the layer lives here. None of them are
/// persisted; the owning session builds a config once and hands it to each
/// connection it creates.
use crate::errors::{Result, RudpError};
use crate::packet::{PACKET_HEADER_SIZE, PACKET_TRAILER_SIZE};
use crate::message::MIN_FRAME_SIZE;

/// Largest UDP payload an IPv4 datagram can carry
pub const MAX_MTU: usize = 65_507;

/// Validated connection configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Upper bound on a datagram, header and checksum included
    pub mtu: usize,

    /// Number of in-order channels
    pub channel_count: usize,

    /// Seconds between keep-alive heartbeats
    pub heartbeat_interval_secs: f64,

    /// Minimum seconds between two unforced flushes
    pub tick_interval_secs: f64,

    /// Seconds an unconfirmed reliable message waits before being resent
    pub resend_timeout_secs: f64,

    /// Maximum span of in-flight reliable ids
    pub reliable_window: u16,

    /// Number of reliable ids remembered for deduplication
    pub receive_window: u16,

    /// Slots in the packet tracker ring
    pub tracker_ring_size: usize,

    /// Seconds of silence after which the peer is considered lost
    pub peer_timeout_secs: f64,

    /// Weight of a new sample in the RTT moving average
    pub rtt_smoothing: f64,
}

impl ConnectionConfig {
    /// Start a builder from the default values
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Bytes available for message frames in one packet
    pub fn packet_body_capacity(&self) -> usize {
        self.mtu - PACKET_HEADER_SIZE - PACKET_TRAILER_SIZE
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            mtu: 1400,
            channel_count: 8,
            heartbeat_interval_secs: 1.0 / 2.0,
            tick_interval_secs: 1.0 / 20.0,
            resend_timeout_secs: 0.1,
            reliable_window: 32,
            receive_window: 1024,
            tracker_ring_size: 256,
            peer_timeout_secs: 10.0,
            rtt_smoothing: 0.125,
        }
    }
}

/// ConfigBuilder - Fluent interface for connection configuration
///
/// Frequencies are given in Hz and stored as intervals. `build` rejects
/// combinations that would break the sequence-number invariants.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: ConnectionConfig,
    heartbeat_frequency: f64,
    tick_frequency: f64,
}

impl ConfigBuilder {
    /// Create a new ConfigBuilder with defaults
    pub fn new() -> Self {
        Self {
            config: ConnectionConfig::default(),
            heartbeat_frequency: 2.0,
            tick_frequency: 20.0,
        }
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    pub fn with_channel_count(mut self, count: usize) -> Self {
        self.config.channel_count = count;
        self
    }

    /// Set heartbeat frequency in Hz
    pub fn with_heartbeat_frequency(mut self, hz: f64) -> Self {
        self.heartbeat_frequency = hz;
        self
    }

    /// Set the maximum flush rate in Hz
    pub fn with_tick_frequency(mut self, hz: f64) -> Self {
        self.tick_frequency = hz;
        self
    }

    pub fn with_resend_timeout_secs(mut self, secs: f64) -> Self {
        self.config.resend_timeout_secs = secs;
        self
    }

    pub fn with_reliable_window(mut self, window: u16) -> Self {
        self.config.reliable_window = window;
        self
    }

    pub fn with_receive_window(mut self, window: u16) -> Self {
        self.config.receive_window = window;
        self
    }

    pub fn with_tracker_ring_size(mut self, size: usize) -> Self {
        self.config.tracker_ring_size = size;
        self
    }

    pub fn with_peer_timeout_secs(mut self, secs: f64) -> Self {
        self.config.peer_timeout_secs = secs;
        self
    }

    pub fn with_rtt_smoothing(mut self, weight: f64) -> Self {
        self.config.rtt_smoothing = weight;
        self
    }

    /// Validate and produce the configuration
    pub fn build(self) -> Result<ConnectionConfig> {
        let mut config = self.config;

        if !(self.heartbeat_frequency > 0.0) {
            return Err(RudpError::config("heartbeat frequency must be positive"));
        }
        if !(self.tick_frequency > 0.0) {
            return Err(RudpError::config("tick frequency must be positive"));
        }
        config.heartbeat_interval_secs = 1.0 / self.heartbeat_frequency;
        config.tick_interval_secs = 1.0 / self.tick_frequency;

        let overhead = PACKET_HEADER_SIZE + PACKET_TRAILER_SIZE;
        if config.mtu <= overhead + MIN_FRAME_SIZE {
            return Err(RudpError::config(format!(
                "mtu {} leaves no room for messages (overhead {})",
                config.mtu, overhead
            )));
        }
        if config.mtu > MAX_MTU {
            return Err(RudpError::config(format!(
                "mtu {} exceeds the largest UDP payload {}",
                config.mtu, MAX_MTU
            )));
        }
        if config.channel_count == 0 || config.channel_count > usize::from(u8::MAX) {
            return Err(RudpError::config(format!(
                "channel count {} outside 1..=255",
                config.channel_count
            )));
        }
        if !(config.resend_timeout_secs > 0.0) {
            return Err(RudpError::config("resend timeout must be positive"));
        }
        if !(config.peer_timeout_secs > 0.0) {
            return Err(RudpError::config("peer timeout must be positive"));
        }
        if !(config.rtt_smoothing > 0.0 && config.rtt_smoothing <= 1.0) {
            return Err(RudpError::config("rtt smoothing must be in (0, 1]"));
        }
        if config.receive_window == 0 || config.receive_window >= 0x8000 {
            return Err(RudpError::config(format!(
                "receive window {} must be in 1..32768",
                config.receive_window
            )));
        }
        if config.reliable_window == 0 || config.reliable_window > config.receive_window {
            return Err(RudpError::config(format!(
                "reliable window {} must be in 1..={}",
                config.reliable_window, config.receive_window
            )));
        }
        if !config.tracker_ring_size.is_power_of_two() || config.tracker_ring_size > 0x8000 {
            return Err(RudpError::config(format!(
                "tracker ring size {} must be a power of two no larger than 32768",
                config.tracker_ring_size
            )));
        }

        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
