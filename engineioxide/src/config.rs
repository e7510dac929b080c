//! Tunables for an [`crate::engine::EngineIo`] instance.

use std::time::Duration;

/// Configuration for an Engine.IO core instance.
///
/// `ping_interval`/`ping_timeout` are advertised to the client in the `OPEN`
/// packet but are not themselves enforced by this layer: liveness checking
/// is left to a higher layer or the client.
#[derive(Debug, Clone)]
pub struct EngineIoConfig {
    pub ping_interval: Duration,
    pub ping_timeout: Duration,
    /// Ceiling on a polling `POST` body, in bytes, enforced in
    /// `transport::polling::payload::decode_body`.
    pub max_payload: usize,
}

impl Default for EngineIoConfig {
    fn default() -> Self {
        EngineIoConfig {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(60_000),
            max_payload: 100_000,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct EngineIoConfigBuilder {
    config: EngineIoConfig,
}

impl EngineIoConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.ping_timeout = timeout;
        self
    }

    pub fn max_payload(mut self, max_payload: usize) -> Self {
        self.config.max_payload = max_payload;
        self
    }

    pub fn build(self) -> EngineIoConfig {
        self.config
    }
}
