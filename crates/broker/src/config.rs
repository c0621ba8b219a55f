use std::net::SocketAddr;
use std::time::Duration;

use crate::offline::DEFAULT_SIGN_TIMEOUT;
use crate::relay::{DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_INTERVAL};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:1777";

/// Runtime tunables of a broker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    pub listen: SocketAddr,
    pub offline_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub handshake_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([127, 0, 0, 1], 1777)),
            offline_timeout: DEFAULT_SIGN_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), String> {
        for (name, value) in [
            ("offline timeout", self.offline_timeout),
            ("heartbeat interval", self.heartbeat_interval),
            ("handshake timeout", self.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(format!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}
