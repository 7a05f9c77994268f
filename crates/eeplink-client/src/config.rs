//! Session configuration

use serde::{Deserialize, Serialize};

/// How to reach the local router.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Router host, usually loopback.
    pub router_host: String,

    /// TCP port of the SAM bridge.
    pub sam_tcp_port: u16,

    /// UDP port of the SAM bridge (datagram forwarding).
    pub sam_udp_port: u16,

    /// TCP port of the I2CP interface.
    pub i2cp_port: u16,

    /// Hard timeout for name lookups, in seconds.
    pub lookup_timeout_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            router_host: "127.0.0.1".to_string(),
            sam_tcp_port: 7656,
            sam_udp_port: 7655,
            i2cp_port: 7654,
            lookup_timeout_secs: 10,
        }
    }
}

impl SessionConfig {
    pub fn sam_tcp_addr(&self) -> (String, u16) {
        (self.router_host.clone(), self.sam_tcp_port)
    }

    pub fn sam_udp_addr(&self) -> (String, u16) {
        (self.router_host.clone(), self.sam_udp_port)
    }

    pub fn i2cp_addr(&self) -> (String, u16) {
        (self.router_host.clone(), self.i2cp_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_the_local_router() {
        let config = SessionConfig::default();
        assert_eq!(config.router_host, "127.0.0.1");
        assert_eq!(config.sam_tcp_port, 7656);
        assert_eq!(config.sam_udp_port, 7655);
        assert_eq!(config.i2cp_port, 7654);
        assert_eq!(config.lookup_timeout_secs, 10);
    }
}
