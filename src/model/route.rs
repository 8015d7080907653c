//! Proxy route record

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A `(hostname | listener port) -> backend` binding for player traffic
///
/// Hostnames are stored lowercased; `(hostname, listener_port)` pairs are
/// unique across enabled routes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyRoute {
    pub server_id: Uuid,
    pub hostname: String,
    /// `host:port` the proxy dials for matched connections
    pub backend_address: String,
    /// Listener ports this route is served on; empty means all listeners
    pub listener_ports: Vec<u16>,
    pub enabled: bool,
}

impl ProxyRoute {
    pub fn new(server_id: Uuid, hostname: &str, backend_address: String) -> Self {
        Self {
            server_id,
            hostname: normalize_hostname(hostname),
            backend_address,
            listener_ports: Vec::new(),
            enabled: true,
        }
    }
}

/// Lowercase and strip the trailing dot of an FQDN.
pub fn normalize_hostname(hostname: &str) -> String {
    hostname.trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hostname_normalized() {
        assert_eq!(normalize_hostname("Play.Example.COM."), "play.example.com");
        assert_eq!(normalize_hostname("mc.example.com"), "mc.example.com");
    }
}
