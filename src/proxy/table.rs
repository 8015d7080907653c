//! Route table snapshots
//!
//! The active routing state is an immutable snapshot behind an `Arc`;
//! readers grab the current snapshot at accept time and are never disturbed
//! by updates.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::model::ProxyRoute;

/// Immutable routing snapshot
#[derive(Debug, Default)]
pub struct RouteTable {
    /// `(hostname, listener port) -> backend address`
    hosts: HashMap<(String, u16), String>,
    /// Default backend for listeners dedicated to one server
    port_defaults: HashMap<u16, String>,
}

impl RouteTable {
    /// Build a snapshot from the enabled routes, expanding empty listener
    /// lists to every active listener. Fails on duplicate
    /// `(hostname, listener port)` keys.
    pub fn build(routes: &[ProxyRoute], listeners: &[u16]) -> Result<Self> {
        let mut table = RouteTable::default();

        for route in routes.iter().filter(|r| r.enabled) {
            let ports: Vec<u16> = if route.listener_ports.is_empty() {
                listeners.to_vec()
            } else {
                route.listener_ports.clone()
            };

            for port in ports {
                if route.hostname.is_empty() {
                    // Hostless route: the listener is dedicated to this backend
                    if table
                        .port_defaults
                        .insert(port, route.backend_address.clone())
                        .is_some()
                    {
                        return Err(Error::Conflict(format!(
                            "listener {} already has a dedicated backend",
                            port
                        )));
                    }
                } else {
                    let key = (route.hostname.clone(), port);
                    if table
                        .hosts
                        .insert(key, route.backend_address.clone())
                        .is_some()
                    {
                        return Err(Error::Conflict(format!(
                            "duplicate route for {} on listener {}",
                            route.hostname, port
                        )));
                    }
                }
            }
        }

        Ok(table)
    }

    /// Resolve a connection's backend. Hostname matches win over the
    /// listener's dedicated backend.
    pub fn lookup(&self, hostname: &str, listener_port: u16) -> Option<&str> {
        self.hosts
            .get(&(hostname.to_ascii_lowercase(), listener_port))
            .or_else(|| self.port_defaults.get(&listener_port))
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.port_defaults.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len() + self.port_defaults.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn route(hostname: &str, backend: &str, ports: &[u16]) -> ProxyRoute {
        let mut route = ProxyRoute::new(Uuid::new_v4(), hostname, backend.to_string());
        route.listener_ports = ports.to_vec();
        route
    }

    #[test]
    fn test_lookup_case_insensitive() {
        let routes = vec![route("play.example.com", "127.0.0.1:25600", &[])];
        let table = RouteTable::build(&routes, &[25565]).unwrap();

        assert_eq!(
            table.lookup("PLAY.example.COM", 25565),
            Some("127.0.0.1:25600")
        );
        assert_eq!(table.lookup("other.example.com", 25565), None);
    }

    #[test]
    fn test_empty_listener_list_expands() {
        let routes = vec![route("mc.example.com", "127.0.0.1:25601", &[])];
        let table = RouteTable::build(&routes, &[25565, 25566]).unwrap();

        assert!(table.lookup("mc.example.com", 25565).is_some());
        assert!(table.lookup("mc.example.com", 25566).is_some());
        assert!(table.lookup("mc.example.com", 25567).is_none());
    }

    #[test]
    fn test_port_default_fallback() {
        let routes = vec![
            route("mc.example.com", "127.0.0.1:25601", &[25565]),
            route("", "127.0.0.1:25700", &[25570]),
        ];
        let table = RouteTable::build(&routes, &[25565, 25570]).unwrap();

        // Unknown hostname on the dedicated listener still routes
        assert_eq!(table.lookup("whatever", 25570), Some("127.0.0.1:25700"));
        assert_eq!(table.lookup("whatever", 25565), None);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let routes = vec![
            route("mc.example.com", "127.0.0.1:1", &[25565]),
            route("MC.example.com", "127.0.0.1:2", &[25565]),
        ];
        assert!(RouteTable::build(&routes, &[25565]).is_err());
    }

    #[test]
    fn test_disabled_route_excluded() {
        let mut disabled = route("mc.example.com", "127.0.0.1:1", &[]);
        disabled.enabled = false;
        let table = RouteTable::build(&[disabled], &[25565]).unwrap();
        assert!(table.is_empty());
    }
}
