//! Player-traffic routing proxy
//!
//! Front-end listeners accept player connections, peek the handshake for
//! the requested hostname, and splice the connection to the owning
//! container's host port. Route updates swap an immutable snapshot; live
//! connections are never disturbed.

mod protocol;
mod table;

pub use protocol::{login_disconnect_frame, read_handshake, Handshake, HandshakeError};
pub use table::RouteTable;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ProxyConfiguration;
use crate::error::{Error, Result};
use crate::model::ProxyRoute;

/// Deadline for the first frame of a new connection
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-proxy counters
#[derive(Debug, Default)]
pub struct ProxyStats {
    pub active_connections: AtomicI64,
    pub total_connections: AtomicU64,
    pub bytes_to_backend: AtomicU64,
    pub bytes_to_client: AtomicU64,
    pub rejected: AtomicU64,
    pub backend_errors: AtomicU64,
}

/// Point-in-time proxy status
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProxyStatus {
    pub listeners: Vec<u16>,
    pub routes: usize,
    pub active_connections: i64,
    pub total_connections: u64,
    pub bytes_to_backend: u64,
    pub bytes_to_client: u64,
    pub rejected: u64,
    pub backend_errors: u64,
}

/// Shared routing state: the live snapshot plus the route set it is built
/// from. Publication is atomic; readers clone the snapshot `Arc` at accept.
pub struct ProxyState {
    routes: RwLock<HashMap<Uuid, ProxyRoute>>,
    table: RwLock<Arc<RouteTable>>,
    listeners: RwLock<Vec<u16>>,
    pub stats: ProxyStats,
}

impl ProxyState {
    pub fn new(listeners: Vec<u16>) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            table: RwLock::new(Arc::new(RouteTable::default())),
            listeners: RwLock::new(listeners),
            stats: ProxyStats::default(),
        }
    }

    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.read().clone()
    }

    pub fn listeners(&self) -> Vec<u16> {
        self.listeners.read().clone()
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    /// Publish or update one server's route atomically.
    pub fn apply_route(&self, route: ProxyRoute) -> Result<()> {
        let mut routes = self.routes.write();
        let previous = routes.insert(route.server_id, route.clone());

        match self.rebuild(&routes) {
            Ok(()) => Ok(()),
            Err(e) => {
                // Roll the map back so the active table stays consistent
                match previous {
                    Some(prev) => routes.insert(route.server_id, prev),
                    None => routes.remove(&route.server_id),
                };
                Err(e)
            }
        }
    }

    /// Drop a server's route; existing connections are unaffected.
    pub fn remove_route(&self, server_id: &Uuid) {
        let mut routes = self.routes.write();
        if routes.remove(server_id).is_some() {
            // Removal cannot introduce conflicts
            let _ = self.rebuild(&routes);
        }
    }

    /// Replace the whole route set (startup load).
    pub fn load_routes(&self, loaded: Vec<ProxyRoute>) -> Result<()> {
        let mut routes = self.routes.write();
        routes.clear();
        for route in loaded {
            routes.insert(route.server_id, route);
        }
        self.rebuild(&routes)
    }

    pub fn set_listeners(&self, ports: Vec<u16>) -> Result<()> {
        *self.listeners.write() = ports;
        let routes = self.routes.write();
        self.rebuild(&routes)
    }

    fn rebuild(&self, routes: &HashMap<Uuid, ProxyRoute>) -> Result<()> {
        let all: Vec<ProxyRoute> = routes.values().cloned().collect();
        let table = RouteTable::build(&all, &self.listeners.read())?;
        *self.table.write() = Arc::new(table);
        Ok(())
    }

    pub fn status(&self) -> ProxyStatus {
        ProxyStatus {
            listeners: self.listeners(),
            routes: self.route_count(),
            active_connections: self.stats.active_connections.load(Ordering::Relaxed),
            total_connections: self.stats.total_connections.load(Ordering::Relaxed),
            bytes_to_backend: self.stats.bytes_to_backend.load(Ordering::Relaxed),
            bytes_to_client: self.stats.bytes_to_client.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            backend_errors: self.stats.backend_errors.load(Ordering::Relaxed),
        }
    }
}

struct ListenerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// The listening front-end
pub struct ProxyServer {
    state: Arc<ProxyState>,
    bind_address: String,
    primary_port: u16,
    listeners: tokio::sync::Mutex<HashMap<u16, ListenerHandle>>,
}

impl ProxyServer {
    pub fn new(state: Arc<ProxyState>, config: &ProxyConfiguration) -> Self {
        Self {
            state,
            bind_address: config.bind_address.clone(),
            primary_port: config.primary_port,
            listeners: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub fn state(&self) -> Arc<ProxyState> {
        self.state.clone()
    }

    /// Bind every configured listener.
    pub async fn start(&self) -> Result<()> {
        for port in self.state.listeners() {
            self.bind(port).await?;
        }
        Ok(())
    }

    async fn bind(&self, port: u16) -> Result<()> {
        let mut listeners = self.listeners.lock().await;
        if listeners.contains_key(&port) {
            return Ok(());
        }

        let addr = format!("{}:{}", self.bind_address, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::Internal(format!("failed to bind listener {}: {}", addr, e)))?;

        info!("Proxy listening on {}", addr);

        let token = CancellationToken::new();
        let task_token = token.clone();
        let state = self.state.clone();

        let handle = tokio::spawn(async move {
            accept_loop(listener, port, state, task_token).await;
        });

        listeners.insert(port, ListenerHandle { token, handle });
        Ok(())
    }

    /// Rebind to a new listener set without dropping unchanged listeners.
    pub async fn update_listeners(&self, ports: Vec<u16>) -> Result<()> {
        if !ports.contains(&self.primary_port) {
            return Err(Error::InvalidArgument(format!(
                "listener set must include the primary port {}",
                self.primary_port
            )));
        }

        self.state.set_listeners(ports.clone())?;

        // Unbind removed listeners
        let removed: Vec<u16> = {
            let listeners = self.listeners.lock().await;
            listeners
                .keys()
                .filter(|p| !ports.contains(p))
                .copied()
                .collect()
        };
        for port in removed {
            let mut listeners = self.listeners.lock().await;
            if let Some(handle) = listeners.remove(&port) {
                handle.token.cancel();
                info!("Proxy listener {} unbound", port);
            }
        }

        // Bind new ones
        for port in ports {
            self.bind(port).await?;
        }
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut listeners = self.listeners.lock().await;
        for (_, handle) in listeners.drain() {
            handle.token.cancel();
            let _ = handle.handle.await;
        }
    }

}

async fn accept_loop(
    listener: TcpListener,
    port: u16,
    state: Arc<ProxyState>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Listener {} shutting down", port);
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let state = state.clone();
                        tokio::spawn(async move {
                            handle_connection(stream, peer, port, state).await;
                        });
                    }
                    Err(e) => {
                        warn!("Accept error on listener {}: {}", port, e);
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    mut client: TcpStream,
    peer: std::net::SocketAddr,
    listener_port: u16,
    state: Arc<ProxyState>,
) {
    state.stats.total_connections.fetch_add(1, Ordering::Relaxed);
    state.stats.active_connections.fetch_add(1, Ordering::Relaxed);
    let _active = scopeguard::guard(state.clone(), |state| {
        state.stats.active_connections.fetch_sub(1, Ordering::Relaxed);
    });

    let handshake =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut client)).await {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => {
                debug!("Bad handshake from {}: {}", peer, e);
                state.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
            Err(_) => {
                debug!("Handshake timeout from {}", peer);
                state.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

    let hostname = handshake.hostname();

    // Readers take an immutable snapshot; later updates don't affect us
    let table = state.snapshot();
    let backend_addr = match table.lookup(&hostname, listener_port) {
        Some(addr) => addr.to_string(),
        None => {
            debug!("No route for {} on listener {}", hostname, listener_port);
            state.stats.rejected.fetch_add(1, Ordering::Relaxed);
            reject(&mut client, &handshake, "No server is available at this address.").await;
            return;
        }
    };

    let mut backend = match TcpStream::connect(&backend_addr).await {
        Ok(backend) => backend,
        Err(e) => {
            warn!("Backend {} unreachable for {}: {}", backend_addr, hostname, e);
            state.stats.backend_errors.fetch_add(1, Ordering::Relaxed);
            reject(&mut client, &handshake, "The server is not reachable right now.").await;
            return;
        }
    };

    // Replay the peeked handshake, then splice until either side closes
    if let Err(e) = backend.write_all(&handshake.raw).await {
        warn!("Failed to forward handshake to {}: {}", backend_addr, e);
        state.stats.backend_errors.fetch_add(1, Ordering::Relaxed);
        return;
    }

    match tokio::io::copy_bidirectional(&mut client, &mut backend).await {
        Ok((to_backend, to_client)) => {
            state
                .stats
                .bytes_to_backend
                .fetch_add(to_backend + handshake.raw.len() as u64, Ordering::Relaxed);
            state
                .stats
                .bytes_to_client
                .fetch_add(to_client, Ordering::Relaxed);
        }
        Err(e) => {
            debug!("Splice ended for {}: {}", peer, e);
        }
    }
}

async fn reject(client: &mut TcpStream, handshake: &Handshake, message: &str) {
    if handshake.next_state == protocol::NEXT_STATE_LOGIN {
        let frame = login_disconnect_frame(message);
        let _ = client.write_all(&frame).await;
    }
    let _ = client.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    /// Echo backend: accepts connections and mirrors every byte.
    async fn spawn_echo_backend() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    loop {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => {
                                if socket.write_all(&buf[..n]).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    fn route_for(hostname: &str, backend: &str) -> ProxyRoute {
        ProxyRoute::new(Uuid::new_v4(), hostname, backend.to_string())
    }

    async fn start_proxy(state: Arc<ProxyState>) -> (ProxyServer, String) {
        // Listener port 0: the route table keys on the configured port
        let config = ProxyConfiguration {
            enabled: true,
            bind_address: "127.0.0.1".into(),
            primary_port: 0,
            listeners: vec![0],
        };
        let server = ProxyServer::new(state, &config);

        // Bind manually to learn the ephemeral port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let token = CancellationToken::new();
        let state = server.state();
        let task_token = token.clone();
        let handle = tokio::spawn(async move {
            accept_loop(listener, 0, state, task_token).await;
        });
        server
            .listeners
            .lock()
            .await
            .insert(0, ListenerHandle { token, handle });
        (server, addr)
    }

    async fn connect_and_handshake(proxy_addr: &str, hostname: &str) -> TcpStream {
        let mut stream = TcpStream::connect(proxy_addr).await.unwrap();
        let frame = protocol::encode_handshake(767, hostname, 25565, protocol::NEXT_STATE_LOGIN);
        stream.write_all(&frame).await.unwrap();
        stream
    }

    #[tokio::test]
    async fn test_routes_to_backend_and_splices() {
        let backend = spawn_echo_backend().await;
        let state = Arc::new(ProxyState::new(vec![0]));
        state
            .apply_route(route_for("play.example.com", &backend))
            .unwrap();

        let (server, proxy_addr) = start_proxy(state.clone()).await;
        let mut conn = connect_and_handshake(&proxy_addr, "play.example.com").await;

        // The echo backend mirrors the replayed handshake first
        let expected = protocol::encode_handshake(767, "play.example.com", 25565, 2);
        let mut echoed = vec![0u8; expected.len()];
        conn.read_exact(&mut echoed).await.unwrap();
        assert_eq!(echoed, expected);

        conn.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_unrouted_hostname_rejected() {
        let state = Arc::new(ProxyState::new(vec![0]));
        let (server, proxy_addr) = start_proxy(state.clone()).await;

        let mut conn = connect_and_handshake(&proxy_addr, "unknown.example.com").await;

        // Login connections get a disconnect frame, then EOF
        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf);
        assert!(text.contains("No server is available"));
        assert_eq!(state.stats.rejected.load(Ordering::Relaxed), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_route_hot_swap_preserves_existing_connection() {
        let backend = spawn_echo_backend().await;
        let state = Arc::new(ProxyState::new(vec![0]));
        let server_id = Uuid::new_v4();

        let mut route = ProxyRoute::new(server_id, "play.example.com", backend.clone());
        state.apply_route(route.clone()).unwrap();

        let (server, proxy_addr) = start_proxy(state.clone()).await;

        // Open a connection under the old hostname and drain the echoed handshake
        let mut old_conn = connect_and_handshake(&proxy_addr, "play.example.com").await;
        let handshake_len = protocol::encode_handshake(767, "play.example.com", 25565, 2).len();
        let mut drain = vec![0u8; handshake_len];
        old_conn.read_exact(&mut drain).await.unwrap();

        // Hot-swap the hostname
        route.hostname = "alt.example.com".to_string();
        state.apply_route(route).unwrap();

        // New connection to the old hostname is rejected
        let mut rejected = connect_and_handshake(&proxy_addr, "play.example.com").await;
        let mut buf = Vec::new();
        rejected.read_to_end(&mut buf).await.unwrap();
        assert!(!buf.is_empty());

        // New connection to the new hostname reaches the backend
        let mut new_conn = connect_and_handshake(&proxy_addr, "alt.example.com").await;
        let new_handshake_len = protocol::encode_handshake(767, "alt.example.com", 25565, 2).len();
        let mut drain_new = vec![0u8; new_handshake_len];
        new_conn.read_exact(&mut drain_new).await.unwrap();

        // The pre-existing connection is undisturbed
        old_conn.write_all(b"still here").await.unwrap();
        let mut reply = [0u8; 10];
        old_conn.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"still here");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_connect_failure_counted() {
        let state = Arc::new(ProxyState::new(vec![0]));
        // Route to a port nothing listens on
        state
            .apply_route(route_for("dead.example.com", "127.0.0.1:1"))
            .unwrap();

        let (server, proxy_addr) = start_proxy(state.clone()).await;
        let mut conn = connect_and_handshake(&proxy_addr, "dead.example.com").await;

        let mut buf = Vec::new();
        conn.read_to_end(&mut buf).await.unwrap();
        assert_eq!(state.stats.backend_errors.load(Ordering::Relaxed), 1);

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_route_publish_rolls_back() {
        let state = Arc::new(ProxyState::new(vec![25565]));
        state
            .apply_route(route_for("mc.example.com", "127.0.0.1:10"))
            .unwrap();

        let conflicting = route_for("mc.example.com", "127.0.0.1:20");
        assert!(state.apply_route(conflicting).is_err());

        // The original route still resolves
        let table = state.snapshot();
        assert_eq!(table.lookup("mc.example.com", 25565), Some("127.0.0.1:10"));
        assert_eq!(state.route_count(), 1);
    }
}
