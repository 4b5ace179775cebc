//! Per-node connection pool with reconnection and health tracking

use super::backoff::Backoff;
use super::{Connection, Connector};
use crate::cluster::{NodeAddress, NodeHealth, NodeStatus};
use crate::config::{ClientConfig, Credentials};
use crate::error::{GlideError, Result};
use crate::protocol::{Cmd, Value, cmd};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedMutexGuard, broadcast};
use tracing::{debug, error, info, warn};

/// Health transition of a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthEvent {
    pub address: NodeAddress,
    pub health: NodeHealth,
}

/// Handshake steps run on every new connection
#[derive(Debug, Clone)]
struct Handshake {
    credentials: Option<Credentials>,
    client_name: Option<String>,
    database_id: u32,
    read_only: bool,
    fetch_zone: bool,
    timeout: Duration,
}

#[derive(Debug)]
struct NodeState {
    health: NodeHealth,
    last_seen: Option<Instant>,
    zone: Option<String>,
}

type Slot = Arc<tokio::sync::Mutex<Option<Box<dyn Connection>>>>;

struct NodeEntry {
    slot: Slot,
    stale: AtomicBool,
    state: Mutex<NodeState>,
}

impl NodeEntry {
    fn new() -> Self {
        Self {
            slot: Arc::new(tokio::sync::Mutex::new(None)),
            stale: AtomicBool::new(false),
            state: Mutex::new(NodeState {
                health: NodeHealth::Up,
                last_seen: None,
                zone: None,
            }),
        }
    }

    fn touch(&self) {
        self.state.lock().last_seen = Some(Instant::now());
    }
}

/// Pools one connection per node
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    handshake: Handshake,
    backoff: Backoff,
    request_timeout: Duration,
    nodes: RwLock<HashMap<NodeAddress, Arc<NodeEntry>>>,
    events: broadcast::Sender<HealthEvent>,
    closed: AtomicBool,
}

impl ConnectionManager {
    pub fn new(config: &ClientConfig, connector: Arc<dyn Connector>, cluster_mode: bool) -> Self {
        let (events, _) = broadcast::channel(64);
        let handshake = Handshake {
            credentials: config.credentials.clone(),
            client_name: config.client_name.clone(),
            database_id: if cluster_mode { 0 } else { config.database_id },
            read_only: cluster_mode && config.read_from.reads_from_replicas(),
            fetch_zone: config.read_from.is_az_aware(),
            timeout: config.connection_timeout(),
        };

        Self {
            connector,
            handshake,
            backoff: Backoff::new(config.reconnect_strategy.clone()),
            request_timeout: config.request_timeout(),
            nodes: RwLock::new(HashMap::new()),
            events,
            closed: AtomicBool::new(false),
        }
    }

    /// Subscribe to node health transitions
    pub fn subscribe(&self) -> broadcast::Receiver<HealthEvent> {
        self.events.subscribe()
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn health(&self, address: &NodeAddress) -> Option<NodeHealth> {
        self.nodes
            .read()
            .get(address)
            .map(|entry| entry.state.lock().health)
    }

    pub fn last_seen(&self, address: &NodeAddress) -> Option<Instant> {
        self.nodes
            .read()
            .get(address)
            .and_then(|entry| entry.state.lock().last_seen)
    }

    fn entry(&self, address: &NodeAddress) -> Arc<NodeEntry> {
        if let Some(entry) = self.nodes.read().get(address) {
            return entry.clone();
        }
        self.nodes
            .write()
            .entry(address.clone())
            .or_insert_with(|| Arc::new(NodeEntry::new()))
            .clone()
    }

    /// Exclusive use of the node's connection, connecting if needed.
    ///
    /// Waits for the pool slot up to the request timeout.
    pub async fn acquire(&self, address: &NodeAddress) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(GlideError::ClientClosed);
        }

        let entry = self.entry(address);
        let mut guard = tokio::time::timeout(self.request_timeout, entry.slot.clone().lock_owned())
            .await
            .map_err(|_| GlideError::Timeout {
                address: address.clone(),
            })?;

        if entry.stale.swap(false, Ordering::AcqRel) {
            *guard = None;
        }
        if guard.is_none() {
            let conn = self.connect_with_retry(address, &entry).await?;
            *guard = Some(conn);
        }

        Ok(PooledConnection {
            guard,
            entry,
            address: address.clone(),
            request_timeout: self.request_timeout,
        })
    }

    /// Acquire, send one command and release
    pub async fn request(&self, address: &NodeAddress, cmd: &Cmd) -> Result<Value> {
        let mut conn = self.acquire(address).await?;
        conn.request(cmd).await
    }

    /// Drop the node's connection: now if idle, otherwise when released
    pub fn invalidate(&self, address: &NodeAddress) {
        let Some(entry) = self.nodes.read().get(address).cloned() else {
            return;
        };
        entry.stale.store(true, Ordering::Release);
        if let Ok(mut slot) = entry.slot.try_lock() {
            *slot = None;
            entry.stale.store(false, Ordering::Release);
        }
        debug!(address = %address, "Connection invalidated");
    }

    /// Forget every node outside `keep`. Idle connections close now, busy
    /// ones when their holder releases them. Returns the number of nodes
    /// dropped.
    pub fn retain(&self, keep: &[NodeAddress]) -> usize {
        let departed: Vec<(NodeAddress, Arc<NodeEntry>)> = {
            let mut nodes = self.nodes.write();
            let gone: Vec<NodeAddress> = nodes
                .keys()
                .filter(|address| !keep.contains(address))
                .cloned()
                .collect();
            gone.into_iter()
                .filter_map(|address| nodes.remove(&address).map(|entry| (address, entry)))
                .collect()
        };

        for (address, entry) in &departed {
            if let Ok(mut slot) = entry.slot.try_lock() {
                *slot = None;
            }
            debug!(address = %address, "Node left the topology, connection dropped");
        }
        departed.len()
    }

    /// Nodes currently tracked by the pool
    pub fn known_nodes(&self) -> Vec<NodeAddress> {
        self.nodes.read().keys().cloned().collect()
    }

    /// Wait for in-flight requests to release their connections, then drop
    /// every connection. Later `acquire` calls fail with `ClientClosed`.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let entries: Vec<(NodeAddress, Arc<NodeEntry>)> = self.nodes.write().drain().collect();
        for (address, entry) in entries {
            let mut slot = entry.slot.lock().await;
            if slot.take().is_some() {
                debug!(address = %address, "Connection closed");
            }
        }
        info!("Connection manager closed");
    }

    async fn connect_with_retry(
        &self,
        address: &NodeAddress,
        entry: &NodeEntry,
    ) -> Result<Box<dyn Connection>> {
        let mut attempt: u32 = 0;
        loop {
            match self.connect_once(address).await {
                Ok((conn, zone)) => {
                    {
                        let mut state = entry.state.lock();
                        state.last_seen = Some(Instant::now());
                        if zone.is_some() {
                            state.zone = zone;
                        }
                    }
                    self.set_health(address, entry, NodeHealth::Up);
                    debug!(address = %address, attempt, "Connected");
                    return Ok(conn);
                }
                Err(e) if !e.is_transient() => {
                    warn!(address = %address, error = %e, "Connection handshake rejected");
                    return Err(e);
                }
                Err(e) => {
                    if attempt >= self.backoff.retries() {
                        self.set_health(address, entry, NodeHealth::Down);
                        error!(
                            address = %address,
                            attempts = attempt + 1,
                            error = %e,
                            "Node unreachable"
                        );
                        return Err(GlideError::Unreachable {
                            address: address.clone(),
                            attempts: attempt + 1,
                        });
                    }

                    self.set_health(address, entry, NodeHealth::Suspect);
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        address = %address,
                        attempt,
                        delay = ?delay,
                        error = %e,
                        "Connection attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn connect_once(
        &self,
        address: &NodeAddress,
    ) -> Result<(Box<dyn Connection>, Option<String>)> {
        let mut conn = tokio::time::timeout(self.handshake.timeout, self.connector.connect(address))
            .await
            .map_err(|_| GlideError::Timeout {
                address: address.clone(),
            })??;
        let zone = self.run_handshake(conn.as_mut(), address).await?;
        Ok((conn, zone))
    }

    async fn run_handshake(
        &self,
        conn: &mut dyn Connection,
        address: &NodeAddress,
    ) -> Result<Option<String>> {
        let hs = &self.handshake;

        if let Some(credentials) = &hs.credentials {
            let mut auth = cmd("AUTH");
            if let Some(username) = &credentials.username {
                auth.push_arg(username.as_str());
            }
            auth.push_arg(credentials.password.as_str());
            self.handshake_step(conn, address, &auth).await?;
        }
        if let Some(name) = &hs.client_name {
            let setname = cmd("CLIENT").arg("SETNAME").arg(name.as_str());
            self.handshake_step(conn, address, &setname).await?;
        }
        if hs.database_id != 0 {
            self.handshake_step(conn, address, &cmd("SELECT").arg(hs.database_id))
                .await?;
        }
        if hs.read_only {
            self.handshake_step(conn, address, &cmd("READONLY")).await?;
        }
        if hs.fetch_zone {
            let info = self
                .handshake_step(conn, address, &cmd("INFO").arg("server"))
                .await?;
            return Ok(info.as_str().and_then(parse_availability_zone));
        }
        Ok(None)
    }

    async fn handshake_step(
        &self,
        conn: &mut dyn Connection,
        address: &NodeAddress,
        step: &Cmd,
    ) -> Result<Value> {
        let reply = tokio::time::timeout(self.handshake.timeout, conn.request(step))
            .await
            .map_err(|_| GlideError::Timeout {
                address: address.clone(),
            })??;
        match reply {
            Value::Error(message) => Err(GlideError::Server {
                address: address.clone(),
                message,
            }),
            other => Ok(other),
        }
    }

    fn set_health(&self, address: &NodeAddress, entry: &NodeEntry, health: NodeHealth) {
        let previous = std::mem::replace(&mut entry.state.lock().health, health);
        if previous != health {
            if health == NodeHealth::Up && previous == NodeHealth::Down {
                info!(address = %address, "Node recovered");
            }
            let _ = self.events.send(HealthEvent {
                address: address.clone(),
                health,
            });
        }
    }
}

impl NodeStatus for ConnectionManager {
    fn is_available(&self, address: &NodeAddress) -> bool {
        self.health(address) != Some(NodeHealth::Down)
    }

    fn zone(&self, address: &NodeAddress) -> Option<String> {
        self.nodes
            .read()
            .get(address)
            .and_then(|entry| entry.state.lock().zone.clone())
    }
}

/// `availability_zone:<az>` line of an `INFO server` reply
fn parse_availability_zone(info: &str) -> Option<String> {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("availability_zone:"))
        .map(str::trim)
        .filter(|az| !az.is_empty())
        .map(str::to_string)
}

/// Exclusive handle on a node's pooled connection; released on drop
pub struct PooledConnection {
    guard: OwnedMutexGuard<Option<Box<dyn Connection>>>,
    entry: Arc<NodeEntry>,
    address: NodeAddress,
    request_timeout: Duration,
}

impl PooledConnection {
    pub fn address(&self) -> &NodeAddress {
        &self.address
    }

    /// Send a command bound by the request timeout.
    ///
    /// Transport failures and timeouts drop the connection so the next
    /// `acquire` reconnects.
    pub async fn request(&mut self, cmd: &Cmd) -> Result<Value> {
        let conn = self.guard.as_mut().ok_or_else(|| {
            GlideError::connection(&self.address, "connection was invalidated")
        })?;

        match tokio::time::timeout(self.request_timeout, conn.request(cmd)).await {
            Ok(Ok(value)) => {
                self.entry.touch();
                Ok(value)
            }
            Ok(Err(e)) => {
                if e.is_transient() || matches!(e, GlideError::Protocol(_)) {
                    *self.guard = None;
                }
                Err(e)
            }
            Err(_) => {
                *self.guard = None;
                Err(GlideError::Timeout {
                    address: self.address.clone(),
                })
            }
        }
    }

    /// Drop the underlying connection now
    pub fn invalidate(&mut self) {
        *self.guard = None;
    }
}
