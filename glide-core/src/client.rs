//! Glide clients
//!
//! [`GlideClusterClient`] routes by hash slot across a cluster;
//! [`GlideClient`] talks to a standalone primary with optional replicas.
//! Both are cheap to clone and safe to share between tasks.

use crate::cluster::{NodeAddress, NodeHealth, NodeInfo, NodeRole, NodeStatus};
use crate::config::ClientConfig;
use crate::connection::{ConnectionManager, Connector, HealthEvent, TcpConnector};
use crate::error::{GlideError, Result};
use crate::protocol::{Cmd, FromValue, Value, cmd};
use crate::routing::{RoutedReply, Router, RoutingDirective};
use crate::scan::{self, ClusterScanCursor, ScanOptions};
use crate::{HashManager, KVStore};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Reply of a command that may have run on several nodes
#[derive(Debug)]
pub enum ClusterValue<T> {
    /// Reply of the single node the command ran on
    Single(T),
    /// Per-node outcome of a fan-out
    MultiNode(BTreeMap<NodeAddress, Result<T>>),
}

impl<T> ClusterValue<T> {
    pub fn is_single(&self) -> bool {
        matches!(self, ClusterValue::Single(_))
    }

    /// The single-node reply, or an error for fan-out results
    pub fn into_single(self) -> Result<T> {
        match self {
            ClusterValue::Single(value) => Ok(value),
            ClusterValue::MultiNode(results) => Err(GlideError::Protocol(format!(
                "expected a single-node reply, got replies from {} nodes",
                results.len()
            ))),
        }
    }

    /// Per-node outcomes, or `None` for a single-node reply
    pub fn into_multi(self) -> Option<BTreeMap<NodeAddress, Result<T>>> {
        match self {
            ClusterValue::Single(_) => None,
            ClusterValue::MultiNode(results) => Some(results),
        }
    }
}

impl<T: FromValue> ClusterValue<T> {
    fn from_routed(reply: RoutedReply) -> Result<Self> {
        match reply {
            RoutedReply::Single(value) => Ok(ClusterValue::Single(T::from_value(value)?)),
            RoutedReply::Multi(results) => Ok(ClusterValue::MultiNode(
                results
                    .into_iter()
                    .map(|(address, result)| (address, result.and_then(T::from_value)))
                    .collect(),
            )),
        }
    }
}

/// State shared by every clone of a client
pub(crate) struct ClientCore {
    id: Uuid,
    router: Arc<Router>,
    inflight: Arc<Semaphore>,
    inflight_limit: usize,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ClientCore {
    fn new(router: Arc<Router>, inflight_limit: usize) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            router,
            inflight: Arc::new(Semaphore::new(inflight_limit)),
            inflight_limit,
            closed: AtomicBool::new(false),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    pub(crate) fn router(&self) -> &Router {
        &self.router
    }

    /// Reserve an in-flight slot or fail immediately
    fn admit(&self) -> Result<OwnedSemaphorePermit> {
        if self.closed.load(Ordering::Acquire) {
            return Err(GlideError::ClientClosed);
        }
        self.inflight
            .clone()
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::NoPermits => GlideError::InflightLimitReached(self.inflight_limit),
                TryAcquireError::Closed => GlideError::ClientClosed,
            })
    }

    /// Route by key and convert the reply
    pub(crate) async fn send<T: FromValue>(&self, cmd: &Cmd) -> Result<T> {
        let _permit = self.admit()?;
        let value = self.router.execute(cmd).await?;
        T::from_value(value)
    }

    pub(crate) async fn send_routed<T: FromValue>(
        &self,
        cmd: &Cmd,
        directive: &RoutingDirective,
    ) -> Result<ClusterValue<T>> {
        let _permit = self.admit()?;
        let reply = self.router.execute_routed(cmd, directive).await?;
        ClusterValue::from_routed(reply)
    }

    pub(crate) async fn send_to<T: FromValue>(&self, address: &NodeAddress, cmd: &Cmd) -> Result<T> {
        let _permit = self.admit()?;
        let value = self.router.execute_on(address, cmd).await?;
        T::from_value(value)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown.send(true);

        // wait for in-flight requests
        let permits = u32::try_from(self.inflight_limit).unwrap_or(u32::MAX);
        if let Ok(all) = self.inflight.acquire_many(permits).await {
            all.forget();
        }
        self.inflight.close();

        let worker = self.worker.lock().take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
        self.router.connections().close().await;
        info!(client_id = %self.id, "Client closed");
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        let snapshot = self.router.topology().snapshot();
        let connections = self.router.connections();
        let primaries = snapshot.primaries();

        snapshot
            .all_nodes()
            .into_iter()
            .map(|address| {
                let role = if primaries.contains(&address) {
                    NodeRole::Primary
                } else {
                    NodeRole::Replica
                };
                NodeInfo {
                    health: connections.health(&address).unwrap_or(NodeHealth::Up),
                    last_seen: connections.last_seen(&address),
                    availability_zone: connections.zone(&address),
                    role,
                    address,
                }
            })
            .collect()
    }
}

/// Background topology upkeep: redirection-triggered refreshes, node-down
/// events and the optional periodic check
async fn topology_worker(
    router: Weak<Router>,
    mut refresh_rx: mpsc::Receiver<()>,
    mut health_rx: broadcast::Receiver<HealthEvent>,
    mut shutdown: watch::Receiver<bool>,
    period: Option<Duration>,
) {
    let mut ticker = period.map(|p| {
        let mut interval = tokio::time::interval_at(Instant::now() + p, p);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    loop {
        let reason = tokio::select! {
            _ = shutdown.changed() => break,
            request = refresh_rx.recv() => match request {
                Some(()) => "requested",
                None => break,
            },
            event = health_rx.recv() => match event {
                Ok(HealthEvent { address, health: NodeHealth::Down }) => {
                    debug!(address = %address, "Node down, refreshing topology");
                    "node down"
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(_)) => "events lagged",
                Err(RecvError::Closed) => break,
            },
            _ = tick(&mut ticker) => "periodic",
        };

        let Some(router) = router.upgrade() else {
            break;
        };
        // a lazy client stays offline until its first command loads the map
        if reason == "periodic" && router.topology().is_empty() {
            continue;
        }
        if let Err(e) = router.refresh_topology().await {
            warn!(reason, error = %e, "Background topology refresh failed");
        }
    }
    debug!("Topology worker stopped");
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Cluster client
#[derive(Clone)]
pub struct GlideClusterClient {
    core: Arc<ClientCore>,
}

impl GlideClusterClient {
    /// Connect over TCP (or TLS) to the cluster
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::new(&config)?;
        Self::with_connector(config, Arc::new(connector)).await
    }

    /// Connect through a custom transport
    pub async fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate(true)?;

        let connections = Arc::new(ConnectionManager::new(&config, connector, true));
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let router = Arc::new(Router::cluster(&config, connections.clone(), refresh_tx));

        if !config.lazy_connect {
            router.refresh_topology().await?;
        }

        let core = ClientCore::new(router.clone(), config.inflight_requests_limit);
        let period = config
            .periodic_checks
            .enabled
            .then(|| config.periodic_check_interval());
        let worker = tokio::spawn(topology_worker(
            Arc::downgrade(&router),
            refresh_rx,
            connections.subscribe(),
            core.shutdown.subscribe(),
            period,
        ));
        *core.worker.lock() = Some(worker);

        info!(
            client_id = %core.id,
            seeds = config.addresses.len(),
            lazy = config.lazy_connect,
            "Cluster client created"
        );
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Key-value commands
    pub fn kv(&self) -> KVStore {
        KVStore::new(self.core.clone())
    }

    /// Hash commands
    pub fn hash(&self) -> HashManager {
        HashManager::new(self.core.clone())
    }

    async fn routed<T: FromValue>(
        &self,
        cmd: Cmd,
        route: Option<RoutingDirective>,
        default: RoutingDirective,
    ) -> Result<ClusterValue<T>> {
        let directive = route.unwrap_or(default);
        self.core.send_routed(&cmd, &directive).await
    }

    /// `PING`, on a random node by default
    pub async fn ping(&self, route: Option<RoutingDirective>) -> Result<ClusterValue<String>> {
        self.routed(cmd("PING"), route, RoutingDirective::RandomNode)
            .await
    }

    /// `ECHO`, on a random node by default
    pub async fn echo(
        &self,
        message: &str,
        route: Option<RoutingDirective>,
    ) -> Result<ClusterValue<String>> {
        self.routed(cmd("ECHO").arg(message), route, RoutingDirective::RandomNode)
            .await
    }

    /// `INFO`, on every primary by default
    pub async fn info(
        &self,
        section: Option<&str>,
        route: Option<RoutingDirective>,
    ) -> Result<ClusterValue<String>> {
        let mut info = cmd("INFO");
        if let Some(section) = section {
            info.push_arg(section);
        }
        self.routed(info, route, RoutingDirective::AllPrimaries)
            .await
    }

    /// `DBSIZE`, on every primary by default
    pub async fn dbsize(&self, route: Option<RoutingDirective>) -> Result<ClusterValue<i64>> {
        self.routed(cmd("DBSIZE"), route, RoutingDirective::AllPrimaries)
            .await
    }

    /// `FLUSHALL`, on every primary by default
    pub async fn flushall(&self, route: Option<RoutingDirective>) -> Result<ClusterValue<()>> {
        self.routed(cmd("FLUSHALL"), route, RoutingDirective::AllPrimaries)
            .await
    }

    /// `TIME` as `(seconds, microseconds)`, on a random node by default
    pub async fn time(&self, route: Option<RoutingDirective>) -> Result<ClusterValue<Vec<String>>> {
        self.routed(cmd("TIME"), route, RoutingDirective::RandomNode)
            .await
    }

    /// Arbitrary command. Without a directive it is routed by its keys.
    pub async fn custom_command(
        &self,
        args: &[&str],
        route: Option<RoutingDirective>,
    ) -> Result<ClusterValue<Value>> {
        let command = build_command(args)?;
        match route {
            Some(directive) => self.core.send_routed(&command, &directive).await,
            None => self.core.send(&command).await.map(ClusterValue::Single),
        }
    }

    /// One step of a cluster-wide scan
    ///
    /// ```no_run
    /// # use glide_core::{ClientConfig, ClusterScanCursor, GlideClusterClient, ScanOptions};
    /// # async fn run(client: GlideClusterClient) -> glide_core::Result<()> {
    /// let mut cursor = ClusterScanCursor::initial();
    /// loop {
    ///     let (used, keys) = client.scan(&cursor, &ScanOptions::default()).await?;
    ///     for key in &keys {
    ///         println!("{}", String::from_utf8_lossy(key));
    ///     }
    ///     cursor = used.advance();
    ///     if cursor.is_finished() {
    ///         break;
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub async fn scan(
        &self,
        cursor: &ClusterScanCursor,
        options: &ScanOptions,
    ) -> Result<(ClusterScanCursor, Vec<Vec<u8>>)> {
        let _permit = self.core.admit()?;
        scan::cluster_scan(self.core.router(), cursor, options).await
    }

    /// Reload the slot map now
    pub async fn refresh_topology(&self) -> Result<()> {
        self.core.router().refresh_topology().await
    }

    pub fn topology_version(&self) -> u64 {
        self.core.router().topology().version()
    }

    /// Known nodes with role and health
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.core.nodes()
    }

    /// Health transitions of nodes
    pub fn subscribe_health(&self) -> broadcast::Receiver<HealthEvent> {
        self.core.router().connections().subscribe()
    }

    /// Drain in-flight requests, stop background work and drop connections
    pub async fn close(&self) {
        self.core.close().await
    }
}

/// Standalone client
#[derive(Clone)]
pub struct GlideClient {
    core: Arc<ClientCore>,
}

impl GlideClient {
    /// Connect over TCP (or TLS)
    pub async fn new(config: ClientConfig) -> Result<Self> {
        let connector = TcpConnector::new(&config)?;
        Self::with_connector(config, Arc::new(connector)).await
    }

    /// Connect through a custom transport
    pub async fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        config.validate(false)?;

        let connections = Arc::new(ConnectionManager::new(&config, connector, false));
        let router = Arc::new(Router::standalone(&config, connections.clone())?);

        if !config.lazy_connect {
            let primary = &config.addresses[0];
            drop(connections.acquire(primary).await?);
        }

        let core = ClientCore::new(router, config.inflight_requests_limit);
        info!(
            client_id = %core.id,
            primary = %config.addresses[0],
            replicas = config.addresses.len() - 1,
            database = config.database_id,
            "Standalone client created"
        );
        Ok(Self {
            core: Arc::new(core),
        })
    }

    /// Key-value commands
    pub fn kv(&self) -> KVStore {
        KVStore::new(self.core.clone())
    }

    /// Hash commands
    pub fn hash(&self) -> HashManager {
        HashManager::new(self.core.clone())
    }

    fn primary(&self) -> Result<NodeAddress> {
        self.core
            .router()
            .topology()
            .primaries()
            .into_iter()
            .next()
            .ok_or_else(|| GlideError::TopologyUnavailable("no primary configured".to_string()))
    }

    pub async fn ping(&self) -> Result<String> {
        self.core.send(&cmd("PING")).await
    }

    pub async fn echo(&self, message: &str) -> Result<String> {
        self.core.send(&cmd("ECHO").arg(message)).await
    }

    pub async fn info(&self, section: Option<&str>) -> Result<String> {
        let mut info = cmd("INFO");
        if let Some(section) = section {
            info.push_arg(section);
        }
        self.core.send(&info).await
    }

    pub async fn dbsize(&self) -> Result<i64> {
        let primary = self.primary()?;
        self.core.send_to(&primary, &cmd("DBSIZE")).await
    }

    pub async fn flushall(&self) -> Result<()> {
        self.core.send(&cmd("FLUSHALL")).await
    }

    /// `TIME` as `(seconds, microseconds)`
    pub async fn time(&self) -> Result<Vec<String>> {
        self.core.send(&cmd("TIME")).await
    }

    /// Arbitrary command
    pub async fn custom_command(&self, args: &[&str]) -> Result<Value> {
        let command = build_command(args)?;
        self.core.send(&command).await
    }

    /// One `SCAN` step against the primary; keys are raw bytes
    pub async fn scan(&self, cursor: u64, options: &ScanOptions) -> Result<(u64, Vec<Vec<u8>>)> {
        let primary = self.primary()?;
        let reply: Value = self
            .core
            .send_to(&primary, &scan::scan_command(cursor, options))
            .await?;
        scan::parse_scan_reply(reply)
    }

    /// Known nodes with role and health
    pub fn nodes(&self) -> Vec<NodeInfo> {
        self.core.nodes()
    }

    /// Drain in-flight requests and drop connections
    pub async fn close(&self) {
        self.core.close().await
    }
}

fn build_command(args: &[&str]) -> Result<Cmd> {
    let (name, rest) = args
        .split_first()
        .ok_or_else(|| GlideError::Config("empty command".to_string()))?;
    let mut command = cmd(name);
    for arg in rest {
        command.push_arg(*arg);
    }
    Ok(command)
}
