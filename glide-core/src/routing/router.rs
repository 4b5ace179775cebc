//! Command router
//!
//! Resolves target nodes from the topology, follows MOVED/ASK redirections
//! in a bounded loop, retries transient failures and fans commands out to
//! multiple nodes.

use super::route::{RoutingDirective, extract_keys, is_read_only};
use crate::cluster::{
    NodeAddress, NodeStatus, SlotRange, TOTAL_SLOTS, TopologyMap, hash_slot, parse_cluster_slots,
};
use crate::config::{ClientConfig, ReadFrom};
use crate::connection::ConnectionManager;
use crate::error::{GlideError, Result};
use crate::protocol::{Cmd, RedirectKind, Value, cmd, parse_redirect};
use futures::future::join_all;
use rand::seq::SliceRandom;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Upper bound on MOVED/ASK hops for one request
pub const MAX_REDIRECTIONS: usize = 16;

/// Per-node outcome of a fan-out
pub type NodeResults = Vec<(NodeAddress, Result<Value>)>;

/// Reply of a command sent with a [`RoutingDirective`]
#[derive(Debug)]
pub enum RoutedReply {
    Single(Value),
    Multi(NodeResults),
}

/// Routes commands to nodes
pub struct Router {
    cluster_mode: bool,
    topology: Arc<TopologyMap>,
    connections: Arc<ConnectionManager>,
    read_from: ReadFrom,
    client_az: Option<String>,
    seeds: Vec<NodeAddress>,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_epoch: AtomicU64,
    refresh_tx: Option<mpsc::Sender<()>>,
}

impl Router {
    /// Router for a cluster; refresh requests are delivered on `refresh_tx`
    pub fn cluster(
        config: &ClientConfig,
        connections: Arc<ConnectionManager>,
        refresh_tx: mpsc::Sender<()>,
    ) -> Self {
        Self {
            cluster_mode: true,
            topology: Arc::new(TopologyMap::new()),
            connections,
            read_from: config.read_from,
            client_az: config.client_az.clone(),
            seeds: config.addresses.clone(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
            refresh_tx: Some(refresh_tx),
        }
    }

    /// Router for a standalone deployment: the first address is the
    /// primary, the rest are replicas.
    pub fn standalone(config: &ClientConfig, connections: Arc<ConnectionManager>) -> Result<Self> {
        let (primary, replicas) = config
            .addresses
            .split_first()
            .ok_or_else(|| GlideError::Config("at least one address is required".to_string()))?;
        let topology = TopologyMap::new();
        topology.replace(vec![SlotRange::new(
            0,
            TOTAL_SLOTS - 1,
            primary.clone(),
            replicas.to_vec(),
        )])?;

        Ok(Self {
            cluster_mode: false,
            topology: Arc::new(topology),
            connections,
            read_from: config.read_from,
            client_az: config.client_az.clone(),
            seeds: config.addresses.clone(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_epoch: AtomicU64::new(0),
            refresh_tx: None,
        })
    }

    pub fn topology(&self) -> &Arc<TopologyMap> {
        &self.topology
    }

    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn is_cluster(&self) -> bool {
        self.cluster_mode
    }

    /// Execute a command routed by its keys
    pub async fn execute(&self, cmd: &Cmd) -> Result<Value> {
        let keys = extract_keys(cmd);
        let is_read = is_read_only(&cmd.name());

        if !self.cluster_mode {
            return self.execute_at_slot(cmd, 0, is_read).await;
        }

        let Some((first, rest)) = keys.split_first() else {
            let node = self.random_node(false).await?;
            return self.execute_on(&node, cmd).await;
        };
        let slot = hash_slot(first);
        if rest.iter().any(|k| hash_slot(k) != slot) {
            return Err(GlideError::CrossSlot {
                command: cmd.name(),
            });
        }
        self.execute_at_slot(cmd, slot, is_read).await
    }

    /// Execute a command on the node(s) named by `directive`
    pub async fn execute_routed(&self, cmd: &Cmd, directive: &RoutingDirective) -> Result<RoutedReply> {
        let is_read = is_read_only(&cmd.name());
        match directive {
            RoutingDirective::BySlotKey(key) => {
                let slot = hash_slot(key.as_bytes());
                let value = self.execute_at_slot(cmd, slot, is_read).await?;
                Ok(RoutedReply::Single(value))
            }
            RoutingDirective::ByAddress(address) => {
                let value = self.execute_on(address, cmd).await?;
                Ok(RoutedReply::Single(value))
            }
            RoutingDirective::RandomNode => {
                let node = self.random_node(is_read).await?;
                let value = self.execute_on(&node, cmd).await?;
                Ok(RoutedReply::Single(value))
            }
            RoutingDirective::AllPrimaries => {
                self.ensure_topology().await?;
                let nodes = self.topology.primaries();
                Ok(RoutedReply::Multi(self.fan_out(&nodes, cmd).await))
            }
            RoutingDirective::AllNodes => {
                self.ensure_topology().await?;
                let nodes = self.topology.all_nodes();
                Ok(RoutedReply::Multi(self.fan_out(&nodes, cmd).await))
            }
        }
    }

    /// Send `cmd` to every node in parallel and keep each node's outcome
    pub async fn fan_out(&self, nodes: &[NodeAddress], cmd: &Cmd) -> NodeResults {
        let replies = join_all(nodes.iter().map(|node| self.execute_on(node, cmd))).await;
        nodes.iter().cloned().zip(replies).collect()
    }

    /// Execute on a specific node without following redirections.
    /// Transient failures are retried within the reconnection budget.
    pub async fn execute_on(&self, address: &NodeAddress, cmd: &Cmd) -> Result<Value> {
        let backoff = self.connections.backoff();
        let mut retries = 0u32;
        loop {
            match self.send(address, cmd, false).await {
                Ok(Value::Error(message)) => {
                    let err = GlideError::Server {
                        address: address.clone(),
                        message,
                    };
                    if err.is_retryable_server_error() && retries < backoff.retries() {
                        tokio::time::sleep(backoff.delay(retries)).await;
                        retries += 1;
                        continue;
                    }
                    return Err(err);
                }
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < backoff.retries() => {
                    self.connections.invalidate(address);
                    warn!(address = %address, attempt = retries, error = %e, "Request failed, retrying");
                    tokio::time::sleep(backoff.delay(retries)).await;
                    retries += 1;
                }
                Err(e) => {
                    self.on_node_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Keyed execution with redirection handling
    async fn execute_at_slot(&self, cmd: &Cmd, slot: u16, is_read: bool) -> Result<Value> {
        let backoff = self.connections.backoff();
        let mut target = self.resolve(slot, is_read).await?;
        let mut asking = false;
        let mut redirections = 0usize;
        let mut moved = 0u32;
        let mut retries = 0u32;

        loop {
            let outcome = self.send(&target, cmd, asking).await;
            asking = false;

            match outcome {
                Ok(Value::Error(message)) => {
                    let redirect = if self.cluster_mode {
                        parse_redirect(&message, &target)
                    } else {
                        None
                    };

                    if let Some(redirect) = redirect {
                        redirections += 1;
                        if redirections > MAX_REDIRECTIONS {
                            return Err(GlideError::TooManyRedirections {
                                command: cmd.name(),
                                slot,
                            });
                        }
                        debug!(slot, redirect = %redirect, from = %target, "Following redirection");

                        match redirect.kind {
                            RedirectKind::Moved => {
                                moved += 1;
                                self.topology
                                    .apply_redirection(redirect.slot, &redirect.address);
                                if moved > 1 {
                                    if let Err(e) = self.refresh_topology().await {
                                        warn!(error = %e, "Topology refresh after repeated MOVED failed");
                                    }
                                    target = self
                                        .topology
                                        .resolve(slot, false, ReadFrom::Primary, None, &*self.connections)
                                        .unwrap_or(redirect.address);
                                } else {
                                    self.schedule_refresh();
                                    target = redirect.address;
                                }
                            }
                            RedirectKind::Ask => {
                                asking = true;
                                target = redirect.address;
                            }
                        }
                        continue;
                    }

                    let err = GlideError::Server {
                        address: target.clone(),
                        message,
                    };
                    if err.is_retryable_server_error() && retries < backoff.retries() {
                        debug!(slot, address = %target, error = %err, "Transient cluster error, retrying");
                        tokio::time::sleep(backoff.delay(retries)).await;
                        retries += 1;
                        continue;
                    }
                    return Err(err);
                }
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retries < backoff.retries() => {
                    self.connections.invalidate(&target);
                    warn!(
                        address = %target,
                        slot,
                        attempt = retries,
                        error = %e,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(backoff.delay(retries)).await;
                    retries += 1;
                    self.schedule_refresh();
                    if let Ok(node) = self.resolve(slot, is_read).await {
                        target = node;
                    }
                }
                Err(e) => {
                    self.on_node_failure(&e);
                    return Err(e);
                }
            }
        }
    }

    /// Send one command, preceded by `ASKING` when requested, while
    /// holding the node's connection
    async fn send(&self, address: &NodeAddress, command: &Cmd, asking: bool) -> Result<Value> {
        let mut conn = self.connections.acquire(address).await?;
        if asking {
            let reply = conn.request(&cmd("ASKING")).await?;
            if reply.is_error() {
                return Ok(reply);
            }
        }
        conn.request(command).await
    }

    async fn resolve(&self, slot: u16, is_read: bool) -> Result<NodeAddress> {
        self.ensure_topology().await?;
        let resolve = || {
            self.topology.resolve(
                slot,
                is_read,
                self.read_from,
                self.client_az.as_deref(),
                &*self.connections,
            )
        };
        match resolve() {
            Err(GlideError::SlotNotCovered(slot)) if self.cluster_mode => {
                if let Err(e) = self.refresh_topology().await {
                    warn!(slot, error = %e, "Topology refresh for uncovered slot failed");
                    return Err(GlideError::SlotNotCovered(slot));
                }
                resolve()
            }
            other => other,
        }
    }

    async fn random_node(&self, is_read: bool) -> Result<NodeAddress> {
        self.ensure_topology().await?;
        let snapshot = self.topology.snapshot();
        let candidates = if is_read {
            snapshot.all_nodes()
        } else {
            snapshot.primaries()
        };
        candidates
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or_else(|| GlideError::TopologyUnavailable("no known nodes".to_string()))
    }

    /// Load the slot map if none has been installed yet
    pub async fn ensure_topology(&self) -> Result<()> {
        if self.topology.is_empty() {
            self.refresh_topology().await?;
        }
        Ok(())
    }

    /// Ask the background worker for a refresh
    pub fn schedule_refresh(&self) {
        if let Some(tx) = &self.refresh_tx {
            // a pending request already covers this one
            let _ = tx.try_send(());
        }
    }

    /// Unreachable nodes are covered by the manager's `Down` event
    fn on_node_failure(&self, err: &GlideError) {
        if matches!(err, GlideError::Timeout { .. }) {
            self.schedule_refresh();
        }
    }

    /// Fetch `CLUSTER SLOTS` and install the result. Concurrent callers
    /// share one fetch. On failure the previous map stays in effect.
    pub async fn refresh_topology(&self) -> Result<()> {
        if !self.cluster_mode {
            return Ok(());
        }

        let observed = self.refresh_epoch.load(Ordering::Acquire);
        let _guard = self.refresh_lock.lock().await;
        if self.refresh_epoch.load(Ordering::Acquire) != observed && !self.topology.is_empty() {
            return Ok(());
        }

        let result = self.fetch_topology().await;
        // waiters only skip their own fetch after a successful one
        if result.is_ok() {
            self.refresh_epoch.fetch_add(1, Ordering::AcqRel);
        }
        result
    }

    async fn fetch_topology(&self) -> Result<()> {
        let snapshot = self.topology.snapshot();
        let mut candidates = snapshot.primaries();
        for node in snapshot.replicas().into_iter().chain(self.seeds.iter().cloned()) {
            if !candidates.contains(&node) {
                candidates.push(node);
            }
        }
        // nodes marked down are tried last
        candidates.sort_by_key(|node| !self.connections.is_available(node));

        let request = cmd("CLUSTER").arg("SLOTS");
        let mut last_error = None;
        for node in &candidates {
            let reply = match self.connections.request(node, &request).await {
                Ok(Value::Error(message)) => {
                    last_error = Some(message);
                    continue;
                }
                Ok(reply) => reply,
                Err(e) => {
                    debug!(address = %node, error = %e, "Topology query failed");
                    last_error = Some(e.to_string());
                    continue;
                }
            };

            match parse_cluster_slots(&reply, node).and_then(|ranges| self.topology.replace(ranges)) {
                Ok(_) => {
                    let mut keep = self.topology.all_nodes();
                    keep.extend(self.seeds.iter().cloned());
                    let dropped = self.connections.retain(&keep);
                    if dropped > 0 {
                        debug!(dropped, "Released connections to departed nodes");
                    }
                    return Ok(());
                }
                Err(e) => {
                    warn!(address = %node, error = %e, "Discarding slot table");
                    last_error = Some(e.to_string());
                }
            }
        }

        Err(GlideError::TopologyUnavailable(format!(
            "no node answered CLUSTER SLOTS ({} tried, last error: {})",
            candidates.len(),
            last_error.unwrap_or_else(|| "none".to_string())
        )))
    }
}
