//! Common test utilities
//!
//! [`MockCluster`] is an in-memory cluster reachable through a
//! [`Connector`]. Every node answers from one shared keyspace but only for
//! the slots it owns, replying `MOVED`/`ASK` like a real node would.

#![allow(dead_code)] // Used by other test modules

use async_trait::async_trait;
use glide_core::{
    ClientConfig, Cmd, Connection, Connector, GlideError, NodeAddress, ReconnectStrategy, Result,
    Value, hash_slot,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub const TOTAL_SLOTS: u16 = 16384;

#[derive(Debug, Clone)]
enum Entry {
    Str(String),
    Hash(BTreeMap<String, String>),
}

#[derive(Debug, Clone)]
struct Shard {
    start: u16,
    end: u16,
    primary: NodeAddress,
    replicas: Vec<NodeAddress>,
}

#[derive(Default)]
struct State {
    cluster_mode: bool,
    shards: Vec<Shard>,
    data: BTreeMap<String, Entry>,
    expiry: HashMap<String, i64>,
    down: HashSet<NodeAddress>,
    /// slot -> (source, target) of an in-progress migration
    migrating: HashMap<u16, (NodeAddress, NodeAddress)>,
    /// node -> node it always redirects keyed commands to
    forced_moved: HashMap<NodeAddress, NodeAddress>,
    connects: HashMap<NodeAddress, usize>,
    /// live connections per node
    open: HashMap<NodeAddress, usize>,
    /// `CLUSTER SLOTS` queries still to answer with an error
    failing_slot_queries: usize,
    /// the next `CLUSTER SLOTS` query waits for `release()`
    hold_slot_query: bool,
    calls: Vec<(NodeAddress, Vec<String>)>,
}

/// In-memory cluster (or standalone server) for tests
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<State>>,
    release: Arc<Notify>,
}

impl MockCluster {
    /// `shards` primaries splitting the slot space evenly, each with
    /// `replicas` replicas. Primaries listen on 7000.., replicas on 8000..
    pub fn new(shards: u16, replicas: u16) -> Self {
        let per_shard = TOTAL_SLOTS / shards;
        let shards = (0..shards)
            .map(|i| {
                let start = i * per_shard;
                let end = if i + 1 == shards {
                    TOTAL_SLOTS - 1
                } else {
                    start + per_shard - 1
                };
                Shard {
                    start,
                    end,
                    primary: node(7000 + i),
                    replicas: (0..replicas).map(|r| node(8000 + i * 10 + r)).collect(),
                }
            })
            .collect();
        Self::with_state(State {
            cluster_mode: true,
            shards,
            ..State::default()
        })
    }

    /// Standalone server on port 6379
    pub fn standalone() -> Self {
        Self::with_state(State {
            cluster_mode: false,
            shards: vec![Shard {
                start: 0,
                end: TOTAL_SLOTS - 1,
                primary: node(6379),
                replicas: Vec::new(),
            }],
            ..State::default()
        })
    }

    fn with_state(state: State) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            release: Arc::new(Notify::new()),
        }
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            cluster: self.clone(),
        })
    }

    pub fn primaries(&self) -> Vec<NodeAddress> {
        self.state
            .lock()
            .shards
            .iter()
            .map(|s| s.primary.clone())
            .collect()
    }

    pub fn owner(&self, slot: u16) -> NodeAddress {
        self.state.lock().owner(slot)
    }

    /// Put a string value directly into the keyspace
    pub fn insert(&self, key: &str, value: &str) {
        self.state
            .lock()
            .data
            .insert(key.to_string(), Entry::Str(value.to_string()));
    }

    pub fn get(&self, key: &str) -> Option<String> {
        match self.state.lock().data.get(key) {
            Some(Entry::Str(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn set_down(&self, address: &NodeAddress, down: bool) {
        let mut state = self.state.lock();
        if down {
            state.down.insert(address.clone());
        } else {
            state.down.remove(address);
        }
    }

    /// Reassign a single slot to another primary
    pub fn move_slot(&self, slot: u16, to: &NodeAddress) {
        let mut state = self.state.lock();
        let index = state
            .shards
            .iter()
            .position(|s| s.start <= slot && slot <= s.end)
            .expect("slot is covered");
        let shard = state.shards.remove(index);
        if shard.start < slot {
            state.shards.push(Shard {
                end: slot - 1,
                ..shard.clone()
            });
        }
        if slot < shard.end {
            state.shards.push(Shard {
                start: slot + 1,
                ..shard.clone()
            });
        }
        state.shards.push(Shard {
            start: slot,
            end: slot,
            primary: to.clone(),
            replicas: Vec::new(),
        });
        state.shards.sort_by_key(|s| s.start);
    }

    /// Promote the first replica of the shard owned by `primary`
    pub fn failover(&self, primary: &NodeAddress) -> NodeAddress {
        let mut state = self.state.lock();
        let shard = state
            .shards
            .iter_mut()
            .find(|s| &s.primary == primary)
            .expect("primary exists");
        let promoted = shard.replicas.remove(0);
        shard.replicas.push(shard.primary.clone());
        shard.primary = promoted.clone();
        promoted
    }

    /// Take a replica out of the cluster altogether
    pub fn remove_node(&self, address: &NodeAddress) {
        for shard in self.state.lock().shards.iter_mut() {
            shard.replicas.retain(|r| r != address);
        }
    }

    /// Start migrating `slot` from its owner to `target`; the keys of the
    /// slot already live on the target
    pub fn start_migration(&self, slot: u16, target: &NodeAddress) {
        let mut state = self.state.lock();
        let source = state.owner(slot);
        state.migrating.insert(slot, (source, target.clone()));
    }

    /// Make `from` answer every keyed command with `MOVED` to `to`
    pub fn force_moved(&self, from: &NodeAddress, to: &NodeAddress) {
        self.state
            .lock()
            .forced_moved
            .insert(from.clone(), to.clone());
    }

    pub fn connects(&self, address: &NodeAddress) -> usize {
        self.state.lock().connects.get(address).copied().unwrap_or(0)
    }

    /// Answer the next `count` slot table queries with an error. With
    /// `hold`, the first of them also waits for [`MockCluster::release`].
    pub fn fail_slot_queries(&self, count: usize, hold: bool) {
        let mut state = self.state.lock();
        state.failing_slot_queries = count;
        state.hold_slot_query = hold;
    }

    pub fn open_connections(&self, address: &NodeAddress) -> usize {
        self.state.lock().open.get(address).copied().unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.state.lock().connects.values().sum()
    }

    /// Number of commands named `name` that reached `address`
    pub fn calls_to(&self, address: &NodeAddress, name: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(a, args)| a == address && args[0] == name)
            .count()
    }

    /// Number of commands named `name` across all nodes
    pub fn calls(&self, name: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(_, args)| args[0] == name)
            .count()
    }

    /// Every command received by `address`, in order
    pub fn commands(&self, address: &NodeAddress) -> Vec<Vec<String>> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|(a, _)| a == address)
            .map(|(_, args)| args.clone())
            .collect()
    }

    /// Unblock pending `DEBUG SLEEP` commands and a held slot table query
    pub fn release(&self) {
        self.release.notify_waiters();
    }
}

impl State {
    fn owner(&self, slot: u16) -> NodeAddress {
        self.shards
            .iter()
            .find(|s| s.start <= slot && slot <= s.end)
            .map(|s| s.primary.clone())
            .expect("slot is covered")
    }

    fn is_known(&self, address: &NodeAddress) -> bool {
        self.shards
            .iter()
            .any(|s| &s.primary == address || s.replicas.contains(address))
    }

    fn replica_of(&self, address: &NodeAddress, slot: u16) -> bool {
        self.shards
            .iter()
            .any(|s| s.start <= slot && slot <= s.end && s.replicas.contains(address))
    }

    fn cluster_slots(&self) -> Value {
        let entry = |a: &NodeAddress| {
            Value::Array(vec![
                bulk(&a.host),
                Value::Int(i64::from(a.port)),
                bulk(&format!("id-{}", a.port)),
            ])
        };
        Value::Array(
            self.shards
                .iter()
                .map(|s| {
                    let mut fields = vec![
                        Value::Int(i64::from(s.start)),
                        Value::Int(i64::from(s.end)),
                        entry(&s.primary),
                    ];
                    fields.extend(s.replicas.iter().map(entry));
                    Value::Array(fields)
                })
                .collect(),
        )
    }

    /// Keys owned by `address`, sorted
    fn keys_of(&self, address: &NodeAddress) -> Vec<String> {
        self.data
            .keys()
            .filter(|k| !self.cluster_mode || &self.owner(hash_slot(k.as_bytes())) == address)
            .cloned()
            .collect()
    }

    /// Redirection a node would answer for a keyed command, if any
    fn redirect(
        &self,
        address: &NodeAddress,
        keys: &[String],
        session: &Session,
        read: bool,
    ) -> Option<Value> {
        let first = keys.first()?;
        let slot = hash_slot(first.as_bytes());
        if keys.iter().any(|k| hash_slot(k.as_bytes()) != slot) {
            return Some(error("CROSSSLOT Keys in request don't hash to the same slot"));
        }
        if let Some(to) = self.forced_moved.get(address) {
            return Some(error(&format!("MOVED {} {}", slot, to)));
        }
        if let Some((source, target)) = self.migrating.get(&slot) {
            if address == source {
                return Some(error(&format!("ASK {} {}", slot, target)));
            }
            if address == target {
                return if session.asking {
                    None
                } else {
                    Some(error(&format!("MOVED {} {}", slot, source)))
                };
            }
        }
        let owner = self.owner(slot);
        if &owner == address || (read && session.readonly && self.replica_of(address, slot)) {
            None
        } else {
            Some(error(&format!("MOVED {} {}", slot, owner)))
        }
    }

    fn execute(&mut self, address: &NodeAddress, args: &[String], session: &mut Session) -> Value {
        let name = args[0].as_str();
        let asking = std::mem::take(&mut session.asking);

        match name {
            "PING" => return Value::Status("PONG".to_string()),
            "ECHO" => return bulk(&args[1]),
            "AUTH" | "CLIENT" | "SELECT" => return ok(),
            "READONLY" => {
                session.readonly = true;
                return ok();
            }
            "ASKING" => {
                session.asking = true;
                return ok();
            }
            "INFO" => {
                return bulk(&format!(
                    "# Server\r\nredis_version:7.2.4\r\navailability_zone:az-{}\r\n",
                    address.port % 2
                ));
            }
            "DEBUG" => return ok(),
            "TIME" => return Value::Array(vec![bulk("1700000000"), bulk("42")]),
            "CLUSTER" if self.cluster_mode && self.failing_slot_queries > 0 => {
                self.failing_slot_queries -= 1;
                return error("ERR slot table unavailable");
            }
            "CLUSTER" if self.cluster_mode => return self.cluster_slots(),
            "CLUSTER" => return error("ERR This instance has cluster support disabled"),
            "DBSIZE" => return Value::Int(self.keys_of(address).len() as i64),
            "FLUSHALL" => {
                for key in self.keys_of(address) {
                    self.data.remove(&key);
                }
                return ok();
            }
            "SCAN" => return self.scan(address, args),
            _ => {}
        }

        let keys: Vec<String> = match name {
            "MGET" | "DEL" | "EXISTS" => args[1..].to_vec(),
            "MSET" => args[1..].iter().step_by(2).cloned().collect(),
            _ => args.get(1).cloned().into_iter().collect(),
        };
        let read = matches!(
            name,
            "GET" | "MGET" | "EXISTS" | "TTL" | "PTTL" | "TYPE" | "HGET" | "HGETALL" | "HLEN"
        );
        if self.cluster_mode {
            let session = Session {
                asking,
                readonly: session.readonly,
            };
            if let Some(reply) = self.redirect(address, &keys, &session, read) {
                return reply;
            }
        }

        match name {
            "GET" => match self.data.get(&args[1]) {
                Some(Entry::Str(v)) => bulk(v),
                Some(_) => wrong_type(),
                None => Value::Nil,
            },
            "SET" => {
                self.data
                    .insert(args[1].clone(), Entry::Str(args[2].clone()));
                match args.get(3).map(String::as_str) {
                    Some("PX") => {
                        let ms = args[4].parse().unwrap_or(0);
                        self.expiry.insert(args[1].clone(), ms);
                    }
                    _ => {
                        self.expiry.remove(&args[1]);
                    }
                }
                ok()
            }
            "MGET" => Value::Array(
                args[1..]
                    .iter()
                    .map(|k| match self.data.get(k) {
                        Some(Entry::Str(v)) => bulk(v),
                        _ => Value::Nil,
                    })
                    .collect(),
            ),
            "MSET" => {
                for pair in args[1..].chunks(2) {
                    self.data
                        .insert(pair[0].clone(), Entry::Str(pair[1].clone()));
                }
                ok()
            }
            "DEL" => {
                let removed = args[1..]
                    .iter()
                    .filter(|k| self.data.remove(*k).is_some())
                    .count();
                Value::Int(removed as i64)
            }
            "EXISTS" => Value::Int(
                args[1..]
                    .iter()
                    .filter(|k| self.data.contains_key(*k))
                    .count() as i64,
            ),
            "INCR" | "INCRBY" | "DECR" => {
                let delta = match name {
                    "INCR" => 1,
                    "DECR" => -1,
                    _ => args[2].parse::<i64>().unwrap_or(0),
                };
                let current = match self.data.get(&args[1]) {
                    Some(Entry::Str(v)) => match v.parse::<i64>() {
                        Ok(n) => n,
                        Err(_) => return error("ERR value is not an integer or out of range"),
                    },
                    Some(_) => return wrong_type(),
                    None => 0,
                };
                let next = current + delta;
                self.data
                    .insert(args[1].clone(), Entry::Str(next.to_string()));
                Value::Int(next)
            }
            "EXPIRE" | "PEXPIRE" => {
                if !self.data.contains_key(&args[1]) {
                    return Value::Int(0);
                }
                let amount = args[2].parse::<i64>().unwrap_or(0);
                let ms = if name == "EXPIRE" { amount * 1000 } else { amount };
                self.expiry.insert(args[1].clone(), ms);
                Value::Int(1)
            }
            "TTL" | "PTTL" => {
                if !self.data.contains_key(&args[1]) {
                    return Value::Int(-2);
                }
                match self.expiry.get(&args[1]) {
                    Some(ms) if name == "TTL" => Value::Int(ms / 1000),
                    Some(ms) => Value::Int(*ms),
                    None => Value::Int(-1),
                }
            }
            "PERSIST" => Value::Int(i64::from(self.expiry.remove(&args[1]).is_some())),
            "TYPE" => Value::Status(
                match self.data.get(&args[1]) {
                    Some(Entry::Str(_)) => "string",
                    Some(Entry::Hash(_)) => "hash",
                    None => "none",
                }
                .to_string(),
            ),
            "HSET" => {
                let entry = self
                    .data
                    .entry(args[1].clone())
                    .or_insert_with(|| Entry::Hash(BTreeMap::new()));
                let Entry::Hash(fields) = entry else {
                    return wrong_type();
                };
                let added = args[2..]
                    .chunks(2)
                    .filter(|pair| fields.insert(pair[0].clone(), pair[1].clone()).is_none())
                    .count();
                Value::Int(added as i64)
            }
            "HGET" => match self.data.get(&args[1]) {
                Some(Entry::Hash(fields)) => fields.get(&args[2]).map(|v| bulk(v)).unwrap_or(Value::Nil),
                Some(_) => wrong_type(),
                None => Value::Nil,
            },
            "HGETALL" => match self.data.get(&args[1]) {
                Some(Entry::Hash(fields)) => Value::Array(
                    fields
                        .iter()
                        .flat_map(|(f, v)| [bulk(f), bulk(v)])
                        .collect(),
                ),
                Some(_) => wrong_type(),
                None => Value::Array(Vec::new()),
            },
            "HDEL" => match self.data.get_mut(&args[1]) {
                Some(Entry::Hash(fields)) => Value::Int(
                    args[2..]
                        .iter()
                        .filter(|f| fields.remove(*f).is_some())
                        .count() as i64,
                ),
                Some(_) => wrong_type(),
                None => Value::Int(0),
            },
            "HLEN" => match self.data.get(&args[1]) {
                Some(Entry::Hash(fields)) => Value::Int(fields.len() as i64),
                Some(_) => wrong_type(),
                None => Value::Int(0),
            },
            _ => error(&format!("ERR unknown command '{}'", name)),
        }
    }

    /// `SCAN cursor [MATCH p] [COUNT n]`; the cursor is an offset into the
    /// node's sorted keys
    fn scan(&self, address: &NodeAddress, args: &[String]) -> Value {
        let cursor: usize = args[1].parse().unwrap_or(0);
        let mut count = 10;
        let mut pattern: Option<&str> = None;
        let mut i = 2;
        while i + 1 < args.len() {
            match args[i].as_str() {
                "COUNT" => count = args[i + 1].parse().unwrap_or(10),
                "MATCH" => pattern = Some(&args[i + 1]),
                _ => {}
            }
            i += 2;
        }

        let keys = self.keys_of(address);
        let end = (cursor + count).min(keys.len());
        let batch: Vec<Value> = keys
            .get(cursor..end)
            .unwrap_or_default()
            .iter()
            .filter(|k| pattern.is_none_or(|p| glob_match(p, k)))
            .map(|k| bulk(k))
            .collect();
        let next = if end >= keys.len() { 0 } else { end };
        Value::Array(vec![bulk(&next.to_string()), Value::Array(batch)])
    }
}

/// Supports `prefix*` and exact patterns
fn glob_match(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => pattern == key,
    }
}

#[derive(Default)]
struct Session {
    asking: bool,
    readonly: bool,
}

struct MockConnector {
    cluster: MockCluster,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, address: &NodeAddress) -> Result<Box<dyn Connection>> {
        let mut state = self.cluster.state.lock();
        *state.connects.entry(address.clone()).or_default() += 1;
        if state.down.contains(address) || !state.is_known(address) {
            return Err(GlideError::Connection {
                address: address.clone(),
                message: "connection refused".to_string(),
            });
        }
        *state.open.entry(address.clone()).or_default() += 1;
        Ok(Box::new(MockConnection {
            cluster: self.cluster.clone(),
            address: address.clone(),
            session: Session::default(),
        }))
    }
}

struct MockConnection {
    cluster: MockCluster,
    address: NodeAddress,
    session: Session,
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if let Some(open) = self.cluster.state.lock().open.get_mut(&self.address) {
            *open -= 1;
        }
    }
}

#[async_trait]
impl Connection for MockConnection {
    async fn request(&mut self, cmd: &Cmd) -> Result<Value> {
        let args: Vec<String> = cmd
            .args()
            .iter()
            .map(|a| String::from_utf8_lossy(a).to_string())
            .collect();
        let blocks = args[0] == "DEBUG"
            || (args[0] == "CLUSTER" && std::mem::take(&mut self.cluster.state.lock().hold_slot_query));
        let release = self.cluster.release.clone();
        let notified = release.notified();
        tokio::pin!(notified);
        if blocks {
            notified.as_mut().enable();
        }

        let reply = {
            let mut state = self.cluster.state.lock();
            if state.down.contains(&self.address) {
                return Err(GlideError::Connection {
                    address: self.address.clone(),
                    message: "connection reset by peer".to_string(),
                });
            }
            state.calls.push((self.address.clone(), args.clone()));
            state.execute(&self.address, &args, &mut self.session)
        };

        if blocks {
            notified.await;
        }
        Ok(reply)
    }
}

pub fn node(port: u16) -> NodeAddress {
    NodeAddress::new("127.0.0.1", port)
}

pub fn bulk(s: &str) -> Value {
    Value::BulkString(s.as_bytes().to_vec())
}

fn ok() -> Value {
    Value::Status("OK".to_string())
}

fn error(message: &str) -> Value {
    Value::Error(message.to_string())
}

fn wrong_type() -> Value {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

/// Fast retries and no background timer
pub fn test_config(seeds: Vec<NodeAddress>) -> ClientConfig {
    ClientConfig::new(seeds)
        .with_reconnect_strategy(ReconnectStrategy {
            num_of_retries: 2,
            factor: 1.0,
            exponent_base: 2,
            jitter_percent: 0,
            max_delay_ms: 10,
        })
        .with_request_timeout(Duration::from_secs(5))
        .with_connection_timeout(Duration::from_secs(1))
        .with_periodic_checks(false)
}

/// A key whose slot is owned by `owner`
pub fn key_on(cluster: &MockCluster, owner: &NodeAddress, prefix: &str) -> String {
    (0..)
        .map(|i| format!("{}:{}", prefix, i))
        .find(|k| &cluster.owner(hash_slot(k.as_bytes())) == owner)
        .expect("some key hashes to every shard")
}
