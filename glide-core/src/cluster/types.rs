use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// Total number of hash slots
pub const TOTAL_SLOTS: u16 = 16384;

/// Node identity: `(host, port)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for NodeAddress {
    type Err = String;

    /// Parses `host:port`, `[ipv6]:port` or a bare IPv6 `a:b::c:port`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing port in address '{}'", s))?;
        let port: u16 = port
            .parse()
            .map_err(|e| format!("invalid port in address '{}': {}", s, e))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok(Self::new(host, port))
    }
}

impl Serialize for NodeAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NodeAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Parts { host: String, port: u16 },
        }

        match Repr::deserialize(deserializer)? {
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
            Repr::Parts { host, port } => Ok(Self::new(host, port)),
        }
    }
}

/// Role of a node inside its shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Primary,
    Replica,
}

/// Health state tracked by the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeHealth {
    /// Connected and answering
    Up,
    /// A connect attempt failed; retries are in progress
    Suspect,
    /// Reconnection budget exhausted
    Down,
}

/// Observable node state
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub address: NodeAddress,
    pub role: NodeRole,
    pub health: NodeHealth,
    pub last_seen: Option<Instant>,
    pub availability_zone: Option<String>,
}

/// Slot range (inclusive start, inclusive end) with its owning shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub primary: NodeAddress,
    pub replicas: Vec<NodeAddress>,
}

impl SlotRange {
    pub fn new(start: u16, end: u16, primary: NodeAddress, replicas: Vec<NodeAddress>) -> Self {
        Self {
            start,
            end,
            primary,
            replicas,
        }
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    pub fn count(&self) -> u16 {
        self.end - self.start + 1
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end && self.end < TOTAL_SLOTS
    }
}
