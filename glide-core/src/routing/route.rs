//! Routing directives, key arguments and command classification

use crate::cluster::NodeAddress;
use crate::protocol::Cmd;

/// Explicit target for a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingDirective {
    /// One node picked at random
    RandomNode,
    /// Every primary
    AllPrimaries,
    /// Every primary and replica
    AllNodes,
    /// A specific node
    ByAddress(NodeAddress),
    /// The node serving the key's slot: the primary for writes, chosen by
    /// the read policy for read-only commands
    BySlotKey(String),
}

impl RoutingDirective {
    /// Whether the directive yields a single reply
    pub fn is_single_node(&self) -> bool {
        matches!(
            self,
            Self::RandomNode | Self::ByAddress(_) | Self::BySlotKey(_)
        )
    }
}

/// One key or an ordered list of keys
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Keys {
    One(String),
    Many(Vec<String>),
}

impl Keys {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            Keys::One(key) => vec![key],
            Keys::Many(keys) => keys,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Keys::One(_) => 1,
            Keys::Many(keys) => keys.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<&str> for Keys {
    fn from(key: &str) -> Self {
        Keys::One(key.to_string())
    }
}

impl From<String> for Keys {
    fn from(key: String) -> Self {
        Keys::One(key)
    }
}

impl From<&String> for Keys {
    fn from(key: &String) -> Self {
        Keys::One(key.clone())
    }
}

impl From<Vec<String>> for Keys {
    fn from(keys: Vec<String>) -> Self {
        Keys::Many(keys)
    }
}

impl From<Vec<&str>> for Keys {
    fn from(keys: Vec<&str>) -> Self {
        Keys::Many(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Keys {
    fn from(keys: &[&str]) -> Self {
        Keys::Many(keys.iter().map(|k| k.to_string()).collect())
    }
}

impl From<&[String]> for Keys {
    fn from(keys: &[String]) -> Self {
        Keys::Many(keys.to_vec())
    }
}

impl<const N: usize> From<[&str; N]> for Keys {
    fn from(keys: [&str; N]) -> Self {
        Keys::Many(keys.iter().map(|k| k.to_string()).collect())
    }
}

const READ_ONLY_COMMANDS: &[&str] = &[
    "BITCOUNT",
    "BITPOS",
    "DBSIZE",
    "DUMP",
    "ECHO",
    "EXISTS",
    "GEODIST",
    "GEOHASH",
    "GEOPOS",
    "GEOSEARCH",
    "GET",
    "GETBIT",
    "GETRANGE",
    "HEXISTS",
    "HGET",
    "HGETALL",
    "HKEYS",
    "HLEN",
    "HMGET",
    "HRANDFIELD",
    "HSCAN",
    "HSTRLEN",
    "HVALS",
    "INFO",
    "KEYS",
    "LINDEX",
    "LLEN",
    "LPOS",
    "LRANGE",
    "MGET",
    "PFCOUNT",
    "PING",
    "PTTL",
    "RANDOMKEY",
    "SCAN",
    "SCARD",
    "SDIFF",
    "SINTER",
    "SISMEMBER",
    "SMEMBERS",
    "SMISMEMBER",
    "SRANDMEMBER",
    "SSCAN",
    "STRLEN",
    "SUNION",
    "TIME",
    "TTL",
    "TYPE",
    "XLEN",
    "XRANGE",
    "XREVRANGE",
    "ZCARD",
    "ZCOUNT",
    "ZRANGE",
    "ZRANK",
    "ZREVRANGE",
    "ZSCAN",
    "ZSCORE",
];

const KEYLESS_COMMANDS: &[&str] = &[
    "ASKING",
    "AUTH",
    "CLIENT",
    "CLUSTER",
    "COMMAND",
    "CONFIG",
    "DBSIZE",
    "ECHO",
    "FLUSHALL",
    "FLUSHDB",
    "FUNCTION",
    "HELLO",
    "INFO",
    "KEYS",
    "LASTSAVE",
    "PING",
    "RANDOMKEY",
    "READONLY",
    "READWRITE",
    "SCAN",
    "SCRIPT",
    "SELECT",
    "TIME",
    "WAIT",
];

/// Commands whose every argument is a key
const ALL_ARGS_KEYS: &[&str] = &[
    "DEL", "EXISTS", "MGET", "PFCOUNT", "SDIFF", "SINTER", "SUNION", "TOUCH", "UNLINK", "WATCH",
];

/// Commands taking `key value [key value ...]`
const INTERLEAVED_KEYS: &[&str] = &["MSET", "MSETNX"];

/// Whether the command never writes
pub fn is_read_only(name: &str) -> bool {
    READ_ONLY_COMMANDS.contains(&name)
}

/// Keys of a command, in argument order
pub fn extract_keys(cmd: &Cmd) -> Vec<&[u8]> {
    let name = cmd.name();
    let args = &cmd.args()[1..];

    if KEYLESS_COMMANDS.contains(&name.as_str()) {
        return Vec::new();
    }
    if ALL_ARGS_KEYS.contains(&name.as_str()) {
        return args.iter().map(Vec::as_slice).collect();
    }
    if INTERLEAVED_KEYS.contains(&name.as_str()) {
        return args.iter().step_by(2).map(Vec::as_slice).collect();
    }
    if name == "EVAL" || name == "EVALSHA" || name == "FCALL" {
        let numkeys = args
            .get(1)
            .and_then(|n| std::str::from_utf8(n).ok())
            .and_then(|n| n.parse::<usize>().ok())
            .unwrap_or(0);
        return args.iter().skip(2).take(numkeys).map(Vec::as_slice).collect();
    }
    args.first().map(|k| vec![k.as_slice()]).unwrap_or_default()
}
