//! Cluster-wide SCAN across every primary

use super::cursor::{ClusterScanCursor, CursorState, FINISHED_CURSOR, ScanState};
use crate::error::{GlideError, Result};
use crate::protocol::{Cmd, Value, cmd};
use crate::routing::Router;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Value type filter for `SCAN ... TYPE`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    String,
    List,
    Set,
    ZSet,
    Hash,
    Stream,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectType::String => "string",
            ObjectType::List => "list",
            ObjectType::Set => "set",
            ObjectType::ZSet => "zset",
            ObjectType::Hash => "hash",
            ObjectType::Stream => "stream",
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional SCAN arguments
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanOptions {
    pub pattern: Option<String>,
    pub count: Option<u32>,
    pub object_type: Option<ObjectType>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_count(mut self, count: u32) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_type(mut self, object_type: ObjectType) -> Self {
        self.object_type = Some(object_type);
        self
    }
}

/// `SCAN <cursor> [MATCH p] [COUNT c] [TYPE t]`
pub fn scan_command(cursor: u64, options: &ScanOptions) -> Cmd {
    let mut scan = cmd("SCAN").arg(cursor);
    if let Some(pattern) = &options.pattern {
        scan.push_arg("MATCH");
        scan.push_arg(pattern.as_str());
    }
    if let Some(count) = options.count {
        scan.push_arg("COUNT");
        scan.push_arg(count);
    }
    if let Some(object_type) = options.object_type {
        scan.push_arg("TYPE");
        scan.push_arg(object_type.as_str());
    }
    scan
}

/// Split a SCAN reply into next cursor and keys. Keys are binary-safe and
/// returned as raw bytes.
pub fn parse_scan_reply(reply: Value) -> Result<(u64, Vec<Vec<u8>>)> {
    let mut parts = match reply {
        Value::Array(parts) => parts,
        other => {
            return Err(GlideError::Protocol(format!(
                "SCAN reply is not an array: {:?}",
                other
            )));
        }
    };
    if parts.len() != 2 {
        return Err(GlideError::Protocol(format!(
            "SCAN reply has {} elements, expected 2",
            parts.len()
        )));
    }

    let keys = parts.pop().unwrap_or(Value::Nil);
    let cursor = parts
        .pop()
        .and_then(|c| c.as_str().and_then(|s| s.parse::<u64>().ok()))
        .ok_or_else(|| GlideError::Protocol("SCAN reply has an invalid cursor".to_string()))?;
    let keys = match keys {
        Value::Array(items) => items
            .into_iter()
            .map(|item| {
                item.into_bytes().ok_or_else(|| {
                    GlideError::Protocol("SCAN returned a non-string key".to_string())
                })
            })
            .collect::<Result<Vec<Vec<u8>>>>()?,
        Value::Nil => Vec::new(),
        other => {
            return Err(GlideError::Protocol(format!(
                "SCAN keys are not an array: {:?}",
                other
            )));
        }
    };
    Ok((cursor, keys))
}

/// One step of a cluster scan.
///
/// Every unfinished node is scanned once, in parallel. On failure the input
/// cursor stays valid and may be retried.
pub async fn cluster_scan(
    router: &Router,
    cursor: &ClusterScanCursor,
    options: &ScanOptions,
) -> Result<(ClusterScanCursor, Vec<Vec<u8>>)> {
    let mut state = match ScanState::parse(cursor.cursor())? {
        CursorState::Finished => {
            return Ok((
                ClusterScanCursor::consumed(FINISHED_CURSOR, FINISHED_CURSOR),
                Vec::new(),
            ));
        }
        CursorState::Initial => {
            router.ensure_topology().await?;
            ScanState::initial(&router.topology().snapshot())
        }
        CursorState::InProgress(mut state) => {
            router.ensure_topology().await?;
            let snapshot = router.topology().snapshot();
            if state.version != snapshot.version() {
                debug!(
                    from = state.version,
                    to = snapshot.version(),
                    "Topology changed during scan"
                );
            }
            state.reconcile(&snapshot);
            state
        }
    };

    let pending: Vec<usize> = (0..state.nodes.len())
        .filter(|&i| !state.nodes[i].done)
        .collect();
    let requests = pending.iter().map(|&i| {
        let node = &state.nodes[i];
        let scan = scan_command(node.cursor, options);
        let address = node.address.clone();
        async move { router.execute_on(&address, &scan).await }
    });
    let replies = join_all(requests).await;

    let mut keys = Vec::new();
    for (i, reply) in pending.into_iter().zip(replies) {
        let reply = reply.inspect_err(|e| {
            warn!(address = %state.nodes[i].address, error = %e, "Scan step failed");
            router.schedule_refresh();
        })?;
        let (next, batch) = parse_scan_reply(reply)?;
        let node = &mut state.nodes[i];
        node.cursor = next;
        node.done = next == 0;
        keys.extend(batch);
    }

    let next_cursor = if state.is_complete() {
        FINISHED_CURSOR.to_string()
    } else {
        state.encode()?
    };
    Ok((
        ClusterScanCursor::consumed(cursor.cursor(), next_cursor),
        keys,
    ))
}
