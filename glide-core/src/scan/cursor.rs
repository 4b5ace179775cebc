//! Resumable cluster scan cursor
//!
//! Cursor strings are `"0"` (start), `"finished"` (terminal) or an opaque
//! token: `glide-scan:v1:` followed by URL-safe base64 of a JSON document
//! holding the topology version and per-node progress.

use crate::cluster::{NodeAddress, TopologySnapshot};
use crate::error::{GlideError, Result};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const INITIAL_CURSOR: &str = "0";
pub const FINISHED_CURSOR: &str = "finished";
const TOKEN_PREFIX: &str = "glide-scan:v1:";

/// Handle on a cluster-wide scan.
///
/// `cursor()` is the cursor this handle was built from; after a scan call
/// the returned handle also carries `next_cursor()`, the cursor for the
/// following call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterScanCursor {
    cursor: String,
    next_cursor: Option<String>,
}

impl ClusterScanCursor {
    pub fn new(cursor: impl Into<String>) -> Self {
        let cursor = cursor.into();
        Self {
            cursor: if cursor.is_empty() {
                INITIAL_CURSOR.to_string()
            } else {
                cursor
            },
            next_cursor: None,
        }
    }

    pub fn initial() -> Self {
        Self::new(INITIAL_CURSOR)
    }

    pub(crate) fn consumed(cursor: impl Into<String>, next_cursor: impl Into<String>) -> Self {
        Self {
            cursor: cursor.into(),
            next_cursor: Some(next_cursor.into()),
        }
    }

    pub fn cursor(&self) -> &str {
        &self.cursor
    }

    /// Cursor for the next call; `"0"` if this handle was never used
    pub fn next_cursor(&self) -> &str {
        self.next_cursor.as_deref().unwrap_or(INITIAL_CURSOR)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor == FINISHED_CURSOR
    }

    /// Handle for the next call
    pub fn advance(&self) -> Self {
        Self::new(self.next_cursor())
    }
}

impl Default for ClusterScanCursor {
    fn default() -> Self {
        Self::initial()
    }
}

impl fmt::Display for ClusterScanCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cursor)
    }
}

impl From<&str> for ClusterScanCursor {
    fn from(cursor: &str) -> Self {
        Self::new(cursor)
    }
}

impl From<String> for ClusterScanCursor {
    fn from(cursor: String) -> Self {
        Self::new(cursor)
    }
}

/// Scan progress on one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NodeProgress {
    pub address: NodeAddress,
    pub cursor: u64,
    pub done: bool,
}

impl NodeProgress {
    fn fresh(address: NodeAddress) -> Self {
        Self {
            address,
            cursor: 0,
            done: false,
        }
    }
}

/// Decoded cursor token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ScanState {
    pub version: u64,
    pub nodes: Vec<NodeProgress>,
}

/// What a cursor string denotes
#[derive(Debug)]
pub(crate) enum CursorState {
    Initial,
    Finished,
    InProgress(ScanState),
}

impl ScanState {
    /// Every current primary at its starting position
    pub fn initial(snapshot: &TopologySnapshot) -> Self {
        Self {
            version: snapshot.version(),
            nodes: snapshot
                .primaries()
                .into_iter()
                .map(NodeProgress::fresh)
                .collect(),
        }
    }

    pub fn parse(cursor: &str) -> Result<CursorState> {
        match cursor {
            INITIAL_CURSOR => Ok(CursorState::Initial),
            FINISHED_CURSOR => Ok(CursorState::Finished),
            token => Self::decode(token).map(CursorState::InProgress),
        }
    }

    fn decode(token: &str) -> Result<Self> {
        let payload = token
            .strip_prefix(TOKEN_PREFIX)
            .ok_or_else(|| GlideError::InvalidCursor(token.to_string()))?;
        let json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|e| GlideError::InvalidCursor(format!("{}: {}", token, e)))?;
        serde_json::from_slice(&json)
            .map_err(|e| GlideError::InvalidCursor(format!("{}: {}", token, e)))
    }

    pub fn encode(&self) -> Result<String> {
        let json = serde_json::to_vec(self)?;
        Ok(format!("{}{}", TOKEN_PREFIX, URL_SAFE_NO_PAD.encode(json)))
    }

    /// Align the node set with the current topology.
    ///
    /// Nodes that are no longer primaries are dropped. When the topology
    /// version moved, new primaries join at their starting position.
    pub fn reconcile(&mut self, snapshot: &TopologySnapshot) {
        self.nodes.retain(|n| snapshot.is_primary(&n.address));

        if self.version != snapshot.version() {
            for primary in snapshot.primaries() {
                if !self.nodes.iter().any(|n| n.address == primary) {
                    self.nodes.push(NodeProgress::fresh(primary));
                }
            }
            self.version = snapshot.version();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.nodes.iter().all(|n| n.done)
    }
}
