//! # Glide Core
//!
//! Cluster-aware client core for Valkey and Redis-compatible stores
//!
//! ## Features
//!
//! - **Slot routing**: keys are hashed to one of 16384 slots and sent to the owning node
//! - **Redirections**: `MOVED`/`ASK` are followed transparently with a bounded step count
//! - **Topology**: atomic slot-map snapshots, refreshed on redirects, node failure or a timer
//! - **Read policies**: primary, prefer-replica and availability-zone affinity
//! - **Reconnection**: exponential backoff with jitter and per-node health tracking
//! - **Cluster scan**: resumable, versioned cursor that survives resharding
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use glide_core::{ClientConfig, GlideClusterClient, NodeAddress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new(vec![NodeAddress::new("localhost", 7000)]);
//!     let client = GlideClusterClient::new(config).await?;
//!
//!     client.kv().set("user:1", "John Doe").await?;
//!     let value = client.kv().get("user:1").await?;
//!     println!("Value: {:?}", value);
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod cluster;
pub mod config;
pub mod connection;
pub mod error;
pub mod hash;
pub mod kv;
pub mod logger;
pub mod protocol;
pub mod routing;
pub mod scan;

pub use client::{ClusterValue, GlideClient, GlideClusterClient};
pub use cluster::{NodeAddress, NodeHealth, NodeInfo, NodeRole, SlotRange, hash_slot};
pub use config::{
    AdvancedConfig, ClientConfig, Credentials, PeriodicChecks, ReadFrom, ReconnectStrategy,
    TlsConfig,
};
pub use connection::{Connection, Connector, HealthEvent};
pub use error::{GlideError, Result};
pub use hash::HashManager;
pub use kv::KVStore;
pub use protocol::{Cmd, FromValue, ToArg, Value, cmd};
pub use routing::{Keys, RoutingDirective};
pub use scan::{ClusterScanCursor, FINISHED_CURSOR, INITIAL_CURSOR, ObjectType, ScanOptions};
