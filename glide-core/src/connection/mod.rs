//! Connection management
//!
//! The transport is pluggable: a [`Connector`] opens [`Connection`]s to a
//! node, and the [`ConnectionManager`] pools one connection per node,
//! performs the handshake and reconnects with backoff.

pub mod backoff;
pub mod manager;
pub mod tcp;

use crate::cluster::NodeAddress;
use crate::error::Result;
use crate::protocol::{Cmd, Value};
use async_trait::async_trait;

pub use backoff::Backoff;
pub use manager::{ConnectionManager, HealthEvent, PooledConnection};
pub use tcp::{RespConnection, TcpConnector};

/// A single connection to one node
///
/// Requests are strictly ordered: the reply to one request is read before
/// the next is written. Error replies are returned as [`Value::Error`].
#[async_trait]
pub trait Connection: Send {
    async fn request(&mut self, cmd: &Cmd) -> Result<Value>;
}

/// Opens connections to nodes
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &NodeAddress) -> Result<Box<dyn Connection>>;
}
