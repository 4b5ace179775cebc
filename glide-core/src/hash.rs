//! Hash data structure operations
use crate::client::ClientCore;
use crate::error::Result;
use crate::protocol::{ToArg, cmd};
use std::collections::HashMap;
use std::sync::Arc;

/// Hash data structure interface
///
/// Hash is a field-value map, ideal for storing objects.
#[derive(Clone)]
pub struct HashManager {
    core: Arc<ClientCore>,
}

impl HashManager {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    /// Set fields in a hash, returning how many were added
    pub async fn hset<K, F, V>(&self, key: K, fields: &[(F, V)]) -> Result<i64>
    where
        K: AsRef<str>,
        F: AsRef<str>,
        V: ToArg,
    {
        let mut hset = cmd("HSET").arg(key.as_ref());
        for (field, value) in fields {
            hset.push_arg(field.as_ref());
            hset.push_arg(value);
        }
        self.core.send(&hset).await
    }

    /// Get a field
    pub async fn hget<K, F>(&self, key: K, field: F) -> Result<Option<String>>
    where
        K: AsRef<str>,
        F: AsRef<str>,
    {
        self.core
            .send(&cmd("HGET").arg(key.as_ref()).arg(field.as_ref()))
            .await
    }

    /// Get all fields and values
    pub async fn hgetall<K>(&self, key: K) -> Result<HashMap<String, String>>
    where
        K: AsRef<str>,
    {
        self.core.send(&cmd("HGETALL").arg(key.as_ref())).await
    }

    /// Delete fields, returning how many were removed
    pub async fn hdel<K, F>(&self, key: K, fields: &[F]) -> Result<i64>
    where
        K: AsRef<str>,
        F: AsRef<str>,
    {
        let mut hdel = cmd("HDEL").arg(key.as_ref());
        for field in fields {
            hdel.push_arg(field.as_ref());
        }
        self.core.send(&hdel).await
    }

    /// Number of fields
    pub async fn hlen<K>(&self, key: K) -> Result<i64>
    where
        K: AsRef<str>,
    {
        self.core.send(&cmd("HLEN").arg(key.as_ref())).await
    }
}
