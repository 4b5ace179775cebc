//! Key-value operations

use crate::client::ClientCore;
use crate::error::Result;
use crate::protocol::{ToArg, cmd};
use crate::routing::Keys;
use std::sync::Arc;
use std::time::Duration;

/// Key-value command interface
///
/// Multi-key commands on a cluster client require every key to hash to the
/// same slot (use `{hash tags}`); otherwise they fail with `CrossSlot`
/// before anything is sent.
#[derive(Clone)]
pub struct KVStore {
    core: Arc<ClientCore>,
}

impl KVStore {
    pub(crate) fn new(core: Arc<ClientCore>) -> Self {
        Self { core }
    }

    /// Get a value by key
    ///
    /// Returns `None` if the key doesn't exist or has expired.
    ///
    /// # Example
    /// ```no_run
    /// # use glide_core::{ClientConfig, GlideClusterClient, NodeAddress};
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// # let config = ClientConfig::new(vec![NodeAddress::new("localhost", 7000)]);
    /// # let client = GlideClusterClient::new(config).await?;
    /// client.kv().set("user:1", "John Doe").await?;
    /// let value = client.kv().get("user:1").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn get<K>(&self, key: K) -> Result<Option<String>>
    where
        K: AsRef<str>,
    {
        self.core.send(&cmd("GET").arg(key.as_ref())).await
    }

    /// Set a key-value pair
    pub async fn set<K, V>(&self, key: K, value: V) -> Result<()>
    where
        K: AsRef<str>,
        V: ToArg,
    {
        self.core
            .send(&cmd("SET").arg(key.as_ref()).arg(value))
            .await
    }

    /// Set a key-value pair that expires after `ttl` (millisecond precision)
    pub async fn set_with_ttl<K, V>(&self, key: K, value: V, ttl: Duration) -> Result<()>
    where
        K: AsRef<str>,
        V: ToArg,
    {
        let millis = px_millis(ttl);
        self.core
            .send(
                &cmd("SET")
                    .arg(key.as_ref())
                    .arg(value)
                    .arg("PX")
                    .arg(millis),
            )
            .await
    }

    /// Get several values; missing keys yield `None`
    pub async fn mget(&self, keys: impl Into<Keys>) -> Result<Vec<Option<String>>> {
        let mut mget = cmd("MGET");
        for key in keys.into().into_vec() {
            mget.push_arg(key);
        }
        self.core.send(&mget).await
    }

    /// Set several key-value pairs atomically
    pub async fn mset<K, V>(&self, pairs: &[(K, V)]) -> Result<()>
    where
        K: AsRef<str>,
        V: ToArg,
    {
        let mut mset = cmd("MSET");
        for (key, value) in pairs {
            mset.push_arg(key.as_ref());
            mset.push_arg(value);
        }
        self.core.send(&mset).await
    }

    /// Delete keys, returning how many existed
    pub async fn del(&self, keys: impl Into<Keys>) -> Result<i64> {
        let mut del = cmd("DEL");
        for key in keys.into().into_vec() {
            del.push_arg(key);
        }
        self.core.send(&del).await
    }

    /// Count how many of the keys exist
    pub async fn exists(&self, keys: impl Into<Keys>) -> Result<i64> {
        let mut exists = cmd("EXISTS");
        for key in keys.into().into_vec() {
            exists.push_arg(key);
        }
        self.core.send(&exists).await
    }

    /// Increment a numeric value
    pub async fn incr<K: AsRef<str>>(&self, key: K) -> Result<i64> {
        self.core.send(&cmd("INCR").arg(key.as_ref())).await
    }

    pub async fn incr_by<K: AsRef<str>>(&self, key: K, delta: i64) -> Result<i64> {
        self.core
            .send(&cmd("INCRBY").arg(key.as_ref()).arg(delta))
            .await
    }

    /// Decrement a numeric value
    pub async fn decr<K: AsRef<str>>(&self, key: K) -> Result<i64> {
        self.core.send(&cmd("DECR").arg(key.as_ref())).await
    }

    /// Set a timeout in seconds; `false` if the key doesn't exist
    pub async fn expire<K: AsRef<str>>(&self, key: K, seconds: i64) -> Result<bool> {
        self.core
            .send(&cmd("EXPIRE").arg(key.as_ref()).arg(seconds))
            .await
    }

    /// Set a timeout in milliseconds
    pub async fn pexpire<K: AsRef<str>>(&self, key: K, millis: i64) -> Result<bool> {
        self.core
            .send(&cmd("PEXPIRE").arg(key.as_ref()).arg(millis))
            .await
    }

    /// Remaining time to live in seconds.
    ///
    /// `-1` when the key has no expiry, `-2` when it doesn't exist.
    pub async fn ttl<K: AsRef<str>>(&self, key: K) -> Result<i64> {
        self.core.send(&cmd("TTL").arg(key.as_ref())).await
    }

    /// Remaining time to live in milliseconds
    pub async fn pttl<K: AsRef<str>>(&self, key: K) -> Result<i64> {
        self.core.send(&cmd("PTTL").arg(key.as_ref())).await
    }

    /// Remove the expiry; `false` if there was none
    pub async fn persist<K: AsRef<str>>(&self, key: K) -> Result<bool> {
        self.core.send(&cmd("PERSIST").arg(key.as_ref())).await
    }

    /// Value type name (`string`, `hash`, ... or `none`)
    pub async fn key_type<K: AsRef<str>>(&self, key: K) -> Result<String> {
        self.core.send(&cmd("TYPE").arg(key.as_ref())).await
    }
}

/// `PX` argument for `ttl`: at least one millisecond, saturating at `u64::MAX`
fn px_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_px_millis() {
        assert_eq!(px_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(px_millis(Duration::from_micros(10)), 1);
        assert_eq!(px_millis(Duration::ZERO), 1);
        assert_eq!(px_millis(Duration::MAX), u64::MAX);
    }
}
