use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Time-boxed key/value records keyed by attempt id. Best-effort and
/// non-authoritative: expiry detection always recomputes from the attempt's
/// stored deadline, never from cache state alone.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionCache: Send + Sync {
    async fn set(&self, key: Uuid, value: String, ttl_seconds: u64) -> Result<()>;

    /// `None` for missing or expired records.
    async fn get(&self, key: Uuid) -> Result<Option<String>>;

    async fn delete(&self, key: Uuid) -> Result<()>;
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache. Expired records are pruned lazily on access.
#[derive(Default)]
pub struct MemorySessionCache {
    entries: Mutex<HashMap<Uuid, CacheEntry>>,
}

impl MemorySessionCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionCache for MemorySessionCache {
    async fn set(&self, key: Uuid, value: String, ttl_seconds: u64) -> Result<()> {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + Duration::from_secs(ttl_seconds),
        };
        self.entries
            .lock()
            .map_err(|_| Error::Internal("session cache lock poisoned".into()))?
            .insert(key, entry);
        Ok(())
    }

    async fn get(&self, key: Uuid) -> Result<Option<String>> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| Error::Internal("session cache lock poisoned".into()))?;
        match entries.get(&key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(&key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: Uuid) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| Error::Internal("session cache lock poisoned".into()))?
            .remove(&key);
        Ok(())
    }
}
