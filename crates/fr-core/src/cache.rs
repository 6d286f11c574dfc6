use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use orion_error::compat_prelude::*;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use crate::error::{CoreReason, CoreResult};
use crate::retry::{RetryPolicy, retry};

/// Key/value cache with per-entry time to live. Backing stores are
/// interchangeable.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<()>;
    async fn remove(&self, key: &str) -> CoreResult<()>;
}

pub async fn get_json<T: DeserializeOwned>(cache: &dyn Cache, key: &str) -> CoreResult<Option<T>> {
    match cache.get(key).await? {
        Some(bytes) => Ok(Some(
            serde_json::from_slice(&bytes).owe(CoreReason::DataFormat)?,
        )),
        None => Ok(None),
    }
}

pub async fn set_json<T: Serialize + ?Sized + Sync>(
    cache: &dyn Cache,
    key: &str,
    value: &T,
    ttl: Duration,
) -> CoreResult<()> {
    let bytes = serde_json::to_vec(value).owe(CoreReason::DataFormat)?;
    cache.set(key, bytes, ttl).await
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

/// In-process cache. Expired entries are dropped lazily on read.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        match entries.get(key) {
            Some((_, expires)) if *expires <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((bytes, _)) => Ok(Some(bytes.clone())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<()> {
        let expires = Instant::now() + ttl;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), (value, expires));
        Ok(())
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RetryingCache
// ---------------------------------------------------------------------------

/// Wraps a remote cache with bounded exponential backoff.
pub struct RetryingCache {
    inner: Arc<dyn Cache>,
    policy: RetryPolicy,
}

impl RetryingCache {
    pub fn new(inner: Arc<dyn Cache>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Cache for RetryingCache {
    async fn get(&self, key: &str) -> CoreResult<Option<Vec<u8>>> {
        retry(&self.policy, "cache.get", || self.inner.get(key)).await
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> CoreResult<()> {
        retry(&self.policy, "cache.set", || self.inner.set(key, value.clone(), ttl)).await
    }

    async fn remove(&self, key: &str) -> CoreResult<()> {
        retry(&self.policy, "cache.remove", || self.inner.remove(key)).await
    }
}
