//! Key-value backend seam for CA state.
//!
//! The authority stores everything — CA records, join tokens, sessions,
//! seal keys — through this trait so deployments can bring a replicated
//! store. Values are opaque JSON blobs; per-key TTL is the backend's
//! responsibility to enforce.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Storage failure, propagated with context and never retried here.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct BackendError(pub String);

#[async_trait]
pub trait Backend: Send + Sync {
    /// Insert or replace a value. `ttl = None` means no expiry.
    async fn upsert(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError>;

    /// Fetch a value; `None` when absent or expired.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Delete a value; returns whether it was present.
    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError>;

    /// All live values in a bucket, in insertion order.
    async fn list(&self, bucket: &str) -> Result<Vec<Vec<u8>>, BackendError>;
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<DateTime<Utc>>,
    seq: u64,
}

impl Entry {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// In-process backend. The reference deployment for a single proxy
/// process and the workhorse for tests.
pub struct MemoryBackend {
    entries: Mutex<HashMap<(String, String), Entry>>,
    seq: Mutex<u64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            seq: Mutex::new(0),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn upsert(
        &self,
        bucket: &str,
        key: &str,
        value: Vec<u8>,
        ttl: Option<Duration>,
    ) -> Result<(), BackendError> {
        let seq = {
            let mut seq = self.seq.lock().expect("backend seq lock poisoned");
            *seq += 1;
            *seq
        };
        let expires_at = ttl.map(|ttl| Utc::now() + ttl);
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        entries.insert(
            (bucket.to_string(), key.to_string()),
            Entry {
                value,
                expires_at,
                seq,
            },
        );
        Ok(())
    }

    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        let slot = (bucket.to_string(), key.to_string());
        match entries.get(&slot) {
            Some(entry) if entry.expired(now) => {
                entries.remove(&slot);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<bool, BackendError> {
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        Ok(entries
            .remove(&(bucket.to_string(), key.to_string()))
            .is_some())
    }

    async fn list(&self, bucket: &str) -> Result<Vec<Vec<u8>>, BackendError> {
        let now = Utc::now();
        let mut entries = self.entries.lock().expect("backend lock poisoned");
        entries.retain(|_, e| !e.expired(now));
        let mut live: Vec<(&u64, &Vec<u8>)> = entries
            .iter()
            .filter(|((b, _), _)| b == bucket)
            .map(|(_, e)| (&e.seq, &e.value))
            .collect();
        live.sort_by_key(|(seq, _)| **seq);
        Ok(live.into_iter().map(|(_, v)| v.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_get_delete() {
        let bk = MemoryBackend::new();
        bk.upsert("b", "k", b"v".to_vec(), None).await.unwrap();
        assert_eq!(bk.get("b", "k").await.unwrap(), Some(b"v".to_vec()));
        assert!(bk.delete("b", "k").await.unwrap());
        assert_eq!(bk.get("b", "k").await.unwrap(), None);
        assert!(!bk.delete("b", "k").await.unwrap());
    }

    #[tokio::test]
    async fn expired_entries_read_as_absent() {
        let bk = MemoryBackend::new();
        bk.upsert("b", "k", b"v".to_vec(), Some(Duration::seconds(-1)))
            .await
            .unwrap();
        assert_eq!(bk.get("b", "k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn list_preserves_insertion_order_per_bucket() {
        let bk = MemoryBackend::new();
        bk.upsert("b", "one", b"1".to_vec(), None).await.unwrap();
        bk.upsert("b", "two", b"2".to_vec(), None).await.unwrap();
        bk.upsert("other", "x", b"9".to_vec(), None).await.unwrap();
        let values = bk.list("b").await.unwrap();
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[tokio::test]
    async fn upsert_replaces_value() {
        let bk = MemoryBackend::new();
        bk.upsert("b", "k", b"old".to_vec(), None).await.unwrap();
        bk.upsert("b", "k", b"new".to_vec(), None).await.unwrap();
        assert_eq!(bk.get("b", "k").await.unwrap(), Some(b"new".to_vec()));
    }
}
