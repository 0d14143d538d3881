//! Schema Cache
//!
//! TTL cache in front of any `SchemaProvider`.

use super::{ObjectMetadata, SchemaProvider};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

const CATALOGUE_KEY: &str = "*";

struct CacheEntry {
    fetched_at: Instant,
    objects: Vec<ObjectMetadata>,
}

pub struct CachedSchemaProvider {
    inner: Arc<dyn SchemaProvider>,
    ttl: Duration,
    max_entries: usize,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CachedSchemaProvider {
    pub fn new(inner: Arc<dyn SchemaProvider>, ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner,
            ttl,
            max_entries: max_entries.max(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn invalidate(&self, entity_type: Option<&str>) {
        self.entries.write().await.remove(&cache_key(entity_type));
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Drop expired entries, then the oldest ones until there is room for one more.
    fn evict(&self, entries: &mut HashMap<String, CacheEntry>) {
        let ttl = self.ttl;
        entries.retain(|_, e| e.fetched_at.elapsed() < ttl);
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(key) => {
                    entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

fn cache_key(entity_type: Option<&str>) -> String {
    entity_type
        .map(|t| t.to_lowercase())
        .unwrap_or_else(|| CATALOGUE_KEY.to_string())
}

#[async_trait]
impl SchemaProvider for CachedSchemaProvider {
    async fn schema(&self, entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>> {
        let key = cache_key(entity_type);
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.fetched_at.elapsed() < self.ttl {
                    debug!("Schema cache hit for {}", key);
                    return Ok(entry.objects.clone());
                }
            }
        }

        let objects = self.inner.schema(entity_type).await?;
        let mut entries = self.entries.write().await;
        self.evict(&mut entries);
        entries.insert(
            key,
            CacheEntry {
                fetched_at: Instant::now(),
                objects: objects.clone(),
            },
        );
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl SchemaProvider for CountingProvider {
        async fn schema(&self, entity_type: Option<&str>) -> Result<Vec<ObjectMetadata>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![ObjectMetadata::new(entity_type.unwrap_or("Account"))])
        }
    }

    #[tokio::test]
    async fn test_hits_are_served_from_cache() {
        let inner = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let cache = CachedSchemaProvider::new(inner.clone(), Duration::from_secs(60), 10);

        cache.schema(Some("Account")).await.unwrap();
        cache.schema(Some("account")).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        cache.invalidate(Some("ACCOUNT")).await;
        cache.schema(Some("Account")).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_expired_entries_are_refetched() {
        let inner = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let cache = CachedSchemaProvider::new(inner.clone(), Duration::ZERO, 10);

        cache.schema(None).await.unwrap();
        cache.schema(None).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let inner = Arc::new(CountingProvider { calls: AtomicUsize::new(0) });
        let cache = CachedSchemaProvider::new(inner, Duration::from_secs(60), 2);

        for name in ["Account", "Contact", "Lead"] {
            cache.schema(Some(name)).await.unwrap();
        }
        assert_eq!(cache.len().await, 2);
    }
}
