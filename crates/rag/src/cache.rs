//! Content-addressed embedding cache with per-key single-flight.
//!
//! The cache is authoritative: a fresh entry short-circuits the provider
//! entirely. Concurrent misses for the same key coalesce onto one provider
//! call; the losers await the winner's result.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::OnceCell;

use incident_core::{Embedder, Result};

#[derive(Clone)]
struct CacheEntry {
    vector: Vec<f32>,
    inserted: Instant,
}

/// Hit/miss counters, cheap enough to keep always-on.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

/// Caching wrapper around any [`Embedder`].
///
/// Keys are derived from the normalised text plus the inner model id, so two
/// models never share vectors.
pub struct CachedEmbedder {
    inner: Arc<dyn Embedder>,
    ttl: Duration,
    entries: DashMap<u64, CacheEntry>,
    inflight: DashMap<u64, Arc<OnceCell<Vec<f32>>>>,
    stats: CacheStats,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
            inflight: DashMap::new(),
            stats: CacheStats::default(),
        }
    }

    fn key(&self, text: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.inner.model_id().hash(&mut hasher);
        text.trim().to_lowercase().hash(&mut hasher);
        hasher.finish()
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn lookup(&self, key: u64) -> Option<Vec<f32>> {
        let entry = self.entries.get(&key)?;
        if entry.inserted.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(&key);
            return None;
        }
        Some(entry.vector.clone())
    }
}

#[async_trait]
impl Embedder for CachedEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = self.key(text);

        if let Some(vector) = self.lookup(key) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(vector);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        // Single-flight: all concurrent misses for this key share one cell.
        let cell = self
            .inflight
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let result = cell
            .get_or_try_init(|| async { self.inner.embed(text).await })
            .await
            .map(Clone::clone);

        match result {
            Ok(vector) => {
                self.entries.insert(
                    key,
                    CacheEntry {
                        vector: vector.clone(),
                        inserted: Instant::now(),
                    },
                );
                self.inflight.remove(&key);
                Ok(vector)
            }
            Err(e) => {
                // Drop the poisoned cell so the next caller retries.
                self.inflight.remove(&key);
                Err(e)
            }
        }
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
