//! Query Service
//!
//! Atomic snapshot swapping for reloads, and an async facade that runs
//! queries on blocking workers under a concurrency limit.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::config::EmbeddingConfig;
use crate::error::{EmbeddingError, Result};
use crate::metrics::QueryMetrics;
use crate::vector::{EmbeddingIndex, IndexInfo, NeighborResult};

/// Holder of the current index snapshot.
///
/// Queries take an `Arc` to the snapshot and never block a reload; a
/// reload builds the replacement completely before swapping it in.
#[derive(Debug)]
pub struct SharedIndex {
    current: RwLock<Arc<EmbeddingIndex>>,
    generation: AtomicU64,
}

impl SharedIndex {
    pub fn new(index: EmbeddingIndex) -> Self {
        Self {
            current: RwLock::new(Arc::new(index)),
            generation: AtomicU64::new(0),
        }
    }

    /// Open the table named by `config`
    pub fn load(config: EmbeddingConfig) -> Result<Self> {
        Ok(Self::new(EmbeddingIndex::open(config)?))
    }

    /// The index queries should run against
    pub fn snapshot(&self) -> Arc<EmbeddingIndex> {
        self.current.read().clone()
    }

    /// Number of completed reloads
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Rebuild from the current configuration
    pub fn reload(&self) -> Result<IndexInfo> {
        let config = self.snapshot().config().clone();
        self.reload_with(config)
    }

    /// Rebuild from `config`. On failure the current snapshot stays.
    pub fn reload_with(&self, config: EmbeddingConfig) -> Result<IndexInfo> {
        let fresh = match EmbeddingIndex::open(config) {
            Ok(index) => Arc::new(index),
            Err(e) => {
                warn!("Reload failed, keeping current index: {}", e);
                return Err(e);
            }
        };
        let info = fresh.info();
        self.swap(fresh);
        Ok(info)
    }

    /// Install an already built index
    pub fn replace(&self, index: EmbeddingIndex) {
        self.swap(Arc::new(index));
    }

    fn swap(&self, fresh: Arc<EmbeddingIndex>) {
        let previous = std::mem::replace(&mut *self.current.write(), fresh);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Index generation {} installed ({} rows replaced)",
            generation,
            previous.len()
        );
    }
}

/// Async query front end with bounded concurrency
#[derive(Clone)]
pub struct QueryService {
    index: Arc<SharedIndex>,
    permits: Arc<Semaphore>,
    metrics: Arc<QueryMetrics>,
    log_queries: bool,
}

impl QueryService {
    pub fn new(index: Arc<SharedIndex>, concurrency: usize) -> Self {
        Self {
            index,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            metrics: Arc::new(QueryMetrics::new()),
            log_queries: false,
        }
    }

    /// Log every query at info level
    pub fn with_query_log(mut self, enabled: bool) -> Self {
        self.log_queries = enabled;
        self
    }

    pub fn index(&self) -> &Arc<SharedIndex> {
        &self.index
    }

    pub fn metrics(&self) -> &QueryMetrics {
        &self.metrics
    }

    /// Queries that can start right now
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub async fn vector_of(&self, token: String) -> Result<Vec<f32>> {
        self.run("vector", token.clone(), move |index| {
            index.vector_of(&token).map(|v| v.to_vec())
        })
        .await
    }

    pub async fn nearest_neighbors(&self, token: String, k: usize) -> Result<NeighborResult> {
        self.run("neighbors", format!("{} k={}", token, k), move |index| {
            index.nearest_neighbors(token.as_str(), k)
        })
        .await
    }

    pub async fn nearest_to_vector(&self, vector: Vec<f32>, k: usize) -> Result<NeighborResult> {
        self.run("neighbors_vector", format!("<{}d> k={}", vector.len(), k), move |index| {
            index.nearest_neighbors(&vector, k)
        })
        .await
    }

    pub async fn analogy(&self, a: String, b: String, c: String, k: usize) -> Result<NeighborResult> {
        let describe = format!("{} : {} :: {} : ? k={}", a, b, c, k);
        self.run("analogy", describe, move |index| index.analogy(&a, &b, &c, k))
            .await
    }

    pub async fn similarity(&self, a: String, b: String) -> Result<f32> {
        let describe = format!("{} ~ {}", a, b);
        self.run("similarity", describe, move |index| index.similarity(&a, &b))
            .await
    }

    /// Reload on a blocking worker; queries keep running meanwhile
    pub async fn reload(&self) -> Result<IndexInfo> {
        let shared = self.index.clone();
        tokio::task::spawn_blocking(move || shared.reload())
            .await
            .map_err(|e| EmbeddingError::TaskFailed(e.to_string()))?
    }

    async fn run<T, F>(&self, operation: &'static str, describe: String, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&EmbeddingIndex) -> Result<T> + Send + 'static,
    {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EmbeddingError::TaskFailed(e.to_string()))?;

        let snapshot = self.index.snapshot();
        let start = Instant::now();
        // The permit lives as long as the query, even if this future is dropped
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            query(&*snapshot)
        })
            .await
            .map_err(|e| EmbeddingError::TaskFailed(e.to_string()))
            .and_then(|r| r);
        let elapsed = start.elapsed();

        self.metrics.record(operation, elapsed, result.is_ok());
        if self.log_queries {
            match &result {
                Ok(_) => info!(target: "edia::queries", "{} {} ({:?})", operation, describe, elapsed),
                Err(e) => info!(target: "edia::queries", "{} {} failed: {}", operation, describe, e),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::EmbeddingTable;
    use std::time::Duration;

    fn index_of(rows: Vec<(&str, Vec<f32>)>) -> EmbeddingIndex {
        let table = EmbeddingTable::from_rows(rows).unwrap();
        EmbeddingIndex::from_table(EmbeddingConfig::new("mem.vec"), table).unwrap()
    }

    fn pets() -> EmbeddingIndex {
        index_of(vec![
            ("cat", vec![1.0, 0.0]),
            ("dog", vec![0.9, 0.1]),
            ("car", vec![0.0, 1.0]),
        ])
    }

    #[test]
    fn test_replace_keeps_old_snapshot_alive() {
        let shared = SharedIndex::new(pets());
        let before = shared.snapshot();
        assert_eq!(shared.generation(), 0);

        shared.replace(index_of(vec![("sol", vec![1.0, 0.0]), ("luna", vec![0.0, 1.0])]));

        assert_eq!(shared.generation(), 1);
        assert_eq!(before.nearest_neighbors("cat", 1).unwrap()[0].token, "dog");
        let after = shared.snapshot();
        assert!(!after.contains("cat"));
        assert_eq!(after.nearest_neighbors("sol", 1).unwrap()[0].token, "luna");
    }

    #[test]
    fn test_failed_reload_keeps_current() {
        let shared = SharedIndex::new(pets());
        let missing = EmbeddingConfig::new("/nonexistent/table.vec");
        assert!(matches!(shared.reload_with(missing), Err(EmbeddingError::Io(_))));
        assert_eq!(shared.generation(), 0);
        assert!(shared.snapshot().contains("cat"));
    }

    #[tokio::test]
    async fn test_service_queries_and_metrics() {
        let service = QueryService::new(Arc::new(SharedIndex::new(pets())), 2);

        let result = service.nearest_neighbors("cat".into(), 1).await.unwrap();
        assert_eq!(result[0].token, "dog");

        let err = service.nearest_neighbors("bird".into(), 1).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::UnknownToken(_)));

        let v = service.vector_of("car".into()).await.unwrap();
        assert_eq!(v, vec![0.0, 1.0]);

        let near = service.nearest_to_vector(vec![0.0, 2.0], 1).await.unwrap();
        assert_eq!(near[0].token, "car");

        let metrics = service.metrics();
        assert_eq!(metrics.total_queries(), 4);
        assert_eq!(metrics.failed_queries(), 1);
        assert_eq!(metrics.operation("neighbors").failed, 1);
        assert_eq!(service.available_permits(), 2);
    }

    #[tokio::test]
    async fn test_dropped_query_holds_permit_until_done() {
        let service = QueryService::new(Arc::new(SharedIndex::new(pets())), 1);
        let (release, wait) = std::sync::mpsc::channel::<()>();

        let slow = service.run("slow", "slow".into(), move |_| {
            let _ = wait.recv();
            Ok(())
        });
        let dropped = tokio::time::timeout(Duration::from_millis(50), slow).await;
        assert!(dropped.is_err());
        assert_eq!(service.available_permits(), 0);

        release.send(()).unwrap();
        for _ in 0..200 {
            if service.available_permits() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.available_permits(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_queries_match_sequential() {
        let rows: Vec<(String, Vec<f32>)> = (0..200)
            .map(|i| {
                let a = i as f32 * 0.031;
                (format!("w{:03}", i), vec![a.cos(), a.sin(), (a * 3.0).cos()])
            })
            .collect();
        let table = EmbeddingTable::from_rows(rows).unwrap();
        let index = EmbeddingIndex::from_table(EmbeddingConfig::new("mem.vec"), table).unwrap();
        let expected: Vec<NeighborResult> = (0..50)
            .map(|i| index.nearest_neighbors(format!("w{:03}", i).as_str(), 5).unwrap())
            .collect();

        let service = QueryService::new(Arc::new(SharedIndex::new(index)), 8);
        let pending = (0..50).map(|i| service.nearest_neighbors(format!("w{:03}", i), 5));
        let results = futures::future::join_all(pending).await;

        for (got, want) in results.into_iter().zip(expected) {
            assert_eq!(got.unwrap(), want);
        }
    }
}
