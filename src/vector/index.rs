//! Embedding Index
//!
//! Immutable table + search structure answering neighbor queries.

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::time::Instant;
use tracing::{debug, info};

use super::pca::Pca;
use super::search::{ExactSearch, GraphSearch, Hit, NeighborSearch, VectorSpace};
use super::similarity::{cosine_similarity, normalize_vector, normalized};
use super::table::{EmbeddingTable, LoadReport};
use crate::config::{EmbeddingConfig, NnMethod};
use crate::error::{EmbeddingError, Result};

/// One neighbor in a query result
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub token: String,
    /// Cosine distance to the query, `1 - similarity`
    pub distance: f32,
}

impl Neighbor {
    pub fn similarity(&self) -> f32 {
        1.0 - self.distance
    }
}

/// Ascending distance, ties by token
pub type NeighborResult = Vec<Neighbor>;

/// What a neighbor query is about
#[derive(Debug, Clone, Copy)]
pub enum Query<'a> {
    Token(&'a str),
    Vector(&'a [f32]),
}

impl<'a> From<&'a str> for Query<'a> {
    fn from(token: &'a str) -> Self {
        Query::Token(token)
    }
}

impl<'a> From<&'a String> for Query<'a> {
    fn from(token: &'a String) -> Self {
        Query::Token(token)
    }
}

impl<'a> From<&'a [f32]> for Query<'a> {
    fn from(vector: &'a [f32]) -> Self {
        Query::Vector(vector)
    }
}

impl<'a> From<&'a Vec<f32>> for Query<'a> {
    fn from(vector: &'a Vec<f32>) -> Self {
        Query::Vector(vector)
    }
}

/// Snapshot of what an index was built from
#[derive(Debug, Clone)]
pub struct IndexInfo {
    pub path: PathBuf,
    pub rows: usize,
    /// Dimension of the stored vectors
    pub dim: usize,
    /// Dimension the search structure works in
    pub indexed_dim: usize,
    pub method: NnMethod,
    pub max_neighbors: usize,
    pub skipped_rows: usize,
    pub loaded_at: DateTime<Utc>,
}

/// Read-only nearest-neighbor index over an embedding table
pub struct EmbeddingIndex {
    config: EmbeddingConfig,
    table: EmbeddingTable,
    reducer: Option<Pca>,
    space: VectorSpace,
    search: Box<dyn NeighborSearch>,
    /// Row-major 2-D coordinates for plotting
    plot: Vec<[f32; 2]>,
    report: LoadReport,
    loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for EmbeddingIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingIndex")
            .field("path", &self.config.path)
            .field("rows", &self.table.len())
            .field("dim", &self.table.dim())
            .field("method", &self.search.method())
            .finish()
    }
}

impl EmbeddingIndex {
    /// Load the table named by `config` and build the search structure
    pub fn open(config: EmbeddingConfig) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();
        let (table, report) = EmbeddingTable::load(&config.path, config.limit, config.on_malformed)?;
        let index = Self::build(config, table, report)?;
        info!(
            "Loaded {} vectors ({}d, {} skipped) from {} with {} search in {:?}",
            index.table.len(),
            index.table.dim(),
            index.report.skipped,
            index.config.path.display(),
            index.search.method(),
            start.elapsed()
        );
        Ok(index)
    }

    /// Index an already loaded table
    pub fn from_table(config: EmbeddingConfig, table: EmbeddingTable) -> Result<Self> {
        config.validate()?;
        let report = LoadReport {
            format: super::table::TableFormat::from_path(&config.path),
            header: None,
            rows: table.len(),
            skipped: 0,
        };
        Self::build(config, table, report)
    }

    fn build(config: EmbeddingConfig, table: EmbeddingTable, report: LoadReport) -> Result<Self> {
        let dim = table.dim();
        let reducer = if config.randomized_pca && config.reduced_dims < dim {
            debug!("Reducing {}d vectors to {}d", dim, config.reduced_dims);
            Some(Pca::fit(table.as_flat(), dim, config.reduced_dims, config.seed))
        } else {
            if config.randomized_pca {
                debug!(
                    "Table already has {} <= {} dimensions, skipping reduction",
                    dim, config.reduced_dims
                );
            }
            None
        };

        let (indexed, indexed_dim) = match &reducer {
            Some(pca) => (pca.transform_all(table.as_flat()), pca.n_components()),
            None => (table.as_flat().to_vec(), dim),
        };

        let plot = Pca::fit(&indexed, indexed_dim, 2, config.seed);
        let plot = indexed
            .chunks_exact(indexed_dim)
            .map(|row| {
                let p = plot.transform(row);
                [p[0], p.get(1).copied().unwrap_or(0.0)]
            })
            .collect();

        let space = VectorSpace::new(indexed, indexed_dim);
        let search: Box<dyn NeighborSearch> = match config.nn_method {
            NnMethod::Exact => Box::new(ExactSearch),
            NnMethod::Approximate => {
                let graph = GraphSearch::build(&space, config.graph);
                let params = graph.params();
                debug!(
                    "Built similarity graph over {} rows (m={}, ef_search={})",
                    space.len(),
                    params.m,
                    params.ef_search
                );
                Box::new(graph)
            }
        };

        Ok(Self {
            config,
            table,
            reducer,
            space,
            search,
            plot,
            report,
            loaded_at: Utc::now(),
        })
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn load_report(&self) -> &LoadReport {
        &self.report
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Dimension of stored and query vectors
    pub fn dim(&self) -> usize {
        self.table.dim()
    }

    pub fn max_neighbors(&self) -> usize {
        self.config.max_neighbors
    }

    pub fn method(&self) -> NnMethod {
        self.search.method()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.table.contains(token)
    }

    pub fn tokens(&self) -> &[String] {
        self.table.tokens()
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            path: self.config.path.clone(),
            rows: self.table.len(),
            dim: self.table.dim(),
            indexed_dim: self.space.dim(),
            method: self.search.method(),
            max_neighbors: self.config.max_neighbors,
            skipped_rows: self.report.skipped,
            loaded_at: self.loaded_at,
        }
    }

    /// Stored vector of `token`
    pub fn vector_of(&self, token: &str) -> Result<&[f32]> {
        self.table
            .get(token)
            .ok_or_else(|| EmbeddingError::UnknownToken(token.to_string()))
    }

    /// 2-D PCA coordinates of `token`
    pub fn projection_of(&self, token: &str) -> Result<[f32; 2]> {
        let id = self.id_of(token)?;
        Ok(self.plot[id as usize])
    }

    /// Cosine similarity between two tokens
    pub fn similarity(&self, a: &str, b: &str) -> Result<f32> {
        Ok(cosine_similarity(self.vector_of(a)?, self.vector_of(b)?))
    }

    /// Cosine similarity of `vector` against each of `tokens`
    pub fn similarities(&self, vector: &[f32], tokens: &[&str]) -> Result<Vec<f32>> {
        self.check_vector(vector)?;
        tokens
            .iter()
            .map(|t| self.vector_of(t).map(|v| cosine_similarity(vector, v)))
            .collect()
    }

    /// Up to `min(k, max_neighbors)` nearest tokens.
    ///
    /// A token query never returns the token itself.
    pub fn nearest_neighbors<'q>(&self, query: impl Into<Query<'q>>, k: usize) -> Result<NeighborResult> {
        let k = self.clamp_k(k)?;
        match query.into() {
            Query::Token(token) => {
                let id = self.id_of(token)?;
                Ok(self.rank(self.space.row(id), k, &[id]))
            }
            Query::Vector(vector) => {
                let probe = self.probe(vector)?;
                Ok(self.rank(&probe, k, &[]))
            }
        }
    }

    /// Neighbors of `unit(b) - unit(a) + unit(c)`, excluding `a`, `b` and `c`
    pub fn analogy(&self, a: &str, b: &str, c: &str, k: usize) -> Result<NeighborResult> {
        let k = self.clamp_k(k)?;
        let ids = [self.id_of(a)?, self.id_of(b)?, self.id_of(c)?];

        let mut composite = vec![0.0f32; self.dim()];
        for (id, sign) in ids.iter().zip([-1.0f32, 1.0, 1.0]) {
            let unit = normalized(self.table.vector(*id));
            for (acc, x) in composite.iter_mut().zip(&unit) {
                *acc += sign * x;
            }
        }

        let mut exclude = ids.to_vec();
        exclude.sort_unstable();
        exclude.dedup();
        let probe = self.probe(&composite)?;
        Ok(self.rank(&probe, k, &exclude))
    }

    fn id_of(&self, token: &str) -> Result<u32> {
        self.table
            .id_of(token)
            .ok_or_else(|| EmbeddingError::UnknownToken(token.to_string()))
    }

    fn check_vector(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dim() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dim(),
                actual: vector.len(),
            });
        }
        match vector.iter().position(|x| !x.is_finite()) {
            Some(pos) => Err(EmbeddingError::NonFiniteVector(pos)),
            None => Ok(()),
        }
    }

    fn clamp_k(&self, k: usize) -> Result<usize> {
        if k == 0 {
            return Err(EmbeddingError::InvalidNeighborCount(k));
        }
        if k > self.config.max_neighbors {
            debug!("Capping neighbor count {} to {}", k, self.config.max_neighbors);
        }
        Ok(k.min(self.config.max_neighbors))
    }

    /// Raw vector mapped into the indexed space and normalized
    fn probe(&self, vector: &[f32]) -> Result<Vec<f32>> {
        self.check_vector(vector)?;
        let mut probe = match &self.reducer {
            Some(pca) => pca.transform(vector),
            None => vector.to_vec(),
        };
        normalize_vector(&mut probe);
        Ok(probe)
    }

    fn rank(&self, probe: &[f32], k: usize, exclude: &[u32]) -> NeighborResult {
        let hits = self
            .search
            .search(&self.space, self.table.tokens(), probe, k, exclude);
        hits.into_iter()
            .map(|Hit { id, distance }| Neighbor {
                token: self.table.token(id).to_string(),
                distance,
            })
            .collect()
    }
}
