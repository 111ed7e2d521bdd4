//! EDIA - Word Embedding Index
//!
//! Loads word2vec-style vector tables and answers exact or approximate
//! nearest-neighbor, analogy and similarity queries for the word and
//! bias explorers.

pub mod config;
pub mod error;
pub mod metrics;
pub mod service;
pub mod vector;

pub use config::{EmbeddingConfig, GraphParams, Language, MalformedPolicy, NnMethod, ToolConfig};
pub use error::{EmbeddingError, Result};
pub use metrics::QueryMetrics;
pub use service::{QueryService, SharedIndex};
pub use vector::{EmbeddingIndex, EmbeddingTable, IndexInfo, LoadReport, Neighbor, NeighborResult, Query};
