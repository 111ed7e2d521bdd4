//! Vector Module
//!
//! Embedding table loading, dimensionality reduction and neighbor search.

mod index;
mod pca;
mod search;
mod similarity;
mod table;

pub use index::{EmbeddingIndex, IndexInfo, Neighbor, NeighborResult, Query};
pub use pca::Pca;
pub use search::{ExactSearch, GraphSearch, Hit, NeighborSearch, VectorSpace};
pub use similarity::{cosine_distance, cosine_similarity, dot_product, normalize_vector, normalized};
pub use table::{EmbeddingTable, LoadReport, TableFormat};
