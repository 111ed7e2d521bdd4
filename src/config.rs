//! Tool Configuration
//!
//! Typed form of the tool's TOML configuration file and the validated
//! [`EmbeddingConfig`] handed to the index constructor.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{EmbeddingError, Result};

/// Nearest-neighbor search method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NnMethod {
    /// Brute-force scan over the full table
    #[default]
    #[serde(alias = "sklearn", alias = "brute")]
    Exact,
    /// Navigable similarity graph
    #[serde(alias = "ann", alias = "graph")]
    Approximate,
}

impl fmt::Display for NnMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NnMethod::Exact => write!(f, "exact"),
            NnMethod::Approximate => write!(f, "approximate"),
        }
    }
}

impl FromStr for NnMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exact" | "sklearn" | "brute" => Ok(NnMethod::Exact),
            "approximate" | "ann" | "graph" => Ok(NnMethod::Approximate),
            other => Err(format!("unknown nn method '{}'", other)),
        }
    }
}

/// What the loader does with a row it cannot parse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MalformedPolicy {
    /// Fail the whole load on the first malformed row
    #[default]
    Abort,
    /// Skip the row and count it in the load report
    Skip,
}

/// Interface language, selects the default embedding file.
/// Anything other than `es` uses the English table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(from = "String")]
pub enum Language {
    #[default]
    Es,
    En,
}

impl From<String> for Language {
    fn from(code: String) -> Self {
        if code.trim().eq_ignore_ascii_case("es") {
            Language::Es
        } else {
            Language::En
        }
    }
}

/// Parameters of the approximate search graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GraphParams {
    /// Maximum out-degree per node
    pub m: usize,
    /// Candidate pool size while inserting
    pub ef_construction: usize,
    /// Candidate pool size while querying
    pub ef_search: usize,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            m: 12,
            ef_construction: 48,
            ef_search: 64,
        }
    }
}

/// Validated construction parameters for an [`EmbeddingIndex`](crate::EmbeddingIndex)
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Vector table file (word2vec text, or binary for `.bin`)
    pub path: PathBuf,
    /// Maximum number of rows to load
    pub limit: usize,
    /// Reduce dimensionality with randomized PCA before indexing
    pub randomized_pca: bool,
    /// Target dimensionality when reduction is enabled
    pub reduced_dims: usize,
    /// Upper bound on neighbors returned by one query
    pub max_neighbors: usize,
    pub nn_method: NnMethod,
    pub on_malformed: MalformedPolicy,
    /// Seed for the PCA random start
    pub seed: u64,
    pub graph: GraphParams,
}

impl EmbeddingConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            limit: 100_000,
            randomized_pca: false,
            reduced_dims: 100,
            max_neighbors: 20,
            nn_method: NnMethod::Exact,
            on_malformed: MalformedPolicy::Abort,
            seed: 42,
            graph: GraphParams::default(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_max_neighbors(mut self, max: usize) -> Self {
        self.max_neighbors = max;
        self
    }

    pub fn with_method(mut self, method: NnMethod) -> Self {
        self.nn_method = method;
        self
    }

    pub fn with_reduction(mut self, dims: usize) -> Self {
        self.randomized_pca = true;
        self.reduced_dims = dims;
        self
    }

    pub fn with_malformed_policy(mut self, policy: MalformedPolicy) -> Self {
        self.on_malformed = policy;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_graph(mut self, graph: GraphParams) -> Self {
        self.graph = graph;
        self
    }

    /// Check field ranges
    pub fn validate(&self) -> Result<()> {
        if self.path.as_os_str().is_empty() {
            return Err(EmbeddingError::Config("embeddings path is empty".into()));
        }
        if self.limit == 0 {
            return Err(EmbeddingError::Config("limit must be positive".into()));
        }
        if self.max_neighbors == 0 {
            return Err(EmbeddingError::Config(
                "max_neighbors must be positive".into(),
            ));
        }
        if self.randomized_pca && self.reduced_dims == 0 {
            return Err(EmbeddingError::Config(
                "reduced_dims must be positive".into(),
            ));
        }
        if self.graph.m == 0 || self.graph.ef_construction == 0 || self.graph.ef_search == 0 {
            return Err(EmbeddingError::Config(
                "graph parameters must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InterfaceSection {
    #[serde(default)]
    pub language: Language,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WordExplorerSection {
    /// Relative to `<base>/data_custom/`; empty selects the bundled table
    pub embeddings_path: String,
    pub nn_method: NnMethod,
    pub max_neighbors: usize,
    pub limit: usize,
    pub randomized_pca: bool,
    pub reduced_dims: usize,
    pub on_malformed: MalformedPolicy,
    pub seed: u64,
    pub graph: GraphParams,
}

impl Default for WordExplorerSection {
    fn default() -> Self {
        let defaults = EmbeddingConfig::new("");
        Self {
            embeddings_path: String::new(),
            nn_method: defaults.nn_method,
            max_neighbors: defaults.max_neighbors,
            limit: defaults.limit,
            randomized_pca: defaults.randomized_pca,
            reduced_dims: defaults.reduced_dims,
            on_malformed: defaults.on_malformed,
            seed: defaults.seed,
            graph: defaults.graph,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogsSection {
    /// Log every query at info level
    #[serde(default)]
    pub available_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueSection {
    /// Concurrent queries (0 = number of CPUs)
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_concurrency() -> usize {
    8
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

/// Whole configuration file. Unknown sections are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolConfig {
    #[serde(default)]
    pub interface: InterfaceSection,
    #[serde(default)]
    pub word_explorer: WordExplorerSection,
    #[serde(default)]
    pub logs: LogsSection,
    #[serde(default)]
    pub queue: QueueSection,
}

impl ToolConfig {
    /// Read and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
            .map_err(|e| EmbeddingError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| EmbeddingError::Config(e.to_string()))
    }

    /// Table path, resolved against `base_dir`
    pub fn embeddings_path(&self, base_dir: &Path) -> PathBuf {
        let custom = self.word_explorer.embeddings_path.trim();
        if !custom.is_empty() {
            return base_dir.join("data_custom").join(custom);
        }
        let bundled = match self.interface.language {
            Language::Es => "100k_es_embedding.vec",
            Language::En => "100k_en_embedding.vec",
        };
        base_dir.join("data").join(bundled)
    }

    /// Build and validate the index configuration
    pub fn embedding_config(&self, base_dir: &Path) -> Result<EmbeddingConfig> {
        let section = &self.word_explorer;
        let config = EmbeddingConfig {
            path: self.embeddings_path(base_dir),
            limit: section.limit,
            randomized_pca: section.randomized_pca,
            reduced_dims: section.reduced_dims,
            max_neighbors: section.max_neighbors,
            nn_method: section.nn_method,
            on_malformed: section.on_malformed,
            seed: section.seed,
            graph: section.graph,
        };
        config.validate()?;
        Ok(config)
    }

    /// Query concurrency with `0` resolved to the CPU count
    pub fn concurrency(&self) -> usize {
        match self.queue.concurrency {
            0 => num_cpus::get(),
            n => n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = ToolConfig::from_toml_str("").unwrap();
        assert_eq!(config.interface.language, Language::Es);
        assert_eq!(config.word_explorer.nn_method, NnMethod::Exact);
        assert_eq!(config.word_explorer.limit, 100_000);
        assert_eq!(config.queue.concurrency, 8);
        assert!(!config.logs.available_logs);
    }

    #[test]
    fn test_full_file() {
        let raw = r#"
            [interface]
            language = "en"

            [word_explorer]
            embeddings_path = "glove.vec"
            nn_method = "ann"
            max_neighbors = 30
            limit = 5000
            randomized_pca = true
            reduced_dims = 50
            on_malformed = "skip"

            [word_explorer.graph]
            m = 8

            [data]
            vocabulary_subset = "full"

            [queue]
            concurrency = 0
        "#;
        let config = ToolConfig::from_toml_str(raw).unwrap();
        let base = Path::new("/srv/edia");
        let embedding = config.embedding_config(base).unwrap();

        assert_eq!(embedding.path, PathBuf::from("/srv/edia/data_custom/glove.vec"));
        assert_eq!(embedding.nn_method, NnMethod::Approximate);
        assert_eq!(embedding.max_neighbors, 30);
        assert_eq!(embedding.limit, 5000);
        assert!(embedding.randomized_pca);
        assert_eq!(embedding.reduced_dims, 50);
        assert_eq!(embedding.on_malformed, MalformedPolicy::Skip);
        assert_eq!(embedding.graph.m, 8);
        assert_eq!(embedding.graph.ef_search, GraphParams::default().ef_search);
        assert_eq!(config.concurrency(), num_cpus::get());
    }

    #[test]
    fn test_bundled_path_by_language() {
        let base = Path::new("app");
        let es = ToolConfig::from_toml_str("[interface]\nlanguage = \"es\"").unwrap();
        let en = ToolConfig::from_toml_str("[interface]\nlanguage = \"en\"").unwrap();
        assert_eq!(
            es.embeddings_path(base),
            PathBuf::from("app/data/100k_es_embedding.vec")
        );
        assert_eq!(
            en.embeddings_path(base),
            PathBuf::from("app/data/100k_en_embedding.vec")
        );
    }

    #[test]
    fn test_other_languages_use_english_table() {
        let pt = ToolConfig::from_toml_str("[interface]\nlanguage = \"pt\"").unwrap();
        assert_eq!(pt.interface.language, Language::En);
        assert_eq!(
            pt.embeddings_path(Path::new("app")),
            PathBuf::from("app/data/100k_en_embedding.vec")
        );
        let upper = ToolConfig::from_toml_str("[interface]\nlanguage = \"ES\"").unwrap();
        assert_eq!(upper.interface.language, Language::Es);
    }

    #[test]
    fn test_validation_rejects_zero_limits() {
        let raw = "[word_explorer]\nmax_neighbors = 0";
        let config = ToolConfig::from_toml_str(raw).unwrap();
        assert!(matches!(
            config.embedding_config(Path::new(".")),
            Err(EmbeddingError::Config(_))
        ));

        let config = EmbeddingConfig::new("table.vec").with_limit(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_method_rejected() {
        let raw = "[word_explorer]\nnn_method = \"faiss\"";
        assert!(ToolConfig::from_toml_str(raw).is_err());
        assert!("faiss".parse::<NnMethod>().is_err());
        assert_eq!("ANN".parse::<NnMethod>().unwrap(), NnMethod::Approximate);
    }
}
