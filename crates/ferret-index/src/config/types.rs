use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub tests: TestsConfig,
    #[serde(default)]
    pub walker: WalkerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

/// Structural chunker limits. Sizes are in characters, spans in lines.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_chunk_size_chars")]
    pub chunk_size_chars: usize,
    #[serde(default = "default_chunk_overlap_chars")]
    pub chunk_overlap_chars: usize,
    #[serde(default = "default_min_declaration_lines")]
    pub min_declaration_lines: usize,
    #[serde(default = "default_declaration_batch_threshold_lines")]
    pub declaration_batch_threshold_lines: usize,
    #[serde(default = "default_max_comment_lookback_lines")]
    pub max_comment_lookback_lines: usize,
}

fn default_chunk_size_chars() -> usize {
    2500
}

fn default_chunk_overlap_chars() -> usize {
    300
}

fn default_min_declaration_lines() -> usize {
    6
}

fn default_declaration_batch_threshold_lines() -> usize {
    20
}

fn default_max_comment_lookback_lines() -> usize {
    30
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size_chars: default_chunk_size_chars(),
            chunk_overlap_chars: default_chunk_overlap_chars(),
            min_declaration_lines: default_min_declaration_lines(),
            declaration_batch_threshold_lines: default_declaration_batch_threshold_lines(),
            max_comment_lookback_lines: default_max_comment_lookback_lines(),
        }
    }
}

/// Concurrency, retry and backpressure settings for an indexing run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Blocking-pool permits for chunking; 0 means available parallelism.
    #[serde(default)]
    pub parse_concurrency: usize,
    #[serde(default = "default_embed_concurrency")]
    pub embed_concurrency: usize,
    #[serde(default = "default_upsert_concurrency")]
    pub upsert_concurrency: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

fn default_embed_concurrency() -> usize {
    4
}

fn default_upsert_concurrency() -> usize {
    2
}

fn default_queue_capacity() -> usize {
    64
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            parse_concurrency: 0,
            embed_concurrency: default_embed_concurrency(),
            upsert_concurrency: default_upsert_concurrency(),
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

impl PipelineConfig {
    /// Resolved parse permits, substituting available parallelism for 0.
    #[must_use]
    pub fn effective_parse_concurrency(&self) -> usize {
        if self.parse_concurrency > 0 {
            return self.parse_concurrency;
        }
        std::thread::available_parallelism().map_or(4, std::num::NonZeroUsize::get)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    #[serde(default = "default_list_weight")]
    pub lexical_weight: f64,
    #[serde(default = "default_list_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_symbol_boost")]
    pub symbol_boost: f32,
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,
}

fn default_rrf_k() -> f64 {
    60.0
}

fn default_list_weight() -> f64 {
    1.0
}

fn default_symbol_boost() -> f32 {
    2.0
}

fn default_candidate_multiplier() -> usize {
    4
}

fn default_query_timeout_ms() -> u64 {
    2000
}

fn default_top_k() -> usize {
    10
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: default_rrf_k(),
            lexical_weight: default_list_weight(),
            vector_weight: default_list_weight(),
            symbol_boost: default_symbol_boost(),
            candidate_multiplier: default_candidate_multiplier(),
            query_timeout_ms: default_query_timeout_ms(),
            default_top_k: default_top_k(),
        }
    }
}

/// Patterns that mark a path as test code. Matching is case-insensitive.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TestsConfig {
    /// Filename suffixes, e.g. `.spec.ts`.
    #[serde(default = "default_test_extensions")]
    pub extensions: Vec<String>,
    /// Directory names anywhere in the path.
    #[serde(default = "default_test_directories")]
    pub directories: Vec<String>,
    /// Globs matched against the filename only.
    #[serde(default = "default_test_filename_globs")]
    pub filename_globs: Vec<String>,
}

fn default_test_extensions() -> Vec<String> {
    [
        ".spec.js",
        ".spec.ts",
        ".test.js",
        ".test.ts",
        ".test.tsx",
        "_test.go",
        "_tests.rs",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_test_directories() -> Vec<String> {
    [
        "test",
        "tests",
        "unittest",
        "unittests",
        "gtest",
        "googletest",
        "__tests__",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_test_filename_globs() -> Vec<String> {
    ["*_test.*", "*.test.*", "test_*.*", "*_unittest.*", "*.spec.*"]
        .into_iter()
        .map(String::from)
        .collect()
}

impl Default for TestsConfig {
    fn default() -> Self {
        Self {
            extensions: default_test_extensions(),
            directories: default_test_directories(),
            filename_globs: default_test_filename_globs(),
        }
    }
}

/// Filesystem walk settings. Globs use gitignore syntax relative to the root.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WalkerConfig {
    /// When non-empty, only matching paths are indexed.
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default = "default_walker_exclude")]
    pub exclude: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub follow_links: bool,
}

fn default_walker_exclude() -> Vec<String> {
    ["target/", "node_modules/", ".git/", ".ferret/"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

impl Default for WalkerConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: default_walker_exclude(),
            max_file_bytes: default_max_file_bytes(),
            hidden: false,
            follow_links: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

fn default_sqlite_path() -> String {
    ".ferret/index.db".into()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
        }
    }
}

/// Settings for the built-in hashing embedder.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embed_dimensions")]
    pub dimensions: usize,
    #[serde(default = "default_embed_max_batch_size")]
    pub max_batch_size: usize,
}

fn default_embed_dimensions() -> usize {
    384
}

fn default_embed_max_batch_size() -> usize {
    32
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimensions: default_embed_dimensions(),
            max_batch_size: default_embed_max_batch_size(),
        }
    }
}
