use std::str::FromStr;

use super::Config;

/// Read and parse an environment variable, warning when the value is unusable.
fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    let v = std::env::var(key).ok()?;
    if let Ok(parsed) = v.trim().parse::<T>() {
        Some(parsed)
    } else {
        tracing::warn!("ignoring invalid {key} value: {v}");
        None
    }
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("FERRET_SQLITE_PATH") {
            self.storage.sqlite_path = v;
        }
        if let Some(n) = env_parse::<usize>("FERRET_CHUNK_SIZE") {
            self.chunker.chunk_size_chars = n;
        }
        if let Some(n) = env_parse::<usize>("FERRET_CHUNK_OVERLAP") {
            self.chunker.chunk_overlap_chars = n;
        }
        if let Some(n) = env_parse::<usize>("FERRET_EMBED_CONCURRENCY") {
            self.pipeline.embed_concurrency = n;
        }
        if let Some(n) = env_parse::<usize>("FERRET_UPSERT_CONCURRENCY") {
            self.pipeline.upsert_concurrency = n;
        }
        if let Some(n) = env_parse::<u32>("FERRET_MAX_ATTEMPTS") {
            self.pipeline.max_attempts = n;
        }
        if let Some(secs) = env_parse::<u64>("FERRET_CALL_TIMEOUT_SECS") {
            self.pipeline.call_timeout_secs = secs;
        }
        if let Some(k) = env_parse::<f64>("FERRET_RRF_K") {
            self.retrieval.rrf_k = k;
        }
        if let Some(boost) = env_parse::<f32>("FERRET_SYMBOL_BOOST") {
            self.retrieval.symbol_boost = boost;
        }
        if let Some(ms) = env_parse::<u64>("FERRET_QUERY_TIMEOUT_MS") {
            self.retrieval.query_timeout_ms = ms;
        }
        if let Some(dims) = env_parse::<usize>("FERRET_EMBED_DIMENSIONS") {
            self.embedding.dimensions = dims;
        }
    }
}
