mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use crate::classify::TestClassifier;
use crate::walker::build_overrides;

/// Configuration loading and validation failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("invalid glob {pattern:?}: {reason}")]
    Glob { pattern: String, reason: String },

    #[error("glob {0:?} is both included and excluded")]
    ConflictingGlob(String),
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str::<Self>(&content)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Check numeric ranges and patterns before any work starts.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.chunker;
        if c.chunk_size_chars == 0 {
            return Err(invalid("chunker.chunk_size_chars", "must be greater than 0"));
        }
        if c.chunk_overlap_chars >= c.chunk_size_chars {
            return Err(invalid(
                "chunker.chunk_overlap_chars",
                format!(
                    "{} must be smaller than chunk_size_chars ({})",
                    c.chunk_overlap_chars, c.chunk_size_chars
                ),
            ));
        }
        if c.min_declaration_lines == 0 {
            return Err(invalid("chunker.min_declaration_lines", "must be at least 1"));
        }
        if c.declaration_batch_threshold_lines == 0 {
            return Err(invalid(
                "chunker.declaration_batch_threshold_lines",
                "must be at least 1",
            ));
        }

        let p = &self.pipeline;
        if p.embed_concurrency == 0 {
            return Err(invalid("pipeline.embed_concurrency", "must be at least 1"));
        }
        if p.upsert_concurrency == 0 {
            return Err(invalid("pipeline.upsert_concurrency", "must be at least 1"));
        }
        if p.queue_capacity == 0 {
            return Err(invalid("pipeline.queue_capacity", "must be at least 1"));
        }
        if p.max_attempts == 0 {
            return Err(invalid("pipeline.max_attempts", "must be at least 1"));
        }
        if p.base_backoff_ms > p.max_backoff_ms {
            return Err(invalid(
                "pipeline.base_backoff_ms",
                "must not exceed max_backoff_ms",
            ));
        }
        if p.call_timeout_secs == 0 {
            return Err(invalid("pipeline.call_timeout_secs", "must be greater than 0"));
        }

        let r = &self.retrieval;
        if !r.rrf_k.is_finite() || r.rrf_k <= 0.0 {
            return Err(invalid("retrieval.rrf_k", "must be a positive number"));
        }
        for (field, w) in [
            ("retrieval.lexical_weight", r.lexical_weight),
            ("retrieval.vector_weight", r.vector_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                return Err(invalid(field, "must be a non-negative number"));
            }
        }
        if r.lexical_weight <= 0.0 && r.vector_weight <= 0.0 {
            return Err(invalid("retrieval", "at least one list weight must be positive"));
        }
        if !r.symbol_boost.is_finite() || r.symbol_boost < 0.0 {
            return Err(invalid("retrieval.symbol_boost", "must be a non-negative number"));
        }
        if r.candidate_multiplier == 0 {
            return Err(invalid("retrieval.candidate_multiplier", "must be at least 1"));
        }
        if r.query_timeout_ms == 0 {
            return Err(invalid("retrieval.query_timeout_ms", "must be greater than 0"));
        }

        if self.embedding.dimensions == 0 {
            return Err(invalid("embedding.dimensions", "must be greater than 0"));
        }
        if self.embedding.max_batch_size == 0 {
            return Err(invalid("embedding.max_batch_size", "must be at least 1"));
        }
        if self.walker.max_file_bytes == 0 {
            return Err(invalid("walker.max_file_bytes", "must be greater than 0"));
        }

        for pattern in &self.walker.include {
            if self
                .walker
                .exclude
                .iter()
                .any(|e| e.trim() == pattern.trim())
            {
                return Err(ConfigError::ConflictingGlob(pattern.clone()));
            }
        }
        build_overrides(Path::new("."), &self.walker)?;
        TestClassifier::new(&self.tests)?;

        Ok(())
    }
}
