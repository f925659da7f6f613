//! Vector store seam with in-memory and `SQLite` implementations.

mod memory;
mod sqlite;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("vector store call timed out")]
    Timeout,
    #[error("vector store unavailable: {0}")]
    Unavailable(String),
    #[error("vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("vector store sqlite error: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("vector store serialization error: {0}")]
    Serialization(String),
    #[error("lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),
}

impl StoreError {
    /// Timeouts, outages and a busy or locked database are worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Unavailable(_) => true,
            Self::Sqlite(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
                sqlx::Error::Database(db) => {
                    matches!(db.code().as_deref(), Some("5" | "6"))
                }
                _ => false,
            },
            Self::DimensionMismatch { .. } | Self::Serialization(_) | Self::Lexical(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredVectorPoint {
    pub id: String,
    pub score: f32,
}

/// Point ids a vector query may return. The default allows every point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VectorFilter {
    allowed: Option<HashSet<String>>,
}

impl VectorFilter {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn only(ids: HashSet<String>) -> Self {
        Self { allowed: Some(ids) }
    }

    #[must_use]
    pub fn allows(&self, id: &str) -> bool {
        self.allowed.as_ref().is_none_or(|ids| ids.contains(id))
    }

    /// True when no point can pass.
    #[must_use]
    pub fn rejects_all(&self) -> bool {
        self.allowed.as_ref().is_some_and(HashSet::is_empty)
    }
}

pub trait VectorStore: Send + Sync {
    /// Insert or replace points by id.
    fn upsert(&self, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Delete points; unknown ids are ignored.
    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Nearest points `filter` allows, by cosine similarity, best first.
    /// Disallowed points are skipped before ranking.
    fn query_vector(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, StoreError>>;

    /// The subset of `ids` present in the store.
    fn contains(&self, ids: Vec<String>) -> BoxFuture<'_, Result<HashSet<String>, StoreError>>;

    fn count(&self) -> BoxFuture<'_, Result<usize, StoreError>>;
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sort scored points best first with id as tie-breaker, then truncate.
pub(crate) fn rank(mut scored: Vec<ScoredVectorPoint>, top_k: usize) -> Vec<ScoredVectorPoint> {
    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(top_k);
    scored
}
