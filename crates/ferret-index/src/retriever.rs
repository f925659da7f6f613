//! Hybrid retrieval: lexical and vector candidates fused with Reciprocal Rank Fusion.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::chunker::Chunk;
use crate::config::RetrievalConfig;
use crate::embed::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::languages::Lang;
use crate::lexical::LexicalSearch;
use crate::store::{VectorFilter, VectorStore};

/// Restrictions pushed into both retrieval paths and checked again before fusion.
#[derive(Debug, Clone, Default)]
pub struct SearchFilter {
    pub exclude_tests: bool,
    /// Empty means every language.
    pub languages: Vec<Lang>,
    pub path_prefix: Option<String>,
}

impl SearchFilter {
    /// True when every chunk passes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.exclude_tests && self.languages.is_empty() && self.path_prefix.is_none()
    }

    #[must_use]
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if self.exclude_tests && chunk.is_test {
            return false;
        }
        if !self.languages.is_empty() && !self.languages.contains(&chunk.language) {
            return false;
        }
        self.path_prefix
            .as_deref()
            .is_none_or(|prefix| chunk.file_path.starts_with(prefix))
    }
}

/// One fused hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub chunk_id: String,
    pub score: f64,
    /// 1-based rank in the filtered lexical list.
    pub lexical_rank: Option<usize>,
    /// 1-based rank in the filtered vector list.
    pub vector_rank: Option<usize>,
    pub file_path: String,
    pub line_range: (usize, usize),
    pub language: Lang,
}

/// Fused score and per-list ranks of one id.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedHit {
    pub id: String,
    pub score: f64,
    /// Rank in each input list, in input order.
    pub ranks: Vec<Option<usize>>,
}

impl FusedHit {
    fn best_rank(&self) -> usize {
        self.ranks.iter().flatten().copied().min().unwrap_or(usize::MAX)
    }
}

/// Reciprocal Rank Fusion over weighted ranked lists.
///
/// An id at 1-based rank `r` in a list of weight `w` contributes `w / (k + r)`.
/// Only the first occurrence of an id within a list counts. Output is sorted
/// by score, then best single-list rank, then id.
#[must_use]
pub fn reciprocal_rank_fusion(lists: &[(f64, Vec<String>)], k: f64) -> Vec<FusedHit> {
    let mut hits: HashMap<&str, FusedHit> = HashMap::new();
    for (list_idx, (weight, ids)) in lists.iter().enumerate() {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(id.as_str()) {
                continue;
            }
            let rank = seen.len();
            let hit = hits.entry(id.as_str()).or_insert_with(|| FusedHit {
                id: id.clone(),
                score: 0.0,
                ranks: vec![None; lists.len()],
            });
            #[allow(clippy::cast_precision_loss)]
            let contribution = weight / (k + rank as f64);
            hit.score += contribution;
            hit.ranks[list_idx] = Some(rank);
        }
    }

    let mut fused: Vec<FusedHit> = hits.into_values().collect();
    fused.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.best_rank().cmp(&b.best_rank()))
            .then_with(|| a.id.cmp(&b.id))
    });
    fused
}

/// Runs lexical and vector retrieval concurrently and fuses the results.
pub struct HybridRetriever<P> {
    catalog: Catalog,
    lexical: Arc<dyn LexicalSearch>,
    store: Arc<dyn VectorStore>,
    provider: Arc<P>,
    config: RetrievalConfig,
}

impl<P: EmbeddingProvider> HybridRetriever<P> {
    /// Retriever whose lexical path is the catalog's own term index.
    #[must_use]
    pub fn new(
        catalog: Catalog,
        store: Arc<dyn VectorStore>,
        provider: Arc<P>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            lexical: Arc::new(catalog.clone()),
            catalog,
            store,
            provider,
            config,
        }
    }

    /// Replace the lexical collaborator.
    #[must_use]
    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalSearch>) -> Self {
        self.lexical = lexical;
        self
    }

    /// Top `top_k` chunks for `query`.
    ///
    /// A path that fails or exceeds `query_timeout_ms` is dropped with a
    /// warning and the other path is used alone.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::SearchFailed`] when both paths fail.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> Result<Vec<SearchResult>> {
        if top_k == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let candidates = top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let limit = Duration::from_millis(self.config.query_timeout_ms);

        let (lexical, vector) = tokio::join!(
            bounded(limit, self.lexical_ids(query, candidates, filter)),
            bounded(limit, self.vector_ids(query, candidates, filter)),
        );

        let (lexical, vector) = match (lexical, vector) {
            (Err(lexical), Err(vector)) => {
                return Err(IndexError::SearchFailed { lexical, vector });
            }
            (Ok(l), Err(e)) => {
                tracing::warn!(error = %e, "vector retrieval unavailable, using lexical only");
                (l, Vec::new())
            }
            (Err(e), Ok(v)) => {
                tracing::warn!(error = %e, "lexical retrieval unavailable, using vector only");
                (Vec::new(), v)
            }
            (Ok(l), Ok(v)) => (l, v),
        };

        let results = self.catalog.read(|cat| {
            let keep = |ids: Vec<String>| -> Vec<String> {
                ids.into_iter()
                    .filter(|id| cat.get(id).is_some_and(|c| filter.matches(c)))
                    .collect()
            };
            let lists = [
                (self.config.lexical_weight, keep(lexical)),
                (self.config.vector_weight, keep(vector)),
            ];
            reciprocal_rank_fusion(&lists, self.config.rrf_k)
                .into_iter()
                .filter_map(|hit| {
                    let chunk = cat.get(&hit.id)?;
                    Some(SearchResult {
                        score: hit.score,
                        lexical_rank: hit.ranks[0],
                        vector_rank: hit.ranks[1],
                        file_path: chunk.file_path.clone(),
                        line_range: chunk.line_range,
                        language: chunk.language,
                        chunk_id: hit.id,
                    })
                })
                .take(top_k)
                .collect::<Vec<_>>()
        });

        tracing::debug!(query, results = results.len(), "search finished");
        Ok(results)
    }

    async fn lexical_ids(
        &self,
        query: &str,
        n: usize,
        filter: &SearchFilter,
    ) -> std::result::Result<Vec<String>, String> {
        let hits = self
            .lexical
            .query_lexical(query.to_string(), n, filter.clone())
            .await
            .map_err(|e| e.to_string())?;
        Ok(hits.into_iter().map(|(id, _)| id).collect())
    }

    /// Chunk ids in vector-similarity order. A vector shared by identical
    /// chunks expands to each of them, in id order.
    ///
    /// Vectors are shared across files, so the store is given the ids of
    /// vectors with at least one chunk `filter` accepts.
    async fn vector_ids(
        &self,
        query: &str,
        n: usize,
        filter: &SearchFilter,
    ) -> std::result::Result<Vec<String>, String> {
        let allowed = if filter.is_empty() {
            VectorFilter::any()
        } else {
            VectorFilter::only(self.catalog.read(|cat| cat.vectors_matching(filter)))
        };
        if allowed.rejects_all() {
            return Ok(Vec::new());
        }
        let mut vectors = self
            .provider
            .embed(&[query.to_string()])
            .await
            .map_err(|e| e.to_string())?;
        let Some(vector) = vectors.pop() else {
            return Err("provider returned no query vector".into());
        };
        let points = self
            .store
            .query_vector(vector, n, allowed)
            .await
            .map_err(|e| e.to_string())?;
        Ok(self.catalog.read(|cat| {
            points
                .iter()
                .flat_map(|p| cat.chunks_for_vector(&p.id).map(str::to_string).collect::<Vec<_>>())
                .collect()
        }))
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = std::result::Result<T, String>>,
) -> std::result::Result<T, String> {
    match tokio::time::timeout(limit, fut).await {
        Ok(r) => r,
        Err(_) => Err(format!("timed out after {} ms", limit.as_millis())),
    }
}
