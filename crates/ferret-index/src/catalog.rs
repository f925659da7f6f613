//! In-memory chunk catalog with its colocated lexical index.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

use crate::chunker::Chunk;
use crate::lexical::{LexicalSearch, TermIndex};
use crate::retriever::SearchFilter;
use crate::snapshot::vector_id;
use crate::store::{BoxFuture, StoreError};

const WIDEN_FACTOR: usize = 4;

/// Chunks by id, by file and by vector id, plus their term statistics.
#[derive(Debug, Default)]
pub struct ChunkCatalog {
    chunks: HashMap<String, Chunk>,
    by_file: HashMap<String, Vec<String>>,
    by_vector: HashMap<String, BTreeSet<String>>,
    terms: TermIndex,
}

impl ChunkCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from stored chunks with a single lexical commit.
    ///
    /// # Errors
    ///
    /// Fails when the lexical index rejects a document.
    pub fn from_chunks(chunks: Vec<Chunk>) -> tantivy::Result<Self> {
        let mut by_path: HashMap<String, Vec<Chunk>> = HashMap::new();
        for c in chunks {
            by_path.entry(c.file_path.clone()).or_default().push(c);
        }
        let mut catalog = Self::new();
        for (path, chunks) in by_path {
            catalog.attach(&path, chunks)?;
        }
        catalog.terms.commit()?;
        Ok(catalog)
    }

    /// Swap in a file's chunks. A repeated id within the file keeps its first chunk.
    ///
    /// The chunk maps are updated even when the lexical index fails.
    ///
    /// # Errors
    ///
    /// Fails when the lexical index cannot stage or commit the change.
    pub fn replace_file(&mut self, path: &str, chunks: Vec<Chunk>) -> tantivy::Result<()> {
        let detached = self.detach(path);
        let attached = self.attach(path, chunks);
        detached?;
        attached?;
        self.terms.commit()
    }

    /// # Errors
    ///
    /// Fails when the lexical index cannot stage or commit the removal.
    pub fn remove_file(&mut self, path: &str) -> tantivy::Result<()> {
        self.detach(path)?;
        self.terms.commit()
    }

    fn attach(&mut self, path: &str, chunks: Vec<Chunk>) -> tantivy::Result<()> {
        let mut ids = Vec::with_capacity(chunks.len());
        let mut staged = Ok(());
        for chunk in chunks {
            if self.chunks.contains_key(&chunk.id) {
                continue;
            }
            let id = chunk.id.clone();
            if staged.is_ok() {
                staged = self.terms.insert(
                    &id,
                    &chunk.content,
                    chunk.symbols.iter().map(|s| s.name.as_str()),
                );
            }
            self.by_vector
                .entry(vector_id(&chunk.content_hash))
                .or_default()
                .insert(id.clone());
            ids.push(id.clone());
            self.chunks.insert(id, chunk);
        }
        self.by_file.insert(path.to_string(), ids);
        staged
    }

    fn detach(&mut self, path: &str) -> tantivy::Result<()> {
        let Some(ids) = self.by_file.remove(path) else {
            return Ok(());
        };
        for id in &ids {
            if let Some(chunk) = self.chunks.remove(id) {
                let vid = vector_id(&chunk.content_hash);
                if let Some(set) = self.by_vector.get_mut(&vid) {
                    set.remove(id);
                    if set.is_empty() {
                        self.by_vector.remove(&vid);
                    }
                }
            }
        }
        for id in &ids {
            self.terms.remove(id)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    /// Chunk ids whose content maps to `vector_id`, in id order.
    pub fn chunks_for_vector(&self, vector_id: &str) -> impl Iterator<Item = &str> {
        self.by_vector
            .get(vector_id)
            .into_iter()
            .flat_map(|set| set.iter().map(String::as_str))
    }

    /// Vector ids with at least one chunk `filter` accepts.
    #[must_use]
    pub fn vectors_matching(&self, filter: &SearchFilter) -> HashSet<String> {
        self.by_vector
            .iter()
            .filter(|(_, ids)| {
                ids.iter()
                    .any(|id| self.chunks.get(id).is_some_and(|c| filter.matches(c)))
            })
            .map(|(vid, _)| vid.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.by_file.len()
    }

    /// Top `top_k` lexical hits among chunks `filter` accepts.
    ///
    /// With a filter the term index is asked for a widening window until
    /// `top_k` hits pass or every match has been seen.
    ///
    /// # Errors
    ///
    /// Fails when the term index cannot be searched.
    pub fn search_terms(
        &self,
        query: &str,
        top_k: usize,
        symbol_boost: f32,
        filter: &SearchFilter,
    ) -> tantivy::Result<Vec<(String, f32)>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let mut window = if filter.is_empty() {
            top_k
        } else {
            top_k.saturating_mul(WIDEN_FACTOR)
        };
        loop {
            let hits = self.terms.search(query, window, symbol_boost)?;
            let exhausted = hits.len() < window;
            let mut kept: Vec<(String, f32)> = hits
                .into_iter()
                .filter(|(id, _)| self.chunks.get(id).is_some_and(|c| filter.matches(c)))
                .collect();
            if kept.len() >= top_k || exhausted || window == usize::MAX {
                kept.truncate(top_k);
                return Ok(kept);
            }
            window = window.saturating_mul(WIDEN_FACTOR);
        }
    }
}

/// Shared handle to the catalog; the pipeline writes, retrieval reads.
#[derive(Debug, Clone)]
pub struct Catalog {
    inner: Arc<RwLock<ChunkCatalog>>,
    symbol_boost: f32,
}

impl Catalog {
    #[must_use]
    pub fn new(catalog: ChunkCatalog, symbol_boost: f32) -> Self {
        Self {
            inner: Arc::new(RwLock::new(catalog)),
            symbol_boost,
        }
    }

    /// Run `f` under the read lock.
    pub fn read<R>(&self, f: impl FnOnce(&ChunkCatalog) -> R) -> R {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    /// Run `f` under the write lock.
    pub fn write<R>(&self, f: impl FnOnce(&mut ChunkCatalog) -> R) -> R {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl LexicalSearch for Catalog {
    fn query_lexical(
        &self,
        text: String,
        top_k: usize,
        filter: SearchFilter,
    ) -> BoxFuture<'_, Result<Vec<(String, f32)>, StoreError>> {
        Box::pin(async move {
            Ok(self.read(|c| c.search_terms(&text, top_k, self.symbol_boost, &filter))?)
        })
    }
}
