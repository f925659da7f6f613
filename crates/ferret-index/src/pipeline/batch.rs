//! Run-scoped dedup: which hashes still need embedding and who waits on them.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;

use crate::chunker::Chunk;
use crate::context::embedding_text;
use crate::snapshot::IndexSnapshot;

/// One unique hash to embed and upsert.
#[derive(Debug, Clone)]
pub(crate) struct EmbedItem {
    pub hash: String,
    pub text: String,
    pub payload: HashMap<String, Value>,
}

impl EmbedItem {
    pub(crate) fn from_chunk(chunk: &Chunk) -> Self {
        let payload = HashMap::from([
            ("content_hash".to_string(), Value::from(chunk.content_hash.clone())),
            ("language".to_string(), Value::from(chunk.language.id())),
            ("kind".to_string(), Value::from(chunk.kind.clone())),
        ]);
        Self {
            hash: chunk.content_hash.clone(),
            text: embedding_text(chunk),
            payload,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Resolution {
    /// Already embedded in an earlier run.
    Resolved,
    /// Queued or in flight; `first` is true for the request that queued it.
    Waiting { first: bool },
    /// Failed permanently earlier in this run.
    Failed(String),
}

/// Tracks pending hashes and the file slots waiting on each.
#[derive(Debug)]
pub(crate) struct DedupTracker {
    max_batch: usize,
    queued: VecDeque<EmbedItem>,
    waiters: HashMap<String, Vec<usize>>,
    failed: HashMap<String, String>,
}

impl DedupTracker {
    pub(crate) fn new(max_batch: usize) -> Self {
        Self {
            max_batch: max_batch.max(1),
            queued: VecDeque::new(),
            waiters: HashMap::new(),
            failed: HashMap::new(),
        }
    }

    /// Resolve `chunk` for the file in `slot`, queueing it when unseen.
    pub(crate) fn request(
        &mut self,
        chunk: &Chunk,
        slot: usize,
        snapshot: &IndexSnapshot,
    ) -> Resolution {
        let hash = &chunk.content_hash;
        if snapshot.resolve(hash).is_some() {
            return Resolution::Resolved;
        }
        if let Some(reason) = self.failed.get(hash) {
            return Resolution::Failed(reason.clone());
        }
        if let Some(slots) = self.waiters.get_mut(hash) {
            if !slots.contains(&slot) {
                slots.push(slot);
            }
            return Resolution::Waiting { first: false };
        }
        self.waiters.insert(hash.clone(), vec![slot]);
        self.queued.push_back(EmbedItem::from_chunk(chunk));
        Resolution::Waiting { first: true }
    }

    /// Next batch of up to `max_batch` items. A short batch is only released
    /// when `allow_partial` is set.
    pub(crate) fn next_batch(&mut self, allow_partial: bool) -> Option<Vec<EmbedItem>> {
        if self.queued.is_empty() || (!allow_partial && self.queued.len() < self.max_batch) {
            return None;
        }
        let n = self.queued.len().min(self.max_batch);
        Some(self.queued.drain(..n).collect())
    }

    #[cfg(test)]
    pub(crate) fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// Hash embedded and stored; returns the waiting slots.
    pub(crate) fn complete(&mut self, hash: &str) -> Vec<usize> {
        self.waiters.remove(hash).unwrap_or_default()
    }

    /// Hash failed permanently; later requests fail fast. Returns the waiting slots.
    pub(crate) fn fail(&mut self, hash: &str, reason: &str) -> Vec<usize> {
        self.failed.insert(hash.to_string(), reason.to_string());
        self.waiters.remove(hash).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::chunker::chunk;
    use crate::config::ChunkerConfig;
    use crate::languages::Lang;
    use crate::snapshot::vector_id;

    fn one(src: &str, path: &str) -> Chunk {
        chunk(src, Lang::Rust, path, &ChunkerConfig::default()).remove(0)
    }

    #[test]
    fn shared_hash_queued_once() {
        let snap = IndexSnapshot::default();
        let mut t = DedupTracker::new(8);
        let a = one("fn same() {}\n", "a.rs");
        let b = one("fn same() {}\n", "b.rs");
        assert_eq!(t.request(&a, 0, &snap), Resolution::Waiting { first: true });
        assert_eq!(t.request(&b, 1, &snap), Resolution::Waiting { first: false });
        assert_eq!(t.queued_len(), 1);
        assert_eq!(t.complete(&a.content_hash), vec![0, 1]);
    }

    #[test]
    fn snapshot_hit_is_resolved() {
        let c = one("fn known() {}\n", "a.rs");
        let snap = IndexSnapshot::new(
            Vec::new(),
            HashMap::from([(c.content_hash.clone(), vector_id(&c.content_hash))]),
        );
        let mut t = DedupTracker::new(8);
        assert_eq!(t.request(&c, 0, &snap), Resolution::Resolved);
        assert_eq!(t.queued_len(), 0);
    }

    #[test]
    fn partial_batches_wait_unless_allowed() {
        let snap = IndexSnapshot::default();
        let mut t = DedupTracker::new(2);
        t.request(&one("fn a() {}\n", "a.rs"), 0, &snap);
        assert!(t.next_batch(false).is_none());
        t.request(&one("fn b() {}\n", "a.rs"), 0, &snap);
        t.request(&one("fn c() {}\n", "a.rs"), 0, &snap);
        assert_eq!(t.next_batch(false).map(|b| b.len()), Some(2));
        assert!(t.next_batch(false).is_none());
        assert_eq!(t.next_batch(true).map(|b| b.len()), Some(1));
        assert!(t.next_batch(true).is_none());
    }

    #[test]
    fn failed_hash_fails_fast() {
        let snap = IndexSnapshot::default();
        let mut t = DedupTracker::new(4);
        let c = one("fn broken() {}\n", "a.rs");
        t.request(&c, 0, &snap);
        assert_eq!(t.fail(&c.content_hash, "rejected"), vec![0]);
        assert_eq!(
            t.request(&c, 3, &snap),
            Resolution::Failed("rejected".to_string())
        );
    }

    #[test]
    fn embed_item_carries_payload() {
        let c = one("fn p() {}\n", "a.rs");
        let item = EmbedItem::from_chunk(&c);
        assert_eq!(item.hash, c.content_hash);
        assert_eq!(item.payload["language"], Value::from("rust"));
        assert!(item.text.contains("fn p()"));
    }
}
