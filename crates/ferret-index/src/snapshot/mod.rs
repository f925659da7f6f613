//! Persisted index state and change detection.

mod store;

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

pub use store::{SnapshotStats, SnapshotStore};

use crate::walker::{SourceFile, Walk};

/// Fixed namespace for content-addressed vector ids.
const VECTOR_NAMESPACE: Uuid = Uuid::from_u128(0x6a0e_54c2_9d1b_4f3e_8a77_0c5d_e2f1_b903);

/// Vector-store id for a chunk content hash. Same content, same id.
#[must_use]
pub fn vector_id(content_hash: &str) -> String {
    Uuid::new_v5(&VECTOR_NAMESPACE, content_hash.as_bytes()).to_string()
}

/// What the index knows about one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    /// Chunk content hashes in source order.
    pub chunk_hashes: Vec<String>,
    /// Unix seconds.
    pub indexed_at: i64,
}

/// File records plus the global `content hash -> vector id` dedup table.
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    files: BTreeMap<String, FileRecord>,
    dedup: HashMap<String, String>,
}

impl IndexSnapshot {
    #[must_use]
    pub fn new(files: Vec<FileRecord>, dedup: HashMap<String, String>) -> Self {
        Self {
            files: files.into_iter().map(|r| (r.path.clone(), r)).collect(),
            dedup,
        }
    }

    #[must_use]
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn files(&self) -> impl Iterator<Item = &FileRecord> {
        self.files.values()
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Vector id for an already embedded hash.
    #[must_use]
    pub fn resolve(&self, content_hash: &str) -> Option<&str> {
        self.dedup.get(content_hash).map(String::as_str)
    }

    pub fn dedup_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dedup.iter().map(|(h, v)| (h.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn dedup_len(&self) -> usize {
        self.dedup.len()
    }

    pub fn insert_dedup(&mut self, content_hash: String, vector_id: String) {
        self.dedup.insert(content_hash, vector_id);
    }

    pub fn remove_dedup(&mut self, content_hash: &str) -> Option<String> {
        self.dedup.remove(content_hash)
    }

    pub fn put_file(&mut self, record: FileRecord) -> Option<FileRecord> {
        self.files.insert(record.path.clone(), record)
    }

    pub fn remove_file(&mut self, path: &str) -> Option<FileRecord> {
        self.files.remove(path)
    }

    /// Paths whose records reference a hash missing from the dedup table.
    #[must_use]
    pub fn unresolved_files(&self) -> Vec<String> {
        self.files
            .values()
            .filter(|r| r.chunk_hashes.iter().any(|h| !self.dedup.contains_key(h)))
            .map(|r| r.path.clone())
            .collect()
    }

    /// Whether any record still references `content_hash`.
    #[must_use]
    pub fn is_referenced(&self, content_hash: &str) -> bool {
        self.files
            .values()
            .any(|r| r.chunk_hashes.iter().any(|h| h == content_hash))
    }
}

/// Per-file classification of a walk against the snapshot.
#[derive(Debug, Default)]
pub struct ChangeSet {
    pub added: Vec<SourceFile>,
    pub modified: Vec<SourceFile>,
    pub removed: Vec<String>,
    pub unchanged: Vec<String>,
}

impl ChangeSet {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    /// Files that need chunking and embedding, added first.
    pub fn pending(self) -> impl Iterator<Item = SourceFile> {
        self.added.into_iter().chain(self.modified)
    }
}

/// Classify `current` against `snapshot` by per-file content hash.
///
/// A recorded file missing from the walk counts as removed only when the walk
/// could read its location; records under an unreadable path stay unchanged.
#[must_use]
pub fn diff(mut current: Walk, snapshot: &IndexSnapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();
    let files = std::mem::take(&mut current.files);
    let mut seen = HashSet::with_capacity(files.len());

    for file in files {
        seen.insert(file.path.clone());
        match snapshot.file(&file.path) {
            None => changes.added.push(file),
            Some(rec) if rec.content_hash == file.content_hash => {
                changes.unchanged.push(file.path);
            }
            Some(_) => changes.modified.push(file),
        }
    }

    for rec in snapshot.files().filter(|r| !seen.contains(&r.path)) {
        if current.covers_unreadable(&rec.path) {
            changes.unchanged.push(rec.path.clone());
        } else {
            changes.removed.push(rec.path.clone());
        }
    }

    changes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::languages::Lang;
    use crate::walker::content_hash;

    fn record(path: &str, content: &str, hashes: &[&str]) -> FileRecord {
        FileRecord {
            path: path.into(),
            content_hash: content_hash(content),
            chunk_hashes: hashes.iter().map(|h| (*h).to_string()).collect(),
            indexed_at: 0,
        }
    }

    #[test]
    fn vector_id_is_stable() {
        assert_eq!(vector_id("abc"), vector_id("abc"));
        assert_ne!(vector_id("abc"), vector_id("abd"));
        assert!(Uuid::parse_str(&vector_id("abc")).is_ok());
    }

    #[test]
    fn diff_classifies_files() {
        let snapshot = IndexSnapshot::new(
            vec![
                record("a.rs", "fn a() {}", &[]),
                record("b.rs", "fn b() {}", &[]),
                record("gone.rs", "fn g() {}", &[]),
            ],
            HashMap::new(),
        );
        let current = vec![
            SourceFile::new("a.rs", Lang::Rust, "fn a() {}"),
            SourceFile::new("b.rs", Lang::Rust, "fn b() { 1 }"),
            SourceFile::new("new.rs", Lang::Rust, "fn n() {}"),
        ];
        let changes = diff(current.into(), &snapshot);
        assert_eq!(changes.unchanged, vec!["a.rs".to_string()]);
        assert_eq!(changes.modified.len(), 1);
        assert_eq!(changes.modified[0].path, "b.rs");
        assert_eq!(changes.added.len(), 1);
        assert_eq!(changes.added[0].path, "new.rs");
        assert_eq!(changes.removed, vec!["gone.rs".to_string()]);
        assert!(!changes.is_empty());
    }

    #[test]
    fn diff_of_identical_tree_is_empty() {
        let snapshot = IndexSnapshot::new(vec![record("a.rs", "x", &[])], HashMap::new());
        let changes = diff(vec![SourceFile::new("a.rs", Lang::Rust, "x")].into(), &snapshot);
        assert!(changes.is_empty());
        assert_eq!(changes.pending().count(), 0);
    }

    #[test]
    fn unreadable_files_are_not_removed() {
        let snapshot = IndexSnapshot::new(
            vec![
                record("locked.rs", "fn l() {}", &[]),
                record("vendor/a.rs", "fn a() {}", &[]),
                record("gone.rs", "fn g() {}", &[]),
            ],
            HashMap::new(),
        );
        let current = Walk {
            files: Vec::new(),
            unreadable: vec!["locked.rs".into(), "vendor".into()],
        };
        let changes = diff(current, &snapshot);
        assert_eq!(changes.removed, vec!["gone.rs".to_string()]);
        let mut unchanged = changes.unchanged.clone();
        unchanged.sort();
        assert_eq!(unchanged, vec!["locked.rs".to_string(), "vendor/a.rs".to_string()]);
    }

    #[test]
    fn unresolved_files_detects_missing_dedup() {
        let mut dedup = HashMap::new();
        dedup.insert("h1".to_string(), vector_id("h1"));
        let snapshot = IndexSnapshot::new(
            vec![record("ok.rs", "1", &["h1"]), record("bad.rs", "2", &["h1", "h2"])],
            dedup,
        );
        assert_eq!(snapshot.unresolved_files(), vec!["bad.rs".to_string()]);
        assert!(snapshot.is_referenced("h2"));
        assert!(!snapshot.is_referenced("h3"));
    }
}
