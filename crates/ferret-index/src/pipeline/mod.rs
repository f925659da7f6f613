//! Indexing run coordinator: walk → diff → chunk → dedup → embed → upsert → commit.
//!
//! Chunking runs on the blocking pool behind a bounded queue. A single
//! coordinator owns the snapshot and the dedup tracker, dispatches embedding
//! batches and commits each file once every chunk of it is stored.

mod batch;
mod retry;
mod worker;

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::catalog::Catalog;
use crate::chunker::{Chunk, Chunker};
use crate::config::{PipelineConfig, WalkerConfig};
use crate::embed::EmbeddingProvider;
use crate::error::{IndexError, Result};
use crate::snapshot::{IndexSnapshot, SnapshotStore, diff, vector_id};
use crate::store::VectorStore;
use crate::walker::{SourceFile, Walk, walk};

use self::batch::{DedupTracker, Resolution};
use self::retry::RetryPolicy;
use self::worker::{BatchOutcome, Limits, Produced};

/// Terminal state of one file in a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Every chunk is stored and the record committed.
    Indexed,
    /// Some chunks could not be embedded or stored; the old record is kept.
    PartialFailure {
        failed_chunks: Vec<String>,
        reasons: Vec<String>,
    },
    /// Nothing of the file could be indexed.
    Failed { reason: String },
    /// The file disappeared from the tree and its record was dropped.
    Removed,
    /// The run was cancelled before the file completed.
    Cancelled,
    /// The stored record referenced missing vectors and was invalidated.
    Inconsistent { reason: String },
}

/// Per-file outcome streamed while a run progresses.
#[derive(Debug, Clone)]
pub struct FileUpdate {
    pub path: String,
    pub outcome: FileOutcome,
}

/// Summary of an indexing run.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_unreadable: usize,
    pub files_unchanged: usize,
    pub files_indexed: usize,
    pub files_removed: usize,
    pub files_failed: usize,
    pub files_cancelled: usize,
    pub files_inconsistent: usize,
    pub vectors_untracked: usize,
    pub chunks_total: usize,
    pub chunks_embedded: usize,
    pub chunks_deduplicated: usize,
    pub chunks_failed: usize,
    pub embed_calls: usize,
    pub upsert_calls: usize,
    pub orphans_collected: usize,
    pub outcomes: Vec<(String, FileOutcome)>,
    pub duration_ms: u64,
}

impl IndexReport {
    /// Last outcome recorded for `path`.
    #[must_use]
    pub fn outcome(&self, path: &str) -> Option<&FileOutcome> {
        self.outcomes
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, o)| o)
    }

    #[must_use]
    pub fn was_cancelled(&self) -> bool {
        self.files_cancelled > 0
    }
}

/// A file whose chunks are waiting on embeddings.
#[derive(Debug)]
struct FileJob {
    file: SourceFile,
    chunks: Vec<Chunk>,
    waiting: HashSet<String>,
    failures: Vec<(String, String)>,
}

/// Mutable state of one run, owned by the coordinator.
#[derive(Debug, Default)]
struct RunState {
    snapshot: IndexSnapshot,
    report: IndexReport,
    orphan_candidates: HashSet<String>,
    finished: HashSet<String>,
}

/// Orchestrates incremental indexing of a source tree.
pub struct IndexPipeline<P> {
    config: PipelineConfig,
    chunker: Arc<Chunker>,
    provider: Arc<P>,
    store: Arc<dyn VectorStore>,
    snapshots: SnapshotStore,
    catalog: Catalog,
    updates: Option<mpsc::UnboundedSender<FileUpdate>>,
}

impl<P: EmbeddingProvider + 'static> IndexPipeline<P> {
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        chunker: Chunker,
        provider: Arc<P>,
        store: Arc<dyn VectorStore>,
        snapshots: SnapshotStore,
        catalog: Catalog,
    ) -> Self {
        Self {
            config,
            chunker: Arc::new(chunker),
            provider,
            store,
            snapshots,
            catalog,
            updates: None,
        }
    }

    /// Stream every file outcome to `tx` as it is decided.
    #[must_use]
    pub fn with_updates(mut self, tx: mpsc::UnboundedSender<FileUpdate>) -> Self {
        self.updates = Some(tx);
        self
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Walk `root` and index it.
    ///
    /// # Errors
    ///
    /// Returns an error if the walk fails or the run aborts; see [`Self::run`].
    pub async fn index_root(
        &self,
        root: &Path,
        walker: &WalkerConfig,
        cancel: CancellationToken,
    ) -> Result<IndexReport> {
        let root = root.to_path_buf();
        let walker = walker.clone();
        let walked = tokio::task::spawn_blocking(move || walk(&root, &walker)).await??;
        self.run(walked, cancel).await
    }

    /// Bring the index in line with `walk`, the complete current tree.
    ///
    /// Recorded files under a path the walk could not read keep their index
    /// entries. Per-file failures are reported in the returned [`IndexReport`]; only
    /// snapshot or store errors outside any single file abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be loaded or updated, or the
    /// vector store cannot be checked for consistency.
    pub async fn run(
        &self,
        walk: impl Into<Walk>,
        cancel: CancellationToken,
    ) -> Result<IndexReport> {
        let walk = walk.into();
        let start = Instant::now();
        let policy = RetryPolicy::from_config(&self.config);
        let mut state = RunState {
            snapshot: self.snapshots.load().await?,
            ..RunState::default()
        };
        state.report.files_scanned = walk.files.len();
        state.report.files_unreadable = walk.unreadable.len();

        self.check_consistency(&mut state, policy).await?;

        let changes = diff(walk, &state.snapshot);
        state.report.files_unchanged = changes.unchanged.len();
        self.remove_files(&changes.removed, &mut state).await?;

        let pending: Vec<SourceFile> = changes.pending().collect();
        let pending_paths: Vec<String> = pending.iter().map(|f| f.path.clone()).collect();
        tracing::info!(
            scanned = state.report.files_scanned,
            unreadable = state.report.files_unreadable,
            pending = pending.len(),
            unchanged = state.report.files_unchanged,
            removed = state.report.files_removed,
            "indexing started"
        );

        if !pending.is_empty() {
            self.process(pending, &mut state, policy, &cancel).await;
        }

        for path in pending_paths {
            if !state.finished.contains(&path) {
                state.report.files_cancelled += 1;
                self.emit(&mut state, path, FileOutcome::Cancelled);
            }
        }

        self.collect_orphans(&mut state, policy).await;

        let mut report = state.report;
        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            indexed = report.files_indexed,
            failed = report.files_failed,
            cancelled = report.files_cancelled,
            embedded = report.chunks_embedded,
            deduplicated = report.chunks_deduplicated,
            embed_calls = report.embed_calls,
            orphans = report.orphans_collected,
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    fn emit(&self, state: &mut RunState, path: String, outcome: FileOutcome) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(FileUpdate {
                path: path.clone(),
                outcome: outcome.clone(),
            });
        }
        state.report.outcomes.push((path, outcome));
    }

    /// Drop dedup entries whose vectors are gone, then invalidate every
    /// record that references them so the file is re-embedded. Stored vectors
    /// no dedup entry accounts for are counted and logged.
    async fn check_consistency(&self, state: &mut RunState, policy: RetryPolicy) -> Result<()> {
        let entries: Vec<(String, String)> = state
            .snapshot
            .dedup_entries()
            .map(|(h, v)| (h.to_string(), v.to_string()))
            .collect();
        if !entries.is_empty() {
            let ids: Vec<String> = entries.iter().map(|(_, v)| v.clone()).collect();
            let present = policy
                .run("contains", || self.store.contains(ids.clone()))
                .await?;
            let missing: Vec<String> = entries
                .into_iter()
                .filter(|(_, v)| !present.contains(v))
                .map(|(h, _)| h)
                .collect();
            if !missing.is_empty() {
                tracing::warn!(missing = missing.len(), "dedup entries without stored vectors");
                self.snapshots.remove_dedup(&missing).await?;
                for hash in &missing {
                    state.snapshot.remove_dedup(hash);
                }
            }
        }

        let stored = policy.run("count", || self.store.count()).await?;
        let tracked = state.snapshot.dedup_len();
        if stored > tracked {
            state.report.vectors_untracked = stored - tracked;
            tracing::warn!(stored, tracked, "stored vectors without dedup entries");
        }

        let invalid = state.snapshot.unresolved_files();
        if invalid.is_empty() {
            return Ok(());
        }
        self.snapshots.remove_files(&invalid).await?;
        for path in invalid {
            if let Some(record) = state.snapshot.remove_file(&path) {
                state.orphan_candidates.extend(record.chunk_hashes);
            }
            self.catalog.write(|c| c.remove_file(&path))?;
            let err = IndexError::SnapshotInconsistency {
                path: path.clone(),
                reason: "record references vectors missing from the store".into(),
            };
            tracing::warn!(error = %err, "invalidating file record");
            state.report.files_inconsistent += 1;
            self.emit(state, path, FileOutcome::Inconsistent {
                reason: err.to_string(),
            });
        }
        Ok(())
    }

    async fn remove_files(&self, removed: &[String], state: &mut RunState) -> Result<()> {
        if removed.is_empty() {
            return Ok(());
        }
        self.snapshots.remove_files(removed).await?;
        for path in removed {
            if let Some(record) = state.snapshot.remove_file(path) {
                state.orphan_candidates.extend(record.chunk_hashes);
            }
            self.catalog.write(|c| c.remove_file(path))?;
            state.report.files_removed += 1;
            tracing::debug!(%path, "file removed");
            self.emit(state, path.clone(), FileOutcome::Removed);
        }
        Ok(())
    }

    async fn process(
        &self,
        pending: Vec<SourceFile>,
        state: &mut RunState,
        policy: RetryPolicy,
        cancel: &CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let producer_cancel = cancel.child_token();
        let producer = worker::spawn_chunkers(
            pending,
            Arc::clone(&self.chunker),
            Arc::new(Semaphore::new(self.config.effective_parse_concurrency())),
            tx,
            producer_cancel.clone(),
        );

        let limits = Limits::new(self.config.embed_concurrency, self.config.upsert_concurrency);
        let max_in_flight = self.config.embed_concurrency.max(1) * 2;
        let mut tracker = DedupTracker::new(self.provider.max_batch_size());
        let mut jobs: Vec<Option<FileJob>> = Vec::new();
        let mut in_flight: JoinSet<BatchOutcome> = JoinSet::new();
        let mut in_flight_hashes: HashMap<Id, Vec<String>> = HashMap::new();
        let mut receiving = true;

        loop {
            let cancelled = cancel.is_cancelled();
            if cancelled && receiving {
                tracing::info!(in_flight = in_flight.len(), "cancellation requested, draining");
                receiving = false;
                producer_cancel.cancel();
                rx.close();
            }

            if !cancelled {
                while in_flight.len() < max_in_flight {
                    let Some(items) = tracker.next_batch(!receiving) else {
                        break;
                    };
                    let hashes = items.iter().map(|i| i.hash.clone()).collect();
                    let handle = in_flight.spawn(worker::embed_and_upsert(
                        items,
                        Arc::clone(&self.provider),
                        Arc::clone(&self.store),
                        limits.clone(),
                        policy,
                    ));
                    in_flight_hashes.insert(handle.id(), hashes);
                }
            }

            if !receiving && in_flight.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled(), if receiving => {}
                Some(joined) = in_flight.join_next_with_id(), if !in_flight.is_empty() => {
                    let outcome = settle(joined, &mut in_flight_hashes);
                    self.apply_batch(outcome, state, &mut tracker, &mut jobs).await;
                }
                produced = rx.recv(), if receiving && in_flight.len() < max_in_flight => {
                    match produced {
                        Some(p) => self.accept(p, state, &mut tracker, &mut jobs).await,
                        None => receiving = false,
                    }
                }
            }
        }

        if let Err(e) = producer.await {
            tracing::error!(error = %e, "chunk producer failed");
        }
    }

    async fn accept(
        &self,
        produced: Produced,
        state: &mut RunState,
        tracker: &mut DedupTracker,
        jobs: &mut Vec<Option<FileJob>>,
    ) {
        let (file, chunks) = match produced {
            Produced::Chunked { file, chunks } => (file, chunks),
            Produced::Failed { path, reason } => {
                state.report.files_failed += 1;
                state.finished.insert(path.clone());
                self.emit(state, path, FileOutcome::Failed { reason });
                return;
            }
        };

        let slot = jobs.len();
        let mut job = FileJob {
            file,
            chunks: Vec::new(),
            waiting: HashSet::new(),
            failures: Vec::new(),
        };
        for chunk in &chunks {
            match tracker.request(chunk, slot, &state.snapshot) {
                Resolution::Resolved => state.report.chunks_deduplicated += 1,
                Resolution::Waiting { first: false } => {
                    state.report.chunks_deduplicated += 1;
                    job.waiting.insert(chunk.content_hash.clone());
                }
                Resolution::Waiting { first: true } => {
                    job.waiting.insert(chunk.content_hash.clone());
                }
                Resolution::Failed(reason) => job.failures.push((chunk.id.clone(), reason)),
            }
        }
        state.report.chunks_total += chunks.len();
        job.chunks = chunks;
        tracing::debug!(
            path = %job.file.path,
            chunks = job.chunks.len(),
            waiting = job.waiting.len(),
            "file chunked"
        );

        if job.waiting.is_empty() {
            jobs.push(None);
            self.finish(job, state).await;
        } else {
            jobs.push(Some(job));
        }
    }

    async fn apply_batch(
        &self,
        outcome: BatchOutcome,
        state: &mut RunState,
        tracker: &mut DedupTracker,
        jobs: &mut [Option<FileJob>],
    ) {
        state.report.embed_calls += outcome.embed_calls;
        state.report.upsert_calls += outcome.upsert_calls;

        for hash in outcome.hashes {
            let failure = match &outcome.result {
                Err(reason) => Some(reason.clone()),
                Ok(()) => {
                    let vid = vector_id(&hash);
                    match self.snapshots.insert_dedup(&hash, &vid).await {
                        Ok(()) => {
                            state.snapshot.insert_dedup(hash.clone(), vid);
                            state.report.chunks_embedded += 1;
                            None
                        }
                        Err(e) => Some(format!("dedup record failed: {e}")),
                    }
                }
            };
            let slots = match &failure {
                Some(reason) => tracker.fail(&hash, reason),
                None => tracker.complete(&hash),
            };
            for slot in slots {
                let Some(job) = jobs.get_mut(slot).and_then(Option::as_mut) else {
                    continue;
                };
                job.waiting.remove(&hash);
                if let Some(reason) = &failure {
                    for chunk in job.chunks.iter().filter(|c| c.content_hash == hash) {
                        job.failures.push((chunk.id.clone(), reason.clone()));
                    }
                }
                if job.waiting.is_empty()
                    && let Some(job) = jobs[slot].take()
                {
                    self.finish(job, state).await;
                }
            }
        }
    }

    /// Commit a fully resolved file, or report why it cannot be.
    async fn finish(&self, job: FileJob, state: &mut RunState) {
        let path = job.file.path.clone();
        state.finished.insert(path.clone());

        if !job.failures.is_empty() {
            state.report.files_failed += 1;
            state.report.chunks_failed += job.failures.len();
            let mut reasons: Vec<String> = Vec::new();
            for (_, reason) in &job.failures {
                if !reasons.contains(reason) {
                    reasons.push(reason.clone());
                }
            }
            tracing::warn!(%path, failed = job.failures.len(), total = job.chunks.len(), "file not committed");
            let outcome = if job.failures.len() >= job.chunks.len() {
                FileOutcome::Failed {
                    reason: reasons.join("; "),
                }
            } else {
                FileOutcome::PartialFailure {
                    failed_chunks: job.failures.into_iter().map(|(id, _)| id).collect(),
                    reasons,
                }
            };
            self.emit(state, path, outcome);
            return;
        }

        match self
            .snapshots
            .commit_file(&path, &job.file.content_hash, &job.chunks)
            .await
        {
            Ok(record) => {
                if let Some(old) = state.snapshot.put_file(record) {
                    state.orphan_candidates.extend(old.chunk_hashes);
                }
                if let Err(e) = self.catalog.write(|c| c.replace_file(&path, job.chunks)) {
                    tracing::warn!(%path, error = %e, "lexical index update failed");
                }
                state.report.files_indexed += 1;
                tracing::debug!(%path, "file indexed");
                self.emit(state, path, FileOutcome::Indexed);
            }
            Err(e) => {
                tracing::warn!(%path, error = %e, "file commit failed");
                state.report.files_failed += 1;
                self.emit(state, path, FileOutcome::Failed {
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Delete vectors of candidate hashes no record references any more.
    async fn collect_orphans(&self, state: &mut RunState, policy: RetryPolicy) {
        if state.orphan_candidates.is_empty() {
            return;
        }
        let mut candidates: Vec<String> = state.orphan_candidates.drain().collect();
        candidates.sort();
        let orphans = match self.snapshots.unreferenced(&candidates).await {
            Ok(o) if o.is_empty() => return,
            Ok(o) => o,
            Err(e) => {
                tracing::warn!(error = %e, "orphan lookup failed");
                return;
            }
        };
        let ids: Vec<String> = orphans.iter().map(|(_, v)| v.clone()).collect();
        if let Err(e) = policy.run("delete", || self.store.delete(ids.clone())).await {
            tracing::warn!(orphans = ids.len(), error = %e, "orphan vector delete failed");
            return;
        }
        let hashes: Vec<String> = orphans.into_iter().map(|(h, _)| h).collect();
        if let Err(e) = self.snapshots.remove_dedup(&hashes).await {
            tracing::warn!(error = %e, "orphan dedup cleanup failed");
            return;
        }
        for hash in &hashes {
            state.snapshot.remove_dedup(hash);
        }
        state.report.orphans_collected = hashes.len();
        tracing::debug!(collected = hashes.len(), "orphan vectors deleted");
    }
}

/// Map a joined batch task back to its hashes, turning a panic into a failure.
fn settle(
    joined: std::result::Result<(Id, BatchOutcome), JoinError>,
    in_flight_hashes: &mut HashMap<Id, Vec<String>>,
) -> BatchOutcome {
    match joined {
        Ok((id, outcome)) => {
            in_flight_hashes.remove(&id);
            outcome
        }
        Err(e) => {
            tracing::error!(error = %e, "embedding task failed");
            BatchOutcome {
                hashes: in_flight_hashes.remove(&e.id()).unwrap_or_default(),
                embed_calls: 0,
                upsert_calls: 0,
                result: Err(format!("embedding task failed: {e}")),
            }
        }
    }
}
