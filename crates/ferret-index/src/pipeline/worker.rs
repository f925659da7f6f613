use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;

use super::batch::EmbedItem;
use super::retry::RetryPolicy;
use crate::chunker::{Chunk, Chunker};
use crate::embed::{EmbeddingProvider, ProviderError};
use crate::snapshot::vector_id;
use crate::store::{VectorPoint, VectorStore};
use crate::walker::SourceFile;

/// Output of one chunking task.
#[derive(Debug)]
pub(crate) enum Produced {
    Chunked { file: SourceFile, chunks: Vec<Chunk> },
    Failed { path: String, reason: String },
}

/// Chunk `files` on the blocking pool, at most `permits` at a time, and feed
/// the results into `tx`.
///
/// A queue slot is reserved before a file is parsed, so a full queue stops
/// new parses instead of piling finished chunk lists up behind it.
pub(crate) fn spawn_chunkers(
    files: Vec<SourceFile>,
    chunker: Arc<Chunker>,
    permits: Arc<Semaphore>,
    tx: mpsc::Sender<Produced>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tasks = JoinSet::new();
        for file in files {
            // A closed queue means the run was cancelled.
            let slot = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                slot = tx.clone().reserve_owned() => match slot {
                    Ok(s) => s,
                    Err(_) => break,
                },
            };
            let permit = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => break,
                },
            };
            let chunker = Arc::clone(&chunker);
            tasks.spawn(async move {
                let path = file.path.clone();
                let result = tokio::task::spawn_blocking(move || {
                    let chunks = chunker.chunk(&file.content, file.language, &file.path);
                    (file, chunks)
                })
                .await;
                drop(permit);
                let produced = match result {
                    Ok((file, chunks)) => Produced::Chunked { file, chunks },
                    Err(e) => {
                        tracing::error!(%path, error = %e, "chunking task failed");
                        Produced::Failed {
                            path,
                            reason: format!("chunking failed: {e}"),
                        }
                    }
                };
                slot.send(produced);
            });
        }
        drop(tx);
        while tasks.join_next().await.is_some() {}
    })
}

/// Concurrency limits shared by every batch task of a run.
#[derive(Debug, Clone)]
pub(crate) struct Limits {
    pub embed: Arc<Semaphore>,
    pub upsert: Arc<Semaphore>,
}

impl Limits {
    pub(crate) fn new(embed: usize, upsert: usize) -> Self {
        Self {
            embed: Arc::new(Semaphore::new(embed.max(1))),
            upsert: Arc::new(Semaphore::new(upsert.max(1))),
        }
    }
}

/// Result of embedding and storing one batch.
#[derive(Debug)]
pub(crate) struct BatchOutcome {
    pub hashes: Vec<String>,
    pub embed_calls: usize,
    pub upsert_calls: usize,
    pub result: Result<(), String>,
}

/// Embed `items` in one provider call, then upsert them under their
/// content-derived vector ids.
pub(crate) async fn embed_and_upsert<P: EmbeddingProvider>(
    items: Vec<EmbedItem>,
    provider: Arc<P>,
    store: Arc<dyn VectorStore>,
    limits: Limits,
    policy: RetryPolicy,
) -> BatchOutcome {
    let hashes: Vec<String> = items.iter().map(|i| i.hash.clone()).collect();
    let mut outcome = BatchOutcome {
        hashes,
        embed_calls: 0,
        upsert_calls: 0,
        result: Ok(()),
    };

    let texts: Vec<String> = items.iter().map(|i| i.text.clone()).collect();
    let vectors = {
        let Ok(_permit) = limits.embed.acquire().await else {
            outcome.result = Err("embedding limiter closed".into());
            return outcome;
        };
        outcome.embed_calls = 1;
        policy
            .run("embed", || provider.embed(&texts))
            .await
            .and_then(|v| {
                if v.len() == texts.len() {
                    Ok(v)
                } else {
                    Err(ProviderError::CountMismatch {
                        expected: texts.len(),
                        actual: v.len(),
                    })
                }
            })
    };
    let vectors = match vectors {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(provider = provider.name(), batch = texts.len(), error = %e, "embedding failed");
            outcome.result = Err(e.to_string());
            return outcome;
        }
    };

    let points: Vec<VectorPoint> = items
        .into_iter()
        .zip(vectors)
        .map(|(item, vector)| VectorPoint {
            id: vector_id(&item.hash),
            vector,
            payload: item.payload,
        })
        .collect();

    let Ok(_permit) = limits.upsert.acquire().await else {
        outcome.result = Err("upsert limiter closed".into());
        return outcome;
    };
    outcome.upsert_calls = 1;
    if let Err(e) = policy.run("upsert", || store.upsert(points.clone())).await {
        tracing::warn!(batch = points.len(), error = %e, "vector upsert failed");
        outcome.result = Err(e.to_string());
    }
    outcome
}
