use std::collections::HashMap;
use std::str::FromStr;

use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{FileRecord, IndexSnapshot};
use crate::chunker::Chunk;
use crate::error::Result;

/// Row counts reported by `ferret status`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub files: u64,
    pub chunks: u64,
    pub dedup_entries: u64,
}

/// Durable `SQLite` home of file records, chunk catalog rows and the dedup table.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    pool: SqlitePool,
}

impl SnapshotStore {
    /// Open (or create) the database and run migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migrations fail.
    pub async fn open(path: &str) -> Result<Self> {
        let in_memory = path == ":memory:";
        let url = if in_memory {
            "sqlite::memory:".to_string()
        } else {
            if let Some(parent) = std::path::Path::new(path).parent()
                && !parent.as_os_str().is_empty()
            {
                tokio::fs::create_dir_all(parent).await?;
            }
            format!("sqlite:{path}?mode=rwc")
        };

        let opts = SqliteConnectOptions::from_str(&url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // Every in-memory connection is a separate database.
        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { 5 })
            .connect_with(opts)
            .await?;

        sqlx::migrate!().run(&pool).await?;
        tracing::debug!(path, "snapshot store opened");

        Ok(Self { pool })
    }

    /// Expose the pool so the vector store can share the database.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Load every file record and the dedup table.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn load(&self) -> Result<IndexSnapshot> {
        let files: Vec<(String, String, i64)> =
            sqlx::query_as("SELECT path, content_hash, indexed_at FROM file_records")
                .fetch_all(&self.pool)
                .await?;
        let chunk_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT path, chunk_hash FROM file_chunks ORDER BY path, ordinal")
                .fetch_all(&self.pool)
                .await?;
        let dedup: Vec<(String, String)> =
            sqlx::query_as("SELECT content_hash, vector_id FROM dedup")
                .fetch_all(&self.pool)
                .await?;

        let mut hashes: HashMap<String, Vec<String>> = HashMap::new();
        for (path, hash) in chunk_rows {
            hashes.entry(path).or_default().push(hash);
        }

        let records = files
            .into_iter()
            .map(|(path, content_hash, indexed_at)| FileRecord {
                chunk_hashes: hashes.remove(&path).unwrap_or_default(),
                path,
                content_hash,
                indexed_at,
            })
            .collect();

        Ok(IndexSnapshot::new(records, dedup.into_iter().collect()))
    }

    /// Every catalogued chunk, in path and source order.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails or a stored row does not decode.
    pub async fn load_chunks(&self) -> Result<Vec<Chunk>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT chunk_json FROM file_chunks ORDER BY path, ordinal")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(json,)| serde_json::from_str(&json).map_err(Into::into))
            .collect()
    }

    /// Replace a file's record and catalog rows in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails; nothing is written then.
    pub async fn commit_file(
        &self,
        path: &str,
        content_hash: &str,
        chunks: &[Chunk],
    ) -> Result<FileRecord> {
        let indexed_at = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM file_chunks WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO file_records (path, content_hash, indexed_at) VALUES (?, ?, ?) \
             ON CONFLICT(path) DO UPDATE SET content_hash = excluded.content_hash, \
             indexed_at = excluded.indexed_at",
        )
        .bind(path)
        .bind(content_hash)
        .bind(indexed_at)
        .execute(&mut *tx)
        .await?;

        for (ordinal, chunk) in chunks.iter().enumerate() {
            let json = serde_json::to_string(chunk)?;
            sqlx::query(
                "INSERT INTO file_chunks (path, ordinal, chunk_hash, chunk_id, chunk_json) \
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(path)
            .bind(i64::try_from(ordinal)?)
            .bind(&chunk.content_hash)
            .bind(&chunk.id)
            .bind(json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(FileRecord {
            path: path.to_string(),
            content_hash: content_hash.to_string(),
            chunk_hashes: chunks.iter().map(|c| c.content_hash.clone()).collect(),
            indexed_at,
        })
    }

    /// Drop file records and their catalog rows.
    ///
    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn remove_files(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for path in paths {
            sqlx::query("DELETE FROM file_records WHERE path = ?")
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record an embedded hash. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_dedup(&self, content_hash: &str, vector_id: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO dedup (content_hash, vector_id, created_at) VALUES (?, ?, ?) \
             ON CONFLICT(content_hash) DO UPDATE SET vector_id = excluded.vector_id",
        )
        .bind(content_hash)
        .bind(vector_id)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns an error if the transaction fails.
    pub async fn remove_dedup(&self, hashes: &[String]) -> Result<()> {
        if hashes.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for hash in hashes {
            sqlx::query("DELETE FROM dedup WHERE content_hash = ?")
                .bind(hash)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Of `candidates`, the dedup entries no file record references any more.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn unreferenced(&self, candidates: &[String]) -> Result<Vec<(String, String)>> {
        let mut orphans = Vec::new();
        for hash in candidates {
            let row: Option<(String,)> = sqlx::query_as(
                "SELECT vector_id FROM dedup WHERE content_hash = ? \
                 AND NOT EXISTS (SELECT 1 FROM file_chunks WHERE chunk_hash = ?)",
            )
            .bind(hash)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
            if let Some((vector_id,)) = row {
                orphans.push((hash.clone(), vector_id));
            }
        }
        Ok(orphans)
    }

    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn stats(&self) -> Result<SnapshotStats> {
        let (files,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_records")
            .fetch_one(&self.pool)
            .await?;
        let (chunks,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM file_chunks")
            .fetch_one(&self.pool)
            .await?;
        let (dedup_entries,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM dedup")
            .fetch_one(&self.pool)
            .await?;
        Ok(SnapshotStats {
            files: u64::try_from(files)?,
            chunks: u64::try_from(chunks)?,
            dedup_entries: u64::try_from(dedup_entries)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk;
    use crate::config::ChunkerConfig;
    use crate::languages::Lang;
    use crate::snapshot::vector_id;

    async fn open_temp() -> (tempfile::TempDir, SnapshotStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let store = SnapshotStore::open(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    fn chunks(src: &str, path: &str) -> Vec<Chunk> {
        chunk(src, Lang::Rust, path, &ChunkerConfig::default())
    }

    #[tokio::test]
    async fn empty_store_loads_empty_snapshot() {
        let (_dir, store) = open_temp().await;
        let snap = store.load().await.unwrap();
        assert_eq!(snap.file_count(), 0);
        assert_eq!(snap.dedup_len(), 0);
        assert_eq!(store.stats().await.unwrap(), SnapshotStats::default());
    }

    #[tokio::test]
    async fn in_memory_store_is_usable() {
        let store = SnapshotStore::open(":memory:").await.unwrap();
        store.insert_dedup("h", &vector_id("h")).await.unwrap();
        assert_eq!(store.load().await.unwrap().dedup_len(), 1);
    }

    #[tokio::test]
    async fn commit_then_load_roundtrip() {
        let (_dir, store) = open_temp().await;
        let cs = chunks("fn a() {}\n\nfn b() {}\n", "src/a.rs");
        for c in &cs {
            store
                .insert_dedup(&c.content_hash, &vector_id(&c.content_hash))
                .await
                .unwrap();
        }
        let rec = store.commit_file("src/a.rs", "filehash", &cs).await.unwrap();
        assert_eq!(rec.chunk_hashes.len(), cs.len());

        let snap = store.load().await.unwrap();
        let loaded = snap.file("src/a.rs").unwrap();
        assert_eq!(loaded.content_hash, "filehash");
        assert_eq!(loaded.chunk_hashes, rec.chunk_hashes);
        assert!(snap.unresolved_files().is_empty());

        let catalog = store.load_chunks().await.unwrap();
        assert_eq!(catalog, cs);
    }

    #[tokio::test]
    async fn commit_replaces_previous_rows() {
        let (_dir, store) = open_temp().await;
        store
            .commit_file("a.rs", "v1", &chunks("fn a() {}\n\nfn b() {}\n", "a.rs"))
            .await
            .unwrap();
        store
            .commit_file("a.rs", "v2", &chunks("fn c() {}\n", "a.rs"))
            .await
            .unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.files, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(store.load().await.unwrap().file("a.rs").unwrap().content_hash, "v2");
    }

    #[tokio::test]
    async fn remove_files_cascades_to_chunks() {
        let (_dir, store) = open_temp().await;
        store
            .commit_file("a.rs", "v1", &chunks("fn a() {}\n", "a.rs"))
            .await
            .unwrap();
        store.remove_files(&["a.rs".to_string()]).await.unwrap();
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.files, 0);
        assert_eq!(stats.chunks, 0);
    }

    #[tokio::test]
    async fn unreferenced_only_returns_orphans() {
        let (_dir, store) = open_temp().await;
        let cs = chunks("fn a() {}\n", "a.rs");
        let live = cs[0].content_hash.clone();
        store.insert_dedup(&live, &vector_id(&live)).await.unwrap();
        store.insert_dedup("dead", &vector_id("dead")).await.unwrap();
        store.commit_file("a.rs", "v1", &cs).await.unwrap();

        let orphans = store
            .unreferenced(&[live.clone(), "dead".to_string(), "unknown".to_string()])
            .await
            .unwrap();
        assert_eq!(orphans, vec![("dead".to_string(), vector_id("dead"))]);

        store.remove_dedup(&["dead".to_string()]).await.unwrap();
        assert_eq!(store.stats().await.unwrap().dedup_entries, 1);
    }

    #[tokio::test]
    async fn store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/index.db");
        let path = path.to_str().unwrap();
        {
            let store = SnapshotStore::open(path).await.unwrap();
            store.insert_dedup("h", "v").await.unwrap();
        }
        let store = SnapshotStore::open(path).await.unwrap();
        assert_eq!(store.load().await.unwrap().resolve("h"), Some("v"));
    }
}
