use std::collections::HashSet;

use sqlx::SqlitePool;

use super::{
    BoxFuture, ScoredVectorPoint, StoreError, VectorFilter, VectorPoint, VectorStore,
    cosine_similarity, rank,
};

/// Embeddings as little-endian `f32` BLOBs in the snapshot database.
///
/// Queries scan every row and score in process, which is fine for a single
/// repository's worth of chunks.
#[derive(Debug, Clone)]
pub struct SqliteVectorStore {
    pool: SqlitePool,
    dimensions: usize,
}

impl SqliteVectorStore {
    /// Share a pool whose database already carries the `vectors` table.
    #[must_use]
    pub fn new(pool: SqlitePool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    fn check_dimensions(&self, actual: usize) -> Result<(), StoreError> {
        if actual == self.dimensions {
            Ok(())
        } else {
            Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual,
            })
        }
    }
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

impl VectorStore for SqliteVectorStore {
    fn upsert(&self, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            for p in &points {
                self.check_dimensions(p.vector.len())?;
            }
            let dims = i64::try_from(self.dimensions)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            let mut tx = self.pool.begin().await?;
            for p in points {
                let payload = serde_json::to_string(&p.payload)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                sqlx::query(
                    "INSERT INTO vectors (id, embedding, dimensions, payload) VALUES (?, ?, ?, ?) \
                     ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding, \
                     dimensions = excluded.dimensions, payload = excluded.payload",
                )
                .bind(&p.id)
                .bind(floats_to_bytes(&p.vector))
                .bind(dims)
                .bind(payload)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(())
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            if ids.is_empty() {
                return Ok(());
            }
            let mut tx = self.pool.begin().await?;
            for id in &ids {
                sqlx::query("DELETE FROM vectors WHERE id = ?")
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            Ok(())
        })
    }

    fn query_vector(
        &self,
        vector: Vec<f32>,
        top_k: usize,
        filter: VectorFilter,
    ) -> BoxFuture<'_, Result<Vec<ScoredVectorPoint>, StoreError>> {
        Box::pin(async move {
            self.check_dimensions(vector.len())?;
            if filter.rejects_all() {
                return Ok(Vec::new());
            }
            let rows: Vec<(String, Vec<u8>)> = sqlx::query_as("SELECT id, embedding FROM vectors")
                .fetch_all(&self.pool)
                .await?;
            let scored = rows
                .into_iter()
                .filter(|(id, _)| filter.allows(id))
                .map(|(id, blob)| ScoredVectorPoint {
                    score: cosine_similarity(&vector, &bytes_to_floats(&blob)),
                    id,
                })
                .collect();
            Ok(rank(scored, top_k))
        })
    }

    fn contains(&self, ids: Vec<String>) -> BoxFuture<'_, Result<HashSet<String>, StoreError>> {
        Box::pin(async move {
            let mut present = HashSet::new();
            for id in ids {
                let row: Option<(i64,)> = sqlx::query_as("SELECT 1 FROM vectors WHERE id = ?")
                    .bind(&id)
                    .fetch_optional(&self.pool)
                    .await?;
                if row.is_some() {
                    present.insert(id);
                }
            }
            Ok(present)
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM vectors")
                .fetch_one(&self.pool)
                .await?;
            usize::try_from(n).map_err(|e| StoreError::Serialization(e.to_string()))
        })
    }
}
