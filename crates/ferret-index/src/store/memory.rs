use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use super::{
    BoxFuture, ScoredVectorPoint, StoreError, VectorFilter, VectorPoint, VectorStore,
    cosine_similarity, rank,
};

/// Process-local vector store, used in tests and for throwaway indexes.
pub struct InMemoryVectorStore {
    points: RwLock<HashMap<String, VectorPoint>>,
}

impl InMemoryVectorStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            points: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryVectorStore").finish_non_exhaustive()
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("lock poisoned".into())
}

impl VectorStore for InMemoryVectorStore {
    fn upsert(&self, points: Vec<VectorPoint>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.points.write().map_err(|_| poisoned())?;
            for p in points {
                map.insert(p.id.clone(), p);
            }
            Ok(())
        })
    }

    fn delete(&self, ids: Vec<String>) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(async move {
            let mut map = self.points.write().map_err(|_| poisoned())?;
            for id in &ids {
                map.remove(id);
            }
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
            let map = self.points.read().map_err(|_| poisoned())?;
            let scored = map
                .values()
                .filter(|p| filter.allows(&p.id))
                .map(|p| ScoredVectorPoint {
                    id: p.id.clone(),
                    score: cosine_similarity(&vector, &p.vector),
                })
                .collect();
            Ok(rank(scored, top_k))
        })
    }

    fn contains(&self, ids: Vec<String>) -> BoxFuture<'_, Result<HashSet<String>, StoreError>> {
        Box::pin(async move {
            let map = self.points.read().map_err(|_| poisoned())?;
            Ok(ids.into_iter().filter(|id| map.contains_key(id)).collect())
        })
    }

    fn count(&self) -> BoxFuture<'_, Result<usize, StoreError>> {
        Box::pin(async move {
            let map = self.points.read().map_err(|_| poisoned())?;
            Ok(map.len())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(id: &str, vector: Vec<f32>) -> VectorPoint {
        VectorPoint {
            id: id.into(),
            vector,
            payload: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_query_delete() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![
                point("x", vec![1.0, 0.0]),
                point("y", vec![0.0, 1.0]),
                point("xy", vec![0.7, 0.7]),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let hits = store
            .query_vector(vec![1.0, 0.0], 2, VectorFilter::any())
            .await
            .unwrap();
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "xy");

        store.delete(vec!["x".into(), "missing".into()]).await.unwrap();
        let present = store
            .contains(vec!["x".into(), "y".into()])
            .await
            .unwrap();
        assert_eq!(present, HashSet::from(["y".to_string()]));
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![point("a", vec![1.0])]).await.unwrap();
        store.upsert(vec![point("a", vec![-1.0])]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        let hits = store
            .query_vector(vec![1.0], 1, VectorFilter::any())
            .await
            .unwrap();
        assert!(hits[0].score < 0.0);
    }

    #[tokio::test]
    async fn filter_applies_before_ranking() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![point("near", vec![1.0, 0.0]), point("far", vec![0.0, 1.0])])
            .await
            .unwrap();
        let only_far = VectorFilter::only(HashSet::from(["far".to_string()]));
        let hits = store.query_vector(vec![1.0, 0.0], 1, only_far).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "far");
    }
}
