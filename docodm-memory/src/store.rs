//! In-memory connection and collection handles.
//!
//! This module provides a simple in-memory backend that keeps every collection as an
//! insertion-ordered list of BSON documents behind an async-safe read-write lock.

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use mea::rwlock::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use docodm_core::{
    connection::{CollectionHandle, Connection, ConnectionBuilder, UpdateOutcome},
    entity::ID_FIELD,
    error::{OdmError, OdmResult},
};

use crate::{
    evaluator::{Comparable, DocumentEvaluator, resolve_path},
    pipeline::{Collections, run_pipeline},
    update::apply_update,
};

type StoreMap = Collections;

/// Thread-safe in-memory connection.
///
/// `MemoryConnection` is cloneable and uses an `Arc`-wrapped internal state, so clones
/// and every collection handle they hand out share the same data.
///
/// # Performance
///
/// Every operation scans the whole collection (no indexing). `$lookup` scans the joined
/// collection once per row.
///
/// # Example
///
/// ```ignore
/// use docodm_memory::MemoryConnection;
/// use docodm_core::connection::{Connection, ConnectionRegistry};
///
/// let connections = ConnectionRegistry::new();
/// connections.register("default", MemoryConnection::new());
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryConnection {
    /// collection name -> documents in insertion order
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryConnection {
    /// Creates a new empty in-memory connection.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing a `MemoryConnection`.
    pub fn builder() -> MemoryConnectionBuilder {
        MemoryConnectionBuilder::default()
    }

    /// Names of the collections that hold or held documents.
    pub async fn list_collections(&self) -> Vec<String> {
        self.store.read().await.keys().cloned().collect()
    }

    /// Drops a collection and its documents. Returns false if it did not exist.
    pub async fn drop_collection(&self, name: &str) -> bool {
        self.store.write().await.remove(name).is_some()
    }

    /// Typed handle of a collection, for direct use outside the mapping layer.
    pub fn memory_collection(&self, name: &str) -> MemoryCollection {
        MemoryCollection {
            name: name.to_string(),
            store: self.store.clone(),
        }
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle> {
        Arc::new(self.memory_collection(name))
    }

    /// Discards every collection.
    async fn shutdown(&self) -> OdmResult<()> {
        let mut store = self.store.write().await;
        info!(collections = store.len(), "discarding in-memory collections");
        store.clear();

        Ok(())
    }
}

/// A single collection of a [`MemoryConnection`].
#[derive(Clone, Debug)]
pub struct MemoryCollection {
    name: String,
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryCollection {
    fn matching(documents: &[Document], filter: &Document) -> OdmResult<Vec<bool>> {
        documents
            .iter()
            .map(|document| DocumentEvaluator::new(document).matches(filter))
            .collect()
    }
}

#[async_trait]
impl CollectionHandle for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        let store = self.store.read().await;
        let rows = store.get(&self.name).cloned().unwrap_or_default();

        debug!(collection = %self.name, stages = pipeline.len(), "aggregate");

        run_pipeline(rows, &pipeline, &store)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let collection = store.entry(self.name.clone()).or_default();

        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids: Vec<Bson> = Vec::with_capacity(documents.len());

        for document in documents {
            let id = document
                .get(ID_FIELD)
                .cloned()
                .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

            let taken = ids.iter().any(|other| Comparable::from(other) == Comparable::from(&id))
                || collection.iter().any(|existing| {
                    existing
                        .get(ID_FIELD)
                        .is_some_and(|other| Comparable::from(other) == Comparable::from(&id))
                });

            if taken {
                return Err(OdmError::Backend(format!(
                    "duplicate key {ID_FIELD}: {id} in collection {}",
                    self.name
                )));
            }

            let mut stored = Document::new();
            stored.insert(ID_FIELD, id.clone());
            stored.extend(document.into_iter().filter(|(key, _)| key != ID_FIELD));

            prepared.push(stored);
            ids.push(id);
        }

        debug!(collection = %self.name, count = prepared.len(), "insert_many");

        collection.extend(prepared);
        Ok(ids)
    }

    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<UpdateOutcome> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(&self.name) else {
            return Ok(UpdateOutcome::default());
        };

        let matched = Self::matching(collection, &filter)?;
        let mut updated = collection.clone();
        let mut outcome = UpdateOutcome::default();

        for (document, matched) in updated.iter_mut().zip(matched) {
            if !matched {
                continue;
            }

            outcome.matched_count += 1;
            if apply_update(document, &update)? {
                outcome.modified_count += 1;
            }
        }

        debug!(
            collection = %self.name,
            matched = outcome.matched_count,
            modified = outcome.modified_count,
            "update_many"
        );

        *collection = updated;
        Ok(outcome)
    }

    async fn delete_many(&self, filter: Document) -> OdmResult<u64> {
        let mut store = self.store.write().await;
        let Some(collection) = store.get_mut(&self.name) else {
            return Ok(0);
        };

        let matched = Self::matching(collection, &filter)?;
        let before = collection.len();

        let mut flags = matched.into_iter();
        collection.retain(|_| !flags.next().unwrap_or(false));

        let deleted = (before - collection.len()) as u64;
        debug!(collection = %self.name, deleted, "delete_many");

        Ok(deleted)
    }

    async fn count_documents(&self, filter: Document) -> OdmResult<u64> {
        let store = self.store.read().await;
        let Some(collection) = store.get(&self.name) else {
            return Ok(0);
        };

        let count = Self::matching(collection, &filter)?
            .into_iter()
            .filter(|matched| *matched)
            .count();

        Ok(count as u64)
    }

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        let store = self.store.read().await;
        let Some(collection) = store.get(&self.name) else {
            return Ok(vec![]);
        };

        let mut values: Vec<Bson> = Vec::new();

        for document in DocumentEvaluator::filter_documents(collection, &filter)? {
            for value in resolve_path(&document, field) {
                let candidates = match value {
                    Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                    value => vec![value],
                };

                for candidate in candidates {
                    let known = values
                        .iter()
                        .any(|known| Comparable::from(known) == Comparable::from(candidate));

                    if !known {
                        values.push(candidate.clone());
                    }
                }
            }
        }

        Ok(values)
    }
}

/// Builder for constructing [`MemoryConnection`] instances.
///
/// ```ignore
/// use docodm_memory::MemoryConnection;
/// use docodm_core::connection::ConnectionRegistry;
///
/// let connections = ConnectionRegistry::new();
/// connections.connect("default", MemoryConnection::builder()).await?;
/// ```
#[derive(Default)]
pub struct MemoryConnectionBuilder {
    seed: Vec<(String, Vec<Document>)>,
}

impl MemoryConnectionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populates a collection with documents, stored as given.
    pub fn seed(mut self, collection: impl Into<String>, documents: Vec<Document>) -> Self {
        self.seed.push((collection.into(), documents));
        self
    }
}

#[async_trait]
impl ConnectionBuilder for MemoryConnectionBuilder {
    type Connection = MemoryConnection;

    /// Builds a new [`MemoryConnection`] holding the seeded collections.
    async fn build(self) -> OdmResult<Self::Connection> {
        let connection = MemoryConnection::new();

        {
            let mut store = connection.store.write().await;
            for (collection, documents) in self.seed {
                store.entry(collection).or_default().extend(documents);
            }
        }

        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn inserts_and_rejects_duplicate_identities() {
        let connection = MemoryConnection::new();
        let prices = connection.collection("prices");

        let ids = prices
            .insert_many(vec![doc! { "value": 1 }, doc! { "_id": 7, "value": 2 }])
            .await
            .unwrap();

        assert!(matches!(ids[0], Bson::ObjectId(_)));
        assert_eq!(ids[1], Bson::Int32(7));

        let err = prices.insert_many(vec![doc! { "_id": 7 }]).await.unwrap_err();
        assert!(matches!(err, OdmError::Backend(_)));
        assert_eq!(prices.count_documents(doc! {}).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn updates_deletes_and_counts() {
        let connection = MemoryConnection::builder()
            .seed("users", vec![doc! { "_id": 1, "age": 20 }, doc! { "_id": 2, "age": 30 }])
            .build()
            .await
            .unwrap();
        let users = connection.collection("users");

        let outcome = users
            .update_many(doc! { "age": { "$gte": 25 } }, doc! { "$inc": { "age": 1 } })
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 1 });

        let rows = users.aggregate(vec![doc! { "$match": { "_id": 2 } }]).await.unwrap();
        assert_eq!(rows, vec![doc! { "_id": 2, "age": 31 }]);

        assert_eq!(users.delete_many(doc! { "age": { "$lt": 25 } }).await.unwrap(), 1);
        assert_eq!(users.count_documents(doc! {}).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let connection = MemoryConnection::new();
        let posts = connection.collection("posts");
        posts
            .insert_many(vec![
                doc! { "tags": ["a", "b"], "draft": false },
                doc! { "tags": ["b", "c"], "draft": false },
                doc! { "tags": ["z"], "draft": true },
            ])
            .await
            .unwrap();

        let tags = posts.distinct("tags", doc! { "draft": false }).await.unwrap();
        assert_eq!(tags, vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    }

    #[tokio::test]
    async fn shutdown_discards_collections() {
        let connection = MemoryConnection::new();
        connection
            .collection("users")
            .insert_many(vec![doc! { "name": "a" }])
            .await
            .unwrap();

        connection.shutdown().await.unwrap();
        assert!(connection.list_collections().await.is_empty());
    }
}
