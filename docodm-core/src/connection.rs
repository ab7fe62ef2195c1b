//! Store connections and the registry resolving them by name.
//!
//! The mapping layer never talks to a database driver directly. Every entity schema is
//! bound to a connection name (`"default"` unless configured otherwise), and the
//! [`ConnectionRegistry`] hands out the [`CollectionHandle`] of the entity's collection
//! on that connection.
//!
//! # Traits
//!
//! - [`CollectionHandle`]: the collection-level operations the mapper relies on
//! - [`Connection`]: a live connection handing out collection handles
//! - [`ConnectionBuilder`]: factory trait for creating connections asynchronously
//!
//! # Example
//!
//! ```ignore
//! use docodm::prelude::*;
//! use docodm::memory::MemoryConnectionBuilder;
//!
//! let connections = ConnectionRegistry::new();
//! connections.connect("default", MemoryConnectionBuilder::new()).await?;
//!
//! let users = connections.collection_for(&registry.schema_for::<User>()?)?;
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use indexmap::IndexMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, sync::Arc};
use tracing::info;

use crate::{
    error::{OdmError, OdmResult},
    schema::{DEFAULT_CONNECTION, EntitySchema},
};

/// Counts reported by a bulk update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOutcome {
    /// Number of documents selected by the filter.
    pub matched_count: u64,
    /// Number of documents actually changed.
    pub modified_count: u64,
}

/// Operations on a single collection of a store.
///
/// Filters and update documents reaching this trait are already translated to storage
/// names and flattened; implementations apply them as the store's query language
/// defines them.
///
/// # Thread Safety
///
/// Handles are shared between tasks behind an `Arc` and must support concurrent use.
#[async_trait]
pub trait CollectionHandle: Send + Sync + Debug {
    /// Name of the collection.
    fn name(&self) -> &str;

    /// Runs an aggregation pipeline and collects every resulting document.
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Ordered stages (`$match`, `$sort`, `$skip`, `$limit`, `$lookup`,
    ///   `$addFields`, `$project`, ...)
    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>>;

    /// Inserts documents and returns their identities in input order.
    ///
    /// # Arguments
    ///
    /// * `documents` - Storage-shaped documents; an `_id` is assigned when missing
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Backend`] if an identity is already taken.
    async fn insert_many(&self, documents: Vec<Document>) -> OdmResult<Vec<Bson>>;

    /// Applies an update document to every document matching `filter`.
    ///
    /// # Arguments
    ///
    /// * `filter` - Match filter
    /// * `update` - Operator update (`$set`, `$inc`, `$unset`)
    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<UpdateOutcome>;

    /// Deletes every document matching `filter` and returns how many were removed.
    async fn delete_many(&self, filter: Document) -> OdmResult<u64>;

    /// Counts the documents matching `filter`.
    async fn count_documents(&self, filter: Document) -> OdmResult<u64>;

    /// Distinct values of a storage field among the documents matching `filter`.
    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>>;
}

/// A live connection to a store.
#[async_trait]
pub trait Connection: Send + Sync + Debug {
    /// Handle of the named collection. Collections are created on first write.
    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle>;

    /// Releases the resources held by the connection.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(&self) -> OdmResult<()> {
        Ok(())
    }
}

/// Factory for a [`Connection`].
#[async_trait]
pub trait ConnectionBuilder: Send {
    type Connection: Connection + 'static;

    async fn build(self) -> OdmResult<Self::Connection>;
}

fn default_connection_name() -> String {
    DEFAULT_CONNECTION.to_string()
}

/// Serializable description of a named connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Name entities refer to, `"default"` when omitted.
    #[serde(default = "default_connection_name")]
    pub name: String,
    /// Store URI, e.g. `mongodb://localhost:27017`.
    pub uri: String,
    /// Database name; falls back to the one named in the URI.
    #[serde(default)]
    pub database: Option<String>,
}

impl ConnectionConfig {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            name: default_connection_name(),
            uri: uri.into(),
            database: None,
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }
}

/// Named connections shared by every entity manager.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: RwLock<IndexMap<String, Arc<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an already built connection, replacing any previous one of that name.
    pub fn register(&self, name: impl Into<String>, connection: impl Connection + 'static) -> Arc<dyn Connection> {
        let name = name.into();
        let connection: Arc<dyn Connection> = Arc::new(connection);

        info!(connection = %name, "registered connection");
        self.connections.write().insert(name, connection.clone());
        connection
    }

    /// Builds a connection and registers it under `name`.
    ///
    /// # Errors
    ///
    /// Returns the builder's error if the connection cannot be established.
    pub async fn connect<B: ConnectionBuilder>(
        &self,
        name: impl Into<String>,
        builder: B,
    ) -> OdmResult<Arc<dyn Connection>> {
        let connection = builder.build().await?;
        Ok(self.register(name, connection))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.read().get(name).cloned()
    }

    /// Names of the registered connections, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.connections.read().keys().cloned().collect()
    }

    /// Unregisters a connection without shutting it down.
    pub fn remove(&self, name: &str) -> Option<Arc<dyn Connection>> {
        self.connections.write().shift_remove(name)
    }

    /// Connection the schema is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionNotFound`] if no connection of that name exists.
    pub fn connection_for(&self, schema: &EntitySchema) -> OdmResult<Arc<dyn Connection>> {
        self.get(schema.connection_name())
            .ok_or_else(|| OdmError::ConnectionNotFound {
                entity: schema.entity_name().to_string(),
                connection: schema.connection_name().to_string(),
            })
    }

    /// Collection the schema is stored in, on the connection it is bound to.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionNotFound`] if no connection of that name exists.
    pub fn collection_for(&self, schema: &EntitySchema) -> OdmResult<Arc<dyn CollectionHandle>> {
        Ok(self
            .connection_for(schema)?
            .collection(schema.collection_name()))
    }

    /// Unregisters and shuts down every connection.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown error; the remaining connections are still shut down.
    pub async fn shutdown(&self) -> OdmResult<()> {
        let connections = std::mem::take(&mut *self.connections.write());
        let mut result = Ok(());

        for (name, connection) in connections {
            info!(connection = %name, "shutting down connection");

            if let Err(err) = connection.shutdown().await {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }

        result
    }
}
