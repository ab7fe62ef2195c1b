//! Main docodm crate providing a unified interface for mapping entities to a document store.
//!
//! This crate is the primary entry point for users of the docodm framework. It re-exports
//! the mapping layer from `docodm-core` and provides convenient access to the storage
//! backends.
//!
//! # Features
//!
//! - **Declared schemas** - Entities register their properties, aliases, defaults, keys
//!   and relations once, through [`Entity::describe`](entity::Entity::describe)
//! - **Logical criteria** - Queries use logical field names and nested documents; they are
//!   translated to storage aliases and flattened to dotted paths
//! - **Relations** - `BelongsTo` and `HasOne` joins are appended to every search
//! - **Named connections** - Each entity is bound to a named connection and collection
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use docodm::{prelude::*, bson::doc, memory::MemoryConnection};
//!
//! #[derive(Debug, Clone)]
//! pub struct User {
//!     record: Record,
//! }
//!
//! impl Entity for User {
//!     fn entity_name() -> &'static str { "User" }
//!
//!     fn describe(schema: &mut EntitySchema) {
//!         schema.set_primary_key("id");
//!         schema.property_schema("name").set_type(PropertyType::String);
//!         schema.property_schema("age").set_type(PropertyType::Int);
//!     }
//!
//!     fn from_record(record: Record) -> Self { Self { record } }
//!     fn record(&self) -> &Record { &self.record }
//!     fn record_mut(&mut self) -> &mut Record { &mut self.record }
//! }
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let connections = Arc::new(ConnectionRegistry::new());
//!     connections.connect("default", MemoryConnection::builder()).await?;
//!
//!     let manager = EntityManager::new(Arc::new(SchemaRegistry::new()), connections.clone());
//!
//!     manager.insert_one::<User>(doc! { "name": "Alice", "age": 33 }).await?;
//!
//!     let adults = manager
//!         .find::<User>(doc! { "age": { "$gte": 21 } }, Some(SearchOptions::builder().limit(10).build()))
//!         .await?;
//!
//!     println!("Adults: {:?}", adults);
//!
//!     connections.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - In-memory storage for development and testing
//! - [`mongodb`] - MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docodm_core::{
    connection, criteria, entity, error, manager, property, query, registry, relation,
    repository, schema,
};

pub use docodm_core::{
    BelongsTo, CollectionHandle, Connection, ConnectionBuilder, ConnectionConfig,
    ConnectionRegistry, Entity, EntityExt, EntityManager, EntityRef, EntitySchema, Filter,
    HasOne, ID_FIELD, OdmError, OdmResult, PropertySchema, PropertyType, Record, Relation,
    Repository, SchemaOptions, SchemaRegistry, SearchOptions, Sort, SortDirection,
    UpdateOutcome, UpdateSpec,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docodm_memory::{MemoryCollection, MemoryConnection, MemoryConnectionBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docodm_mongodb::{MongoCollection, MongoConnection, MongoConnectionBuilder};
}
