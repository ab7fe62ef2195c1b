//! In-memory document store backend for docodm.
//!
//! This crate provides a thread-safe, in-memory implementation of the `Connection` and
//! `CollectionHandle` traits. It evaluates the aggregation pipelines the mapping layer
//! emits and is ideal for development and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using an async-aware RwLock
//! - **Match filters** - Dotted paths, comparison, membership, regex, `$elemMatch` and logical operators
//! - **Pipelines** - `$match`, `$sort`, `$skip`, `$limit`, `$lookup`, `$addFields`, `$project`
//! - **Bulk writes** - `$set`, `$unset` and `$inc` updates, filtered deletes
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use bson::doc;
//! use docodm_core::{ConnectionRegistry, EntityManager, SchemaRegistry};
//! use docodm_memory::MemoryConnection;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connections = Arc::new(ConnectionRegistry::new());
//!     connections.connect("default", MemoryConnection::builder()).await?;
//!
//!     let manager = EntityManager::new(Arc::new(SchemaRegistry::new()), connections);
//!     let user = manager.insert_one::<User>(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docodm_memory;

pub mod evaluator;
pub mod pipeline;
pub mod store;
pub mod update;

pub use store::{MemoryCollection, MemoryConnection, MemoryConnectionBuilder};
