//! An object-document mapping layer over aggregation-pipeline document stores.
//!
//! This crate is the core of the docodm project and provides:
//!
//! - **Entities and records** ([`entity`]) - The `Entity` trait and storage-shaped records
//! - **Property descriptors** ([`property`]) - Aliases, types, defaults of logical fields
//! - **Relations** ([`relation`]) - Belongs-to / has-one descriptors and their join stages
//! - **Entity schemas** ([`schema`]) - Per-entity metadata, criteria normalization and store access
//! - **Schema registry** ([`registry`]) - Lazily built, shared entity schemas
//! - **Criteria translation** ([`criteria`]) - Flattening nested criteria into dotted paths
//! - **Search options and updates** ([`query`]) - Sorting, pagination, filter helpers, update specs
//! - **Connections** ([`connection`]) - Store traits and the named connection registry
//! - **Entity manager** ([`manager`], [`repository`]) - The outward find/save/insert/update/remove API
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docodm_core::{Entity, EntitySchema, PropertyType, Record};
//!
//! #[derive(Debug, Clone)]
//! pub struct User {
//!     record: Record,
//! }
//!
//! impl Entity for User {
//!     fn entity_name() -> &'static str {
//!         "User"
//!     }
//!
//!     fn describe(schema: &mut EntitySchema) {
//!         schema.set_primary_key("id");
//!         schema.property_schema("name").set_type(PropertyType::String);
//!         schema.property_schema("age").set_type(PropertyType::Int);
//!     }
//!
//!     fn from_record(record: Record) -> Self {
//!         Self { record }
//!     }
//!
//!     fn record(&self) -> &Record {
//!         &self.record
//!     }
//!
//!     fn record_mut(&mut self) -> &mut Record {
//!         &mut self.record
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docodm_core;

pub mod connection;
pub mod criteria;
pub mod entity;
pub mod error;
pub mod manager;
pub mod property;
pub mod query;
pub mod registry;
pub mod relation;
pub mod repository;
pub mod schema;

pub use connection::{
    CollectionHandle, Connection, ConnectionBuilder, ConnectionConfig, ConnectionRegistry,
    UpdateOutcome,
};
pub use entity::{Entity, EntityExt, EntityRef, ID_FIELD, Record};
pub use error::{OdmError, OdmResult};
pub use manager::EntityManager;
pub use property::{PropertySchema, PropertyType};
pub use query::{Filter, SearchOptions, Sort, SortDirection, UpdateSpec};
pub use registry::SchemaRegistry;
pub use relation::{BelongsTo, HasOne, Relation};
pub use repository::Repository;
pub use schema::{EntitySchema, SchemaOptions};
