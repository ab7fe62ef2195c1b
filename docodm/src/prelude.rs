//! Convenient re-exports of commonly used types from docodm.
//!
//! ```ignore
//! use docodm::prelude::*;
//! ```

pub use docodm_core::{
    connection::{CollectionHandle, Connection, ConnectionBuilder, ConnectionConfig, ConnectionRegistry, UpdateOutcome},
    entity::{Entity, EntityExt, EntityRef, Record, ID_FIELD},
    error::{OdmError, OdmResult},
    manager::EntityManager,
    property::{PropertySchema, PropertyType},
    query::{Filter, SearchOptions, Sort, SortDirection, UpdateSpec},
    registry::SchemaRegistry,
    relation::{BelongsTo, HasOne, Relation},
    repository::Repository,
    schema::{EntitySchema, SchemaOptions},
};
