//! Entity definitions and their storage-shaped records.
//!
//! An entity is a Rust type implementing [`Entity`]. It declares its fields once through
//! [`Entity::describe`] and keeps its state in a [`Record`]: a storage-shaped snapshot
//! keyed by storage aliases, plus the identity lifecycle flag and hydrated relations.
//!
//! # Example
//!
//! ```ignore
//! use docodm::prelude::*;
//!
//! #[derive(Debug, Clone)]
//! pub struct Order {
//!     record: Record,
//! }
//!
//! impl Entity for Order {
//!     fn entity_name() -> &'static str {
//!         "Order"
//!     }
//!
//!     fn describe(schema: &mut EntitySchema) {
//!         schema.set_primary_key("id");
//!         schema.property_schema("qty").alias_for("quantity").set_type(PropertyType::Int);
//!         schema.property_schema("something").set_default("Hoho");
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
//!
//! impl Order {
//!     pub fn qty(&self) -> Option<i32> {
//!         self.record.get("qty").ok().flatten()
//!     }
//! }
//! ```

use bson::{
    Bson, DateTime, Document, de::deserialize_from_bson, oid::ObjectId,
    ser::serialize_to_bson,
};
use chrono::Utc;
use indexmap::IndexMap;
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::{
    any::TypeId,
    fmt::{self, Debug},
    sync::Arc,
};
use tracing::debug;

use crate::{error::OdmResult, schema::EntitySchema};

/// Reserved storage name of the identity field.
pub const ID_FIELD: &str = "_id";

/// Core trait every mapped entity implements.
///
/// The trait replaces field-level annotations with an explicit registration function
/// executed once per type, the first time the [`SchemaRegistry`](crate::registry::SchemaRegistry)
/// is asked for the entity's schema.
pub trait Entity: Send + Sync + Sized + 'static {
    /// Name of the entity, used to derive the default collection name.
    fn entity_name() -> &'static str;

    /// Registers properties, keys, relations and options on the schema.
    ///
    /// Registration order is kept: relation joins are emitted in the order they are
    /// registered here.
    fn describe(schema: &mut EntitySchema);

    /// Wraps a hydrated record into the entity type.
    fn from_record(record: Record) -> Self;

    /// Returns the record backing this entity.
    fn record(&self) -> &Record;

    /// Returns the record backing this entity mutably.
    fn record_mut(&mut self) -> &mut Record;
}

/// Lazy reference to an entity definition.
///
/// Relations and foreign keys hold an `EntityRef` instead of a schema so that entities
/// can reference each other in both directions; the target schema is resolved through
/// the registry only when it is needed.
#[derive(Clone, Copy)]
pub struct EntityRef {
    type_id: TypeId,
    name: &'static str,
    describe: fn(&mut EntitySchema),
}

impl EntityRef {
    pub fn of<E: Entity>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::entity_name(),
            describe: E::describe,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn describe(&self, schema: &mut EntitySchema) {
        (self.describe)(schema)
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EntityRef {}

impl Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityRef").field(&self.name).finish()
    }
}

/// Storage-shaped state of one entity instance.
///
/// Values are kept under their storage alias. The logical accessors ([`Record::get`],
/// [`Record::set`], ...) resolve logical field names through the owning schema, so
/// callers never deal with aliases directly.
#[derive(Clone)]
pub struct Record {
    schema: Arc<EntitySchema>,
    origin: Document,
    is_new: bool,
    relations: IndexMap<String, Record>,
}

impl Record {
    pub(crate) fn new(schema: Arc<EntitySchema>, origin: Document, is_new: bool) -> Self {
        Self {
            schema,
            origin,
            is_new,
            relations: IndexMap::new(),
        }
    }

    /// Schema of the entity this record belongs to.
    pub fn schema(&self) -> &Arc<EntitySchema> {
        &self.schema
    }

    /// Storage-shaped snapshot, keyed by storage alias.
    pub fn origin(&self) -> &Document {
        &self.origin
    }

    pub(crate) fn origin_mut(&mut self) -> &mut Document {
        &mut self.origin
    }

    /// True until the record has been persisted or loaded from storage.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Identity value stored under `_id`.
    pub fn id(&self) -> Option<&Bson> {
        self.origin.get(ID_FIELD)
    }

    /// Raw value of a logical field.
    pub fn get_bson(&self, property: &str) -> Option<&Bson> {
        self.origin.get(self.schema.origin_name_of(property))
    }

    /// Deserializes the value of a logical field.
    ///
    /// Returns `Ok(None)` when the field is absent.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the stored value does not fit `T`.
    pub fn get<T: DeserializeOwned>(&self, property: &str) -> OdmResult<Option<T>> {
        self.get_bson(property)
            .map(|value| deserialize_from_bson(value.clone()))
            .transpose()
            .map_err(Into::into)
    }

    /// Reads a timestamp field as a `chrono` value.
    pub fn get_datetime(&self, property: &str) -> Option<chrono::DateTime<Utc>> {
        match self.get_bson(property) {
            Some(Bson::DateTime(value)) => Some(value.to_chrono()),
            _ => None,
        }
    }

    /// Writes the value of a logical field under its storage alias.
    ///
    /// Fields the schema does not declare are ignored, as they would not survive the
    /// next read from the store.
    pub fn set(&mut self, property: &str, value: impl Into<Bson>) -> &mut Self {
        if !self.schema.declares(property) {
            debug!(entity = self.schema.entity_name(), field = property, "ignoring undeclared field");
            return self;
        }

        let origin = self.schema.origin_name_of(property).to_string();
        self.origin.insert(origin, value.into());
        self
    }

    /// Serializes a value into a logical field.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if `value` cannot be represented as BSON.
    pub fn set_value<T: Serialize>(&mut self, property: &str, value: &T) -> OdmResult<&mut Self> {
        let value = serialize_to_bson(value)?;
        Ok(self.set(property, value))
    }

    /// Stores a `chrono` timestamp into a logical field.
    pub fn set_datetime(&mut self, property: &str, value: chrono::DateTime<Utc>) -> &mut Self {
        self.set(property, DateTime::from_chrono(value))
    }

    /// Removes a logical field from the snapshot.
    pub fn unset(&mut self, property: &str) -> Option<Bson> {
        let origin = self.schema.origin_name_of(property).to_string();
        self.origin.remove(&origin)
    }

    /// Related record hydrated under a relation field.
    pub fn related(&self, field: &str) -> Option<&Record> {
        self.relations.get(field)
    }

    /// Related record wrapped into its entity type.
    pub fn related_entity<E: Entity>(&self, field: &str) -> Option<E> {
        self.related(field).cloned().map(E::from_record)
    }

    pub(crate) fn set_related(&mut self, field: &str, related: Option<Record>) {
        match related {
            Some(related) => {
                self.relations.insert(field.to_string(), related);
            }
            None => {
                self.relations.shift_remove(field);
            }
        }
    }

    /// Replaces snapshot, lifecycle flag and relations with those of `source`.
    pub(crate) fn replace_with(&mut self, origin: Document, is_new: bool, relations: IndexMap<String, Record>) {
        self.origin = origin;
        self.is_new = is_new;
        self.relations = relations;
    }

    pub(crate) fn into_parts(self) -> (Document, bool, IndexMap<String, Record>) {
        (self.origin, self.is_new, self.relations)
    }
}

impl Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("entity", &self.schema.entity_name())
            .field("origin", &self.origin)
            .field("is_new", &self.is_new)
            .field("relations", &self.relations)
            .finish()
    }
}

/// Convenience accessors available on every [`Entity`].
pub trait EntityExt: Entity {
    /// True until the entity has been persisted or loaded from storage.
    fn is_new(&self) -> bool;

    /// Identity value of the entity.
    fn id(&self) -> Option<&Bson>;

    /// Identity value when it is an [`ObjectId`].
    fn object_id(&self) -> Option<ObjectId>;

    /// Storage-shaped snapshot as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be serialized.
    fn to_json(&self) -> OdmResult<Value>;
}

impl<E: Entity> EntityExt for E {
    fn is_new(&self) -> bool {
        self.record().is_new()
    }

    fn id(&self) -> Option<&Bson> {
        self.record().id()
    }

    fn object_id(&self) -> Option<ObjectId> {
        self.record().id().and_then(Bson::as_object_id)
    }

    fn to_json(&self) -> OdmResult<Value> {
        Ok(serde_json::to_value(self.record().origin())?)
    }
}
