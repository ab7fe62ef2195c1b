//! Per-entity schema: field mapping, criteria normalization, snapshots and store access.
//!
//! An [`EntitySchema`] is built once per entity type by [`Entity::describe`](crate::entity::Entity::describe)
//! and then shared immutably through the [`SchemaRegistry`](crate::registry::SchemaRegistry).
//! It owns everything that depends on the mapping between logical field names and
//! storage aliases:
//!
//! - registration of properties, primary/foreign keys, relations and options
//! - conversion of logical criteria into alias-keyed, flattened match filters
//! - construction, hydration and snapshotting of [`Record`]s
//! - the database-facing operations (search, insert, update, remove, aggregate, count,
//!   distinct) against a [`CollectionHandle`]

use bson::{Bson, Document, doc, oid::ObjectId};
use convert_case::{Case, Casing};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{any::TypeId, collections::HashMap, fmt, sync::Arc};
use tracing::debug;

use crate::{
    connection::{CollectionHandle, UpdateOutcome},
    criteria::{flatten_criteria, is_logical_operator},
    entity::{Entity, EntityRef, ID_FIELD, Record},
    error::{OdmError, OdmResult},
    property::{PropertySchema, PropertyType},
    registry::SchemaRegistry,
    relation::{BelongsTo, HasOne, Relation},
};

/// Name of the connection used when an entity does not configure one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Overrides for the collection and connection an entity is bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaOptions {
    /// Collection name, derived from the entity name when unset.
    #[serde(default)]
    pub collection: Option<String>,
    /// Connection name, `"default"` when unset.
    #[serde(default)]
    pub connection: Option<String>,
}

impl SchemaOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn connection(mut self, connection: impl Into<String>) -> Self {
        self.connection = Some(connection.into());
        self
    }
}

/// Derives the default collection name of an entity: camel case, pluralized with a
/// trailing `s` unless the name already ends with one.
pub fn derive_collection_name(entity_name: &str) -> String {
    let collection = entity_name.to_case(Case::Camel);

    if collection.ends_with('s') {
        collection
    } else {
        format!("{collection}s")
    }
}

/// Registry of the metadata of one entity type.
pub struct EntitySchema {
    entity: EntityRef,
    primary_key: Option<String>,
    properties: IndexMap<String, PropertySchema>,
    relations: IndexMap<String, Box<dyn Relation>>,
    foreign_keys: HashMap<TypeId, (EntityRef, String)>,
    collection: String,
    connection: String,
}

impl EntitySchema {
    /// Creates an empty schema bound to the default collection and connection.
    pub fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            primary_key: None,
            properties: IndexMap::new(),
            relations: IndexMap::new(),
            foreign_keys: HashMap::new(),
            collection: derive_collection_name(entity.name()),
            connection: DEFAULT_CONNECTION.to_string(),
        }
    }

    /// Returns the descriptor of a logical field, creating it on first access.
    pub fn property_schema(&mut self, property: &str) -> &mut PropertySchema {
        self.properties
            .entry(property.to_string())
            .or_insert_with(|| PropertySchema::new(property))
    }

    /// Designates a property as primary key, stored under `_id`.
    ///
    /// Untyped primary keys are typed as [`PropertyType::ObjectId`].
    pub fn set_primary_key(&mut self, property: &str) -> &mut PropertySchema {
        self.primary_key = Some(property.to_string());

        let schema = self.property_schema(property);
        if schema.ty() == &PropertyType::Any {
            schema.set_type(PropertyType::ObjectId);
        }
        schema.alias_for(ID_FIELD)
    }

    /// Designates a property as the foreign key referencing `target`'s primary key.
    pub fn set_foreign_key(&mut self, target: EntityRef, property: &str) -> &mut PropertySchema {
        self.foreign_keys
            .insert(target.type_id(), (target, property.to_string()));
        self.property_schema(property)
    }

    /// Typed shorthand for [`EntitySchema::set_foreign_key`].
    pub fn foreign_key<E: Entity>(&mut self, property: &str) -> &mut PropertySchema {
        self.set_foreign_key(EntityRef::of::<E>(), property)
    }

    /// Registers a relation under a field. A later registration under the same field
    /// replaces the earlier one.
    pub fn register_relation(&mut self, field: &str, relation: impl Relation + 'static) -> &mut Self {
        self.relations.insert(field.to_string(), Box::new(relation));
        self
    }

    /// Registers a [`BelongsTo`] relation to `E`.
    pub fn belongs_to<E: Entity>(&mut self, field: &str) -> &mut Self {
        self.register_relation(field, BelongsTo::new(EntityRef::of::<E>()))
    }

    /// Registers a [`HasOne`] relation to `E`.
    pub fn has_one<E: Entity>(&mut self, field: &str) -> &mut Self {
        self.register_relation(field, HasOne::new(EntityRef::of::<E>()))
    }

    /// Applies collection/connection overrides.
    pub fn merge_options(&mut self, options: SchemaOptions) -> &mut Self {
        if let Some(collection) = options.collection {
            self.collection = collection;
        }
        if let Some(connection) = options.connection {
            self.connection = connection;
        }
        self
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn entity_name(&self) -> &'static str {
        self.entity.name()
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary_key.is_some()
    }

    /// Storage name of the primary key, `_id` when none is declared.
    pub fn primary_key_origin(&self) -> &str {
        self.primary_key
            .as_deref()
            .and_then(|property| self.properties.get(property))
            .map(PropertySchema::origin_name)
            .unwrap_or(ID_FIELD)
    }

    /// Logical name of the primary key, `_id` when none is declared.
    pub fn id_property(&self) -> &str {
        self.primary_key.as_deref().unwrap_or(ID_FIELD)
    }

    pub fn foreign_key_schema_for(&self, target: &EntityRef) -> Option<&PropertySchema> {
        self.foreign_keys
            .get(&target.type_id())
            .and_then(|(_, property)| self.properties.get(property))
    }

    pub fn has_foreign_key_for(&self, target: &EntityRef) -> bool {
        self.foreign_key_schema_for(target).is_some()
    }

    /// Storage name of the foreign key referencing `target`, `_id` when none is declared.
    pub fn foreign_key_origin_for(&self, target: &EntityRef) -> &str {
        self.foreign_key_schema_for(target)
            .map(PropertySchema::origin_name)
            .unwrap_or(ID_FIELD)
    }

    /// True for declared properties and the identity field.
    pub fn declares(&self, property: &str) -> bool {
        property == ID_FIELD || self.properties.contains_key(property)
    }

    pub fn property(&self, property: &str) -> Option<&PropertySchema> {
        self.properties.get(property)
    }

    pub fn properties(&self) -> impl Iterator<Item = &PropertySchema> {
        self.properties.values()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &dyn Relation)> {
        self.relations
            .iter()
            .map(|(field, relation)| (field.as_str(), relation.as_ref()))
    }

    /// Storage name of a logical field. Undeclared names are returned unchanged.
    pub fn origin_name_of<'a>(&'a self, property: &'a str) -> &'a str {
        self.properties
            .get(property)
            .map(PropertySchema::origin_name)
            .unwrap_or(property)
    }

    /// Storage path of a possibly dotted logical path. Only the first segment names a
    /// property.
    pub fn origin_path_of(&self, path: &str) -> String {
        match path.split_once('.') {
            Some((head, tail)) => format!("{}.{}", self.origin_name_of(head), tail),
            None => self.origin_name_of(path).to_string(),
        }
    }

    /// Rejects schemas in which two properties share a storage name.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`] naming the duplicated storage name.
    pub fn validate_aliases(&self) -> OdmResult<()> {
        let mut seen: HashMap<&str, &str> = HashMap::new();

        for schema in self.properties.values() {
            if let Some(previous) = seen.insert(schema.origin_name(), schema.property_name()) {
                return Err(OdmError::InvalidSchema(format!(
                    "{}: properties '{}' and '{}' are both stored as '{}'",
                    self.entity_name(),
                    previous,
                    schema.property_name(),
                    schema.origin_name(),
                )));
            }
        }

        Ok(())
    }

    /// Rejects relations whose keys are not declared on both sides.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`] naming the first invalid relation, or the
    /// error raised while building a related schema.
    pub fn validate_relations(&self, registry: &SchemaRegistry) -> OdmResult<()> {
        for (field, relation) in self.relations() {
            registry.schema_for_ref(&relation.target())?;

            if !relation.is_valid(self, registry) {
                return Err(OdmError::InvalidSchema(format!(
                    "{}.{}: relation to {} requires primary keys on both sides and a registered foreign key",
                    self.entity_name(),
                    field,
                    relation.target().name(),
                )));
            }
        }

        Ok(())
    }

    /// Keeps the declared properties of a storage-shaped document, filling in defaults
    /// for the missing ones, and carries the identity over.
    pub fn prepare_origin(&self, data: &Document) -> Document {
        let mut origin = Document::new();

        if let Some(id) = data.get(ID_FIELD) {
            origin.insert(ID_FIELD, id.clone());
        }

        for schema in self.properties.values() {
            let name = schema.origin_name();

            match data.get(name).or(schema.default_value()) {
                Some(value) => {
                    origin.insert(name, value.clone());
                }
                None => continue,
            }
        }

        origin
    }

    /// Builds a stored record from a storage-shaped row, hydrating joined relations.
    ///
    /// # Errors
    ///
    /// Returns an error if a related schema cannot be resolved.
    pub fn hydrate(self: &Arc<Self>, registry: &SchemaRegistry, data: Document) -> OdmResult<Record> {
        let mut record = Record::new(self.clone(), self.prepare_origin(&data), false);

        for (field, relation) in self.relations() {
            if let Some(raw) = data.get(field) {
                record.set_related(field, relation.map_foreign(raw, registry, true)?);
            }
        }

        Ok(record)
    }

    /// Builds a new record from a partial keyed by logical names.
    ///
    /// The record is new unless the partial carries an identity. Defaults are applied
    /// only to fields the partial leaves out, so explicit values always win.
    ///
    /// # Errors
    ///
    /// Returns an error if a related schema cannot be resolved.
    pub fn create(self: &Arc<Self>, registry: &SchemaRegistry, partial: Document) -> OdmResult<Record> {
        let is_new = !partial.contains_key(self.id_property()) && !partial.contains_key(ID_FIELD);
        let mut record = Record::new(self.clone(), Document::new(), is_new);

        self.assign(&mut record, [partial.clone()]);
        self.apply_defaults(record.origin_mut());

        for (field, relation) in self.relations() {
            if let Some(raw) = partial.get(field) {
                record.set_related(field, relation.map_foreign(raw, registry, false)?);
            }
        }

        Ok(record)
    }

    fn apply_defaults(&self, origin: &mut Document) {
        for schema in self.properties.values() {
            if let Some(default) = schema.default_value() {
                if !origin.contains_key(schema.origin_name()) {
                    origin.insert(schema.origin_name(), default.clone());
                }
            }
        }
    }

    /// Deep-merges logical-keyed partials into the record and guarantees an identity.
    ///
    /// Keys are translated to storage aliases; relation fields and undeclared keys are
    /// skipped. Identity strings on identity-typed fields are parsed when well formed.
    pub fn assign(&self, record: &mut Record, partials: impl IntoIterator<Item = Document>) {
        let origin = record.origin_mut();

        for partial in partials {
            for (key, value) in partial {
                if self.relations.contains_key(&key) {
                    continue;
                }

                let (name, value) = match self.properties.get(&key) {
                    Some(schema) => (schema.origin_name().to_string(), coerce_identity(schema, value)),
                    None if key == ID_FIELD => (key, value),
                    None => {
                        debug!(entity = self.entity_name(), field = %key, "skipping undeclared field");
                        continue;
                    }
                };

                deep_merge(origin, name, value);
            }
        }

        if !origin.contains_key(ID_FIELD) {
            origin.insert(ID_FIELD, ObjectId::new());
        }
    }

    /// Storage-shaped snapshot of the record's fields, without the identity.
    pub fn get_origin(&self, record: &Record) -> Document {
        record
            .origin()
            .iter()
            .filter(|(key, _)| key.as_str() != ID_FIELD)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// Document written on insert: identity first, then the snapshot.
    pub fn storage_document(&self, record: &Record) -> Document {
        let mut document = Document::new();

        if let Some(id) = record.id() {
            document.insert(ID_FIELD, id.clone());
        }
        document.extend(self.get_origin(record));
        document
    }

    /// Replaces the record's snapshot, lifecycle flag and relations with those of a
    /// freshly read `source`, keeping the record instance itself.
    pub fn replace_origin(&self, record: &mut Record, source: Record) {
        let (origin, is_new, relations) = source.into_parts();
        record.replace_with(self.prepare_origin(&origin), is_new, relations);
    }

    pub fn is_new(&self, record: &Record) -> bool {
        record.is_new()
    }

    /// Identity of the record, with hex strings turned into [`ObjectId`]s.
    pub fn id_of(&self, record: &Record) -> Option<Bson> {
        record.id().map(|id| match id {
            Bson::String(raw) => ObjectId::parse_str(raw)
                .map(Bson::ObjectId)
                .unwrap_or_else(|_| id.clone()),
            _ => id.clone(),
        })
    }

    /// Criteria selecting exactly this record.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidCriteria`] if the record has no identity.
    pub fn target_criteria(&self, record: &Record) -> OdmResult<Document> {
        self.id_of(record)
            .map(|id| doc! { ID_FIELD: id })
            .ok_or_else(|| {
                OdmError::InvalidCriteria(format!("{} record has no identity", self.entity_name()))
            })
    }

    /// Coerces identity strings and rewrites logical keys to storage aliases.
    ///
    /// Only the first segment of a dotted key names a property; the rest of the path is
    /// kept as given.
    pub fn prepare_search_criteria(&self, criteria: Document) -> Document {
        criteria
            .into_iter()
            .map(|(key, value)| {
                let (head, tail) = match key.split_once('.') {
                    Some((head, tail)) => (head, Some(tail)),
                    None => (key.as_str(), None),
                };

                let Some(schema) = self.property(head).or_else(|| self.property_by_origin(head)) else {
                    return (key, value);
                };

                match tail {
                    Some(tail) => (format!("{}.{}", schema.origin_name(), tail), value),
                    None => (schema.origin_name().to_string(), schema.coerce_criterion(value)),
                }
            })
            .collect()
    }

    fn property_by_origin(&self, origin: &str) -> Option<&PropertySchema> {
        self.properties
            .values()
            .find(|schema| schema.origin_name() == origin)
    }

    /// Translates logical criteria into a flat, alias-keyed match filter.
    ///
    /// Top-level `$and`, `$or` and `$nor` hold arrays of sub-criteria, each translated
    /// on its own.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidCriteria`] if a logical operator does not hold an
    /// array of documents.
    pub fn match_filter(&self, criteria: Document) -> OdmResult<Document> {
        let mut fields = Document::new();
        let mut logical = Document::new();

        for (key, value) in criteria {
            if !is_logical_operator(&key) {
                fields.insert(key, value);
                continue;
            }

            let Bson::Array(branches) = value else {
                return Err(OdmError::InvalidCriteria(format!("{key} expects an array of criteria")));
            };

            let branches = branches
                .into_iter()
                .map(|branch| match branch {
                    Bson::Document(branch) => self.match_filter(branch).map(Bson::Document),
                    _ => Err(OdmError::InvalidCriteria(format!("{key} expects an array of criteria"))),
                })
                .collect::<OdmResult<Vec<Bson>>>()?;

            logical.insert(key, branches);
        }

        let mut filter = flatten_criteria(&self.prepare_search_criteria(fields));
        filter.extend(logical);
        Ok(filter)
    }

    /// Join stages of every relation, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`] if a relation is invalid.
    pub fn make_relations_pipe(&self, registry: &SchemaRegistry) -> OdmResult<Vec<Document>> {
        self.validate_relations(registry)?;

        let mut pipeline = Vec::new();
        for (field, relation) in self.relations() {
            pipeline.extend(relation.pipeline(self, field, registry)?);
        }

        Ok(pipeline)
    }

    /// Runs `pipeline` followed by the relation joins and hydrates every row.
    pub async fn search(
        self: &Arc<Self>,
        collection: &dyn CollectionHandle,
        registry: &SchemaRegistry,
        mut pipeline: Vec<Document>,
    ) -> OdmResult<Vec<Record>> {
        pipeline.extend(self.make_relations_pipe(registry)?);

        debug!(entity = self.entity_name(), collection = collection.name(), stages = pipeline.len(), "search");

        self.aggregate(collection, pipeline)
            .await?
            .into_iter()
            .map(|row| self.hydrate(registry, row))
            .collect()
    }

    /// Runs a raw aggregation pipeline.
    pub async fn aggregate(
        &self,
        collection: &dyn CollectionHandle,
        pipeline: Vec<Document>,
    ) -> OdmResult<Vec<Document>> {
        collection.aggregate(pipeline).await
    }

    pub async fn count(&self, collection: &dyn CollectionHandle, criteria: Document) -> OdmResult<u64> {
        collection.count_documents(self.match_filter(criteria)?).await
    }

    /// Distinct values of a logical field among the records matching `criteria`.
    pub async fn distinct(
        &self,
        collection: &dyn CollectionHandle,
        field: &str,
        criteria: Option<Document>,
    ) -> OdmResult<Vec<Bson>> {
        let filter = match criteria {
            Some(criteria) => self.match_filter(criteria)?,
            None => Document::new(),
        };

        collection.distinct(&self.origin_path_of(field), filter).await
    }

    /// Bulk update with an already normalized filter and update document.
    pub async fn update(
        &self,
        collection: &dyn CollectionHandle,
        filter: Document,
        update: Document,
    ) -> OdmResult<UpdateOutcome> {
        debug!(entity = self.entity_name(), collection = collection.name(), "update");

        collection.update_many(filter, update).await
    }

    /// Inserts the records, then reads them back by their identities so the returned
    /// records reflect what the store holds. The returned order follows the input.
    pub async fn insert(
        self: &Arc<Self>,
        collection: &dyn CollectionHandle,
        registry: &SchemaRegistry,
        records: Vec<Record>,
    ) -> OdmResult<Vec<Record>> {
        let documents = records
            .iter()
            .map(|record| self.storage_document(record))
            .collect::<Vec<_>>();

        debug!(entity = self.entity_name(), collection = collection.name(), count = documents.len(), "insert");

        let ids = collection.insert_many(documents).await?;
        let mut inserted = self
            .search(
                collection,
                registry,
                vec![doc! { "$match": { ID_FIELD: { "$in": ids.clone() } } }],
            )
            .await?;

        inserted.sort_by_key(|record| {
            record
                .id()
                .and_then(|id| ids.iter().position(|candidate| candidate == id))
                .unwrap_or(usize::MAX)
        });

        Ok(inserted)
    }

    /// Bulk delete with an already normalized filter.
    pub async fn remove(&self, collection: &dyn CollectionHandle, filter: Document) -> OdmResult<u64> {
        debug!(entity = self.entity_name(), collection = collection.name(), "remove");

        collection.delete_many(filter).await
    }
}

impl fmt::Debug for EntitySchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntitySchema")
            .field("entity", &self.entity)
            .field("primary_key", &self.primary_key)
            .field("properties", &self.properties)
            .field("relations", &self.relations)
            .field("collection", &self.collection)
            .field("connection", &self.connection)
            .finish()
    }
}

fn coerce_identity(schema: &PropertySchema, value: Bson) -> Bson {
    match (schema.ty(), value) {
        (PropertyType::ObjectId, Bson::String(raw)) => match ObjectId::parse_str(&raw) {
            Ok(id) => Bson::ObjectId(id),
            Err(_) => Bson::String(raw),
        },
        (_, value) => value,
    }
}

fn deep_merge(target: &mut Document, key: String, value: Bson) {
    match (target.get_mut(&key), value) {
        (Some(Bson::Document(existing)), Bson::Document(incoming)) => {
            for (nested_key, nested_value) in incoming {
                deep_merge(existing, nested_key, nested_value);
            }
        }
        (_, value) => {
            target.insert(key, value);
        }
    }
}
