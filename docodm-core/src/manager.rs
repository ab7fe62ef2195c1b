//! The entity manager: the outward entry point of the mapping layer.
//!
//! An [`EntityManager`] combines a [`SchemaRegistry`] with a [`ConnectionRegistry`].
//! For every call it resolves the entity's schema, normalizes the criteria through it,
//! appends relation joins, runs the pipeline on the entity's collection and hydrates
//! the rows back into entities.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use bson::doc;
//! use docodm::prelude::*;
//!
//! let manager = EntityManager::new(Arc::new(SchemaRegistry::new()), connections);
//!
//! let mut order = manager.create::<Order>(doc! { "qty": 2 })?;
//! manager.save(&mut order).await?;
//!
//! let adults = manager.find::<User>(doc! { "age": { "$gte": 21 } }, None).await?;
//! ```

use bson::{Bson, Document, doc, oid::ObjectId};
use std::sync::Arc;
use tracing::debug;

use crate::{
    connection::{CollectionHandle, ConnectionRegistry, UpdateOutcome},
    entity::{Entity, ID_FIELD},
    error::{OdmError, OdmResult},
    query::{SearchOptions, UpdateSpec},
    registry::SchemaRegistry,
    repository::Repository,
    schema::EntitySchema,
};

/// Coordinates schemas and connections for entity operations.
///
/// Cloning is cheap: both registries are shared.
#[derive(Debug, Clone)]
pub struct EntityManager {
    schemas: Arc<SchemaRegistry>,
    connections: Arc<ConnectionRegistry>,
}

impl EntityManager {
    pub fn new(schemas: Arc<SchemaRegistry>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            schemas,
            connections,
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaRegistry> {
        &self.schemas
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Schema of `E`, built on first use.
    pub fn schema_for<E: Entity>(&self) -> OdmResult<Arc<EntitySchema>> {
        self.schemas.schema_for::<E>()
    }

    /// Repository scoped to `E`.
    pub fn repository<E: Entity>(&self) -> Repository<'_, E> {
        Repository::new(self)
    }

    fn resolve<E: Entity>(&self) -> OdmResult<(Arc<EntitySchema>, Arc<dyn CollectionHandle>)> {
        let schema = self.schemas.schema_for::<E>()?;
        let collection = self.connections.collection_for(&schema)?;

        Ok((schema, collection))
    }

    fn search_pipeline(
        schema: &EntitySchema,
        criteria: Document,
        options: &SearchOptions,
    ) -> OdmResult<Vec<Document>> {
        let filter = schema.match_filter(criteria)?;
        let mut pipeline = Vec::new();

        if !filter.is_empty() {
            pipeline.push(doc! { "$match": filter });
        }
        pipeline.extend(options.to_pipeline(schema));

        Ok(pipeline)
    }

    /// Builds a new, unsaved entity from a partial keyed by logical field names.
    ///
    /// Declared defaults fill the fields the partial leaves out and an `_id` is
    /// generated. Nested documents under relation fields become related records.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`] if the schema or a related schema is inconsistent.
    pub fn create<E: Entity>(&self, partial: Document) -> OdmResult<E> {
        let schema = self.schemas.schema_for::<E>()?;
        let record = schema.create(&self.schemas, partial)?;

        Ok(E::from_record(record))
    }

    /// Deep-merges logical-keyed partials into an entity.
    pub fn merge<E: Entity>(
        &self,
        entity: &mut E,
        partials: impl IntoIterator<Item = Document>,
    ) -> OdmResult<()> {
        let schema = self.schemas.schema_for::<E>()?;
        schema.assign(entity.record_mut(), partials);

        Ok(())
    }

    /// True until the entity has been persisted or loaded from storage.
    pub fn is_new<E: Entity>(&self, entity: &E) -> bool {
        entity.record().is_new()
    }

    /// Entities matching `criteria`, with related entities joined in.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Logical-keyed criteria; an empty document matches everything
    /// * `options` - Optional sort and pagination
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConnectionNotFound`] if the entity's connection is not
    /// registered, or the store's error.
    pub async fn find<E: Entity>(
        &self,
        criteria: Document,
        options: Option<SearchOptions>,
    ) -> OdmResult<Vec<E>> {
        let (schema, collection) = self.resolve::<E>()?;
        let pipeline = Self::search_pipeline(&schema, criteria, &options.unwrap_or_default())?;

        debug!(entity = schema.entity_name(), "find");

        let records = schema
            .search(collection.as_ref(), &self.schemas, pipeline)
            .await?;

        Ok(records.into_iter().map(E::from_record).collect())
    }

    /// First entity matching `criteria`.
    pub async fn find_one<E: Entity>(
        &self,
        criteria: Document,
        options: Option<SearchOptions>,
    ) -> OdmResult<Option<E>> {
        let options = SearchOptions {
            limit: Some(1),
            ..options.unwrap_or_default()
        };

        Ok(self.find(criteria, Some(options)).await?.into_iter().next())
    }

    /// First entity matching `criteria`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::NotFound`] carrying the criteria and options if nothing matches.
    pub async fn find_one_or_fail<E: Entity>(
        &self,
        criteria: Document,
        options: Option<SearchOptions>,
    ) -> OdmResult<E> {
        let reported = (criteria.clone(), options.clone().unwrap_or_default().to_document());

        self.find_one(criteria, options)
            .await?
            .ok_or_else(|| OdmError::not_found(E::entity_name(), reported.0, reported.1))
    }

    fn id_criteria<E: Entity>(&self, id: Bson) -> OdmResult<Document> {
        let schema = self.schemas.schema_for::<E>()?;
        let id = match (schema.property(schema.id_property()), id) {
            (None, Bson::String(raw)) => ObjectId::parse_str(&raw)
                .map(Bson::ObjectId)
                .unwrap_or(Bson::String(raw)),
            (_, id) => id,
        };

        let mut criteria = Document::new();
        criteria.insert(schema.id_property(), id);

        Ok(criteria)
    }

    /// Entity stored under `id`.
    ///
    /// Identity strings are parsed when the primary key is identity-typed; a malformed
    /// string matches nothing.
    pub async fn find_by_id<E: Entity>(&self, id: impl Into<Bson>) -> OdmResult<Option<E>> {
        let criteria = self.id_criteria::<E>(id.into())?;
        self.find_one(criteria, None).await
    }

    /// Entity stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::NotFound`] if nothing is stored under `id`.
    pub async fn find_by_id_or_fail<E: Entity>(&self, id: impl Into<Bson>) -> OdmResult<E> {
        let criteria = self.id_criteria::<E>(id.into())?;
        self.find_one_or_fail(criteria, None).await
    }

    /// One page of entities and the total number matching `criteria`.
    pub async fn find_and_count<E: Entity>(
        &self,
        criteria: Document,
        options: Option<SearchOptions>,
    ) -> OdmResult<(Vec<E>, u64)> {
        let total = self.count::<E>(criteria.clone()).await?;
        let entities = self.find(criteria, options).await?;

        Ok((entities, total))
    }

    /// Number of entities matching `criteria`.
    pub async fn count<E: Entity>(&self, criteria: Document) -> OdmResult<u64> {
        let (schema, collection) = self.resolve::<E>()?;
        schema.count(collection.as_ref(), criteria).await
    }

    /// Distinct values of a logical field among the entities matching `criteria`.
    pub async fn distinct<E: Entity>(
        &self,
        field: &str,
        criteria: Option<Document>,
    ) -> OdmResult<Vec<Bson>> {
        let (schema, collection) = self.resolve::<E>()?;
        schema.distinct(collection.as_ref(), field, criteria).await
    }

    /// Persists an entity: inserted when new, otherwise its snapshot is written with
    /// `$set`. Either way the entity is then refreshed from what the store holds.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::NotFound`] if the entity cannot be read back.
    pub async fn save<E: Entity>(&self, entity: &mut E) -> OdmResult<()> {
        let (schema, collection) = self.resolve::<E>()?;
        let record = entity.record();

        let stored = if record.is_new() {
            debug!(entity = schema.entity_name(), "save: insert");

            schema
                .insert(collection.as_ref(), &self.schemas, vec![record.clone()])
                .await?
                .into_iter()
                .next()
        } else {
            debug!(entity = schema.entity_name(), "save: update");

            let filter = schema.target_criteria(record)?;
            let fields = schema.get_origin(record);

            if !fields.is_empty() {
                schema
                    .update(collection.as_ref(), filter.clone(), doc! { "$set": fields })
                    .await?;
            }

            schema
                .search(collection.as_ref(), &self.schemas, vec![doc! { "$match": filter }])
                .await?
                .into_iter()
                .next()
        };

        let stored = stored.ok_or_else(|| self.lost::<E>(&schema, entity))?;
        schema.replace_origin(entity.record_mut(), stored);

        Ok(())
    }

    /// Refreshes an entity from the store. Entities that were never saved are left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::NotFound`] if the entity is no longer stored.
    pub async fn reload<E: Entity>(&self, entity: &mut E) -> OdmResult<()> {
        if entity.record().is_new() {
            return Ok(());
        }

        let (schema, collection) = self.resolve::<E>()?;
        let filter = schema.target_criteria(entity.record())?;

        let stored = schema
            .search(collection.as_ref(), &self.schemas, vec![doc! { "$match": filter }])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| self.lost::<E>(&schema, entity))?;

        schema.replace_origin(entity.record_mut(), stored);
        Ok(())
    }

    fn lost<E: Entity>(&self, schema: &EntitySchema, entity: &E) -> OdmError {
        let mut criteria = Document::new();
        if let Some(id) = schema.id_of(entity.record()) {
            criteria.insert(ID_FIELD, id);
        }

        OdmError::not_found(E::entity_name(), criteria, Document::new())
    }

    /// Creates and inserts one entity from a logical-keyed partial.
    pub async fn insert_one<E: Entity>(&self, partial: Document) -> OdmResult<E> {
        let reported = partial.clone();

        self.insert_many::<E>(vec![partial])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OdmError::not_found(E::entity_name(), reported, Document::new()))
    }

    /// Creates and inserts entities from logical-keyed partials in one batch.
    ///
    /// The returned entities are read back from the store, in input order.
    pub async fn insert_many<E: Entity>(&self, partials: Vec<Document>) -> OdmResult<Vec<E>> {
        let (schema, collection) = self.resolve::<E>()?;

        let records = partials
            .into_iter()
            .map(|partial| schema.create(&self.schemas, partial))
            .collect::<OdmResult<Vec<_>>>()?;

        let inserted = schema
            .insert(collection.as_ref(), &self.schemas, records)
            .await?;

        Ok(inserted.into_iter().map(E::from_record).collect())
    }

    /// Bulk update of the entities matching `criteria`.
    ///
    /// # Arguments
    ///
    /// * `criteria` - Logical-keyed criteria
    /// * `update` - An [`UpdateSpec`] or a document, read as operator sections when it
    ///   holds `$inc`, `$set` or `$unset` and as fields to set otherwise
    pub async fn update<E: Entity>(
        &self,
        criteria: Document,
        update: impl Into<UpdateSpec>,
    ) -> OdmResult<UpdateOutcome> {
        let (schema, collection) = self.resolve::<E>()?;
        let filter = schema.match_filter(criteria)?;
        let update = update.into().to_update_document(&schema);

        if update.is_empty() {
            return Ok(UpdateOutcome::default());
        }

        schema.update(collection.as_ref(), filter, update).await
    }

    /// Removes every entity matching `criteria` and returns how many were removed.
    pub async fn remove<E: Entity>(&self, criteria: Document) -> OdmResult<u64> {
        let (schema, collection) = self.resolve::<E>()?;
        let filter = schema.match_filter(criteria)?;

        schema.remove(collection.as_ref(), filter).await
    }

    /// Removes a single entity; true if it was stored.
    pub async fn remove_entity<E: Entity>(&self, entity: &E) -> OdmResult<bool> {
        let (schema, collection) = self.resolve::<E>()?;
        let filter = schema.target_criteria(entity.record())?;

        Ok(schema.remove(collection.as_ref(), filter).await? > 0)
    }

    /// Runs a raw pipeline on the entity's collection.
    pub async fn aggregate<E: Entity>(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        let (schema, collection) = self.resolve::<E>()?;
        schema.aggregate(collection.as_ref(), pipeline).await
    }
}
