//! Entity-scoped view over an [`EntityManager`].

use bson::{Bson, Document};
use std::{marker::PhantomData, sync::Arc};

use crate::{
    connection::UpdateOutcome,
    entity::Entity,
    error::OdmResult,
    manager::EntityManager,
    query::{SearchOptions, UpdateSpec},
    schema::EntitySchema,
};

/// Typed access to the entities of one type.
///
/// Every method forwards to the matching [`EntityManager`] method with `E` fixed.
///
/// ```ignore
/// let users = manager.repository::<User>();
/// let admins = users.find(doc! { "isAdmin": true }, None).await?;
/// ```
#[derive(Debug)]
pub struct Repository<'a, E: Entity> {
    manager: &'a EntityManager,
    _marker: PhantomData<fn() -> E>,
}

impl<'a, E: Entity> Repository<'a, E> {
    pub fn new(manager: &'a EntityManager) -> Self {
        Self {
            manager,
            _marker: PhantomData,
        }
    }

    pub fn schema(&self) -> OdmResult<Arc<EntitySchema>> {
        self.manager.schema_for::<E>()
    }

    pub fn create(&self, partial: Document) -> OdmResult<E> {
        self.manager.create(partial)
    }

    pub fn merge(&self, entity: &mut E, partials: impl IntoIterator<Item = Document>) -> OdmResult<()> {
        self.manager.merge(entity, partials)
    }

    pub fn is_new(&self, entity: &E) -> bool {
        self.manager.is_new(entity)
    }

    pub async fn find(&self, criteria: Document, options: Option<SearchOptions>) -> OdmResult<Vec<E>> {
        self.manager.find(criteria, options).await
    }

    pub async fn find_one(&self, criteria: Document, options: Option<SearchOptions>) -> OdmResult<Option<E>> {
        self.manager.find_one(criteria, options).await
    }

    pub async fn find_one_or_fail(&self, criteria: Document, options: Option<SearchOptions>) -> OdmResult<E> {
        self.manager.find_one_or_fail(criteria, options).await
    }

    pub async fn find_by_id(&self, id: impl Into<Bson>) -> OdmResult<Option<E>> {
        self.manager.find_by_id(id).await
    }

    pub async fn find_by_id_or_fail(&self, id: impl Into<Bson>) -> OdmResult<E> {
        self.manager.find_by_id_or_fail(id).await
    }

    pub async fn find_and_count(
        &self,
        criteria: Document,
        options: Option<SearchOptions>,
    ) -> OdmResult<(Vec<E>, u64)> {
        self.manager.find_and_count(criteria, options).await
    }

    pub async fn count(&self, criteria: Document) -> OdmResult<u64> {
        self.manager.count::<E>(criteria).await
    }

    pub async fn distinct(&self, field: &str, criteria: Option<Document>) -> OdmResult<Vec<Bson>> {
        self.manager.distinct::<E>(field, criteria).await
    }

    pub async fn save(&self, entity: &mut E) -> OdmResult<()> {
        self.manager.save(entity).await
    }

    pub async fn reload(&self, entity: &mut E) -> OdmResult<()> {
        self.manager.reload(entity).await
    }

    pub async fn insert_one(&self, partial: Document) -> OdmResult<E> {
        self.manager.insert_one(partial).await
    }

    pub async fn insert_many(&self, partials: Vec<Document>) -> OdmResult<Vec<E>> {
        self.manager.insert_many(partials).await
    }

    pub async fn update(&self, criteria: Document, update: impl Into<UpdateSpec>) -> OdmResult<UpdateOutcome> {
        self.manager.update::<E>(criteria, update).await
    }

    pub async fn remove(&self, criteria: Document) -> OdmResult<u64> {
        self.manager.remove::<E>(criteria).await
    }

    pub async fn remove_entity(&self, entity: &E) -> OdmResult<bool> {
        self.manager.remove_entity(entity).await
    }

    pub async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        self.manager.aggregate::<E>(pipeline).await
    }
}
