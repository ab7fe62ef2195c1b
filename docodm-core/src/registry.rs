//! Lazily populated registry of entity schemas.
//!
//! Schemas are built the first time an entity is resolved, by running its
//! [`Entity::describe`] registration function, and are immutable afterwards. Entities
//! referencing each other through relations are resolved on demand, so declaration
//! order does not matter.

use parking_lot::RwLock;
use std::{any::TypeId, collections::HashMap, sync::Arc};
use tracing::debug;

use crate::{
    entity::{Entity, EntityRef},
    error::OdmResult,
    schema::EntitySchema,
};

/// Process-wide store of entity schemas, keyed by entity type.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<TypeId, Arc<EntitySchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts an eagerly validated registry.
    pub fn builder() -> SchemaRegistryBuilder {
        SchemaRegistryBuilder::default()
    }

    /// Returns the schema of `E`, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`](crate::error::OdmError::InvalidSchema) if
    /// two properties of `E` share a storage name.
    pub fn schema_for<E: Entity>(&self) -> OdmResult<Arc<EntitySchema>> {
        self.schema_for_ref(&EntityRef::of::<E>())
    }

    /// Returns the schema behind a lazy entity reference, building it on first use.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`](crate::error::OdmError::InvalidSchema) if
    /// two properties share a storage name.
    pub fn schema_for_ref(&self, entity: &EntityRef) -> OdmResult<Arc<EntitySchema>> {
        if let Some(schema) = self.schemas.read().get(&entity.type_id()) {
            return Ok(schema.clone());
        }

        let mut schema = EntitySchema::new(*entity);
        entity.describe(&mut schema);
        schema.validate_aliases()?;

        debug!(
            entity = entity.name(),
            collection = schema.collection_name(),
            connection = schema.connection_name(),
            "registered entity schema"
        );

        let schema = self
            .schemas
            .write()
            .entry(entity.type_id())
            .or_insert_with(|| Arc::new(schema))
            .clone();

        Ok(schema)
    }

    /// Every schema resolved so far.
    pub fn list_schemas(&self) -> Vec<Arc<EntitySchema>> {
        self.schemas.read().values().cloned().collect()
    }

    /// Checks the relations of every resolved schema, resolving their targets.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`](crate::error::OdmError::InvalidSchema) for
    /// the first relation missing a primary or foreign key.
    pub fn validate(&self) -> OdmResult<()> {
        for schema in self.list_schemas() {
            for (_, relation) in schema.relations() {
                self.schema_for_ref(&relation.target())?;
            }
            schema.validate_relations(self)?;
        }

        Ok(())
    }
}

/// Registers entities up front and validates their schemas before use.
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    entities: Vec<EntityRef>,
}

impl SchemaRegistryBuilder {
    pub fn register<E: Entity>(mut self) -> Self {
        self.entities.push(EntityRef::of::<E>());
        self
    }

    /// Resolves every registered entity and validates aliases and relations.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidSchema`](crate::error::OdmError::InvalidSchema) if any
    /// registered schema is inconsistent.
    pub fn build(self) -> OdmResult<SchemaRegistry> {
        let registry = SchemaRegistry::new();

        for entity in &self.entities {
            registry.schema_for_ref(entity)?;
        }
        registry.validate()?;

        Ok(registry)
    }
}
