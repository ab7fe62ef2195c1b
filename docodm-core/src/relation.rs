//! Relation descriptors and their join-stage generators.
//!
//! Both relation kinds are single-valued: the join keeps the first matching document
//! and places it under the relation field, or leaves the field absent when nothing
//! matches.
//!
//! - [`BelongsTo`] is declared on the child, which holds a foreign key referencing the
//!   parent's primary key.
//! - [`HasOne`] is declared on the parent; the child holds a foreign key referencing
//!   the parent's primary key.

use bson::{Bson, Document, doc};
use std::fmt::Debug;

use crate::{
    entity::{EntityRef, Record},
    error::OdmResult,
    registry::SchemaRegistry,
    schema::EntitySchema,
};

/// Join metadata attached to a relation field of an entity schema.
pub trait Relation: Send + Sync + Debug {
    /// The related entity.
    fn target(&self) -> EntityRef;

    /// True only if both sides declare a primary key and the linking foreign key is
    /// registered on the side that holds it.
    fn is_valid(&self, owner: &EntitySchema, registry: &SchemaRegistry) -> bool;

    /// Aggregation stages joining the related document into `field`.
    ///
    /// # Errors
    ///
    /// Returns an error if the related schema cannot be resolved.
    fn pipeline(
        &self,
        owner: &EntitySchema,
        field: &str,
        registry: &SchemaRegistry,
    ) -> OdmResult<Vec<Document>>;

    /// Wraps a raw nested value into a record of the related entity.
    ///
    /// `stored` selects between storage-keyed rows coming back from a query and
    /// logical-keyed partials supplied by the caller. Values that are not documents
    /// produce `None`.
    ///
    /// # Errors
    ///
    /// Returns an error if the related schema cannot be resolved.
    fn map_foreign(
        &self,
        raw: &Bson,
        registry: &SchemaRegistry,
        stored: bool,
    ) -> OdmResult<Option<Record>> {
        let nested = match raw {
            Bson::Document(nested) if !nested.is_empty() => nested.clone(),
            _ => return Ok(None),
        };
        let schema = registry.schema_for_ref(&self.target())?;

        if stored {
            Ok(Some(schema.hydrate(registry, nested)?))
        } else {
            Ok(Some(schema.create(registry, nested)?))
        }
    }
}

/// Builds the three-stage single-valued join shared by both relation kinds.
pub fn join_stages(from: &str, local_field: &str, foreign_field: &str, field: &str) -> Vec<Document> {
    let joined = format!("{field}-all");

    vec![
        doc! {
            "$lookup": {
                "from": from,
                "localField": local_field,
                "foreignField": foreign_field,
                "as": joined.as_str(),
            }
        },
        doc! {
            "$addFields": {
                field: { "$arrayElemAt": [format!("${joined}"), 0] },
            }
        },
        doc! {
            "$project": {
                joined: 0,
            }
        },
    ]
}

/// Child-to-parent relation.
#[derive(Debug, Clone)]
pub struct BelongsTo {
    parent: EntityRef,
}

impl BelongsTo {
    pub fn new(parent: EntityRef) -> Self {
        Self { parent }
    }
}

impl Relation for BelongsTo {
    fn target(&self) -> EntityRef {
        self.parent
    }

    fn is_valid(&self, owner: &EntitySchema, registry: &SchemaRegistry) -> bool {
        let Ok(parent) = registry.schema_for_ref(&self.parent) else {
            return false;
        };

        owner.has_primary_key()
            && parent.has_primary_key()
            && owner.has_foreign_key_for(&self.parent)
    }

    fn pipeline(
        &self,
        owner: &EntitySchema,
        field: &str,
        registry: &SchemaRegistry,
    ) -> OdmResult<Vec<Document>> {
        let parent = registry.schema_for_ref(&self.parent)?;

        Ok(join_stages(
            parent.collection_name(),
            owner.foreign_key_origin_for(&self.parent),
            parent.primary_key_origin(),
            field,
        ))
    }
}

/// Parent-to-child relation.
#[derive(Debug, Clone)]
pub struct HasOne {
    child: EntityRef,
}

impl HasOne {
    pub fn new(child: EntityRef) -> Self {
        Self { child }
    }
}

impl Relation for HasOne {
    fn target(&self) -> EntityRef {
        self.child
    }

    fn is_valid(&self, owner: &EntitySchema, registry: &SchemaRegistry) -> bool {
        let Ok(child) = registry.schema_for_ref(&self.child) else {
            return false;
        };

        owner.has_primary_key()
            && child.has_primary_key()
            && child.has_foreign_key_for(owner.entity())
    }

    fn pipeline(
        &self,
        owner: &EntitySchema,
        field: &str,
        registry: &SchemaRegistry,
    ) -> OdmResult<Vec<Document>> {
        let child = registry.schema_for_ref(&self.child)?;

        Ok(join_stages(
            child.collection_name(),
            owner.primary_key_origin(),
            child.foreign_key_origin_for(owner.entity()),
            field,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn join_stages_project_first_match() {
        let stages = join_stages("items", "itemId", "_id", "item");

        assert_eq!(
            stages,
            vec![
                doc! {
                    "$lookup": {
                        "from": "items",
                        "localField": "itemId",
                        "foreignField": "_id",
                        "as": "item-all",
                    }
                },
                doc! { "$addFields": { "item": { "$arrayElemAt": ["$item-all", 0] } } },
                doc! { "$project": { "item-all": 0 } },
            ]
        );
    }
}
