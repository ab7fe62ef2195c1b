mod common;

use std::sync::Arc;

use docodm::{bson::doc, prelude::*};
use pretty_assertions::assert_eq;

use common::{Clash, Item, Order, Orphan, setup};

#[tokio::test]
async fn belongs_to_joins_the_parent() {
    let (manager, _) = setup();

    let lamp = manager.insert_one::<Item>(doc! { "name": "Lamp" }).await.unwrap();
    let lamp_id = lamp.object_id().unwrap();

    manager
        .insert_many::<Order>(vec![
            doc! { "qty": 1, "itemId": lamp_id.to_hex() },
            doc! { "qty": 2 },
        ])
        .await
        .unwrap();

    let orders = manager
        .find::<Order>(
            doc! {},
            Some(SearchOptions::builder().sort("qty", SortDirection::Asc).build()),
        )
        .await
        .unwrap();

    let item = orders[0].record().related_entity::<Item>("item").unwrap();
    assert_eq!(item.object_id(), Some(lamp_id));
    assert_eq!(item.record().get::<String>("name").unwrap().as_deref(), Some("Lamp"));
    assert!(!item.is_new());

    assert!(orders[1].record().related("item").is_none());
}

#[tokio::test]
async fn has_one_joins_the_child() {
    let (manager, _) = setup();

    let items = manager
        .insert_many::<Item>(vec![doc! { "name": "Desk" }, doc! { "name": "Chair" }])
        .await
        .unwrap();

    manager
        .insert_one::<Order>(doc! { "qty": 4, "itemId": items[0].object_id().unwrap() })
        .await
        .unwrap();

    let desk = manager
        .find_one_or_fail::<Item>(doc! { "name": "Desk" }, None)
        .await
        .unwrap();
    let order = desk.record().related_entity::<Order>("order").unwrap();
    assert_eq!(order.record().get::<i32>("qty").unwrap(), Some(4));

    let chair = manager
        .find_one_or_fail::<Item>(doc! { "name": "Chair" }, None)
        .await
        .unwrap();
    assert!(chair.record().related("order").is_none());
}

#[tokio::test]
async fn foreign_keys_are_queried_as_identities() {
    let (manager, _) = setup();

    let lamp = manager.insert_one::<Item>(doc! { "name": "Lamp" }).await.unwrap();
    let hex = lamp.object_id().unwrap().to_hex();
    manager
        .insert_one::<Order>(doc! { "qty": 1, "itemId": hex.as_str() })
        .await
        .unwrap();

    assert_eq!(manager.count::<Order>(doc! { "itemId": hex.as_str() }).await.unwrap(), 1);
    assert_eq!(manager.count::<Order>(doc! { "itemId": "garbage" }).await.unwrap(), 0);
}

#[tokio::test]
async fn nested_partials_become_related_records() {
    let (manager, _) = setup();

    let order = manager
        .create::<Order>(doc! { "qty": 1, "item": { "name": "Shelf" } })
        .unwrap();

    let item = order.record().related_entity::<Item>("item").unwrap();
    assert!(item.is_new());
    assert_eq!(item.record().get::<String>("name").unwrap().as_deref(), Some("Shelf"));
    assert!(order.record().get_bson("item").is_none());

    let order = manager.create::<Order>(doc! { "qty": 1, "item": "Shelf" }).unwrap();
    assert!(order.record().related("item").is_none());
}

#[test]
fn relation_pipeline_has_the_single_valued_join_shape() {
    let registry = SchemaRegistry::new();
    let schema = registry.schema_for::<Order>().unwrap();

    assert_eq!(
        schema.make_relations_pipe(&registry).unwrap(),
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

    let schema = registry.schema_for::<Item>().unwrap();
    let stages = schema.make_relations_pipe(&registry).unwrap();
    assert_eq!(
        stages[0],
        doc! {
            "$lookup": {
                "from": "orders",
                "localField": "_id",
                "foreignField": "itemId",
                "as": "order-all",
            }
        }
    );
}

#[tokio::test]
async fn invalid_relations_are_rejected() {
    let (manager, _) = setup();

    let err = manager.find::<Orphan>(doc! {}, None).await.unwrap_err();
    assert!(matches!(err, OdmError::InvalidSchema(_)));

    let err = SchemaRegistry::builder().register::<Orphan>().build().unwrap_err();
    assert!(matches!(err, OdmError::InvalidSchema(_)));

    let registry = SchemaRegistry::builder()
        .register::<Order>()
        .register::<Item>()
        .build()
        .unwrap();
    assert_eq!(registry.list_schemas().len(), 2);
}

#[tokio::test]
async fn duplicate_aliases_are_rejected() {
    let (manager, _) = setup();

    let err = manager.create::<Clash>(doc! { "a": 1 }).unwrap_err();
    assert!(matches!(err, OdmError::InvalidSchema(_)));

    let registry = Arc::new(SchemaRegistry::new());
    assert!(registry.schema_for::<Clash>().is_err());
}
