mod common;

use docodm::{bson::{Bson, Regex, doc, oid::ObjectId}, prelude::*};
use pretty_assertions::assert_eq;

use common::{Metric, Order, Price, User, name_of, setup, stored};

async fn seed_users(manager: &EntityManager) -> Vec<User> {
    manager
        .insert_many::<User>(vec![
            doc! { "name": "Alice", "age": 33, "address": { "city": "Paris", "zip": "75001" } },
            doc! { "name": "Bob", "age": 25, "address": { "city": "Lyon", "zip": "69001" } },
            doc! { "name": "alfred", "age": 40, "address": { "city": "Paris", "zip": "75002" } },
        ])
        .await
        .unwrap()
}

#[tokio::test]
async fn finds_by_comparison_and_pattern() {
    let (manager, _) = setup();
    seed_users(&manager).await;

    let by_age = SearchOptions::builder().sort("age", SortDirection::Asc).build();

    let older = manager
        .find::<User>(doc! { "age": { "$gt": 30 } }, Some(by_age.clone()))
        .await
        .unwrap();
    assert_eq!(older.iter().map(name_of).collect::<Vec<_>>(), vec!["Alice", "alfred"]);

    let adults = manager
        .find::<User>(doc! { "age": { "$gte": 25 } }, Some(by_age))
        .await
        .unwrap();
    assert_eq!(adults.iter().map(name_of).collect::<Vec<_>>(), vec!["Bob", "Alice", "alfred"]);

    let matching = manager
        .find::<User>(Filter::regex("name", "^al", "i"), None)
        .await
        .unwrap();
    assert_eq!(matching.len(), 2);
}

#[tokio::test]
async fn nested_criteria_match_dotted_paths() {
    let (manager, _) = setup();
    seed_users(&manager).await;

    let parisians = manager
        .find::<User>(
            doc! { "address": { "city": "Paris" } },
            Some(SearchOptions::builder().sort("address.zip", SortDirection::Desc).build()),
        )
        .await
        .unwrap();

    assert_eq!(parisians.iter().map(name_of).collect::<Vec<_>>(), vec!["alfred", "Alice"]);

    let either = manager
        .find::<User>(Filter::or([Filter::eq("name", "Bob"), Filter::gt("age", 35)]), None)
        .await
        .unwrap();
    assert_eq!(either.len(), 2);
}

#[tokio::test]
async fn inserts_many_in_input_order() {
    let (manager, _) = setup();

    let prices = manager
        .insert_many::<Price>(vec![doc! { "value": 10.5 }, doc! { "value": 3.0 }])
        .await
        .unwrap();

    let values = prices
        .iter()
        .map(|price| price.record().get::<f64>("value").unwrap().unwrap())
        .collect::<Vec<_>>();

    assert_eq!(values, vec![10.5, 3.0]);
    assert!(prices.iter().all(|price| !price.is_new()));
    assert!(prices.iter().all(|price| price.object_id().is_some()));
    assert_eq!(manager.count::<Price>(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn save_stores_aliases_and_defaults() {
    let (manager, connection) = setup();

    let mut order = manager.create::<Order>(doc! { "qty": 2 }).unwrap();
    assert!(order.is_new());

    manager.save(&mut order).await.unwrap();
    assert!(!order.is_new());
    assert_eq!(order.record().get::<i32>("qty").unwrap(), Some(2));

    let rows = stored(&connection, "orders").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        doc! {
            "_id": order.id().unwrap().clone(),
            "quantity": 2,
            "something": "Hoho",
            "flag": true,
        }
    );
}

#[tokio::test]
async fn explicit_falsy_values_win_over_defaults() {
    let (manager, connection) = setup();

    let mut order = manager
        .create::<Order>(doc! { "qty": 0, "something": "", "flag": false })
        .unwrap();
    manager.save(&mut order).await.unwrap();

    let rows = stored(&connection, "orders").await;
    assert_eq!(rows[0].get_str("something").unwrap(), "");
    assert_eq!(rows[0].get_bool("flag").unwrap(), false);
    assert_eq!(rows[0].get_i32("quantity").unwrap(), 0);
}

#[tokio::test]
async fn save_updates_stored_entities() {
    let (manager, connection) = setup();

    let mut order = manager.insert_one::<Order>(doc! { "qty": 1 }).await.unwrap();
    order.record_mut().set("qty", 5);
    manager.save(&mut order).await.unwrap();

    let rows = stored(&connection, "orders").await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_i32("quantity").unwrap(), 5);

    let found = manager
        .find_one::<Order>(doc! { "qty": { "$gte": 5 } }, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id(), order.id());
}

#[tokio::test]
async fn merge_and_reload() {
    let (manager, _) = setup();
    let mut user = seed_users(&manager).await.remove(1);

    manager
        .merge(&mut user, [doc! { "address": { "zip": "69002" } }])
        .unwrap();
    assert_eq!(
        user.record().get_bson("address"),
        Some(&Bson::Document(doc! { "city": "Lyon", "zip": "69002" }))
    );

    manager
        .update::<User>(doc! { "name": "Bob" }, UpdateSpec::operators().inc("age", 1))
        .await
        .unwrap();
    manager.reload(&mut user).await.unwrap();

    assert_eq!(user.record().get::<i32>("age").unwrap(), Some(26));
    assert_eq!(
        user.record().get_bson("address"),
        Some(&Bson::Document(doc! { "city": "Lyon", "zip": "69001" }))
    );
}

#[tokio::test]
async fn find_one_or_fail_reports_the_lookup() {
    let (manager, _) = setup();
    seed_users(&manager).await;

    let err = manager
        .find_one_or_fail::<User>(
            doc! { "name": "Zed" },
            Some(SearchOptions::builder().skip(1).build()),
        )
        .await
        .unwrap_err();

    match err {
        OdmError::NotFound { entity, criteria, options } => {
            assert_eq!(entity, "User");
            assert_eq!(criteria, doc! { "name": "Zed" });
            assert_eq!(options, doc! { "$skip": 1_i64 });
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn finds_by_identity() {
    let (manager, _) = setup();
    let users = seed_users(&manager).await;
    let id = users[0].object_id().unwrap();

    let by_hex = manager.find_by_id::<User>(id.to_hex()).await.unwrap().unwrap();
    assert_eq!(name_of(&by_hex), "Alice");

    let by_id = manager.find_by_id_or_fail::<User>(id).await.unwrap();
    assert_eq!(name_of(&by_id), "Alice");

    assert!(manager.find_by_id::<User>("not-an-id").await.unwrap().is_none());

    let err = manager.find_by_id_or_fail::<User>(ObjectId::new()).await.unwrap_err();
    assert!(matches!(err, OdmError::NotFound { .. }));
}

#[tokio::test]
async fn unregistered_connections_fail() {
    let (manager, _) = setup();

    let err = manager.find::<Metric>(doc! {}, None).await.unwrap_err();

    match err {
        OdmError::ConnectionNotFound { entity, connection } => {
            assert_eq!(entity, "Metric");
            assert_eq!(connection, "analytics");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn bulk_update_remove_count_and_distinct() {
    let (manager, _) = setup();
    seed_users(&manager).await;

    let outcome = manager
        .update::<User>(doc! { "age": { "$lt": 30 } }, UpdateSpec::operators().inc("age", 10))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome { matched_count: 1, modified_count: 1 });

    let outcome = manager
        .update::<User>(doc! { "name": "alfred" }, doc! { "name": "Alfred" })
        .await
        .unwrap();
    assert_eq!(outcome.modified_count, 1);

    let mut ages = manager.distinct::<User>("age", None).await.unwrap();
    ages.sort_by_key(|age| age.as_i32());
    assert_eq!(ages, vec![Bson::Int32(33), Bson::Int32(35), Bson::Int32(40)]);

    let cities = manager
        .distinct::<User>("address.city", Some(doc! { "age": { "$gte": 35 } }))
        .await
        .unwrap();
    assert_eq!(cities, vec![Bson::from("Lyon"), Bson::from("Paris")]);

    assert_eq!(manager.remove::<User>(doc! { "age": { "$gt": 34 } }).await.unwrap(), 2);
    assert_eq!(manager.count::<User>(doc! {}).await.unwrap(), 1);
}

#[tokio::test]
async fn find_and_count_pages() {
    let (manager, _) = setup();
    seed_users(&manager).await;

    let (page, total) = manager
        .find_and_count::<User>(
            doc! {},
            Some(
                SearchOptions::builder()
                    .sort("name", SortDirection::Asc)
                    .skip(1)
                    .limit(1)
                    .build(),
            ),
        )
        .await
        .unwrap();

    assert_eq!(total, 3);
    assert_eq!(page.iter().map(name_of).collect::<Vec<_>>(), vec!["Bob"]);
}

#[tokio::test]
async fn removes_single_entities() {
    let (manager, _) = setup();
    let users = seed_users(&manager).await;

    assert!(manager.remove_entity(&users[0]).await.unwrap());
    assert!(!manager.remove_entity(&users[0]).await.unwrap());
    assert_eq!(manager.count::<User>(doc! {}).await.unwrap(), 2);
}

#[tokio::test]
async fn repositories_forward_to_the_manager() {
    let (manager, _) = setup();
    let users = manager.repository::<User>();

    let mut carol = users.create(doc! { "name": "Carol", "age": 51 }).unwrap();
    assert!(users.is_new(&carol));
    users.save(&mut carol).await.unwrap();

    let found = users
        .find_one_or_fail(doc! { "name": "Carol" }, None)
        .await
        .unwrap();

    assert_eq!(found.id(), carol.id());
    assert_eq!(users.schema().unwrap().collection_name(), "users");
    assert_eq!(users.count(doc! { "age": 51 }).await.unwrap(), 1);
}

#[tokio::test]
async fn raw_aggregation_reads_storage_names() {
    let (manager, _) = setup();
    manager.insert_one::<Order>(doc! { "qty": 3 }).await.unwrap();
    manager.insert_one::<Order>(doc! { "qty": 4 }).await.unwrap();

    let rows = manager
        .aggregate::<Order>(vec![
            doc! { "$match": { "quantity": { "$gt": 3 } } },
            doc! { "$project": { "_id": 0, "quantity": 1 } },
        ])
        .await
        .unwrap();

    assert_eq!(rows, vec![doc! { "quantity": 4 }]);
}

#[tokio::test]
async fn connection_registry_shuts_down_every_connection() {
    let (manager, connection) = setup();
    seed_users(&manager).await;

    manager.connections().shutdown().await.unwrap();

    assert!(connection.list_collections().await.is_empty());
    assert!(manager.connections().names().is_empty());
}

#[tokio::test]
async fn finds_by_regular_expression_literal() {
    let (manager, connection) = setup();
    manager
        .insert_one::<User>(doc! { "name": "MongoZilla", "age": 21, "is_admin": true })
        .await
        .unwrap();

    let pattern = Regex {
        pattern: "mongo".try_into().unwrap(),
        options: "i".try_into().unwrap(),
    };
    let found = manager.find::<User>(doc! { "name": pattern }, None).await.unwrap();
    assert_eq!(found.iter().map(name_of).collect::<Vec<_>>(), vec!["MongoZilla"]);
    assert_eq!(found[0].record().get::<bool>("is_admin").unwrap(), Some(true));

    assert!(manager.find::<User>(doc! { "age": { "$gt": 21 } }, None).await.unwrap().is_empty());
    assert_eq!(manager.count::<User>(doc! { "age": { "$gte": 21 } }).await.unwrap(), 1);

    let rows = stored(&connection, "users").await;
    assert_eq!(rows[0].get_bool("isAdmin").unwrap(), true);
}

#[tokio::test]
async fn reload_leaves_unsaved_entities_unchanged() {
    let (manager, _) = setup();

    let mut order = manager.create::<Order>(doc! { "qty": 1 }).unwrap();
    let before = order.record().origin().clone();

    manager.reload(&mut order).await.unwrap();

    assert!(order.is_new());
    assert_eq!(order.record().origin(), &before);
}

#[tokio::test]
async fn save_ignores_undeclared_fields() {
    let (manager, connection) = setup();

    let mut user = manager.insert_one::<User>(doc! { "name": "x" }).await.unwrap();
    user.record_mut().set("nickname", "zz").set("age", 7);
    manager.save(&mut user).await.unwrap();

    let rows = stored(&connection, "users").await;
    assert!(!rows[0].contains_key("nickname"));
    assert_eq!(rows[0].get_i32("age").unwrap(), 7);
    assert!(user.record().get_bson("nickname").is_none());
    assert_eq!(user.record().get::<i32>("age").unwrap(), Some(7));
}

#[tokio::test]
async fn distinct_translates_aliased_fields() {
    let (manager, _) = setup();
    manager
        .insert_many::<Order>(vec![doc! { "qty": 3 }, doc! { "qty": 4 }, doc! { "qty": 3 }])
        .await
        .unwrap();

    let quantities = manager.distinct::<Order>("qty", None).await.unwrap();
    assert_eq!(quantities, vec![Bson::Int32(3), Bson::Int32(4)]);
}

#[tokio::test]
async fn overflowing_increments_leave_documents_untouched() {
    let (manager, connection) = setup();
    manager
        .insert_one::<User>(doc! { "name": "max", "age": i64::MAX })
        .await
        .unwrap();

    let err = manager
        .update::<User>(doc! {}, UpdateSpec::operators().inc("age", 1_i64))
        .await
        .unwrap_err();

    assert!(matches!(err, OdmError::InvalidCriteria(_)));
    assert_eq!(stored(&connection, "users").await[0].get_i64("age").unwrap(), i64::MAX);
}
