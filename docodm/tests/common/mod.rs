#![allow(dead_code)]

use std::sync::Arc;

use docodm::{
    bson::Document,
    memory::MemoryConnection,
    prelude::*,
};

macro_rules! entity {
    ($name:ident, $describe:expr) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            record: Record,
        }

        impl Entity for $name {
            fn entity_name() -> &'static str {
                stringify!($name)
            }

            fn describe(schema: &mut EntitySchema) {
                let describe: fn(&mut EntitySchema) = $describe;
                describe(schema)
            }

            fn from_record(record: Record) -> Self {
                Self { record }
            }

            fn record(&self) -> &Record {
                &self.record
            }

            fn record_mut(&mut self) -> &mut Record {
                &mut self.record
            }
        }
    };
}

entity!(User, |schema| {
    schema.set_primary_key("id");
    schema.property_schema("name").set_type(PropertyType::String);
    schema.property_schema("age").set_type(PropertyType::Int);
    schema.property_schema("address");
    schema
        .property_schema("is_admin")
        .alias_for("isAdmin")
        .set_type(PropertyType::Boolean)
        .set_default(false);
});

entity!(Price, |schema| {
    schema.set_primary_key("id");
    schema.property_schema("value").set_type(PropertyType::Double);
});

entity!(Item, |schema| {
    schema.set_primary_key("id");
    schema.property_schema("name").set_type(PropertyType::String);
    schema.has_one::<Order>("order");
});

entity!(Order, |schema| {
    schema.set_primary_key("id");
    schema
        .property_schema("qty")
        .alias_for("quantity")
        .set_type(PropertyType::Int);
    schema.property_schema("something").set_default("Hoho");
    schema.property_schema("flag").set_default(true);
    schema.foreign_key::<Item>("itemId").set_type(PropertyType::ObjectId);
    schema.belongs_to::<Item>("item");
});

entity!(Metric, |schema| {
    schema.property_schema("value");
    schema.merge_options(SchemaOptions::new().collection("series").connection("analytics"));
});

entity!(Clash, |schema| {
    schema.property_schema("a").alias_for("shared");
    schema.property_schema("b").alias_for("shared");
});

entity!(Orphan, |schema| {
    schema.property_schema("name");
    schema.belongs_to::<Item>("item");
});

/// Manager over a fresh in-memory default connection, plus that connection for
/// inspecting what was stored.
pub fn setup() -> (EntityManager, MemoryConnection) {
    let connection = MemoryConnection::new();
    let connections = Arc::new(ConnectionRegistry::new());
    connections.register("default", connection.clone());

    (EntityManager::new(Arc::new(SchemaRegistry::new()), connections), connection)
}

/// Raw documents of a collection, as stored.
pub async fn stored(connection: &MemoryConnection, collection: &str) -> Vec<Document> {
    connection
        .memory_collection(collection)
        .aggregate(vec![])
        .await
        .unwrap()
}

pub fn name_of(user: &User) -> String {
    user.record().get::<String>("name").unwrap().unwrap()
}
