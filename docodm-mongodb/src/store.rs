use async_trait::async_trait;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{Client, Collection, options::ClientOptions};
use std::sync::Arc;
use tracing::{debug, info};

use docodm_core::{
    connection::{CollectionHandle, Connection, ConnectionBuilder, ConnectionConfig, UpdateOutcome},
    error::{OdmError, OdmResult},
};

fn backend(error: mongodb::error::Error) -> OdmError {
    OdmError::Backend(error.to_string())
}

/// A connection to one MongoDB database.
///
/// Cloning is cheap; the driver's `Client` pools its connections internally.
#[derive(Clone, Debug)]
pub struct MongoConnection {
    client: Client,
    database: String,
}

impl MongoConnection {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self {
            client,
            database: database.into(),
        }
    }

    /// Creates a builder from a connection URI and database name.
    pub fn builder(uri: &str, database: &str) -> MongoConnectionBuilder {
        MongoConnectionBuilder::new(uri).database(database)
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn mongo_collection(&self, name: &str) -> MongoCollection {
        MongoCollection {
            name: name.to_string(),
            collection: self.client.database(&self.database).collection(name),
        }
    }
}

#[async_trait]
impl Connection for MongoConnection {
    fn collection(&self, name: &str) -> Arc<dyn CollectionHandle> {
        Arc::new(self.mongo_collection(name))
    }

    async fn shutdown(&self) -> OdmResult<()> {
        info!(database = %self.database, "closing mongodb client");
        self.client.clone().shutdown().await;

        Ok(())
    }
}

/// A single MongoDB collection of raw documents.
#[derive(Clone, Debug)]
pub struct MongoCollection {
    name: String,
    collection: Collection<Document>,
}

#[async_trait]
impl CollectionHandle for MongoCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn aggregate(&self, pipeline: Vec<Document>) -> OdmResult<Vec<Document>> {
        debug!(collection = %self.name, stages = pipeline.len(), "aggregate");

        self.collection
            .aggregate(pipeline)
            .await
            .map_err(backend)?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(backend)
    }

    async fn insert_many(&self, documents: Vec<Document>) -> OdmResult<Vec<Bson>> {
        if documents.is_empty() {
            return Ok(vec![]);
        }

        let count = documents.len();
        let mut inserted = self
            .collection
            .insert_many(documents)
            .await
            .map_err(backend)?
            .inserted_ids;

        debug!(collection = %self.name, count, "insert_many");

        (0..count)
            .map(|index| {
                inserted.remove(&index).ok_or_else(|| {
                    OdmError::Backend(format!("no identity reported for document {index} in {}", self.name))
                })
            })
            .collect()
    }

    async fn update_many(&self, filter: Document, update: Document) -> OdmResult<UpdateOutcome> {
        let result = self
            .collection
            .update_many(filter, update)
            .await
            .map_err(backend)?;

        debug!(
            collection = %self.name,
            matched = result.matched_count,
            modified = result.modified_count,
            "update_many"
        );

        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
        })
    }

    async fn delete_many(&self, filter: Document) -> OdmResult<u64> {
        let deleted = self
            .collection
            .delete_many(filter)
            .await
            .map_err(backend)?
            .deleted_count;

        debug!(collection = %self.name, deleted, "delete_many");

        Ok(deleted)
    }

    async fn count_documents(&self, filter: Document) -> OdmResult<u64> {
        self.collection.count_documents(filter).await.map_err(backend)
    }

    async fn distinct(&self, field: &str, filter: Document) -> OdmResult<Vec<Bson>> {
        self.collection.distinct(field, filter).await.map_err(backend)
    }
}

/// Builder for [`MongoConnection`] instances.
///
/// When no database is given, the default database named in the URI is used.
pub struct MongoConnectionBuilder {
    uri: String,
    database: Option<String>,
}

impl MongoConnectionBuilder {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            database: None,
        }
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }
}

impl From<&ConnectionConfig> for MongoConnectionBuilder {
    fn from(config: &ConnectionConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            database: config.database.clone(),
        }
    }
}

#[async_trait]
impl ConnectionBuilder for MongoConnectionBuilder {
    type Connection = MongoConnection;

    async fn build(self) -> OdmResult<Self::Connection> {
        let options = ClientOptions::parse(&self.uri)
            .await
            .map_err(|e| OdmError::Initialization(e.to_string()))?;

        let database = self
            .database
            .or_else(|| options.default_database.clone())
            .ok_or_else(|| OdmError::Initialization(format!("no database named for {}", self.uri)))?;

        let client = Client::with_options(options).map_err(|e| OdmError::Initialization(e.to_string()))?;

        info!(%database, "mongodb client ready");

        Ok(MongoConnection::new(client, database))
    }
}
