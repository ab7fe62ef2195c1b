//! MongoDB backend implementation for docodm.
//!
//! This crate implements the `Connection` and `CollectionHandle` traits on top of the
//! official asynchronous MongoDB driver. Pipelines produced by the mapping layer are
//! handed to the server unchanged.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docodm = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! A connection needs a MongoDB URI and a database name. The database may also be
//! taken from the path of the URI.
//!
//! # Example
//!
//! ```ignore
//! use docodm::{ConnectionRegistry, mongodb::MongoConnection};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connections = ConnectionRegistry::new();
//!     connections
//!         .connect("default", MongoConnection::builder("mongodb://localhost:27017", "shop"))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docodm_mongodb;

pub mod store;

pub use store::{MongoCollection, MongoConnection, MongoConnectionBuilder};
