//! MongoDB backend implementation for docmap.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait. Filters,
//! projections, sorts, hints and update documents are passed to the server unchanged, and
//! driver errors are translated into the docmap error taxonomy: malformed queries become
//! `InvalidQuery`, unique index violations become `DuplicateKey`.
//!
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmap = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Connection
//!
//! The connection string and database name are provided through the builder, either
//! directly or from the `DOCMAP_MONGODB_DSN` and `DOCMAP_MONGODB_DATABASE` environment
//! variables.
//!
//! # Example
//!
//! ```ignore
//! use docmap::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .app_name("my-service")
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_mongodb;

pub mod store;

pub use store::{MongoDbStore, MongoDbStoreBuilder};
