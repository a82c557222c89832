//! In-memory document storage backend for docmap.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development
//! and testing.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Query language** - Comparison, membership, array and logical operators over dotted paths
//! - **Projections** - Inclusion, exclusion and positional `field.$` projections
//! - **Updates** - `$set`, `$unset`, `$inc`, `$push`, `$addToSet` and `$pull`
//! - **Indexes** - Unique index enforcement and hint validation
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::{store::DocumentStore, memory::InMemoryStore, field::Field, schema::Schema};
//! use bson::doc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let store = DocumentStore::new(backend);
//!
//!     let person = Schema::builder("Person")
//!         .field("name", Field::char())
//!         .build()?;
//!
//!     store.model(&person).create(doc! { "name": "Alice" }).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_memory;

pub mod store;
mod evaluator;
mod projection;
mod update;

pub use store::{InMemoryStore, InMemoryStoreBuilder};
