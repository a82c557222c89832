//! Main docmap crate providing a schema-driven document mapper.
//!
//! This crate is the primary entry point for users of the docmap framework.
//! It re-exports the core types and functionality from the sub-crates and provides
//! convenient access to the storage backends.
//!
//! # Features
//!
//! - **Typed fields** - Declare fields whose values are coerced into a canonical stored form
//! - **Schema-bound models** - Identity and filter based CRUD with automatic index bootstrap
//! - **Lazy query sets** - Chainable filters, sorts, limits and hints, materialized once
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::{Arc, LazyLock};
//! use docmap::{prelude::*, memory::InMemoryStore, bson::doc};
//!
//! static PERSON: LazyLock<Arc<Schema>> = LazyLock::new(|| {
//!     Schema::builder("Person")
//!         .field("name", Field::char().index(IndexKind::Text))
//!         .field("age", Field::int())
//!         .field("created", Field::timestamp().default_fn(|| bson::Bson::DateTime(bson::DateTime::now())))
//!         .build()
//!         .expect("valid schema")
//! });
//!
//! #[tokio::main]
//! async fn main() -> DocmapResult<()> {
//!     // Create an in-memory store backend
//!     let store = DocumentStore::new(InMemoryStore::builder().build().await?);
//!     let people = store.model(&PERSON);
//!
//!     // Construct and persist a record
//!     let mut anthony = people.new_record(doc! { "name": "Anthony", "age": 29 })?;
//!     anthony.save(&people).await?;
//!
//!     // Query lazily, then materialize
//!     let mut adults = people.filter(doc! { "age__gte": 18 });
//!     adults.order_by("age", SortDirection::Desc).limit(10);
//!
//!     for person in adults.fetch().await? {
//!         println!("{}", person.to_json()?);
//!     }
//!
//!     // Apply an update to every match and get the updated records back
//!     let updated = adults.update_fields(doc! { "age": 30 }).await?;
//!     println!("updated {} people", updated.len());
//!
//!     store.shutdown().await
//! }
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

pub mod prelude;

pub use docmap_core::{backend, error, field, model, query, queryset, record, schema, serialize, store};

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docmap_memory::{InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docmap_mongodb::{MongoDbStore, MongoDbStoreBuilder, store::{DATABASE_ENV, DSN_ENV}};
}
