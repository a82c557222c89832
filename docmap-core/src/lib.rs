//! A schema-driven document mapper over document stores.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Fields** ([`field`]) - Typed field declarations that coerce values into their canonical stored form
//! - **Serializer helpers** ([`serialize`]) - Storage and JSON-safe rendering of datetimes, lists and dicts
//! - **Schemas** ([`schema`]) - Ordered field registries bound to a collection, with index declarations
//! - **Records** ([`record`]) - Schema instances tracking their store state and changed fields
//! - **Store backend abstraction** ([`backend`]) - The trait every document store implements
//! - **Query options and criteria** ([`query`]) - Find options, projections and keyword lookups
//! - **Document store** ([`store`]) - Owns a backend and hands out model handles
//! - **Models** ([`model`]) - Schema-bound CRUD with index bootstrap
//! - **Query sets** ([`queryset`]) - Lazy, chainable, cached queries
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use std::sync::{Arc, LazyLock};
//! use docmap::{field::Field, schema::Schema, store::DocumentStore};
//! use bson::doc;
//!
//! static PERSON: LazyLock<Arc<Schema>> = LazyLock::new(|| {
//!     Schema::builder("Person")
//!         .field("name", Field::char())
//!         .field("age", Field::int())
//!         .build()
//!         .expect("valid schema")
//! });
//!
//! let store = DocumentStore::new(backend);
//! let people = store.model(&PERSON);
//! let anthony = people.create(doc! { "name": "Anthony", "age": 29 }).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod backend;
pub mod error;
pub mod field;
pub mod model;
pub mod query;
pub mod queryset;
pub mod record;
pub mod schema;
pub mod serialize;
pub mod store;
