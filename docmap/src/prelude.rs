//! Convenient re-exports of commonly used types from docmap.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - Fields and schemas
//! - Records, models and query sets
//! - Store backends and builders
//! - Query options and projections
//! - Error types

pub use docmap_core::{
    field::{Field, FieldKind, IndexKind},
    schema::{Schema, SchemaBuilder},
    record::Record,
    model::Model,
    queryset::QuerySet,
    store::DocumentStore,
    backend::{StoreBackend, StoreBackendBuilder},
    query::{FindQuery, Hint, Projection, SortDirection},
    error::{DocmapError, DocmapResult},
};
