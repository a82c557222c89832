//! Storage backend abstraction for the document mapper.
//!
//! The mapper never talks to a driver directly; every store round trip goes through the
//! [`StoreBackend`] trait, which mirrors the conventional document database contract:
//! find, insert, update, remove, count, distinct and index creation.
//!
//! # Overview
//!
//! Implementations are required to be thread-safe (`Send + Sync`). Query syntax errors
//! (unknown operators, malformed projections, hints naming missing indexes) must be
//! reported as [`DocmapError::InvalidQuery`](crate::error::DocmapError::InvalidQuery) so
//! the model layer can scope them to the schema that issued the query.
//!
//! # Examples
//!
//! ```ignore
//! use docmap::backend::StoreBackend;
//! use bson::doc;
//!
//! let backend = MyBackendImpl::new();
//! let ids = backend.insert_documents(vec![doc! { "name": "Alice" }], "users").await?;
//! let count = backend.count_documents(doc! {}, Default::default(), "users").await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::{
    error::DocmapResult,
    query::{CountOptions, FindQuery, IndexModel},
};

/// Abstract interface for document storage backends.
///
/// Collections are created implicitly by writes and index creation.
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Returns the documents matching the query, after projection, sort, skip and limit.
    async fn find_documents(&self, query: FindQuery, collection: &str) -> DocmapResult<Vec<Document>>;

    /// Inserts documents and returns their identities in input order. Documents without an
    /// `_id` receive a generated one.
    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocmapResult<Vec<Bson>>;

    /// Applies an update expression to the first (or, with `multi`, every) matching
    /// document and returns the number of documents matched.
    async fn update_documents(
        &self,
        filter: Document,
        update: Document,
        multi: bool,
        collection: &str,
    ) -> DocmapResult<u64>;

    /// Removes every matching document and returns how many were removed.
    async fn remove_documents(&self, filter: Document, collection: &str) -> DocmapResult<u64>;

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        collection: &str,
    ) -> DocmapResult<u64>;

    /// Returns the unique values of `field` among matching documents. Array values are
    /// flattened.
    async fn distinct_values(&self, field: &str, filter: Document, collection: &str) -> DocmapResult<Vec<Bson>>;

    /// Creates an index if it is absent and returns its name.
    async fn create_index(&self, index: IndexModel, collection: &str) -> DocmapResult<String>;

    async fn list_indexes(&self, collection: &str) -> DocmapResult<Vec<String>>;

    async fn create_collection(&self, name: &str) -> DocmapResult<()>;

    async fn drop_collection(&self, name: &str) -> DocmapResult<()>;

    async fn list_collections(&self) -> DocmapResult<Vec<String>>;

    async fn shutdown(self) -> DocmapResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

#[async_trait]
impl<B> StoreBackend for &B
where
    B: StoreBackend,
{
    async fn find_documents(&self, query: FindQuery, collection: &str) -> DocmapResult<Vec<Document>> {
        (*self)
            .find_documents(query, collection)
            .await
    }

    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocmapResult<Vec<Bson>> {
        (*self)
            .insert_documents(documents, collection)
            .await
    }

    async fn update_documents(
        &self,
        filter: Document,
        update: Document,
        multi: bool,
        collection: &str,
    ) -> DocmapResult<u64> {
        (*self)
            .update_documents(filter, update, multi, collection)
            .await
    }

    async fn remove_documents(&self, filter: Document, collection: &str) -> DocmapResult<u64> {
        (*self)
            .remove_documents(filter, collection)
            .await
    }

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        collection: &str,
    ) -> DocmapResult<u64> {
        (*self)
            .count_documents(filter, options, collection)
            .await
    }

    async fn distinct_values(&self, field: &str, filter: Document, collection: &str) -> DocmapResult<Vec<Bson>> {
        (*self)
            .distinct_values(field, filter, collection)
            .await
    }

    async fn create_index(&self, index: IndexModel, collection: &str) -> DocmapResult<String> {
        (*self)
            .create_index(index, collection)
            .await
    }

    async fn list_indexes(&self, collection: &str) -> DocmapResult<Vec<String>> {
        (*self).list_indexes(collection).await
    }

    async fn create_collection(&self, name: &str) -> DocmapResult<()> {
        (*self).create_collection(name).await
    }

    async fn drop_collection(&self, name: &str) -> DocmapResult<()> {
        (*self).drop_collection(name).await
    }

    async fn list_collections(&self) -> DocmapResult<Vec<String>> {
        (*self).list_collections().await
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocmapResult<Self::Backend>;
}
