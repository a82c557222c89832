//! Main document store interface.
//!
//! [`DocumentStore`] owns a backend and hands out [`Model`] handles that bind a
//! [`Schema`] to it. The store remembers which collections already had their declared
//! indexes created, so index bootstrap happens once per collection.
//!
//! # Example
//!
//! ```ignore
//! use docmap::{store::DocumentStore, memory::InMemoryStore};
//!
//! let store = DocumentStore::new(InMemoryStore::new());
//! let people = store.model(&PERSON);
//! let anthony = people.create(doc! { "name": "Anthony", "age": 29 }).await?;
//! ```

use mea::rwlock::RwLock;
use std::{collections::HashSet, sync::Arc};

use crate::{
    backend::StoreBackend,
    error::DocmapResult,
    model::Model,
    schema::Schema,
};

#[derive(Debug)]
pub struct DocumentStore<B: StoreBackend> {
    backend: B,
    bootstrapped: RwLock<HashSet<String>>,
}

impl<B: StoreBackend> DocumentStore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            bootstrapped: RwLock::new(HashSet::new()),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Binds a schema to this store.
    pub fn model<'a>(&'a self, schema: &Arc<Schema>) -> Model<'a, B> {
        Model::new(self, schema.clone())
    }

    pub(crate) async fn is_bootstrapped(&self, collection: &str) -> bool {
        self.bootstrapped
            .read()
            .await
            .contains(collection)
    }

    pub(crate) async fn mark_bootstrapped(&self, collection: &str) {
        self.bootstrapped
            .write()
            .await
            .insert(collection.to_string());
    }

    pub async fn create_collection(&self, name: &str) -> DocmapResult<()> {
        self.backend
            .create_collection(name)
            .await
    }

    /// Drops a collection. Its indexes are bootstrapped again on next use.
    pub async fn drop_collection(&self, name: &str) -> DocmapResult<()> {
        self.backend.drop_collection(name).await?;
        self.bootstrapped
            .write()
            .await
            .remove(name);

        Ok(())
    }

    pub async fn list_collections(&self) -> DocmapResult<Vec<String>> {
        self.backend.list_collections().await
    }

    pub async fn list_indexes(&self, collection: &str) -> DocmapResult<Vec<String>> {
        self.backend
            .list_indexes(collection)
            .await
    }

    pub async fn shutdown(self) -> DocmapResult<()> {
        self.backend.shutdown().await?;

        Ok(())
    }
}
