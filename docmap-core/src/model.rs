//! Schema-bound persistence.
//!
//! A [`Model`] binds a [`Schema`] to a [`DocumentStore`] and provides identity-based and
//! filter-based CRUD. Every operation bootstraps the schema's declared indexes on first
//! use, and every store rejection of a query is reported as the schema's own
//! [`DocmapError::Query`].
//!
//! # Example
//!
//! ```ignore
//! let people = store.model(&PERSON);
//!
//! let mut anthony = people.new_record(doc! { "name": "Anthony", "age": 29 })?;
//! anthony.save(&people).await?;
//!
//! let found = people.get(doc! { "_id": anthony.id().unwrap() }).await?;
//! let adults = people.filter(doc! { "age__gte": 18 });
//! ```

use bson::{Bson, Document, doc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::{
    backend::StoreBackend,
    error::{DocmapError, DocmapResult},
    query::{FindQuery, Projection, normalize_criteria},
    queryset::QuerySet,
    record::Record,
    schema::{ID_FIELD, Schema},
    store::DocumentStore,
};

#[derive(Debug)]
pub struct Model<'a, B: StoreBackend> {
    store: &'a DocumentStore<B>,
    schema: Arc<Schema>,
}

impl<'a, B: StoreBackend> Clone for Model<'a, B> {
    fn clone(&self) -> Self {
        Self {
            store: self.store,
            schema: self.schema.clone(),
        }
    }
}

impl<'a, B: StoreBackend> Model<'a, B> {
    pub(crate) fn new(store: &'a DocumentStore<B>, schema: Arc<Schema>) -> Self {
        Self { store, schema }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn collection_name(&self) -> &str {
        self.schema.collection_name()
    }

    pub(crate) fn backend(&self) -> &'a B {
        self.store.backend()
    }

    /// Creates the backing collection and every declared index. Runs once per collection;
    /// later calls return immediately.
    pub async fn ensure_indexes(&self) -> DocmapResult<()> {
        let collection = self.collection_name();

        if self.store.is_bootstrapped(collection).await {
            return Ok(());
        }

        let existing = self.backend().list_collections().await?;
        if !existing.iter().any(|name| name == collection) {
            self.backend().create_collection(collection).await?;
        }

        for index in self.schema.indexes() {
            let name = self
                .backend()
                .create_index(index.clone(), collection)
                .await
                .map_err(|e| e.scoped(self.name()))?;

            info!(target: "docmap::model", model = self.name(), index = %name, unique = index.unique, "Ensured index");
        }

        self.store.mark_bootstrapped(collection).await;

        Ok(())
    }

    /// Builds an unsaved record of this schema.
    pub fn new_record(&self, values: Document) -> DocmapResult<Record> {
        Record::new(self.schema.clone(), values)
    }

    /// Rebuilds a record from a raw store document.
    pub fn hydrate(&self, raw: Document) -> DocmapResult<Record> {
        Record::hydrate(self.schema.clone(), raw)
    }

    fn check_owner(&self, record: &Record) -> DocmapResult<()> {
        if Arc::ptr_eq(record.schema(), &self.schema) {
            Ok(())
        } else {
            Err(DocmapError::InvalidDocument(format!(
                "a {} record cannot be saved through the {} model",
                record.schema().name(),
                self.name()
            )))
        }
    }

    /// Persists a record.
    ///
    /// A fresh record is inserted and receives the generated identity. A record that came
    /// from the store is updated by identity, writing only the fields changed since it was
    /// loaded: changed fields holding a value are `$set`, cleared ones are `$unset`.
    pub async fn save(&self, record: &mut Record) -> DocmapResult<()> {
        self.check_owner(record)?;
        self.ensure_indexes().await?;

        if !record.is_from_db() {
            let ids = self
                .backend()
                .insert_documents(vec![record.to_document()], self.collection_name())
                .await?;

            record.mark_saved(ids.into_iter().next());
            debug!(target: "docmap::model", model = self.name(), id = ?record.id(), "Inserted record");

            return Ok(());
        }

        let id = record
            .id()
            .ok_or_else(|| DocmapError::InvalidDocument(format!(
                "{} record loaded without its identity cannot be saved", self.name()
            )))?;

        let mut set = Document::new();
        let mut unset = Document::new();

        for (name, value) in record.changed() {
            match value {
                Bson::Null => unset.insert(name, ""),
                value => set.insert(name, value.clone()),
            };
        }

        if set.is_empty() && unset.is_empty() {
            return Ok(());
        }

        let mut update = Document::new();
        if !set.is_empty() {
            update.insert("$set", set);
        }
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        self.backend()
            .update_documents(doc! { ID_FIELD: id }, update, false, self.collection_name())
            .await
            .map_err(|e| e.scoped(self.name()))?;

        record.mark_saved(None);
        debug!(target: "docmap::model", model = self.name(), id = %id, "Updated record");

        Ok(())
    }

    /// Constructs and saves a record in one step.
    pub async fn create(&self, values: Document) -> DocmapResult<Record> {
        let mut record = self.new_record(values)?;
        self.save(&mut record).await?;

        Ok(record)
    }

    /// Inserts several fresh records in one store round trip.
    pub async fn bulk_create(&self, mut records: Vec<Record>) -> DocmapResult<Vec<Record>> {
        if records.is_empty() {
            return Ok(records);
        }

        for record in &records {
            self.check_owner(record)?;
            if record.is_from_db() {
                return Err(DocmapError::InvalidDocument(format!(
                    "bulk_create only accepts unsaved {} records", self.name()
                )));
            }
        }

        self.ensure_indexes().await?;

        let ids = self
            .backend()
            .insert_documents(
                records
                    .iter()
                    .map(Record::to_document)
                    .collect(),
                self.collection_name(),
            )
            .await?;

        if ids.len() != records.len() {
            return Err(DocmapError::Backend(format!(
                "store returned {} identities for {} inserted documents",
                ids.len(),
                records.len()
            )));
        }

        for (record, id) in records.iter_mut().zip(ids) {
            record.mark_saved(Some(id));
        }

        debug!(target: "docmap::model", model = self.name(), count = records.len(), "Bulk inserted records");

        Ok(records)
    }

    /// Fetches the single document matching `filter`.
    pub async fn get(&self, filter: Document) -> DocmapResult<Record> {
        self.get_with(filter, Projection::All).await
    }

    /// Fetches the single document matching `filter` under a projection. Fields left out by
    /// the projection are unset on the returned record.
    ///
    /// Fails with `DoesNotExist` when nothing matches and `MultipleObjectsExist` when more
    /// than one document matches.
    pub async fn get_with(&self, filter: Document, projection: Projection) -> DocmapResult<Record> {
        self.check_projection(&projection)?;
        self.ensure_indexes().await?;

        let criteria = normalize_criteria(filter)?;
        let described = criteria.to_string();

        let mut documents = self
            .backend()
            .find_documents(
                FindQuery::builder()
                    .filter(criteria)
                    .projection(projection.to_document())
                    .limit(2)
                    .build(),
                self.collection_name(),
            )
            .await
            .map_err(|e| e.scoped(self.name()))?;

        match documents.len() {
            0 => Err(DocmapError::DoesNotExist {
                model: self.name().to_string(),
                filter: described,
            }),
            1 => self.hydrate(documents.remove(0)),
            _ => Err(DocmapError::MultipleObjectsExist {
                model: self.name().to_string(),
                filter: described,
            }),
        }
    }

    /// Returns an unmaterialized query set over documents matching `filter`.
    pub fn filter(&self, filter: Document) -> QuerySet<'a, B> {
        QuerySet::new(self.clone(), filter, Projection::All)
    }

    /// Returns an unmaterialized query set under a projection.
    pub fn filter_with(&self, filter: Document, projection: Projection) -> DocmapResult<QuerySet<'a, B>> {
        self.check_projection(&projection)?;

        Ok(QuerySet::new(self.clone(), filter, projection))
    }

    /// Removes every matching document.
    pub async fn remove(&self, filter: Document) -> DocmapResult<u64> {
        self.backend()
            .remove_documents(normalize_criteria(filter)?, self.collection_name())
            .await
            .map_err(|e| e.scoped(self.name()))
    }

    /// Every field a projection names (up to the first path segment) must be registered.
    fn check_projection(&self, projection: &Projection) -> DocmapResult<()> {
        for path in projection.paths() {
            let root = path
                .split('.')
                .next()
                .unwrap_or_default();
            self.schema.require(root)?;
        }

        Ok(())
    }
}
