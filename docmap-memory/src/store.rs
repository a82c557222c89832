//! In-memory storage implementation for document stores.
//!
//! This module provides a simple in-memory backend that keeps each collection as an
//! ordered list of BSON documents, together with its index declarations, behind an
//! async-safe read-write lock.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document, oid::ObjectId};
use tracing::debug;

use docmap_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocmapError, DocmapResult},
    query::{CountOptions, FindQuery, Hint, IndexModel},
    schema::ID_FIELD,
};

use crate::{
    evaluator::{Comparable, matches, resolve, validate_filter},
    projection::ProjectionPlan,
    update::{apply_update, validate_update},
};

const ID_INDEX: &str = "_id_";

#[derive(Debug, Default, Clone)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexModel>,
}

impl Collection {
    fn index_names(&self) -> Vec<String> {
        std::iter::once(ID_INDEX.to_string())
            .chain(self.indexes.iter().map(IndexModel::name))
            .collect()
    }

    fn check_hint(&self, hint: &Hint) -> DocmapResult<()> {
        let known = match hint {
            Hint::Name(name) => self.index_names().contains(name),
            Hint::Keys(keys) => {
                keys.keys().all(|key| key == "$natural")
                    || *keys == bson::doc! { ID_FIELD: 1 }
                    || self.indexes.iter().any(|index| index.keys == *keys)
            }
        };

        if known {
            Ok(())
        } else {
            Err(DocmapError::InvalidQuery(
                "hint provided does not correspond to an existing index".to_string(),
            ))
        }
    }

    fn matching(&self, filter: &Document) -> impl Iterator<Item = &Document> {
        self.documents
            .iter()
            .filter(move |document| matches(document, filter))
    }
}

type StoreMap = HashMap<String, Collection>;

/// Thread-safe in-memory document storage backend.
///
/// This struct implements the [`StoreBackend`] trait with the filter, projection, sort,
/// update-operator and unique-index semantics of a document database, operating
/// entirely in memory.
///
/// # Thread Safety
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, allowing
/// it to be safely shared across async tasks. Multiple clones of the same instance
/// share the same underlying data.
///
/// # Performance
///
/// Queries scan every document in a collection; indexes are only used to enforce
/// uniqueness and validate hints.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::InMemoryStore;
/// use docmap::backend::StoreBackend;
/// use bson::doc;
///
/// let store = InMemoryStore::new();
/// let ids = store.insert_documents(vec![doc! { "name": "Alice", "age": 30 }], "users").await?;
/// let found = store.find_documents(FindQuery::new(doc! { "age": { "$gt": 20 } }), "users").await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    store: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
        }
    }

    /// Creates a builder for constructing an `InMemoryStore`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use docmap_memory::InMemoryStore;
    ///
    /// let store = InMemoryStore::builder().build().await.unwrap();
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }
}

/// Values a document holds at each indexed path. Missing paths index as null.
fn index_values<'a>(document: &'a Document, paths: &[&str]) -> Vec<Comparable<'a>> {
    paths
        .iter()
        .map(|path| {
            resolve(document, path)
                .first()
                .map(|value| Comparable::from(*value))
                .unwrap_or(Comparable::Null)
        })
        .collect()
}

/// Verifies that `incoming` documents clash neither with `existing` ones nor with each
/// other under `_id` or any unique index. Numeric values compare across types.
fn check_unique(
    name: &str,
    existing: &[&Document],
    incoming: &[Document],
    indexes: &[IndexModel],
) -> DocmapResult<()> {
    let constraints = std::iter::once((ID_INDEX.to_string(), vec![ID_FIELD]))
        .chain(
            indexes
                .iter()
                .filter(|index| index.unique)
                .map(|index| (index.name(), index.keys.keys().map(String::as_str).collect())),
        );

    for (index, paths) in constraints {
        for (position, document) in incoming.iter().enumerate() {
            let key = index_values(document, &paths);
            let clash = existing
                .iter()
                .copied()
                .chain(&incoming[..position])
                .any(|other| index_values(other, &paths) == key);

            if clash {
                return Err(DocmapError::DuplicateKey {
                    collection: name.to_string(),
                    index,
                });
            }
        }
    }

    Ok(())
}

fn sort_documents(documents: &mut [Document], sort: &Document) {
    documents.sort_by(|a, b| {
        for (path, direction) in sort {
            let left = resolve(a, path)
                .first()
                .map(|value| Comparable::from(*value))
                .unwrap_or(Comparable::Null);
            let right = resolve(b, path)
                .first()
                .map(|value| Comparable::from(*value))
                .unwrap_or(Comparable::Null);

            let descending = matches!(direction, Bson::Int32(d) if *d < 0)
                || matches!(direction, Bson::Int64(d) if *d < 0)
                || matches!(direction, Bson::Double(d) if *d < 0.0);

            let ordering = if descending {
                right.sort_cmp(&left)
            } else {
                left.sort_cmp(&right)
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

fn bounded<T>(items: impl Iterator<Item = T>, skip: Option<u64>, limit: Option<u64>) -> impl Iterator<Item = T> {
    let limit = match limit {
        Some(0) | None => usize::MAX,
        Some(limit) => usize::try_from(limit).unwrap_or(usize::MAX),
    };

    items
        .skip(skip.map_or(0, |skip| usize::try_from(skip).unwrap_or(usize::MAX)))
        .take(limit)
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn find_documents(&self, query: FindQuery, collection: &str) -> DocmapResult<Vec<Document>> {
        validate_filter(&query.filter)?;
        let plan = query
            .projection
            .as_ref()
            .map(|projection| ProjectionPlan::parse(projection, &query.filter))
            .transpose()?;

        let store = self.store.read().await;
        let Some(collection_state) = store.get(collection) else {
            return Ok(vec![]);
        };

        if let Some(hint) = &query.hint {
            collection_state.check_hint(hint)?;
        }

        let mut found: Vec<Document> = collection_state
            .matching(&query.filter)
            .cloned()
            .collect();

        if let Some(sort) = &query.sort {
            sort_documents(&mut found, sort);
        }

        let documents: Vec<Document> = bounded(found.into_iter(), query.skip, query.limit)
            .map(|document| match &plan {
                Some(plan) => plan.apply(&document),
                None => document,
            })
            .collect();

        debug!(target: "docmap::memory", collection, count = documents.len(), "Found documents");

        Ok(documents)
    }

    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocmapResult<Vec<Bson>> {
        let mut store = self.store.write().await;
        let collection_state = store
            .entry(collection.to_string())
            .or_default();

        let mut prepared = Vec::with_capacity(documents.len());
        let mut ids = Vec::with_capacity(documents.len());

        for document in documents {
            let id = match document.get(ID_FIELD) {
                Some(Bson::Null) | None => Bson::ObjectId(ObjectId::new()),
                Some(id) => id.clone(),
            };

            let mut stored = Document::new();
            stored.insert(ID_FIELD, id.clone());
            for (key, value) in document {
                if key != ID_FIELD {
                    stored.insert(key, value);
                }
            }

            prepared.push(stored);
            ids.push(id);
        }

        let existing: Vec<&Document> = collection_state.documents.iter().collect();
        check_unique(collection, &existing, &prepared, &collection_state.indexes)?;
        collection_state.documents.extend(prepared);

        debug!(target: "docmap::memory", collection, count = ids.len(), "Inserted documents");

        Ok(ids)
    }

    async fn update_documents(
        &self,
        filter: Document,
        update: Document,
        multi: bool,
        collection: &str,
    ) -> DocmapResult<u64> {
        validate_filter(&filter)?;
        validate_update(&update)?;

        let mut store = self.store.write().await;
        let Some(collection_state) = store.get_mut(collection) else {
            return Ok(0);
        };

        let mut positions = Vec::new();
        let mut changed = Vec::new();

        for (position, document) in collection_state.documents.iter().enumerate() {
            if !matches(document, &filter) {
                continue;
            }

            let mut updated = document.clone();
            apply_update(&mut updated, &update)?;
            positions.push(position);
            changed.push(updated);

            if !multi {
                break;
            }
        }

        let untouched: Vec<&Document> = collection_state
            .documents
            .iter()
            .enumerate()
            .filter(|(position, _)| !positions.contains(position))
            .map(|(_, document)| document)
            .collect();
        check_unique(collection, &untouched, &changed, &collection_state.indexes)?;

        let matched = positions.len() as u64;
        for (position, document) in positions.into_iter().zip(changed) {
            collection_state.documents[position] = document;
        }

        debug!(target: "docmap::memory", collection, matched, multi, "Updated documents");

        Ok(matched)
    }

    async fn remove_documents(&self, filter: Document, collection: &str) -> DocmapResult<u64> {
        validate_filter(&filter)?;

        let mut store = self.store.write().await;
        let Some(collection_state) = store.get_mut(collection) else {
            return Ok(0);
        };

        let before = collection_state.documents.len();
        collection_state
            .documents
            .retain(|document| !matches(document, &filter));

        Ok((before - collection_state.documents.len()) as u64)
    }

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        collection: &str,
    ) -> DocmapResult<u64> {
        validate_filter(&filter)?;

        let store = self.store.read().await;
        let Some(collection_state) = store.get(collection) else {
            return Ok(0);
        };

        Ok(bounded(collection_state.matching(&filter), options.skip, options.limit).count() as u64)
    }

    async fn distinct_values(&self, field: &str, filter: Document, collection: &str) -> DocmapResult<Vec<Bson>> {
        validate_filter(&filter)?;

        let store = self.store.read().await;
        let Some(collection_state) = store.get(collection) else {
            return Ok(vec![]);
        };

        let mut values: Vec<Bson> = Vec::new();

        for document in collection_state.matching(&filter) {
            for value in resolve(document, field) {
                let flattened = match value {
                    Bson::Array(items) => items.iter().collect::<Vec<_>>(),
                    other => vec![other],
                };

                for item in flattened {
                    if !values.iter().any(|seen| Comparable::from(seen) == Comparable::from(item)) {
                        values.push(item.clone());
                    }
                }
            }
        }

        Ok(values)
    }

    async fn create_index(&self, index: IndexModel, collection: &str) -> DocmapResult<String> {
        let mut store = self.store.write().await;
        let collection_state = store
            .entry(collection.to_string())
            .or_default();

        let name = index.name();

        if collection_state.indexes.iter().any(|existing| existing.keys == index.keys) {
            return Ok(name);
        }

        if index.unique {
            check_unique(collection, &[], &collection_state.documents, std::slice::from_ref(&index))?;
        }

        collection_state.indexes.push(index);
        debug!(target: "docmap::memory", collection, index = %name, "Created index");

        Ok(name)
    }

    async fn list_indexes(&self, collection: &str) -> DocmapResult<Vec<String>> {
        self.store
            .read()
            .await
            .get(collection)
            .map(Collection::index_names)
            .ok_or_else(|| DocmapError::CollectionNotFound(collection.to_string()))
    }

    async fn create_collection(&self, name: &str) -> DocmapResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocmapResult<()> {
        let mut store = self.store.write().await;

        if store.remove(name).is_none() {
            return Err(DocmapError::CollectionNotFound(name.to_string()));
        }

        Ok(())
    }

    async fn list_collections(&self) -> DocmapResult<Vec<String>> {
        let mut names: Vec<String> = self.store
            .read()
            .await
            .keys()
            .cloned()
            .collect();
        names.sort();

        Ok(names)
    }
}

/// Builder for constructing [`InMemoryStore`] instances.
#[derive(Debug, Default)]
pub struct InMemoryStoreBuilder;

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocmapResult<Self::Backend> {
        Ok(InMemoryStore::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docmap_core::query::SortDirection;

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                vec![
                    doc! { "name": "Anthony", "age": 29, "tags": ["a", "b"] },
                    doc! { "name": "Mary", "age": 52, "tags": ["b", "c"] },
                    doc! { "name": "John", "age": 41 },
                ],
                "people",
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn insert_assigns_ids_first() {
        let store = InMemoryStore::new();
        let ids = store
            .insert_documents(vec![doc! { "name": "Anthony" }], "people")
            .await
            .unwrap();

        let found = store.find_documents(FindQuery::new(doc! {}), "people").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(found[0].get("_id"), Some(&ids[0]));
    }

    #[tokio::test]
    async fn find_sorts_skips_and_limits() {
        let store = seeded().await;
        let query = FindQuery::builder()
            .filter(doc! { "age": { "$gt": 30 } })
            .sort("age", SortDirection::Desc)
            .limit(1)
            .build();

        let found = store.find_documents(query, "people").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("name").unwrap(), "Mary");

        let query = FindQuery::builder()
            .sort("name", SortDirection::Asc)
            .skip(1)
            .build();
        let names: Vec<String> = store
            .find_documents(query, "people")
            .await
            .unwrap()
            .iter()
            .map(|d| d.get_str("name").unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["John", "Mary"]);
    }

    #[tokio::test]
    async fn unknown_operator_is_an_invalid_query() {
        let store = InMemoryStore::new();
        let err = store
            .find_documents(FindQuery::new(doc! { "name": { "$asfdf": 1 } }), "people")
            .await
            .unwrap_err();
        assert!(matches!(err, DocmapError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn hints_must_name_an_index() {
        let store = seeded().await;
        store
            .create_index(IndexModel::new(doc! { "name": 1 }, false), "people")
            .await
            .unwrap();

        let by_name = FindQuery::builder().hint(Some(Hint::Name("name_1".into()))).build();
        assert_eq!(store.find_documents(by_name, "people").await.unwrap().len(), 3);

        let missing = FindQuery::builder().hint(Some(Hint::Keys(doc! { "age": 1 }))).build();
        assert!(matches!(
            store.find_documents(missing, "people").await.unwrap_err(),
            DocmapError::InvalidQuery(_)
        ));
    }

    #[tokio::test]
    async fn update_applies_operators() {
        let store = seeded().await;

        let matched = store
            .update_documents(doc! { "age": { "$gt": 30 } }, doc! { "$set": { "age": 60 } }, true, "people")
            .await
            .unwrap();
        assert_eq!(matched, 2);

        let matched = store
            .update_documents(doc! {}, doc! { "$inc": { "age": 1 } }, false, "people")
            .await
            .unwrap();
        assert_eq!(matched, 1);

        let count = store
            .count_documents(doc! { "age": 60 }, CountOptions::default(), "people")
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn unique_indexes_are_enforced() {
        let store = seeded().await;
        let name = store
            .create_index(IndexModel::new(doc! { "name": 1 }, true), "people")
            .await
            .unwrap();
        assert_eq!(name, "name_1");

        let err = store
            .insert_documents(vec![doc! { "name": "Mary" }], "people")
            .await
            .unwrap_err();
        assert!(matches!(err, DocmapError::DuplicateKey { ref index, .. } if index == "name_1"));

        let err = store
            .update_documents(doc! { "name": "John" }, doc! { "$set": { "name": "Mary" } }, false, "people")
            .await
            .unwrap_err();
        assert!(matches!(err, DocmapError::DuplicateKey { .. }));

        assert_eq!(
            store.list_indexes("people").await.unwrap(),
            vec!["_id_".to_string(), "name_1".to_string()]
        );
    }

    #[tokio::test]
    async fn unique_indexes_compare_numbers_across_types() {
        let store = InMemoryStore::new();
        store
            .create_index(IndexModel::new(doc! { "serial": 1 }, true), "devices")
            .await
            .unwrap();
        store
            .insert_documents(vec![doc! { "serial": 1_i32 }], "devices")
            .await
            .unwrap();

        let err = store
            .insert_documents(vec![doc! { "serial": 1_i64 }], "devices")
            .await
            .unwrap_err();
        assert!(matches!(err, DocmapError::DuplicateKey { ref index, .. } if index == "serial_1"));

        let err = store
            .insert_documents(vec![doc! { "serial": 2_i32 }, doc! { "serial": 2.0 }], "devices")
            .await
            .unwrap_err();
        assert!(matches!(err, DocmapError::DuplicateKey { .. }));

        // A rejected write leaves the collection untouched.
        let count = store
            .count_documents(doc! {}, CountOptions::default(), "devices")
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn count_respects_bounds() {
        let store = seeded().await;
        let bounded = CountOptions { limit: Some(2), skip: Some(0) };

        assert_eq!(store.count_documents(doc! {}, CountOptions::default(), "people").await.unwrap(), 3);
        assert_eq!(store.count_documents(doc! {}, bounded, "people").await.unwrap(), 2);
        assert_eq!(store.count_documents(doc! {}, CountOptions::default(), "missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn distinct_flattens_arrays() {
        let store = seeded().await;
        let tags = store.distinct_values("tags", doc! {}, "people").await.unwrap();
        assert_eq!(tags, vec![Bson::from("a"), Bson::from("b"), Bson::from("c")]);
    }

    #[tokio::test]
    async fn remove_and_drop() {
        let store = seeded().await;

        assert_eq!(store.remove_documents(doc! { "age": { "$lt": 45 } }, "people").await.unwrap(), 2);
        assert_eq!(store.list_collections().await.unwrap(), vec!["people".to_string()]);

        store.drop_collection("people").await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
        assert!(matches!(
            store.drop_collection("people").await.unwrap_err(),
            DocmapError::CollectionNotFound(_)
        ));
    }
}
