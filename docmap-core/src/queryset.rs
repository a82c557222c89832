//! Lazy, chainable queries over a model's collection.
//!
//! A [`QuerySet`] records criteria and query parameters without touching the store. It is
//! mutated in place: every chaining method returns `&mut Self` and discards any cached
//! result. The store is queried once on first materialization and the hydrated records are
//! cached until the next chaining call or update.
//!
//! # Example
//!
//! ```ignore
//! let mut adults = people.filter(doc! { "age__gte": 18 });
//! adults
//!     .filter(doc! { "name": "Anthony" })
//!     .order_by("age", SortDirection::Desc)
//!     .limit(10);
//!
//! let total = adults.count(false).await?;
//! for record in adults.fetch().await? {
//!     println!("{}", record.to_json()?);
//! }
//! ```

use bson::{Bson, Document, doc};
use futures::{
    StreamExt, TryStreamExt,
    stream::{self, BoxStream},
};
use serde_json::Value;
use tracing::debug;

use crate::{
    backend::StoreBackend,
    error::{DocmapError, DocmapResult},
    model::Model,
    query::{CountOptions, FindQuery, Hint, Projection, SortDirection, merge_criteria, normalize_criteria},
    record::Record,
    schema::ID_FIELD,
    serialize::serialize_value,
};

#[derive(Debug)]
pub struct QuerySet<'a, B: StoreBackend> {
    model: Model<'a, B>,
    filters: Vec<Document>,
    projection: Projection,
    sort: Option<Document>,
    limit: Option<u64>,
    skip: Option<u64>,
    hint: Option<Hint>,
    cache: Option<Vec<Record>>,
}

impl<'a, B: StoreBackend> QuerySet<'a, B> {
    pub(crate) fn new(model: Model<'a, B>, filter: Document, projection: Projection) -> Self {
        Self {
            model,
            filters: vec![filter],
            projection,
            sort: None,
            limit: None,
            skip: None,
            hint: None,
            cache: None,
        }
    }

    pub fn model(&self) -> &Model<'a, B> {
        &self.model
    }

    /// Narrows the query. The new criteria are AND-ed with the existing ones.
    pub fn filter(&mut self, extra: Document) -> &mut Self {
        self.filters.push(extra);
        self.invalidate()
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self.invalidate()
    }

    pub fn skip(&mut self, skip: u64) -> &mut Self {
        self.skip = Some(skip);
        self.invalidate()
    }

    /// Replaces the sort specification, e.g. `{ "age": -1, "name": 1 }`.
    pub fn sort(&mut self, sort: Document) -> &mut Self {
        self.sort = Some(sort);
        self.invalidate()
    }

    /// Appends a sort key.
    pub fn order_by(&mut self, field: impl Into<String>, direction: SortDirection) -> &mut Self {
        self.sort
            .get_or_insert_with(Document::new)
            .insert(field.into(), direction.key());
        self.invalidate()
    }

    pub fn hint(&mut self, hint: Hint) -> &mut Self {
        self.hint = Some(hint);
        self.invalidate()
    }

    fn invalidate(&mut self) -> &mut Self {
        self.cache = None;
        self
    }

    /// The combined, normalized criteria of every `filter` call.
    pub fn criteria(&self) -> DocmapResult<Document> {
        let mut criteria = Document::new();

        for filter in &self.filters {
            merge_criteria(&mut criteria, normalize_criteria(filter.clone())?);
        }

        Ok(criteria)
    }

    fn find_query(&self, criteria: Document) -> FindQuery {
        let mut builder = FindQuery::builder()
            .filter(criteria)
            .projection(self.projection.to_document())
            .sort_by(self.sort.clone())
            .hint(self.hint.clone());

        if let Some(limit) = self.limit {
            builder = builder.limit(limit);
        }
        if let Some(skip) = self.skip {
            builder = builder.skip(skip);
        }

        builder.build()
    }

    async fn find_raw(&self) -> DocmapResult<Vec<Document>> {
        self.model.ensure_indexes().await?;

        let documents = self
            .model
            .backend()
            .find_documents(self.find_query(self.criteria()?), self.model.collection_name())
            .await
            .map_err(|e| e.scoped(self.model.name()))?;

        debug!(target: "docmap::queryset", model = self.model.name(), count = documents.len(), "Fetched documents");

        Ok(documents)
    }

    async fn load(&self) -> DocmapResult<Vec<Record>> {
        self.find_raw()
            .await?
            .into_iter()
            .map(|document| self.model.hydrate(document))
            .collect()
    }

    /// Number of matching documents. With `use_limit`, the count is bounded by the limit and
    /// skip and answered from the cache when the query set is already materialized.
    pub async fn count(&self, use_limit: bool) -> DocmapResult<u64> {
        if use_limit {
            if let Some(records) = &self.cache {
                return Ok(records.len() as u64);
            }
        }

        self.model.ensure_indexes().await?;

        let options = if use_limit {
            CountOptions {
                limit: self.limit,
                skip: self.skip,
            }
        } else {
            CountOptions::default()
        };

        let count = self
            .model
            .backend()
            .count_documents(self.criteria()?, options, self.model.collection_name())
            .await
            .map_err(|e| e.scoped(self.model.name()))?;

        debug!(target: "docmap::queryset", model = self.model.name(), count, use_limit, "Counted documents");

        Ok(count)
    }

    /// Whether at least one document matches.
    pub async fn exists(&self) -> DocmapResult<bool> {
        self.model.ensure_indexes().await?;

        let query = FindQuery::builder()
            .filter(self.criteria()?)
            .projection(Some(doc! { ID_FIELD: 1 }))
            .hint(self.hint.clone())
            .limit(1)
            .build();

        let found = self
            .model
            .backend()
            .find_documents(query, self.model.collection_name())
            .await
            .map_err(|e| e.scoped(self.model.name()))?;

        Ok(!found.is_empty())
    }

    /// Unique values of a field among matching documents.
    pub async fn distinct(&self, field: &str) -> DocmapResult<Vec<Bson>> {
        let root = field.split('.').next().unwrap_or(field);
        self.model.schema().require(root)?;
        self.model.ensure_indexes().await?;

        self.model
            .backend()
            .distinct_values(field, self.criteria()?, self.model.collection_name())
            .await
            .map_err(|e| e.scoped(self.model.name()))
    }

    /// Applies a raw operator update (`{ "$set": {..}, "$inc": {..} }`) to every matching
    /// document and returns the updated records.
    ///
    /// Every targeted field must be registered. Whole-field `$set`, `$setOnInsert` and `$inc`
    /// operands are coerced through their field before anything is sent to the store.
    pub async fn update(&mut self, update: Document) -> DocmapResult<Vec<Record>> {
        if update.is_empty() {
            return Err(DocmapError::InvalidUpdate("update document is empty".to_string()));
        }

        let mut coerced = Document::new();
        for (op, operand) in update {
            if !op.starts_with('$') {
                return Err(DocmapError::InvalidUpdate(format!(
                    "'{op}' is not an update operator; use update_fields to assign fields"
                )));
            }

            let operand = match operand {
                Bson::Document(targets) => Bson::Document(self.coerce_operand(&op, targets)?),
                other => serialize_value(&other, false)?,
            };
            coerced.insert(op, operand);
        }

        self.apply(coerced).await
    }

    fn coerce_operand(&self, op: &str, targets: Document) -> DocmapResult<Document> {
        let schema = self.model.schema();
        let mut coerced = Document::new();

        for (path, value) in targets {
            let (root, nested) = match path.split_once('.') {
                Some((root, _)) => (root, true),
                None => (path.as_str(), false),
            };
            let field = schema.require(root)?;

            let value = match op {
                "$set" | "$setOnInsert" | "$inc" if !nested => field.serialize(&value, false)?,
                _ => serialize_value(&value, false)?,
            };
            coerced.insert(path, value);
        }

        Ok(coerced)
    }

    /// Assigns fields on every matching document. Each key must be a registered field and
    /// each value is coerced through it before anything is sent to the store.
    pub async fn update_fields(&mut self, values: Document) -> DocmapResult<Vec<Record>> {
        if values.is_empty() {
            return Err(DocmapError::InvalidUpdate("no fields to update".to_string()));
        }

        let mut set = Document::new();
        for (name, value) in values {
            let value = self
                .model
                .schema()
                .require(&name)?
                .serialize(&value, false)?;
            set.insert(name, value);
        }

        self.apply(doc! { "$set": set }).await
    }

    /// Writes `update` and refetches the touched documents in full, whatever the query
    /// set's projection, so the returned records carry their identity and can be saved.
    async fn apply(&mut self, update: Document) -> DocmapResult<Vec<Record>> {
        let model = self.model.clone();
        let collection = model.collection_name();
        let scope = |e: DocmapError| e.scoped(model.name());

        model.ensure_indexes().await?;
        let criteria = self.criteria()?;

        let ids: Vec<Bson> = model
            .backend()
            .find_documents(
                FindQuery::builder()
                    .filter(criteria.clone())
                    .projection(Some(doc! { ID_FIELD: 1 }))
                    .hint(self.hint.clone())
                    .build(),
                collection,
            )
            .await
            .map_err(scope)?
            .into_iter()
            .filter_map(|mut document| document.remove(ID_FIELD))
            .collect();

        let matched = model
            .backend()
            .update_documents(criteria, update, true, collection)
            .await
            .map_err(scope)?;

        self.cache = None;
        debug!(target: "docmap::queryset", model = model.name(), matched, "Updated documents");

        let documents = model
            .backend()
            .find_documents(
                FindQuery::builder()
                    .filter(doc! { ID_FIELD: { "$in": ids } })
                    .sort_by(self.sort.clone())
                    .build(),
                collection,
            )
            .await
            .map_err(scope)?;

        documents
            .into_iter()
            .map(|document| model.hydrate(document))
            .collect()
    }

    /// Matching documents after projection, restricted to registered fields, without
    /// building records.
    pub async fn serialize(&self) -> DocmapResult<Vec<Document>> {
        self.find_raw()
            .await?
            .into_iter()
            .map(|document| self.registered(document, false))
            .collect()
    }

    /// Like [`QuerySet::serialize`], rendered as JSON values.
    pub async fn serialize_json(&self) -> DocmapResult<Vec<Value>> {
        self.find_raw()
            .await?
            .into_iter()
            .map(|document| Ok(serde_json::to_value(Bson::Document(self.registered(document, true)?))?))
            .collect()
    }

    fn registered(&self, document: Document, to_json: bool) -> DocmapResult<Document> {
        let schema = self.model.schema();
        let mut kept = Document::new();

        for (key, value) in document {
            if schema.contains(&key) {
                kept.insert(key, serialize_value(&value, to_json)?);
            }
        }

        Ok(kept)
    }

    /// Materializes the query set, querying the store only if nothing is cached.
    pub async fn fetch(&mut self) -> DocmapResult<&[Record]> {
        if self.cache.is_none() {
            self.cache = Some(self.load().await?);
        }

        Ok(self.cache.as_deref().unwrap_or_default())
    }

    pub async fn len(&mut self) -> DocmapResult<usize> {
        Ok(self.fetch().await?.len())
    }

    pub async fn is_empty(&mut self) -> DocmapResult<bool> {
        Ok(self.fetch().await?.is_empty())
    }

    /// Positional access into the materialized results.
    pub async fn get(&mut self, index: usize) -> DocmapResult<Option<&Record>> {
        Ok(self.fetch().await?.get(index))
    }

    pub async fn first(&mut self) -> DocmapResult<Option<&Record>> {
        self.get(0).await
    }

    /// Consumes the query set, returning its records.
    pub async fn into_records(mut self) -> DocmapResult<Vec<Record>> {
        match self.cache.take() {
            Some(records) => Ok(records),
            None => self.load().await,
        }
    }

    /// Streams the materialized records. A failing query is reported as the first item.
    pub fn stream(&mut self) -> BoxStream<'_, DocmapResult<Record>> {
        stream::once(async move { self.fetch().await.map(<[Record]>::to_vec) })
            .map_ok(|records| stream::iter(records.into_iter().map(Ok::<Record, DocmapError>)))
            .try_flatten()
            .boxed()
    }
}
