use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Bson, Document};
use mongodb::{
    Client, Collection as MongoCollection, IndexModel as MongoIndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{ClientOptions, CountOptions as MongoCountOptions, FindOptions, Hint as MongoHint, IndexOptions},
};
use tracing::{debug, info};

use docmap_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    error::{DocmapError, DocmapResult},
    query::{CountOptions, FindQuery, Hint, IndexModel},
};

/// Environment variable holding the connection string read by [`MongoDbStoreBuilder::from_env`].
pub const DSN_ENV: &str = "DOCMAP_MONGODB_DSN";
/// Environment variable holding the database name read by [`MongoDbStoreBuilder::from_env`].
pub const DATABASE_ENV: &str = "DOCMAP_MONGODB_DATABASE";

/// Server error codes reporting a malformed filter, projection, hint or update.
const QUERY_ERROR_CODES: &[i32] = &[2, 9, 14, 66, 31253, 31254];
const DUPLICATE_KEY: i32 = 11000;
const NAMESPACE_EXISTS: i32 = 48;

#[derive(Debug)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, database)
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

/// Error code carried by a command or write failure, if any.
fn error_code(error: &MongoError) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|write| write.code),
        _ => None,
    }
}

/// Translates driver errors into the store error taxonomy.
fn translate(error: MongoError, collection: &str) -> DocmapError {
    match error_code(&error) {
        Some(DUPLICATE_KEY) => DocmapError::DuplicateKey {
            collection: collection.to_string(),
            index: duplicate_index(&error.to_string()),
        },
        Some(code) if QUERY_ERROR_CODES.contains(&code) => DocmapError::InvalidQuery(error.to_string()),
        _ => DocmapError::Backend(error.to_string()),
    }
}

/// The driver's signed limit. Limits beyond `i64::MAX` saturate.
fn find_limit(limit: u64) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// Pulls the index name out of an `E11000 duplicate key error ... index: name_1 dup key`
/// message.
fn duplicate_index(message: &str) -> String {
    message
        .split_once("index: ")
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .unwrap_or("unknown")
        .to_string()
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn find_documents(&self, query: FindQuery, collection: &str) -> DocmapResult<Vec<Document>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(find_limit(limit));
        }
        if let Some(skip) = query.skip {
            options.skip = Some(skip);
        }
        options.sort = query.sort;
        options.projection = query.projection;
        options.hint = query.hint.map(|hint| match hint {
            Hint::Keys(keys) => MongoHint::Keys(keys),
            Hint::Name(name) => MongoHint::Name(name),
        });

        let documents = self
            .get_collection(collection)
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(|e| translate(e, collection))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| translate(e, collection))?;

        debug!(target: "docmap::mongodb", collection, count = documents.len(), "Found documents");

        Ok(documents)
    }

    async fn insert_documents(&self, documents: Vec<Document>, collection: &str) -> DocmapResult<Vec<Bson>> {
        let count = documents.len();
        let result = self
            .get_collection(collection)
            .insert_many(documents)
            .await
            .map_err(|e| translate(e, collection))?;

        let mut ids = Vec::with_capacity(count);
        for position in 0..count {
            let id = result
                .inserted_ids
                .get(&position)
                .cloned()
                .ok_or_else(|| DocmapError::Backend(format!("no identity reported for document {position}")))?;
            ids.push(id);
        }

        Ok(ids)
    }

    async fn update_documents(
        &self,
        filter: Document,
        update: Document,
        multi: bool,
        collection: &str,
    ) -> DocmapResult<u64> {
        let target = self.get_collection(collection);
        let result = if multi {
            target.update_many(filter, update).await
        } else {
            target.update_one(filter, update).await
        }
        .map_err(|e| translate(e, collection))?;

        Ok(result.matched_count)
    }

    async fn remove_documents(&self, filter: Document, collection: &str) -> DocmapResult<u64> {
        Ok(
            self.get_collection(collection)
                .delete_many(filter)
                .await
                .map_err(|e| translate(e, collection))?
                .deleted_count
        )
    }

    async fn count_documents(
        &self,
        filter: Document,
        options: CountOptions,
        collection: &str,
    ) -> DocmapResult<u64> {
        let mut count_options = MongoCountOptions::default();
        count_options.limit = options.limit.filter(|limit| *limit > 0);
        count_options.skip = options.skip;

        self.get_collection(collection)
            .count_documents(filter)
            .with_options(count_options)
            .await
            .map_err(|e| translate(e, collection))
    }

    async fn distinct_values(&self, field: &str, filter: Document, collection: &str) -> DocmapResult<Vec<Bson>> {
        self.get_collection(collection)
            .distinct(field, filter)
            .await
            .map_err(|e| translate(e, collection))
    }

    async fn create_index(&self, index: IndexModel, collection: &str) -> DocmapResult<String> {
        let result = self
            .get_collection(collection)
            .create_index(
                MongoIndexModel::builder()
                    .keys(index.keys)
                    .options(
                        IndexOptions::builder()
                            .unique(index.unique)
                            .build()
                    )
                    .build()
            )
            .await
            .map_err(|e| translate(e, collection))?;

        Ok(result.index_name)
    }

    async fn list_indexes(&self, collection: &str) -> DocmapResult<Vec<String>> {
        self.get_collection(collection)
            .list_index_names()
            .await
            .map_err(|e| translate(e, collection))
    }

    async fn create_collection(&self, name: &str) -> DocmapResult<()> {
        match self
            .client
            .database(&self.database)
            .create_collection(name)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if error_code(&e) == Some(NAMESPACE_EXISTS) => Ok(()),
            Err(e) => Err(translate(e, name)),
        }
    }

    async fn drop_collection(&self, name: &str) -> DocmapResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(|e| translate(e, name))
    }

    async fn list_collections(&self) -> DocmapResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(|e| DocmapError::Backend(e.to_string()))
    }

    async fn shutdown(self) -> DocmapResult<()> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: String,
    app_name: Option<String>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: &str) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.to_string(),
            app_name: None,
        }
    }

    /// Reads the connection string and database name from `DOCMAP_MONGODB_DSN` and
    /// `DOCMAP_MONGODB_DATABASE`.
    pub fn from_env() -> DocmapResult<Self> {
        let read = |name: &str| {
            std::env::var(name)
                .map_err(|_| DocmapError::Initialization(format!("environment variable {name} is not set")))
        };

        Ok(Self::new(&read(DSN_ENV)?, &read(DATABASE_ENV)?))
    }

    /// Application name reported to the server.
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = Some(name.into());
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocmapResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocmapError::Initialization(e.to_string()))?;

        if self.app_name.is_some() {
            options.app_name = self.app_name;
        }

        let client = Client::with_options(options)
            .map_err(|e| DocmapError::Initialization(e.to_string()))?;

        info!(target: "docmap::mongodb", database = %self.database, "Connected MongoDB backend");

        Ok(MongoDbStore::new(client, self.database))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_index_is_read_from_the_message() {
        let message = "E11000 duplicate key error collection: test.product index: size_1_name_1 dup key: { size: 1 }";
        assert_eq!(duplicate_index(message), "size_1_name_1");
        assert_eq!(duplicate_index("something else"), "unknown");
    }

    #[test]
    fn oversized_limits_saturate() {
        assert_eq!(find_limit(10), 10);
        assert_eq!(find_limit(u64::MAX), i64::MAX);
    }

    #[test]
    fn builder_collects_options() {
        let builder = MongoDbStore::builder("mongodb://localhost:27017", "docmap").app_name("tests");
        assert_eq!(builder.app_name.as_deref(), Some("tests"));
        assert_eq!(builder.database, "docmap");
    }
}
