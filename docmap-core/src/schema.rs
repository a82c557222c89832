//! Schema registry: the ordered set of named fields a record shape is made of.
//!
//! A [`Schema`] is built once per record shape, usually at program startup, and shared by
//! every record and model handle through an `Arc`.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::{Arc, LazyLock};
//! use docmap::{field::{Field, IndexKind}, schema::Schema};
//!
//! static PRODUCT: LazyLock<Arc<Schema>> = LazyLock::new(|| {
//!     Schema::builder("Product")
//!         .field("name", Field::char())
//!         .field("size", Field::int())
//!         .unique_together(["size", "name"])
//!         .build()
//!         .expect("valid schema")
//! });
//! ```

use bson::{Bson, Document};
use std::{collections::HashMap, sync::Arc};

use crate::{
    error::{DocmapError, DocmapResult},
    field::{Field, IndexKind},
    query::IndexModel,
};

/// Name of the identity field every schema carries.
pub const ID_FIELD: &str = "_id";

/// An immutable, ordered name to field table bound to a backing collection.
#[derive(Debug)]
pub struct Schema {
    name: String,
    collection: String,
    fields: Vec<Field>,
    positions: HashMap<String, usize>,
    indexes: Vec<IndexModel>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// The model name used to scope errors.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collection_name(&self) -> &str {
        &self.collection
    }

    /// Registered fields in declaration order, identity first.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.positions
            .get(name)
            .map(|&idx| &self.fields[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.positions.contains_key(name)
    }

    /// Looks up a field or fails with [`DocmapError::UnknownField`].
    pub fn require(&self, name: &str) -> DocmapResult<&Field> {
        self.field(name)
            .ok_or_else(|| DocmapError::UnknownField {
                model: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Index declarations created when the schema is first used against a store.
    pub fn indexes(&self) -> &[IndexModel] {
        &self.indexes
    }
}

/// Builder collecting field declarations into a [`Schema`].
#[derive(Debug)]
pub struct SchemaBuilder {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Field)>,
    unique_together: Vec<Vec<String>>,
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collection: None,
            fields: Vec::new(),
            unique_together: Vec::new(),
        }
    }

    /// Overrides the collection name. Defaults to the lowercase model name.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }

    pub fn field(mut self, name: impl Into<String>, field: Field) -> Self {
        self.fields.push((name.into(), field));
        self
    }

    /// Declares a compound unique index over the named fields.
    pub fn unique_together<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.unique_together
            .push(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> DocmapResult<Arc<Schema>> {
        let mut fields = Vec::with_capacity(self.fields.len() + 1);
        let mut positions = HashMap::new();

        if !self.fields.iter().any(|(name, _)| name == ID_FIELD) {
            positions.insert(ID_FIELD.to_string(), 0);
            fields.push(Field::id().bind(ID_FIELD));
        }

        for (name, field) in self.fields {
            if name.is_empty() || name.contains('.') || name.contains("__") || name.starts_with('$') {
                return Err(DocmapError::InvalidSchema(format!(
                    "'{name}' is not a valid field name on {}", self.name
                )));
            }
            if positions.contains_key(&name) {
                return Err(DocmapError::InvalidSchema(format!(
                    "field '{name}' is declared twice on {}", self.name
                )));
            }

            positions.insert(name.clone(), fields.len());
            fields.push(field.bind(&name));
        }

        let mut indexes = Vec::new();

        for field in fields.iter().filter(|f| f.name() != ID_FIELD) {
            if field.index_kind().is_none() && !field.is_unique() {
                continue;
            }

            let kind = field.index_kind().unwrap_or(IndexKind::Ascending);
            let mut keys = Document::new();
            keys.insert(field.name(), kind.key());

            indexes.push(IndexModel::new(keys, field.is_unique()));
        }

        for names in self.unique_together {
            if names.is_empty() {
                return Err(DocmapError::InvalidSchema(format!(
                    "empty unique_together declaration on {}", self.name
                )));
            }

            let mut keys = Document::new();
            for name in names {
                if !positions.contains_key(&name) {
                    return Err(DocmapError::InvalidSchema(format!(
                        "unique_together names unknown field '{name}' on {}", self.name
                    )));
                }
                keys.insert(name, Bson::Int32(1));
            }

            indexes.push(IndexModel::new(keys, true));
        }

        Ok(Arc::new(Schema {
            collection: self
                .collection
                .unwrap_or_else(|| self.name.to_lowercase()),
            name: self.name,
            fields,
            positions,
            indexes,
        }))
    }
}
