//! Records: instances of a schema.
//!
//! A [`Record`] holds a value for every registered field (`Bson::Null` meaning unset), a
//! flag telling whether it was loaded from the store, and the set of fields changed since
//! it was loaded or last saved.

use bson::{Bson, Document, de::deserialize_from_bson, oid::ObjectId};
use serde::de::DeserializeOwned;
use serde_json::{Value, to_value};
use std::{collections::BTreeSet, sync::Arc};
use tracing::warn;

use crate::{
    backend::StoreBackend,
    error::{DocmapError, DocmapResult},
    model::Model,
    schema::{ID_FIELD, Schema},
};

#[derive(Debug, Clone)]
pub struct Record {
    schema: Arc<Schema>,
    values: Document,
    from_db: bool,
    changed: BTreeSet<String>,
}

impl Record {
    /// Builds a fresh record. Supplied values are coerced through their field; fields not
    /// supplied take their default.
    pub fn new(schema: Arc<Schema>, mut values: Document) -> DocmapResult<Self> {
        if let Some(unknown) = values.keys().find(|key| !schema.contains(key)) {
            return Err(DocmapError::UnknownField {
                model: schema.name().to_string(),
                field: unknown.clone(),
            });
        }

        let mut resolved = Document::new();
        let mut changed = BTreeSet::new();

        for field in schema.fields() {
            let value = match values.remove(field.name()) {
                Some(value) => value,
                None => field.get_default(),
            };

            resolved.insert(field.name(), field.serialize(&value, false)?);
            changed.insert(field.name().to_string());
        }

        Ok(Self {
            schema,
            values: resolved,
            from_db: false,
            changed,
        })
    }

    /// Rebuilds a record from a raw, possibly projected, store document. Fields absent
    /// from the document stay unset rather than defaulted.
    pub fn hydrate(schema: Arc<Schema>, raw: Document) -> DocmapResult<Self> {
        let mut values = Document::new();

        for field in schema.fields() {
            let value = match raw.get(field.name()) {
                Some(value) => field.serialize(value, false)?,
                None => Bson::Null,
            };
            values.insert(field.name(), value);
        }

        for key in raw.keys().filter(|key| !schema.contains(key)) {
            warn!(target: "docmap::model", model = schema.name(), field = %key, "Skipping unregistered field from store");
        }

        Ok(Self {
            schema,
            values,
            from_db: true,
            changed: BTreeSet::new(),
        })
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Whether this record was loaded from, or already written to, the store.
    pub fn is_from_db(&self) -> bool {
        self.from_db
    }

    /// Current values of every registered field. Unset fields are `Bson::Null`.
    pub fn values(&self) -> &Document {
        &self.values
    }

    pub fn get(&self, name: &str) -> DocmapResult<&Bson> {
        self.schema.require(name)?;

        Ok(self
            .values
            .get(name)
            .unwrap_or(&Bson::Null))
    }

    pub fn id(&self) -> Option<ObjectId> {
        match self.values.get(ID_FIELD) {
            Some(Bson::ObjectId(oid)) => Some(*oid),
            _ => None,
        }
    }

    /// Assigns a field, coercing the value through the field's serializer.
    pub fn set(&mut self, name: &str, value: impl Into<Bson>) -> DocmapResult<&mut Self> {
        let value = self
            .schema
            .require(name)?
            .serialize(&value.into(), false)?;

        self.values.insert(name, value);
        self.changed.insert(name.to_string());

        Ok(self)
    }

    pub fn unset(&mut self, name: &str) -> DocmapResult<&mut Self> {
        self.set(name, Bson::Null)
    }

    /// Storage document holding every set field.
    pub fn to_document(&self) -> Document {
        self.values
            .iter()
            .filter(|(_, value)| !matches!(value, Bson::Null))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }

    /// JSON-safe rendering of every field.
    pub fn to_json(&self) -> DocmapResult<Value> {
        let mut rendered = Document::new();

        for field in self.schema.fields() {
            let value = self
                .values
                .get(field.name())
                .unwrap_or(&Bson::Null);
            rendered.insert(field.name(), field.serialize(value, true)?);
        }

        Ok(to_value(Bson::Document(rendered))?)
    }

    /// Deserializes the set fields into a serde type.
    pub fn decode<T: DeserializeOwned>(&self) -> DocmapResult<T> {
        Ok(deserialize_from_bson(Bson::Document(self.to_document()))?)
    }

    /// Persists the record through the given model. See [`Model::save`].
    pub async fn save<B: StoreBackend>(&mut self, model: &Model<'_, B>) -> DocmapResult<&mut Self> {
        model.save(self).await?;

        Ok(self)
    }

    /// Fields changed since the record was loaded or last saved.
    pub(crate) fn changed(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.changed
            .iter()
            .map(|name| (name.as_str(), self.values.get(name).unwrap_or(&Bson::Null)))
    }

    pub(crate) fn mark_saved(&mut self, id: Option<Bson>) {
        if let Some(id) = id {
            if matches!(self.values.get(ID_FIELD), None | Some(Bson::Null)) {
                self.values.insert(ID_FIELD, id);
            }
        }

        self.from_db = true;
        self.changed.clear();
    }
}
