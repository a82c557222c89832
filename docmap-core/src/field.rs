//! Typed field descriptors.
//!
//! A [`Field`] describes how one named attribute of a record is defaulted, validated and
//! converted to its stored or JSON-safe form. Field kinds are a closed set ([`FieldKind`])
//! sharing one `serialize`/`get_default` contract.
//!
//! # Example
//!
//! ```ignore
//! use docmap::field::{Field, IndexKind};
//!
//! let name = Field::char().index(IndexKind::Text);
//! let serial = Field::char().default_fn(|| uuid::Uuid::new_v4().to_string().into());
//! let age = Field::int().default_value(0);
//! ```

use bson::{Bson, oid::ObjectId};
use std::{fmt, sync::Arc};

use crate::{
    error::{DocmapError, DocmapResult},
    serialize::{format_datetime, serialize_datetime, serialize_dict, serialize_list},
};

/// The closed set of field kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Untyped; values are stored as given.
    Any,
    Int,
    Float,
    Char,
    Bool,
    /// Opaque object identifier.
    Id,
    TimeStamp,
    List,
    Dict,
    Set,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Any => "any",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Char => "char",
            FieldKind::Bool => "bool",
            FieldKind::Id => "id",
            FieldKind::TimeStamp => "timestamp",
            FieldKind::List => "list",
            FieldKind::Dict => "dict",
            FieldKind::Set => "set",
        }
    }
}

/// Index declared on a single field. The index is created by the model at bootstrap time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Ascending,
    Descending,
    Text,
    Hashed,
}

impl IndexKind {
    /// The key value used in an index specification document.
    pub fn key(&self) -> Bson {
        match self {
            IndexKind::Ascending => Bson::Int32(1),
            IndexKind::Descending => Bson::Int32(-1),
            IndexKind::Text => Bson::String("text".to_string()),
            IndexKind::Hashed => Bson::String("hashed".to_string()),
        }
    }
}

/// Zero-argument value producer, invoked fresh for every record.
pub type DefaultFn = Arc<dyn Fn() -> Bson + Send + Sync>;

/// Default value of a field.
#[derive(Clone, Default)]
pub enum FieldDefault {
    #[default]
    None,
    Value(Bson),
    Producer(DefaultFn),
}

impl fmt::Debug for FieldDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldDefault::None => write!(f, "None"),
            FieldDefault::Value(value) => write!(f, "Value({value})"),
            FieldDefault::Producer(_) => write!(f, "Producer(..)"),
        }
    }
}

/// Descriptor of one named attribute. Shared by every record of its schema and never
/// holds per-record state.
#[derive(Debug, Clone)]
pub struct Field {
    name: String,
    kind: FieldKind,
    default: FieldDefault,
    index: Option<IndexKind>,
    unique: bool,
}

impl Field {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            name: String::new(),
            kind,
            default: FieldDefault::None,
            index: None,
            unique: false,
        }
    }

    pub fn any() -> Self {
        Self::new(FieldKind::Any)
    }

    pub fn int() -> Self {
        Self::new(FieldKind::Int)
    }

    pub fn float() -> Self {
        Self::new(FieldKind::Float)
    }

    pub fn char() -> Self {
        Self::new(FieldKind::Char)
    }

    pub fn bool() -> Self {
        Self::new(FieldKind::Bool)
    }

    pub fn id() -> Self {
        Self::new(FieldKind::Id)
    }

    pub fn timestamp() -> Self {
        Self::new(FieldKind::TimeStamp)
    }

    pub fn list() -> Self {
        Self::new(FieldKind::List)
    }

    pub fn dict() -> Self {
        Self::new(FieldKind::Dict)
    }

    pub fn set() -> Self {
        Self::new(FieldKind::Set)
    }

    /// Sets a literal default. The value is cloned for every record.
    pub fn default_value(mut self, value: impl Into<Bson>) -> Self {
        self.default = FieldDefault::Value(value.into());
        self
    }

    /// Sets a producer invoked for every record that does not supply a value.
    pub fn default_fn<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Bson + Send + Sync + 'static,
    {
        self.default = FieldDefault::Producer(Arc::new(producer));
        self
    }

    pub fn index(mut self, index: IndexKind) -> Self {
        self.index = Some(index);
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub(crate) fn bind(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// The registered name; empty until the field is bound to a schema.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn index_kind(&self) -> Option<IndexKind> {
        self.index
    }

    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the default value, invoking the producer if one is configured.
    /// Returns `Bson::Null` when no default is configured.
    pub fn get_default(&self) -> Bson {
        match &self.default {
            FieldDefault::None => Bson::Null,
            FieldDefault::Value(value) => value.clone(),
            FieldDefault::Producer(producer) => producer(),
        }
    }

    /// Coerces a value into this field's canonical stored type, or its JSON-safe form when
    /// `to_json` is set. `Bson::Null` is the unset sentinel and passes through every kind.
    pub fn serialize(&self, value: &Bson, to_json: bool) -> DocmapResult<Bson> {
        if let Bson::Null = value {
            return Ok(Bson::Null);
        }

        match self.kind {
            FieldKind::Any => Ok(value.clone()),
            FieldKind::Int => self.serialize_int(value),
            FieldKind::Float => self.serialize_float(value),
            FieldKind::Char => Ok(Bson::String(render_text(value))),
            FieldKind::Bool => self.serialize_bool(value),
            FieldKind::Id => self.serialize_id(value, to_json),
            FieldKind::TimeStamp => serialize_datetime(value, to_json).map_err(|e| self.rebind(e)),
            FieldKind::List => match value {
                Bson::Array(items) => Ok(Bson::Array(
                    serialize_list(items, to_json)
                        .collect::<DocmapResult<Vec<_>>>()
                        .map_err(|e| self.rebind(e))?,
                )),
                _ => Err(self.invalid(value)),
            },
            FieldKind::Dict => match value {
                Bson::Document(doc) => Ok(Bson::Document(
                    serialize_dict(doc, to_json)
                        .collect::<DocmapResult<_>>()
                        .map_err(|e| self.rebind(e))?,
                )),
                _ => Err(self.invalid(value)),
            },
            FieldKind::Set => match value {
                Bson::Array(items) => {
                    let mut unique = Vec::with_capacity(items.len());

                    for item in serialize_list(items, to_json) {
                        let item = item.map_err(|e| self.rebind(e))?;
                        if !unique.contains(&item) {
                            unique.push(item);
                        }
                    }

                    Ok(Bson::Array(unique))
                }
                _ => Err(self.invalid(value)),
            },
        }
    }

    fn serialize_int(&self, value: &Bson) -> DocmapResult<Bson> {
        match value {
            Bson::Int32(v) => Ok(Bson::Int64(*v as i64)),
            Bson::Int64(v) => Ok(Bson::Int64(*v)),
            Bson::Boolean(v) => Ok(Bson::Int64(*v as i64)),
            Bson::Double(v) => {
                let truncated = v.trunc();
                if truncated.is_finite() && truncated >= i64::MIN as f64 && truncated <= i64::MAX as f64 {
                    Ok(Bson::Int64(truncated as i64))
                } else {
                    Err(self.invalid(value))
                }
            }
            Bson::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Bson::Int64)
                .map_err(|_| self.invalid(value)),
            _ => Err(self.invalid(value)),
        }
    }

    fn serialize_float(&self, value: &Bson) -> DocmapResult<Bson> {
        match value {
            Bson::Int32(v) => Ok(Bson::Double(*v as f64)),
            Bson::Int64(v) => Ok(Bson::Double(*v as f64)),
            Bson::Double(v) => Ok(Bson::Double(*v)),
            Bson::Boolean(v) => Ok(Bson::Double(if *v { 1.0 } else { 0.0 })),
            Bson::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Bson::Double)
                .map_err(|_| self.invalid(value)),
            _ => Err(self.invalid(value)),
        }
    }

    fn serialize_bool(&self, value: &Bson) -> DocmapResult<Bson> {
        match value {
            Bson::Boolean(v) => Ok(Bson::Boolean(*v)),
            Bson::Int32(v) => Ok(Bson::Boolean(*v != 0)),
            Bson::Int64(v) => Ok(Bson::Boolean(*v != 0)),
            Bson::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Bson::Boolean(true)),
                "false" => Ok(Bson::Boolean(false)),
                _ => Err(self.invalid(value)),
            },
            _ => Err(self.invalid(value)),
        }
    }

    fn serialize_id(&self, value: &Bson, to_json: bool) -> DocmapResult<Bson> {
        let oid = match value {
            Bson::ObjectId(oid) => *oid,
            Bson::String(s) => ObjectId::parse_str(s).map_err(|_| self.invalid(value))?,
            _ => return Err(self.invalid(value)),
        };

        if to_json {
            Ok(Bson::String(oid.to_hex()))
        } else {
            Ok(Bson::ObjectId(oid))
        }
    }

    fn invalid(&self, value: &Bson) -> DocmapError {
        DocmapError::InvalidValue {
            field: self.name.clone(),
            kind: self.kind.as_str(),
            value: value.to_string(),
        }
    }

    fn rebind(&self, err: DocmapError) -> DocmapError {
        match err {
            DocmapError::InvalidValue { kind, value, .. } => DocmapError::InvalidValue {
                field: self.name.clone(),
                kind,
                value,
            },
            other => other,
        }
    }
}

/// Canonical text rendering used by `Char` fields.
fn render_text(value: &Bson) -> String {
    match value {
        Bson::String(s) => s.clone(),
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) if v.is_finite() && v.fract() == 0.0 => format!("{v:.1}"),
        Bson::Double(v) => v.to_string(),
        Bson::Boolean(v) => v.to_string(),
        Bson::ObjectId(oid) => oid.to_hex(),
        Bson::DateTime(dt) => format_datetime(*dt),
        other => other.to_string(),
    }
}
