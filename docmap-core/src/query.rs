//! Query options, projections and filter criteria.
//!
//! Filters are plain filter documents in the store's query language
//! (`{ "age": { "$gt": 40 } }`). Keyword lookups such as `age__gt` are accepted as a
//! shorthand and normalized before they reach the store.
//!
//! ```ignore
//! use docmap::query::{FindQuery, SortDirection};
//! use bson::doc;
//!
//! let query = FindQuery::builder()
//!     .filter(doc! { "name": "Alice" })
//!     .sort("created", SortDirection::Desc)
//!     .limit(10)
//!     .build();
//! ```

use bson::{Bson, Document};

use crate::{
    error::{DocmapError, DocmapResult},
    serialize::serialize_value,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn key(&self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Index hint passed through to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    Keys(Document),
    Name(String),
}

/// A fully specified find operation.
#[derive(Debug, Clone, Default)]
pub struct FindQuery {
    pub filter: Document,
    pub projection: Option<Document>,
    pub sort: Option<Document>,
    pub limit: Option<u64>,
    pub skip: Option<u64>,
    pub hint: Option<Hint>,
}

impl FindQuery {
    pub fn new(filter: Document) -> Self {
        Self { filter, ..Default::default() }
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: FindQuery,
}

impl QueryBuilder {
    pub fn new() -> Self {
        QueryBuilder { query: FindQuery::default() }
    }

    pub fn filter(mut self, filter: Document) -> Self {
        self.query.filter = filter;
        self
    }

    pub fn projection(mut self, projection: Option<Document>) -> Self {
        self.query.projection = projection;
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query
            .sort
            .get_or_insert_with(Document::new)
            .insert(field.into(), direction.key());
        self
    }

    pub fn sort_by(mut self, sort: Option<Document>) -> Self {
        self.query.sort = sort;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.query.skip = Some(skip);
        self
    }

    pub fn hint(mut self, hint: Option<Hint>) -> Self {
        self.query.hint = hint;
        self
    }

    pub fn build(self) -> FindQuery {
        self.query
    }
}

/// Bounds applied to a count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountOptions {
    pub limit: Option<u64>,
    pub skip: Option<u64>,
}

/// An index specification handed to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexModel {
    pub keys: Document,
    pub unique: bool,
}

impl IndexModel {
    pub fn new(keys: Document, unique: bool) -> Self {
        Self { keys, unique }
    }

    /// Conventional index name, e.g. `name_text` or `size_1_name_1`.
    pub fn name(&self) -> String {
        index_name(&self.keys)
    }
}

/// Builds the conventional name for an index key document.
pub fn index_name(keys: &Document) -> String {
    keys.iter()
        .map(|(field, kind)| match kind {
            Bson::String(s) => format!("{field}_{s}"),
            Bson::Int32(v) => format!("{field}_{v}"),
            Bson::Int64(v) => format!("{field}_{v}"),
            Bson::Double(v) => format!("{field}_{}", *v as i64),
            other => format!("{field}_{other}"),
        })
        .collect::<Vec<_>>()
        .join("_")
}

/// Which fields of a document the store returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
    /// A store-level projection document, e.g. `{ "parents.$": 1 }`.
    Raw(Document),
}

impl Projection {
    pub fn include<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Include(names.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Projection::Exclude(names.into_iter().map(Into::into).collect())
    }

    /// Builds a projection from optional inclusion and exclusion lists. Supplying both is
    /// an error.
    pub fn from_options(
        include: Option<Vec<String>>,
        exclude: Option<Vec<String>>,
    ) -> DocmapResult<Self> {
        match (include, exclude) {
            (Some(_), Some(_)) => Err(DocmapError::InvalidProjection(
                "include and exclude cannot be combined".to_string(),
            )),
            (Some(names), None) => Ok(Projection::Include(names)),
            (None, Some(names)) => Ok(Projection::Exclude(names)),
            (None, None) => Ok(Projection::All),
        }
    }

    /// Field paths named by the projection.
    pub fn paths(&self) -> Vec<String> {
        match self {
            Projection::All => vec![],
            Projection::Include(names) | Projection::Exclude(names) => names.clone(),
            Projection::Raw(doc) => doc.keys().cloned().collect(),
        }
    }

    /// The projection document sent to the store, if any.
    pub fn to_document(&self) -> Option<Document> {
        match self {
            Projection::All => None,
            Projection::Include(names) => Some(
                names
                    .iter()
                    .map(|name| (name.clone(), Bson::Int32(1)))
                    .collect(),
            ),
            Projection::Exclude(names) => Some(
                names
                    .iter()
                    .map(|name| (name.clone(), Bson::Int32(0)))
                    .collect(),
            ),
            Projection::Raw(doc) => Some(doc.clone()),
        }
    }
}

/// Rewrites keyword lookups (`age__gt: 4`) into operator form (`age: { "$gt": 4 }`) and
/// serializes every value so datetimes compare against their stored form.
///
/// Inner `__` separators become `.` paths: `address__city__ne` targets `address.city`.
/// Clauses of `$and`, `$or` and `$nor` are normalized the same way.
pub fn normalize_criteria(criteria: Document) -> DocmapResult<Document> {
    let mut normalized = Document::new();

    for (key, value) in criteria {
        if key.starts_with('$') {
            let value = match (key.as_str(), value) {
                ("$and" | "$or" | "$nor", Bson::Array(clauses)) => Bson::Array(
                    clauses
                        .into_iter()
                        .map(|clause| match clause {
                            Bson::Document(clause) => normalize_criteria(clause).map(Bson::Document),
                            other => serialize_value(&other, false),
                        })
                        .collect::<DocmapResult<Vec<_>>>()?,
                ),
                (_, value) => serialize_value(&value, false)?,
            };

            merge_criteria(&mut normalized, Document::from_iter([(key, value)]));
            continue;
        }

        let value = serialize_value(&value, false)?;

        let entry = match key.rsplit_once("__") {
            Some((path, op)) if !path.is_empty() && !op.is_empty() => {
                let mut expr = Document::new();
                expr.insert(format!("${op}"), value);
                (path.replace("__", "."), Bson::Document(expr))
            }
            _ => (key, value),
        };

        merge_criteria(&mut normalized, Document::from_iter([entry]));
    }

    Ok(normalized)
}

fn is_operator_expr(value: &Bson) -> bool {
    match value {
        Bson::Document(doc) => !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')),
        _ => false,
    }
}

/// Merges `extra` into `target` with logical AND semantics.
///
/// A key already present is never overwritten: operator expressions on the same field
/// with distinct operators are combined, anything else is appended to `$and`.
pub fn merge_criteria(target: &mut Document, extra: Document) {
    for (key, value) in extra {
        if key == "$and" {
            if let Bson::Array(items) = value {
                and_list(target).extend(items);
            } else {
                and_list(target).push(value);
            }
            continue;
        }

        let Some(existing) = target.get(&key) else {
            target.insert(key, value);
            continue;
        };

        let combinable = match (existing, &value) {
            (Bson::Document(current), Bson::Document(incoming))
                if is_operator_expr(existing) && is_operator_expr(&value) =>
            {
                incoming.keys().all(|op| !current.contains_key(op))
            }
            _ => false,
        };

        if combinable {
            if let (Some(Bson::Document(current)), Bson::Document(incoming)) = (target.get_mut(&key), value) {
                for (op, operand) in incoming {
                    current.insert(op, operand);
                }
            }
        } else {
            let mut clause = Document::new();
            clause.insert(key, value);
            and_list(target).push(Bson::Document(clause));
        }
    }
}

fn and_list(target: &mut Document) -> &mut Vec<Bson> {
    if !matches!(target.get("$and"), Some(Bson::Array(_))) {
        target.insert("$and", Bson::Array(vec![]));
    }

    match target.get_mut("$and") {
        Some(Bson::Array(items)) => items,
        _ => unreachable!("$and was just inserted as an array"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{DateTime, Timestamp, doc};

    #[test]
    fn lookups_become_operators() {
        let criteria = normalize_criteria(doc! { "name": "Anthony", "inc__gt": 4, "address__city__ne": "Oslo" }).unwrap();
        assert_eq!(
            criteria,
            doc! { "name": "Anthony", "inc": { "$gt": 4 }, "address.city": { "$ne": "Oslo" } }
        );
    }

    #[test]
    fn unknown_lookup_is_forwarded_for_the_store_to_reject() {
        let criteria = normalize_criteria(doc! { "name__asfdf": "asfd" }).unwrap();
        assert_eq!(criteria, doc! { "name": { "$asfdf": "asfd" } });
    }

    #[test]
    fn logical_clauses_are_normalized() {
        let criteria = normalize_criteria(doc! {
            "$or": [{ "age__gt": 4 }, { "$and": [{ "name__ne": "Mary" }] }],
        })
        .unwrap();
        assert_eq!(
            criteria,
            doc! { "$or": [{ "age": { "$gt": 4 } }, { "$and": [{ "name": { "$ne": "Mary" } }] }] }
        );
    }

    #[test]
    fn datetimes_are_serialized() {
        let when = DateTime::from_millis(2_000_000);
        let criteria = normalize_criteria(doc! { "created": { "$gt": when } }).unwrap();
        assert_eq!(
            criteria,
            doc! { "created": { "$gt": Timestamp { time: 2000, increment: 0 } } }
        );
    }

    #[test]
    fn merge_adds_new_keys() {
        let mut criteria = doc! { "name": "Anthony" };
        merge_criteria(&mut criteria, doc! { "age": { "$gt": 40 } });
        assert_eq!(criteria, doc! { "name": "Anthony", "age": { "$gt": 40 } });
    }

    #[test]
    fn merge_combines_distinct_operators() {
        let mut criteria = doc! { "age": { "$gt": 40 } };
        merge_criteria(&mut criteria, doc! { "age": { "$lt": 60 } });
        assert_eq!(criteria, doc! { "age": { "$gt": 40, "$lt": 60 } });
    }

    #[test]
    fn merge_never_overwrites() {
        let mut criteria = doc! { "name": "Anthony", "age": { "$gt": 40 } };
        merge_criteria(&mut criteria, doc! { "name": "Tony", "age": { "$gt": 50 } });
        assert_eq!(
            criteria,
            doc! {
                "name": "Anthony",
                "age": { "$gt": 40 },
                "$and": [ { "name": "Tony" }, { "age": { "$gt": 50 } } ],
            }
        );
    }

    #[test]
    fn projection_options_are_exclusive() {
        let err = Projection::from_options(Some(vec!["a".into()]), Some(vec!["b".into()])).unwrap_err();
        assert!(matches!(err, DocmapError::InvalidProjection(_)));

        assert_eq!(Projection::from_options(None, None).unwrap(), Projection::All);
        assert_eq!(
            Projection::include(["name", "parents"]).to_document(),
            Some(doc! { "name": 1, "parents": 1 })
        );
        assert_eq!(Projection::exclude(["_id"]).to_document(), Some(doc! { "_id": 0 }));
    }

    #[test]
    fn builder_accumulates_sort_keys() {
        let query = FindQuery::builder()
            .filter(doc! { "a": 1 })
            .sort("a", SortDirection::Asc)
            .sort("b", SortDirection::Desc)
            .limit(3)
            .build();
        assert_eq!(query.sort, Some(doc! { "a": 1, "b": -1 }));
        assert_eq!(query.limit, Some(3));
    }

    #[test]
    fn index_names() {
        assert_eq!(index_name(&doc! { "name": "text" }), "name_text");
        assert_eq!(index_name(&doc! { "size": 1, "name": 1 }), "size_1_name_1");
        assert_eq!(index_name(&doc! { "age": -1 }), "age_-1");
    }
}
