//! Filter evaluation for in-memory documents.
//!
//! Filters use the store's query language: plain values test equality, operator documents
//! (`{ "$gt": 4 }`) apply comparison, membership and array operators, and `$and` / `$or` /
//! `$nor` combine clauses. Dotted paths descend into embedded documents and across arrays.
//! Filters are validated up front with [`validate_filter`] so an unknown operator is
//! rejected even when the collection is empty.

use bson::{Bson, DateTime, Document, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docmap_core::error::{DocmapError, DocmapResult};

const FIELD_OPERATORS: &[&str] = &[
    "$eq", "$ne", "$gt", "$gte", "$lt", "$lte", "$in", "$nin", "$exists", "$not", "$all", "$size",
    "$elemMatch",
];

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64. Values of different kinds never compare with
/// `$gt`/`$lt`, but do have a total order for sorting.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Number(f64),
    String(&'a str),
    Map(HashMap<&'a str, Comparable<'a>>),
    Array(Vec<Comparable<'a>>),
    ObjectId(ObjectId),
    Bool(bool),
    DateTime(DateTime),
    Timestamp(u32, u32),
    Other(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null | Bson::Undefined => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::Timestamp(ts) => Comparable::Timestamp(ts.time, ts.increment),
            Bson::ObjectId(oid) => Comparable::ObjectId(*oid),
            Bson::String(value) => Comparable::String(value),
            Bson::Array(arr) => Comparable::Array(
                arr
                    .iter()
                    .map(Comparable::from)
                    .collect::<Vec<_>>()
            ),
            Bson::Document(doc) => Comparable::Map(
                doc
                    .iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect::<HashMap<_, _>>()
            ),
            other => Comparable::Other(other),
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position in the cross-type sort order.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 1,
            Comparable::Number(_) => 2,
            Comparable::String(_) => 3,
            Comparable::Map(_) => 4,
            Comparable::Array(_) => 5,
            Comparable::ObjectId(_) => 7,
            Comparable::Bool(_) => 8,
            Comparable::DateTime(_) => 9,
            Comparable::Timestamp(..) => 10,
            Comparable::Other(_) => 11,
        }
    }

    /// Total order used for sorting: by kind first, then by value.
    pub(crate) fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.partial_cmp(other).unwrap_or(Ordering::Equal))
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::Timestamp(a, b), Comparable::Timestamp(c, d)) => (a, b) == (c, d),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Other(a), Comparable::Other(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::Timestamp(a, b), Comparable::Timestamp(c, d)) => (a, b).partial_cmp(&(c, d)),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            _ => None,
        }
    }
}

/// Resolves a dotted path to every value it reaches. Arrays along the way are traversed
/// element-wise unless the segment is a numeric index.
pub(crate) fn resolve<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };

    match (document.get(head), rest) {
        (None, _) => vec![],
        (Some(value), None) => vec![value],
        (Some(value), Some(rest)) => descend(value, rest),
    }
}

fn descend<'a>(value: &'a Bson, path: &str) -> Vec<&'a Bson> {
    match value {
        Bson::Document(inner) => resolve(inner, path),
        Bson::Array(items) => {
            let (head, rest) = match path.split_once('.') {
                Some((head, rest)) => (head, Some(rest)),
                None => (path, None),
            };

            match head.parse::<usize>() {
                Ok(index) => match (items.get(index), rest) {
                    (None, _) => vec![],
                    (Some(item), None) => vec![item],
                    (Some(item), Some(rest)) => descend(item, rest),
                },
                Err(_) => items
                    .iter()
                    .filter(|item| matches!(item, Bson::Document(_)))
                    .flat_map(|item| descend(item, path))
                    .collect(),
            }
        }
        _ => vec![],
    }
}

/// The first value at a dotted path, without array traversal.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, rest)) => match document.get(head)? {
            Bson::Document(inner) => get_path(inner, rest),
            Bson::Array(items) => {
                let (index, rest) = match rest.split_once('.') {
                    Some((index, rest)) => (index, Some(rest)),
                    None => (rest, None),
                };
                let item = items.get(index.parse::<usize>().ok()?)?;
                match (item, rest) {
                    (item, None) => Some(item),
                    (Bson::Document(inner), Some(rest)) => get_path(inner, rest),
                    _ => None,
                }
            }
            _ => None,
        },
    }
}

/// Returns the operator map if `value` is an operator expression such as `{ "$gt": 4 }`.
pub(crate) fn operator_doc(value: &Bson) -> Option<&Document> {
    match value {
        Bson::Document(doc) if !doc.is_empty() && doc.keys().all(|k| k.starts_with('$')) => Some(doc),
        _ => None,
    }
}

pub(crate) fn truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Int32(v) => *v != 0,
        Bson::Int64(v) => *v != 0,
        Bson::Double(v) => *v != 0.0,
        Bson::Null | Bson::Undefined => false,
        _ => true,
    }
}

fn size_operand(value: &Bson) -> Option<usize> {
    match value {
        Bson::Int32(v) => usize::try_from(*v).ok(),
        Bson::Int64(v) => usize::try_from(*v).ok(),
        Bson::Double(v) if v.fract() == 0.0 && *v >= 0.0 => Some(*v as usize),
        _ => None,
    }
}

fn clauses<'a>(operator: &str, value: &'a Bson) -> DocmapResult<Vec<&'a Document>> {
    let invalid = || DocmapError::InvalidQuery(format!("{operator} must be a nonempty array of documents"));

    match value {
        Bson::Array(items) if !items.is_empty() => items
            .iter()
            .map(|item| item.as_document().ok_or_else(invalid))
            .collect(),
        _ => Err(invalid()),
    }
}

/// Rejects unknown operators and malformed operands anywhere in the filter.
pub(crate) fn validate_filter(filter: &Document) -> DocmapResult<()> {
    for (key, condition) in filter {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                for clause in clauses(key, condition)? {
                    validate_filter(clause)?;
                }
            }
            op if op.starts_with('$') => {
                return Err(DocmapError::InvalidQuery(format!("unknown top level operator: {op}")));
            }
            _ => {
                if let Some(ops) = operator_doc(condition) {
                    validate_operators(ops)?;
                }
            }
        }
    }

    Ok(())
}

fn validate_operators(ops: &Document) -> DocmapResult<()> {
    for (op, operand) in ops {
        match op.as_str() {
            "$in" | "$nin" | "$all" if !matches!(operand, Bson::Array(_)) => {
                return Err(DocmapError::InvalidQuery(format!("{op} needs an array")));
            }
            "$not" => match operator_doc(operand) {
                Some(inner) => validate_operators(inner)?,
                None => return Err(DocmapError::InvalidQuery("$not needs an operator document".to_string())),
            },
            "$size" if size_operand(operand).is_none() => {
                return Err(DocmapError::InvalidQuery("$size needs a non-negative integer".to_string()));
            }
            "$elemMatch" => match operand {
                Bson::Document(inner) if operator_doc(operand).is_some() => validate_operators(inner)?,
                Bson::Document(inner) => validate_filter(inner)?,
                _ => return Err(DocmapError::InvalidQuery("$elemMatch needs an object".to_string())),
            },
            op if FIELD_OPERATORS.contains(&op) => {}
            op => return Err(DocmapError::InvalidQuery(format!("unknown operator: {op}"))),
        }
    }

    Ok(())
}

/// Whether a document satisfies a filter previously accepted by [`validate_filter`].
pub(crate) fn matches(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, condition)| match key.as_str() {
        "$and" => clause_docs(condition).all(|clause| matches(document, clause)),
        "$or" => clause_docs(condition).any(|clause| matches(document, clause)),
        "$nor" => !clause_docs(condition).any(|clause| matches(document, clause)),
        path => condition_matches(&resolve(document, path), condition),
    })
}

fn clause_docs(value: &Bson) -> impl Iterator<Item = &Document> {
    value
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(Bson::as_document)
}

/// Whether the values found at a path satisfy a condition, either a plain value
/// (equality) or an operator document.
pub(crate) fn condition_matches(values: &[&Bson], condition: &Bson) -> bool {
    match operator_doc(condition) {
        Some(ops) => ops
            .iter()
            .all(|(op, operand)| operator_matches(values, op, operand)),
        None => equals_any(values, condition),
    }
}

/// Values at a path plus the elements of any array among them.
fn candidates<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut out = Vec::with_capacity(values.len());

    for value in values {
        out.push(*value);
        if let Bson::Array(items) = value {
            out.extend(items.iter());
        }
    }

    out
}

fn equals_any(values: &[&Bson], target: &Bson) -> bool {
    if matches!(target, Bson::Null) && values.is_empty() {
        return true;
    }

    let target = Comparable::from(target);

    candidates(values)
        .into_iter()
        .any(|value| Comparable::from(value) == target)
}

fn compare_any(values: &[&Bson], target: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let target = Comparable::from(target);

    candidates(values)
        .into_iter()
        .any(|value| {
            Comparable::from(value)
                .partial_cmp(&target)
                .is_some_and(accept)
        })
}

fn operator_matches(values: &[&Bson], op: &str, operand: &Bson) -> bool {
    match op {
        "$eq" => equals_any(values, operand),
        "$ne" => !equals_any(values, operand),
        "$gt" => compare_any(values, operand, |o| o == Ordering::Greater),
        "$gte" => compare_any(values, operand, |o| o != Ordering::Less),
        "$lt" => compare_any(values, operand, |o| o == Ordering::Less),
        "$lte" => compare_any(values, operand, |o| o != Ordering::Greater),
        "$in" => operand
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equals_any(values, item))),
        "$nin" => !operand
            .as_array()
            .is_some_and(|items| items.iter().any(|item| equals_any(values, item))),
        "$exists" => values.is_empty() != truthy(operand),
        "$not" => !condition_matches(values, operand),
        "$all" => operand
            .as_array()
            .is_some_and(|items| !items.is_empty() && items.iter().all(|item| equals_any(values, item))),
        "$size" => size_operand(operand).is_some_and(|size| {
            values
                .iter()
                .any(|value| matches!(value, Bson::Array(items) if items.len() == size))
        }),
        "$elemMatch" => values
            .iter()
            .filter_map(|value| value.as_array())
            .flatten()
            .any(|item| element_matches(item, operand)),
        _ => false,
    }
}

/// Whether a single array element satisfies a condition, as used by `$elemMatch` and
/// positional projections.
pub(crate) fn element_matches(item: &Bson, condition: &Bson) -> bool {
    match (item, condition) {
        (Bson::Document(inner), Bson::Document(filter)) if operator_doc(condition).is_none() => {
            matches(inner, filter)
        }
        _ => match operator_doc(condition) {
            Some(ops) => ops
                .iter()
                .all(|(op, operand)| operator_matches(&[item], op, operand)),
            None => Comparable::from(item) == Comparable::from(condition),
        },
    }
}
