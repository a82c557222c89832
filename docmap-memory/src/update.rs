//! Update operators for in-memory documents.

use bson::{Bson, Document};

use docmap_core::{
    error::{DocmapError, DocmapResult},
    schema::ID_FIELD,
};

use crate::{
    evaluator::{Comparable, element_matches, get_path},
    projection::remove_path,
};

const UPDATE_OPERATORS: &[&str] = &["$set", "$unset", "$inc", "$push", "$addToSet", "$pull"];

/// Rejects update documents that are not made of known operators over documents.
pub(crate) fn validate_update(update: &Document) -> DocmapResult<()> {
    if update.is_empty() {
        return Err(DocmapError::InvalidQuery("update document is empty".to_string()));
    }

    for (op, operand) in update {
        if !UPDATE_OPERATORS.contains(&op.as_str()) {
            return Err(DocmapError::InvalidQuery(format!("unknown update operator: {op}")));
        }

        let Bson::Document(fields) = operand else {
            return Err(DocmapError::InvalidQuery(format!("{op} needs a document operand")));
        };

        if op != "$unset" && fields.contains_key(ID_FIELD) {
            return Err(DocmapError::InvalidQuery(
                "performing an update on the path '_id' would modify the immutable field '_id'".to_string(),
            ));
        }
    }

    Ok(())
}

/// Applies a validated update document in place.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> DocmapResult<()> {
    for (op, operand) in update {
        let Bson::Document(fields) = operand else {
            continue;
        };

        for (path, value) in fields {
            match op.as_str() {
                "$set" => set_path(document, path, value.clone())?,
                "$unset" => remove_path(document, path),
                "$inc" => {
                    let current = get_path(document, path).cloned().unwrap_or(Bson::Int32(0));
                    set_path(document, path, add(&current, value, path)?)?;
                }
                "$push" => {
                    let mut items = array_at(document, path, op)?;
                    items.extend(each(value));
                    set_path(document, path, Bson::Array(items))?;
                }
                "$addToSet" => {
                    let mut items = array_at(document, path, op)?;
                    for candidate in each(value) {
                        let exists = items
                            .iter()
                            .any(|item| Comparable::from(item) == Comparable::from(&candidate));
                        if !exists {
                            items.push(candidate);
                        }
                    }
                    set_path(document, path, Bson::Array(items))?;
                }
                "$pull" => {
                    if get_path(document, path).is_some() {
                        let mut items = array_at(document, path, op)?;
                        items.retain(|item| !element_matches(item, value));
                        set_path(document, path, Bson::Array(items))?;
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// Assigns a value at a dotted path, creating embedded documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) -> DocmapResult<()> {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return Ok(());
    };

    let child = document
        .entry(head.to_string())
        .or_insert_with(|| Bson::Document(Document::new()));

    match child {
        Bson::Document(inner) => set_path(inner, rest, value),
        Bson::Array(items) => {
            let (index, tail) = match rest.split_once('.') {
                Some((index, tail)) => (index, Some(tail)),
                None => (rest, None),
            };
            let slot = index
                .parse::<usize>()
                .ok()
                .and_then(|index| items.get_mut(index))
                .ok_or_else(|| DocmapError::InvalidQuery(format!("cannot create field '{index}' in array '{head}'")))?;

            match (slot, tail) {
                (slot, None) => {
                    *slot = value;
                    Ok(())
                }
                (Bson::Document(inner), Some(tail)) => set_path(inner, tail, value),
                (_, Some(tail)) => Err(DocmapError::InvalidQuery(format!(
                    "cannot create field '{tail}' in a non-document array element of '{head}'"
                ))),
            }
        }
        other => Err(DocmapError::InvalidQuery(format!(
            "cannot create field '{rest}' in element {{{head}: {other}}}"
        ))),
    }
}

fn array_at(document: &Document, path: &str, op: &str) -> DocmapResult<Vec<Bson>> {
    match get_path(document, path) {
        None | Some(Bson::Null) => Ok(vec![]),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(other) => Err(DocmapError::InvalidQuery(format!(
            "{op} applied to non-array field '{path}' holding {other}"
        ))),
    }
}

/// The values named by a `$push`/`$addToSet` operand, expanding `{ "$each": [..] }`.
fn each(value: &Bson) -> Vec<Bson> {
    match value {
        Bson::Document(modifier) => match modifier.get("$each") {
            Some(Bson::Array(items)) => items.clone(),
            _ => vec![value.clone()],
        },
        _ => vec![value.clone()],
    }
}

fn add(current: &Bson, increment: &Bson, path: &str) -> DocmapResult<Bson> {
    let sum = match (current, increment) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .unwrap_or(Bson::Int64(i64::from(*a) + i64::from(*b))),
        (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a).saturating_add(*b)),
        (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a.saturating_add(i64::from(*b))),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a.saturating_add(*b)),
        (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
        (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
        (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
        (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
        (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
        _ => {
            return Err(DocmapError::InvalidQuery(format!(
                "cannot apply $inc to '{path}' holding {current} with {increment}"
            )));
        }
    };

    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn set_unset_and_inc() {
        let mut document = doc! { "name": "Anthony", "age": 29, "address": { "city": "Oslo" } };
        let update = doc! {
            "$set": { "address.zip": "0150", "nickname": "Tony" },
            "$unset": { "name": "" },
            "$inc": { "age": 1, "visits": 2 },
        };

        validate_update(&update).unwrap();
        apply_update(&mut document, &update).unwrap();

        assert_eq!(
            document,
            doc! {
                "age": 30,
                "address": { "city": "Oslo", "zip": "0150" },
                "nickname": "Tony",
                "visits": 2,
            }
        );
    }

    #[test]
    fn array_operators() {
        let mut document = doc! { "parents": ["Mary"] };

        apply_update(&mut document, &doc! { "$push": { "parents": "John" } }).unwrap();
        apply_update(&mut document, &doc! { "$addToSet": { "parents": { "$each": ["John", "Ann"] } } }).unwrap();
        assert_eq!(document, doc! { "parents": ["Mary", "John", "Ann"] });

        apply_update(&mut document, &doc! { "$pull": { "parents": "Mary" } }).unwrap();
        assert_eq!(document, doc! { "parents": ["John", "Ann"] });
    }

    #[test]
    fn invalid_updates_are_rejected() {
        assert!(validate_update(&doc! {}).is_err());
        assert!(validate_update(&doc! { "$rename": { "a": "b" } }).is_err());
        assert!(validate_update(&doc! { "$set": 4 }).is_err());
        assert!(validate_update(&doc! { "$set": { "_id": 1 } }).is_err());

        let mut document = doc! { "name": "Anthony" };
        assert!(apply_update(&mut document, &doc! { "$inc": { "name": 1 } }).is_err());
        assert!(apply_update(&mut document, &doc! { "$push": { "name": "x" } }).is_err());
    }
}
