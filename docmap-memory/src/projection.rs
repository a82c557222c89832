//! Projection of in-memory documents.
//!
//! Supports inclusion and exclusion projections over dotted paths, the implicit `_id`
//! inclusion, and the positional `field.$` operator, which keeps only the first array
//! element matching the query's condition on that field.

use bson::{Bson, Document};

use docmap_core::{
    error::{DocmapError, DocmapResult},
    schema::ID_FIELD,
};

use crate::evaluator::{element_matches, truthy};

#[derive(Debug)]
pub(crate) enum ProjectionPlan {
    Include {
        paths: Vec<String>,
        positional: Option<(String, Bson)>,
        with_id: bool,
    },
    Exclude(Vec<String>),
}

impl ProjectionPlan {
    /// Validates a projection document against the query it accompanies.
    pub(crate) fn parse(projection: &Document, filter: &Document) -> DocmapResult<Self> {
        let mut include = Vec::new();
        let mut exclude = Vec::new();
        let mut positional = None;
        let mut id_flag = None;

        for (path, flag) in projection {
            if matches!(flag, Bson::Document(_)) {
                return Err(DocmapError::InvalidQuery(format!(
                    "unsupported projection expression for '{path}'"
                )));
            }

            if let Some(field) = path.strip_suffix(".$") {
                if positional.is_some() {
                    return Err(DocmapError::InvalidQuery(
                        "only one positional projection is allowed".to_string(),
                    ));
                }
                let condition = find_condition(filter, field).ok_or_else(|| {
                    DocmapError::InvalidQuery(format!(
                        "positional projection on '{field}' needs a query condition on that field"
                    ))
                })?;
                positional = Some((field.to_string(), condition.clone()));
                continue;
            }

            if path == ID_FIELD {
                id_flag = Some(truthy(flag));
            } else if truthy(flag) {
                include.push(path.clone());
            } else {
                exclude.push(path.clone());
            }
        }

        if (!include.is_empty() || positional.is_some()) && !exclude.is_empty() {
            return Err(DocmapError::InvalidQuery(format!(
                "cannot do exclusion on field {} in inclusion projection",
                exclude[0]
            )));
        }

        if !exclude.is_empty() || (include.is_empty() && positional.is_none() && id_flag == Some(false)) {
            if id_flag == Some(false) {
                exclude.push(ID_FIELD.to_string());
            }
            return Ok(ProjectionPlan::Exclude(exclude));
        }

        Ok(ProjectionPlan::Include {
            paths: include,
            positional,
            with_id: id_flag.unwrap_or(true),
        })
    }

    pub(crate) fn apply(&self, document: &Document) -> Document {
        match self {
            ProjectionPlan::Include { paths, positional, with_id } => {
                let mut projected = include(document, paths);

                if *with_id {
                    if let Some(id) = document.get(ID_FIELD) {
                        projected.insert(ID_FIELD, id.clone());
                    }
                }

                if let Some((field, condition)) = positional {
                    if let Some(Bson::Array(items)) = document.get(field) {
                        if let Some(item) = items.iter().find(|item| element_matches(item, condition)) {
                            projected.insert(field, Bson::Array(vec![item.clone()]));
                        }
                    }
                }

                reorder(document, projected)
            }
            ProjectionPlan::Exclude(paths) => {
                let mut projected = document.clone();
                for path in paths {
                    remove_path(&mut projected, path);
                }
                projected
            }
        }
    }
}

/// Looks for the condition on `field` at the top level of the filter or in its `$and`
/// clauses.
fn find_condition<'a>(filter: &'a Document, field: &str) -> Option<&'a Bson> {
    if let Some(condition) = filter.get(field) {
        return Some(condition);
    }

    filter
        .get_array("$and")
        .ok()?
        .iter()
        .filter_map(Bson::as_document)
        .find_map(|clause| find_condition(clause, field))
}

fn include(document: &Document, paths: &[String]) -> Document {
    let mut projected = Document::new();

    for (key, value) in document {
        let nested: Vec<String> = paths
            .iter()
            .filter_map(|path| path.strip_prefix(key.as_str())?.strip_prefix('.'))
            .map(str::to_string)
            .collect();

        if paths.iter().any(|path| path == key) {
            projected.insert(key, value.clone());
        } else if !nested.is_empty() {
            match value {
                Bson::Document(inner) => {
                    projected.insert(key, include(inner, &nested));
                }
                Bson::Array(items) => {
                    let kept: Vec<Bson> = items
                        .iter()
                        .filter_map(Bson::as_document)
                        .map(|inner| Bson::Document(include(inner, &nested)))
                        .collect();
                    projected.insert(key, kept);
                }
                _ => {}
            }
        }
    }

    projected
}

/// Restores the source document's key order.
fn reorder(source: &Document, mut projected: Document) -> Document {
    let mut ordered = Document::new();

    for key in source.keys() {
        if let Some(value) = projected.remove(key) {
            ordered.insert(key, value);
        }
    }

    ordered
}

pub(crate) fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => match document.get_mut(head) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            Some(Bson::Array(items)) => {
                for item in items.iter_mut() {
                    if let Bson::Document(inner) = item {
                        remove_path(inner, rest);
                    }
                }
            }
            _ => {}
        },
    }
}
