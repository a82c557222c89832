//! Recursive conversion of values into their stored or JSON-safe form.
//!
//! These helpers are shared by every field kind, so a datetime is converted the same way
//! whether it sits at the top level of a record or three levels deep in a nested list.

use bson::{Bson, DateTime, Document, Timestamp};
use chrono::{TimeZone, Utc};

use crate::error::{DocmapError, DocmapResult};

/// Text format used for datetimes and timestamps in JSON-safe output (UTC).
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

/// Formats a datetime with [`DATETIME_FORMAT`].
pub fn format_datetime(value: DateTime) -> String {
    value
        .to_chrono()
        .format(DATETIME_FORMAT)
        .to_string()
}

fn format_timestamp(value: Timestamp) -> String {
    match Utc.timestamp_opt(value.time as i64, 0).single() {
        Some(dt) => dt.format(DATETIME_FORMAT).to_string(),
        None => value.time.to_string(),
    }
}

/// Converts a datetime into a store timestamp, or into text when `to_json` is set.
///
/// Non-datetime input passes through unchanged. In `to_json` mode a stored timestamp is
/// rendered as text as well, since JSON has no timestamp type.
pub fn serialize_datetime(value: &Bson, to_json: bool) -> DocmapResult<Bson> {
    match value {
        Bson::DateTime(dt) if to_json => Ok(Bson::String(format_datetime(*dt))),
        Bson::DateTime(dt) => {
            let seconds = dt.timestamp_millis().div_euclid(1000);
            let time = u32::try_from(seconds).map_err(|_| DocmapError::InvalidValue {
                field: String::new(),
                kind: "timestamp",
                value: value.to_string(),
            })?;

            Ok(Bson::Timestamp(Timestamp { time, increment: 0 }))
        }
        Bson::Timestamp(ts) if to_json => Ok(Bson::String(format_timestamp(*ts))),
        other => Ok(other.clone()),
    }
}

/// Serializes any value, recursing into arrays and documents.
pub fn serialize_value(value: &Bson, to_json: bool) -> DocmapResult<Bson> {
    match value {
        Bson::Array(items) => Ok(Bson::Array(
            serialize_list(items, to_json).collect::<DocmapResult<Vec<_>>>()?,
        )),
        Bson::Document(doc) => Ok(Bson::Document(
            serialize_dict(doc, to_json).collect::<DocmapResult<Document>>()?,
        )),
        Bson::ObjectId(oid) if to_json => Ok(Bson::String(oid.to_hex())),
        other => serialize_datetime(other, to_json),
    }
}

/// Lazily serializes every element of a sequence, preserving order.
///
/// The iterator is single pass; collect it once.
pub fn serialize_list(
    items: &[Bson],
    to_json: bool,
) -> impl Iterator<Item = DocmapResult<Bson>> + '_ {
    items
        .iter()
        .map(move |item| serialize_value(item, to_json))
}

/// Lazily serializes every value of a mapping. Keys pass through unchanged.
pub fn serialize_dict(
    doc: &Document,
    to_json: bool,
) -> impl Iterator<Item = DocmapResult<(String, Bson)>> + '_ {
    doc.iter()
        .map(move |(key, value)| Ok((key.clone(), serialize_value(value, to_json)?)))
}
