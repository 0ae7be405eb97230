//! Rewriting user filters onto a projection slot.
//!
//! Projection queries are authored against the projection's logical schema
//! (`{ "saltAdded": { "$gt": 0 } }`), but storage places the state under
//! `projections.<name>` inside the stream document. [`nest_filter`] rewrites
//! a filter so every bare field path is prefixed with the slot path, and
//! [`nest_sort`] does the same for sort specifications.
//!
//! Only field *paths* move. Operator operands are relative to the field (or,
//! for `$elemMatch` and geospatial operators, to the matched element) rather
//! than to the stream document, so they pass through unchanged.
//!
//! The rewrite is not idempotent: applying it twice nests paths twice.
//! Callers must not double-apply.

use mongodb::bson::{Bson, Document};

/// Operators carrying an array of sub-filters; each element is rewritten
/// recursively.
const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

/// Operators carrying a single sub-filter; the value is rewritten in place.
const FIELD_SCOPE_OPERATORS: [&str; 4] = ["$not", "$expr", "$jsonSchema", "$where"];

/// Rewrite `filter` so that every bare field key is nested under `path`.
///
/// ```
/// use mongodb::bson::doc;
/// use vorfall_mongodb::filter::nest_filter;
///
/// let filter = doc! { "status": "active" };
/// assert_eq!(
///     nest_filter(&filter, "projections.test"),
///     doc! { "projections.test.status": "active" }
/// );
/// ```
#[must_use]
pub fn nest_filter(filter: &Document, path: &str) -> Document {
    let mut nested = Document::new();
    for (key, value) in filter {
        if LOGICAL_OPERATORS.contains(&key.as_str()) {
            nested.insert(key.clone(), nest_clauses(value, path));
        } else if FIELD_SCOPE_OPERATORS.contains(&key.as_str()) {
            match value {
                Bson::Document(sub_filter) => {
                    nested.insert(key.clone(), nest_filter(sub_filter, path));
                }
                other => {
                    nested.insert(key.clone(), other.clone());
                }
            }
        } else if key.starts_with('$') {
            nested.insert(key.clone(), value.clone());
        } else {
            nested.insert(format!("{path}.{key}"), value.clone());
        }
    }
    nested
}

/// Rewrite each element of a logical operator's clause array.
fn nest_clauses(clauses: &Bson, path: &str) -> Bson {
    match clauses {
        Bson::Array(items) => Bson::Array(
            items
                .iter()
                .map(|item| match item {
                    Bson::Document(clause) => Bson::Document(nest_filter(clause, path)),
                    other => other.clone(),
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Rewrite a sort specification so every bare key is nested under `path`.
///
/// Keys that are themselves operators (e.g. `$meta` projections) are left
/// alone.
#[must_use]
pub fn nest_sort(sort: &Document, path: &str) -> Document {
    sort.iter()
        .map(|(key, order)| {
            if key.starts_with('$') {
                (key.clone(), order.clone())
            } else {
                (format!("{path}.{key}"), order.clone())
            }
        })
        .collect()
}
