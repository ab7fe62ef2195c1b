//! Translation of nested criteria into flat, dotted-path match filters.
//!
//! Criteria are plain BSON documents keyed by field names. Nested documents are walked
//! and their keys joined with `.`, except for operator sub-documents (any document with
//! a `$`-prefixed key such as `{ "$gt": 21 }`) which are kept whole. Identity values,
//! arrays, regular expressions and scalars are leaves and are never destructured.
//!
//! ```ignore
//! use bson::doc;
//! use docodm_core::criteria::flatten_criteria;
//!
//! let flat = flatten_criteria(&doc! { "address": { "city": "Oslo" }, "age": { "$gte": 21 } });
//! assert_eq!(flat, doc! { "address.city": "Oslo", "age": { "$gte": 21 } });
//! ```

use bson::{Bson, Document};

/// Field-level query operators understood by the translator.
pub const QUERY_OPERATORS: &[&str] = &[
    "$exists",
    "$eq",
    "$ne",
    "$in",
    "$nin",
    "$gt",
    "$gte",
    "$lt",
    "$lte",
    "$elemMatch",
    "$regex",
    "$options",
    "$not",
    "$all",
    "$size",
    "$type",
];

/// Top-level operators combining several sub-criteria.
pub const LOGICAL_OPERATORS: &[&str] = &["$and", "$or", "$nor"];

/// Returns true if the key is one of `$and`, `$or`, `$nor`.
pub fn is_logical_operator(key: &str) -> bool {
    LOGICAL_OPERATORS.contains(&key)
}

/// Returns true if the document is an operator sub-document rather than a nested object.
pub fn is_operator_document(document: &Document) -> bool {
    document.keys().any(|key| key.starts_with('$'))
}

/// Returns true if the value must be assigned as is instead of being walked.
pub fn is_leaf(value: &Bson) -> bool {
    match value {
        Bson::Document(document) => is_operator_document(document),
        _ => true,
    }
}

/// Joins a parent path and a key with `.`.
pub fn join_path(parent: Option<&str>, key: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}.{key}"),
        _ => key.to_string(),
    }
}

/// Flattens nested criteria into a single-level document of dotted paths.
///
/// The last value written at a given path wins. Empty criteria produce an empty filter,
/// which matches every document.
pub fn flatten_criteria(criteria: &Document) -> Document {
    let mut flat = Document::new();
    flatten_into(&mut flat, None, criteria);
    flat
}

fn flatten_into(flat: &mut Document, parent: Option<&str>, criteria: &Document) {
    for (key, value) in criteria {
        let path = join_path(parent, key);

        match value {
            Bson::Document(nested) if !is_leaf(value) => flatten_into(flat, Some(&path), nested),
            _ => {
                flat.insert(path, value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{Regex, doc, oid::ObjectId};
    use pretty_assertions::assert_eq;

    #[test]
    fn flattens_nested_documents() {
        assert_eq!(flatten_criteria(&doc! { "a": { "b": 1 } }), doc! { "a.b": 1 });
        assert_eq!(
            flatten_criteria(&doc! { "a": { "b": { "c": "x" }, "d": true } }),
            doc! { "a.b.c": "x", "a.d": true }
        );
    }

    #[test]
    fn keeps_operator_documents() {
        assert_eq!(flatten_criteria(&doc! { "a": { "$eq": 1 } }), doc! { "a": { "$eq": 1 } });
        assert_eq!(
            flatten_criteria(&doc! { "a": { "b": { "$in": [1, 2] } } }),
            doc! { "a.b": { "$in": [1, 2] } }
        );
    }

    #[test]
    fn flat_criteria_is_unchanged() {
        let flat = doc! { "a.b": 1, "name": "MongoZilla", "age": { "$gte": 21 } };
        assert_eq!(flatten_criteria(&flat), flat);
    }

    #[test]
    fn leaves_are_not_destructured() {
        let id = ObjectId::new();
        let pattern = Regex {
            pattern: "mongo".try_into().unwrap(),
            options: "i".try_into().unwrap(),
        };
        let criteria = doc! {
            "_id": id,
            "name": pattern,
            "tags": ["a", "b"],
            "items": [{ "sku": 1 }],
        };

        assert_eq!(flatten_criteria(&criteria), criteria);
    }

    #[test]
    fn empty_criteria_matches_everything() {
        assert_eq!(flatten_criteria(&doc! {}), doc! {});
    }

    #[test]
    fn last_writer_wins_at_same_path() {
        let criteria = doc! { "a.b": 1, "a": { "b": 2 } };
        assert_eq!(flatten_criteria(&criteria), doc! { "a.b": 2 });
    }

    #[test]
    fn detects_logical_operators() {
        assert!(is_logical_operator("$or"));
        assert!(!is_logical_operator("$eq"));
        assert!(QUERY_OPERATORS.contains(&"$elemMatch"));
    }
}
