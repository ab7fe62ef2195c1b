//! Aggregation pipeline execution over in-memory collections.
//!
//! Supports the stages the mapping layer emits: `$match`, `$sort`, `$skip`, `$limit`,
//! `$lookup` (equality join), `$addFields` (field references, `$arrayElemAt` and
//! literals) and `$project` (inclusion or exclusion).

use bson::{Bson, Document};
use std::collections::HashMap;
use tracing::trace;

use docodm_core::{
    entity::ID_FIELD,
    error::{OdmError, OdmResult},
};

use crate::evaluator::{Comparable, DocumentEvaluator, resolve_path, sort_order};

/// Collections addressable by `$lookup`.
pub(crate) type Collections = HashMap<String, Vec<Document>>;

/// Runs `stages` over `rows` in order.
pub(crate) fn run_pipeline(
    mut rows: Vec<Document>,
    stages: &[Document],
    collections: &Collections,
) -> OdmResult<Vec<Document>> {
    for stage in stages {
        let mut entries = stage.iter();

        let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
            return Err(OdmError::InvalidCriteria(format!(
                "pipeline stage must hold exactly one operator: {stage}"
            )));
        };

        trace!(stage = %name, rows = rows.len(), "running stage");

        rows = match name.as_str() {
            "$match" => match_stage(rows, as_document(name, spec)?)?,
            "$sort" => sort_stage(rows, as_document(name, spec)?),
            "$skip" => rows.into_iter().skip(as_count(name, spec)?).collect(),
            "$limit" => rows.into_iter().take(as_count(name, spec)?).collect(),
            "$lookup" => lookup_stage(rows, as_document(name, spec)?, collections)?,
            "$addFields" | "$set" => add_fields_stage(rows, as_document(name, spec)?)?,
            "$project" => project_stage(rows, as_document(name, spec)?)?,
            _ => {
                return Err(OdmError::InvalidCriteria(format!(
                    "unsupported pipeline stage {name}"
                )));
            }
        };
    }

    Ok(rows)
}

fn as_document<'a>(stage: &str, spec: &'a Bson) -> OdmResult<&'a Document> {
    spec.as_document()
        .ok_or_else(|| OdmError::InvalidCriteria(format!("{stage} expects a document")))
}

fn as_count(stage: &str, spec: &Bson) -> OdmResult<usize> {
    let count = match spec {
        Bson::Int32(count) => *count as i64,
        Bson::Int64(count) => *count,
        Bson::Double(count) if count.fract() == 0.0 => *count as i64,
        _ => return Err(OdmError::InvalidCriteria(format!("{stage} expects an integer"))),
    };

    usize::try_from(count)
        .map_err(|_| OdmError::InvalidCriteria(format!("{stage} expects a non-negative integer")))
}

fn match_stage(rows: Vec<Document>, filter: &Document) -> OdmResult<Vec<Document>> {
    let mut matched = Vec::with_capacity(rows.len());

    for row in rows {
        if DocumentEvaluator::new(&row).matches(filter)? {
            matched.push(row);
        }
    }

    Ok(matched)
}

fn sort_stage(mut rows: Vec<Document>, keys: &Document) -> Vec<Document> {
    let keys = keys
        .iter()
        .map(|(field, direction)| {
            let descending = matches!(direction, Bson::Int32(d) if *d < 0)
                || matches!(direction, Bson::Int64(d) if *d < 0)
                || matches!(direction, Bson::Double(d) if *d < 0.0);
            (field.as_str(), descending)
        })
        .collect::<Vec<_>>();

    rows.sort_by(|left, right| {
        for (field, descending) in &keys {
            let ordering = sort_order(
                resolve_path(left, field).first().copied(),
                resolve_path(right, field).first().copied(),
            );
            let ordering = if *descending { ordering.reverse() } else { ordering };

            if ordering.is_ne() {
                return ordering;
            }
        }

        std::cmp::Ordering::Equal
    });

    rows
}

fn lookup_stage(
    rows: Vec<Document>,
    spec: &Document,
    collections: &Collections,
) -> OdmResult<Vec<Document>> {
    let field = |key: &str| {
        spec.get_str(key)
            .map_err(|_| OdmError::InvalidCriteria(format!("$lookup requires a string '{key}'")))
    };

    let from = field("from")?;
    let local_field = field("localField")?;
    let foreign_field = field("foreignField")?;
    let target = field("as")?;

    let foreign = collections.get(from).map(Vec::as_slice).unwrap_or_default();

    Ok(rows
        .into_iter()
        .map(|mut row| {
            let local = join_keys(&row, local_field);
            let joined = foreign
                .iter()
                .filter(|candidate| {
                    let keys = join_keys(candidate, foreign_field);
                    keys.iter().any(|key| local.contains(key))
                })
                .cloned()
                .map(Bson::Document)
                .collect::<Vec<_>>();

            row.insert(target, joined);
            row
        })
        .collect())
}

/// Values a document exposes to a join: array elements are joined individually and a
/// missing field joins as null.
fn join_keys<'a>(document: &'a Document, path: &str) -> Vec<Comparable<'a>> {
    let values = resolve_path(document, path);

    if values.is_empty() {
        return vec![Comparable::Null];
    }

    values
        .into_iter()
        .flat_map(|value| match value {
            Bson::Array(items) => items.iter().map(Comparable::from).collect::<Vec<_>>(),
            value => vec![Comparable::from(value)],
        })
        .collect()
}

fn add_fields_stage(rows: Vec<Document>, fields: &Document) -> OdmResult<Vec<Document>> {
    rows.into_iter()
        .map(|mut row| -> OdmResult<Document> {
            for (field, expression) in fields {
                match evaluate_expression(&row, expression)? {
                    Some(value) => set_path(&mut row, field, value),
                    None => {
                        remove_path(&mut row, field);
                    }
                }
            }

            Ok(row)
        })
        .collect()
}

/// Evaluates an aggregation expression against a row. `None` means the result is
/// missing, so the field is left out.
fn evaluate_expression(row: &Document, expression: &Bson) -> OdmResult<Option<Bson>> {
    match expression {
        Bson::String(reference) if reference.starts_with('$') => {
            let values = resolve_path(row, &reference[1..]);

            Ok(match values.as_slice() {
                [] => None,
                [value] => Some((*value).clone()),
                values => Some(Bson::Array(values.iter().map(|value| (*value).clone()).collect())),
            })
        }
        Bson::Document(operator) if operator.contains_key("$arrayElemAt") => {
            let arguments = operator
                .get_array("$arrayElemAt")
                .map_err(|_| OdmError::InvalidCriteria("$arrayElemAt expects [array, index]".into()))?;

            let [array, index] = arguments.as_slice() else {
                return Err(OdmError::InvalidCriteria("$arrayElemAt expects [array, index]".into()));
            };

            let Some(Bson::Array(items)) = evaluate_expression(row, array)? else {
                return Ok(None);
            };

            let index = match index {
                Bson::Int32(index) => *index as i64,
                Bson::Int64(index) => *index,
                _ => return Err(OdmError::InvalidCriteria("$arrayElemAt index must be an integer".into())),
            };

            let position = if index < 0 { items.len() as i64 + index } else { index };

            Ok(usize::try_from(position)
                .ok()
                .and_then(|position| items.get(position))
                .cloned())
        }
        Bson::Document(operator) if operator.contains_key("$literal") => {
            Ok(operator.get("$literal").cloned())
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn project_stage(rows: Vec<Document>, projection: &Document) -> OdmResult<Vec<Document>> {
    let mut excluded = Vec::new();
    let mut included = Vec::new();
    let mut keep_id = true;

    for (field, flag) in projection {
        let flag = match flag {
            Bson::Boolean(flag) => *flag,
            Bson::Int32(flag) => *flag != 0,
            Bson::Int64(flag) => *flag != 0,
            Bson::Double(flag) => *flag != 0.0,
            _ => return Err(OdmError::InvalidCriteria(format!("$project value of '{field}' must be 0 or 1"))),
        };

        match (field.as_str(), flag) {
            (ID_FIELD, flag) => keep_id = flag,
            (field, true) => included.push(field),
            (field, false) => excluded.push(field),
        }
    }

    if !included.is_empty() && !excluded.is_empty() {
        return Err(OdmError::InvalidCriteria(
            "$project cannot mix inclusion and exclusion".into(),
        ));
    }

    Ok(rows
        .into_iter()
        .map(|mut row| {
            if included.is_empty() {
                for field in &excluded {
                    remove_path(&mut row, field);
                }
                if !keep_id {
                    row.remove(ID_FIELD);
                }
                return row;
            }

            let mut projected = Document::new();
            if keep_id {
                if let Some(id) = row.get(ID_FIELD) {
                    projected.insert(ID_FIELD, id.clone());
                }
            }
            for field in &included {
                if let Some(value) = resolve_path(&row, field).first() {
                    set_path(&mut projected, field, (*value).clone());
                }
            }
            projected
        })
        .collect())
}

/// Writes a value at a dotted path, creating intermediate documents.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, tail)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Ok(nested) = document.get_document_mut(head) {
                set_path(nested, tail, value);
            }
        }
    }
}

/// Removes the value at a dotted path.
pub(crate) fn remove_path(document: &mut Document, path: &str) -> Option<Bson> {
    match path.split_once('.') {
        None => document.remove(path),
        Some((head, tail)) => document
            .get_document_mut(head)
            .ok()
            .and_then(|nested| remove_path(nested, tail)),
    }
}

/// Value at a dotted path, without fanning out over arrays.
pub(crate) fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    match path.split_once('.') {
        None => document.get(path),
        Some((head, tail)) => document
            .get_document(head)
            .ok()
            .and_then(|nested| get_path(nested, tail)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{doc, oid::ObjectId};
    use pretty_assertions::assert_eq;

    fn join(from: &str, local: &str, foreign: &str, field: &str) -> Vec<Document> {
        let joined = format!("{field}-all");

        vec![
            doc! { "$lookup": { "from": from, "localField": local, "foreignField": foreign, "as": joined.as_str() } },
            doc! { "$addFields": { field: { "$arrayElemAt": [format!("${joined}"), 0] } } },
            doc! { "$project": { joined: 0 } },
        ]
    }

    #[test]
    fn single_valued_join_takes_first_match_or_leaves_field_absent() {
        let item = ObjectId::new();
        let mut collections = Collections::new();
        collections.insert(
            "items".into(),
            vec![doc! { "_id": item, "price": 7.5 }, doc! { "_id": ObjectId::new(), "price": 1.0 }],
        );

        let rows = vec![doc! { "_id": 1, "itemId": item }, doc! { "_id": 2, "itemId": ObjectId::new() }];
        let rows = run_pipeline(rows, &join("items", "itemId", "_id", "item"), &collections).unwrap();

        assert_eq!(rows[0], doc! { "_id": 1, "itemId": item, "item": { "_id": item, "price": 7.5 } });
        assert_eq!(rows[1].get("item"), None);
        assert!(!rows[1].contains_key("item-all"));
    }

    #[test]
    fn sorts_then_skips_then_limits() {
        let rows = vec![
            doc! { "n": 3 },
            doc! { "n": 1 },
            doc! { "n": 2 },
            doc! { "m": 0 },
        ];

        let stages = vec![
            doc! { "$sort": { "n": -1 } },
            doc! { "$skip": 1_i64 },
            doc! { "$limit": 2_i64 },
        ];

        let rows = run_pipeline(rows, &stages, &Collections::new()).unwrap();
        assert_eq!(rows, vec![doc! { "n": 2 }, doc! { "n": 1 }]);
    }

    #[test]
    fn projects_inclusions() {
        let rows = vec![doc! { "_id": 1, "a": { "b": 1, "c": 2 }, "d": 3 }];
        let rows = run_pipeline(rows, &[doc! { "$project": { "a.b": 1 } }], &Collections::new()).unwrap();

        assert_eq!(rows, vec![doc! { "_id": 1, "a": { "b": 1 } }]);
    }

    #[test]
    fn rejects_unsupported_stages() {
        let err = run_pipeline(vec![], &[doc! { "$unwind": "$a" }], &Collections::new()).unwrap_err();
        assert!(matches!(err, OdmError::InvalidCriteria(_)));
    }
}
