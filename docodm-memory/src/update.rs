//! Update-operator application for in-memory documents.

use bson::{Bson, Document};

use docodm_core::error::{OdmError, OdmResult};

use crate::pipeline::{get_path, remove_path, set_path};

/// Applies `$set`, `$unset` and `$inc` sections to a document.
///
/// Returns true if the document changed.
///
/// # Errors
///
/// Returns [`OdmError::InvalidCriteria`] for unsupported operators, non-document
/// sections or non-numeric increments.
pub(crate) fn apply_update(document: &mut Document, update: &Document) -> OdmResult<bool> {
    let before = document.clone();

    for (operator, section) in update {
        let section = section
            .as_document()
            .ok_or_else(|| OdmError::InvalidCriteria(format!("{operator} expects a document")))?;

        match operator.as_str() {
            "$set" => {
                for (path, value) in section {
                    set_path(document, path, value.clone());
                }
            }
            "$unset" => {
                for (path, _) in section {
                    remove_path(document, path);
                }
            }
            "$inc" => {
                for (path, by) in section {
                    let value = increment(get_path(document, path), by)
                        .ok_or_else(|| OdmError::InvalidCriteria(format!("cannot increment '{path}' by {by}: not numeric or out of range")))?;
                    set_path(document, path, value);
                }
            }
            _ => {
                return Err(OdmError::InvalidCriteria(format!("unsupported update operator {operator}")));
            }
        }
    }

    Ok(*document != before)
}

fn increment(current: Option<&Bson>, by: &Bson) -> Option<Bson> {
    let current = current.cloned().unwrap_or(Bson::Int32(0));

    match (current, by) {
        (Bson::Int32(a), Bson::Int32(b)) => a
            .checked_add(*b)
            .map(Bson::Int32)
            .or_else(|| (a as i64).checked_add(*b as i64).map(Bson::Int64)),
        (Bson::Int32(a), Bson::Int64(b)) => (a as i64).checked_add(*b).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int32(b)) => a.checked_add(*b as i64).map(Bson::Int64),
        (Bson::Int64(a), Bson::Int64(b)) => a.checked_add(*b).map(Bson::Int64),
        (Bson::Double(a), by) => as_f64(by).map(|b| Bson::Double(a + b)),
        (current, Bson::Double(b)) => as_f64(&current).map(|a| Bson::Double(a + b)),
        _ => None,
    }
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(value) => Some(*value as f64),
        Bson::Int64(value) => Some(*value as f64),
        Bson::Double(value) => Some(*value),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    #[test]
    fn applies_operator_sections() {
        let mut document = doc! { "qty": 1, "meta": { "note": "x" }, "name": "a" };

        let changed = apply_update(
            &mut document,
            &doc! {
                "$inc": { "qty": 2, "views": 1 },
                "$set": { "meta.source": "web" },
                "$unset": { "name": "" },
            },
        )
        .unwrap();

        assert!(changed);
        assert_eq!(
            document,
            doc! { "qty": 3, "meta": { "note": "x", "source": "web" }, "views": 1 }
        );
    }

    #[test]
    fn reports_unchanged_documents() {
        let mut document = doc! { "qty": 1 };
        assert!(!apply_update(&mut document, &doc! { "$set": { "qty": 1 } }).unwrap());
    }

    #[test]
    fn promotes_and_rejects_overflowing_increments() {
        let mut document = doc! { "small": i32::MAX, "big": i64::MAX };

        apply_update(&mut document, &doc! { "$inc": { "small": 1 } }).unwrap();
        assert_eq!(document.get("small"), Some(&Bson::Int64(i32::MAX as i64 + 1)));

        let err = apply_update(&mut document, &doc! { "$inc": { "big": 1_i64 } }).unwrap_err();
        assert!(matches!(err, OdmError::InvalidCriteria(_)));
        assert_eq!(document.get_i64("big").unwrap(), i64::MAX);
    }

    #[test]
    fn rejects_bare_replacements() {
        let mut document = doc! { "qty": 1 };
        let err = apply_update(&mut document, &doc! { "qty": 2 }).unwrap_err();

        assert!(matches!(err, OdmError::InvalidCriteria(_)));
    }
}
