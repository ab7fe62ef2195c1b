//! Match-filter evaluation for in-memory document filtering.
//!
//! Filters reaching the in-memory store are already flattened into dotted paths by the
//! mapping layer, so evaluation resolves each path against the document and applies
//! either an implicit equality or the operators of an operator sub-document.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId, spec::ElementType};
use regex::{Regex, RegexBuilder};
use std::{cmp::Ordering, collections::HashMap};

use docodm_core::{
    criteria::{QUERY_OPERATORS, is_operator_document},
    error::{OdmError, OdmResult},
};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to `f64` so that `Int32`, `Int64` and `Double` values
/// compare with each other.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    /// Null or missing value
    Null,
    /// Boolean value
    Bool(bool),
    /// Numeric value (all integers and floats normalized to f64)
    Number(f64),
    /// DateTime value
    DateTime(DateTime),
    /// Identity value
    ObjectId(ObjectId),
    /// String value
    String(&'a str),
    /// Array of comparable values
    Array(Vec<Comparable<'a>>),
    /// Map/Object of comparable values
    Map(HashMap<&'a str, Comparable<'a>>),
    /// Values without a comparison (binary, code, ...)
    Opaque(&'a Bson),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
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
            other => Comparable::Opaque(other),
        }
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            (Comparable::Opaque(a), Comparable::Opaque(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

/// Ordering used by `$sort`: missing and null values first, incomparable values equal.
pub(crate) fn sort_order(left: Option<&Bson>, right: Option<&Bson>) -> Ordering {
    let left = left.map(Comparable::from).unwrap_or(Comparable::Null);
    let right = right.map(Comparable::from).unwrap_or(Comparable::Null);

    match (&left, &right) {
        (Comparable::Null, Comparable::Null) => Ordering::Equal,
        (Comparable::Null, _) => Ordering::Less,
        (_, Comparable::Null) => Ordering::Greater,
        _ => left.partial_cmp(&right).unwrap_or(Ordering::Equal),
    }
}

/// Values found at a dotted path.
///
/// Arrays met along the path fan out over their document elements, so
/// `items.sku` yields the `sku` of every element of `items`.
pub(crate) fn resolve_path<'a>(document: &'a Document, path: &str) -> Vec<&'a Bson> {
    let mut values = Vec::new();
    resolve_into(document, path, &mut values);
    values
}

fn resolve_into<'a>(document: &'a Document, path: &str, values: &mut Vec<&'a Bson>) {
    let (head, tail) = match path.split_once('.') {
        Some((head, tail)) => (head, Some(tail)),
        None => (path, None),
    };

    let Some(value) = document.get(head) else {
        return;
    };

    match (tail, value) {
        (None, value) => values.push(value),
        (Some(tail), Bson::Document(nested)) => resolve_into(nested, tail, values),
        (Some(tail), Bson::Array(items)) => {
            for item in items {
                if let Bson::Document(nested) = item {
                    resolve_into(nested, tail, values);
                }
            }
        }
        (Some(_), _) => {}
    }
}

/// The candidate values an operator is applied to: every resolved value, plus the
/// elements of resolved arrays.
fn candidates<'a>(values: &[&'a Bson]) -> Vec<&'a Bson> {
    let mut candidates = Vec::with_capacity(values.len());

    for value in values {
        candidates.push(*value);
        if let Bson::Array(items) = *value {
            candidates.extend(items.iter());
        }
    }

    candidates
}

fn equals_any(values: &[&Bson], expected: &Bson) -> bool {
    if values.is_empty() {
        return matches!(expected, Bson::Null);
    }

    let expected = Comparable::from(expected);
    candidates(values)
        .into_iter()
        .any(|value| Comparable::from(value) == expected)
}

fn compare_any(values: &[&Bson], operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let operand = Comparable::from(operand);

    candidates(values)
        .into_iter()
        .filter_map(|value| Comparable::from(value).partial_cmp(&operand))
        .any(accept)
}

fn build_regex(pattern: &str, options: &str) -> OdmResult<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(options.contains('i'))
        .multi_line(options.contains('m'))
        .dot_matches_new_line(options.contains('s'))
        .ignore_whitespace(options.contains('x'))
        .build()
        .map_err(|e| OdmError::InvalidCriteria(format!("invalid regular expression '{pattern}': {e}")))
}

fn regex_matches_any(values: &[&Bson], regex: &Regex) -> bool {
    candidates(values).into_iter().any(|value| match value {
        Bson::String(value) => regex.is_match(value),
        _ => false,
    })
}

fn type_matches(value: &Bson, expected: &Bson) -> bool {
    let element_type = value.element_type();

    match expected {
        Bson::String(alias) => {
            let name = match element_type {
                ElementType::Double => "double",
                ElementType::String => "string",
                ElementType::EmbeddedDocument => "object",
                ElementType::Array => "array",
                ElementType::ObjectId => "objectId",
                ElementType::Boolean => "bool",
                ElementType::DateTime => "date",
                ElementType::Null => "null",
                ElementType::RegularExpression => "regex",
                ElementType::Int32 => "int",
                ElementType::Int64 => "long",
                ElementType::Decimal128 => "decimal",
                _ => "other",
            };

            alias == name
                || (alias == "number"
                    && matches!(
                        element_type,
                        ElementType::Double | ElementType::Int32 | ElementType::Int64 | ElementType::Decimal128
                    ))
        }
        Bson::Int32(code) => *code == element_type as u8 as i32,
        Bson::Int64(code) => *code == element_type as u8 as i64,
        Bson::Double(code) => *code == element_type as u8 as f64,
        Bson::Array(aliases) => aliases.iter().any(|alias| type_matches(value, alias)),
        _ => false,
    }
}

/// Evaluates flattened match filters against a single document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// True if the document satisfies every entry of `filter`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::InvalidCriteria`] for unknown operators, malformed operands
    /// or invalid regular expressions.
    pub fn matches(&self, filter: &Document) -> OdmResult<bool> {
        for (key, condition) in filter {
            let matched = match key.as_str() {
                "$and" => self.all(key, condition)?,
                "$or" => self.any(key, condition)?,
                "$nor" => !self.any(key, condition)?,
                _ => self.matches_field(key, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Keeps the documents satisfying `filter`.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = &'a Document>,
        filter: &Document,
    ) -> OdmResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(filter)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn branches<'b>(key: &str, condition: &'b Bson) -> OdmResult<Vec<&'b Document>> {
        let Bson::Array(branches) = condition else {
            return Err(OdmError::InvalidCriteria(format!("{key} expects an array of criteria")));
        };

        branches
            .iter()
            .map(|branch| {
                branch.as_document().ok_or_else(|| {
                    OdmError::InvalidCriteria(format!("{key} expects an array of criteria"))
                })
            })
            .collect()
    }

    fn all(&self, key: &str, condition: &Bson) -> OdmResult<bool> {
        for branch in Self::branches(key, condition)? {
            if !self.matches(branch)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any(&self, key: &str, condition: &Bson) -> OdmResult<bool> {
        for branch in Self::branches(key, condition)? {
            if self.matches(branch)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn matches_field(&self, path: &str, condition: &Bson) -> OdmResult<bool> {
        let values = resolve_path(self.document, path);
        Self::matches_values(&values, condition)
    }

    fn matches_values(values: &[&Bson], condition: &Bson) -> OdmResult<bool> {
        match condition {
            Bson::Document(operators) if is_operator_document(operators) => {
                Self::matches_operators(values, operators)
            }
            Bson::RegularExpression(regex) => {
                let regex = build_regex(regex.pattern.as_str(), regex.options.as_str())?;
                Ok(regex_matches_any(values, &regex))
            }
            expected => Ok(equals_any(values, expected)),
        }
    }

    fn matches_operators(values: &[&Bson], operators: &Document) -> OdmResult<bool> {
        for (operator, operand) in operators {
            if !QUERY_OPERATORS.contains(&operator.as_str()) {
                return Err(OdmError::InvalidCriteria(format!("unknown operator {operator}")));
            }

            let matched = match operator.as_str() {
                "$eq" => equals_any(values, operand),
                "$ne" => !equals_any(values, operand),
                "$gt" => compare_any(values, operand, Ordering::is_gt),
                "$gte" => compare_any(values, operand, Ordering::is_ge),
                "$lt" => compare_any(values, operand, Ordering::is_lt),
                "$lte" => compare_any(values, operand, Ordering::is_le),
                "$in" => Self::operand_array(operator, operand)?
                    .iter()
                    .any(|expected| Self::in_member(values, expected)),
                "$nin" => !Self::operand_array(operator, operand)?
                    .iter()
                    .any(|expected| Self::in_member(values, expected)),
                "$exists" => !values.is_empty() == operand_truthy(operand),
                "$regex" => {
                    let options = operators.get_str("$options").unwrap_or_default();
                    let regex = match operand {
                        Bson::String(pattern) => build_regex(pattern, options)?,
                        Bson::RegularExpression(regex) => {
                            build_regex(regex.pattern.as_str(), regex.options.as_str())?
                        }
                        _ => {
                            return Err(OdmError::InvalidCriteria("$regex expects a string".into()));
                        }
                    };

                    regex_matches_any(values, &regex)
                }
                "$options" => true,
                "$not" => !Self::matches_values(values, operand)?,
                "$elemMatch" => Self::elem_match(values, operand)?,
                "$all" => {
                    let expected = Self::operand_array(operator, operand)?;
                    !expected.is_empty() && expected.iter().all(|item| equals_any(values, item))
                }
                "$size" => {
                    let size = match operand {
                        Bson::Int32(size) => *size as i64,
                        Bson::Int64(size) => *size,
                        Bson::Double(size) => *size as i64,
                        _ => return Err(OdmError::InvalidCriteria("$size expects a number".into())),
                    };

                    values.iter().any(|value| matches!(value, Bson::Array(items) if items.len() as i64 == size))
                }
                "$type" => values.iter().any(|value| type_matches(value, operand)),
                _ => true,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn in_member(values: &[&Bson], expected: &Bson) -> bool {
        match expected {
            Bson::RegularExpression(regex) => build_regex(regex.pattern.as_str(), regex.options.as_str())
                .map(|regex| regex_matches_any(values, &regex))
                .unwrap_or(false),
            expected => equals_any(values, expected),
        }
    }

    fn operand_array<'b>(operator: &str, operand: &'b Bson) -> OdmResult<&'b Vec<Bson>> {
        operand
            .as_array()
            .ok_or_else(|| OdmError::InvalidCriteria(format!("{operator} expects an array")))
    }

    fn elem_match(values: &[&Bson], operand: &Bson) -> OdmResult<bool> {
        let Bson::Document(condition) = operand else {
            return Err(OdmError::InvalidCriteria("$elemMatch expects a document".into()));
        };

        for value in values {
            let Bson::Array(items) = value else {
                continue;
            };

            for item in items {
                let matched = match item {
                    Bson::Document(element) if !is_operator_document(condition) => {
                        DocumentEvaluator::new(element).matches(condition)?
                    }
                    _ if is_operator_document(condition) => Self::matches_operators(&[item], condition)?,
                    _ => false,
                };

                if matched {
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }
}

fn operand_truthy(operand: &Bson) -> bool {
    match operand {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        Bson::Null => false,
        _ => true,
    }
}
