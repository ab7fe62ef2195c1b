//! Search options, criteria helpers and update specifications.
//!
//! Criteria are plain BSON documents keyed by logical field names. The [`Filter`] helpers
//! build the common operator documents so callers do not have to spell out `$`-keys:
//!
//! ```ignore
//! use docodm::query::{Filter, SearchOptions, SortDirection};
//!
//! let criteria = Filter::and([
//!     Filter::gte("age", 21),
//!     Filter::regex("name", "mongo", "i"),
//! ]);
//!
//! let options = SearchOptions::builder()
//!     .sort("createdAt", SortDirection::Desc)
//!     .skip(10)
//!     .limit(10)
//!     .build();
//! ```
//!
//! Updates are described by an [`UpdateSpec`]: either operator sections (`$inc`, `$set`,
//! `$unset`) or a bare document of fields, which is treated as `$set`.

use bson::{Bson, Document, doc};

use crate::{criteria::flatten_criteria, schema::EntitySchema};

/// Sort direction for search results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    fn as_bson(self) -> Bson {
        match self {
            SortDirection::Asc => Bson::Int32(1),
            SortDirection::Desc => Bson::Int32(-1),
        }
    }
}

/// Sort specification for search results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The logical field name to sort by; dotted paths are allowed.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Sorting and pagination appended to a search pipeline.
///
/// Stages are emitted as `$sort`, `$skip` then `$limit`, each only when set. A zero
/// skip or limit is omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchOptions {
    /// Sort keys, applied in order.
    pub sort: Vec<Sort>,
    /// Number of documents to skip.
    pub skip: Option<u64>,
    /// Maximum number of documents to return.
    pub limit: Option<u64>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new options builder for fluent construction.
    pub fn builder() -> SearchOptionsBuilder {
        SearchOptionsBuilder::default()
    }

    /// Pipeline stages of these options, with sort fields translated to storage names.
    pub fn to_pipeline(&self, schema: &EntitySchema) -> Vec<Document> {
        let mut pipeline = Vec::new();

        if !self.sort.is_empty() {
            let mut sort = Document::new();

            for Sort { field, direction } in &self.sort {
                sort.insert(schema.origin_path_of(field), direction.as_bson());
            }
            pipeline.push(doc! { "$sort": sort });
        }

        if let Some(skip) = self.skip.filter(|skip| *skip > 0) {
            let skip = skip as i64;
            pipeline.push(doc! { "$skip": skip });
        }

        if let Some(limit) = self.limit.filter(|limit| *limit > 0) {
            let limit = limit as i64;
            pipeline.push(doc! { "$limit": limit });
        }

        pipeline
    }

    /// Options as a plain document, as reported in not-found errors.
    pub fn to_document(&self) -> Document {
        let mut document = Document::new();

        if !self.sort.is_empty() {
            let sort = self
                .sort
                .iter()
                .map(|sort| (sort.field.clone(), sort.direction.as_bson()))
                .collect::<Document>();
            document.insert("$sort", sort);
        }
        if let Some(skip) = self.skip {
            document.insert("$skip", skip as i64);
        }
        if let Some(limit) = self.limit {
            document.insert("$limit", limit as i64);
        }

        document
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptionsBuilder {
    options: SearchOptions,
}

impl SearchOptionsBuilder {
    /// Adds a sort key.
    ///
    /// # Arguments
    ///
    /// * `field` - The logical field name to sort by
    /// * `direction` - The sort direction (ascending or descending)
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.sort.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Sets the number of documents to skip.
    pub fn skip(mut self, skip: u64) -> Self {
        self.options.skip = Some(skip);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    pub fn build(self) -> SearchOptions {
        self.options
    }
}

/// Helpers building criteria documents.
///
/// Every helper returns a document that can be passed as criteria directly or merged
/// with others through [`Filter::and`], [`Filter::or`] and [`Filter::nor`].
pub struct Filter;

impl Filter {
    fn op(field: impl Into<String>, op: &str, value: impl Into<Bson>) -> Document {
        let mut inner = Document::new();
        inner.insert(op, value.into());

        let mut criteria = Document::new();
        criteria.insert(field.into(), inner);
        criteria
    }

    /// Matches documents where the field equals the value.
    pub fn eq(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$eq", value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$ne", value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$gt", value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$gte", value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$lt", value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Bson>) -> Document {
        Self::op(field, "$lte", value)
    }

    /// Matches documents where the field equals any of the values.
    pub fn any_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Document {
        Self::op(field, "$in", values.into_iter().map(Into::into).collect::<Vec<Bson>>())
    }

    /// Matches documents where the field equals none of the values.
    pub fn none_of(field: impl Into<String>, values: impl IntoIterator<Item = impl Into<Bson>>) -> Document {
        Self::op(field, "$nin", values.into_iter().map(Into::into).collect::<Vec<Bson>>())
    }

    pub fn exists(field: impl Into<String>) -> Document {
        Self::op(field, "$exists", true)
    }

    pub fn not_exists(field: impl Into<String>) -> Document {
        Self::op(field, "$exists", false)
    }

    /// Matches string fields against a regular expression.
    ///
    /// # Arguments
    ///
    /// * `pattern` - The regular expression
    /// * `options` - Flags such as `i` (case insensitive) or `m` (multi-line)
    pub fn regex(field: impl Into<String>, pattern: impl Into<String>, options: impl Into<String>) -> Document {
        let mut criteria = Document::new();
        criteria.insert(
            field.into(),
            doc! { "$regex": pattern.into(), "$options": options.into() },
        );
        criteria
    }

    /// Matches arrays holding at least one element matching `criteria`.
    pub fn elem_match(field: impl Into<String>, criteria: Document) -> Document {
        Self::op(field, "$elemMatch", criteria)
    }

    /// Combines criteria such that all must match.
    pub fn and(criteria: impl IntoIterator<Item = Document>) -> Document {
        Self::logical("$and", criteria)
    }

    /// Combines criteria such that any can match.
    pub fn or(criteria: impl IntoIterator<Item = Document>) -> Document {
        Self::logical("$or", criteria)
    }

    /// Combines criteria such that none may match.
    pub fn nor(criteria: impl IntoIterator<Item = Document>) -> Document {
        Self::logical("$nor", criteria)
    }

    fn logical(op: &str, criteria: impl IntoIterator<Item = Document>) -> Document {
        let branches = criteria.into_iter().map(Bson::Document).collect::<Vec<_>>();

        let mut document = Document::new();
        document.insert(op, branches);
        document
    }
}

/// A bulk update: operator sections or a bare field-set shorthand.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateSpec {
    /// Explicit operator sections, each keyed by logical field names.
    Operators {
        inc: Option<Document>,
        set: Option<Document>,
        unset: Option<Document>,
    },
    /// Fields to set, keyed by logical field names.
    Fields(Document),
}

impl UpdateSpec {
    /// An empty operator update, to be filled through [`UpdateSpec::inc`],
    /// [`UpdateSpec::set`] and [`UpdateSpec::unset`].
    pub fn operators() -> Self {
        UpdateSpec::Operators {
            inc: None,
            set: None,
            unset: None,
        }
    }

    /// Adds a field to increment.
    pub fn inc(self, field: impl Into<String>, by: impl Into<Bson>) -> Self {
        self.with_section(Section::Inc, field.into(), by.into())
    }

    /// Adds a field to set.
    pub fn set(self, field: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.with_section(Section::Set, field.into(), value.into())
    }

    /// Adds a field to remove.
    pub fn unset(self, field: impl Into<String>) -> Self {
        self.with_section(Section::Unset, field.into(), Bson::String(String::new()))
    }

    fn with_section(self, section: Section, field: String, value: Bson) -> Self {
        let (mut inc, mut set, mut unset) = match self {
            UpdateSpec::Operators { inc, set, unset } => (inc, set, unset),
            UpdateSpec::Fields(fields) => (None, Some(fields), None),
        };

        let target = match section {
            Section::Inc => &mut inc,
            Section::Set => &mut set,
            Section::Unset => &mut unset,
        };
        target.get_or_insert_with(Document::new).insert(field, value);

        UpdateSpec::Operators { inc, set, unset }
    }

    /// Translates the update into a storage-shaped update document.
    ///
    /// Every section is keyed by storage names and flattened like criteria. Empty
    /// sections are dropped.
    pub fn to_update_document(&self, schema: &EntitySchema) -> Document {
        let translate = |section: &Document| flatten_criteria(&schema.prepare_search_criteria(section.clone()));
        let mut update = Document::new();

        match self {
            UpdateSpec::Fields(fields) => {
                let fields = translate(fields);
                if !fields.is_empty() {
                    update.insert("$set", fields);
                }
            }
            UpdateSpec::Operators { inc, set, unset } => {
                for (name, section) in [("$inc", inc), ("$set", set), ("$unset", unset)] {
                    let Some(section) = section else {
                        continue;
                    };

                    let section = translate(section);
                    if !section.is_empty() {
                        update.insert(name, section);
                    }
                }
            }
        }

        update
    }
}

#[derive(Clone, Copy)]
enum Section {
    Inc,
    Set,
    Unset,
}

impl From<Document> for UpdateSpec {
    /// Documents holding any of `$inc`, `$set` or `$unset` are read as operator updates;
    /// any other document is a bare field set.
    fn from(document: Document) -> Self {
        let is_operator = ["$inc", "$set", "$unset"]
            .iter()
            .any(|key| document.contains_key(key));

        if !is_operator {
            return UpdateSpec::Fields(document);
        }

        let section = |key: &str| document.get_document(key).ok().cloned();

        UpdateSpec::Operators {
            inc: section("$inc"),
            set: section("$set"),
            unset: section("$unset"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn filter_helpers_build_operator_documents() {
        assert_eq!(Filter::gt("age", 21), doc! { "age": { "$gt": 21 } });
        assert_eq!(Filter::any_of("tags", ["a", "b"]), doc! { "tags": { "$in": ["a", "b"] } });
        assert_eq!(
            Filter::regex("name", "mongo", "i"),
            doc! { "name": { "$regex": "mongo", "$options": "i" } }
        );
        assert_eq!(
            Filter::or([Filter::eq("a", 1), Filter::exists("b")]),
            doc! { "$or": [{ "a": { "$eq": 1 } }, { "b": { "$exists": true } }] }
        );
    }

    #[test]
    fn update_spec_detects_operator_documents() {
        let spec = UpdateSpec::from(doc! { "$inc": { "qty": 1 }, "$set": { "name": "x" } });
        assert_eq!(
            spec,
            UpdateSpec::Operators {
                inc: Some(doc! { "qty": 1 }),
                set: Some(doc! { "name": "x" }),
                unset: None,
            }
        );

        let spec = UpdateSpec::from(doc! { "name": "x" });
        assert_eq!(spec, UpdateSpec::Fields(doc! { "name": "x" }));
    }

    #[test]
    fn update_spec_builder_folds_fields_into_set() {
        let spec = UpdateSpec::Fields(doc! { "name": "x" }).inc("qty", 2).unset("note");

        assert_eq!(
            spec,
            UpdateSpec::Operators {
                inc: Some(doc! { "qty": 2 }),
                set: Some(doc! { "name": "x" }),
                unset: Some(doc! { "note": "" }),
            }
        );
    }
}
