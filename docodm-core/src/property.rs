//! Per-field metadata of an entity schema.
//!
//! A [`PropertySchema`] describes how one logical field of an entity is stored: the
//! storage name (alias), the declared type, whether the field may be absent and the
//! default value applied when stored data lacks it.

use bson::{Bson, oid::ObjectId};
use tracing::warn;

/// Declared type of a property.
///
/// Arrays are expressed by wrapping the element type in [`PropertyType::Array`]; the
/// schema unwraps them and records the nesting level separately.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum PropertyType {
    /// No declared type, values are stored as given.
    #[default]
    Any,
    /// UTF-8 string.
    String,
    /// 32 or 64 bit integer.
    Int,
    /// Floating point number.
    Double,
    /// Any numeric value.
    Number,
    /// Boolean flag.
    Boolean,
    /// UTC timestamp.
    DateTime,
    /// Embedded document.
    Document,
    /// Native identity reference of the store.
    ObjectId,
    /// Array of the wrapped type.
    Array(Box<PropertyType>),
}

impl PropertyType {
    /// Wraps a type into an array type.
    pub fn array_of(inner: PropertyType) -> Self {
        PropertyType::Array(Box::new(inner))
    }
}

/// Metadata of a single logical field.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySchema {
    property: String,
    alias: Option<String>,
    ty: PropertyType,
    array_deepness: usize,
    optional: bool,
    default: Option<Bson>,
}

impl PropertySchema {
    /// Creates the descriptor of a logical field with no alias, type or default.
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            alias: None,
            ty: PropertyType::Any,
            array_deepness: 0,
            optional: false,
            default: None,
        }
    }

    /// Name under which the value is kept in storage.
    pub fn origin_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.property)
    }

    /// Sets the declared type, unwrapping array types into `array_deepness`.
    pub fn set_type(&mut self, ty: PropertyType) -> &mut Self {
        let mut nested = ty;
        let mut deepness = 0;

        while let PropertyType::Array(inner) = nested {
            deepness += 1;
            nested = *inner;
        }

        self.ty = nested;
        self.array_deepness = deepness;
        self
    }

    /// Sets the value used when stored data lacks this field.
    pub fn set_default(&mut self, value: impl Into<Bson>) -> &mut Self {
        self.default = Some(value.into());
        self
    }

    /// Marks the field as tolerated when absent.
    pub fn make_optional(&mut self) -> &mut Self {
        self.optional = true;
        self
    }

    /// Stores the field under `alias` instead of its logical name.
    pub fn alias_for(&mut self, alias: impl Into<String>) -> &mut Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn default_value(&self) -> Option<&Bson> {
        self.default.as_ref()
    }

    pub fn is_optional(&self) -> bool {
        self.optional
    }

    pub fn ty(&self) -> &PropertyType {
        &self.ty
    }

    pub fn array_deepness(&self) -> usize {
        self.array_deepness
    }

    pub fn property_name(&self) -> &str {
        &self.property
    }

    pub fn alias_name(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Coerces a criterion value aimed at this field into the stored representation.
    ///
    /// Strings on identity-typed fields are parsed into an [`ObjectId`]. A string that
    /// does not parse is replaced with a fresh identity, so the criterion matches
    /// nothing instead of failing.
    pub fn coerce_criterion(&self, value: Bson) -> Bson {
        match (&self.ty, value) {
            (PropertyType::ObjectId, Bson::String(raw)) => match ObjectId::parse_str(&raw) {
                Ok(id) => Bson::ObjectId(id),
                Err(_) => {
                    warn!(property = %self.property, value = %raw, "malformed identity in criteria");
                    Bson::ObjectId(ObjectId::new())
                }
            },
            (_, value) => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_name_falls_back_to_property() {
        let mut schema = PropertySchema::new("qty");
        assert_eq!(schema.origin_name(), "qty");

        schema.alias_for("quantity");
        assert_eq!(schema.origin_name(), "quantity");
        assert_eq!(schema.property_name(), "qty");
    }

    #[test]
    fn set_type_unwraps_nested_arrays() {
        let mut schema = PropertySchema::new("matrix");
        schema.set_type(PropertyType::array_of(PropertyType::array_of(PropertyType::Double)));

        assert_eq!(schema.ty(), &PropertyType::Double);
        assert_eq!(schema.array_deepness(), 2);

        schema.set_type(PropertyType::String);
        assert_eq!(schema.array_deepness(), 0);
    }

    #[test]
    fn coerces_identity_strings() {
        let mut schema = PropertySchema::new("ownerId");
        schema.set_type(PropertyType::ObjectId);

        let id = ObjectId::new();
        assert_eq!(schema.coerce_criterion(Bson::String(id.to_hex())), Bson::ObjectId(id));

        let replaced = schema.coerce_criterion(Bson::String("not-an-id".into()));
        assert!(matches!(replaced, Bson::ObjectId(other) if other != id));
    }

    #[test]
    fn leaves_other_types_untouched() {
        let schema = PropertySchema::new("name");
        assert_eq!(
            schema.coerce_criterion(Bson::String("abc".into())),
            Bson::String("abc".into())
        );
    }
}
