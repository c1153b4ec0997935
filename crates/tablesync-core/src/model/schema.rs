//! Canonical schema representation with stable field identity.
//!
//! Schemas are acyclic trees of [`CanonicalField`]s. Composite kinds follow a
//! fixed shape: a `Record` has arbitrarily many named children, an `Array` has
//! exactly one child named `element`, and a `Map` has exactly two children
//! named `key` and `value`. Paths use dot notation with synthesized segments
//! for composites: an array element is reached via `arr.element`, a map key
//! via `m.key_value.key`, a map value via `m.key_value.value`. Every lookup
//! accepts those segments uniformly.
//!
//! Field identity is the `field_id`: a persistent integer that survives rename
//! and reorder. Sources that carry ids keep them through canonicalization;
//! sources without ids get them assigned by a monotonic counter, stable only
//! within that canonicalization.
use std::collections::HashMap;
use std::fmt;

use crate::model::stat::Scalar;

/// Synthesized path segment between a map and its `key`/`value` children.
pub const MAP_KEY_VALUE_SEGMENT: &str = "key_value";
/// Name of the single child of an `Array`.
pub const ARRAY_ELEMENT_FIELD: &str = "element";
/// Name of the first child of a `Map`.
pub const MAP_KEY_FIELD: &str = "key";
/// Name of the second child of a `Map`.
pub const MAP_VALUE_FIELD: &str = "value";

/// The canonical data types a field can take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalKind {
    Boolean,
    Int,
    Long,
    Float,
    Double,
    String,
    Bytes,
    /// Fixed-width binary; width in [`TypeMetadata::fixed_length`].
    Fixed,
    /// Fixed-precision decimal; precision/scale in [`TypeMetadata`].
    Decimal,
    /// Days since the Unix epoch.
    Date,
    /// Instant adjusted to UTC; precision in [`TypeMetadata`].
    Timestamp,
    /// Wall-clock timestamp without a timezone; precision in [`TypeMetadata`].
    TimestampNtz,
    /// Named string set; symbols in [`TypeMetadata::enum_symbols`].
    Enum,
    Record,
    Array,
    Map,
}

impl CanonicalKind {
    /// Whether this kind carries child fields.
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            CanonicalKind::Record | CanonicalKind::Array | CanonicalKind::Map
        )
    }

    /// Whether values of this kind denote a point in time.
    pub fn is_temporal(self) -> bool {
        matches!(
            self,
            CanonicalKind::Date | CanonicalKind::Timestamp | CanonicalKind::TimestampNtz
        )
    }
}

impl fmt::Display for CanonicalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CanonicalKind::Boolean => "boolean",
            CanonicalKind::Int => "int",
            CanonicalKind::Long => "long",
            CanonicalKind::Float => "float",
            CanonicalKind::Double => "double",
            CanonicalKind::String => "string",
            CanonicalKind::Bytes => "bytes",
            CanonicalKind::Fixed => "fixed",
            CanonicalKind::Decimal => "decimal",
            CanonicalKind::Date => "date",
            CanonicalKind::Timestamp => "timestamp",
            CanonicalKind::TimestampNtz => "timestamp_ntz",
            CanonicalKind::Enum => "enum",
            CanonicalKind::Record => "record",
            CanonicalKind::Array => "array",
            CanonicalKind::Map => "map",
        };
        write!(f, "{name}")
    }
}

/// Precision of a canonical timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimestampPrecision {
    Millis,
    Micros,
}

/// Logical-type details that do not fit the kind alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TypeMetadata {
    /// Total number of decimal digits.
    pub decimal_precision: Option<i32>,
    /// Digits to the right of the decimal point.
    pub decimal_scale: Option<i32>,
    /// Byte width of a `Fixed` value.
    pub fixed_length: Option<i32>,
    /// Unit of a `Timestamp`/`TimestampNtz` value.
    pub timestamp_precision: Option<TimestampPrecision>,
    /// Symbols of an `Enum` value.
    pub enum_symbols: Option<Vec<String>>,
}

impl TypeMetadata {
    /// Metadata for a decimal with the given precision and scale.
    pub fn decimal(precision: i32, scale: i32) -> Self {
        TypeMetadata {
            decimal_precision: Some(precision),
            decimal_scale: Some(scale),
            ..Default::default()
        }
    }

    /// Metadata for a fixed-width binary of `len` bytes.
    pub fn fixed(len: i32) -> Self {
        TypeMetadata {
            fixed_length: Some(len),
            ..Default::default()
        }
    }

    /// Metadata for a timestamp of the given precision.
    pub fn timestamp(precision: TimestampPrecision) -> Self {
        TypeMetadata {
            timestamp_precision: Some(precision),
            ..Default::default()
        }
    }
}

/// A named field inside a canonical schema.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalField {
    /// Field name as spelled by the source format.
    pub name: String,
    /// Persistent identity, unique within the schema tree. `None` until the
    /// owning schema has been through id assignment.
    pub field_id: Option<i32>,
    /// Whether the field admits nulls.
    pub nullable: bool,
    /// Optional default value for readers of older data.
    pub default: Option<Scalar>,
    /// The field's own type, leaf or composite.
    pub schema: CanonicalSchema,
}

impl CanonicalField {
    /// A nullable leaf field without metadata.
    pub fn nullable(name: impl Into<String>, kind: CanonicalKind) -> Self {
        CanonicalField {
            name: name.into(),
            field_id: None,
            nullable: true,
            default: None,
            schema: CanonicalSchema::primitive(kind),
        }
    }

    /// A required leaf field without metadata.
    pub fn required(name: impl Into<String>, kind: CanonicalKind) -> Self {
        CanonicalField {
            nullable: false,
            ..CanonicalField::nullable(name, kind)
        }
    }

    /// Replace the field id.
    pub fn with_id(mut self, id: i32) -> Self {
        self.field_id = Some(id);
        self
    }
}

/// A canonical schema node: a primitive leaf or a composite with children.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalSchema {
    pub kind: CanonicalKind,
    /// Children for composites; empty for primitives.
    pub fields: Vec<CanonicalField>,
    pub metadata: TypeMetadata,
    /// Dotted paths of the record-key fields. Meaningful on the root only.
    pub record_keys: Vec<String>,
}

impl CanonicalSchema {
    /// A primitive leaf without metadata.
    pub fn primitive(kind: CanonicalKind) -> Self {
        CanonicalSchema {
            kind,
            fields: Vec::new(),
            metadata: TypeMetadata::default(),
            record_keys: Vec::new(),
        }
    }

    /// A primitive leaf with logical-type metadata.
    pub fn primitive_with(kind: CanonicalKind, metadata: TypeMetadata) -> Self {
        CanonicalSchema {
            kind,
            fields: Vec::new(),
            metadata,
            record_keys: Vec::new(),
        }
    }

    /// A record with the given children.
    pub fn record(fields: Vec<CanonicalField>) -> Self {
        CanonicalSchema {
            kind: CanonicalKind::Record,
            fields,
            metadata: TypeMetadata::default(),
            record_keys: Vec::new(),
        }
    }

    /// An array of `element`. The child is renamed to the synthesized name.
    pub fn array(mut element: CanonicalField) -> Self {
        element.name = ARRAY_ELEMENT_FIELD.to_string();
        CanonicalSchema {
            kind: CanonicalKind::Array,
            fields: vec![element],
            metadata: TypeMetadata::default(),
            record_keys: Vec::new(),
        }
    }

    /// A map of `key` to `value`. Children are renamed to the synthesized
    /// names; map keys are never nullable.
    pub fn map(mut key: CanonicalField, mut value: CanonicalField) -> Self {
        key.name = MAP_KEY_FIELD.to_string();
        key.nullable = false;
        value.name = MAP_VALUE_FIELD.to_string();
        CanonicalSchema {
            kind: CanonicalKind::Map,
            fields: vec![key, value],
            metadata: TypeMetadata::default(),
            record_keys: Vec::new(),
        }
    }

    /// The element field of an `Array`, if this is one.
    pub fn array_element(&self) -> Option<&CanonicalField> {
        if self.kind == CanonicalKind::Array {
            self.fields.iter().find(|f| f.name == ARRAY_ELEMENT_FIELD)
        } else {
            None
        }
    }

    /// The `(key, value)` fields of a `Map`, if this is one.
    pub fn map_entries(&self) -> Option<(&CanonicalField, &CanonicalField)> {
        if self.kind != CanonicalKind::Map {
            return None;
        }
        let key = self.fields.iter().find(|f| f.name == MAP_KEY_FIELD)?;
        let value = self.fields.iter().find(|f| f.name == MAP_VALUE_FIELD)?;
        Some((key, value))
    }

    /// Find a field by its dotted path, accepting synthesized segments.
    pub fn field_at_path(&self, path: &str) -> Option<&CanonicalField> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.is_empty() {
            return None;
        }
        Self::lookup(self, &segments)
    }

    fn lookup<'a>(schema: &'a CanonicalSchema, segments: &[&str]) -> Option<&'a CanonicalField> {
        let (head, rest) = segments.split_first()?;
        let field = match schema.kind {
            CanonicalKind::Record => schema.fields.iter().find(|f| f.name == *head)?,
            CanonicalKind::Array => {
                if *head != ARRAY_ELEMENT_FIELD {
                    return None;
                }
                schema.array_element()?
            }
            CanonicalKind::Map => {
                // Maps insert the synthesized key_value segment before the
                // child name.
                if *head != MAP_KEY_VALUE_SEGMENT {
                    return None;
                }
                let (next, after) = rest.split_first()?;
                let (key, value) = schema.map_entries()?;
                let child = match *next {
                    MAP_KEY_FIELD => key,
                    MAP_VALUE_FIELD => value,
                    _ => return None,
                };
                return if after.is_empty() {
                    Some(child)
                } else {
                    Self::lookup(&child.schema, after)
                };
            }
            _ => return None,
        };
        if rest.is_empty() {
            Some(field)
        } else {
            Self::lookup(&field.schema, rest)
        }
    }

    /// Build the auxiliary `field_id -> path` index, one pass over the tree.
    ///
    /// Fields without ids are skipped; after id assignment the index covers
    /// every field.
    pub fn field_id_index(&self) -> HashMap<i32, String> {
        let mut index = HashMap::new();
        self.visit_paths(&mut |path, field| {
            if let Some(id) = field.field_id {
                index.insert(id, path.to_string());
            }
        });
        index
    }

    /// Walk every field depth-first with its full dotted path.
    pub fn visit_paths(&self, visitor: &mut impl FnMut(&str, &CanonicalField)) {
        fn walk(
            schema: &CanonicalSchema,
            prefix: &str,
            visitor: &mut impl FnMut(&str, &CanonicalField),
        ) {
            for field in &schema.fields {
                let segment = match schema.kind {
                    CanonicalKind::Map => format!("{MAP_KEY_VALUE_SEGMENT}.{}", field.name),
                    _ => field.name.clone(),
                };
                let path = if prefix.is_empty() {
                    segment
                } else {
                    format!("{prefix}.{segment}")
                };
                visitor(&path, field);
                if field.schema.kind.is_composite() {
                    walk(&field.schema, &path, visitor);
                }
            }
        }
        walk(self, "", visitor);
    }

    /// The largest assigned field id in the tree, if any.
    pub fn max_field_id(&self) -> Option<i32> {
        let mut max = None;
        self.visit_paths(&mut |_, field| {
            if let Some(id) = field.field_id {
                max = Some(max.map_or(id, |m: i32| m.max(id)));
            }
        });
        max
    }
}
