//! Bidirectional schema translation between the canonical model and each
//! format's native representation.
//!
//! Shared guarantees across the per-format rules:
//!
//! - Nullability is preserved bit-exactly.
//! - Field identity is preserved: sources that carry ids keep them; sources
//!   without ids get ids from a monotonic counter at canonicalization time,
//!   assigned level by level in a single left-to-right pass before recursing
//!   into children (composite children, map key/value and array element, draw
//!   from the same counter).
//! - Logical types travel via [`TypeMetadata`]: decimal precision/scale,
//!   fixed width, timestamp precision, timezone adjustment.
pub mod avro;
pub mod delta;
pub mod iceberg;

use crate::model::CanonicalSchema;

/// Monotonic field-id counter. Existing ids always win; the counter starts
/// above the largest id already present so mixed schemas cannot collide.
#[derive(Debug)]
pub struct FieldIdAssigner {
    next: i32,
}

impl FieldIdAssigner {
    pub fn new() -> Self {
        FieldIdAssigner { next: 0 }
    }

    /// An assigner that continues after every id already in `schema`.
    pub fn continuing(schema: &CanonicalSchema) -> Self {
        FieldIdAssigner {
            next: schema.max_field_id().unwrap_or(0),
        }
    }

    pub fn next_id(&mut self) -> i32 {
        self.next += 1;
        self.next
    }
}

impl Default for FieldIdAssigner {
    fn default() -> Self {
        FieldIdAssigner::new()
    }
}

/// Return a copy of `schema` with every field carrying an id.
///
/// Ids for one nesting level are assigned before recursing, mirroring the
/// ordering rule of id-based formats.
pub fn annotate_field_ids(schema: &CanonicalSchema) -> CanonicalSchema {
    let mut assigner = FieldIdAssigner::continuing(schema);
    let mut annotated = schema.clone();
    assign_level(&mut annotated, &mut assigner);
    annotated
}

fn assign_level(schema: &mut CanonicalSchema, assigner: &mut FieldIdAssigner) {
    // First pass: ids for this level, left to right.
    for field in &mut schema.fields {
        if field.field_id.is_none() {
            field.field_id = Some(assigner.next_id());
        }
    }
    // Second pass: recurse into composites.
    for field in &mut schema.fields {
        if field.schema.kind.is_composite() {
            assign_level(&mut field.schema, assigner);
        }
    }
}

/// Dotted-path join that tolerates an empty prefix.
pub(crate) fn join_path(parent: &str, child: &str) -> String {
    if parent.is_empty() {
        child.to_string()
    } else {
        format!("{parent}.{child}")
    }
}

/// Resolve a canonical record-key path to the field id in an id-annotated
/// schema, or `None` when the path does not exist.
pub(crate) fn key_field_id(schema: &CanonicalSchema, path: &str) -> Option<i32> {
    schema.field_at_path(path).and_then(|f| f.field_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CanonicalField, CanonicalKind};

    #[test]
    fn ids_are_assigned_per_level_before_recursing() {
        let schema = CanonicalSchema::record(vec![
            CanonicalField {
                name: "nested".to_string(),
                field_id: None,
                nullable: true,
                default: None,
                schema: CanonicalSchema::record(vec![CanonicalField::nullable(
                    "inner",
                    CanonicalKind::Int,
                )]),
            },
            CanonicalField::nullable("flat", CanonicalKind::Long),
        ]);

        let annotated = annotate_field_ids(&schema);

        // Top level gets 1 and 2; the nested child gets 3.
        assert_eq!(annotated.fields[0].field_id, Some(1));
        assert_eq!(annotated.fields[1].field_id, Some(2));
        assert_eq!(annotated.fields[0].schema.fields[0].field_id, Some(3));
    }

    #[test]
    fn existing_ids_are_kept_and_counter_continues_past_them() {
        let schema = CanonicalSchema::record(vec![
            CanonicalField::nullable("a", CanonicalKind::Int).with_id(10),
            CanonicalField::nullable("b", CanonicalKind::Int),
        ]);

        let annotated = annotate_field_ids(&schema);

        assert_eq!(annotated.fields[0].field_id, Some(10));
        assert_eq!(annotated.fields[1].field_id, Some(11));
    }

    #[test]
    fn map_children_draw_from_the_same_counter() {
        let schema = CanonicalSchema::record(vec![CanonicalField {
            name: "m".to_string(),
            field_id: None,
            nullable: true,
            default: None,
            schema: CanonicalSchema::map(
                CanonicalField::required("key", CanonicalKind::String),
                CanonicalField::nullable("value", CanonicalKind::Long),
            ),
        }]);

        let annotated = annotate_field_ids(&schema);
        let map = &annotated.fields[0];
        let (key, value) = map.schema.map_entries().unwrap();

        assert_eq!(map.field_id, Some(1));
        assert_eq!(key.field_id, Some(2));
        assert_eq!(value.field_id, Some(3));
    }
}
