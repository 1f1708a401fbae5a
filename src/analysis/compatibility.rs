//! Type compatibility matrix
//!
//! Directed: an entry `OLD -> [NEW, ...]` means values of the old type always
//! convert to the new type without loss or failure.

use crate::introspection::Column;

/// Old type family -> type families it can be safely cast to
const SAFE_CONVERSIONS: &[(&str, &[&str])] = &[
    (
        "SMALLINT",
        &["INTEGER", "BIGINT", "NUMERIC", "REAL", "DOUBLE PRECISION", "TEXT"],
    ),
    (
        "INTEGER",
        &["BIGINT", "NUMERIC", "REAL", "DOUBLE PRECISION", "TEXT"],
    ),
    ("BIGINT", &["NUMERIC", "TEXT"]),
    ("NUMERIC", &["TEXT"]),
    ("REAL", &["DOUBLE PRECISION", "NUMERIC", "TEXT"]),
    ("DOUBLE PRECISION", &["NUMERIC", "TEXT"]),
    ("CHARACTER VARYING", &["TEXT"]),
    ("CHARACTER", &["CHARACTER VARYING", "TEXT"]),
    (
        "DATE",
        &["TIMESTAMP WITHOUT TIME ZONE", "TIMESTAMP WITH TIME ZONE", "TEXT"],
    ),
    (
        "TIMESTAMP WITHOUT TIME ZONE",
        &["TIMESTAMP WITH TIME ZONE", "TEXT"],
    ),
    ("BOOLEAN", &["TEXT"]),
];

/// Whether a value of `old_type` converts safely to `new_type`.
///
/// Families match by substring on the uppercased names, so
/// `character varying` contains both `CHARACTER VARYING` and `CHARACTER`.
pub fn is_type_compatible(old_type: &str, new_type: &str) -> bool {
    let old_type = old_type.to_uppercase();
    let new_type = new_type.to_uppercase();

    if old_type == new_type {
        return true;
    }

    SAFE_CONVERSIONS.iter().any(|(old_base, compatible)| {
        old_type.contains(old_base) && compatible.iter().any(|new_base| new_type.contains(new_base))
    })
}

/// Column-level check: type families plus character bounds.
///
/// A bounded character column shrinking to a smaller bound is never safe.
pub fn is_column_compatible(old: &Column, new: &Column) -> bool {
    if old.data_type.eq_ignore_ascii_case(&new.data_type) {
        return match (old.character_maximum_length, new.character_maximum_length) {
            (Some(old_len), Some(new_len)) if is_character_type(&old.data_type) => {
                new_len >= old_len
            }
            _ => true,
        };
    }

    is_type_compatible(&old.data_type, &new.data_type)
}

fn is_character_type(data_type: &str) -> bool {
    let upper = data_type.to_uppercase();
    upper.contains("CHARACTER") || upper.contains("VARCHAR")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::fixtures::column;

    #[test]
    fn test_widening_is_compatible() {
        assert!(is_type_compatible("integer", "bigint"));
        assert!(is_type_compatible("smallint", "double precision"));
        assert!(is_type_compatible("bigint", "text"));
        assert!(is_type_compatible("date", "timestamp with time zone"));
        assert!(is_type_compatible("character", "character varying"));
        assert!(is_type_compatible("boolean", "text"));
    }

    #[test]
    fn test_compatibility_is_directional() {
        assert!(is_type_compatible("bigint", "text"));
        assert!(!is_type_compatible("text", "bigint"));
        assert!(!is_type_compatible("bigint", "integer"));
        assert!(!is_type_compatible("timestamp with time zone", "date"));
        assert!(!is_type_compatible("character varying", "character"));
    }

    #[test]
    fn test_unrelated_types_are_incompatible() {
        assert!(!is_type_compatible("uuid", "integer"));
        assert!(!is_type_compatible("jsonb", "boolean"));
    }

    #[test]
    fn test_same_type_is_compatible() {
        assert!(is_type_compatible("uuid", "UUID"));
    }

    #[test]
    fn test_character_bound_shrink_is_breaking() {
        let mut old = column("name", "character varying", false);
        let mut new = column("name", "character varying", false);
        old.character_maximum_length = Some(100);
        new.character_maximum_length = Some(50);
        assert!(!is_column_compatible(&old, &new));

        new.character_maximum_length = Some(200);
        assert!(is_column_compatible(&old, &new));

        new.character_maximum_length = None;
        assert!(is_column_compatible(&old, &new));
    }

    #[test]
    fn test_column_type_change_uses_matrix() {
        let old = column("qty", "integer", false);
        let new = column("qty", "bigint", false);
        assert!(is_column_compatible(&old, &new));
        assert!(!is_column_compatible(&new, &old));
    }
}
