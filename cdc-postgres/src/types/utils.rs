use tokio_postgres::types::Type;

use crate::types::TypeModifier;

/// The typmod offset applied by Postgres to varlena headers; precision and
/// scale are packed above it for numeric columns.
const VARHDRSZ: i32 = 4;

/// Converts a Postgres type OID to a [`Type`] instance.
///
/// Returns a properly constructed [`Type`] for the given OID, or returns TEXT
/// type as fallback if the OID lookup fails.
pub fn convert_type_oid_to_type(type_oid: u32) -> Type {
    Type::from_oid(type_oid).unwrap_or(Type::TEXT)
}

/// Extracts `(precision, scale)` from a numeric column's type modifier.
///
/// Returns [`None`] when the modifier is `-1`, meaning the column was declared
/// as an unconstrained `numeric`.
pub fn numeric_precision_scale(modifier: TypeModifier) -> Option<(u16, u16)> {
    if modifier < VARHDRSZ {
        return None;
    }

    let packed = modifier - VARHDRSZ;
    let precision = ((packed >> 16) & 0xffff) as u16;
    let scale = (packed & 0xffff) as u16;

    Some((precision, scale))
}

/// Extracts the declared length from a varchar/bpchar column's type modifier.
///
/// Returns [`None`] for `-1`, meaning the column carries no length limit.
pub fn varchar_length(modifier: TypeModifier) -> Option<u32> {
    if modifier < VARHDRSZ {
        return None;
    }

    Some((modifier - VARHDRSZ) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_type_oid_to_type() {
        assert_eq!(convert_type_oid_to_type(23), Type::INT4);
        assert_eq!(convert_type_oid_to_type(25), Type::TEXT);
        assert_eq!(convert_type_oid_to_type(1700), Type::NUMERIC);
        // Unknown oids fall back to TEXT.
        assert_eq!(convert_type_oid_to_type(999_999), Type::TEXT);
    }

    #[test]
    fn test_numeric_precision_scale() {
        // numeric(10,2) has typmod ((10 << 16) | 2) + 4.
        assert_eq!(numeric_precision_scale((10 << 16) + 2 + 4), Some((10, 2)));
        assert_eq!(numeric_precision_scale((38 << 16) + 9 + 4), Some((38, 9)));
        assert_eq!(numeric_precision_scale(-1), None);
    }

    #[test]
    fn test_varchar_length() {
        assert_eq!(varchar_length(255 + 4), Some(255));
        assert_eq!(varchar_length(-1), None);
    }
}
