use crate::bail;
use crate::error::{CdcResult, ErrorKind};

/// Converts a Postgres bytea hex string to a byte array.
///
/// This function parses Postgres's hex-encoded bytea format, which uses the
/// `\x` prefix followed by hexadecimal digits. Each pair of hex digits
/// represents one byte in the output array.
pub fn parse_bytea_hex(bytea_hex_string: &str) -> CdcResult<Vec<u8>> {
    if bytea_hex_string.len() < 2 || &bytea_hex_string[..2] != "\\x" {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The prefix '\\x' is missing"
        );
    }

    let mut result = Vec::with_capacity((bytea_hex_string.len() - 2) / 2);

    let bytea_hex_string = &bytea_hex_string[2..];

    if bytea_hex_string.len() % 2 != 0 {
        bail!(
            ErrorKind::ConversionError,
            "Could not convert from bytea hex string to byte array",
            "The number of digits is odd"
        );
    }

    for i in (0..bytea_hex_string.len()).step_by(2) {
        let val = u8::from_str_radix(&bytea_hex_string[i..i + 2], 16).map_err(|e| {
            crate::cdc_error!(
                ErrorKind::ConversionError,
                "Could not convert from bytea hex string to byte array",
                source: e
            )
        })?;
        result.push(val);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bytea_hex_empty() {
        let result = parse_bytea_hex("\\x").unwrap();
        assert_eq!(result, Vec::<u8>::new());
    }

    #[test]
    fn parse_bytea_hex_multiple_bytes() {
        let result = parse_bytea_hex("\\x48656c6c6f").unwrap();
        assert_eq!(result, b"Hello");
    }

    #[test]
    fn parse_bytea_hex_mixed_case() {
        let result = parse_bytea_hex("\\xaBcD").unwrap();
        assert_eq!(result, vec![0xab, 0xcd]);
    }

    #[test]
    fn parse_bytea_hex_missing_prefix() {
        assert!(parse_bytea_hex("48656c").is_err());
    }

    #[test]
    fn parse_bytea_hex_odd_digit_count() {
        assert!(parse_bytea_hex("\\x486").is_err());
    }
}
