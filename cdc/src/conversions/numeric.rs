use bigdecimal::{BigDecimal, ParseBigDecimalError};
use std::fmt::Display;
use std::str::FromStr;

/// A rust variant of the Postgres Numeric type. The full spectrum of
/// Postgres' Numeric value range is supported.
///
/// The stream delivers numerics in text format, so only textual parsing and
/// rendering are needed here.
#[derive(Debug, Ord, PartialOrd, Eq, PartialEq, Clone)]
pub enum PgNumeric {
    NaN,
    PositiveInf,
    NegativeInf,
    Value(BigDecimal),
}

impl FromStr for PgNumeric {
    type Err = ParseBigDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match BigDecimal::from_str(s) {
            Ok(n) => Ok(PgNumeric::Value(n)),
            Err(e) => {
                if s.to_lowercase() == "infinity" {
                    Ok(PgNumeric::PositiveInf)
                } else if s.to_lowercase() == "-infinity" {
                    Ok(PgNumeric::NegativeInf)
                } else if s.to_lowercase() == "nan" {
                    Ok(PgNumeric::NaN)
                } else {
                    Err(e)
                }
            }
        }
    }
}

impl Display for PgNumeric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PgNumeric::NaN => write!(f, "NaN"),
            PgNumeric::PositiveInf => write!(f, "Infinity"),
            PgNumeric::NegativeInf => write!(f, "-Infinity"),
            PgNumeric::Value(n) => write!(f, "{n}"),
        }
    }
}

impl Default for PgNumeric {
    fn default() -> Self {
        PgNumeric::Value(BigDecimal::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_value() {
        let parsed: PgNumeric = "12345.67".parse().unwrap();
        assert_eq!(
            parsed,
            PgNumeric::Value(BigDecimal::from_str("12345.67").unwrap())
        );
        assert_eq!(parsed.to_string(), "12345.67");
    }

    #[test]
    fn parse_special_values() {
        assert_eq!("NaN".parse::<PgNumeric>().unwrap(), PgNumeric::NaN);
        assert_eq!(
            "Infinity".parse::<PgNumeric>().unwrap(),
            PgNumeric::PositiveInf
        );
        assert_eq!(
            "-Infinity".parse::<PgNumeric>().unwrap(),
            PgNumeric::NegativeInf
        );
    }

    #[test]
    fn parse_invalid_value() {
        assert!("not-a-number".parse::<PgNumeric>().is_err());
    }
}
