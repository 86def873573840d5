use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

const FIBONACCI: &[&str] = &[
    "0", "1", "2", "3", "5", "8", "13", "21", "34", "55", "89", "?", "☕",
];
const MODIFIED_FIBONACCI: &[&str] = &[
    "0", "0.5", "1", "2", "3", "5", "8", "13", "20", "40", "100", "?", "☕",
];
const TSHIRT: &[&str] = &["XS", "S", "M", "L", "XL", "XXL", "?"];
const POWERS_OF_TWO: &[&str] = &["0", "1", "2", "4", "8", "16", "32", "64", "?"];

/// The finite set of values a session accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeckType {
    #[default]
    Fibonacci,
    ModifiedFibonacci,
    Tshirt,
    PowersOfTwo,
}

impl DeckType {
    pub fn cards(self) -> &'static [&'static str] {
        match self {
            DeckType::Fibonacci => FIBONACCI,
            DeckType::ModifiedFibonacci => MODIFIED_FIBONACCI,
            DeckType::Tshirt => TSHIRT,
            DeckType::PowersOfTwo => POWERS_OF_TWO,
        }
    }

    pub fn contains(self, value: &str) -> bool {
        self.cards().contains(&value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeckType::Fibonacci => "fibonacci",
            DeckType::ModifiedFibonacci => "modified_fibonacci",
            DeckType::Tshirt => "tshirt",
            DeckType::PowersOfTwo => "powers_of_two",
        }
    }
}

impl fmt::Display for DeckType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeckType {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fibonacci" => Ok(DeckType::Fibonacci),
            "modified_fibonacci" => Ok(DeckType::ModifiedFibonacci),
            "tshirt" | "t_shirt" => Ok(DeckType::Tshirt),
            "powers_of_two" => Ok(DeckType::PowersOfTwo),
            other => Err(ProtocolError::UnknownDeck(other.to_string())),
        }
    }
}

/// Numeric reading of a card, `None` for markers such as `?` or sizes.
pub fn numeric_value(value: &str) -> Option<f64> {
    value.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_exact() {
        assert!(DeckType::Fibonacci.contains("13"));
        assert!(!DeckType::Fibonacci.contains("4"));
        assert!(DeckType::ModifiedFibonacci.contains("0.5"));
        assert!(DeckType::Tshirt.contains("XL"));
        assert!(!DeckType::Tshirt.contains("xl"));
    }

    #[test]
    fn parses_names() {
        assert_eq!("Fibonacci".parse::<DeckType>().unwrap(), DeckType::Fibonacci);
        assert_eq!("t_shirt".parse::<DeckType>().unwrap(), DeckType::Tshirt);
        assert!("dice".parse::<DeckType>().is_err());
    }

    #[test]
    fn markers_are_not_numeric() {
        assert_eq!(numeric_value("8"), Some(8.0));
        assert_eq!(numeric_value("0.5"), Some(0.5));
        assert_eq!(numeric_value("?"), None);
        assert_eq!(numeric_value("☕"), None);
        assert_eq!(numeric_value("M"), None);
    }
}
