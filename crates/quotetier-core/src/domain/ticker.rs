use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_TICKER_LEN: usize = 15;

/// Normalized market ticker. Equality is by value.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

impl Ticker {
    /// Parse and normalize a ticker to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let normalized = input.trim().to_ascii_uppercase();
        let mut chars = normalized.chars();

        let Some(first) = chars.next() else {
            return Err(ValidationError::EmptyTicker);
        };
        if !first.is_ascii_alphabetic() {
            return Err(ValidationError::TickerInvalidStart { ch: first });
        }

        let len = normalized.chars().count();
        if len > MAX_TICKER_LEN {
            return Err(ValidationError::TickerTooLong {
                len,
                max: MAX_TICKER_LEN,
            });
        }

        if let Some((index, ch)) = normalized
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '.' || *ch == '-'))
        {
            return Err(ValidationError::TickerInvalidChar { ch, index });
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Ticker {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for Ticker {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for Ticker {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<Ticker> for String {
    fn from(value: Ticker) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_ticker() {
        let parsed = Ticker::parse(" brk.b ").expect("ticker should parse");
        assert_eq!(parsed.as_str(), "BRK.B");
        assert_eq!(parsed, Ticker::parse("BRK.B").expect("same ticker"));
    }

    #[test]
    fn rejects_empty_and_invalid_start() {
        assert_eq!(Ticker::parse("   "), Err(ValidationError::EmptyTicker));
        let err = Ticker::parse("1AAPL").expect_err("must fail");
        assert!(matches!(err, ValidationError::TickerInvalidStart { ch: '1' }));
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = Ticker::parse("AAPL$").expect_err("must fail");
        assert!(matches!(err, ValidationError::TickerInvalidChar { ch: '$', index: 4 }));
    }
}
