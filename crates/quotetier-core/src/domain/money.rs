use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// ISO-4217 style three-letter currency code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Currency(String);

impl Currency {
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        let valid = trimmed.len() == 3 && trimmed.bytes().all(|b| b.is_ascii_alphabetic());
        if !valid {
            return Err(ValidationError::InvalidCurrency {
                value: input.to_owned(),
            });
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn usd() -> Self {
        Self(String::from("USD"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Currency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Currency {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Currency> for String {
    fn from(value: Currency) -> Self {
        value.0
    }
}

/// Non-negative fixed-point amount in a currency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    amount: Decimal,
    currency: Currency,
}

impl Money {
    pub fn new(amount: Decimal, currency: Currency) -> Result<Self, ValidationError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ValidationError::NegativeValue { field: "price" });
        }
        Ok(Self {
            amount: amount.normalize(),
            currency,
        })
    }

    /// Parse an amount as sent by providers or read back from storage.
    pub fn parse(amount: &str, currency: Currency) -> Result<Self, ValidationError> {
        let decimal = Decimal::from_str(amount.trim()).map_err(|_| ValidationError::InvalidDecimal {
            value: amount.to_owned(),
        })?;
        Self::new(decimal, currency)
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn currency(&self) -> &Currency {
        &self.currency
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.currency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalizes_currency_case() {
        assert_eq!(Currency::parse(" usd ").expect("valid").as_str(), "USD");
        assert!(Currency::parse("US").is_err());
        assert!(Currency::parse("U5D").is_err());
    }

    #[test]
    fn rejects_negative_amounts() {
        let err = Money::new(dec!(-0.01), Currency::usd()).expect_err("negative");
        assert_eq!(err, ValidationError::NegativeValue { field: "price" });
        assert!(Money::new(dec!(0), Currency::usd()).is_ok());
    }

    #[test]
    fn parsed_amounts_drop_storage_padding() {
        let money = Money::parse("185.6400000000", Currency::usd()).expect("valid");
        assert_eq!(money.amount(), dec!(185.64));
        assert_eq!(money.to_string(), "185.64 USD");
    }
}
