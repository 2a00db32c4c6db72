use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Currency {
    Eur,
    Usd,
    Gbp,
    Chf,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eur => "eur",
            Self::Usd => "usd",
            Self::Gbp => "gbp",
            Self::Chf => "chf",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "eur" => Some(Self::Eur),
            "usd" => Some(Self::Usd),
            "gbp" => Some(Self::Gbp),
            "chf" => Some(Self::Chf),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An amount of money in integer minor units (cents).
///
/// All financial arithmetic in the engine goes through this type so that
/// currency mixing fails loudly instead of silently summing cents of
/// different denominations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    pub amount_minor: i64,
    pub currency: Currency,
}

impl Money {
    pub fn new(amount_minor: i64, currency: Currency) -> Self {
        Self { amount_minor, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { amount_minor: 0, currency }
    }

    pub fn is_positive(&self) -> bool {
        self.amount_minor > 0
    }

    pub fn checked_add(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        let amount_minor = self
            .amount_minor
            .checked_add(other.amount_minor)
            .ok_or(DomainError::AmountOverflow { context: "money addition" })?;
        Ok(Money { amount_minor, currency: self.currency })
    }

    pub fn checked_sub(&self, other: Money) -> Result<Money, DomainError> {
        self.ensure_same_currency(other)?;
        let amount_minor = self
            .amount_minor
            .checked_sub(other.amount_minor)
            .ok_or(DomainError::AmountOverflow { context: "money subtraction" })?;
        Ok(Money { amount_minor, currency: self.currency })
    }

    pub fn ensure_same_currency(&self, other: Money) -> Result<(), DomainError> {
        if self.currency != other.currency {
            return Err(DomainError::CurrencyMismatch {
                expected: self.currency,
                found: other.currency,
            });
        }
        Ok(())
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount_minor, self.currency)
    }
}

/// Gross amount split into the platform's cut and the provider's share.
///
/// Invariant: `gross == platform_fee + provider_amount`, guaranteed by
/// computing the fee first and assigning the remainder to the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSplit {
    pub gross: Money,
    pub platform_fee: Money,
    pub provider_amount: Money,
}

/// Splits `gross` at `rate` (a fraction, e.g. 0.05 for 5%).
///
/// The fee is rounded with banker's rounding (midpoint to even) so repeated
/// splits carry no directional bias.
pub fn split_fee(gross: Money, rate: Decimal) -> Result<FeeSplit, DomainError> {
    if !gross.is_positive() {
        return Err(DomainError::InvariantViolation(format!(
            "escrow capture requires a positive gross amount, got {gross}"
        )));
    }
    if rate < Decimal::ZERO || rate >= Decimal::ONE {
        return Err(DomainError::InvariantViolation(format!(
            "platform fee rate must be within [0, 1), got {rate}"
        )));
    }

    let fee_exact = Decimal::from(gross.amount_minor) * rate;
    let fee_minor = fee_exact
        .round_dp_with_strategy(0, RoundingStrategy::MidpointNearestEven)
        .to_i64()
        .ok_or(DomainError::AmountOverflow { context: "platform fee rounding" })?;

    let platform_fee = Money::new(fee_minor, gross.currency);
    let provider_amount = gross.checked_sub(platform_fee)?;

    Ok(FeeSplit { gross, platform_fee, provider_amount })
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{split_fee, Currency, Money};
    use crate::errors::DomainError;

    #[test]
    fn fee_split_preserves_gross_amount() {
        let gross = Money::new(45_000, Currency::Eur);
        let split = split_fee(gross, Decimal::new(5, 2)).expect("5% split");

        assert_eq!(split.platform_fee.amount_minor, 2_250);
        assert_eq!(split.provider_amount.amount_minor, 42_750);
        assert_eq!(
            split.platform_fee.checked_add(split.provider_amount).expect("same currency"),
            gross
        );
    }

    #[test]
    fn fee_split_rounds_midpoint_to_even() {
        // 4.5% of 50 cents = 2.25 -> rounds to 2; 4.5% of 3_50 = 15.75 -> 16.
        let half = split_fee(Money::new(50, Currency::Eur), Decimal::new(45, 3)).expect("split");
        assert_eq!(half.platform_fee.amount_minor, 2);

        let odd = split_fee(Money::new(350, Currency::Eur), Decimal::new(45, 3)).expect("split");
        assert_eq!(odd.platform_fee.amount_minor, 16);
        assert_eq!(odd.provider_amount.amount_minor, 334);
    }

    #[test]
    fn fee_split_rejects_non_positive_gross() {
        let error = split_fee(Money::new(0, Currency::Eur), Decimal::new(5, 2))
            .expect_err("zero gross must fail");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn fee_split_rejects_rate_of_one_or_more() {
        let error = split_fee(Money::new(1_000, Currency::Eur), Decimal::ONE)
            .expect_err("rate of 1.0 must fail");
        assert!(matches!(error, DomainError::InvariantViolation(_)));
    }

    #[test]
    fn adding_mixed_currencies_is_rejected() {
        let eur = Money::new(100, Currency::Eur);
        let usd = Money::new(100, Currency::Usd);

        let error = eur.checked_add(usd).expect_err("currency mix must fail");
        assert_eq!(
            error,
            DomainError::CurrencyMismatch { expected: Currency::Eur, found: Currency::Usd }
        );
    }

    #[test]
    fn currency_codec_round_trips() {
        for currency in [Currency::Eur, Currency::Usd, Currency::Gbp, Currency::Chf] {
            assert_eq!(Currency::parse(currency.as_str()), Some(currency));
        }
        assert_eq!(Currency::parse("aud"), None);
    }
}
