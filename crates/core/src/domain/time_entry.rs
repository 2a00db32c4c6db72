use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::order::OrderId;
use crate::domain::party::ProviderId;
use crate::errors::DomainError;
use crate::money::Money;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeEntryId(pub String);

impl std::fmt::Display for TimeEntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeCategory {
    Original,
    Additional,
}

impl TimeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Additional => "additional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "original" => Some(Self::Original),
            "additional" => Some(Self::Additional),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeEntryStatus {
    Logged,
    Submitted,
    CustomerApproved,
    CustomerRejected,
    Billed,
    PlatformHeld,
    PaidOut,
}

impl TimeEntryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Logged => "logged",
            Self::Submitted => "submitted",
            Self::CustomerApproved => "customer_approved",
            Self::CustomerRejected => "customer_rejected",
            Self::Billed => "billed",
            Self::PlatformHeld => "platform_held",
            Self::PaidOut => "paid_out",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "logged" => Some(Self::Logged),
            "submitted" => Some(Self::Submitted),
            "customer_approved" => Some(Self::CustomerApproved),
            "customer_rejected" => Some(Self::CustomerRejected),
            "billed" => Some(Self::Billed),
            "platform_held" => Some(Self::PlatformHeld),
            "paid_out" => Some(Self::PaidOut),
            _ => None,
        }
    }
}

/// One logged unit of work. Entries are never deleted; every status change is
/// a forward step along the billing pipeline, and `CustomerRejected` is
/// immutable history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeEntry {
    pub id: TimeEntryId,
    pub order_id: OrderId,
    pub provider_id: ProviderId,
    pub work_date: NaiveDate,
    pub hours: Decimal,
    pub category: TimeCategory,
    pub description: String,
    pub status: TimeEntryStatus,
    pub billable_amount: Option<Money>,
    pub created_at: DateTime<Utc>,
}

impl TimeEntry {
    /// Advances the entry one step. The pipeline is strictly monotonic:
    /// logged -> submitted -> {customer_approved -> billed -> platform_held
    /// -> paid_out | customer_rejected}.
    pub fn transition_to(&mut self, next: TimeEntryStatus) -> Result<(), DomainError> {
        use TimeEntryStatus::{
            Billed, CustomerApproved, CustomerRejected, Logged, PaidOut, PlatformHeld, Submitted,
        };
        let legal = matches!(
            (self.status, next),
            (Logged, Submitted)
                | (Submitted, CustomerApproved)
                | (Submitted, CustomerRejected)
                | (CustomerApproved, Billed)
                | (Billed, PlatformHeld)
                | (PlatformHeld, PaidOut)
        );
        if !legal {
            return Err(DomainError::InvalidStateTransition {
                entity: "time_entry",
                from: self.status.as_str(),
                to: next.as_str(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// Prices the entry at the order's hourly rate. Called exactly once, on
    /// the approved -> billed step.
    pub fn bill_at(&mut self, hourly_rate: Money) -> Result<Money, DomainError> {
        if self.status != TimeEntryStatus::CustomerApproved {
            return Err(DomainError::InvalidStateTransition {
                entity: "time_entry",
                from: self.status.as_str(),
                to: TimeEntryStatus::Billed.as_str(),
            });
        }
        let amount = billable_amount(self.hours, hourly_rate)?;
        self.billable_amount = Some(amount);
        self.transition_to(TimeEntryStatus::Billed)?;
        Ok(amount)
    }
}

/// `hours x rate`, rounded to whole minor units (half up, so a half-cent of
/// work never rounds to zero).
pub fn billable_amount(hours: Decimal, hourly_rate: Money) -> Result<Money, DomainError> {
    use rust_decimal::prelude::ToPrimitive;
    use rust_decimal::RoundingStrategy;

    let exact = hours * Decimal::from(hourly_rate.amount_minor);
    let minor = exact
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(DomainError::AmountOverflow { context: "billable amount" })?;
    Ok(Money::new(minor, hourly_rate.currency))
}
