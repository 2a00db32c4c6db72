use chrono::Utc;
use sqlx::Row;

use taskpay_core::domain::escrow::PaymentReference;
use taskpay_core::events::{PaymentEvent, PaymentEventKind};

use super::row::{decode, money};
use super::{PaymentEventRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPaymentEventRepository {
    pool: DbPool,
}

impl SqlPaymentEventRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_event(row: &sqlx::sqlite::SqliteRow) -> Result<PaymentEvent, RepositoryError> {
    let kind_str: String = row.try_get("kind").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let amount_minor: i64 = row.try_get("amount_minor").map_err(|e| decode(e.to_string()))?;

    Ok(PaymentEvent {
        reference: PaymentReference(row.try_get("reference").map_err(|e| decode(e.to_string()))?),
        kind: PaymentEventKind::parse(&kind_str)
            .ok_or_else(|| decode(format!("unknown payment event kind `{kind_str}`")))?,
        amount: money(amount_minor, &currency_code)?,
    })
}

#[async_trait::async_trait]
impl PaymentEventRepository for SqlPaymentEventRepository {
    async fn record_if_new(&self, event: &PaymentEvent) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO payment_event (reference, kind, amount_minor, currency, received_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (reference, kind) DO NOTHING",
        )
        .bind(&event.reference.0)
        .bind(event.kind.as_str())
        .bind(event.amount.amount_minor)
        .bind(event.amount.currency.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn find(
        &self,
        reference: &PaymentReference,
        kind: PaymentEventKind,
    ) -> Result<Option<PaymentEvent>, RepositoryError> {
        let row = sqlx::query(
            "SELECT reference, kind, amount_minor, currency FROM payment_event
             WHERE reference = ? AND kind = ?",
        )
        .bind(&reference.0)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_event).transpose()
    }
}
