use sqlx::Row;

use taskpay_core::domain::escrow::{
    EscrowRecord, EscrowRecordId, EscrowStatus, PaymentReference,
};
use taskpay_core::domain::order::{Order, OrderId};

use super::order::update_order_guarded;
use super::row::{currency, decode, money};
use super::{EscrowRepository, RepositoryError};
use crate::DbPool;

pub struct SqlEscrowRepository {
    pool: DbPool,
}

impl SqlEscrowRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const ESCROW_COLUMNS: &str = "id, order_id, gross_amount_minor, platform_fee_minor,
    provider_amount_minor, held_amount_minor, currency, status, payment_reference, state_version";

pub(crate) fn row_to_escrow(row: &sqlx::sqlite::SqliteRow) -> Result<EscrowRecord, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let gross_minor: i64 =
        row.try_get("gross_amount_minor").map_err(|e| decode(e.to_string()))?;
    let fee_minor: i64 = row.try_get("platform_fee_minor").map_err(|e| decode(e.to_string()))?;
    let provider_minor: i64 =
        row.try_get("provider_amount_minor").map_err(|e| decode(e.to_string()))?;
    let held_minor: i64 = row.try_get("held_amount_minor").map_err(|e| decode(e.to_string()))?;

    Ok(EscrowRecord {
        id: EscrowRecordId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        order_id: OrderId(row.try_get("order_id").map_err(|e| decode(e.to_string()))?),
        gross_amount: money(gross_minor, &currency_code)?,
        platform_fee_amount: money(fee_minor, &currency_code)?,
        provider_amount: money(provider_minor, &currency_code)?,
        held_amount: money(held_minor, &currency_code)?,
        currency: currency(&currency_code)?,
        status: EscrowStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown escrow status `{status_str}`")))?,
        payment_reference: PaymentReference(
            row.try_get("payment_reference").map_err(|e| decode(e.to_string()))?,
        ),
        state_version: row.try_get::<i64, _>("state_version").map_err(|e| decode(e.to_string()))?
            as u32,
    })
}

pub(crate) async fn update_escrow_guarded<'e, E>(
    executor: E,
    record: &EscrowRecord,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let updated = sqlx::query(
        "UPDATE escrow_record
         SET status = ?, held_amount_minor = ?, state_version = state_version + 1
         WHERE id = ? AND state_version = ?",
    )
    .bind(record.status.as_str())
    .bind(record.held_amount.amount_minor)
    .bind(&record.id.0)
    .bind(record.state_version as i64)
    .execute(executor)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(RepositoryError::Conflict(format!(
            "escrow record {} moved past version {}",
            record.id, record.state_version
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl EscrowRepository for SqlEscrowRepository {
    async fn insert_if_absent(&self, record: &EscrowRecord) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            "INSERT INTO escrow_record (id, order_id, gross_amount_minor, platform_fee_minor,
                                        provider_amount_minor, held_amount_minor, currency, status,
                                        payment_reference, state_version)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (payment_reference) DO NOTHING",
        )
        .bind(&record.id.0)
        .bind(&record.order_id.0)
        .bind(record.gross_amount.amount_minor)
        .bind(record.platform_fee_amount.amount_minor)
        .bind(record.provider_amount.amount_minor)
        .bind(record.held_amount.amount_minor)
        .bind(record.currency.as_str())
        .bind(record.status.as_str())
        .bind(&record.payment_reference.0)
        .bind(record.state_version as i64)
        .execute(&self.pool)
        .await?;

        Ok(inserted.rows_affected() == 1)
    }

    async fn find(
        &self,
        id: &EscrowRecordId,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ESCROW_COLUMNS} FROM escrow_record WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn find_by_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {ESCROW_COLUMNS} FROM escrow_record WHERE order_id = ?"))
                .bind(&order_id.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn find_by_reference(
        &self,
        reference: &PaymentReference,
    ) -> Result<Option<EscrowRecord>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {ESCROW_COLUMNS} FROM escrow_record WHERE payment_reference = ?"
        ))
        .bind(&reference.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_escrow).transpose()
    }

    async fn persist_confirmation(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        update_escrow_guarded(&mut *tx, record).await?;
        update_order_guarded(&mut *tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn persist_refund(
        &self,
        record: &EscrowRecord,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        update_escrow_guarded(&mut *tx, record).await?;
        update_order_guarded(&mut *tx, order).await?;
        tx.commit().await?;
        Ok(())
    }
}
