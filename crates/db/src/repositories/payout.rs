use sqlx::Row;

use taskpay_core::domain::escrow::EscrowRecord;
use taskpay_core::domain::order::{Order, OrderId};
use taskpay_core::domain::payout::{IdempotencyKey, Payout, PayoutId, PayoutStatus};
use taskpay_core::domain::time_entry::{TimeEntry, TimeEntryStatus};

use super::escrow::update_escrow_guarded;
use super::order::update_order_guarded;
use super::row::{datetime, decode, entry_ids, entry_ids_json, money};
use super::time_entry::advance_entry_guarded;
use super::{PayoutRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPayoutRepository {
    pool: DbPool,
}

impl SqlPayoutRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const PAYOUT_COLUMNS: &str = "id, order_id, escrow_record_id, time_entry_ids, net_amount_minor,
    currency, status, transfer_reference, idempotency_key, created_at";

fn row_to_payout(row: &sqlx::sqlite::SqliteRow) -> Result<Payout, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let net_minor: i64 = row.try_get("net_amount_minor").map_err(|e| decode(e.to_string()))?;
    let entry_ids_str: String =
        row.try_get("time_entry_ids").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;

    Ok(Payout {
        id: PayoutId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        order_id: OrderId(row.try_get("order_id").map_err(|e| decode(e.to_string()))?),
        escrow_record_id: taskpay_core::domain::escrow::EscrowRecordId(
            row.try_get("escrow_record_id").map_err(|e| decode(e.to_string()))?,
        ),
        time_entry_ids: entry_ids(&entry_ids_str)?,
        net_amount: money(net_minor, &currency_code)?,
        status: PayoutStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown payout status `{status_str}`")))?,
        transfer_reference: row
            .try_get("transfer_reference")
            .map_err(|e| decode(e.to_string()))?,
        idempotency_key: IdempotencyKey(
            row.try_get("idempotency_key").map_err(|e| decode(e.to_string()))?,
        ),
        created_at: datetime(&created_at_str)?,
    })
}

/// Guarded payout write. A payout may advance from `pending`, or re-enter
/// from `failed` when a retry reuses the staged attempt; a payout already
/// `transferred` never moves again.
async fn update_payout_guarded<'e, E>(
    executor: E,
    payout: &Payout,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let updated = sqlx::query(
        "UPDATE payout SET status = ?, transfer_reference = ?
         WHERE id = ? AND status IN ('pending', 'failed')",
    )
    .bind(payout.status.as_str())
    .bind(payout.transfer_reference.as_deref())
    .bind(&payout.id.0)
    .execute(executor)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(RepositoryError::Conflict(format!(
            "payout {} already transferred",
            payout.id
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl PayoutRepository for SqlPayoutRepository {
    async fn insert(&self, payout: &Payout) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO payout (id, order_id, escrow_record_id, time_entry_ids, net_amount_minor,
                                 currency, status, transfer_reference, idempotency_key, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&payout.id.0)
        .bind(&payout.order_id.0)
        .bind(&payout.escrow_record_id.0)
        .bind(entry_ids_json(&payout.time_entry_ids))
        .bind(payout.net_amount.amount_minor)
        .bind(payout.net_amount.currency.as_str())
        .bind(payout.status.as_str())
        .bind(payout.transfer_reference.as_deref())
        .bind(&payout.idempotency_key.0)
        .bind(payout.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<Payout>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {PAYOUT_COLUMNS} FROM payout WHERE idempotency_key = ?"))
                .bind(&key.0)
                .fetch_optional(&self.pool)
                .await?;

        row.as_ref().map(row_to_payout).transpose()
    }

    async fn find_by_transfer_reference(
        &self,
        reference: &str,
    ) -> Result<Option<Payout>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout WHERE transfer_reference = ?"
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payout).transpose()
    }

    async fn list_for_order(&self, order_id: &OrderId) -> Result<Vec<Payout>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {PAYOUT_COLUMNS} FROM payout WHERE order_id = ? ORDER BY created_at, id"
        ))
        .bind(&order_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_payout).collect()
    }

    async fn persist_transfer_success(
        &self,
        payout: &Payout,
        escrow: &EscrowRecord,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        update_payout_guarded(&mut *tx, payout).await?;
        update_escrow_guarded(&mut *tx, escrow).await?;
        for entry in entries {
            advance_entry_guarded(&mut *tx, entry, TimeEntryStatus::Billed).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn persist_transfer_failure(&self, payout: &Payout) -> Result<(), RepositoryError> {
        update_payout_guarded(&self.pool, payout).await
    }

    async fn persist_settlement(
        &self,
        payout: &Payout,
        entries: &[TimeEntry],
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            advance_entry_guarded(&mut *tx, entry, TimeEntryStatus::PlatformHeld).await?;
        }
        update_order_guarded(&mut *tx, order).await?;

        tx.commit().await?;
        Ok(())
    }
}
