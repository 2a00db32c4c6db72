use sqlx::Row;

use taskpay_core::domain::approval::{ApprovalRequest, ApprovalRequestId, ApprovalStatus};
use taskpay_core::domain::order::OrderId;
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::time_entry::{TimeEntry, TimeEntryStatus};

use super::row::{datetime, decimal, decode, entry_ids, entry_ids_json, money, opt_datetime};
use super::time_entry::advance_entry_guarded;
use super::{ApprovalRepository, RepositoryError};
use crate::DbPool;

pub struct SqlApprovalRepository {
    pool: DbPool,
}

impl SqlApprovalRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_approval(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let total_minor: i64 =
        row.try_get("total_amount_minor").map_err(|e| decode(e.to_string()))?;
    let total_hours_str: String =
        row.try_get("total_hours").map_err(|e| decode(e.to_string()))?;
    let entry_ids_str: String =
        row.try_get("time_entry_ids").map_err(|e| decode(e.to_string()))?;
    let approved_ids_str: String =
        row.try_get("approved_entry_ids").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let resolved_at_str: Option<String> =
        row.try_get("resolved_at").map_err(|e| decode(e.to_string()))?;

    Ok(ApprovalRequest {
        id: ApprovalRequestId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        order_id: OrderId(row.try_get("order_id").map_err(|e| decode(e.to_string()))?),
        provider_id: ProviderId(row.try_get("provider_id").map_err(|e| decode(e.to_string()))?),
        customer_id: CustomerId(row.try_get("customer_id").map_err(|e| decode(e.to_string()))?),
        time_entry_ids: entry_ids(&entry_ids_str)?,
        total_hours: decimal(&total_hours_str)?,
        total_amount: money(total_minor, &currency_code)?,
        status: ApprovalStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown approval status `{status_str}`")))?,
        approved_entry_ids: entry_ids(&approved_ids_str)?,
        provider_message: row.try_get("provider_message").map_err(|e| decode(e.to_string()))?,
        customer_feedback: row.try_get("customer_feedback").map_err(|e| decode(e.to_string()))?,
        created_at: datetime(&created_at_str)?,
        resolved_at: opt_datetime(resolved_at_str)?,
    })
}

#[async_trait::async_trait]
impl ApprovalRepository for SqlApprovalRepository {
    async fn find(
        &self,
        id: &ApprovalRequestId,
    ) -> Result<Option<ApprovalRequest>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, order_id, provider_id, customer_id, time_entry_ids, total_hours,
                    total_amount_minor, currency, status, approved_entry_ids, provider_message,
                    customer_feedback, created_at, resolved_at
             FROM approval_request WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_approval).transpose()
    }

    async fn persist_submission(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO approval_request (id, order_id, provider_id, customer_id, time_entry_ids,
                                           total_hours, total_amount_minor, currency, status,
                                           approved_entry_ids, provider_message, customer_feedback,
                                           created_at, resolved_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.order_id.0)
        .bind(&request.provider_id.0)
        .bind(&request.customer_id.0)
        .bind(entry_ids_json(&request.time_entry_ids))
        .bind(request.total_hours.to_string())
        .bind(request.total_amount.amount_minor)
        .bind(request.total_amount.currency.as_str())
        .bind(request.status.as_str())
        .bind(entry_ids_json(&request.approved_entry_ids))
        .bind(request.provider_message.as_deref())
        .bind(request.customer_feedback.as_deref())
        .bind(request.created_at.to_rfc3339())
        .bind(request.resolved_at.map(|at| at.to_rfc3339()))
        .execute(&mut *tx)
        .await?;

        // Each entry must still be `logged`; a concurrent submission of any
        // shared entry rolls the whole batch back.
        for entry in entries {
            advance_entry_guarded(&mut *tx, entry, TimeEntryStatus::Logged).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn persist_resolution(
        &self,
        request: &ApprovalRequest,
        entries: &[TimeEntry],
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The pending guard serializes racing decisions: the loser sees zero
        // updated rows and fails without touching any entry.
        let updated = sqlx::query(
            "UPDATE approval_request
             SET status = ?, approved_entry_ids = ?, customer_feedback = ?, resolved_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(request.status.as_str())
        .bind(entry_ids_json(&request.approved_entry_ids))
        .bind(request.customer_feedback.as_deref())
        .bind(request.resolved_at.map(|at| at.to_rfc3339()))
        .bind(&request.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "approval request {} is no longer pending",
                request.id
            )));
        }

        for entry in entries {
            advance_entry_guarded(&mut *tx, entry, TimeEntryStatus::Submitted).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
