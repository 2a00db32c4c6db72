use sqlx::Row;

use taskpay_core::domain::order::{Order, OrderId};
use taskpay_core::domain::party::ProviderId;
use taskpay_core::domain::time_entry::{
    TimeCategory, TimeEntry, TimeEntryId, TimeEntryStatus,
};

use super::order::update_order_guarded;
use super::row::{date, datetime, decimal, decode, opt_money};
use super::{RepositoryError, TimeEntryRepository};
use crate::DbPool;

pub struct SqlTimeEntryRepository {
    pool: DbPool,
}

impl SqlTimeEntryRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) const TIME_ENTRY_COLUMNS: &str = "id, order_id, provider_id, work_date, hours,
    category, description, status, billable_amount_minor, currency, created_at";

pub(crate) fn row_to_time_entry(row: &sqlx::sqlite::SqliteRow) -> Result<TimeEntry, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let category_str: String = row.try_get("category").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let work_date_str: String = row.try_get("work_date").map_err(|e| decode(e.to_string()))?;
    let hours_str: String = row.try_get("hours").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let billable_minor: Option<i64> =
        row.try_get("billable_amount_minor").map_err(|e| decode(e.to_string()))?;

    Ok(TimeEntry {
        id: TimeEntryId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        order_id: OrderId(row.try_get("order_id").map_err(|e| decode(e.to_string()))?),
        provider_id: ProviderId(row.try_get("provider_id").map_err(|e| decode(e.to_string()))?),
        work_date: date(&work_date_str)?,
        hours: decimal(&hours_str)?,
        category: TimeCategory::parse(&category_str)
            .ok_or_else(|| decode(format!("unknown time category `{category_str}`")))?,
        description: row.try_get("description").map_err(|e| decode(e.to_string()))?,
        status: TimeEntryStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown time entry status `{status_str}`")))?,
        billable_amount: opt_money(billable_minor, &currency_code)?,
        created_at: datetime(&created_at_str)?,
    })
}

/// Guarded status advance for a time entry. `expected` is the status the
/// entry must still hold; anything else means a concurrent writer got there
/// first and the surrounding transaction must roll back.
pub(crate) async fn advance_entry_guarded<'e, E>(
    executor: E,
    entry: &TimeEntry,
    expected: TimeEntryStatus,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let updated = sqlx::query(
        "UPDATE time_entry SET status = ?, billable_amount_minor = ? WHERE id = ? AND status = ?",
    )
    .bind(entry.status.as_str())
    .bind(entry.billable_amount.map(|amount| amount.amount_minor))
    .bind(&entry.id.0)
    .bind(expected.as_str())
    .execute(executor)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(RepositoryError::Conflict(format!(
            "time entry {} is no longer {}",
            entry.id,
            expected.as_str()
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl TimeEntryRepository for SqlTimeEntryRepository {
    async fn insert_with_order(
        &self,
        entry: &TimeEntry,
        order: &Order,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO time_entry (id, order_id, provider_id, work_date, hours, category,
                                     description, status, billable_amount_minor, currency, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&entry.id.0)
        .bind(&entry.order_id.0)
        .bind(&entry.provider_id.0)
        .bind(entry.work_date.format("%Y-%m-%d").to_string())
        .bind(entry.hours.to_string())
        .bind(entry.category.as_str())
        .bind(&entry.description)
        .bind(entry.status.as_str())
        .bind(entry.billable_amount.map(|amount| amount.amount_minor))
        .bind(order.hourly_rate.currency.as_str())
        .bind(entry.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        update_order_guarded(&mut *tx, order).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn find(&self, id: &TimeEntryId) -> Result<Option<TimeEntry>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TIME_ENTRY_COLUMNS} FROM time_entry WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_time_entry).transpose()
    }

    async fn find_many(&self, ids: &[TimeEntryId]) -> Result<Vec<TimeEntry>, RepositoryError> {
        let mut entries = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entry) = self.find(id).await? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    async fn list_for_order(
        &self,
        order_id: &OrderId,
    ) -> Result<Vec<TimeEntry>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TIME_ENTRY_COLUMNS} FROM time_entry WHERE order_id = ? ORDER BY created_at, id"
        ))
        .bind(&order_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_time_entry).collect()
    }
}
