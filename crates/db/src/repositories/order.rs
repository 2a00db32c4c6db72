use sqlx::Row;

use taskpay_core::domain::order::{Order, OrderId, OrderStatus};
use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::quote::{ProposalId, QuoteId};

use super::row::{datetime, decode, money, opt_datetime};
use super::{OrderRepository, RepositoryError};
use crate::DbPool;

pub struct SqlOrderRepository {
    pool: DbPool,
}

impl SqlOrderRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn row_to_order(row: &sqlx::sqlite::SqliteRow) -> Result<Order, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let gross_minor: i64 =
        row.try_get("gross_amount_minor").map_err(|e| decode(e.to_string()))?;
    let rate_minor: i64 = row.try_get("hourly_rate_minor").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let provider_completed: Option<String> =
        row.try_get("provider_completed_at").map_err(|e| decode(e.to_string()))?;
    let customer_completed: Option<String> =
        row.try_get("customer_completed_at").map_err(|e| decode(e.to_string()))?;

    Ok(Order {
        id: OrderId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        quote_id: QuoteId(row.try_get("quote_id").map_err(|e| decode(e.to_string()))?),
        proposal_id: ProposalId(row.try_get("proposal_id").map_err(|e| decode(e.to_string()))?),
        customer_id: CustomerId(row.try_get("customer_id").map_err(|e| decode(e.to_string()))?),
        provider_id: ProviderId(row.try_get("provider_id").map_err(|e| decode(e.to_string()))?),
        gross_amount: money(gross_minor, &currency_code)?,
        hourly_rate: money(rate_minor, &currency_code)?,
        status: OrderStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown order status `{status_str}`")))?,
        provider_completed_at: opt_datetime(provider_completed)?,
        customer_completed_at: opt_datetime(customer_completed)?,
        state_version: row.try_get::<i64, _>("state_version").map_err(|e| decode(e.to_string()))?
            as u32,
        created_at: datetime(&created_at_str)?,
    })
}

pub(crate) const ORDER_COLUMNS: &str = "id, quote_id, proposal_id, customer_id, provider_id,
    gross_amount_minor, hourly_rate_minor, currency, status,
    provider_completed_at, customer_completed_at, state_version, created_at";

pub(crate) async fn insert_order<'e, E>(executor: E, order: &Order) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        "INSERT INTO work_order (id, quote_id, proposal_id, customer_id, provider_id,
                                 gross_amount_minor, hourly_rate_minor, currency, status,
                                 provider_completed_at, customer_completed_at, state_version, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&order.id.0)
    .bind(&order.quote_id.0)
    .bind(&order.proposal_id.0)
    .bind(&order.customer_id.0)
    .bind(&order.provider_id.0)
    .bind(order.gross_amount.amount_minor)
    .bind(order.hourly_rate.amount_minor)
    .bind(order.gross_amount.currency.as_str())
    .bind(order.status.as_str())
    .bind(order.provider_completed_at.map(|at| at.to_rfc3339()))
    .bind(order.customer_completed_at.map(|at| at.to_rfc3339()))
    .bind(order.state_version as i64)
    .bind(order.created_at.to_rfc3339())
    .execute(executor)
    .await?;
    Ok(())
}

/// Version-guarded order write shared by the aggregate repositories.
pub(crate) async fn update_order_guarded<'e, E>(
    executor: E,
    order: &Order,
) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let updated = sqlx::query(
        "UPDATE work_order
         SET status = ?, provider_completed_at = ?, customer_completed_at = ?,
             state_version = state_version + 1
         WHERE id = ? AND state_version = ?",
    )
    .bind(order.status.as_str())
    .bind(order.provider_completed_at.map(|at| at.to_rfc3339()))
    .bind(order.customer_completed_at.map(|at| at.to_rfc3339()))
    .bind(&order.id.0)
    .bind(order.state_version as i64)
    .execute(executor)
    .await?;

    if updated.rows_affected() != 1 {
        return Err(RepositoryError::Conflict(format!(
            "order {} moved past version {}",
            order.id, order.state_version
        )));
    }
    Ok(())
}

#[async_trait::async_trait]
impl OrderRepository for SqlOrderRepository {
    async fn find(&self, id: &OrderId) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM work_order WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_order).transpose()
    }

    async fn update(&self, order: &Order) -> Result<(), RepositoryError> {
        update_order_guarded(&self.pool, order).await
    }
}
