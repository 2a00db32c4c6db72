use sqlx::Row;

use taskpay_core::domain::party::{CustomerId, ProviderId};
use taskpay_core::domain::quote::{
    Proposal, ProposalId, ProposalStatus, Quote, QuoteId, QuoteStatus,
};
use taskpay_core::matching::{AcceptanceOutcome, CancellationOutcome, QuoteAggregate};

use super::order::insert_order;
use super::row::{datetime, decimal, decode, money};
use super::{QuoteRepository, RepositoryError};
use crate::DbPool;

pub struct SqlQuoteRepository {
    pool: DbPool,
}

impl SqlQuoteRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_quote(row: &sqlx::sqlite::SqliteRow) -> Result<Quote, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;

    Ok(Quote {
        id: QuoteId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        customer_id: CustomerId(row.try_get("customer_id").map_err(|e| decode(e.to_string()))?),
        description: row.try_get("description").map_err(|e| decode(e.to_string()))?,
        category: row.try_get("category").map_err(|e| decode(e.to_string()))?,
        status: QuoteStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown quote status `{status_str}`")))?,
        state_version: row.try_get::<i64, _>("state_version").map_err(|e| decode(e.to_string()))?
            as u32,
        created_at: datetime(&created_at_str)?,
    })
}

fn row_to_proposal(row: &sqlx::sqlite::SqliteRow) -> Result<Proposal, RepositoryError> {
    let status_str: String = row.try_get("status").map_err(|e| decode(e.to_string()))?;
    let created_at_str: String = row.try_get("created_at").map_err(|e| decode(e.to_string()))?;
    let currency_code: String = row.try_get("currency").map_err(|e| decode(e.to_string()))?;
    let total_minor: i64 =
        row.try_get("total_amount_minor").map_err(|e| decode(e.to_string()))?;
    let rate_minor: i64 = row.try_get("hourly_rate_minor").map_err(|e| decode(e.to_string()))?;
    let planned_hours_str: String =
        row.try_get("planned_hours").map_err(|e| decode(e.to_string()))?;

    Ok(Proposal {
        id: ProposalId(row.try_get("id").map_err(|e| decode(e.to_string()))?),
        quote_id: QuoteId(row.try_get("quote_id").map_err(|e| decode(e.to_string()))?),
        provider_id: ProviderId(row.try_get("provider_id").map_err(|e| decode(e.to_string()))?),
        total_amount: money(total_minor, &currency_code)?,
        hourly_rate: money(rate_minor, &currency_code)?,
        planned_hours: decimal(&planned_hours_str)?,
        message: row.try_get("message").map_err(|e| decode(e.to_string()))?,
        status: ProposalStatus::parse(&status_str)
            .ok_or_else(|| decode(format!("unknown proposal status `{status_str}`")))?,
        created_at: datetime(&created_at_str)?,
    })
}

async fn update_proposal_in<'e, E>(executor: E, proposal: &Proposal) -> Result<(), RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query("UPDATE proposal SET status = ? WHERE id = ?")
        .bind(proposal.status.as_str())
        .bind(&proposal.id.0)
        .execute(executor)
        .await?;
    Ok(())
}

#[async_trait::async_trait]
impl QuoteRepository for SqlQuoteRepository {
    async fn insert_quote(&self, quote: &Quote) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO quote (id, customer_id, description, category, status, state_version, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&quote.id.0)
        .bind(&quote.customer_id.0)
        .bind(&quote.description)
        .bind(&quote.category)
        .bind(quote.status.as_str())
        .bind(quote.state_version as i64)
        .bind(quote.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError> {
        proposal.total_amount.ensure_same_currency(proposal.hourly_rate).map_err(|_| {
            decode(format!("proposal {} mixes currencies across amounts", proposal.id))
        })?;
        sqlx::query(
            "INSERT INTO proposal (id, quote_id, provider_id, total_amount_minor, hourly_rate_minor,
                                   planned_hours, currency, message, status, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&proposal.id.0)
        .bind(&proposal.quote_id.0)
        .bind(&proposal.provider_id.0)
        .bind(proposal.total_amount.amount_minor)
        .bind(proposal.hourly_rate.amount_minor)
        .bind(proposal.planned_hours.to_string())
        .bind(proposal.total_amount.currency.as_str())
        .bind(&proposal.message)
        .bind(proposal.status.as_str())
        .bind(proposal.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_quote(&self, id: &QuoteId) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, customer_id, description, category, status, state_version, created_at
             FROM quote WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_quote).transpose()
    }

    async fn find_proposal(&self, id: &ProposalId) -> Result<Option<Proposal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, quote_id, provider_id, total_amount_minor, hourly_rate_minor,
                    planned_hours, currency, message, status, created_at
             FROM proposal WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_proposal).transpose()
    }

    async fn load_aggregate(
        &self,
        id: &QuoteId,
    ) -> Result<Option<QuoteAggregate>, RepositoryError> {
        let Some(quote) = self.find_quote(id).await? else {
            return Ok(None);
        };

        let rows = sqlx::query(
            "SELECT id, quote_id, provider_id, total_amount_minor, hourly_rate_minor,
                    planned_hours, currency, message, status, created_at
             FROM proposal WHERE quote_id = ? ORDER BY created_at, id",
        )
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await?;

        let proposals =
            rows.iter().map(row_to_proposal).collect::<Result<Vec<_>, RepositoryError>>()?;
        Ok(Some(QuoteAggregate { quote, proposals }))
    }

    async fn update_proposal(&self, proposal: &Proposal) -> Result<(), RepositoryError> {
        update_proposal_in(&self.pool, proposal).await
    }

    async fn persist_acceptance(
        &self,
        outcome: &AcceptanceOutcome,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // The guard on `status = 'open'` is what decides the race: of two
        // concurrent acceptances exactly one finds the quote still open.
        let updated = sqlx::query(
            "UPDATE quote SET status = ?, state_version = state_version + 1
             WHERE id = ? AND status = 'open'",
        )
        .bind(outcome.quote.status.as_str())
        .bind(&outcome.quote.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "quote {} is no longer open",
                outcome.quote.id
            )));
        }

        update_proposal_in(&mut *tx, &outcome.accepted).await?;
        for declined in &outcome.declined {
            update_proposal_in(&mut *tx, declined).await?;
        }
        insert_order(&mut *tx, &outcome.order).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn persist_cancellation(
        &self,
        outcome: &CancellationOutcome,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE quote SET status = ?, state_version = state_version + 1
             WHERE id = ? AND status = 'open'",
        )
        .bind(outcome.quote.status.as_str())
        .bind(&outcome.quote.id.0)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() != 1 {
            tx.rollback().await?;
            return Err(RepositoryError::Conflict(format!(
                "quote {} is no longer open",
                outcome.quote.id
            )));
        }

        for declined in &outcome.declined {
            update_proposal_in(&mut *tx, declined).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
