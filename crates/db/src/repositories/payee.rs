use sqlx::Row;

use taskpay_core::domain::party::ProviderId;
use taskpay_core::domain::payee::{Payee, PayeeKind, PayoutDestination};

use super::row::decode;
use super::{PayeeRepository, RepositoryError};
use crate::DbPool;

pub struct SqlPayeeRepository {
    pool: DbPool,
}

impl SqlPayeeRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_payee(row: &sqlx::sqlite::SqliteRow) -> Result<Payee, RepositoryError> {
    let kind_str: String = row.try_get("kind").map_err(|e| decode(e.to_string()))?;
    let destination: String = row.try_get("destination").map_err(|e| decode(e.to_string()))?;
    let registration: Option<String> =
        row.try_get("registration").map_err(|e| decode(e.to_string()))?;
    let company_provider_id: Option<String> =
        row.try_get("company_provider_id").map_err(|e| decode(e.to_string()))?;

    let destination = PayoutDestination(destination);
    let kind = match kind_str.as_str() {
        "individual" => PayeeKind::Individual { destination },
        "company" => PayeeKind::Company {
            destination,
            registration: registration
                .ok_or_else(|| decode("company payee is missing a registration"))?,
        },
        "employee" => PayeeKind::Employee {
            destination,
            company_provider_id: ProviderId(
                company_provider_id
                    .ok_or_else(|| decode("employee payee is missing a company reference"))?,
            ),
        },
        other => return Err(decode(format!("unknown payee kind `{other}`"))),
    };

    Ok(Payee {
        provider_id: ProviderId(row.try_get("provider_id").map_err(|e| decode(e.to_string()))?),
        display_name: row.try_get("display_name").map_err(|e| decode(e.to_string()))?,
        kind,
    })
}

#[async_trait::async_trait]
impl PayeeRepository for SqlPayeeRepository {
    async fn find(&self, provider_id: &ProviderId) -> Result<Option<Payee>, RepositoryError> {
        let row = sqlx::query(
            "SELECT provider_id, display_name, kind, destination, registration, company_provider_id
             FROM payee WHERE provider_id = ?",
        )
        .bind(&provider_id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_payee).transpose()
    }

    async fn save(&self, payee: &Payee) -> Result<(), RepositoryError> {
        let (kind, destination, registration, company_provider_id) = match &payee.kind {
            PayeeKind::Individual { destination } => {
                ("individual", destination.0.as_str(), None, None)
            }
            PayeeKind::Company { destination, registration } => {
                ("company", destination.0.as_str(), Some(registration.as_str()), None)
            }
            PayeeKind::Employee { destination, company_provider_id } => {
                ("employee", destination.0.as_str(), None, Some(company_provider_id.0.as_str()))
            }
        };

        sqlx::query(
            "INSERT INTO payee (provider_id, display_name, kind, destination, registration, company_provider_id)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (provider_id) DO UPDATE SET
                 display_name = excluded.display_name,
                 kind = excluded.kind,
                 destination = excluded.destination,
                 registration = excluded.registration,
                 company_provider_id = excluded.company_provider_id",
        )
        .bind(&payee.provider_id.0)
        .bind(&payee.display_name)
        .bind(kind)
        .bind(destination)
        .bind(registration)
        .bind(company_provider_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
