use sqlx::migrate::{MigrateError, Migrator};

use crate::DbPool;

pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");

pub async fn run_pending(pool: &DbPool) -> Result<(), MigrateError> {
    MIGRATOR.run(pool).await
}

#[cfg(test)]
mod tests {
    use sqlx::Row;

    use super::run_pending;
    use crate::connect_with_settings;

    const MANAGED_SCHEMA_OBJECTS: &[&str] = &[
        "quote",
        "proposal",
        "work_order",
        "escrow_record",
        "time_entry",
        "approval_request",
        "payout",
        "payment_event",
        "payee",
        "idx_proposal_quote_id",
        "idx_proposal_status",
        "idx_work_order_quote_id",
        "idx_work_order_status",
        "idx_escrow_record_order_id",
        "idx_time_entry_order_id",
        "idx_time_entry_status",
        "idx_approval_request_order_id",
        "idx_payout_order_id",
        "idx_payout_transfer_reference",
    ];

    #[tokio::test]
    async fn migrations_create_every_managed_object() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("run migrations");

        for object in MANAGED_SCHEMA_OBJECTS {
            let count = sqlx::query(
                "SELECT COUNT(*) AS count FROM sqlite_master
                 WHERE type IN ('table', 'index') AND name = ?",
            )
            .bind(object)
            .fetch_one(&pool)
            .await
            .expect("query sqlite_master")
            .get::<i64, _>("count");

            assert_eq!(count, 1, "expected schema object `{object}` to exist");
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent_across_reruns() {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        run_pending(&pool).await.expect("first run");
        run_pending(&pool).await.expect("second run is a no-op");
    }
}
