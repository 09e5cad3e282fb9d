//! Durable projection checkpoints.
//!
//! A cursor is the last sequence number a projection applied for one
//! `(tenant, aggregate)` stream. Persisting it lets a restarted process skip
//! events it already folded into a durable read model.

use microfin_core::{AggregateId, TenantId};

pub trait ProjectionCursorStore: Send + Sync {
    fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection_name: &str) -> Option<u64>;

    fn update_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection_name: &str, sequence_number: u64);

    /// Forget every cursor of a tenant for one projection (rebuilds).
    fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str);
}

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresCursorStore;

#[cfg(feature = "postgres")]
mod postgres {
    use sqlx::{PgPool, Row};
    use tracing::warn;

    use microfin_core::{AggregateId, TenantId};

    use super::ProjectionCursorStore;
    use crate::event_store::EventStoreError;
    use crate::event_store::postgres::{map_sqlx_error, run_blocking};

    /// Cursors kept in the `projection_offsets` table.
    #[derive(Debug, Clone)]
    pub struct PostgresCursorStore {
        pool: PgPool,
    }

    impl PostgresCursorStore {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    impl ProjectionCursorStore for PostgresCursorStore {
        fn get_cursor(&self, tenant_id: TenantId, aggregate_id: AggregateId, projection_name: &str) -> Option<u64> {
            let result = run_blocking(async {
                let row = sqlx::query(
                    r#"
                    SELECT last_sequence_number
                    FROM projection_offsets
                    WHERE tenant_id = $1 AND aggregate_id = $2 AND projection_name = $3
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(aggregate_id.as_uuid())
                .bind(projection_name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("get_cursor", e))?;

                row.map(|r| r.try_get::<i64, _>("last_sequence_number"))
                    .transpose()
                    .map_err(|e| map_sqlx_error("get_cursor", e))
            });

            match result {
                Ok(seq) => seq.map(|s| s as u64),
                Err(err) => {
                    warn!(projection = projection_name, error = %err, "cursor lookup failed");
                    None
                }
            }
        }

        fn update_cursor(
            &self,
            tenant_id: TenantId,
            aggregate_id: AggregateId,
            projection_name: &str,
            sequence_number: u64,
        ) {
            let result: Result<(), EventStoreError> = run_blocking(async {
                sqlx::query(
                    r#"
                    INSERT INTO projection_offsets (tenant_id, aggregate_id, projection_name, last_sequence_number)
                    VALUES ($1, $2, $3, $4)
                    ON CONFLICT (tenant_id, aggregate_id, projection_name)
                    DO UPDATE SET last_sequence_number = EXCLUDED.last_sequence_number, updated_at = NOW()
                    "#,
                )
                .bind(tenant_id.as_uuid())
                .bind(aggregate_id.as_uuid())
                .bind(projection_name)
                .bind(sequence_number as i64)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("update_cursor", e))?;
                Ok(())
            });

            if let Err(err) = result {
                warn!(projection = projection_name, error = %err, "cursor update failed");
            }
        }

        fn clear_cursors(&self, tenant_id: TenantId, projection_name: &str) {
            let result: Result<(), EventStoreError> = run_blocking(async {
                sqlx::query("DELETE FROM projection_offsets WHERE tenant_id = $1 AND projection_name = $2")
                    .bind(tenant_id.as_uuid())
                    .bind(projection_name)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| map_sqlx_error("clear_cursors", e))?;
                Ok(())
            });

            if let Err(err) = result {
                warn!(projection = projection_name, error = %err, "cursor reset failed");
            }
        }
    }
}
