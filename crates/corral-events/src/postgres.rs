use sqlx::PgPool;

use crate::{EventError, EventLog, Record};

/// Durable log backed by the `event_log` table.
#[derive(Debug, Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS event_log (
            seq         BIGSERIAL PRIMARY KEY,
            stream      TEXT NOT NULL,
            payload     TEXT NOT NULL,
            appended_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_event_log_stream ON event_log (stream, seq)")
        .execute(pool)
        .await?;

    Ok(())
}

fn unavailable(e: sqlx::Error) -> EventError {
    EventError::Unavailable(e.to_string())
}

impl EventLog for PostgresEventLog {
    async fn ping(&self) -> Result<(), EventError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn append(&self, stream: &str, record: &Record, max_len: u64) -> Result<(), EventError> {
        let payload =
            serde_json::to_string(record).map_err(|e| EventError::Encode(e.to_string()))?;

        let (seq,): (i64,) =
            sqlx::query_as("INSERT INTO event_log (stream, payload) VALUES ($1, $2) RETURNING seq")
                .bind(stream)
                .bind(&payload)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| EventError::Append(e.to_string()))?;

        // Sequence gaps make this approximate.
        let max_len = i64::try_from(max_len).unwrap_or(i64::MAX);
        if max_len > 0 && seq > max_len {
            let trimmed = sqlx::query("DELETE FROM event_log WHERE stream = $1 AND seq <= $2")
                .bind(stream)
                .bind(seq - max_len)
                .execute(&self.pool)
                .await;
            if let Err(e) = trimmed {
                tracing::warn!(stream, error = %e, "event log trim failed");
            }
        }

        Ok(())
    }
}
