use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::models::{ActionDeltas, UsageError, UsageSnapshot};

/// Ceilings applied to one counter row at commit time. `None` leaves the
/// dimension unbounded.
#[derive(Debug, Clone, Copy)]
pub struct CommitLimits {
    pub max_count: Option<i64>,
    pub max_bytes: Option<i64>,
}

/// key: usage-ledger -> counters + reserve-and-commit
#[derive(Clone)]
pub struct UsageLedger {
    pool: PgPool,
}

impl UsageLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Reads all counters for `(account, period)`. Strictly read-only:
    /// missing rows read as zero rather than being created.
    pub async fn snapshot(
        &self,
        account_id: Uuid,
        period_start: DateTime<Utc>,
    ) -> Result<UsageSnapshot, UsageError> {
        let rows = sqlx::query(
            r#"
            SELECT metric, count, bytes
            FROM usage_counters
            WHERE account_id = $1 AND period_start = $2
            "#,
        )
        .bind(account_id)
        .bind(period_start)
        .fetch_all(&self.pool)
        .await?;

        let mut snapshot = UsageSnapshot::default();
        for row in rows {
            let metric: String = row.get("metric");
            let count: i64 = row.get("count");
            let bytes: i64 = row.get("bytes");
            match metric.as_str() {
                "upload" => {
                    snapshot.uploads = count;
                    snapshot.upload_bytes = bytes;
                }
                "extraction" => snapshot.extractions = count,
                "analysis" => snapshot.analyses = count,
                other => {
                    tracing::warn!(%account_id, metric = other, "unknown metric row in ledger");
                }
            }
        }
        Ok(snapshot)
    }

    /// Atomic reserve-and-commit: applies `deltas` to the addressed row only
    /// if every projected value stays within `limits`, as a single
    /// conditional UPDATE. Returns whether the commit applied. The row must
    /// already exist (see `PeriodResolver::ensure_counter_row`); lock scope
    /// is exactly that one row, so unrelated accounts never contend.
    pub async fn try_commit(
        &self,
        account_id: Uuid,
        period_start: DateTime<Utc>,
        deltas: ActionDeltas,
        limits: CommitLimits,
    ) -> Result<bool, UsageError> {
        let result = sqlx::query(
            r#"
            UPDATE usage_counters
            SET count = count + $4,
                bytes = bytes + $5,
                updated_at = NOW()
            WHERE account_id = $1
              AND period_start = $2
              AND metric = $3
              AND ($6::BIGINT IS NULL OR count + $4 <= $6)
              AND ($7::BIGINT IS NULL OR bytes + $5 <= $7)
            "#,
        )
        .bind(account_id)
        .bind(period_start)
        .bind(deltas.metric)
        .bind(deltas.count)
        .bind(deltas.bytes)
        .bind(limits.max_count)
        .bind(limits.max_bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
