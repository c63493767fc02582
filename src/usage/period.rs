use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::models::UsageError;

/// One billing window, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsagePeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// The UTC calendar month containing `now`. The only place rollover logic
/// lives; every other component addresses the ledger through this.
pub fn active_period(now: DateTime<Utc>) -> UsagePeriod {
    let start_date = NaiveDate::from_ymd_opt(now.year(), now.month(), 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let start = Utc.from_utc_datetime(&start_date);
    UsagePeriod {
        start,
        end: start + Months::new(1),
    }
}

/// key: period-resolver -> addressing + lazy row creation
#[derive(Clone)]
pub struct PeriodResolver {
    pool: PgPool,
}

impl PeriodResolver {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn active_period(&self, now: DateTime<Utc>) -> UsagePeriod {
        active_period(now)
    }

    /// Creates the zero-initialized counter row for `(account, period,
    /// metric)` if absent. Idempotent under concurrent first access; the
    /// primary key makes duplicate creation unrepresentable.
    pub async fn ensure_counter_row(
        &self,
        account_id: Uuid,
        period: UsagePeriod,
        metric: &str,
    ) -> Result<(), UsageError> {
        sqlx::query(
            r#"
            INSERT INTO usage_counters (account_id, period_start, metric)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id, period_start, metric) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(period.start)
        .bind(metric)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
