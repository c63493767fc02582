use chrono::Utc;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::accounts::AccountStore;

use super::catalog::{PlanCatalog, PlanLimits, PlanTier};
use super::ledger::{CommitLimits, UsageLedger};
use super::models::{group_digits, ActionDeltas, ActionKind, QuotaDecision, UsageError, UsageSnapshot};
use super::period::{PeriodResolver, UsagePeriod};

/// key: usage-service -> check/increment entry points
#[derive(Clone)]
pub struct UsageService {
    resolver: PeriodResolver,
    ledger: UsageLedger,
    accounts: AccountStore,
    catalog: PlanCatalog,
}

/// Snapshot plus addressing context, for read endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct UsageReport {
    pub account_id: Uuid,
    pub plan_tier: PlanTier,
    pub period: UsagePeriod,
    pub current_usage: UsageSnapshot,
    pub limits: PlanLimits,
}

impl UsageService {
    pub fn new(pool: PgPool, catalog: PlanCatalog) -> Self {
        Self {
            resolver: PeriodResolver::new(pool.clone()),
            ledger: UsageLedger::new(pool.clone()),
            accounts: AccountStore::new(pool),
            catalog,
        }
    }

    /// Read-only quota evaluation. Projects the action over the account's
    /// active-period counters and the tier limits read fresh at call time,
    /// so a plan downgrade takes effect on the very next check. Never
    /// mutates the ledger.
    pub async fn check_usage(
        &self,
        account_id: Uuid,
        action: ActionKind,
        quantity: Option<i64>,
    ) -> Result<QuotaDecision, UsageError> {
        let deltas = action.deltas(quantity)?;
        let limits = self.fresh_limits(account_id).await?;
        let period = self.resolver.active_period(Utc::now());
        let snapshot = self.ledger.snapshot(account_id, period.start).await?;
        Ok(evaluate(deltas, snapshot, limits))
    }

    /// Durably records confirmed consumption against the period active right
    /// now (which may differ from the one `check_usage` saw if a month
    /// boundary was crossed in between). The conditional commit is the
    /// authoritative accept/reject decision: a concurrent racer that would
    /// push a metric past its limit gets `QuotaExceeded` here regardless of
    /// what an earlier check reported.
    pub async fn increment_usage(
        &self,
        account_id: Uuid,
        action: ActionKind,
        quantity: Option<i64>,
    ) -> Result<(), UsageError> {
        let deltas = action.deltas(quantity)?;
        let limits = self.fresh_limits(account_id).await?;
        let period = self.resolver.active_period(Utc::now());

        // Counters never go below zero, so a delta that exceeds a limit on
        // its own can never commit. Rejecting it here also keeps oversized
        // quantities out of the ledger's BIGINT additions.
        let baseline = evaluate(deltas, UsageSnapshot::default(), limits);
        if !baseline.allowed {
            return Err(UsageError::QuotaExceeded {
                violations: baseline.errors,
            });
        }

        self.resolver
            .ensure_counter_row(account_id, period, deltas.metric)
            .await?;

        let applied = self
            .ledger
            .try_commit(account_id, period.start, deltas, commit_limits(action, limits))
            .await?;
        if applied {
            return Ok(());
        }

        let snapshot = self.ledger.snapshot(account_id, period.start).await?;
        let decision = evaluate(deltas, snapshot, limits);
        let violations = if decision.errors.is_empty() {
            // Counters only grow, so a rejected commit normally re-evaluates
            // to concrete violations; this covers the fallback.
            vec![format!("{} commit rejected by quota", deltas.metric)]
        } else {
            decision.errors
        };
        Err(UsageError::QuotaExceeded { violations })
    }

    /// Current counters and limits for one account.
    pub async fn current_usage(&self, account_id: Uuid) -> Result<UsageReport, UsageError> {
        let account = self.account(account_id).await?;
        let tier = PlanTier::from_tag(&account.plan_tier);
        let period = self.resolver.active_period(Utc::now());
        let current_usage = self.ledger.snapshot(account_id, period.start).await?;
        Ok(UsageReport {
            account_id,
            plan_tier: tier,
            period,
            current_usage,
            limits: self.catalog.limits_for(tier),
        })
    }

    async fn fresh_limits(&self, account_id: Uuid) -> Result<PlanLimits, UsageError> {
        let account = self.account(account_id).await?;
        Ok(self
            .catalog
            .limits_for(PlanTier::from_tag(&account.plan_tier)))
    }

    async fn account(&self, account_id: Uuid) -> Result<crate::accounts::Account, UsageError> {
        self.accounts
            .fetch(account_id)
            .await?
            .ok_or_else(|| UsageError::Validation(format!("unknown account {account_id}")))
    }
}

fn commit_limits(action: ActionKind, limits: PlanLimits) -> CommitLimits {
    match action {
        ActionKind::Upload => CommitLimits {
            max_count: limits.max_uploads_per_period,
            max_bytes: limits.max_upload_bytes_per_period,
        },
        ActionKind::Extraction => CommitLimits {
            max_count: limits.max_extractions_per_period,
            max_bytes: None,
        },
        ActionKind::Analysis => CommitLimits {
            max_count: limits.max_analyses_per_period,
            max_bytes: None,
        },
    }
}

/// Pure decision assembly: one error per violated metric, one warning per
/// metric whose projection crosses the 80% or 95% threshold while still
/// allowed. Metrics without a configured limit never error or warn. A denial
/// returns only errors; warnings would be noise next to a hard stop.
pub fn evaluate(deltas: ActionDeltas, snapshot: UsageSnapshot, limits: PlanLimits) -> QuotaDecision {
    let mut dims: Vec<(&'static str, i64, i64, Option<i64>)> = Vec::new();
    match deltas.metric {
        "upload" => {
            dims.push((
                "upload-count",
                snapshot.uploads,
                deltas.count,
                limits.max_uploads_per_period,
            ));
            dims.push((
                "upload-bytes",
                snapshot.upload_bytes,
                deltas.bytes,
                limits.max_upload_bytes_per_period,
            ));
        }
        "extraction" => dims.push((
            "extraction-count",
            snapshot.extractions,
            deltas.count,
            limits.max_extractions_per_period,
        )),
        _ => dims.push((
            "analysis-count",
            snapshot.analyses,
            deltas.count,
            limits.max_analyses_per_period,
        )),
    }

    let mut errors = Vec::new();
    let mut warnings = Vec::new();
    for (name, current, delta, limit) in dims {
        let Some(limit) = limit else { continue };
        // Projections are widened to i128: a client-supplied byte quantity
        // can sit anywhere in i64, so `current + delta` must not wrap.
        let projected = current as i128 + delta as i128;
        let limit = limit as i128;
        if projected > limit {
            errors.push(format!(
                "{name} limit exceeded by {}",
                group_digits(projected - limit)
            ));
        } else if limit > 0 && crosses(projected, limit, 95) {
            warnings.push(format!("{name} at {projected} of {limit} (past 95% threshold)"));
        } else if limit > 0 && crosses(projected, limit, 80) {
            warnings.push(format!("{name} at {projected} of {limit} (past 80% threshold)"));
        }
    }
    if !errors.is_empty() {
        warnings.clear();
    }

    QuotaDecision {
        allowed: errors.is_empty(),
        errors,
        warnings,
        current_usage: snapshot,
        limits,
    }
}

fn crosses(projected: i128, limit: i128, percent: i128) -> bool {
    projected * 100 >= limit * percent
}
