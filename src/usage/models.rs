use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::catalog::PlanLimits;

/// key: usage-models -> actions,snapshots,decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Upload,
    Extraction,
    Analysis,
}

impl ActionKind {
    /// Ledger row key for this action. Upload keeps its count and byte
    /// dimensions in the same row so both are committed atomically.
    pub fn metric(&self) -> &'static str {
        match self {
            ActionKind::Upload => "upload",
            ActionKind::Extraction => "extraction",
            ActionKind::Analysis => "analysis",
        }
    }

    /// Validates the request and resolves the deltas it applies to its
    /// ledger row. `quantity` is the byte count, required for uploads and
    /// ignored for everything else.
    pub fn deltas(&self, quantity: Option<i64>) -> Result<ActionDeltas, UsageError> {
        match self {
            ActionKind::Upload => {
                let bytes = quantity.ok_or_else(|| {
                    UsageError::Validation("upload requires a byte quantity".to_string())
                })?;
                if bytes < 0 {
                    return Err(UsageError::Validation(format!(
                        "upload quantity must be non-negative, got {bytes}"
                    )));
                }
                Ok(ActionDeltas {
                    metric: self.metric(),
                    count: 1,
                    bytes,
                })
            }
            ActionKind::Extraction | ActionKind::Analysis => Ok(ActionDeltas {
                metric: self.metric(),
                count: 1,
                bytes: 0,
            }),
        }
    }
}

/// Resolved effect of one action on its `(account, period, metric)` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionDeltas {
    pub metric: &'static str,
    pub count: i64,
    pub bytes: i64,
}

/// Pre-action counter snapshot for one account and period. Rows that do not
/// exist yet read as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    pub uploads: i64,
    pub upload_bytes: i64,
    pub extractions: i64,
    pub analyses: i64,
}

/// key: quota-decision -> evaluator verdict
#[derive(Debug, Clone, Serialize)]
pub struct QuotaDecision {
    pub allowed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub current_usage: UsageSnapshot,
    pub limits: PlanLimits,
}

#[derive(Debug, Error)]
pub enum UsageError {
    #[error("invalid usage request: {0}")]
    Validation(String),
    #[error("quota exceeded: {}", .violations.join("; "))]
    QuotaExceeded { violations: Vec<String> },
    #[error("usage ledger storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Thousands-separated rendering for overage figures in user-facing
/// violation messages.
pub(crate) fn group_digits(value: i128) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if value < 0 {
        grouped.push('-');
    }
    let lead = digits.len() % 3;
    for (i, ch) in digits.chars().enumerate() {
        if i != 0 && (i + 3 - lead) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
