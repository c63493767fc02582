use serde::{Deserialize, Serialize};

/// key: plan-catalog -> tier limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Plus,
    Max,
}

impl PlanTier {
    /// Resolves a stored tier tag. Unrecognized values (stale or corrupted
    /// account records) fall back to the most restrictive tier instead of
    /// failing open.
    pub fn from_tag(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "plus" => PlanTier::Plus,
            "max" => PlanTier::Max,
            _ => PlanTier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Plus => "plus",
            PlanTier::Max => "max",
        }
    }
}

/// Per-metric ceilings for one tier. `None` means the metric is unbounded
/// and never produces an error or warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    pub max_uploads_per_period: Option<i64>,
    pub max_upload_bytes_per_period: Option<i64>,
    pub max_extractions_per_period: Option<i64>,
    pub max_analyses_per_period: Option<i64>,
}

/// key: plan-catalog -> static mapping, loaded once at startup
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    free: PlanLimits,
    plus: PlanLimits,
    max: PlanLimits,
}

impl PlanCatalog {
    pub fn new(free: PlanLimits, plus: PlanLimits, max: PlanLimits) -> Self {
        Self { free, plus, max }
    }

    /// Compiled-in production limits.
    pub fn builtin() -> Self {
        Self {
            free: PlanLimits {
                max_uploads_per_period: Some(20),
                max_upload_bytes_per_period: Some(100 * 1024 * 1024),
                max_extractions_per_period: Some(10),
                max_analyses_per_period: Some(5),
            },
            plus: PlanLimits {
                max_uploads_per_period: Some(500),
                max_upload_bytes_per_period: Some(5 * 1024 * 1024 * 1024),
                max_extractions_per_period: Some(500),
                max_analyses_per_period: Some(200),
            },
            max: PlanLimits {
                max_uploads_per_period: Some(5000),
                max_upload_bytes_per_period: Some(50 * 1024 * 1024 * 1024),
                max_extractions_per_period: None,
                max_analyses_per_period: Some(2000),
            },
        }
    }

    pub fn limits_for(&self, tier: PlanTier) -> PlanLimits {
        match tier {
            PlanTier::Free => self.free,
            PlanTier::Plus => self.plus,
            PlanTier::Max => self.max,
        }
    }
}
