pub mod api;
pub mod catalog;
pub mod ledger;
pub mod models;
pub mod period;
pub mod service;

pub use catalog::{PlanCatalog, PlanLimits, PlanTier};
pub use ledger::{CommitLimits, UsageLedger};
pub use models::{ActionDeltas, ActionKind, QuotaDecision, UsageError, UsageSnapshot};
pub use period::{active_period, PeriodResolver, UsagePeriod};
pub use service::{evaluate, UsageReport, UsageService};
