use chrono::{TimeZone, Utc};
use futures_util::future::join_all;
use sqlx::PgPool;
use uuid::Uuid;

use docpilot::accounts::AccountStore;
use docpilot::usage::{
    active_period, ActionKind, PeriodResolver, PlanCatalog, PlanLimits, UsageError, UsageLedger,
    UsageService,
};

// key: usage-tests -> metering invariants, quota gates, concurrency bound

fn test_catalog() -> PlanCatalog {
    let free = PlanLimits {
        max_uploads_per_period: Some(5),
        max_upload_bytes_per_period: Some(10_000_000),
        max_extractions_per_period: Some(10),
        max_analyses_per_period: Some(5),
    };
    let plus = PlanLimits {
        max_uploads_per_period: Some(100),
        max_upload_bytes_per_period: Some(1_000_000_000),
        max_extractions_per_period: Some(100),
        max_analyses_per_period: Some(50),
    };
    let max = PlanLimits {
        max_uploads_per_period: Some(1000),
        max_upload_bytes_per_period: None,
        max_extractions_per_period: None,
        max_analyses_per_period: None,
    };
    PlanCatalog::new(free, plus, max)
}

async fn seed_account(pool: &PgPool, kind: &str, tier: &str) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO accounts (id, kind, plan_tier) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(kind)
        .bind(tier)
        .execute(pool)
        .await
        .unwrap();
    id
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn check_is_read_only_and_idempotent(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    let first = service
        .check_usage(account, ActionKind::Upload, Some(1_000))
        .await
        .unwrap();
    let second = service
        .check_usage(account, ActionKind::Upload, Some(1_000))
        .await
        .unwrap();

    assert!(first.allowed);
    assert_eq!(first.current_usage, second.current_usage);

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_counters WHERE account_id = $1")
        .bind(account)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0, "checks must never create or mutate ledger rows");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn increments_accumulate_confirmed_consumption(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    for _ in 0..3 {
        service
            .increment_usage(account, ActionKind::Upload, Some(1_000))
            .await
            .unwrap();
    }
    service
        .increment_usage(account, ActionKind::Extraction, None)
        .await
        .unwrap();

    let report = service.current_usage(account).await.unwrap();
    assert_eq!(report.current_usage.uploads, 3);
    assert_eq!(report.current_usage.upload_bytes, 3_000);
    assert_eq!(report.current_usage.extractions, 1);
    assert_eq!(report.current_usage.analyses, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn byte_limit_denies_fifth_upload_with_grouped_overage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    for _ in 0..4 {
        service
            .increment_usage(account, ActionKind::Upload, Some(2_000_000))
            .await
            .unwrap();
    }

    let decision = service
        .check_usage(account, ActionKind::Upload, Some(3_000_000))
        .await
        .unwrap();
    assert!(!decision.allowed);
    assert_eq!(
        decision.errors,
        vec!["upload-bytes limit exceeded by 1,000,000".to_string()]
    );
    assert!(decision.warnings.is_empty());
    assert_eq!(decision.current_usage.uploads, 4);
    assert_eq!(decision.current_usage.upload_bytes, 8_000_000);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn warning_before_denial_at_the_count_limit(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    for _ in 0..4 {
        service
            .increment_usage(account, ActionKind::Upload, Some(10))
            .await
            .unwrap();
    }

    // Fifth of five: still allowed, but flagged.
    let fifth = service
        .check_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap();
    assert!(fifth.allowed);
    assert!(
        fifth.warnings.iter().any(|w| w.starts_with("upload-count")),
        "expected an upload-count warning, got {:?}",
        fifth.warnings
    );

    service
        .increment_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap();

    // Sixth of five: denied by the check, and by the authoritative commit.
    let sixth = service
        .check_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap();
    assert!(!sixth.allowed);
    let err = service
        .increment_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, UsageError::QuotaExceeded { .. }));

    let report = service.current_usage(account).await.unwrap();
    assert_eq!(report.current_usage.uploads, 5, "denied commits must not count");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn periods_are_isolated(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let resolver = PeriodResolver::new(pool.clone());
    let ledger = UsageLedger::new(pool.clone());

    let january = active_period(Utc.with_ymd_and_hms(2026, 1, 15, 9, 0, 0).unwrap());
    let february = active_period(Utc.with_ymd_and_hms(2026, 2, 2, 9, 0, 0).unwrap());
    assert_eq!(january.end, february.start);

    let deltas = ActionKind::Upload.deltas(Some(500)).unwrap();
    let limits = docpilot::usage::CommitLimits {
        max_count: Some(2),
        max_bytes: None,
    };

    resolver
        .ensure_counter_row(account, january, deltas.metric)
        .await
        .unwrap();
    for _ in 0..2 {
        assert!(ledger
            .try_commit(account, january.start, deltas, limits)
            .await
            .unwrap());
    }
    // January is exhausted.
    assert!(!ledger
        .try_commit(account, january.start, deltas, limits)
        .await
        .unwrap());

    // February starts from zero regardless of January's overage.
    let fresh = ledger.snapshot(account, february.start).await.unwrap();
    assert_eq!(fresh.uploads, 0);
    resolver
        .ensure_counter_row(account, february, deltas.metric)
        .await
        .unwrap();
    assert!(ledger
        .try_commit(account, february.start, deltas, limits)
        .await
        .unwrap());

    // January's history is untouched by the February commit.
    let january_snapshot = ledger.snapshot(account, january.start).await.unwrap();
    assert_eq!(january_snapshot.uploads, 2);
    assert_eq!(january_snapshot.upload_bytes, 1_000);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_commits_never_jointly_exceed_the_limit(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    // Two of five upload slots already consumed; three remain.
    for _ in 0..2 {
        service
            .increment_usage(account, ActionKind::Upload, Some(10))
            .await
            .unwrap();
    }

    // The legacy two-call protocol's documented race: every concurrent
    // read-only check can report allowed, because none of them reserves.
    let checks = join_all((0..8).map(|_| {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .check_usage(account, ActionKind::Upload, Some(10))
                .await
                .unwrap()
                .allowed
        })
    }))
    .await;
    assert!(checks.into_iter().all(|allowed| allowed.unwrap()));

    // The atomic reserve-and-commit bound: of eight concurrent increments,
    // exactly the three remaining slots commit.
    let commits = join_all((0..8).map(|_| {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .increment_usage(account, ActionKind::Upload, Some(10))
                .await
        })
    }))
    .await;

    let mut succeeded = 0;
    for outcome in commits {
        match outcome.unwrap() {
            Ok(()) => succeeded += 1,
            Err(UsageError::QuotaExceeded { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(succeeded, 3);

    let report = service.current_usage(account).await.unwrap();
    assert_eq!(report.current_usage.uploads, 5);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn team_and_personal_ledgers_are_disjoint(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let member = seed_account(&pool, "user", "plus").await;
    let team = seed_account(&pool, "team", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());
    let accounts = AccountStore::new(pool.clone());

    // Acting for the team bills the team's ledger under the team's tier.
    let billable = accounts.resolve_billable(member, Some(team)).await.unwrap();
    assert_eq!(billable.id, team);
    service
        .increment_usage(billable.id, ActionKind::Upload, Some(1_000))
        .await
        .unwrap();

    let team_report = service.current_usage(team).await.unwrap();
    let member_report = service.current_usage(member).await.unwrap();
    assert_eq!(team_report.current_usage.uploads, 1);
    assert_eq!(member_report.current_usage.uploads, 0);

    // A personal action leaves the team untouched.
    service
        .increment_usage(member, ActionKind::Analysis, None)
        .await
        .unwrap();
    let team_report = service.current_usage(team).await.unwrap();
    assert_eq!(team_report.current_usage.analyses, 0);

    // A user account cannot stand in for a team.
    let err = accounts.resolve_billable(team, Some(member)).await.unwrap_err();
    assert!(matches!(err, UsageError::Validation(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn plan_downgrade_applies_on_the_next_check(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "plus").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    // Six uploads: beyond free's limit of five, fine on plus.
    for _ in 0..6 {
        service
            .increment_usage(account, ActionKind::Upload, Some(10))
            .await
            .unwrap();
    }

    sqlx::query("UPDATE accounts SET plan_tier = 'free' WHERE id = $1")
        .bind(account)
        .execute(&pool)
        .await
        .unwrap();

    let decision = service
        .check_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap();
    assert!(!decision.allowed, "downgraded tier must apply immediately");
    let err = service
        .increment_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, UsageError::QuotaExceeded { .. }));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unrecognized_tier_gets_the_most_restrictive_limits(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "legacy-gold").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    for _ in 0..5 {
        service
            .increment_usage(account, ActionKind::Upload, Some(10))
            .await
            .unwrap();
    }
    let err = service
        .increment_usage(account, ActionKind::Upload, Some(10))
        .await
        .unwrap_err();
    assert!(
        matches!(err, UsageError::QuotaExceeded { .. }),
        "a stale tier tag must not be treated as unlimited"
    );
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unknown_account_is_rejected_before_the_ledger(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let service = UsageService::new(pool.clone(), test_catalog());

    let err = service
        .check_usage(Uuid::new_v4(), ActionKind::Upload, Some(10))
        .await
        .unwrap_err();
    assert!(matches!(err, UsageError::Validation(_)));

    let err = service
        .increment_usage(Uuid::new_v4(), ActionKind::Extraction, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UsageError::Validation(_)));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn oversized_quantity_is_denied_without_touching_the_ledger(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "free").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    let decision = service
        .check_usage(account, ActionKind::Upload, Some(i64::MAX))
        .await
        .unwrap();
    assert!(!decision.allowed);

    let err = service
        .increment_usage(account, ActionKind::Upload, Some(i64::MAX))
        .await
        .unwrap_err();
    assert!(matches!(err, UsageError::QuotaExceeded { .. }));

    let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM usage_counters WHERE account_id = $1")
        .bind(account)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn unbounded_metrics_commit_without_limits(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let account = seed_account(&pool, "user", "max").await;
    let service = UsageService::new(pool.clone(), test_catalog());

    for _ in 0..50 {
        service
            .increment_usage(account, ActionKind::Extraction, None)
            .await
            .unwrap();
    }
    let decision = service
        .check_usage(account, ActionKind::Extraction, None)
        .await
        .unwrap();
    assert!(decision.allowed);
    assert!(decision.warnings.is_empty());
}
