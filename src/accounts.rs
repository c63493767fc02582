use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::usage::UsageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    User,
    Team,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountKind::User => "user",
            AccountKind::Team => "team",
        }
    }

    fn from_column(value: &str) -> Self {
        match value {
            "team" => AccountKind::Team,
            _ => AccountKind::User,
        }
    }
}

/// A billable entity, individual or team. The plan tier is owned by the
/// external subscription provider; this core only reads it, always fresh.
#[derive(Debug, Clone, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub kind: AccountKind,
    pub plan_tier: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// key: account-store -> tier lookups + billable resolution
#[derive(Clone)]
pub struct AccountStore {
    pool: PgPool,
}

impl AccountStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn fetch(&self, id: Uuid) -> Result<Option<Account>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, kind, plan_tier, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| account_from_row(&row)))
    }

    /// Resolves which account a metered action bills against. With a `team`
    /// parameter the team's own ledger and tier apply; otherwise the
    /// caller's personal account. The two ledgers stay disjoint: exactly one
    /// account id comes out of this, and all ledger traffic for the request
    /// uses it.
    pub async fn resolve_billable(
        &self,
        caller: Uuid,
        team: Option<Uuid>,
    ) -> Result<Account, UsageError> {
        match team {
            Some(team_id) => {
                let account = self.fetch(team_id).await?.ok_or_else(|| {
                    UsageError::Validation(format!("unknown team account {team_id}"))
                })?;
                if account.kind != AccountKind::Team {
                    return Err(UsageError::Validation(format!(
                        "account {team_id} is not a team"
                    )));
                }
                Ok(account)
            }
            None => self
                .fetch(caller)
                .await?
                .ok_or_else(|| UsageError::Validation(format!("unknown account {caller}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub kind: AccountKind,
    #[serde(default)]
    pub plan_tier: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetPlanRequest {
    pub plan_tier: String,
}

/// Provisioning seam for the external subscription provider.
pub async fn create_account(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<CreateAccountRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let tier = payload.plan_tier.unwrap_or_else(|| "free".to_string());
    let row = sqlx::query(
        r#"
        INSERT INTO accounts (id, kind, plan_tier)
        VALUES ($1, $2, $3)
        RETURNING id, kind, plan_tier, created_at, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(payload.kind.as_str())
    .bind(&tier)
    .fetch_one(&pool)
    .await?;

    Ok((StatusCode::CREATED, Json(account_from_row(&row))))
}

pub async fn get_account(
    Extension(accounts): Extension<AccountStore>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<Account>> {
    let account = accounts.fetch(id).await?.ok_or(AppError::NotFound)?;
    Ok(Json(account))
}

/// Inbound tier-change event from the subscription provider. Takes effect on
/// the very next quota evaluation; nothing here is cached.
pub async fn set_plan(
    Extension(pool): Extension<PgPool>,
    Path(id): Path<Uuid>,
    Json(payload): Json<SetPlanRequest>,
) -> AppResult<Json<Account>> {
    let row = sqlx::query(
        r#"
        UPDATE accounts
        SET plan_tier = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING id, kind, plan_tier, created_at, updated_at
        "#,
    )
    .bind(id)
    .bind(&payload.plan_tier)
    .fetch_optional(&pool)
    .await?
    .ok_or(AppError::NotFound)?;

    Ok(Json(account_from_row(&row)))
}

fn account_from_row(row: &sqlx::postgres::PgRow) -> Account {
    let kind: String = row.get("kind");
    Account {
        id: row.get("id"),
        kind: AccountKind::from_column(&kind),
        plan_tier: row.get("plan_tier"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
