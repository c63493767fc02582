use std::sync::Arc;

use axum::{
    extract::{Extension, Multipart, Path, Query},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::accounts::AccountStore;
use crate::analysis::{DocumentAnalyzer, TextExtractor};
use crate::auth::AccountContext;
use crate::error::{AppError, AppResult};
use crate::file_store::ObjectStore;
use crate::usage::{ActionKind, UsageError, UsageService};

#[derive(Debug, Serialize)]
pub struct DocumentInfo {
    pub id: Uuid,
    pub owner_account_id: Uuid,
    pub name: String,
    pub storage_url: String,
    pub size_bytes: i64,
    pub has_extracted_text: bool,
    pub has_analysis: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub document: DocumentInfo,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub document_id: Uuid,
    pub characters: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub document_id: Uuid,
    pub analysis: Value,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DocumentDetail {
    #[serde(flatten)]
    pub info: DocumentInfo,
    pub extracted_text: Option<String>,
    pub analysis: Option<Value>,
}

/// Metered actions against a team-owned space name the team explicitly;
/// otherwise the caller's personal account is billed.
#[derive(Debug, Deserialize)]
pub struct OwnerParams {
    #[serde(default)]
    pub team: Option<Uuid>,
}

struct Document {
    id: Uuid,
    owner_account_id: Uuid,
    name: String,
    storage_url: String,
    size_bytes: i64,
    extracted_text: Option<String>,
    analysis: Option<Value>,
    created_at: DateTime<Utc>,
}

impl Document {
    fn info(&self) -> DocumentInfo {
        DocumentInfo {
            id: self.id,
            owner_account_id: self.owner_account_id,
            name: self.name.clone(),
            storage_url: self.storage_url.clone(),
            size_bytes: self.size_bytes,
            has_extracted_text: self.extracted_text.is_some(),
            has_analysis: self.analysis.is_some(),
            created_at: self.created_at,
        }
    }
}

/// Document routes are owner-scoped: the caller (or the team they name via
/// `?team=`) must own the document, so metered actions can only ever bill
/// the owning ledger.
async fn authorize_owner(
    accounts: &AccountStore,
    ctx: &AccountContext,
    team: Option<Uuid>,
    document: &Document,
) -> AppResult<()> {
    let billable = accounts.resolve_billable(ctx.account_id, team).await?;
    if billable.id != document.owner_account_id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// key: upload-workflow -> check, store, commit
pub async fn upload_document(
    ctx: AccountContext,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(usage): Extension<Arc<UsageService>>,
    Extension(accounts): Extension<AccountStore>,
    Extension(store): Extension<Arc<dyn ObjectStore>>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let billable = accounts
        .resolve_billable(ctx.account_id, params.team)
        .await?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("multipart error: {e}")))?
        .ok_or_else(|| AppError::BadRequest("no file field".to_string()))?;
    let name = field
        .file_name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "document.bin".to_string());
    let data = field
        .bytes()
        .await
        .map_err(|e| AppError::BadRequest(format!("failed reading upload: {e}")))?;
    let size_bytes = data.len() as i64;

    let decision = usage
        .check_usage(billable.id, ActionKind::Upload, Some(size_bytes))
        .await?;
    if !decision.allowed {
        return Err(AppError::QuotaExceeded {
            violations: decision.errors,
        });
    }

    let stored = store
        .put(billable.id, &name, data)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    let document_id = Uuid::new_v4();
    let inserted = sqlx::query(
        r#"
        INSERT INTO documents (id, owner_account_id, name, storage_url, size_bytes)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING created_at
        "#,
    )
    .bind(document_id)
    .bind(billable.id)
    .bind(&name)
    .bind(&stored.url)
    .bind(size_bytes)
    .fetch_one(&pool)
    .await;
    let row = match inserted {
        Ok(row) => row,
        Err(error) => {
            let _ = store.delete(&stored.url).await;
            return Err(AppError::Db(error));
        }
    };

    match usage
        .increment_usage(billable.id, ActionKind::Upload, Some(size_bytes))
        .await
    {
        Ok(()) => {}
        Err(UsageError::QuotaExceeded { violations }) => {
            // The authoritative commit lost a concurrent race; undo the
            // upload so the ledger and the stored objects agree.
            let _ = sqlx::query("DELETE FROM documents WHERE id = $1")
                .bind(document_id)
                .execute(&pool)
                .await;
            let _ = store.delete(&stored.url).await;
            return Err(AppError::QuotaExceeded { violations });
        }
        Err(UsageError::Storage(error)) => {
            tracing::error!(
                target: "usage_recording",
                account_id = %billable.id,
                action = "upload",
                ?error,
                "failed to record confirmed consumption; continuing fail-open"
            );
        }
        Err(other) => return Err(other.into()),
    }

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            document: DocumentInfo {
                id: document_id,
                owner_account_id: billable.id,
                name,
                storage_url: stored.url,
                size_bytes,
                has_extracted_text: false,
                has_analysis: false,
                created_at: row.get("created_at"),
            },
            warnings: decision.warnings,
        }),
    ))
}

pub async fn extract_document(
    ctx: AccountContext,
    Path(id): Path<Uuid>,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(usage): Extension<Arc<UsageService>>,
    Extension(accounts): Extension<AccountStore>,
    Extension(extractor): Extension<Arc<dyn TextExtractor>>,
) -> AppResult<Json<ExtractResponse>> {
    let document = fetch_document(&pool, id).await?.ok_or(AppError::NotFound)?;
    authorize_owner(&accounts, &ctx, params.team, &document).await?;
    let billable = document.owner_account_id;

    let decision = usage
        .check_usage(billable, ActionKind::Extraction, None)
        .await?;
    if !decision.allowed {
        return Err(AppError::QuotaExceeded {
            violations: decision.errors,
        });
    }

    let text = extractor
        .extract(&document.storage_url)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    let characters = text.chars().count();

    sqlx::query("UPDATE documents SET extracted_text = $2 WHERE id = $1")
        .bind(id)
        .bind(&text)
        .execute(&pool)
        .await?;

    match usage
        .increment_usage(billable, ActionKind::Extraction, None)
        .await
    {
        Ok(()) => {}
        Err(UsageError::QuotaExceeded { violations }) => {
            let _ = sqlx::query("UPDATE documents SET extracted_text = NULL WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await;
            return Err(AppError::QuotaExceeded { violations });
        }
        Err(UsageError::Storage(error)) => {
            tracing::error!(
                target: "usage_recording",
                account_id = %billable,
                action = "extraction",
                ?error,
                "failed to record confirmed consumption; continuing fail-open"
            );
        }
        Err(other) => return Err(other.into()),
    }

    Ok(Json(ExtractResponse {
        document_id: id,
        characters,
        warnings: decision.warnings,
    }))
}

pub async fn analyze_document(
    ctx: AccountContext,
    Path(id): Path<Uuid>,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(usage): Extension<Arc<UsageService>>,
    Extension(accounts): Extension<AccountStore>,
    Extension(analyzer): Extension<Arc<dyn DocumentAnalyzer>>,
) -> AppResult<Json<AnalyzeResponse>> {
    let document = fetch_document(&pool, id).await?.ok_or(AppError::NotFound)?;
    authorize_owner(&accounts, &ctx, params.team, &document).await?;
    let billable = document.owner_account_id;
    let text = document.extracted_text.ok_or_else(|| {
        AppError::BadRequest("document has no extracted text to analyze".to_string())
    })?;

    let decision = usage
        .check_usage(billable, ActionKind::Analysis, None)
        .await?;
    if !decision.allowed {
        return Err(AppError::QuotaExceeded {
            violations: decision.errors,
        });
    }

    let analysis = analyzer
        .analyze(&text)
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;

    sqlx::query("UPDATE documents SET analysis = $2 WHERE id = $1")
        .bind(id)
        .bind(&analysis)
        .execute(&pool)
        .await?;

    match usage
        .increment_usage(billable, ActionKind::Analysis, None)
        .await
    {
        Ok(()) => {}
        Err(UsageError::QuotaExceeded { violations }) => {
            let _ = sqlx::query("UPDATE documents SET analysis = NULL WHERE id = $1")
                .bind(id)
                .execute(&pool)
                .await;
            return Err(AppError::QuotaExceeded { violations });
        }
        Err(UsageError::Storage(error)) => {
            tracing::error!(
                target: "usage_recording",
                account_id = %billable,
                action = "analysis",
                ?error,
                "failed to record confirmed consumption; continuing fail-open"
            );
        }
        Err(other) => return Err(other.into()),
    }

    Ok(Json(AnalyzeResponse {
        document_id: id,
        analysis,
        warnings: decision.warnings,
    }))
}

pub async fn list_documents(
    ctx: AccountContext,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(accounts): Extension<AccountStore>,
) -> AppResult<Json<Vec<DocumentInfo>>> {
    let billable = accounts
        .resolve_billable(ctx.account_id, params.team)
        .await?;
    let rows = sqlx::query(
        r#"
        SELECT id, owner_account_id, name, storage_url, size_bytes,
               extracted_text, analysis, created_at
        FROM documents
        WHERE owner_account_id = $1
        ORDER BY created_at DESC
        "#,
    )
    .bind(billable.id)
    .fetch_all(&pool)
    .await?;

    Ok(Json(
        rows.iter().map(|row| document_from_row(row).info()).collect(),
    ))
}

pub async fn get_document(
    ctx: AccountContext,
    Path(id): Path<Uuid>,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(accounts): Extension<AccountStore>,
) -> AppResult<Json<DocumentDetail>> {
    let document = fetch_document(&pool, id).await?.ok_or(AppError::NotFound)?;
    authorize_owner(&accounts, &ctx, params.team, &document).await?;
    Ok(Json(DocumentDetail {
        info: document.info(),
        extracted_text: document.extracted_text,
        analysis: document.analysis,
    }))
}

/// Deleting a document never decrements counters; consumption already
/// happened.
pub async fn delete_document(
    ctx: AccountContext,
    Path(id): Path<Uuid>,
    Query(params): Query<OwnerParams>,
    Extension(pool): Extension<PgPool>,
    Extension(accounts): Extension<AccountStore>,
    Extension(store): Extension<Arc<dyn ObjectStore>>,
) -> AppResult<StatusCode> {
    let document = fetch_document(&pool, id).await?.ok_or(AppError::NotFound)?;
    authorize_owner(&accounts, &ctx, params.team, &document).await?;
    if let Err(error) = store.delete(&document.storage_url).await {
        tracing::warn!(document_id = %id, ?error, "failed to delete stored object");
    }
    sqlx::query("DELETE FROM documents WHERE id = $1")
        .bind(id)
        .execute(&pool)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn fetch_document(pool: &PgPool, id: Uuid) -> Result<Option<Document>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT id, owner_account_id, name, storage_url, size_bytes,
               extracted_text, analysis, created_at
        FROM documents
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(document_from_row))
}

fn document_from_row(row: &sqlx::postgres::PgRow) -> Document {
    Document {
        id: row.get("id"),
        owner_account_id: row.get("owner_account_id"),
        name: row.get("name"),
        storage_url: row.get("storage_url"),
        size_bytes: row.get("size_bytes"),
        extracted_text: row.get("extracted_text"),
        analysis: row.get("analysis"),
        created_at: row.get("created_at"),
    }
}
