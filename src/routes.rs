use axum::{
    routing::{get, post, put},
    Router,
};

use crate::{accounts, documents, usage};

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/accounts", post(accounts::create_account))
        .route("/api/accounts/:id", get(accounts::get_account))
        .route("/api/accounts/:id/plan", put(accounts::set_plan))
        .route("/api/accounts/:id/usage", get(usage::api::current_usage))
        .route(
            "/api/accounts/:id/usage/check",
            post(usage::api::check_usage),
        )
        .route(
            "/api/documents",
            get(documents::list_documents).post(documents::upload_document),
        )
        .route(
            "/api/documents/:id",
            get(documents::get_document).delete(documents::delete_document),
        )
        .route(
            "/api/documents/:id/extract",
            post(documents::extract_document),
        )
        .route(
            "/api/documents/:id/analyze",
            post(documents::analyze_document),
        )
}
