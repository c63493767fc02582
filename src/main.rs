use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use docpilot::accounts::AccountStore;
use docpilot::analysis::{DocumentAnalyzer, HttpDocumentAnalyzer, HttpTextExtractor, TextExtractor};
use docpilot::config::AppConfig;
use docpilot::file_store::{LocalObjectStore, ObjectStore};
use docpilot::routes::api_routes;
use docpilot::usage::{PlanCatalog, UsageService};

async fn root() -> &'static str {
    "Docpilot API"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Every missing or invalid setting is reported in this one error.
    let config = AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_db_connections)
        .connect(&config.database_url)
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if config.allow_migration_failure {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    let usage = Arc::new(UsageService::new(pool.clone(), PlanCatalog::builtin()));
    let accounts = AccountStore::new(pool.clone());
    let store: Arc<dyn ObjectStore> = Arc::new(LocalObjectStore::new(config.storage_root.clone()));
    let extractor: Arc<dyn TextExtractor> =
        Arc::new(HttpTextExtractor::new(config.extractor_endpoint.clone()));
    let analyzer: Arc<dyn DocumentAnalyzer> =
        Arc::new(HttpDocumentAnalyzer::new(config.analyzer_endpoint.clone()));

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool.clone()))
        .layer(Extension(usage))
        .layer(Extension(accounts))
        .layer(Extension(store))
        .layer(Extension(extractor))
        .layer(Extension(analyzer));

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.bind_port).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
