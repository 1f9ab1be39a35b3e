//! HTTP façade over the catalog, checkout engine and report aggregator.

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::catalog::Catalog;
use crate::checkout::CheckoutEngine;
use crate::domain::events::EventSink;
use crate::report::ReportAggregator;
use crate::store::{CatalogStore, LedgerStore, SalesStore};
use crate::{CatalogError, CheckoutError, StoreError};

mod catalog;
mod checkout;
mod report;

pub const SERVICE_NAME: &str = "retail-backoffice";

#[derive(Clone)]
pub struct AppState {
    pub catalog: Catalog,
    pub checkout: CheckoutEngine,
    pub reports: ReportAggregator,
}

impl AppState {
    pub fn new<S>(store: Arc<S>, lock_timeout: Option<Duration>, events: Option<Arc<dyn EventSink>>) -> Self
    where
        S: CatalogStore + SalesStore + LedgerStore + 'static,
    {
        let mut checkout = CheckoutEngine::new(store.clone()).with_lock_timeout(lock_timeout);
        if let Some(sink) = events {
            checkout = checkout.with_event_sink(sink);
        }
        Self {
            catalog: Catalog::new(store.clone()),
            checkout,
            reports: ReportAggregator::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(version))
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": SERVICE_NAME})) }))
        .route("/api/v1/categories", get(catalog::list_categories).post(catalog::create_category))
        .route(
            "/api/v1/categories/:id",
            get(catalog::get_category).put(catalog::update_category).delete(catalog::delete_category),
        )
        .route("/api/v1/products", get(catalog::list_products).post(catalog::create_product))
        .route(
            "/api/v1/products/:id",
            get(catalog::get_product).put(catalog::update_product).delete(catalog::delete_product),
        )
        .route("/api/v1/checkout", post(checkout::checkout))
        .route("/api/v1/report", get(report::range))
        .route("/api/v1/report/today", get(report::today))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn version() -> String {
    format!("Commit version: {}", option_env!("GIT_COMMIT").unwrap_or("unknown"))
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Checkout(CheckoutError),
    Catalog(CatalogError),
    Store(StoreError),
}

impl From<CheckoutError> for ApiError {
    fn from(err: CheckoutError) -> Self { ApiError::Checkout(err) }
}

impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self { ApiError::Catalog(err) }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self { ApiError::Store(err) }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Checkout(err) => match err {
                CheckoutError::ProductNotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
                CheckoutError::Infrastructure(e) => internal(e, "Failed to checkout"),
                _ => (StatusCode::BAD_REQUEST, err.to_string()),
            },
            ApiError::Catalog(err) => match err {
                CatalogError::NotFound { .. } => (StatusCode::NOT_FOUND, err.to_string()),
                CatalogError::Invalid(_) => (StatusCode::BAD_REQUEST, err.to_string()),
                CatalogError::Store(StoreError::Constraint(_)) => (StatusCode::CONFLICT, err.to_string()),
                CatalogError::Store(e) => internal(e, "Catalog operation failed"),
            },
            ApiError::Store(e) => internal(e, "Failed to generate report"),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// Storage details stay in the log, not in the response.
fn internal(err: StoreError, message: &str) -> (StatusCode, String) {
    tracing::error!(error = %err, "{}", message);
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}
