//! Checkout handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use super::{ApiError, AppState};
use crate::{CheckoutRequest, Transaction};

pub async fn checkout(State(s): State<AppState>, Json(r): Json<CheckoutRequest>) -> Result<(StatusCode, Json<Transaction>), ApiError> {
    let transaction = s.checkout.checkout(&r.items).await?;
    Ok((StatusCode::CREATED, Json(transaction)))
}
