//! Category and product handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use super::{ApiError, AppState};
use crate::{Category, NewCategory, NewProduct, Product};

pub async fn list_categories(State(s): State<AppState>) -> Result<Json<Vec<Category>>, ApiError> {
    Ok(Json(s.catalog.categories().await?))
}

pub async fn get_category(State(s): State<AppState>, Path(id): Path<i32>) -> Result<Json<Category>, ApiError> {
    Ok(Json(s.catalog.category(id).await?))
}

pub async fn create_category(State(s): State<AppState>, Json(r): Json<NewCategory>) -> Result<(StatusCode, Json<Category>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.catalog.create_category(r).await?)))
}

pub async fn update_category(State(s): State<AppState>, Path(id): Path<i32>, Json(r): Json<NewCategory>) -> Result<Json<Category>, ApiError> {
    Ok(Json(s.catalog.update_category(id, r).await?))
}

pub async fn delete_category(State(s): State<AppState>, Path(id): Path<i32>) -> Result<StatusCode, ApiError> {
    s.catalog.delete_category(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_products(State(s): State<AppState>) -> Result<Json<Vec<Product>>, ApiError> {
    Ok(Json(s.catalog.products().await?))
}

pub async fn get_product(State(s): State<AppState>, Path(id): Path<i32>) -> Result<Json<Product>, ApiError> {
    Ok(Json(s.catalog.product(id).await?))
}

pub async fn create_product(State(s): State<AppState>, Json(r): Json<NewProduct>) -> Result<(StatusCode, Json<Product>), ApiError> {
    Ok((StatusCode::CREATED, Json(s.catalog.create_product(r).await?)))
}

pub async fn update_product(State(s): State<AppState>, Path(id): Path<i32>, Json(r): Json<NewProduct>) -> Result<Json<Product>, ApiError> {
    Ok(Json(s.catalog.update_product(id, r).await?))
}

pub async fn delete_product(State(s): State<AppState>, Path(id): Path<i32>) -> Result<StatusCode, ApiError> {
    s.catalog.delete_product(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
