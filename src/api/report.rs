//! Report handlers.

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Deserialize;

use super::{ApiError, AppState};
use crate::domain::value_objects::ReportWindow;
use crate::ReportSummary;

#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

pub async fn today(State(s): State<AppState>) -> Result<Json<ReportSummary>, ApiError> {
    Ok(Json(s.reports.report_today().await?))
}

/// `start_date` and `end_date` are both inclusive calendar days (UTC).
pub async fn range(State(s): State<AppState>, Query(p): Query<RangeParams>) -> Result<Json<ReportSummary>, ApiError> {
    let (Some(start), Some(end)) = (p.start_date, p.end_date) else {
        return Err(ApiError::BadRequest("start_date and end_date are required".into()));
    };
    let start = parse_date("start_date", &start)?;
    let end = parse_date("end_date", &end)?;
    if end < start {
        return Err(ApiError::BadRequest("end_date must be on or after start_date".into()));
    }
    let window = ReportWindow::dates(start, end).ok_or_else(|| ApiError::BadRequest("end_date out of range".into()))?;
    Ok(Json(s.reports.report_window(window).await?))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").map_err(|_| ApiError::BadRequest(format!("Invalid {field}")))
}
