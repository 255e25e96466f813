//! Session lifecycle routes.

use super::AppState;
use crate::error::{ApiError, ApiResult};
use axum::Json;
use axum::extract::{Path, State};
use courier::session::FlushReport;
use serde_json::{Value, json};
use tracing::info;

/// `GET /api/startSession/{id}`
pub(super) async fn start_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.manager.create(&id).await?;
    if !outcome.accepted {
        return Ok(Json(json!({
            "success": true,
            "message": "Session already exists",
            "status": outcome.status,
        })));
    }

    state.manager.wait_bootstrapped(&id).await?;
    let status = state
        .manager
        .status(&id)
        .await
        .map_or(outcome.status, |summary| summary.status);
    Ok(Json(json!({
        "success": true,
        "message": "Session initiated successfully",
        "status": status,
    })))
}

/// `GET /api/sessionStatus/{id}`
pub(super) async fn session_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let summary = state.manager.status(&id).await?;
    Ok(Json(json!({
        "success": true,
        "status": summary.status,
        "connected": summary.connected,
    })))
}

/// `GET /api/sessionQr/{id}`
pub(super) async fn session_qr(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let qr = state
        .manager
        .qr(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("QR code not ready or already scanned"))?;
    Ok(Json(json!({ "success": true, "qr": qr })))
}

/// `GET /api/sessions`
pub(super) async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.manager.list().await;
    Json(json!({ "success": true, "sessions": sessions }))
}

/// `GET /api/terminateSession/{id}`
pub(super) async fn terminate_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let outcome = state.manager.delete(&id, true).await?;
    let message = if outcome.logged_out {
        "Logged out successfully"
    } else {
        "Session terminated"
    };
    Ok(Json(json!({
        "success": true,
        "message": message,
        "loggedOut": outcome.logged_out,
    })))
}

/// `GET /api/terminateInactiveSessions`
pub(super) async fn terminate_inactive_sessions(State(state): State<AppState>) -> Json<Value> {
    let report = state.manager.flush(true).await;
    flush_response(&report)
}

/// `GET /api/terminateAllSessions`
pub(super) async fn terminate_all_sessions(State(state): State<AppState>) -> Json<Value> {
    let report = state.manager.flush(false).await;
    flush_response(&report)
}

fn flush_response(report: &FlushReport) -> Json<Value> {
    info!(
        deleted = report.deleted.len(),
        failed = report.failed.len(),
        "flush completed"
    );
    let message = if report.failed.is_empty() {
        "Flush completed successfully"
    } else {
        "Flush completed with failures"
    };
    Json(json!({
        "success": report.failed.is_empty(),
        "message": message,
        "deleted": report.deleted,
        "failed": report.failed,
    }))
}
