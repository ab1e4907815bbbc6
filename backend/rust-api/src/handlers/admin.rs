//! Content administration behind `X-Admin-Key`.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::extractors::{AppJson, AppQuery};
use crate::handlers::ApiError;
use crate::models::QuizId;
use crate::services::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportQuery {
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    pub id: Option<String>,
    #[serde(default)]
    pub batch: bool,
}

/// POST /api/v1/admin/quizzes/import?dryRun
///
/// Accepts a verbose quiz, a compact quiz or a batch file.
pub async fn import_quizzes(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ImportQuery>,
    AppJson(document): AppJson<Value>,
) -> Result<Response, ApiError> {
    let report = state
        .quiz_importer()
        .import_document(document, query.dry_run)
        .await?;

    let status = if report.dry_run || report.imported.is_empty() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(report)).into_response())
}

/// GET /api/v1/admin/quizzes/export?id&batch
pub async fn export_quizzes(
    State(state): State<Arc<AppState>>,
    AppQuery(query): AppQuery<ExportQuery>,
) -> Result<Response, ApiError> {
    let exporter = state.quiz_exporter();

    if let Some(id) = query.id.as_deref() {
        let quiz_id = QuizId::parse(id)?;
        let mut quizzes = exporter.export(Some(quiz_id)).await?;
        let quiz = quizzes.pop();
        return Ok(Json(quiz).into_response());
    }

    if query.batch {
        let batch = exporter.export_batch().await?;
        return Ok(Json(batch).into_response());
    }

    let quizzes = exporter.export(None).await?;
    Ok(Json(json!({ "quizzes": quizzes })).into_response())
}
