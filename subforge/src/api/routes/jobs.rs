//! Job status and lifecycle routes.

use axum::{
    Form, Json, Router,
    extract::{Path, Query, State, rejection::FormRejection},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};

use super::{owner_from_headers, parse_job_id};
use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{JobStatusResponse, PinParams, RecentJob, TicketResponse, TouchParams};
use crate::api::server::AppState;

/// Create the jobs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/recent", get(list_recent))
        .route("/{job_id}", get(get_status))
        .route("/{job_id}/touch", post(touch))
        .route("/{job_id}/retry", post(retry))
        .route("/{job_id}/pin", post(pin))
        .route("/{job_id}/delete", post(delete))
}

async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let record = state.manager.get_status(&job_id, owner.as_deref()).await?;
    Ok(Json(JobStatusResponse::from(&record)))
}

async fn list_recent(State(state): State<AppState>, headers: HeaderMap) -> Json<Vec<RecentJob>> {
    let owner = owner_from_headers(&headers);
    let jobs = state
        .manager
        .list_recent(owner.as_deref())
        .iter()
        .map(RecentJob::from)
        .collect();
    Json(jobs)
}

/// `locked` may come from the query string or a form body.
async fn touch(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<TouchParams>,
    form: Result<Form<TouchParams>, FormRejection>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let locked = form
        .ok()
        .and_then(|Form(f)| f.locked)
        .or(query.locked)
        .map(|s| s.is_on());

    let record = state.manager.touch(&job_id, owner.as_deref(), locked).await?;
    Ok(Json(JobStatusResponse::from(&record)))
}

async fn retry(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<TicketResponse>)> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let ticket = state.manager.retry(&job_id, owner.as_deref()).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TicketResponse {
            job_id: job_id.to_string(),
            ticket,
        }),
    ))
}

async fn pin(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    query: Result<Query<PinParams>, axum::extract::rejection::QueryRejection>,
    form: Result<Form<PinParams>, FormRejection>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let pinned = match (form, query) {
        (Ok(Form(params)), _) | (_, Ok(Query(params))) => params.pinned.is_on(),
        _ => return Err(ApiError::validation("Expected pinned=on or pinned=off")),
    };

    let record = state
        .manager
        .set_pinned(&job_id, owner.as_deref(), pinned)
        .await?;
    Ok(Json(JobStatusResponse::from(&record)))
}

async fn delete(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    state.manager.delete(&job_id, owner.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}
