//! Project routes: upload, subtitle editing and export requests.
//!
//! Form fields of the upload must precede the `video` file field; anything
//! after the file is ignored.

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use tracing::info;

use super::{owner_from_headers, parse_job_id, session_cookie};
use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{ExportRequest, SaveSubtitlesResponse, TicketResponse};
use crate::api::server::AppState;
use crate::domain::subtitle::{SubtitleDocument, to_srt, to_vtt};
use crate::pipeline::{NewProject, SubtitleUpdate};
use crate::pipeline::processors::utils::sanitize_file_stem;

/// Create the projects router.
///
/// The upload route gets its own body limit, a little above the upload cap
/// so oversized files are rejected by the size check with a clear message.
pub fn router(state: &AppState) -> Router<AppState> {
    let upload_limit = usize::try_from(state.manager.config().storage.max_upload_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);

    Router::new()
        .route(
            "/",
            post(create_project).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route(
            "/{job_id}/subtitles",
            get(get_subtitles)
                .put(save_subtitles)
                .layer(DefaultBodyLimit::max(state.body_limit)),
        )
        .route("/{job_id}/subtitles.srt", get(download_srt))
        .route("/{job_id}/subtitles.vtt", get(download_vtt))
        .route(
            "/{job_id}/subtitles/import",
            put(import_srt).layer(DefaultBodyLimit::max(state.body_limit)),
        )
        .route("/{job_id}/export", post(request_export))
}

async fn create_project(
    State(state): State<AppState>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> ApiResult<Response> {
    let existing_owner = owner_from_headers(&headers);
    let owner = existing_owner
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

    let mut title = None;
    let mut language = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("title") => title = Some(field_text(field).await?),
            Some("language") => language = Some(field_text(field).await?),
            Some("video") => {
                let original_filename = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::validation("The video field needs a file name"))?;
                let project = NewProject {
                    owner: Some(owner.clone()),
                    title,
                    original_filename,
                    language,
                };

                let (record, ticket) = state.manager.create_project(project, field).await?;
                info!(job_id = %record.job_id, ticket, "Upload stored");

                let body = Json(TicketResponse {
                    job_id: record.job_id.to_string(),
                    ticket,
                });
                let mut response = (StatusCode::CREATED, body).into_response();
                if existing_owner.is_none() {
                    response
                        .headers_mut()
                        .insert(header::SET_COOKIE, session_cookie(&owner)?);
                }
                return Ok(response);
            }
            _ => {}
        }
    }

    Err(ApiError::validation("No video file was uploaded"))
}

async fn field_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {}", e)))
}

async fn get_subtitles(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Json<SubtitleDocument>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let document = state
        .manager
        .load_subtitles(&job_id, owner.as_deref())
        .await?;
    Ok(Json(document))
}

async fn save_subtitles(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Json(update): Json<SubtitleUpdate>,
) -> ApiResult<Json<SaveSubtitlesResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let (document, ticket) = state
        .manager
        .save_subtitles(&job_id, owner.as_deref(), update)
        .await?;
    Ok(Json(SaveSubtitlesResponse {
        job_id: job_id.to_string(),
        revision: document.revision,
        blocks: document.subtitles.len(),
        ticket,
    }))
}

async fn import_srt(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<SaveSubtitlesResponse>> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let (document, ticket) = state
        .manager
        .import_srt(&job_id, owner.as_deref(), &body)
        .await?;
    Ok(Json(SaveSubtitlesResponse {
        job_id: job_id.to_string(),
        revision: document.revision,
        blocks: document.subtitles.len(),
        ticket,
    }))
}

async fn download_srt(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download_subtitles(state, &job_id, &headers, "srt").await
}

async fn download_vtt(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    download_subtitles(state, &job_id, &headers, "vtt").await
}

async fn download_subtitles(
    state: AppState,
    job_id: &str,
    headers: &HeaderMap,
    format: &str,
) -> ApiResult<Response> {
    let job_id = parse_job_id(job_id)?;
    let owner = owner_from_headers(headers);
    let document = state
        .manager
        .load_subtitles(&job_id, owner.as_deref())
        .await?;

    let blocks = document.sorted_blocks();
    let (body, content_type) = match format {
        "vtt" => (to_vtt(&blocks), "text/vtt; charset=utf-8"),
        _ => (to_srt(&blocks), "application/x-subrip; charset=utf-8"),
    };
    let disposition = format!(
        "attachment; filename=\"{}.{}\"",
        sanitize_file_stem(&document.title),
        format
    );

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

async fn request_export(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ExportRequest>,
) -> ApiResult<(StatusCode, Json<TicketResponse>)> {
    let job_id = parse_job_id(&job_id)?;
    let owner = owner_from_headers(&headers);
    let ticket = state
        .manager
        .request_export(&job_id, owner.as_deref(), request.karaoke)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TicketResponse {
            job_id: job_id.to_string(),
            ticket,
        }),
    ))
}
