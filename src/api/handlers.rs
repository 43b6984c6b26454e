// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::config::MigrationService;
use crate::migration::classifier::image_extension;
use crate::migration::error::MigrationError;
use crate::migration::fetcher::allowed_mime;
use crate::migration::model::Target;
use actix_web::{http::StatusCode, web, HttpResponse, Result};
use image::ImageFormat;
use serde::Serialize;
use std::sync::OnceLock;
use std::time::Instant;

static STARTED: OnceLock<Instant> = OnceLock::new();

/// Mark the process start for `uptime_seconds`.
pub fn mark_started() {
    let _ = STARTED.get_or_init(Instant::now);
}

pub fn status_for(err: &MigrationError) -> StatusCode {
    match err {
        MigrationError::Validation(_) => StatusCode::BAD_REQUEST,
        MigrationError::AlreadyRunning { .. } | MigrationError::NotRunning { .. } => {
            StatusCode::CONFLICT
        }
        MigrationError::Persistence(_) | MigrationError::Storage(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn failure(err: MigrationError) -> HttpResponse {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::error!(code = err.code(), error = %err, "request failed");
    } else {
        tracing::debug!(code = err.code(), error = %err, "request rejected");
    }
    HttpResponse::build(status).json(ApiResponse::<()>::error(err.code(), err.to_string()))
}

fn respond<T: Serialize>(result: Result<T, MigrationError>) -> HttpResponse {
    match result {
        Ok(data) => HttpResponse::Ok().json(ApiResponse::success(data)),
        Err(e) => failure(e),
    }
}

/// Health check endpoint
pub async fn health_check(svc: web::Data<MigrationService>) -> Result<HttpResponse> {
    let db_status = if svc.db.ping().await {
        "connected"
    } else {
        "disconnected"
    };
    let uptime = STARTED.get().map(|t| t.elapsed().as_secs()).unwrap_or(0);

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: db_status.to_string(),
        uptime_seconds: uptime,
    });

    Ok(HttpResponse::Ok().json(response))
}

pub async fn start_migration(
    path: web::Path<String>,
    payload: Option<web::Json<StartRequest>>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    let requested = payload.and_then(|p| p.into_inner().batch_size);
    Ok(respond(svc.coordinator.start(&target, requested).await))
}

pub async fn advance_batch(
    path: web::Path<String>,
    payload: web::Json<BatchRequest>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    Ok(respond(
        svc.coordinator
            .advance(&target, payload.offset, payload.batch_size)
            .await,
    ))
}

pub async fn migration_status(
    path: web::Path<String>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    Ok(respond(svc.coordinator.status(&target).await))
}

pub async fn abort_migration(
    path: web::Path<String>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    Ok(respond(svc.coordinator.abort(&target).await))
}

pub async fn note_import(
    path: web::Path<String>,
    payload: web::Json<ImportNotice>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    let result = svc
        .coordinator
        .record_import(&target, payload.count)
        .await
        .map(|_| ImportNotice {
            count: payload.count,
        });
    Ok(respond(result))
}

pub async fn rewrite_submission(
    path: web::Path<String>,
    payload: web::Json<RewriteRequest>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let target = match Target::parse(&path) {
        Ok(t) => t,
        Err(e) => return Ok(failure(e)),
    };
    let rewrite = svc
        .coordinator
        .rewrite_incoming(&target, &payload.fields)
        .await;
    Ok(HttpResponse::Ok().json(ApiResponse::success(RewriteResponse {
        changed: rewrite.changed(),
        fields: rewrite.fields,
        outcomes: rewrite.outcomes,
    })))
}

pub async fn get_batch_size(svc: web::Data<MigrationService>) -> Result<HttpResponse> {
    let result = svc
        .coordinator
        .batch_size_preference()
        .await
        .map(|batch_size| BatchSizePreference { batch_size });
    Ok(respond(result))
}

pub async fn put_batch_size(
    payload: web::Json<BatchSizePreference>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let result = svc
        .coordinator
        .set_batch_size_preference(payload.batch_size)
        .await
        .map(|batch_size| BatchSizePreference { batch_size });
    Ok(respond(result))
}

/// Serve a stored image from the media root, so the default `MIGRATOR_MEDIA_BASE_URL`
/// (`http://<api host>/media`) resolves.
pub async fn serve_media(
    path: web::Path<String>,
    svc: web::Data<MigrationService>,
) -> Result<HttpResponse> {
    let relative = path.into_inner();
    let segments: Vec<&str> = relative.split('/').collect();
    if segments
        .iter()
        .any(|s| s.is_empty() || *s == "." || *s == ".." || s.contains('\\'))
    {
        return Ok(HttpResponse::NotFound().finish());
    }
    let mime = match image_extension(&relative)
        .and_then(ImageFormat::from_extension)
        .and_then(allowed_mime)
    {
        Some(mime) => mime,
        None => return Ok(HttpResponse::NotFound().finish()),
    };

    let file = segments
        .iter()
        .fold(svc.media_root.clone(), |acc, s| acc.join(s));
    match tokio::fs::read(&file).await {
        Ok(bytes) => Ok(HttpResponse::Ok().content_type(mime).body(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Ok(HttpResponse::NotFound().finish())
        }
        Err(e) => {
            tracing::error!(path = %file.display(), error = %e, "media read failed");
            Ok(HttpResponse::InternalServerError().finish())
        }
    }
}
