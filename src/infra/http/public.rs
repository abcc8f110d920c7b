use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HOST},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;
use url::Url;

use crate::{
    application::{
        error::HttpError,
        pool::PoolStats,
        render::RenderPipeline,
    },
    domain::{artifact::ArtifactId, print::PrintOptions},
    infra::artifacts::{ArtifactStore, ArtifactStoreError},
};

use super::middleware::{log_responses, set_request_context};

const PDF_CONTENT_TYPE: &str = "application/pdf";
const FORWARDED_PROTO: &str = "x-forwarded-proto";

#[derive(Clone)]
pub struct HttpState {
    pub pipeline: RenderPipeline,
    pub artifacts: Arc<ArtifactStore>,
    /// Base for download links; the request `Host` header is used when unset.
    pub public_base_url: Option<Url>,
    pub max_request_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let body_limit = state.max_request_bytes;

    Router::new()
        .route("/", get(index))
        .route(
            "/convert",
            post(convert).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/pdfs/{file}", get(serve_pdf).head(probe_pdf))
        .route("/_health/pool", get(pool_health))
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn index() -> &'static str {
    "Backend Running!"
}

#[derive(Debug, Serialize)]
struct ConvertResponse {
    id: ArtifactId,
    url: String,
}

#[derive(Debug, Deserialize)]
struct JsonPayload {
    #[serde(default)]
    html: String,
    #[serde(default)]
    options: PrintOptions,
}

#[derive(Debug, PartialEq)]
struct ConvertPayload {
    html: String,
    options: PrintOptions,
}

async fn convert(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ConvertResponse>, HttpError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let payload = parse_convert_payload(content_type, &body)?;

    let pdf = state.pipeline.render(&payload.html, &payload.options).await?;
    let pdf_bytes = pdf.len();
    let id = state.artifacts.store(pdf).await?;
    let url = download_url(state.public_base_url.as_ref(), &headers, &id);

    info!(
        target = "infra::http::public::convert",
        artifact_id = %id,
        pdf_bytes,
        "PDF generated"
    );

    Ok(Json(ConvertResponse { id, url }))
}

/// Accepts raw HTML, a JSON `{html, options}` object or an urlencoded `html=` form.
fn parse_convert_payload(
    content_type: Option<&str>,
    body: &[u8],
) -> Result<ConvertPayload, HttpError> {
    const SOURCE: &str = "infra::http::public::parse_convert_payload";

    let essence = content_type
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase());

    let payload = match essence.as_deref() {
        Some("application/json") => {
            let parsed: JsonPayload = serde_json::from_slice(body).map_err(|err| {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "Invalid JSON payload",
                    &err,
                )
            })?;
            ConvertPayload {
                html: parsed.html,
                options: parsed.options,
            }
        }
        Some("application/x-www-form-urlencoded") => {
            let html = url::form_urlencoded::parse(body)
                .find(|(key, _)| key == "html")
                .map(|(_, value)| value.into_owned())
                .unwrap_or_default();
            ConvertPayload {
                html,
                options: PrintOptions::default(),
            }
        }
        None | Some("text/html") | Some("text/plain") => {
            let html = std::str::from_utf8(body).map_err(|err| {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::BAD_REQUEST,
                    "HTML content must be UTF-8",
                    &err,
                )
            })?;
            ConvertPayload {
                html: html.to_string(),
                options: PrintOptions::default(),
            }
        }
        Some(other) => {
            return Err(HttpError::new(
                SOURCE,
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported content type",
                format!("content type `{other}` is not accepted"),
            ));
        }
    };

    if payload.html.trim().is_empty() {
        return Err(HttpError::new(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "HTML content is required",
            "request carried no HTML",
        ));
    }

    Ok(payload)
}

/// Absolute download link when a base is known, otherwise a root-relative path.
fn download_url(base: Option<&Url>, headers: &HeaderMap, id: &ArtifactId) -> String {
    let path = format!("pdfs/{}", id.file_name());

    if let Some(base) = base {
        return format!("{}/{path}", base.as_str().trim_end_matches('/'));
    }

    let host = headers.get(HOST).and_then(|value| value.to_str().ok());
    let scheme = headers
        .get(FORWARDED_PROTO)
        .and_then(|value| value.to_str().ok())
        .filter(|value| matches!(*value, "http" | "https"))
        .unwrap_or("http");

    match host {
        Some(host) if !host.is_empty() => format!("{scheme}://{host}/{path}"),
        _ => format!("/{path}"),
    }
}

async fn serve_pdf(State(state): State<HttpState>, Path(file): Path<String>) -> Response {
    let id = match state.artifacts.resolve(&file) {
        Ok(id) => id,
        Err(err) => return HttpError::from(err).into_response(),
    };

    match state.artifacts.retrieve(&id).await {
        Ok(bytes) => build_pdf_response(&id, bytes),
        Err(err) => HttpError::from(err).into_response(),
    }
}

async fn probe_pdf(State(state): State<HttpState>, Path(file): Path<String>) -> Response {
    let id = match state.artifacts.resolve(&file) {
        Ok(id) => id,
        Err(err) => return HttpError::from(err).into_response(),
    };

    if state.artifacts.contains(&id).await {
        let mut response = StatusCode::OK.into_response();
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE));
        response
    } else {
        HttpError::from(ArtifactStoreError::NotFound { id: id.to_string() }).into_response()
    }
}

async fn pool_health(State(state): State<HttpState>) -> Json<PoolStats> {
    Json(state.pipeline.pool().stats())
}

fn build_pdf_response(id: &ArtifactId, bytes: Bytes) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(PDF_CONTENT_TYPE));
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    if let Ok(value) = HeaderValue::from_str(&format!("inline; filename=\"{}\"", id.file_name())) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );

    response
}
