use std::error::Error as StdError;

use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::{
    application::{pool::PoolError, render::RenderError},
    domain::error::DomainError,
    infra::{artifacts::ArtifactStoreError, error::InfraError},
};

/// Seconds a client is asked to back off when every renderer is busy.
const RETRY_AFTER_SECONDS: u64 = 5;

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Error returned by HTTP handlers: a public JSON message plus a detailed report
/// picked up by the response logging middleware.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    retry_after: Option<u64>,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            retry_after: None,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            retry_after: None,
            report,
        }
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn public_message(&self) -> &'static str {
        self.public_message
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response =
            (self.status, Json(json!({ "error": self.public_message }))).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        self.report.attach(&mut response);
        response
    }
}

impl From<RenderError> for HttpError {
    fn from(error: RenderError) -> Self {
        const SOURCE: &str = "infra::http::render_error_to_http_error";
        match &error {
            RenderError::EmptyDocument => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "HTML content is required",
                &error,
            ),
            RenderError::InvalidOptions(_) => HttpError::from_error(
                SOURCE,
                StatusCode::BAD_REQUEST,
                "Invalid print options",
                &error,
            ),
            RenderError::PoolExhausted { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "All renderers are busy, try again later",
                &error,
            )
            .with_retry_after(RETRY_AFTER_SECONDS),
            RenderError::CreateFailed { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Renderer unavailable",
                &error,
            ),
            RenderError::ShuttingDown => HttpError::from_error(
                SOURCE,
                StatusCode::SERVICE_UNAVAILABLE,
                "Service is shutting down",
                &error,
            ),
            RenderError::LoadFailed { .. } | RenderError::RenderFailed { .. } => {
                HttpError::from_error(
                    SOURCE,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Failed to generate PDF",
                    &error,
                )
            }
        }
    }
}

impl From<ArtifactStoreError> for HttpError {
    fn from(error: ArtifactStoreError) -> Self {
        const SOURCE: &str = "infra::http::artifact_error_to_http_error";
        match &error {
            ArtifactStoreError::NotFound { .. } => {
                HttpError::from_error(SOURCE, StatusCode::NOT_FOUND, "PDF not found", &error)
            }
            ArtifactStoreError::WriteFailed { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store PDF",
                &error,
            ),
            ArtifactStoreError::ReadFailed { .. } => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read PDF",
                &error,
            ),
        }
    }
}

/// Top-level error for the binary's commands.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error(transparent)]
    Artifact(#[from] ArtifactStoreError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
