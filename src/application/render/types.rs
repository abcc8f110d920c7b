use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::application::pool::PoolError;
use crate::domain::error::DomainError;

/// Step of a single render request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Validating,
    Acquiring,
    Loading,
    Rendering,
    Capturing,
    Releasing,
}

impl RenderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStage::Validating => "validating",
            RenderStage::Acquiring => "acquiring",
            RenderStage::Loading => "loading",
            RenderStage::Rendering => "rendering",
            RenderStage::Capturing => "capturing",
            RenderStage::Releasing => "releasing",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upper bounds for each blocking step of a render.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderDeadlines {
    pub acquire: Duration,
    pub load: Duration,
    pub render: Duration,
}

impl Default for RenderDeadlines {
    fn default() -> Self {
        Self {
            acquire: Duration::from_secs(30),
            load: Duration::from_secs(60),
            render: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    #[error("html document is empty")]
    EmptyDocument,
    #[error(transparent)]
    InvalidOptions(#[from] DomainError),
    #[error("no renderer available after {waited:?}")]
    PoolExhausted { waited: Duration },
    #[error("failed to start a renderer: {reason}")]
    CreateFailed { reason: String },
    #[error("document failed to load: {reason}")]
    LoadFailed { reason: String },
    #[error("pdf generation failed while {stage}: {reason}")]
    RenderFailed { stage: RenderStage, reason: String },
    #[error("renderer pool is shutting down")]
    ShuttingDown,
}

impl RenderError {
    /// Stage the request was in when it failed.
    pub fn stage(&self) -> RenderStage {
        match self {
            RenderError::EmptyDocument | RenderError::InvalidOptions(_) => RenderStage::Validating,
            RenderError::PoolExhausted { .. }
            | RenderError::CreateFailed { .. }
            | RenderError::ShuttingDown => RenderStage::Acquiring,
            RenderError::LoadFailed { .. } => RenderStage::Loading,
            RenderError::RenderFailed { stage, .. } => *stage,
        }
    }

    /// Metric label for the failure class.
    pub fn outcome(&self) -> &'static str {
        match self {
            RenderError::EmptyDocument => "empty_document",
            RenderError::InvalidOptions(_) => "invalid_options",
            RenderError::PoolExhausted { .. } => "exhausted",
            RenderError::CreateFailed { .. } => "create_failed",
            RenderError::LoadFailed { .. } => "load_failed",
            RenderError::RenderFailed { .. } => "render_failed",
            RenderError::ShuttingDown => "shutting_down",
        }
    }
}

impl From<PoolError> for RenderError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Exhausted { waited } => RenderError::PoolExhausted { waited },
            PoolError::CreateFailed(source) => RenderError::CreateFailed {
                reason: source.to_string(),
            },
            PoolError::ShuttingDown => RenderError::ShuttingDown,
            other @ PoolError::InvalidBounds { .. } => RenderError::CreateFailed {
                reason: other.to_string(),
            },
        }
    }
}
