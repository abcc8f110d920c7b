//! Engine traits describing the external rendering backend.
//!
//! The pool and pipeline only ever talk to these traits; the headless Chromium
//! adapter lives in `infra::chrome` and tests plug in scripted fakes.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

use crate::domain::print::PrintOptions;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("renderer could not be started: {0}")]
    Launch(String),
    #[error("content failed to load: {0}")]
    Load(String),
    #[error("pdf capture failed: {0}")]
    Render(String),
    #[error("engine call exceeded its {0:?} deadline")]
    Timeout(Duration),
    #[error("renderer is no longer running")]
    Terminated,
}

impl EngineError {
    pub fn launch(err: impl std::fmt::Display) -> Self {
        Self::Launch(err.to_string())
    }

    pub fn load(err: impl std::fmt::Display) -> Self {
        Self::Load(err.to_string())
    }

    pub fn render(err: impl std::fmt::Display) -> Self {
        Self::Render(err.to_string())
    }
}

/// Starts new engine instances.
#[async_trait]
pub trait RendererFactory: Send + Sync {
    /// Launch a fresh engine instance.
    async fn create(&self) -> Result<Box<dyn RendererHandle>, EngineError>;
}

/// One running engine instance.
///
/// A handle is only ever driven by a single caller at a time; the pool hands out
/// exclusive ownership through its lease type.
#[async_trait]
pub trait RendererHandle: Send {
    /// Load an HTML document and wait until it has settled.
    async fn load_content(&mut self, html: &str, deadline: Duration) -> Result<(), EngineError>;

    /// Print the currently loaded document to PDF.
    async fn render_to_bytes(
        &mut self,
        options: &PrintOptions,
        deadline: Duration,
    ) -> Result<Bytes, EngineError>;

    /// Cheap liveness probe; must not perform I/O.
    fn is_alive(&self) -> bool;

    /// Stop the engine. The handle is unusable afterwards.
    async fn terminate(self: Box<Self>);
}
