use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::application::engine::EngineError;
use crate::application::pool::{Lease, RendererPool};
use crate::domain::print::PrintOptions;

use super::types::{RenderDeadlines, RenderError, RenderStage};

const SOURCE: &str = "application::render::pipeline";
const METRIC_RENDER_TOTAL: &str = "pressroom_render_total";
const METRIC_RENDER_MS: &str = "pressroom_render_ms";
const METRIC_POOL_ACQUIRE_MS: &str = "pressroom_pool_acquire_ms";

#[derive(Clone)]
pub struct RenderPipeline {
    pool: RendererPool,
    deadlines: RenderDeadlines,
}

impl RenderPipeline {
    pub fn new(pool: RendererPool, deadlines: RenderDeadlines) -> Self {
        Self { pool, deadlines }
    }

    pub fn pool(&self) -> &RendererPool {
        &self.pool
    }

    pub fn deadlines(&self) -> RenderDeadlines {
        self.deadlines
    }

    /// Same pool, different deadlines.
    pub fn with_deadlines(&self, deadlines: RenderDeadlines) -> Self {
        Self {
            pool: self.pool.clone(),
            deadlines,
        }
    }

    /// Render `html` to PDF bytes.
    ///
    /// Empty documents and invalid options are rejected before a renderer is
    /// borrowed. Dropping the returned future while a renderer is leased
    /// invalidates that renderer.
    pub async fn render(&self, html: &str, options: &PrintOptions) -> Result<Bytes, RenderError> {
        let started = Instant::now();
        let result = self.run(html, options).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.outcome(),
        };
        counter!(METRIC_RENDER_TOTAL, "outcome" => outcome).increment(1);
        histogram!(METRIC_RENDER_MS, "outcome" => outcome).record(elapsed_ms as f64);

        match &result {
            Ok(pdf) => info!(
                target = SOURCE,
                op = "render",
                result = "ok",
                elapsed_ms,
                html_bytes = html.len(),
                pdf_bytes = pdf.len(),
                page_format = options.page_format.as_str(),
                "Rendered PDF"
            ),
            Err(err) => warn!(
                target = SOURCE,
                op = "render",
                result = "error",
                elapsed_ms,
                html_bytes = html.len(),
                stage = err.stage().as_str(),
                error_code = outcome,
                error = %err,
                "Render failed"
            ),
        }

        result
    }

    async fn run(&self, html: &str, options: &PrintOptions) -> Result<Bytes, RenderError> {
        if html.trim().is_empty() {
            return Err(RenderError::EmptyDocument);
        }
        options.validate()?;

        trace!(target = SOURCE, stage = %RenderStage::Acquiring, "Render stage");
        let acquire_started = Instant::now();
        let acquired = self.pool.acquire(self.deadlines.acquire).await;
        histogram!(
            METRIC_POOL_ACQUIRE_MS,
            "result" => if acquired.is_ok() { "ok" } else { "error" }
        )
        .record(acquire_started.elapsed().as_millis() as f64);
        let mut lease = acquired?;

        let handle_id = lease.renderer_id();
        debug!(
            target = SOURCE,
            op = "render::acquire",
            handle_id,
            prior_uses = lease.prior_uses(),
            waited_ms = acquire_started.elapsed().as_millis() as u64,
            "Renderer leased"
        );

        match drive(&mut lease, html, options, self.deadlines).await {
            Ok(pdf) => {
                trace!(target = SOURCE, stage = %RenderStage::Releasing, handle_id, "Render stage");
                self.pool.release(lease).await;
                Ok(pdf)
            }
            Err(err) => {
                debug!(
                    target = SOURCE,
                    op = "render::invalidate",
                    handle_id,
                    stage = err.stage().as_str(),
                    "Invalidating renderer after failure"
                );
                self.pool.invalidate(lease).await;
                Err(err)
            }
        }
    }
}

async fn drive(
    lease: &mut Lease,
    html: &str,
    options: &PrintOptions,
    deadlines: RenderDeadlines,
) -> Result<Bytes, RenderError> {
    let handle_id = lease.renderer_id();
    let engine = lease.engine().map_err(|err| RenderError::LoadFailed {
        reason: err.to_string(),
    })?;

    trace!(target = SOURCE, stage = %RenderStage::Loading, handle_id, "Render stage");
    bounded(deadlines.load, engine.load_content(html, deadlines.load))
        .await
        .map_err(|err| RenderError::LoadFailed {
            reason: err.to_string(),
        })?;

    trace!(target = SOURCE, stage = %RenderStage::Rendering, handle_id, "Render stage");
    let pdf = bounded(deadlines.render, engine.render_to_bytes(options, deadlines.render))
        .await
        .map_err(|err| RenderError::RenderFailed {
            stage: RenderStage::Rendering,
            reason: err.to_string(),
        })?;

    trace!(target = SOURCE, stage = %RenderStage::Capturing, handle_id, "Render stage");
    if pdf.is_empty() {
        return Err(RenderError::RenderFailed {
            stage: RenderStage::Capturing,
            reason: "renderer produced no output".to_string(),
        });
    }
    Ok(pdf)
}

/// Enforce `deadline` on an engine call regardless of whether the engine does.
async fn bounded<T>(
    deadline: Duration,
    call: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout(deadline)),
    }
}
