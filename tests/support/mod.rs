#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use pressroom::application::engine::{EngineError, RendererFactory, RendererHandle};
use pressroom::application::pool::{PoolConfig, RendererPool};
use pressroom::application::render::{RenderDeadlines, RenderPipeline};
use pressroom::domain::print::PrintOptions;

/// Marker in a document that makes the fake engine fail while loading it.
pub const BROKEN_MARKUP: &str = "<!-- break-load -->";

/// Engine double that "prints" the loaded HTML behind a PDF header.
#[derive(Default)]
pub struct EchoFactory {
    pub launched: AtomicUsize,
    pub terminated: Arc<AtomicUsize>,
}

impl EchoFactory {
    pub fn launched(&self) -> usize {
        self.launched.load(Ordering::SeqCst)
    }

    pub fn terminated(&self) -> usize {
        self.terminated.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RendererFactory for EchoFactory {
    async fn create(&self) -> Result<Box<dyn RendererHandle>, EngineError> {
        self.launched.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(EchoRenderer {
            document: None,
            terminated: Arc::clone(&self.terminated),
        }))
    }
}

struct EchoRenderer {
    document: Option<String>,
    terminated: Arc<AtomicUsize>,
}

#[async_trait]
impl RendererHandle for EchoRenderer {
    async fn load_content(&mut self, html: &str, _deadline: Duration) -> Result<(), EngineError> {
        if html.contains(BROKEN_MARKUP) {
            return Err(EngineError::load("net::ERR_ABORTED"));
        }
        self.document = Some(html.to_string());
        Ok(())
    }

    async fn render_to_bytes(
        &mut self,
        options: &PrintOptions,
        _deadline: Duration,
    ) -> Result<Bytes, EngineError> {
        let html = self
            .document
            .as_deref()
            .ok_or_else(|| EngineError::render("no document loaded"))?;
        Ok(Bytes::from(format!(
            "%PDF-1.7\n% {} landscape={}\n{html}",
            options.page_format.as_str(),
            options.landscape
        )))
    }

    fn is_alive(&self) -> bool {
        true
    }

    async fn terminate(self: Box<Self>) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

pub async fn echo_pipeline(min: usize, max: usize) -> (Arc<EchoFactory>, RenderPipeline) {
    let factory = Arc::new(EchoFactory::default());
    let pool = RendererPool::start(
        factory.clone(),
        PoolConfig {
            min,
            max,
            ..PoolConfig::default()
        },
    )
    .await
    .expect("pool should start");
    (factory, RenderPipeline::new(pool, RenderDeadlines::default()))
}
