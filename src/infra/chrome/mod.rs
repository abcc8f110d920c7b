//! Headless Chromium implementation of the renderer traits.
//!
//! Each handle owns one browser process with a single tab. Every CDP call is
//! blocking, so it runs on the blocking pool under a tokio deadline; a call that
//! fails or overruns marks the handle unhealthy and the pool retires it.

mod settle;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use url::Url;

use crate::application::engine::{EngineError, RendererFactory, RendererHandle};
use crate::config::RenderSettings;
use crate::domain::print::PrintOptions;

use settle::{PROBE_INTERVAL, PROBE_SCRIPT, Probe, SettleTracker};

const SOURCE: &str = "infra::chrome";
/// Keeps pooled browsers connected however long they sit idle; the pool decides
/// when to retire them.
const BROWSER_IDLE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365);
const WINDOW_SIZE: (u32, u32) = (1280, 1024);

/// Launch parameters shared by every browser the factory starts.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    pub settle_idle: Duration,
}

impl From<&RenderSettings> for ChromeOptions {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            chrome_path: settings.chrome_path.clone(),
            sandbox: settings.sandbox,
            settle_idle: settings.settle_idle,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChromeRendererFactory {
    options: ChromeOptions,
}

impl ChromeRendererFactory {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RendererFactory for ChromeRendererFactory {
    async fn create(&self) -> Result<Box<dyn RendererHandle>, EngineError> {
        let options = self.options.clone();
        let started = Instant::now();

        let (browser, tab) = tokio::task::spawn_blocking(move || launch(&options))
            .await
            .map_err(EngineError::launch)??;

        debug!(
            target = SOURCE,
            op = "chrome::launch",
            pid = browser.get_process_id(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chromium started"
        );

        Ok(Box::new(ChromeRenderer {
            browser: Some(browser),
            tab,
            healthy: Arc::new(AtomicBool::new(true)),
            settle_idle: self.options.settle_idle,
            document: None,
        }))
    }
}

fn launch(options: &ChromeOptions) -> Result<(Browser, Arc<Tab>), EngineError> {
    let launch_options = LaunchOptions::default_builder()
        .headless(true)
        .sandbox(options.sandbox)
        .path(options.chrome_path.clone())
        .window_size(Some(WINDOW_SIZE))
        .idle_browser_timeout(BROWSER_IDLE_TIMEOUT)
        .build()
        .map_err(EngineError::launch)?;

    let browser = Browser::new(launch_options).map_err(EngineError::launch)?;
    let tab = browser.new_tab().map_err(EngineError::launch)?;
    Ok((browser, tab))
}

pub struct ChromeRenderer {
    browser: Option<Browser>,
    tab: Arc<Tab>,
    healthy: Arc<AtomicBool>,
    settle_idle: Duration,
    /// Backing file of the loaded document; kept until the next load.
    document: Option<NamedTempFile>,
}

/// Run a blocking CDP sequence on `tab` under `deadline`.
async fn blocking<T, F>(
    tab: Arc<Tab>,
    healthy: Arc<AtomicBool>,
    op: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, EngineError>
where
    F: FnOnce(&Tab) -> Result<T, EngineError> + Send + 'static,
    T: Send + 'static,
{
    tab.set_default_timeout(deadline);
    let task = tokio::task::spawn_blocking(move || call(&tab));

    let result = match tokio::time::timeout(deadline, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(EngineError::Render(join.to_string())),
        Err(_) => Err(EngineError::Timeout(deadline)),
    };

    if let Err(err) = &result {
        healthy.store(false, Ordering::SeqCst);
        warn!(
            target = SOURCE,
            op,
            result = "error",
            error = %err,
            "Chromium call failed; renderer marked unhealthy"
        );
    }
    result
}

#[async_trait]
impl RendererHandle for ChromeRenderer {
    async fn load_content(&mut self, html: &str, deadline: Duration) -> Result<(), EngineError> {
        let document = write_document(html)?;
        let url = Url::from_file_path(document.path())
            .map_err(|_| EngineError::load("document path is not absolute"))?;
        let settle_idle = self.settle_idle;
        let give_up_at = Instant::now() + deadline;

        blocking(
            self.tab.clone(),
            self.healthy.clone(),
            "chrome::load_content",
            deadline,
            move |tab| {
                tab.navigate_to(url.as_str()).map_err(EngineError::load)?;
                tab.wait_until_navigated().map_err(EngineError::load)?;
                wait_for_settle(tab, settle_idle, give_up_at)
            },
        )
        .await?;

        self.document = Some(document);
        Ok(())
    }

    async fn render_to_bytes(
        &mut self,
        options: &PrintOptions,
        deadline: Duration,
    ) -> Result<Bytes, EngineError> {
        if self.document.is_none() {
            return Err(EngineError::render("no document loaded"));
        }
        let pdf_options = pdf_options(options);

        let pdf = blocking(
            self.tab.clone(),
            self.healthy.clone(),
            "chrome::render_to_bytes",
            deadline,
            move |tab| tab.print_to_pdf(Some(pdf_options)).map_err(EngineError::render),
        )
        .await?;
        Ok(Bytes::from(pdf))
    }

    fn is_alive(&self) -> bool {
        self.healthy.load(Ordering::SeqCst) && self.browser.is_some()
    }

    async fn terminate(mut self: Box<Self>) {
        self.healthy.store(false, Ordering::SeqCst);
        let browser = self.browser.take();
        let tab = self.tab.clone();
        let pid = browser.as_ref().and_then(Browser::get_process_id);

        // Dropping the browser kills the process and waits for it to exit.
        let closed = tokio::task::spawn_blocking(move || {
            let _ = tab.close(false);
            drop(tab);
            drop(browser);
        })
        .await;

        if let Err(err) = closed {
            warn!(
                target = SOURCE,
                op = "chrome::terminate",
                result = "error",
                pid,
                error = %err,
                "Chromium shutdown task failed"
            );
        } else {
            debug!(target = SOURCE, op = "chrome::terminate", pid, "Chromium stopped");
        }
    }
}

fn write_document(html: &str) -> Result<NamedTempFile, EngineError> {
    let mut file = tempfile::Builder::new()
        .prefix("pressroom-")
        .suffix(".html")
        .tempfile()
        .map_err(EngineError::load)?;
    file.write_all(html.as_bytes()).map_err(EngineError::load)?;
    file.flush().map_err(EngineError::load)?;
    Ok(file)
}

/// Poll the page until its resource count has been stable for `idle_window`.
fn wait_for_settle(tab: &Tab, idle_window: Duration, give_up_at: Instant) -> Result<(), EngineError> {
    let mut tracker = SettleTracker::new(idle_window);
    loop {
        let raw = tab
            .evaluate(PROBE_SCRIPT, false)
            .map_err(EngineError::load)?
            .value
            .and_then(|value| value.as_str().map(str::to_owned))
            .unwrap_or_default();
        let probe = Probe::parse(&raw)
            .ok_or_else(|| EngineError::load(format!("unexpected page probe result `{raw}`")))?;

        let now = Instant::now();
        if tracker.observe(probe, now) {
            return Ok(());
        }
        if now >= give_up_at {
            return Err(EngineError::load("page did not settle before the deadline"));
        }
        std::thread::sleep(PROBE_INTERVAL);
    }
}

/// Map print options onto the CDP `Page.printToPDF` parameters.
fn pdf_options(options: &PrintOptions) -> PrintToPdfOptions {
    let (paper_width, paper_height) = options.page_format.dimensions_in();
    let margins = options.margins;

    PrintToPdfOptions {
        landscape: Some(options.landscape),
        display_header_footer: Some(options.display_header_footer),
        print_background: Some(options.print_background),
        paper_width: Some(paper_width),
        paper_height: Some(paper_height),
        margin_top: Some(margins.top),
        margin_bottom: Some(margins.bottom),
        margin_left: Some(margins.left),
        margin_right: Some(margins.right),
        header_template: options
            .display_header_footer
            .then(|| options.header_template.clone())
            .flatten(),
        footer_template: options
            .display_header_footer
            .then(|| options.footer_template.clone())
            .flatten(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::print::{Margins, PageFormat};

    #[test]
    fn default_options_print_a4_with_backgrounds() {
        let pdf = pdf_options(&PrintOptions::default());

        assert_eq!(pdf.paper_width, Some(8.27));
        assert_eq!(pdf.paper_height, Some(11.69));
        assert_eq!(pdf.print_background, Some(true));
        assert_eq!(pdf.display_header_footer, Some(false));
        assert_eq!(pdf.landscape, Some(false));
        assert_eq!(pdf.margin_top, Some(0.0));
        assert!(pdf.header_template.is_none());
    }

    #[test]
    fn landscape_keeps_portrait_paper_and_sets_flag() {
        let pdf = pdf_options(&PrintOptions {
            page_format: PageFormat::Letter,
            landscape: true,
            ..Default::default()
        });

        assert_eq!(pdf.paper_width, Some(8.5));
        assert_eq!(pdf.paper_height, Some(11.0));
        assert_eq!(pdf.landscape, Some(true));
    }

    #[test]
    fn templates_only_apply_with_header_footer_enabled() {
        let mut options = PrintOptions {
            header_template: Some("<span class=\"title\"></span>".to_string()),
            footer_template: Some("<span class=\"pageNumber\"></span>".to_string()),
            margins: Margins::uniform(0.5),
            ..Default::default()
        };

        let pdf = pdf_options(&options);
        assert!(pdf.header_template.is_none());
        assert!(pdf.footer_template.is_none());
        assert_eq!(pdf.margin_left, Some(0.5));

        options.display_header_footer = true;
        let pdf = pdf_options(&options);
        assert_eq!(pdf.display_header_footer, Some(true));
        assert_eq!(
            pdf.footer_template.as_deref(),
            Some("<span class=\"pageNumber\"></span>")
        );
    }

    #[test]
    fn options_follow_render_settings() {
        let settings = RenderSettings {
            load_timeout: Duration::from_secs(60),
            render_timeout: Duration::from_secs(60),
            settle_idle: Duration::from_millis(250),
            chrome_path: Some(PathBuf::from("/opt/chromium/chrome")),
            sandbox: false,
        };

        let options = ChromeOptions::from(&settings);
        assert_eq!(options.settle_idle, Duration::from_millis(250));
        assert!(!options.sandbox);
        assert_eq!(
            options.chrome_path.as_deref(),
            Some(std::path::Path::new("/opt/chromium/chrome"))
        );
    }
}
