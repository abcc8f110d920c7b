//! Scripted in-memory engine used by unit tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::application::engine::{EngineError, RendererFactory, RendererHandle};
use crate::domain::print::PrintOptions;

/// Behaviour shared between a factory and every handle it produced.
#[derive(Default)]
pub(crate) struct Script {
    pub(crate) created: AtomicUsize,
    pub(crate) terminated: AtomicUsize,
    pub(crate) fail_next_creates: AtomicUsize,
    pub(crate) load_delay: Mutex<Duration>,
    pub(crate) render_delay: Mutex<Duration>,
    pub(crate) fail_next_loads: AtomicUsize,
    pub(crate) fail_next_renders: AtomicUsize,
    pub(crate) empty_next_renders: AtomicUsize,
    pub(crate) busy: AtomicUsize,
    pub(crate) peak_busy: AtomicUsize,
    pub(crate) handles: Mutex<Vec<Arc<AtomicBool>>>,
    /// Serials of handles between the start of a load and the end of its render.
    pub(crate) occupied: Mutex<HashSet<usize>>,
    /// Times a load started on a handle that was already occupied.
    pub(crate) overlaps: AtomicUsize,
    pub(crate) peak_occupied: AtomicUsize,
}

impl Script {
    pub(crate) fn live(&self) -> usize {
        self.created.load(Ordering::SeqCst) - self.terminated.load(Ordering::SeqCst)
    }

    pub(crate) fn set_load_delay(&self, delay: Duration) {
        *self.load_delay.lock().expect("script lock") = delay;
    }

    pub(crate) fn set_render_delay(&self, delay: Duration) {
        *self.render_delay.lock().expect("script lock") = delay;
    }

    /// Mark every handle created so far as dead.
    pub(crate) fn kill_all(&self) {
        for alive in self.handles.lock().expect("script lock").iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    fn occupy(&self, serial: usize) {
        let mut occupied = self.occupied.lock().expect("script lock");
        if !occupied.insert(serial) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.peak_occupied.fetch_max(occupied.len(), Ordering::SeqCst);
    }

    fn vacate(&self, serial: usize) {
        self.occupied.lock().expect("script lock").remove(&serial);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[derive(Clone, Default)]
pub(crate) struct ScriptedFactory {
    pub(crate) script: Arc<Script>,
}

#[async_trait]
impl RendererFactory for ScriptedFactory {
    async fn create(&self) -> Result<Box<dyn RendererHandle>, EngineError> {
        tokio::task::yield_now().await;
        if Script::take_failure(&self.script.fail_next_creates) {
            return Err(EngineError::Launch("scripted launch failure".to_string()));
        }
        let serial = self.script.created.fetch_add(1, Ordering::SeqCst) + 1;
        let alive = Arc::new(AtomicBool::new(true));
        self.script
            .handles
            .lock()
            .expect("script lock")
            .push(alive.clone());
        Ok(Box::new(ScriptedHandle {
            serial,
            alive,
            loaded: None,
            script: self.script.clone(),
        }))
    }
}

struct ScriptedHandle {
    serial: usize,
    alive: Arc<AtomicBool>,
    loaded: Option<String>,
    script: Arc<Script>,
}

struct BusyGuard<'a>(&'a Script);

impl<'a> BusyGuard<'a> {
    fn enter(script: &'a Script) -> Self {
        let now = script.busy.fetch_add(1, Ordering::SeqCst) + 1;
        script.peak_busy.fetch_max(now, Ordering::SeqCst);
        Self(script)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RendererHandle for ScriptedHandle {
    async fn load_content(&mut self, html: &str, _deadline: Duration) -> Result<(), EngineError> {
        self.script.occupy(self.serial);
        let _busy = BusyGuard::enter(&self.script);
        let delay = *self.script.load_delay.lock().expect("script lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if Script::take_failure(&self.script.fail_next_loads) {
            return Err(EngineError::Load("scripted load failure".to_string()));
        }
        self.loaded = Some(html.to_string());
        Ok(())
    }

    async fn render_to_bytes(
        &mut self,
        options: &PrintOptions,
        _deadline: Duration,
    ) -> Result<Bytes, EngineError> {
        let _busy = BusyGuard::enter(&self.script);
        let delay = *self.script.render_delay.lock().expect("script lock");
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.script.vacate(self.serial);
        if Script::take_failure(&self.script.fail_next_renders) {
            return Err(EngineError::Render("scripted render failure".to_string()));
        }
        if Script::take_failure(&self.script.empty_next_renders) {
            return Ok(Bytes::new());
        }
        let html = self.loaded.as_deref().ok_or_else(|| {
            EngineError::Render("render requested before content was loaded".to_string())
        })?;
        Ok(Bytes::from(format!(
            "%PDF-1.7 renderer={} format={} html={html}",
            self.serial,
            options.page_format.as_str()
        )))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn terminate(self: Box<Self>) {
        self.script.vacate(self.serial);
        self.alive.store(false, Ordering::SeqCst);
        self.script.terminated.fetch_add(1, Ordering::SeqCst);
    }
}

/// Poll `check` until it holds, yielding to other tasks in between.
pub(crate) async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..1_000 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
