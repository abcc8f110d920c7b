use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::warn;

use crate::application::engine::{EngineError, RendererHandle};

use super::PoolInner;
use super::state::{Grant, PooledRenderer};

/// Exclusive use of one pooled renderer.
///
/// A lease ends through exactly one of [`RendererPool::release`] or
/// [`RendererPool::invalidate`], both of which consume it. A lease dropped any
/// other way (panic, cancelled request) is treated as invalidated: the engine's
/// state after an interrupted operation is not trusted.
///
/// [`RendererPool::release`]: super::RendererPool::release
/// [`RendererPool::invalidate`]: super::RendererPool::invalidate
pub struct Lease {
    pool: Arc<PoolInner>,
    renderer: Option<PooledRenderer>,
    acquired_at: Instant,
}

impl Lease {
    pub(super) fn new(pool: Arc<PoolInner>, renderer: PooledRenderer) -> Self {
        Self {
            pool,
            renderer: Some(renderer),
            acquired_at: Instant::now(),
        }
    }

    /// Identifier of the leased renderer, unique for the pool's lifetime.
    pub fn renderer_id(&self) -> u64 {
        self.renderer.as_ref().map(|r| r.id).unwrap_or_default()
    }

    /// Number of renders this renderer completed before the current lease.
    pub fn prior_uses(&self) -> u64 {
        self.renderer.as_ref().map(|r| r.uses).unwrap_or_default()
    }

    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Borrow the engine for the duration of the lease.
    pub fn engine(&mut self) -> Result<&mut (dyn RendererHandle + 'static), EngineError> {
        self.renderer
            .as_mut()
            .map(|r| r.engine.as_mut())
            .ok_or(EngineError::Terminated)
    }

    pub(super) fn into_renderer(mut self) -> Option<PooledRenderer> {
        self.renderer.take()
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("renderer_id", &self.renderer_id())
            .finish()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(renderer) = self.renderer.take() {
            warn!(
                target = "application::pool",
                op = "lease::drop",
                handle_id = renderer.id,
                "Lease dropped without release; invalidating renderer"
            );
            self.pool.retire_detached(renderer, "abandoned");
        }
    }
}

/// A queued acquirer's place in line.
///
/// Dropping the ticket (timeout or cancelled request) leaves the queue. A grant
/// that raced into the channel before the ticket was dropped goes back to the
/// pool instead of being lost.
pub(super) struct WaitTicket {
    pub(super) pool: Arc<PoolInner>,
    pub(super) id: u64,
    pub(super) rx: oneshot::Receiver<Grant>,
}

impl WaitTicket {
    /// Leave the queue, returning a grant that arrived in the meantime.
    pub(super) fn withdraw(&mut self) -> Option<Grant> {
        let mut state = self.pool.lock_state("wait::withdraw");
        state.remove_waiter(self.id);
        self.rx.close();
        self.rx.try_recv().ok()
    }
}

impl Drop for WaitTicket {
    fn drop(&mut self) {
        let leftover = {
            let mut state = self.pool.lock_state("wait::drop");
            state.remove_waiter(self.id);
            self.rx.close();
            match self.rx.try_recv() {
                Ok(grant) => state.give_back(grant),
                Err(_) => None,
            }
        };
        if let Some(renderer) = leftover {
            self.pool.terminate_detached(renderer);
        }
    }
}
