//! Bounded pool of renderer instances.
//!
//! The pool owns every engine instance. Callers borrow one through
//! [`RendererPool::acquire`] and hand it back through exactly one of
//! [`RendererPool::release`] (healthy) or [`RendererPool::invalidate`] (suspect
//! after an error). All three serialize their bookkeeping on a single mutex that
//! is never held while an engine is launched or terminated; a creation slot is
//! reserved under the lock and filled outside it.
//!
//! Acquirers that cannot be served immediately queue up in FIFO order. Freed
//! handles and freed creation slots always go to the oldest waiter that is still
//! listening.

mod lease;
mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::engine::{EngineError, RendererFactory};
use crate::util::sync::mutex_lock;

pub use lease::Lease;

use lease::WaitTicket;
use state::{Grant, PoolState, PooledRenderer};

const SOURCE: &str = "application::pool";
const METRIC_POOL_CREATED: &str = "pressroom_pool_created_total";
const METRIC_POOL_RETIRED: &str = "pressroom_pool_retired_total";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("no renderer became available within {waited:?}")]
    Exhausted { waited: Duration },
    #[error("failed to start a renderer: {0}")]
    CreateFailed(#[source] EngineError),
    #[error("renderer pool is shutting down")]
    ShuttingDown,
    #[error("invalid pool bounds: min {min}, max {max}")]
    InvalidBounds { min: usize, max: usize },
}

/// Population bounds and recycling policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub min: usize,
    pub max: usize,
    /// Idle handles above `min` older than this are terminated by [`RendererPool::shrink_idle`].
    pub idle_timeout: Duration,
    /// Handles older than this are retired instead of being returned to the pool.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 1,
            max: 4,
            idle_timeout: Duration::from_secs(300),
            max_lifetime: None,
        }
    }
}

/// Point-in-time view of the pool population.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub min: usize,
    pub max: usize,
    pub idle: usize,
    pub leased: usize,
    pub creating: usize,
    pub waiting: usize,
}

impl PoolStats {
    pub fn population(&self) -> usize {
        self.idle + self.leased + self.creating
    }
}

pub(crate) struct PoolInner {
    factory: Arc<dyn RendererFactory>,
    config: PoolConfig,
    state: Mutex<PoolState>,
    next_handle_id: AtomicU64,
}

/// Shared handle to the renderer pool; cheap to clone.
#[derive(Clone)]
pub struct RendererPool {
    inner: Arc<PoolInner>,
}

enum Plan {
    Create,
    Wait(WaitTicket),
}

impl RendererPool {
    /// Build the pool and eagerly launch `min` renderers.
    ///
    /// Startup fails if any of the initial renderers cannot be launched; the
    /// ones that did start are terminated again.
    pub async fn start(
        factory: Arc<dyn RendererFactory>,
        config: PoolConfig,
    ) -> Result<Self, PoolError> {
        if config.max == 0 || config.min > config.max {
            return Err(PoolError::InvalidBounds {
                min: config.min,
                max: config.max,
            });
        }

        let min = config.min;
        let pool = Self {
            inner: Arc::new(PoolInner {
                factory,
                config,
                state: Mutex::new(PoolState::default()),
                next_handle_id: AtomicU64::new(1),
            }),
        };

        pool.inner.lock_state("start").creating = min;
        let launched = join_all((0..min).map(|_| pool.inner.launch())).await;

        let mut ready = Vec::with_capacity(min);
        let mut failure = None;
        for result in launched {
            match result {
                Ok(renderer) => ready.push(renderer),
                Err(err) => failure = Some(err),
            }
        }

        if let Some(err) = failure {
            pool.inner.lock_state("start").creating = 0;
            join_all(ready.into_iter().map(|r| r.engine.terminate())).await;
            return Err(PoolError::CreateFailed(err));
        }

        {
            let mut state = pool.inner.lock_state("start");
            for renderer in ready {
                state.creating -= 1;
                let _ = state.dispatch_handle(renderer);
            }
        }

        info!(
            target = SOURCE,
            op = "pool::start",
            min = pool.inner.config.min,
            max = pool.inner.config.max,
            "Renderer pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Borrow a renderer, waiting at most `timeout` for one to free up.
    ///
    /// An idle renderer is handed out immediately. Otherwise a new one is
    /// launched if the population is below `max`; if not, the caller queues
    /// behind earlier waiters. A zero timeout never queues.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, PoolError> {
        let started = Instant::now();

        let plan = {
            let mut state = self.inner.lock_state("acquire");
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            if let Some(renderer) = state.idle.pop_back() {
                state.leased += 1;
                debug!(
                    target = SOURCE,
                    op = "pool::acquire",
                    result = "idle",
                    handle_id = renderer.id,
                    "Leased idle renderer"
                );
                return Ok(Lease::new(self.inner.clone(), renderer));
            }
            if state.population() < self.inner.config.max {
                state.creating += 1;
                Plan::Create
            } else if timeout.is_zero() {
                return Err(PoolError::Exhausted {
                    waited: Duration::ZERO,
                });
            } else {
                let (id, rx) = state.enqueue_waiter();
                Plan::Wait(WaitTicket {
                    pool: self.inner.clone(),
                    id,
                    rx,
                })
            }
        };

        match plan {
            Plan::Create => self.inner.create_leased().await,
            Plan::Wait(mut ticket) => {
                let grant = match tokio::time::timeout(timeout, &mut ticket.rx).await {
                    Ok(Ok(grant)) => grant,
                    Ok(Err(_)) => return Err(PoolError::ShuttingDown),
                    Err(_) => match ticket.withdraw() {
                        Some(grant) => grant,
                        None => {
                            let waited = started.elapsed();
                            debug!(
                                target = SOURCE,
                                op = "pool::acquire",
                                result = "exhausted",
                                waited_ms = waited.as_millis() as u64,
                                "Gave up waiting for a renderer"
                            );
                            return Err(PoolError::Exhausted { waited });
                        }
                    },
                };
                drop(ticket);

                match grant {
                    Grant::Handle(renderer) => Ok(Lease::new(self.inner.clone(), renderer)),
                    Grant::Slot => self.inner.create_leased().await,
                }
            }
        }
    }

    /// Return a healthy renderer.
    ///
    /// A renderer that fails its liveness probe or outlived `max_lifetime` is
    /// retired instead, exactly as if it had been invalidated.
    pub async fn release(&self, lease: Lease) {
        let held_ms = lease.acquired_at().elapsed().as_millis() as u64;
        let Some(mut renderer) = lease.into_renderer() else {
            return;
        };

        if !renderer.engine.is_alive() {
            self.inner.retire(renderer, "dead").await;
            return;
        }
        if self.inner.is_expired(&renderer) {
            self.inner.retire(renderer, "expired").await;
            return;
        }

        renderer.uses += 1;
        let id = renderer.id;
        let leftover = {
            let mut state = self.inner.lock_state("release");
            state.leased = state.leased.saturating_sub(1);
            state.dispatch_handle(renderer)
        };

        debug!(
            target = SOURCE,
            op = "pool::release",
            handle_id = id,
            held_ms,
            "Renderer returned to pool"
        );

        if let Some(renderer) = leftover {
            renderer.engine.terminate().await;
        }
    }

    /// Terminate a renderer whose health is suspect after an error.
    ///
    /// If the population falls below `min` (and nobody is queued to take the
    /// freed slot) a replacement is launched in the background.
    pub async fn invalidate(&self, lease: Lease) {
        debug!(
            target = SOURCE,
            op = "pool::invalidate",
            handle_id = lease.renderer_id(),
            held_ms = lease.acquired_at().elapsed().as_millis() as u64,
            "Invalidating leased renderer"
        );
        if let Some(renderer) = lease.into_renderer() {
            self.inner.retire(renderer, "invalidated").await;
        }
    }

    /// Terminate idle renderers beyond `min` that sat unused for `idle_timeout`,
    /// plus idle renderers that died or outlived `max_lifetime`.
    ///
    /// Returns the number of renderers terminated.
    pub async fn shrink_idle(&self) -> usize {
        let min = self.inner.config.min;
        let idle_timeout = self.inner.config.idle_timeout;

        let (reaped, replacements) = {
            let mut state = self.inner.lock_state("shrink_idle");
            if state.closed {
                return 0;
            }

            let mut reaped = Vec::new();
            let mut kept = std::collections::VecDeque::with_capacity(state.idle.len());
            while let Some(renderer) = state.idle.pop_front() {
                if !renderer.engine.is_alive() || self.inner.is_expired(&renderer) {
                    reaped.push(renderer);
                } else {
                    kept.push_back(renderer);
                }
            }
            state.idle = kept;

            while state.population() > min {
                let stale = state
                    .idle
                    .front()
                    .is_some_and(|r| r.idle_since.elapsed() >= idle_timeout);
                if !stale {
                    break;
                }
                if let Some(renderer) = state.idle.pop_front() {
                    reaped.push(renderer);
                }
            }

            let mut replacements = 0;
            while state.population() < min {
                state.creating += 1;
                replacements += 1;
            }
            (reaped, replacements)
        };

        let count = reaped.len();
        if count > 0 {
            counter!(METRIC_POOL_RETIRED, "reason" => "idle").increment(count as u64);
            info!(
                target = SOURCE,
                op = "pool::shrink_idle",
                reaped = count,
                replacements,
                "Terminated idle renderers"
            );
        }
        join_all(reaped.into_iter().map(|r| r.engine.terminate())).await;
        for _ in 0..replacements {
            self.inner.spawn_replacement();
        }
        count
    }

    /// Close the pool: wake every waiter with `ShuttingDown` and terminate idle
    /// renderers. Renderers still leased are terminated when they come back.
    pub async fn shutdown(&self) {
        let idle = {
            let mut state = self.inner.lock_state("shutdown");
            state.closed = true;
            state.waiters.clear();
            std::mem::take(&mut state.idle)
        };

        info!(
            target = SOURCE,
            op = "pool::shutdown",
            terminating = idle.len(),
            "Renderer pool shutting down"
        );
        join_all(idle.into_iter().map(|r| r.engine.terminate())).await;
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state("stats");
        PoolStats {
            min: self.inner.config.min,
            max: self.inner.config.max,
            idle: state.idle.len(),
            leased: state.leased,
            creating: state.creating,
            waiting: state.waiters.len(),
        }
    }
}

impl PoolInner {
    fn lock_state(&self, op: &'static str) -> MutexGuard<'_, PoolState> {
        mutex_lock(&self.state, SOURCE, op)
    }

    fn is_expired(&self, renderer: &PooledRenderer) -> bool {
        self.config
            .max_lifetime
            .is_some_and(|ttl| renderer.created_at.elapsed() >= ttl)
    }

    /// Launch one renderer. The caller must already hold a creation slot.
    async fn launch(&self) -> Result<PooledRenderer, EngineError> {
        let id = self.next_handle_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        match self.factory.create().await {
            Ok(engine) => {
                counter!(METRIC_POOL_CREATED).increment(1);
                info!(
                    target = SOURCE,
                    op = "pool::launch",
                    result = "ok",
                    handle_id = id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Renderer launched"
                );
                Ok(PooledRenderer::new(id, engine))
            }
            Err(err) => {
                warn!(
                    target = SOURCE,
                    op = "pool::launch",
                    result = "error",
                    handle_id = id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %err,
                    "Renderer failed to launch"
                );
                Err(err)
            }
        }
    }

    /// Fill a reserved slot on behalf of an acquirer.
    async fn create_leased(self: &Arc<Self>) -> Result<Lease, PoolError> {
        let mut slot = SlotGuard {
            pool: self.clone(),
            armed: true,
        };

        let result = self.launch().await;
        slot.armed = false;

        match result {
            Ok(renderer) => {
                let closed = {
                    let mut state = self.lock_state("create_leased");
                    state.creating = state.creating.saturating_sub(1);
                    if !state.closed {
                        state.leased += 1;
                    }
                    state.closed
                };
                if closed {
                    renderer.engine.terminate().await;
                    return Err(PoolError::ShuttingDown);
                }
                Ok(Lease::new(self.clone(), renderer))
            }
            Err(err) => {
                self.free_slot("create_leased");
                Err(PoolError::CreateFailed(err))
            }
        }
    }

    /// Give up a reserved creation slot, passing it on to the next waiter.
    fn free_slot(&self, op: &'static str) {
        let mut state = self.lock_state(op);
        let _ = state.give_back(Grant::Slot);
    }

    /// Launch a replacement in the background. The slot is already reserved.
    fn spawn_replacement(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.free_slot("spawn_replacement");
            return;
        };

        let pool = self.clone();
        runtime.spawn(async move {
            match pool.launch().await {
                Ok(renderer) => {
                    let leftover = {
                        let mut state = pool.lock_state("replacement");
                        state.creating = state.creating.saturating_sub(1);
                        state.dispatch_handle(renderer)
                    };
                    if let Some(renderer) = leftover {
                        renderer.engine.terminate().await;
                    }
                }
                Err(_) => pool.free_slot("replacement"),
            }
        });
    }

    /// Remove a leased renderer from the population and terminate it.
    async fn retire(self: &Arc<Self>, renderer: PooledRenderer, reason: &'static str) {
        let replace = self.forget_leased(&renderer, reason);
        renderer.engine.terminate().await;
        if replace {
            self.spawn_replacement();
        }
    }

    /// Variant of [`retire`](Self::retire) usable from `Drop`.
    fn retire_detached(self: &Arc<Self>, renderer: PooledRenderer, reason: &'static str) {
        let replace = self.forget_leased(&renderer, reason);
        self.terminate_detached(renderer);
        if replace {
            self.spawn_replacement();
        }
    }

    fn forget_leased(&self, renderer: &PooledRenderer, reason: &'static str) -> bool {
        let replace = {
            let mut state = self.lock_state("retire");
            state.leased = state.leased.saturating_sub(1);
            state.after_removal(self.config.min)
        };

        counter!(METRIC_POOL_RETIRED, "reason" => reason).increment(1);
        info!(
            target = SOURCE,
            op = "pool::retire",
            handle_id = renderer.id,
            uses = renderer.uses,
            age_ms = renderer.created_at.elapsed().as_millis() as u64,
            reason,
            replace,
            "Renderer retired"
        );
        replace
    }

    fn terminate_detached(&self, renderer: PooledRenderer) {
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(renderer.engine.terminate());
            }
            Err(_) => drop(renderer),
        }
    }
}

/// Releases a reserved creation slot if the creating future is dropped midway.
struct SlotGuard {
    pool: Arc<PoolInner>,
    armed: bool,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        if self.armed {
            self.pool.free_slot("slot::drop");
        }
    }
}
