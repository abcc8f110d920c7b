//! Bookkeeping guarded by the pool mutex.
//!
//! Everything here is O(1) (or O(idle) for reaping) and never touches the
//! engine itself; launching and terminating happen outside the lock.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::application::engine::RendererHandle;

/// An engine instance owned by the pool, together with its bookkeeping.
pub(crate) struct PooledRenderer {
    pub(crate) id: u64,
    pub(crate) created_at: Instant,
    pub(crate) idle_since: Instant,
    pub(crate) uses: u64,
    pub(crate) engine: Box<dyn RendererHandle>,
}

impl PooledRenderer {
    pub(crate) fn new(id: u64, engine: Box<dyn RendererHandle>) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            idle_since: now,
            uses: 0,
            engine,
        }
    }
}

/// What a queued acquirer receives when capacity frees up.
pub(crate) enum Grant {
    /// A ready handle, already counted as leased.
    Handle(PooledRenderer),
    /// A reserved creation slot, already counted as creating.
    Slot,
}

pub(crate) struct Waiter {
    pub(crate) id: u64,
    pub(crate) tx: oneshot::Sender<Grant>,
}

#[derive(Default)]
pub(crate) struct PoolState {
    pub(crate) idle: VecDeque<PooledRenderer>,
    pub(crate) leased: usize,
    pub(crate) creating: usize,
    pub(crate) waiters: VecDeque<Waiter>,
    pub(crate) next_waiter_id: u64,
    pub(crate) closed: bool,
}

impl PoolState {
    /// Idle + leased + reserved-for-creation.
    pub(crate) fn population(&self) -> usize {
        self.idle.len() + self.leased + self.creating
    }

    pub(crate) fn enqueue_waiter(&mut self) -> (u64, oneshot::Receiver<Grant>) {
        let (tx, rx) = oneshot::channel();
        let id = self.next_waiter_id;
        self.next_waiter_id = self.next_waiter_id.wrapping_add(1);
        self.waiters.push_back(Waiter { id, tx });
        (id, rx)
    }

    pub(crate) fn remove_waiter(&mut self, id: u64) {
        self.waiters.retain(|waiter| waiter.id != id);
    }

    /// Offer a grant to the oldest waiter still listening.
    ///
    /// Waiters that gave up (dropped receiver) are skipped. Returns the grant
    /// when nobody accepted it. Accounting for an accepted grant happens here,
    /// under the lock, before the receiver can observe it.
    fn offer(&mut self, mut grant: Grant) -> Option<Grant> {
        while let Some(waiter) = self.waiters.pop_front() {
            let is_slot = matches!(grant, Grant::Slot);
            match waiter.tx.send(grant) {
                Ok(()) => {
                    if is_slot {
                        self.creating += 1;
                    } else {
                        self.leased += 1;
                    }
                    return None;
                }
                Err(returned) => grant = returned,
            }
        }
        Some(grant)
    }

    /// Hand a healthy handle to the oldest waiter or park it as idle.
    ///
    /// Returns the handle when the pool is closed; the caller terminates it.
    pub(crate) fn dispatch_handle(&mut self, renderer: PooledRenderer) -> Option<PooledRenderer> {
        if self.closed {
            return Some(renderer);
        }

        if let Some(Grant::Handle(mut renderer)) = self.offer(Grant::Handle(renderer)) {
            renderer.idle_since = Instant::now();
            self.idle.push_back(renderer);
        }
        None
    }

    /// React to a handle leaving the population.
    ///
    /// The freed capacity goes to the oldest waiter as a creation slot. With no
    /// one waiting, a slot is reserved for a background replacement when the
    /// population dropped below `min`; the return value says whether the caller
    /// must launch that replacement.
    pub(crate) fn after_removal(&mut self, min: usize) -> bool {
        if self.closed {
            return false;
        }
        if self.offer(Grant::Slot).is_none() {
            return false;
        }
        if self.population() < min {
            self.creating += 1;
            return true;
        }
        false
    }

    /// Return a grant that reached a waiter who is no longer interested.
    pub(crate) fn give_back(&mut self, grant: Grant) -> Option<PooledRenderer> {
        match grant {
            Grant::Handle(renderer) => {
                self.leased = self.leased.saturating_sub(1);
                self.dispatch_handle(renderer)
            }
            Grant::Slot => {
                self.creating = self.creating.saturating_sub(1);
                if !self.closed {
                    let _ = self.offer(Grant::Slot);
                }
                None
            }
        }
    }
}
