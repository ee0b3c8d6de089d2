use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use cortex_core::types::SlotPriority;

use crate::error::{ConductorError, Result};
use crate::events::ConductorEvent;

/// How often a waiting request emits a `queue_update` heartbeat while
/// blocked on [`SlotManager::acquire`] (spec §4.11).
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Bounded-concurrency admission control: user requests and background
/// tasks draw from separate pools so a busy foreground never starves
/// background fact-extraction, and vice versa (spec C11 Slot Manager).
pub struct SlotManager {
    user_pool: Arc<Semaphore>,
    background_pool: Arc<Semaphore>,
    queue_depth: AtomicUsize,
    queue_capacity: usize,
}

/// A held slot; the permit is released (and any waiter notified) when this
/// is dropped, on every exit path including panics and early returns (spec
/// §4.11 "release is unconditional on any exit path").
pub struct SlotGuard {
    _permit: OwnedSemaphorePermit,
}

impl SlotManager {
    pub fn new(user_pool_size: usize, queue_capacity: usize) -> Self {
        Self {
            user_pool: Arc::new(Semaphore::new(user_pool_size)),
            // Background work never contends with interactive chat for the
            // same permits; a generous fixed pool is enough since nothing
            // here enforces a hard background concurrency cap in the spec.
            background_pool: Arc::new(Semaphore::new(user_pool_size.max(1) * 2)),
            queue_depth: AtomicUsize::new(0),
            queue_capacity,
        }
    }

    /// Acquires a slot for `priority`, the request's first suspension point
    /// (spec §4.11, §5). User-priority requests fast-fail with [`ConductorError::Busy`]
    /// once the waiting queue depth exceeds `queue_capacity`, without ever
    /// occupying a slot. While waiting, a `queue_update{position}` heartbeat
    /// is sent on `heartbeat_tx` at [`HEARTBEAT_INTERVAL`].
    pub async fn acquire(
        &self,
        priority: SlotPriority,
        heartbeat_tx: Option<&mpsc::Sender<ConductorEvent>>,
    ) -> Result<SlotGuard> {
        if priority == SlotPriority::User {
            let depth = self.queue_depth.fetch_add(1, Ordering::SeqCst) + 1;
            if depth > self.queue_capacity {
                self.queue_depth.fetch_sub(1, Ordering::SeqCst);
                debug!(depth, capacity = self.queue_capacity, "slot manager fast-fail: queue full");
                return Err(ConductorError::Busy);
            }
        }

        let pool = match priority {
            SlotPriority::User => self.user_pool.clone(),
            SlotPriority::Background => self.background_pool.clone(),
        };

        let permit = {
            let acquire_fut = pool.acquire_owned();
            tokio::pin!(acquire_fut);
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            ticker.tick().await; // first tick fires immediately; discard it
            loop {
                tokio::select! {
                    biased;
                    res = &mut acquire_fut => {
                        break res.map_err(|_| ConductorError::Internal("slot semaphore closed".to_string()))?;
                    }
                    _ = ticker.tick() => {
                        if let Some(tx) = heartbeat_tx {
                            let position = self.queue_depth.load(Ordering::SeqCst);
                            let _ = tx.send(ConductorEvent::QueueUpdate { position }).await;
                        }
                    }
                }
            }
        };

        if priority == SlotPriority::User {
            self.queue_depth.fetch_sub(1, Ordering::SeqCst);
        }
        info!(?priority, "slot acquired");
        Ok(SlotGuard { _permit: permit })
    }

    /// Current number of user-priority requests queued (waiting, not yet
    /// holding a slot) — used by [`Self::acquire`]'s fast-fail check and
    /// exposed for diagnostics.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth.load(Ordering::SeqCst)
    }

    /// Number of currently-available user-priority slots.
    pub fn available_user_slots(&self) -> usize {
        self.user_pool.available_permits()
    }
}
