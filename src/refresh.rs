//! Dashboard refresh orchestration.
//!
//! Finished imports bump a counter; subscribers wait for a quiet period
//! after the last bump and then refetch once, without a loading state.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_REFRESH_DEBOUNCE_MS;
use crate::logging::log_debug;

/// Something that can refetch its data in place
#[async_trait]
pub trait Refreshable: Send + Sync {
    async fn soft_refresh(&self);
}

/// Monotonic "dashboard may be stale" counter
#[derive(Debug, Clone)]
pub struct RefreshOrchestrator {
    trigger: Arc<watch::Sender<u64>>,
}

impl Default for RefreshOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl RefreshOrchestrator {
    pub fn new() -> Self {
        let (trigger, _) = watch::channel(0);
        Self {
            trigger: Arc::new(trigger),
        }
    }

    pub fn refresh_trigger(&self) -> u64 {
        *self.trigger.borrow()
    }

    pub fn trigger_refresh(&self) {
        self.trigger.send_modify(|count| *count += 1);
        log_debug(
            "refresh",
            &format!("Refresh trigger bumped to {}", self.refresh_trigger()),
        )
        .unwrap_or_default();
    }

    pub fn watch(&self) -> watch::Receiver<u64> {
        self.trigger.subscribe()
    }
}

/// Trailing debounce: run `action` once `delay` has passed since the last change
///
/// Returns when `changes` closes or `cancel` fires. A pending action is dropped on cancel.
pub async fn run_debounced<F, Fut>(
    mut changes: watch::Receiver<u64>,
    delay: Duration,
    cancel: CancellationToken,
    mut action: F,
) where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    // Only bumps after subscription count
    changes.borrow_and_update();

    loop {
        tokio::select! {
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
            }
            _ = cancel.cancelled() => return,
        }

        // Quiet-period wait, restarted by every further bump
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    action().await;
                    break;
                }
                changed = changes.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = cancel.cancelled() => return,
            }
        }
    }
}

/// Background task soft-refreshing a target once per burst of triggers
pub struct RefreshSubscriber {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl RefreshSubscriber {
    pub fn spawn(
        orchestrator: &RefreshOrchestrator,
        target: Arc<dyn Refreshable>,
        debounce: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let changes = orchestrator.watch();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            run_debounced(changes, debounce, task_cancel, || {
                let target = Arc::clone(&target);
                async move {
                    log_debug("refresh", "Debounced refresh firing").unwrap_or_default();
                    target.soft_refresh().await;
                }
            })
            .await;
        });

        Self { cancel, handle }
    }

    pub fn with_default_debounce(
        orchestrator: &RefreshOrchestrator,
        target: Arc<dyn Refreshable>,
        cancel: CancellationToken,
    ) -> Self {
        Self::spawn(
            orchestrator,
            target,
            Duration::from_millis(DEFAULT_REFRESH_DEBOUNCE_MS),
            cancel,
        )
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for RefreshSubscriber {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
