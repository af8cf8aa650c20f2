use tokio_util::sync::CancellationToken;

/// Coordinates teardown of every task a session spawned
///
/// Usage:
/// ```no_run
/// use portal_sync::shutdown::ShutdownCoordinator;
///
/// # async fn example() {
/// let coordinator = ShutdownCoordinator::new();
///
/// // In pollers/drivers:
/// let token = coordinator.child_token();
/// tokio::spawn(async move {
///     loop {
///         tokio::select! {
///             _ = tokio::time::sleep(std::time::Duration::from_secs(30)) => { /* poll */ }
///             _ = token.cancelled() => break,
///         }
///     }
/// });
///
/// // At session end:
/// coordinator.shutdown();
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct ShutdownCoordinator {
    root: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            root: CancellationToken::new(),
        }
    }

    /// Token cancelled by `shutdown()`; cancelling it directly only stops that one consumer
    pub fn child_token(&self) -> CancellationToken {
        self.root.child_token()
    }

    /// Cancel every child token handed out so far (and any handed out later)
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}
