//! Explicit run context threaded through discovery, download, and mapping.

use tokio_util::sync::CancellationToken;

/// Per-collection context: cancellation is a first-class token handed to
/// every suspension point (SDK calls, scratch io, record iteration).
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: CancellationToken,
}

impl RunContext {
    pub fn new() -> Self {
        RunContext {
            cancel: CancellationToken::new(),
        }
    }

    /// A token holder that can cancel this run from another task.
    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the run is cancelled; used in `select!` around io.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
