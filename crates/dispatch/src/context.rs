//! Per-call run context: deadline, cancellation, attempt number

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Cancellation fan-out for one experiment run
///
/// The controller holds the source; every dispatched call gets a token.
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Hand out a token observing this source
    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }

    /// Signal cancellation to every outstanding token
    pub fn cancel(&self) {
        // Send only fails when no receiver exists, which is fine here.
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver side of a cancellation signal
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
    // Keeps the sender alive for detached tokens so `cancelled` pends forever.
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl CancelToken {
    /// A token that never fires, for callers outside a cancellable run
    pub fn detached() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled; pends forever otherwise
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Source dropped without cancelling; nothing can fire anymore.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Context passed to every dispatcher invocation
#[derive(Clone)]
pub struct RunContext {
    /// Wall-clock budget for this call
    pub deadline: Option<Duration>,
    /// Cooperative cancellation signal
    pub cancel: CancelToken,
    /// 1-based dispatch attempt for this iteration
    pub attempt: u32,
}

impl RunContext {
    pub fn new(deadline: Option<Duration>, cancel: CancelToken, attempt: u32) -> Self {
        Self {
            deadline,
            cancel,
            attempt,
        }
    }

    /// Context with no deadline and no cancellation, for standalone calls
    pub fn detached() -> Self {
        Self {
            deadline: None,
            cancel: CancelToken::detached(),
            attempt: 1,
        }
    }
}
