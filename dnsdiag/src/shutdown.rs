//! Two-stage interrupt handling.
//!
//! The first SIGINT requests a graceful stop: every probe loop observes the
//! flag at its next iteration boundary and blocking waits are raced against
//! the broadcast channel. A second SIGINT terminates the process immediately
//! with status 0.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

/// Cloneable cancellation handle consulted at every blocking point.
#[derive(Debug, Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Install the process-wide SIGINT handler and return the handle.
    ///
    /// Call once per process, before the engine loops start.
    pub fn install() -> Self {
        let (tx, rx) = watch::channel(false);
        let flag = Arc::new(AtomicBool::new(false));
        let task_flag = Arc::clone(&flag);

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            task_flag.store(true, Ordering::SeqCst);
            let _ = tx.send(true);

            // pressed twice: exit immediately
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(0);
            }
        });

        Self { flag, rx }
    }

    /// A handle that never fires, for contexts without signal handling.
    pub fn disabled() -> Self {
        let (tx, rx) = watch::channel(false);
        // keep the channel open for the lifetime of the handle
        std::mem::forget(tx);
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            rx,
        }
    }

    /// Whether a graceful shutdown has been requested.
    pub fn requested(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once a graceful shutdown is requested. Never resolves if the
    /// signal task is absent.
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleep that returns early when a shutdown is requested.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wait() => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_handle_never_fires() {
        let shutdown = Shutdown::disabled();
        assert!(!shutdown.requested());
        // the sleep must run to completion, not return early
        let started = std::time::Instant::now();
        shutdown.sleep(Duration::from_millis(30)).await;
        assert!(started.elapsed() >= Duration::from_millis(25));
    }
}
