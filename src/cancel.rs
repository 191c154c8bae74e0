//! Run-level cancellation.

use tokio::sync::watch;

/// Creates a connected cancel handle and signal.
pub fn channel() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Sending side, held by whoever may abort a run
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal every worker to abandon its current item
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// New receiver observing this handle
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Receiving side, cloned into every worker
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is signalled. Never resolves if the handle is dropped first.
    pub async fn cancelled(&mut self) {
        if self.rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let (handle, mut signal) = channel();
        let mut second = handle.signal();
        assert!(!signal.is_cancelled());

        let waiter = tokio::spawn(async move {
            signal.cancelled().await;
        });
        handle.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        second.cancelled().await;
        assert!(second.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_handle_is_not_cancellation() {
        let (handle, mut signal) = channel();
        drop(handle);

        let result = tokio::time::timeout(Duration::from_secs(5), signal.cancelled()).await;
        assert!(result.is_err());
        assert!(!signal.is_cancelled());
    }
}
