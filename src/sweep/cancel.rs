//! Single-writer cancellation flag.
//!
//! Backed by `tokio::sync::watch`. The engine polls [`CancelSignal`] at the
//! top of each iteration; nothing interrupts an in-flight command or the
//! settle delay.

use std::future::Future;
use tokio::sync::watch;

/// Writer half, held by whoever may stop the sweep (the Ctrl-C task).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }
}

/// Reader half, handed to the engine.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    receiver: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation has been requested. Keeps the last value if the
    /// handle has been dropped.
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }
}

/// Create a connected handle/signal pair, initially not cancelled.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (sender, receiver) = watch::channel(false);
    (CancelHandle { sender }, CancelSignal { receiver })
}

/// Turn an interrupt source into cancellation.
///
/// The first interrupt requests cancellation, so the sweep ends after the
/// current step. Returns once a second interrupt arrives; the caller should
/// then abort without waiting for the engine.
///
/// # Errors
///
/// Whatever error the interrupt source reports, e.g. a signal handler that
/// could not be installed.
pub async fn relay_interrupts<F, Fut>(
    handle: &CancelHandle,
    mut next_interrupt: F,
) -> std::io::Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::io::Result<()>>,
{
    next_interrupt().await?;
    handle.cancel();
    next_interrupt().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[test]
    fn test_cancel_is_visible_to_signal() {
        let (handle, signal) = cancel_pair();
        assert!(!signal.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(signal.is_cancelled());
        assert!(handle.is_cancelled());
    }

    #[test]
    fn test_signal_survives_dropped_handle() {
        let (handle, signal) = cancel_pair();
        handle.cancel();
        drop(handle);
        assert!(signal.is_cancelled());

        let (handle, signal) = cancel_pair();
        drop(handle);
        assert!(!signal.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_interrupt_cancels_second_returns() {
        let (handle, signal) = cancel_pair();
        let interrupts = Arc::new(Notify::new());
        let source = interrupts.clone();
        let relay = tokio::spawn(async move {
            relay_interrupts(&handle, || {
                let source = source.clone();
                async move {
                    source.notified().await;
                    Ok(())
                }
            })
            .await
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!signal.is_cancelled());

        interrupts.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(signal.is_cancelled());
        assert!(!relay.is_finished());

        interrupts.notify_one();
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_interrupt_source_error_leaves_sweep_running() {
        let (handle, signal) = cancel_pair();
        let result = relay_interrupts(&handle, || async {
            Err(std::io::Error::other("no signal handler"))
        })
        .await;
        assert!(result.is_err());
        assert!(!signal.is_cancelled());
    }
}
