//! Single-use cancellation channel shared by a reconciler and its supervisor.
//!
//! The channel holds at most one [`CancelSignal`]. The first writer wins;
//! every later `close`/`fail` is a no-op and reports `false`. Readers check
//! it without blocking at the top of each tick, or await it alongside a
//! timer so a sleep is interrupted as soon as the other side decides.

use std::sync::Arc;

use converge_core::Error;
use tokio::sync::watch;

/// The terminal decision written to a [`CancelChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelSignal {
    /// Stop without an error. Written by a reconciler that reached a
    /// terminal state, or by a collaborator that reached the target on the
    /// reconciler's behalf.
    Closed,
    /// Stop with a fatal error, e.g. a failed corrective action.
    Failed(Error),
}

/// Write-once signal shared between exactly two concurrent tasks.
#[derive(Debug, Clone)]
pub struct CancelChannel {
    tx: Arc<watch::Sender<Option<CancelSignal>>>,
}

impl CancelChannel {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Close the channel without an error. Returns `false` if it was
    /// already closed.
    pub fn close(&self) -> bool {
        self.write(CancelSignal::Closed)
    }

    /// Close the channel with a fatal error. Returns `false` if it was
    /// already closed, in which case the error is dropped.
    pub fn fail(&self, error: Error) -> bool {
        self.write(CancelSignal::Failed(error))
    }

    /// Non-blocking read of the signal.
    #[must_use]
    pub fn try_recv(&self) -> Option<CancelSignal> {
        self.tx.borrow().clone()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.borrow().is_some()
    }

    /// Wait until the channel is closed.
    pub async fn recv(&self) -> CancelSignal {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(signal) => signal.clone().unwrap_or(CancelSignal::Closed),
            // The sender lives as long as `self`; treat a dropped sender as closed.
            Err(_) => CancelSignal::Closed,
        }
    }

    /// Guard that closes the channel when dropped, including when the
    /// owning future is cancelled before it finishes.
    #[must_use]
    pub fn close_on_drop(&self) -> CloseOnDrop {
        CloseOnDrop {
            channel: self.clone(),
        }
    }

    fn write(&self, signal: CancelSignal) -> bool {
        let mut pending = Some(signal);
        self.tx.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = pending.take();
            true
        })
    }
}

/// Closes its [`CancelChannel`] on drop. A no-op if the channel already
/// holds a signal.
#[derive(Debug)]
pub struct CloseOnDrop {
    channel: CancelChannel,
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        self.channel.close();
    }
}

impl Default for CancelChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_first_writer_wins() {
        let channel = CancelChannel::new();
        assert!(!channel.is_closed());
        assert_eq!(channel.try_recv(), None);

        assert!(channel.fail(Error::task_failed("first")));
        assert!(!channel.close());
        assert!(!channel.fail(Error::task_failed("second")));

        assert_eq!(
            channel.try_recv(),
            Some(CancelSignal::Failed(Error::task_failed("first")))
        );
    }

    #[test]
    fn test_clones_share_state() {
        let reconciler_side = CancelChannel::new();
        let supervisor_side = reconciler_side.clone();
        assert!(reconciler_side.close());
        assert!(supervisor_side.is_closed());
        assert!(!supervisor_side.close());
    }

    #[test]
    fn test_guard_closes_on_drop_without_overwriting() {
        let channel = CancelChannel::new();
        drop(channel.close_on_drop());
        assert_eq!(channel.try_recv(), Some(CancelSignal::Closed));

        let failed = CancelChannel::new();
        let guard = failed.close_on_drop();
        failed.fail(Error::task_failed("action"));
        drop(guard);
        assert_eq!(
            failed.try_recv(),
            Some(CancelSignal::Failed(Error::task_failed("action")))
        );
    }

    #[tokio::test]
    async fn test_recv_returns_immediately_when_closed() {
        let channel = CancelChannel::new();
        channel.close();
        assert_eq!(channel.recv().await, CancelSignal::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recv_wakes_on_close() {
        let channel = CancelChannel::new();
        let waiter = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.recv().await })
        };

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!waiter.is_finished());

        channel.fail(Error::task_failed("stuck"));
        let signal = waiter.await.ok();
        assert_eq!(
            signal,
            Some(CancelSignal::Failed(Error::task_failed("stuck")))
        );
    }
}
