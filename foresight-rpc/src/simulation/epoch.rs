//! Latest-wins ordering for concurrent refreshes.
//!
//! Every refresh takes an [`Epoch`] when it starts. A result is committed only
//! if no newer refresh has started since, so a slow computation can never
//! overwrite the output of one that began after it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Epoch(u64);

impl Epoch {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct EpochCounter {
    current: AtomicU64,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new computation; every earlier epoch becomes stale.
    pub fn begin(&self) -> Epoch {
        Epoch(self.current.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.current.load(Ordering::SeqCst) == epoch.0
    }

    pub fn current(&self) -> Epoch {
        Epoch(self.current.load(Ordering::SeqCst))
    }
}

/// A published value guarded by an [`EpochCounter`].
pub struct StateCell<T> {
    epochs: EpochCounter,
    value: watch::Sender<Arc<T>>,
}

impl<T: Send + Sync + 'static> StateCell<T> {
    pub fn new(initial: T) -> Self {
        let (value, _) = watch::channel(Arc::new(initial));
        Self {
            epochs: EpochCounter::new(),
            value,
        }
    }

    pub fn begin(&self) -> Epoch {
        self.epochs.begin()
    }

    pub fn is_current(&self, epoch: Epoch) -> bool {
        self.epochs.is_current(epoch)
    }

    /// The newest epoch handed out so far.
    pub fn epoch(&self) -> Epoch {
        self.epochs.current()
    }

    pub fn load(&self) -> Arc<T> {
        self.value.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.value.subscribe()
    }

    /// Publish `next` if `epoch` is still the newest. Returns whether it was
    /// stored.
    pub fn commit(&self, epoch: Epoch, next: Arc<T>) -> bool {
        // Checked under the channel lock so concurrent commits serialize.
        let stored = self.value.send_if_modified(|slot| {
            if self.epochs.is_current(epoch) {
                *slot = next.clone();
                true
            } else {
                false
            }
        });
        if !stored {
            debug!(epoch = epoch.value(), "Discarding stale result");
        }
        stored
    }

    /// Start a new epoch and store `next` unconditionally.
    pub fn replace(&self, next: T) -> Epoch {
        let epoch = self.begin();
        self.value.send_replace(Arc::new(next));
        epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epochs_are_monotonic() {
        let counter = EpochCounter::new();
        let a = counter.begin();
        let b = counter.begin();
        assert!(b > a);
        assert!(!counter.is_current(a));
        assert!(counter.is_current(b));
        assert_eq!(counter.current(), b);
    }

    #[test]
    fn test_late_finisher_does_not_overwrite() {
        let cell = StateCell::new("initial");
        let a = cell.begin();
        let b = cell.begin();

        assert!(cell.commit(b, Arc::new("b")));
        assert!(!cell.commit(a, Arc::new("a")));
        assert_eq!(*cell.load(), "b");
    }

    #[test]
    fn test_commit_without_competition() {
        let cell = StateCell::new(0u32);
        let epoch = cell.begin();
        assert!(cell.commit(epoch, Arc::new(7)));
        assert_eq!(*cell.load(), 7);
    }

    #[tokio::test]
    async fn test_concurrent_tasks_latest_started_wins() {
        let cell = Arc::new(StateCell::new(0u64));
        let slow_epoch = cell.begin();
        let fast_epoch = cell.begin();

        let slow = {
            let cell = cell.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                cell.commit(slow_epoch, Arc::new(1))
            })
        };
        let fast = {
            let cell = cell.clone();
            tokio::spawn(async move { cell.commit(fast_epoch, Arc::new(2)) })
        };

        assert!(fast.await.unwrap());
        assert!(!slow.await.unwrap());
        assert_eq!(*cell.load(), 2);
    }

    #[tokio::test]
    async fn test_subscribers_see_commits() {
        let cell = StateCell::new(0u8);
        let mut rx = cell.subscribe();
        let epoch = cell.begin();
        cell.commit(epoch, Arc::new(9));
        rx.changed().await.unwrap();
        assert_eq!(**rx.borrow(), 9);
    }
}
