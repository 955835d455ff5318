//! Abort handles threaded through RPC-issuing calls.
//!
//! One [`AbortController`] fans out to any number of [`AbortSignal`]s. Once
//! fired, a controller stays fired.

use std::future::Future;

use tokio::sync::watch;

use super::RpcError;

#[derive(Debug)]
pub struct AbortController {
    tx: watch::Sender<bool>,
}

#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl AbortController {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> AbortSignal {
        AbortSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn abort(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the controller fires. Never resolves if the controller
    /// is dropped without firing.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|fired| *fired).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn check(&self) -> Result<(), RpcError> {
        if self.is_aborted() {
            Err(RpcError::Aborted)
        } else {
            Ok(())
        }
    }
}

/// Run `fut` unless `signal` fires first.
pub async fn guard<F: Future>(signal: Option<&AbortSignal>, fut: F) -> Result<F::Output, RpcError> {
    let Some(signal) = signal else {
        return Ok(fut.await);
    };
    signal.check()?;
    tokio::select! {
        biased;
        _ = signal.aborted() => Err(RpcError::Aborted),
        out = fut => Ok(out),
    }
}

/// `check` for an optional signal.
pub fn check(signal: Option<&AbortSignal>) -> Result<(), RpcError> {
    signal.map_or(Ok(()), AbortSignal::check)
}
