//! Request bridge: engine callbacks to single-resolution futures.
//!
//! Every engine request is wrapped into exactly one [`Settlement`]. Error
//! handlers go on both the request and its transaction and whichever fires
//! first rejects the future; later signals are ignored.
//!
//! Writes resolve only when the transaction completes. The value is captured
//! when the request succeeds and held until then, so a write whose request
//! succeeded but whose transaction aborted is reported as failed. Reads
//! resolve as soon as their request succeeds.

use crate::error::{AdapterError, AdapterResult, EngineContext};
use futures_channel::oneshot;
use orbitkv_engine::{EngineError, Request, Transaction};
use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tracing::{debug, error};

/// The single settle path of one pending operation.
///
/// Clones share the same channel. Only the first `settle` call delivers.
pub(crate) struct Settlement<T> {
    sender: Arc<Mutex<Option<oneshot::Sender<AdapterResult<T>>>>>,
}

impl<T> Clone for Settlement<T> {
    fn clone(&self) -> Self {
        Self {
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T> Settlement<T> {
    /// Delivers the outcome. Returns `false` if it was already settled.
    pub(crate) fn settle(&self, result: AdapterResult<T>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => {
                // The receiver may be gone; the caller abandoned the future.
                let _ = sender.send(result);
                true
            }
            None => false,
        }
    }
}

/// Creates a settlement and the future it resolves.
pub(crate) fn settlement<T>() -> (Settlement<T>, Pending<T>) {
    let (sender, receiver) = oneshot::channel();
    (
        Settlement {
            sender: Arc::new(Mutex::new(Some(sender))),
        },
        Pending { receiver },
    )
}

/// A future resolving with the outcome of one engine operation.
#[must_use = "futures do nothing unless awaited"]
pub struct Pending<T> {
    receiver: oneshot::Receiver<AdapterResult<T>>,
}

impl<T> Future for Pending<T> {
    type Output = AdapterResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(Err(AdapterError::EngineRequestFailed {
                    context: EngineContext {
                        code: "AbortError".to_string(),
                        message: "the engine dropped the request without settling it".to_string(),
                    },
                }))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Which engine signal resolves the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SettleOn {
    /// The request's success. For reads.
    RequestSuccess,
    /// The transaction's completion. For writes.
    TransactionComplete,
}

fn rejection<T>(namespace: &str, settlement: &Settlement<T>) -> impl FnOnce(EngineError) + Send + 'static
where
    T: Send + 'static,
{
    let namespace = namespace.to_string();
    let settlement = settlement.clone();
    move |err| {
        let mapped = AdapterError::from_engine(&namespace, &err);
        if settlement.settle(Err(mapped)) {
            error!(namespace = %namespace, code = err.code(), error = %err, "engine request failed");
        }
    }
}

/// Wraps `request` and its transaction into one pending future.
///
/// `map` converts the request's result; it runs when the request succeeds
/// and its error rejects the future immediately.
pub(crate) fn bridge<T, U, F>(
    namespace: &str,
    request: &Request<T>,
    txn: &Transaction,
    settle_on: SettleOn,
    map: F,
) -> Pending<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnOnce(T) -> AdapterResult<U> + Send + 'static,
{
    let (settlement, pending) = settlement::<U>();
    request.on_error(rejection(namespace, &settlement));
    txn.on_error(rejection(namespace, &settlement));

    let txn_id = txn.id();
    match settle_on {
        SettleOn::RequestSuccess => {
            let settlement = settlement.clone();
            request.on_success(move |value| {
                debug!(txn = %txn_id, "request succeeded; settling read");
                settlement.settle(map(value));
            });
        }
        SettleOn::TransactionComplete => {
            let captured: Arc<Mutex<Option<U>>> = Arc::new(Mutex::new(None));
            let on_request = Arc::clone(&captured);
            let early = settlement.clone();
            request.on_success(move |value| match map(value) {
                Ok(mapped) => *on_request.lock() = Some(mapped),
                Err(err) => {
                    early.settle(Err(err));
                }
            });

            let settlement = settlement.clone();
            txn.on_complete(move || {
                debug!(txn = %txn_id, "transaction complete; settling write");
                let outcome = captured.lock().take().ok_or_else(|| {
                    AdapterError::EngineRequestFailed {
                        context: EngineContext {
                            code: "UnknownError".to_string(),
                            message: format!("{txn_id} completed without a request result"),
                        },
                    }
                });
                settlement.settle(outcome);
            });
        }
    }
    pending
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_settle_wins() {
        let (settlement, pending) = settlement::<u32>();
        let other = settlement.clone();
        assert!(settlement.settle(Ok(1)));
        assert!(!other.settle(Err(AdapterError::invalid_argument("late"))));
        assert!(!settlement.settle(Ok(2)));
        assert_eq!(pending.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn dropped_settlement_rejects() {
        let (settlement, pending) = settlement::<()>();
        drop(settlement);
        let err = pending.await.unwrap_err();
        assert_eq!(err.context().unwrap().code, "AbortError");
    }

    #[test]
    fn settling_after_abandonment_is_harmless() {
        let (settlement, pending) = settlement::<()>();
        drop(pending);
        assert!(settlement.settle(Ok(())));
    }
}
