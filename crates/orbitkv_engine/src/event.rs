//! Event delivery primitives.
//!
//! The engine reports every outcome through callbacks. Callers register
//! handlers after issuing a request, while the engine may already be working
//! on it from its own thread, so handler registration and event firing may
//! happen in either order. [`EventSlot`] makes both orders deliver exactly once.

use crate::error::EngineError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Handler<T> = Box<dyn FnOnce(T) + Send + 'static>;

enum SlotState<T> {
    /// Nothing registered, nothing fired.
    Empty,
    /// A handler is waiting for the event.
    Armed(Handler<T>),
    /// The event fired before any handler was registered.
    Fired(T),
    /// The event has been delivered (or can no longer be).
    Done,
}

/// A one-shot event with at most one handler.
///
/// The handler runs outside the slot's lock, so it may freely call back into
/// the engine.
pub struct EventSlot<T> {
    state: Mutex<SlotState<T>>,
}

impl<T: Send + 'static> EventSlot<T> {
    /// Creates an empty slot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Registers the handler, replacing any previously registered one.
    ///
    /// If the event already fired, the handler runs immediately on the
    /// calling thread.
    pub fn set_handler(&self, handler: impl FnOnce(T) + Send + 'static) {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Done) {
            SlotState::Fired(payload) => {
                drop(state);
                handler(payload);
            }
            SlotState::Done => {}
            SlotState::Empty | SlotState::Armed(_) => {
                *state = SlotState::Armed(Box::new(handler));
            }
        }
    }

    /// Fires the event. Returns `false` if it had already fired.
    pub fn fire(&self, payload: T) -> bool {
        let mut state = self.state.lock();
        match std::mem::replace(&mut *state, SlotState::Done) {
            SlotState::Armed(handler) => {
                drop(state);
                handler(payload);
                true
            }
            SlotState::Empty => {
                *state = SlotState::Fired(payload);
                true
            }
            previous @ (SlotState::Fired(_) | SlotState::Done) => {
                *state = previous;
                false
            }
        }
    }

    /// Discards the handler without delivering anything.
    pub fn disarm(&self) {
        *self.state.lock() = SlotState::Done;
    }
}

impl<T: Send + 'static> Default for EventSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct RequestInner<T> {
    settled: AtomicBool,
    success: EventSlot<T>,
    error: EventSlot<EngineError>,
}

/// A pending engine request that reports either success or an error, once.
pub struct Request<T> {
    inner: Arc<RequestInner<T>>,
}

impl<T> std::fmt::Debug for Request<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").finish_non_exhaustive()
    }
}

impl<T> Clone for Request<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Request<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(RequestInner {
                settled: AtomicBool::new(false),
                success: EventSlot::new(),
                error: EventSlot::new(),
            }),
        }
    }

    /// Creates a request that has already failed.
    pub(crate) fn failed(error: EngineError) -> Self {
        let request = Self::new();
        request.fail(error);
        request
    }

    /// Registers the success handler.
    pub fn on_success(&self, handler: impl FnOnce(T) + Send + 'static) {
        self.inner.success.set_handler(handler);
    }

    /// Registers the error handler.
    pub fn on_error(&self, handler: impl FnOnce(EngineError) + Send + 'static) {
        self.inner.error.set_handler(handler);
    }

    /// Returns true once the request has succeeded or failed.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.inner.settled.load(Ordering::SeqCst)
    }

    pub(crate) fn succeed(&self, value: T) {
        if !self.inner.settled.swap(true, Ordering::SeqCst) {
            self.inner.error.disarm();
            self.inner.success.fire(value);
        }
    }

    pub(crate) fn fail(&self, error: EngineError) {
        if !self.inner.settled.swap(true, Ordering::SeqCst) {
            self.inner.success.disarm();
            self.inner.error.fire(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn handler_registered_first_receives_event() {
        let slot = EventSlot::new();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        slot.set_handler(move |v: u32| *sink.lock() = Some(v));
        assert!(slot.fire(7));
        assert_eq!(*seen.lock(), Some(7));
    }

    #[test]
    fn event_fired_first_is_held_for_handler() {
        let slot = EventSlot::new();
        assert!(slot.fire(9));
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        slot.set_handler(move |v: u32| *sink.lock() = Some(v));
        assert_eq!(*seen.lock(), Some(9));
    }

    #[test]
    fn second_fire_is_ignored() {
        let slot = EventSlot::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        slot.set_handler(move |_: ()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(slot.fire(()));
        assert!(!slot.fire(()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn request_settles_once() {
        let request: Request<u8> = Request::new();
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let ok_sink = Arc::clone(&outcomes);
        let err_sink = Arc::clone(&outcomes);
        request.on_success(move |v| ok_sink.lock().push(format!("ok:{v}")));
        request.on_error(move |e| err_sink.lock().push(format!("err:{}", e.code())));

        request.succeed(1);
        request.fail(EngineError::ReadOnly);
        request.succeed(2);

        assert!(request.is_settled());
        assert_eq!(*outcomes.lock(), vec!["ok:1".to_string()]);
    }

    #[test]
    fn failed_request_reports_to_late_handler() {
        let request: Request<()> = Request::failed(EngineError::Unavailable);
        let code = Arc::new(Mutex::new(String::new()));
        let sink = Arc::clone(&code);
        request.on_error(move |e| *sink.lock() = e.code().to_string());
        assert_eq!(code.lock().as_str(), "NotSupportedError");
    }
}
