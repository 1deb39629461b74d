//! Helper utils used in project.

use std::{cell::RefCell, fmt, future::Future, rc::Rc};

use derive_more::From;
use futures::{
    channel::mpsc,
    future::{self, AbortHandle},
    stream::LocalBoxStream,
    FutureExt as _,
};

use crate::platform;

/// Wrapper around [`AbortHandle`] which aborts [`Future`] on [`Drop`].
#[derive(Debug, From)]
pub struct TaskHandle(AbortHandle);

impl TaskHandle {
    /// Spawns the provided [`Future`] with [`platform::spawn`] and returns
    /// the [`TaskHandle`] owning it.
    pub fn spawn<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + 'static,
    {
        let (fut, abort) = future::abortable(fut);
        platform::spawn(fut.map(drop));
        Self(abort)
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Sender of events to a single subscriber.
///
/// Creating new subscription invalidates the previous one. Events are not
/// saved or buffered at sending side, so a subscriber won't receive any
/// events happened before the subscription was made.
pub struct EventSender<T>(Rc<RefCell<Option<mpsc::UnboundedSender<T>>>>);

impl<T> EventSender<T> {
    /// Returns new [`EventSender`] without a subscriber.
    pub fn new() -> Self {
        Self(Rc::default())
    }

    /// Tries to send the provided event to the subscriber.
    ///
    /// If no one is subscribed, does nothing.
    pub fn send_event(&self, event: T) {
        if let Some(tx) = self.0.borrow().as_ref() {
            let _ = tx.unbounded_send(event);
        }
    }

    /// Drops the current subscription, ending its stream.
    pub fn close(&self) {
        drop(self.0.borrow_mut().take());
    }
}

impl<T: 'static> EventSender<T> {
    /// Returns stream of the sent events, invalidating previous subscription.
    pub fn subscribe(&self) -> LocalBoxStream<'static, T> {
        let (tx, rx) = mpsc::unbounded();
        drop(self.0.borrow_mut().replace(tx));
        Box::pin(rx)
    }
}

impl<T> Default for EventSender<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T> fmt::Debug for EventSender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSender")
            .field("subscribed", &self.0.borrow().is_some())
            .finish()
    }
}
