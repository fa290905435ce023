use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;

use parking_lot::RwLock;

use super::events::InboundEvent;
use super::queue::EventQueue;
use super::registry::Handle;
use super::state::{PortState, PubSubState};
use crate::error::{BridgeError, BridgeResult};
use crate::framework::prelude::*;

/// What the consumer is told after an event has been queued or a resource
/// changed state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    Event(InboundEvent),
    PortState { port: Handle, state: PortState },
    PubSubState(PubSubState),
}

pub type NotifyFn = dyn Fn(&Notification) + Send + Sync;

/// The consumer's side of the notification. A channel keeps the consumer in
/// charge of when it looks; a callback runs on the producer's thread and must
/// not block.
pub enum Notifier {
    Channel(mpsc::Sender<Notification>),
    Callback(Box<NotifyFn>),
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Notifier::Channel(tx), rx)
    }

    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        Notifier::Callback(Box::new(f))
    }

    fn notify(&self, notification: &Notification) -> BridgeResult<()> {
        match self {
            Notifier::Channel(tx) => {
                tx.send(notification.clone()).map_err(|_| {
                    BridgeError::NotificationFailure(
                        "consumer channel is closed".to_string(),
                    )
                })
            }
            Notifier::Callback(f) => {
                panic::catch_unwind(AssertUnwindSafe(|| f(notification)))
                    .map_err(|payload| {
                        BridgeError::NotificationFailure(panic_message(
                            payload.as_ref(),
                        ))
                    })
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "consumer callback panicked".to_string()
    }
}

/// Turns producer callbacks into queued events plus a best-effort
/// notification. Cloned into every producer; all clones share one notifier.
#[derive(Clone, Default)]
pub struct CallbackBridge {
    notifier: Arc<RwLock<Option<Arc<Notifier>>>>,
    failures: Arc<AtomicU64>,
    skipped: Arc<AtomicU64>,
}

impl CallbackBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, notifier: Notifier) -> Option<Arc<Notifier>> {
        info!("consumer notifier attached");
        self.notifier.write().replace(Arc::new(notifier))
    }

    pub fn detach(&self) -> Option<Arc<Notifier>> {
        self.notifier.write().take()
    }

    pub fn is_attached(&self) -> bool {
        self.notifier.read().is_some()
    }

    /// Enqueues `event` and notifies the consumer. Returns false when the
    /// queue was closed and the event was dropped.
    pub fn deliver(
        &self,
        queue: &EventQueue<InboundEvent>,
        event: InboundEvent,
    ) -> bool {
        trace!("delivering {} event: {:?}", event.label(), event);

        if !queue.enqueue(event.clone()) {
            debug!("dropping {} event for a closed resource", event.label());
            return false;
        }

        self.notify(&Notification::Event(event));
        true
    }

    /// One-shot notification. Never fails: a missing notifier is recorded
    /// and skipped, a failing one is caught and logged. The notifier runs
    /// outside the lock so it may attach or detach.
    pub fn notify(&self, notification: &Notification) {
        let notifier = self.notifier.read().clone();

        let Some(notifier) = notifier else {
            self.skipped.fetch_add(1, Ordering::Relaxed);
            warn_once!(
                "consumer is not initialized; notifications are skipped \
                and events stay queued for polling"
            );
            return;
        };

        if let Err(err) = notifier.notify(notification) {
            self.failures.fetch_add(1, Ordering::Relaxed);
            error!("{}", err);
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
