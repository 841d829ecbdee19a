//! In-process subscriber bus for decoded worker events.
//!
//! The stream handler is the only publisher; anything interested in a worker
//! registers a [`Subscriber`] before the handler starts. Dispatch is
//! synchronous and in decode order. A failing subscriber never prevents
//! delivery to the remaining subscribers, and the failure is reported to the
//! publisher rather than thrown past it.

use std::sync::RwLock;

use crate::bridge::protocol::{BootstrapRecord, WorkerEvent};
use crate::handler::WorkerStdin;

/// A message published on the bus.
#[derive(Debug, Clone)]
pub enum BusMessage {
    /// The handshake record, published once, before any other message.
    Bootstrap(BootstrapRecord),

    /// Synthesized for each decoded idle event; replaces the raw event.
    Idle(IdleSignal),

    /// Every other decoded event, forwarded unchanged.
    Event(WorkerEvent),
}

/// Worker-is-ready notification, enriched with a reply handle.
///
/// Subscribers hand the worker new work through [`IdleSignal::stdin`].
#[derive(Debug, Clone)]
pub struct IdleSignal {
    pub stdin: WorkerStdin,
}

/// A bus consumer. Errors returned here are collected by [`EventBus::post`];
/// they never disturb other subscribers or the event stream.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, msg: &BusMessage) -> anyhow::Result<()>;
}

/// One or more subscribers failed while handling a message. Delivery to the
/// remaining subscribers still happened.
#[derive(Debug, thiserror::Error)]
#[error("{failed} of {total} subscribers failed; first error: {first:#}")]
pub struct DispatchError {
    pub failed: usize,
    pub total: usize,
    pub first: anyhow::Error,
}

/// Fan-out dispatcher for [`BusMessage`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Box<dyn Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriber: Box<dyn Subscriber>) {
        match self.subscribers.write() {
            Ok(mut subscribers) => subscribers.push(subscriber),
            Err(poisoned) => poisoned.into_inner().push(subscriber),
        }
    }

    /// Deliver a message to every subscriber in registration order.
    ///
    /// All subscribers see the message even when earlier ones fail; the
    /// first failure is reported in the returned [`DispatchError`].
    pub fn post(&self, msg: &BusMessage) -> Result<(), DispatchError> {
        let subscribers = match self.subscribers.read() {
            Ok(subscribers) => subscribers,
            Err(poisoned) => poisoned.into_inner(),
        };

        let total = subscribers.len();
        let mut failed = 0;
        let mut first = None;
        for subscriber in subscribers.iter() {
            if let Err(e) = subscriber.on_message(msg) {
                failed += 1;
                if first.is_none() {
                    first = Some(e);
                }
            }
        }

        match first {
            None => Ok(()),
            Some(first) => Err(DispatchError {
                failed,
                total,
                first,
            }),
        }
    }
}
