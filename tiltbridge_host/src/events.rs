//! One-way notifications from the workers to whoever is displaying them.

use std::fmt::Display;
use std::sync::{Arc, Mutex, PoisonError};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{error, warn};
use serde::Serialize;
use tiltbridge_common::cmd::PlatformAck;

/// Queue depth per platform observer before events are dropped.
pub const OBSERVER_CAPACITY: usize = 64;

/// Producer side of a one-slot channel. An unread value is replaced by the
/// newer one, so the producer never waits on the consumer.
pub struct LatestSender<T> {
    tx: Sender<T>,
    drain: Receiver<T>,
}

pub fn latest<T>() -> (LatestSender<T>, Receiver<T>) {
    let (tx, rx) = bounded(1);
    (
        LatestSender {
            tx,
            drain: rx.clone(),
        },
        rx,
    )
}

impl<T> LatestSender<T> {
    pub fn publish(&self, value: T) {
        let mut value = value;
        loop {
            match self.tx.try_send(value) {
                Ok(()) => return,
                Err(TrySendError::Full(v)) => {
                    // stale value nobody picked up
                    let _ = self.drain.try_recv();
                    value = v;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlatformEvent {
    MoveDone,
    ZeroDone,
    Disconnected,
}

impl From<PlatformAck> for PlatformEvent {
    fn from(ack: PlatformAck) -> Self {
        match ack {
            PlatformAck::MoveDone => PlatformEvent::MoveDone,
            PlatformAck::ZeroDone => PlatformEvent::ZeroDone,
        }
    }
}

impl Display for PlatformEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PlatformEvent::MoveDone => "move done",
            PlatformEvent::ZeroDone => "all coordinates are zero",
            PlatformEvent::Disconnected => "platform disconnected",
        };
        write!(f, "{}", text)
    }
}

/// Fan-out of platform events. Every observer sees every event unless its
/// queue is full, in which case that observer misses it.
#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<Mutex<Vec<Sender<PlatformEvent>>>>,
}

impl EventBus {
    pub fn subscribe(&self) -> Receiver<PlatformEvent> {
        let (tx, rx) = bounded(OBSERVER_CAPACITY);
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, event: PlatformEvent) {
        let mut observers = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        observers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Observer queue full, dropped {:?}", event);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        });
    }

    #[cfg(test)]
    pub fn observer_count(&self) -> usize {
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[derive(Serialize)]
pub struct EmitEvent<'a, T: Serialize> {
    pub event: &'a str,
    pub data: &'a T,
}

/// Print one event line, either as JSON or as plain text.
pub fn emit<T: Serialize + Display>(event: &str, data: &T, json: bool) {
    if !json {
        println!("{}: {}", event, data);
        return;
    }
    match serde_json::to_string(&EmitEvent { event, data }) {
        Ok(line) => println!("{}", line),
        Err(e) => error!("Error serializing {} event: {}", event, e),
    }
}
