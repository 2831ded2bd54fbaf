//! Thread-safe log of callback deliveries
//!
//! Callbacks run on native worker threads; each one records what it received
//! together with when and where it ran.

use chrono::{DateTime, Utc};
use ffi_bridge::Reply;
use serde::Serialize;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

/// One observed callback invocation
#[derive(Debug, Clone, Serialize)]
pub struct Delivery {
    pub at: DateTime<Utc>,
    pub label: String,
    pub thread: String,
    pub ok: bool,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct Recorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, label: &str, ok: bool, value: String) {
        let current = thread::current();
        let delivery = Delivery {
            at: Utc::now(),
            label: label.to_string(),
            thread: current
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{:?}", current.id())),
            ok,
            value,
        };
        log::debug!("{} [{}]: {}", delivery.label, delivery.thread, delivery.value);
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(delivery);
    }

    /// Record a reply as received by a callback
    pub fn record_reply<T: Debug>(&self, label: &str, reply: &Reply<T>) {
        match reply {
            Ok(value) => self.push(label, true, format!("{:?}", value)),
            Err(err) => self.push(label, false, err.to_string()),
        }
    }

    /// Record a note that is not tied to a reply
    pub fn note(&self, label: &str, text: impl Into<String>) {
        self.push(label, true, text.into());
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.deliveries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
