//! Completion tracking for asynchronous calls
//!
//! A [`Latch`] counts outstanding [`LatchToken`]s. The bridge moves one token
//! into every closure it registers, so the latch opens once every registration
//! of a call has been retired (fired, released, or contained after a panic).

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::registry::{CallbackHandle, CallbackRegistry};
use crate::types::{BridgeError, Result};

struct LatchState {
    remaining: Mutex<usize>,
    settled: Condvar,
}

impl LatchState {
    fn remaining(&self) -> MutexGuard<'_, usize> {
        self.remaining.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Count-down latch opened by dropping its tokens
#[derive(Clone)]
pub struct Latch {
    state: Arc<LatchState>,
}

impl Latch {
    pub fn new() -> Self {
        Self {
            state: Arc::new(LatchState {
                remaining: Mutex::new(0),
                settled: Condvar::new(),
            }),
        }
    }

    /// Hold the latch closed until the returned token is dropped
    pub fn token(&self) -> LatchToken {
        *self.state.remaining() += 1;
        LatchToken {
            state: self.state.clone(),
        }
    }

    pub fn is_open(&self) -> bool {
        *self.state.remaining() == 0
    }

    /// Block until every token is dropped or `timeout` elapses
    ///
    /// Returns `true` if the latch opened.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.state.remaining();
        let (guard, _) = self
            .state
            .settled
            .wait_timeout_while(guard, timeout, |remaining| *remaining > 0)
            .unwrap_or_else(PoisonError::into_inner);
        *guard == 0
    }
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Latch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Latch")
            .field("remaining", &*self.state.remaining())
            .finish()
    }
}

/// One outstanding unit of a [`Latch`]
pub struct LatchToken {
    state: Arc<LatchState>,
}

impl Drop for LatchToken {
    fn drop(&mut self) {
        let mut remaining = self.state.remaining();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.state.settled.notify_all();
        }
    }
}

/// A native call that has been accepted and whose callbacks may still fire
///
/// Dropping a `PendingCall` does not cancel it; the callbacks still run when
/// native code delivers them.
#[must_use = "a pending call should be waited on or cancelled"]
pub struct PendingCall {
    entry: &'static str,
    handles: Vec<CallbackHandle>,
    latch: Latch,
    registry: &'static CallbackRegistry,
    default_timeout: Duration,
}

impl PendingCall {
    pub(crate) fn new(
        entry: &'static str,
        handles: Vec<CallbackHandle>,
        latch: Latch,
        registry: &'static CallbackRegistry,
        default_timeout: Duration,
    ) -> Self {
        Self {
            entry,
            handles,
            latch,
            registry,
            default_timeout,
        }
    }

    /// Native entry point this call went through
    pub fn entry(&self) -> &'static str {
        self.entry
    }

    /// Handles of the registrations backing this call
    pub fn handles(&self) -> &[CallbackHandle] {
        &self.handles
    }

    /// True once every registration of the call has been retired
    pub fn is_settled(&self) -> bool {
        self.latch.is_open()
    }

    /// Wait for the call to settle, failing with `Timeout` after `timeout`
    pub fn wait(&self, timeout: Duration) -> Result<()> {
        let started = Instant::now();
        if self.latch.wait(timeout) {
            log::debug!("{} settled after {:?}", self.entry, started.elapsed());
            return Ok(());
        }
        Err(BridgeError::Timeout {
            entry: self.entry.to_string(),
            waited_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
    }

    /// Wait using the bridge's configured callback timeout
    pub fn wait_default(&self) -> Result<()> {
        self.wait(self.default_timeout)
    }

    /// Release every registration that has not fired yet
    ///
    /// Returns how many registrations were released. Callbacks already
    /// running are allowed to finish first.
    pub fn cancel(self) -> usize {
        let released = self
            .handles
            .iter()
            .filter(|handle| self.registry.release(**handle))
            .count();
        if released > 0 {
            log::info!("Cancelled {} ({} registrations released)", self.entry, released);
        }
        released
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("entry", &self.entry)
            .field("handles", &self.handles)
            .field("settled", &self.is_settled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Body, CallbackMode, Payload};
    use std::thread;

    #[test]
    fn test_latch_opens_when_tokens_drop() {
        let latch = Latch::new();
        assert!(latch.is_open());

        let first = latch.token();
        let second = latch.token();
        assert!(!latch.wait(Duration::from_millis(10)));

        drop(first);
        assert!(!latch.is_open());
        let worker = thread::spawn(move || drop(second));
        assert!(latch.wait(Duration::from_secs(5)));
        worker.join().unwrap();
    }

    #[test]
    fn test_pending_call_settles_after_invoke() {
        let registry = CallbackRegistry::global();
        let latch = Latch::new();
        let token = latch.token();
        let handle = registry.register(
            move |_payload: Payload| {
                let _held = &token;
            },
            CallbackMode::SingleShot,
        );
        let call = PendingCall::new("test", vec![handle], latch, registry, Duration::from_secs(5));

        assert!(!call.is_settled());
        assert!(matches!(
            call.wait(Duration::from_millis(10)),
            Err(BridgeError::Timeout { waited_ms: 10, .. })
        ));

        let worker = thread::spawn(move || registry.invoke(handle, Payload::ok(Body::Empty)));
        call.wait_default().unwrap();
        assert!(call.is_settled());
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_cancel_releases_unfired() {
        let registry = CallbackRegistry::global();
        let latch = Latch::new();
        let token = latch.token();
        let handle = registry.register(
            move |_payload: Payload| {
                let _held = &token;
            },
            CallbackMode::MultiShot,
        );
        let timeout = Duration::from_secs(5);
        let call = PendingCall::new("test", vec![handle], latch.clone(), registry, timeout);

        assert_eq!(call.cancel(), 1);
        assert!(latch.is_open());
        assert!(!registry.is_registered(handle));
    }
}
