//! Callback registry
//!
//! Maps opaque [`CallbackHandle`]s to managed closures. Native code only ever
//! sees the handle value (as its `void* ctx`), so a late or repeated callback
//! from native code can at worst hit a stale handle, never freed memory.
//!
//! Locking: the handle map and each entry's state have separate mutexes, the
//! map lock is never held while a closure runs, and an entry's state lock is
//! only taken after (never while holding) the map lock is released, except in
//! short critical sections that take them in map → entry order.

use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_void;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, ThreadId};

use crate::codec::{self, Wire};
use crate::types::{BridgeError, FfiResult, Reply, Result};

/// Opaque identifier of a registered callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct CallbackHandle(u64);

impl CallbackHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The handle as the `void* ctx` handed to native code
    ///
    /// The pointer is never dereferenced; it only carries the integer.
    pub fn as_ctx(self) -> *mut c_void {
        self.0 as usize as *mut c_void
    }

    pub fn from_ctx(ctx: *mut c_void) -> Self {
        CallbackHandle(ctx as usize as u64)
    }
}

impl fmt::Display for CallbackHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How many times a registration may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    /// Fires once, then the handle is retired
    SingleShot,
    /// Fires until released or until a terminal payload is delivered
    MultiShot,
}

/// Address of a native object that is only valid while the callback runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeRef(usize);

impl NativeRef {
    pub fn new<T>(ptr: *const T) -> Self {
        NativeRef(ptr as usize)
    }

    pub fn addr(self) -> usize {
        self.0
    }
}

/// Contents of a delivery
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    /// No payload beyond the status
    Empty,
    /// Value encoded with the wire codec
    Wire(Vec<u8>),
    /// Borrowed native object
    Native(NativeRef),
    /// The native data could not be copied into a payload
    Fault(String),
}

/// One delivery from native code to a registered closure
#[derive(Debug, Clone, PartialEq)]
pub struct Payload {
    pub status: FfiResult,
    pub body: Body,
    /// Last delivery for the handle; a multi-shot registration auto-releases
    pub terminal: bool,
}

impl Payload {
    pub fn new(status: FfiResult, body: Body) -> Self {
        Self {
            status,
            body,
            terminal: false,
        }
    }

    pub fn ok(body: Body) -> Self {
        Self::new(FfiResult::ok(), body)
    }

    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Payload carrying an encoded value
    pub fn value<T: Wire>(status: FfiResult, value: &T) -> Self {
        match codec::encode(value) {
            Ok(bytes) => Self::new(status, Body::Wire(bytes)),
            Err(err) => Self::new(status, Body::Fault(err.to_string())),
        }
    }

    /// Decode the payload into the value the typed callback expects
    ///
    /// A non-zero status wins over any body: it is delivered as
    /// `BridgeError::Native`.
    pub fn decode<T: Wire>(&self) -> Reply<T> {
        if !self.status.is_ok() {
            return Err(BridgeError::Native(self.status.clone()));
        }
        match &self.body {
            Body::Wire(bytes) => codec::decode(bytes),
            Body::Empty => codec::decode(&[]),
            Body::Native(_) => Err(BridgeError::Decode(
                "expected a value, got a native reference".to_string(),
            )),
            Body::Fault(reason) => Err(BridgeError::Decode(reason.clone())),
        }
    }
}

/// A type-erased registered closure
pub type Callback = Box<dyn FnMut(Payload) + Send + 'static>;

struct EntryState {
    callback: Option<Callback>,
    /// Parked entries hold deliveries back until armed
    armed: bool,
    /// Thread currently running the closure
    running: Option<ThreadId>,
    released: bool,
}

struct Entry {
    mode: CallbackMode,
    registrar: ThreadId,
    /// Set once a finishing delivery (single-shot or terminal) has claimed the entry
    closing: AtomicBool,
    state: Mutex<EntryState>,
    changed: Condvar,
}

impl Entry {
    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, EntryState>) -> MutexGuard<'a, EntryState> {
        self.changed
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Thread-safe handle → closure map
pub struct CallbackRegistry {
    entries: Mutex<HashMap<CallbackHandle, Arc<Entry>>>,
    next_handle: AtomicU64,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            // 0 is never issued so a null ctx can never match a registration
            next_handle: AtomicU64::new(1),
        }
    }

    /// Process-wide registry that native trampolines resolve handles against
    pub fn global() -> &'static CallbackRegistry {
        static GLOBAL: OnceLock<CallbackRegistry> = OnceLock::new();
        GLOBAL.get_or_init(CallbackRegistry::new)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CallbackHandle, Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a closure that may be invoked immediately
    pub fn register<F>(&self, callback: F, mode: CallbackMode) -> CallbackHandle
    where
        F: FnMut(Payload) + Send + 'static,
    {
        self.insert(Box::new(callback), mode, true)
    }

    /// Register a closure whose deliveries wait until [`arm`](Self::arm)
    ///
    /// Used for asynchronous calls so that a callback can not overtake the
    /// call that set it up.
    pub fn register_parked(&self, callback: Callback, mode: CallbackMode) -> CallbackHandle {
        self.insert(callback, mode, false)
    }

    /// Register an already boxed closure
    pub fn register_boxed(&self, callback: Callback, mode: CallbackMode) -> CallbackHandle {
        self.insert(callback, mode, true)
    }

    fn insert(&self, callback: Callback, mode: CallbackMode, armed: bool) -> CallbackHandle {
        let handle = CallbackHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(Entry {
            mode,
            registrar: thread::current().id(),
            closing: AtomicBool::new(false),
            state: Mutex::new(EntryState {
                callback: Some(callback),
                armed,
                running: None,
                released: false,
            }),
            changed: Condvar::new(),
        });
        self.entries().insert(handle, entry);
        log::trace!("Registered callback {} ({:?}, armed: {})", handle, mode, armed);
        handle
    }

    /// Allow deliveries to a parked registration
    pub fn arm(&self, handle: CallbackHandle) -> Result<()> {
        let entry = self
            .entries()
            .get(&handle)
            .cloned()
            .ok_or(BridgeError::StaleHandle(handle))?;
        let mut state = entry.lock();
        state.armed = true;
        drop(state);
        entry.changed.notify_all();
        Ok(())
    }

    /// Deliver a payload to the closure registered under `handle`
    ///
    /// Single-shot registrations and terminal payloads retire the handle, so
    /// exactly one such delivery can succeed; every later one fails with
    /// `StaleHandle`.
    pub fn invoke(&self, handle: CallbackHandle, payload: Payload) -> Result<()> {
        let (entry, finishing) = {
            let entries = self.entries();
            let entry = entries
                .get(&handle)
                .cloned()
                .ok_or(BridgeError::StaleHandle(handle))?;
            let finishing = entry.mode == CallbackMode::SingleShot || payload.terminal;
            if finishing {
                if entry.closing.swap(true, Ordering::AcqRel) {
                    return Err(BridgeError::StaleHandle(handle));
                }
            } else if entry.closing.load(Ordering::Acquire) {
                return Err(BridgeError::StaleHandle(handle));
            }
            (entry, finishing)
        };

        let me = thread::current().id();
        let mut state = entry.lock();
        loop {
            if state.released {
                return Err(BridgeError::StaleHandle(handle));
            }
            if state.running == Some(me) {
                if finishing {
                    // Rejected, so the claim must not block the real finishing delivery
                    entry.closing.store(false, Ordering::Release);
                }
                return Err(BridgeError::ReentrantInvoke(handle));
            }
            if !state.armed && entry.registrar == me {
                // Waiting here would deadlock on ourselves
                log::warn!(
                    "Callback {} delivered on its registering thread before being armed",
                    handle
                );
                state.armed = true;
            }
            if state.armed && state.running.is_none() {
                break;
            }
            state = entry.wait(state);
        }

        let Some(mut callback) = state.callback.take() else {
            return Err(BridgeError::StaleHandle(handle));
        };
        state.running = Some(me);
        drop(state);

        log::debug!("Invoking callback {} (status {})", handle, payload.status.error_code);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(payload)));

        let mut state = entry.lock();
        state.running = None;
        let retire = finishing || outcome.is_err() || state.released;
        if !retire {
            state.callback = Some(callback);
            drop(state);
            entry.changed.notify_all();
            return Ok(());
        }
        state.released = true;
        drop(state);
        entry.changed.notify_all();

        self.remove_entry(handle, &entry);
        // Dropped outside every lock: the closure's captures may run arbitrary code
        drop(callback);

        match outcome {
            Ok(()) => Ok(()),
            Err(_) => {
                log::error!("Callback {} panicked; registration retired", handle);
                Err(BridgeError::CallbackPanicked(handle))
            }
        }
    }

    fn remove_entry(&self, handle: CallbackHandle, entry: &Arc<Entry>) {
        let mut entries = self.entries();
        if entries
            .get(&handle)
            .is_some_and(|current| Arc::ptr_eq(current, entry))
        {
            entries.remove(&handle);
        }
    }

    /// Release a registration without invoking it
    ///
    /// Idempotent: returns `true` only for the call that actually released
    /// the handle. If the closure is running on another thread, this blocks
    /// until it returns.
    pub fn release(&self, handle: CallbackHandle) -> bool {
        let Some(entry) = self.entries().remove(&handle) else {
            return false;
        };

        let me = thread::current().id();
        let mut state = entry.lock();
        state.released = true;
        let callback = state.callback.take();
        while state.running.is_some() && state.running != Some(me) {
            state = entry.wait(state);
        }
        drop(state);
        entry.changed.notify_all();
        drop(callback);

        log::trace!("Released callback {}", handle);
        true
    }

    pub fn is_registered(&self, handle: CallbackHandle) -> bool {
        self.entries().contains_key(&handle)
    }

    /// Number of live registrations
    pub fn pending(&self) -> usize {
        self.entries().len()
    }

    /// Release every registration, returning how many were live
    pub fn release_all(&self) -> usize {
        let handles: Vec<CallbackHandle> = self.entries().keys().copied().collect();
        handles
            .into_iter()
            .filter(|handle| self.release(*handle))
            .count()
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CallbackRegistry {
    fn drop(&mut self) {
        let leaked = self.release_all();
        if leaked > 0 {
            log::warn!("Callback registry dropped with {} pending registrations", leaked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;
    use std::time::Duration;

    fn counter() -> (Arc<AtomicUsize>, impl FnMut(Payload) + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        (count, move |_payload: Payload| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_single_shot_fires_once() {
        let registry = CallbackRegistry::new();
        let (count, callback) = counter();
        let handle = registry.register(callback, CallbackMode::SingleShot);

        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        let second = registry.invoke(handle, Payload::ok(Body::Empty));

        assert_eq!(second, Err(BridgeError::StaleHandle(handle)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!registry.is_registered(handle));
    }

    #[test]
    fn test_multi_shot_until_terminal() {
        let registry = CallbackRegistry::new();
        let (count, callback) = counter();
        let handle = registry.register(callback, CallbackMode::MultiShot);

        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        assert!(registry.is_registered(handle));

        registry
            .invoke(handle, Payload::ok(Body::Empty).terminal())
            .unwrap();
        assert!(!registry.is_registered(handle));
        assert_eq!(
            registry.invoke(handle, Payload::ok(Body::Empty)),
            Err(BridgeError::StaleHandle(handle))
        );
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = CallbackRegistry::new();
        let (count, callback) = counter();
        let handle = registry.register(callback, CallbackMode::MultiShot);

        assert!(registry.release(handle));
        assert!(!registry.release(handle));
        assert_eq!(
            registry.invoke(handle, Payload::ok(Body::Empty)),
            Err(BridgeError::StaleHandle(handle))
        );
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(registry.pending(), 0);
    }

    #[test]
    fn test_ctx_round_trip() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(|_| {}, CallbackMode::SingleShot);
        assert_eq!(CallbackHandle::from_ctx(handle.as_ctx()), handle);
        assert!(!handle.as_ctx().is_null());
    }

    #[test]
    fn test_multi_shot_preserves_order() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = registry.register(
            move |payload: Payload| {
                let value: u32 = payload.decode().unwrap();
                sink.lock().unwrap().push(value);
            },
            CallbackMode::MultiShot,
        );

        for i in 0..50u32 {
            registry
                .invoke(handle, Payload::value(FfiResult::ok(), &i))
                .unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_parked_delivery_waits_for_arm() {
        let registry = Arc::new(CallbackRegistry::new());
        let (tx, rx) = mpsc::channel();
        let handle = registry.register_parked(
            Box::new(move |_payload| {
                tx.send(()).unwrap();
            }),
            CallbackMode::SingleShot,
        );

        let worker = {
            let registry = registry.clone();
            thread::spawn(move || registry.invoke(handle, Payload::ok(Body::Empty)))
        };

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        registry.arm(handle).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(worker.join().unwrap(), Ok(()));
    }

    #[test]
    fn test_release_of_parked_handle_blocks_delivery() {
        let registry = Arc::new(CallbackRegistry::new());
        let (count, callback) = counter();
        let handle = registry.register_parked(Box::new(callback), CallbackMode::SingleShot);

        let worker = {
            let registry = registry.clone();
            thread::spawn(move || registry.invoke(handle, Payload::ok(Body::Empty)))
        };
        thread::sleep(Duration::from_millis(20));
        assert!(registry.release(handle));

        assert_eq!(worker.join().unwrap(), Err(BridgeError::StaleHandle(handle)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_release_waits_for_in_flight_invoke() {
        let registry = Arc::new(CallbackRegistry::new());
        let (entered_tx, entered_rx) = mpsc::channel();
        let finished = Arc::new(AtomicBool::new(false));
        let done = finished.clone();
        let handle = registry.register(
            move |_payload: Payload| {
                entered_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(50));
                done.store(true, Ordering::SeqCst);
            },
            CallbackMode::MultiShot,
        );

        let worker = {
            let registry = registry.clone();
            thread::spawn(move || registry.invoke(handle, Payload::ok(Body::Empty)))
        };
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        assert!(registry.release(handle));
        assert!(finished.load(Ordering::SeqCst));
        worker.join().unwrap().unwrap();
    }

    #[test]
    fn test_concurrent_register_unique_handles() {
        let registry = Arc::new(CallbackRegistry::new());
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || {
                    (0..200)
                        .map(|_| registry.register(|_| {}, CallbackMode::SingleShot))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all = HashSet::new();
        for worker in workers {
            for handle in worker.join().unwrap() {
                assert!(all.insert(handle), "duplicate handle {}", handle);
            }
        }
        assert_eq!(all.len(), 1600);
        assert_eq!(registry.pending(), 1600);
    }

    #[test]
    fn test_concurrent_invoke_and_release_never_double_invokes() {
        for _ in 0..50 {
            let registry = Arc::new(CallbackRegistry::new());
            let (count, callback) = counter();
            let handle = registry.register(callback, CallbackMode::SingleShot);

            let invokers: Vec<_> = (0..4)
                .map(|_| {
                    let registry = registry.clone();
                    thread::spawn(move || registry.invoke(handle, Payload::ok(Body::Empty)).is_ok())
                })
                .collect();
            let releaser = {
                let registry = registry.clone();
                thread::spawn(move || registry.release(handle))
            };

            let fired = invokers
                .into_iter()
                .map(|worker| worker.join().unwrap())
                .filter(|ok| *ok)
                .count();
            releaser.join().unwrap();

            assert!(fired <= 1);
            assert_eq!(count.load(Ordering::SeqCst), fired);
            assert!(!registry.is_registered(handle));
        }
    }

    #[test]
    fn test_reentrant_invoke_rejected() {
        let registry = Arc::new(CallbackRegistry::new());
        let (tx, rx) = mpsc::channel();
        let inner = registry.clone();
        let slot: Arc<Mutex<Option<CallbackHandle>>> = Arc::new(Mutex::new(None));
        let own = slot.clone();
        let handle = registry.register(
            move |_payload: Payload| {
                let handle = own.lock().unwrap().unwrap();
                tx.send(inner.invoke(handle, Payload::ok(Body::Empty))).unwrap();
            },
            CallbackMode::MultiShot,
        );
        *slot.lock().unwrap() = Some(handle);

        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        assert_eq!(rx.recv().unwrap(), Err(BridgeError::ReentrantInvoke(handle)));
        assert!(registry.release(handle));
    }

    #[test]
    fn test_rejected_reentrant_terminal_keeps_stream_open() {
        let registry = Arc::new(CallbackRegistry::new());
        let (tx, rx) = mpsc::channel();
        let inner = registry.clone();
        let slot: Arc<Mutex<Option<CallbackHandle>>> = Arc::new(Mutex::new(None));
        let own = slot.clone();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let handle = registry.register(
            move |payload: Payload| {
                seen.fetch_add(1, Ordering::SeqCst);
                if !payload.terminal {
                    let handle = own.lock().unwrap().unwrap();
                    let nested = inner.invoke(handle, Payload::ok(Body::Empty).terminal());
                    tx.send(nested).unwrap();
                }
            },
            CallbackMode::MultiShot,
        );
        *slot.lock().unwrap() = Some(handle);

        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        assert_eq!(rx.recv().unwrap(), Err(BridgeError::ReentrantInvoke(handle)));
        assert!(registry.is_registered(handle));

        // The real terminal delivery still goes through and retires the handle
        registry.invoke(handle, Payload::ok(Body::Empty).terminal()).unwrap();
        assert!(!registry.is_registered(handle));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_self_release_inside_callback() {
        let registry = Arc::new(CallbackRegistry::new());
        let inner = registry.clone();
        let slot: Arc<Mutex<Option<CallbackHandle>>> = Arc::new(Mutex::new(None));
        let own = slot.clone();
        let handle = registry.register(
            move |_payload: Payload| {
                let handle = own.lock().unwrap().unwrap();
                assert!(inner.release(handle));
            },
            CallbackMode::MultiShot,
        );
        *slot.lock().unwrap() = Some(handle);

        registry.invoke(handle, Payload::ok(Body::Empty)).unwrap();
        assert!(!registry.is_registered(handle));
    }

    #[test]
    fn test_panicking_callback_is_contained() {
        let registry = CallbackRegistry::new();
        let handle = registry.register(
            |_payload: Payload| panic!("callback failure"),
            CallbackMode::MultiShot,
        );

        assert_eq!(
            registry.invoke(handle, Payload::ok(Body::Empty)),
            Err(BridgeError::CallbackPanicked(handle))
        );
        assert!(!registry.is_registered(handle));
    }

    #[test]
    fn test_payload_decode_prefers_status() {
        let payload = Payload::value(FfiResult::error(-11, "Invalid signature"), &5i32);
        assert_eq!(payload.decode::<i32>().unwrap_err().native_code(), Some(-11));

        let payload = Payload::value(FfiResult::ok(), &5i32);
        assert_eq!(payload.decode::<i32>(), Ok(5));

        let payload = Payload::ok(Body::Fault("bad".into()));
        assert!(matches!(payload.decode::<()>(), Err(BridgeError::Decode(_))));
    }
}
