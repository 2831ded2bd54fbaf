//! Ownership tracking for native-resident objects
//!
//! Record types that live in native memory are never read through a bare
//! pointer. They are registered here and accessed through an [`ObjectHandle`],
//! so a handle that outlives its object is detected (`UseAfterFree`) instead of
//! reading freed memory, and an Owned object can only be finalized once.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{BridgeError, Result};

/// Who is responsible for freeing a native object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Valid only while the native call or callback that produced it runs
    Borrowed,
    /// The managed side must release it exactly once
    Owned,
}

/// A native record type that crosses the bridge by reference
pub trait NativeObject {
    /// Name used in logs
    const KIND: &'static str;
    const POLICY: Policy;
}

/// Identifier of a tracked native object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectHandle(u64);

impl ObjectHandle {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj#{}", self.0)
    }
}

type Finalizer = Box<dyn FnOnce(usize) + Send + 'static>;

struct Slot {
    kind: &'static str,
    policy: Policy,
    addr: usize,
    finalizer: Option<Finalizer>,
}

/// Registry of live native objects
pub struct OwnershipTracker {
    live: Mutex<HashMap<ObjectHandle, Slot>>,
    next_handle: AtomicU64,
}

impl OwnershipTracker {
    pub fn new() -> Self {
        Self {
            live: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    fn live(&self) -> MutexGuard<'_, HashMap<ObjectHandle, Slot>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert(&self, slot: Slot) -> ObjectHandle {
        let handle = ObjectHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        log::trace!("Tracking {} {} as {:?}", slot.kind, handle, slot.policy);
        self.live().insert(handle, slot);
        handle
    }

    /// Take ownership of a native object; `finalizer` frees it on release
    pub fn adopt<T: NativeObject>(
        &self,
        addr: usize,
        finalizer: impl FnOnce(usize) + Send + 'static,
    ) -> ObjectHandle {
        debug_assert_eq!(T::POLICY, Policy::Owned, "{} is not an owned type", T::KIND);
        self.insert(Slot {
            kind: T::KIND,
            policy: Policy::Owned,
            addr,
            finalizer: Some(Box::new(finalizer)),
        })
    }

    /// Track a native object borrowed for the duration of a callback
    pub fn lend<T: NativeObject>(&self, addr: usize) -> ObjectHandle {
        debug_assert_eq!(T::POLICY, Policy::Borrowed, "{} is not a borrowed type", T::KIND);
        self.insert(Slot {
            kind: T::KIND,
            policy: Policy::Borrowed,
            addr,
            finalizer: None,
        })
    }

    fn missing(
        &self,
        handle: ObjectHandle,
        retired: fn(ObjectHandle) -> BridgeError,
    ) -> BridgeError {
        if handle.0 != 0 && handle.0 < self.next_handle.load(Ordering::Relaxed) {
            retired(handle)
        } else {
            BridgeError::UnknownObject(handle)
        }
    }

    /// Run `f` with the object's address while it is guaranteed to stay live
    ///
    /// `f` runs under the tracker lock and must not call back into the tracker.
    pub fn with_live<R>(&self, handle: ObjectHandle, f: impl FnOnce(usize) -> R) -> Result<R> {
        let live = self.live();
        match live.get(&handle) {
            Some(slot) => Ok(f(slot.addr)),
            None => {
                drop(live);
                Err(self.missing(handle, BridgeError::UseAfterFree))
            }
        }
    }

    /// Address of a live object
    pub fn addr(&self, handle: ObjectHandle) -> Result<usize> {
        self.with_live(handle, |addr| addr)
    }

    /// End a borrow; later access through `handle` fails with `UseAfterFree`
    pub fn end_borrow(&self, handle: ObjectHandle) -> Result<()> {
        let mut live = self.live();
        match live.get(&handle).map(|slot| slot.policy) {
            Some(Policy::Borrowed) => {
                live.remove(&handle);
                Ok(())
            }
            Some(Policy::Owned) => {
                log::warn!("end_borrow on owned object {}; ignored", handle);
                Ok(())
            }
            None => {
                drop(live);
                Err(self.missing(handle, BridgeError::UseAfterFree))
            }
        }
    }

    /// Finalize an Owned object
    pub fn release(&self, handle: ObjectHandle) -> Result<()> {
        let slot = {
            let mut live = self.live();
            match live.get(&handle).map(|slot| slot.policy) {
                Some(Policy::Owned) => live.remove(&handle),
                Some(Policy::Borrowed) => return Err(BridgeError::NotOwned(handle)),
                None => {
                    drop(live);
                    return Err(self.missing(handle, BridgeError::DoubleFree));
                }
            }
        };

        if let Some(mut slot) = slot {
            if let Some(finalizer) = slot.finalizer.take() {
                finalizer(slot.addr);
            }
            log::trace!("Released {} {}", slot.kind, handle);
        }
        Ok(())
    }

    pub fn is_live(&self, handle: ObjectHandle) -> bool {
        self.live().contains_key(&handle)
    }

    /// Number of tracked objects
    pub fn live_count(&self) -> usize {
        self.live().len()
    }
}

impl Default for OwnershipTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for OwnershipTracker {
    fn drop(&mut self) {
        let live = std::mem::take(&mut *self.live());
        for (handle, mut slot) in live {
            if let Some(finalizer) = slot.finalizer.take() {
                log::warn!("Owned {} {} leaked; finalizing on tracker drop", slot.kind, handle);
                finalizer(slot.addr);
            }
        }
    }
}
