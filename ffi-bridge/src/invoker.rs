//! Bridge invoker
//!
//! [`Bridge::call`] is the single path by which a managed caller reaches a
//! native entry point: register the callback, hand native code the handle as
//! its `ctx`, map the returned status, and settle the registration according
//! to the entry point's dispatch.

use std::fmt;
use std::os::raw::c_void;
use std::sync::Arc;

use crate::completion::{Latch, PendingCall};
use crate::config::BridgeConfig;
use crate::native::{abi, sys};
use crate::ownership::OwnershipTracker;
use crate::registry::{Callback, CallbackHandle, CallbackMode, CallbackRegistry};
use crate::types::{BridgeError, Result};

/// When the native side invokes the callback relative to the call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// On the calling thread, before the native function returns
    Sync,
    /// On a native worker thread, after the native function returns
    Async,
}

/// Native functions reachable through the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryPoint {
    RegisterApp,
    GetAppId,
    GetAppName,
    GetAppKey,
    RandomNumbers,
    RandomKeys,
    GetAppInfo,
    CreateAccount,
    CreateAccountEvents,
    VerifySignature,
    VerifyKeys,
    WithString,
    WithStringAsync,
    OnAuthRequest,
}

impl EntryPoint {
    pub const ALL: [EntryPoint; 14] = [
        EntryPoint::RegisterApp,
        EntryPoint::GetAppId,
        EntryPoint::GetAppName,
        EntryPoint::GetAppKey,
        EntryPoint::RandomNumbers,
        EntryPoint::RandomKeys,
        EntryPoint::GetAppInfo,
        EntryPoint::CreateAccount,
        EntryPoint::CreateAccountEvents,
        EntryPoint::VerifySignature,
        EntryPoint::VerifyKeys,
        EntryPoint::WithString,
        EntryPoint::WithStringAsync,
        EntryPoint::OnAuthRequest,
    ];

    /// Native symbol name
    pub fn name(self) -> &'static str {
        match self {
            EntryPoint::RegisterApp => "register_app",
            EntryPoint::GetAppId => "get_app_id",
            EntryPoint::GetAppName => "get_app_name",
            EntryPoint::GetAppKey => "get_app_key",
            EntryPoint::RandomNumbers => "random_numbers",
            EntryPoint::RandomKeys => "random_keys",
            EntryPoint::GetAppInfo => "get_app_info",
            EntryPoint::CreateAccount => "create_account",
            EntryPoint::CreateAccountEvents => "create_account_events",
            EntryPoint::VerifySignature => "verify_signature",
            EntryPoint::VerifyKeys => "verify_keys",
            EntryPoint::WithString => "backend_with_string",
            EntryPoint::WithStringAsync => "backend_with_string_async",
            EntryPoint::OnAuthRequest => "backend_on_auth_request",
        }
    }

    pub fn dispatch(self) -> Dispatch {
        match self {
            EntryPoint::WithString => Dispatch::Sync,
            _ => Dispatch::Async,
        }
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Releases a registration on every exit path unless disarmed
struct ReleaseGuard {
    registry: &'static CallbackRegistry,
    handle: CallbackHandle,
    armed: bool,
}

impl ReleaseGuard {
    fn new(registry: &'static CallbackRegistry, handle: CallbackHandle) -> Self {
        Self {
            registry,
            handle,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.armed && self.registry.release(self.handle) {
            log::debug!("Released callback {} without invocation", self.handle);
        }
    }
}

/// Managed front end of the native backend
pub struct Bridge {
    config: BridgeConfig,
    registry: &'static CallbackRegistry,
    tracker: Arc<OwnershipTracker>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            registry: CallbackRegistry::global(),
            tracker: Arc::new(OwnershipTracker::new()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Registry native callbacks are routed through
    pub fn registry(&self) -> &'static CallbackRegistry {
        self.registry
    }

    pub fn tracker(&self) -> &Arc<OwnershipTracker> {
        &self.tracker
    }

    /// Invoke a native entry point with a registered callback
    ///
    /// `native` receives the `ctx` to pass along and performs the raw call.
    /// Arguments must already be lowered: once this is entered the only
    /// failures left are the native status and the callback's own outcome.
    pub fn call<N>(
        &self,
        entry: EntryPoint,
        callback: Callback,
        mode: CallbackMode,
        native: N,
    ) -> Result<PendingCall>
    where
        N: FnOnce(*mut c_void) -> sys::FfiResult,
    {
        let latch = Latch::new();
        let token = latch.token();
        let trace = self.config.log_payloads;
        let mut callback = callback;
        let tracked: Callback = Box::new(move |payload| {
            let _settles_on_drop = &token;
            if trace {
                log::trace!("Payload for {}: {:?}", entry, payload);
            }
            callback(payload)
        });

        let dispatch = entry.dispatch();
        let handle = match dispatch {
            Dispatch::Sync => self.registry.register_boxed(tracked, mode),
            Dispatch::Async => self.registry.register_parked(tracked, mode),
        };
        let guard = ReleaseGuard::new(self.registry, handle);

        log::info!("Calling {} with callback {}", entry, handle);
        let raw = native(handle.as_ctx());
        // SAFETY: the backend returns static (or null) error strings
        let status = unsafe { abi::lift_status_value(&raw) };
        if !status.is_ok() {
            log::warn!("{} rejected the call: {}", entry, status);
            return Err(BridgeError::Native(status));
        }

        match dispatch {
            Dispatch::Sync => {
                if self.registry.is_registered(handle) {
                    if self.config.release_unfired_sync {
                        log::warn!("{} returned without settling callback {}", entry, handle);
                        drop(guard);
                    } else {
                        guard.disarm();
                    }
                } else {
                    guard.disarm();
                }
            }
            Dispatch::Async => {
                if let Err(err) = self.registry.arm(handle) {
                    log::debug!("{}: callback settled before arming ({})", entry, err);
                }
                guard.disarm();
            }
        }

        Ok(PendingCall::new(
            entry.name(),
            vec![handle],
            latch,
            self.registry,
            self.config.callback_timeout(),
        ))
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}
