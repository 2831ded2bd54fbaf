//! Typed bindings, one per native entry point
//!
//! Every binding lowers its arguments first (so an encoding failure never
//! reaches native code), then goes through [`Bridge::call`]. Callbacks receive
//! a [`Reply`]: the decoded value, or the error the backend reported.

use std::fmt;
use std::sync::Arc;

use crate::codec::Wire;
use crate::completion::PendingCall;
use crate::invoker::{Bridge, EntryPoint};
use crate::native::{self, abi, sys, trampolines};
use crate::ownership::{NativeObject, ObjectHandle, OwnershipTracker, Policy};
use crate::registry::{Body, Callback, CallbackMode, Payload};
use crate::types::{
    AppInfo, AuthRequestInfo, AuthResponse, BridgeError, Event, FfiResult, Key, Reply, Result,
};

impl NativeObject for sys::AuthReq {
    const KIND: &'static str = "AuthReq";
    const POLICY: Policy = Policy::Owned;
}

impl NativeObject for sys::AuthResp {
    const KIND: &'static str = "AuthResp";
    const POLICY: Policy = Policy::Borrowed;
}

/// Adapt a one-shot typed callback to the registry's closure type
fn once<T, F>(on_reply: F) -> Callback
where
    T: Wire + 'static,
    F: FnOnce(Reply<T>) + Send + 'static,
{
    let mut on_reply = Some(on_reply);
    Box::new(move |payload: Payload| {
        if let Some(on_reply) = on_reply.take() {
            on_reply(payload.decode::<T>());
        }
    })
}

impl Bridge {
    pub fn register_app<F>(&self, app: &AppInfo, on_done: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<()>) + Send + 'static,
    {
        let app = abi::lower_app_info(app)?;
        self.call(
            EntryPoint::RegisterApp,
            once(on_done),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::register_app(app.as_ptr(), ctx, Some(trampolines::unit_cb)) },
        )
    }

    pub fn get_app_id<F>(&self, app: &AppInfo, on_id: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<i32>) + Send + 'static,
    {
        let app = abi::lower_app_info(app)?;
        self.call(
            EntryPoint::GetAppId,
            once(on_id),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::get_app_id(app.as_ptr(), ctx, Some(trampolines::i32_cb)) },
        )
    }

    pub fn get_app_name<F>(&self, app: &AppInfo, on_name: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<String>) + Send + 'static,
    {
        let app = abi::lower_app_info(app)?;
        self.call(
            EntryPoint::GetAppName,
            once(on_name),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::get_app_name(app.as_ptr(), ctx, Some(trampolines::string_cb)) },
        )
    }

    pub fn get_app_key<F>(&self, app: &AppInfo, on_key: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<Key>) + Send + 'static,
    {
        let app = abi::lower_app_info(app)?;
        self.call(
            EntryPoint::GetAppKey,
            once(on_key),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::get_app_key(app.as_ptr(), ctx, Some(trampolines::key_cb)) },
        )
    }

    pub fn random_numbers<F>(&self, on_numbers: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<Vec<i32>>) + Send + 'static,
    {
        self.call(
            EntryPoint::RandomNumbers,
            once(on_numbers),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::random_numbers(ctx, Some(trampolines::i32_array_cb)) },
        )
    }

    pub fn random_keys<F>(&self, on_keys: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<Vec<Key>>) + Send + 'static,
    {
        self.call(
            EntryPoint::RandomKeys,
            once(on_keys),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::random_keys(ctx, Some(trampolines::key_array_cb)) },
        )
    }

    /// Delivers the record's fields as separate values: `(id, name, key)`
    pub fn get_app_info<F>(&self, app: &AppInfo, on_parts: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<(i32, String, Key)>) + Send + 'static,
    {
        let app = abi::lower_app_info(app)?;
        self.call(
            EntryPoint::GetAppInfo,
            once(on_parts),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::get_app_info(app.as_ptr(), ctx, Some(trampolines::app_parts_cb)) },
        )
    }

    /// Create an account and observe its lifecycle
    ///
    /// Both notifications share one multi-shot registration, which ends with
    /// the disconnect.
    pub fn create_account<C, D>(
        &self,
        locator: &str,
        password: &str,
        on_connect: C,
        on_disconnect: D,
    ) -> Result<PendingCall>
    where
        C: FnOnce(Reply<AppInfo>) + Send + 'static,
        D: FnOnce(Reply<()>) + Send + 'static,
    {
        let locator = abi::lower_text("locator", locator)?;
        let password = abi::lower_text("password", password)?;

        let mut on_connect = Some(on_connect);
        let mut on_disconnect = Some(on_disconnect);
        let callback: Callback = Box::new(move |payload: Payload| {
            if payload.terminal {
                if let Some(on_disconnect) = on_disconnect.take() {
                    on_disconnect(payload.decode());
                }
            } else if let Some(on_connect) = on_connect.take() {
                on_connect(payload.decode());
            } else {
                log::warn!("Ignoring repeated connect notification");
            }
        });

        self.call(
            EntryPoint::CreateAccount,
            callback,
            CallbackMode::MultiShot,
            |ctx| unsafe {
                sys::create_account(
                    locator.as_ptr(),
                    password.as_ptr(),
                    ctx,
                    Some(trampolines::app_info_cb),
                    Some(trampolines::disconnect_cb),
                )
            },
        )
    }

    /// Create an account and observe its lifecycle as a stream of events
    ///
    /// `on_event` runs once per event, in emission order; the stream ends
    /// after `Event::Disconnected`.
    pub fn create_account_events<F>(
        &self,
        locator: &str,
        password: &str,
        mut on_event: F,
    ) -> Result<PendingCall>
    where
        F: FnMut(Reply<Event>) + Send + 'static,
    {
        let locator = abi::lower_text("locator", locator)?;
        let password = abi::lower_text("password", password)?;

        self.call(
            EntryPoint::CreateAccountEvents,
            Box::new(move |payload: Payload| on_event(payload.decode())),
            CallbackMode::MultiShot,
            |ctx| unsafe {
                sys::create_account_events(
                    locator.as_ptr(),
                    password.as_ptr(),
                    ctx,
                    Some(trampolines::account_event_cb),
                )
            },
        )
    }

    /// An all-zero (or empty) signature is reported as
    /// `Err(Native { error_code: -11 })`
    pub fn verify_signature<F>(&self, signature: &[u8], on_done: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<()>) + Send + 'static,
    {
        self.call(
            EntryPoint::VerifySignature,
            once(on_done),
            CallbackMode::SingleShot,
            |ctx| unsafe {
                sys::verify_signature(
                    signature.as_ptr(),
                    signature.len(),
                    ctx,
                    Some(trampolines::unit_cb),
                )
            },
        )
    }

    pub fn verify_keys<F>(&self, keys: &[Key], on_done: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<()>) + Send + 'static,
    {
        let keys = abi::lower_keys(keys);
        self.call(
            EntryPoint::VerifyKeys,
            once(on_done),
            CallbackMode::SingleShot,
            |ctx| unsafe {
                sys::verify_keys(keys.as_ptr(), keys.len(), ctx, Some(trampolines::unit_cb))
            },
        )
    }

    /// Synchronous: `on_text` has run by the time this returns
    pub fn with_string<F>(&self, on_text: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<String>) + Send + 'static,
    {
        self.call(
            EntryPoint::WithString,
            once(on_text),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::backend_with_string(ctx, Some(trampolines::text_cb)) },
        )
    }

    pub fn with_string_async<F>(&self, on_text: F) -> Result<PendingCall>
    where
        F: FnOnce(Reply<String>) + Send + 'static,
    {
        self.call(
            EntryPoint::WithStringAsync,
            once(on_text),
            CallbackMode::SingleShot,
            |ctx| unsafe { sys::backend_with_string_async(ctx, Some(trampolines::text_cb)) },
        )
    }

    /// Create a native authorisation request owned by the caller
    pub fn new_auth_request(&self, info: &AuthRequestInfo) -> Result<OwnedAuthRequest> {
        let app_id = abi::lower_text("app_id", &info.app_id)?;
        let app_name = abi::lower_text("app_name", &info.app_name)?;
        let vendor = abi::lower_text("vendor", &info.vendor)?;

        let raw = unsafe {
            sys::auth_req_new(
                app_id.as_ptr(),
                app_name.as_ptr(),
                vendor.as_ptr(),
                info.needs_own_container,
                info.request_id,
            )
        };
        if raw.is_null() {
            return Err(BridgeError::Native(FfiResult::error(
                native::ALLOC,
                "auth_req_new returned no request",
            )));
        }

        let handle = self.tracker().adopt::<sys::AuthReq>(raw as usize, |addr| {
            // SAFETY: the address came from auth_req_new and is released once
            unsafe { sys::auth_req_free(addr as *mut sys::AuthReq) }
        });
        log::debug!("Created auth request {} (id {})", handle, info.request_id);

        Ok(OwnedAuthRequest {
            handle: Some(handle),
            info: info.clone(),
            tracker: self.tracker().clone(),
        })
    }

    /// Ask the backend to answer an authorisation request
    ///
    /// The backend copies the request before this returns, so `request` may
    /// be released right away. The response is only valid inside
    /// `on_response`; use [`BorrowedAuthResponse::to_owned`] to keep it.
    pub fn on_auth_request<F>(
        &self,
        request: &OwnedAuthRequest,
        on_response: F,
    ) -> Result<PendingCall>
    where
        F: FnOnce(Reply<BorrowedAuthResponse>) + Send + 'static,
    {
        let handle = request.handle()?;
        let addr = self.tracker().addr(handle)?;

        let tracker = self.tracker().clone();
        let mut on_response = Some(on_response);
        let callback: Callback = Box::new(move |payload: Payload| {
            let Some(on_response) = on_response.take() else {
                return;
            };
            if !payload.status.is_ok() {
                on_response(Err(BridgeError::Native(payload.status)));
                return;
            }
            match payload.body {
                Body::Native(resp) => {
                    let handle = tracker.lend::<sys::AuthResp>(resp.addr());
                    on_response(Ok(BorrowedAuthResponse {
                        handle,
                        tracker: tracker.clone(),
                    }));
                    if let Err(err) = tracker.end_borrow(handle) {
                        log::error!("Could not end borrow of {}: {}", handle, err);
                    }
                }
                Body::Fault(reason) => on_response(Err(BridgeError::Decode(reason))),
                Body::Empty | Body::Wire(_) => on_response(Err(BridgeError::Decode(
                    "authorisation response missing".to_string(),
                ))),
            }
        });

        self.call(
            EntryPoint::OnAuthRequest,
            callback,
            CallbackMode::SingleShot,
            |ctx| unsafe {
                sys::backend_on_auth_request(
                    addr as *const sys::AuthReq,
                    ctx,
                    Some(trampolines::auth_resp_cb),
                )
            },
        )
    }
}

/// Native authorisation request owned by the managed side
///
/// Freed exactly once: explicitly through [`release`](Self::release) or when
/// the guard is dropped.
pub struct OwnedAuthRequest {
    handle: Option<ObjectHandle>,
    info: AuthRequestInfo,
    tracker: Arc<OwnershipTracker>,
}

impl OwnedAuthRequest {
    pub fn info(&self) -> &AuthRequestInfo {
        &self.info
    }

    /// Tracker handle of the native request
    pub fn handle(&self) -> Result<ObjectHandle> {
        self.handle
            .ok_or_else(|| BridgeError::Encode("auth request already released".to_string()))
    }

    pub fn is_live(&self) -> bool {
        self.handle.is_some_and(|handle| self.tracker.is_live(handle))
    }

    /// Free the native request now
    ///
    /// Fails with `DoubleFree` if the request was already released through
    /// the tracker.
    pub fn release(mut self) -> Result<()> {
        match self.handle.take() {
            Some(handle) => self.tracker.release(handle),
            None => Ok(()),
        }
    }
}

impl Drop for OwnedAuthRequest {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(err) = self.tracker.release(handle) {
                log::error!("Failed to release auth request {}: {}", handle, err);
            }
        }
    }
}

impl fmt::Debug for OwnedAuthRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedAuthRequest")
            .field("handle", &self.handle)
            .field("request_id", &self.info.request_id)
            .finish()
    }
}

/// Authorisation response borrowed from native code for one callback
///
/// Accessors panic once the callback has returned: the native memory is gone
/// and reading it would be a use-after-free. Copy what you need with
/// [`to_owned`](Self::to_owned) while the callback runs.
pub struct BorrowedAuthResponse {
    handle: ObjectHandle,
    tracker: Arc<OwnershipTracker>,
}

impl BorrowedAuthResponse {
    pub fn handle(&self) -> ObjectHandle {
        self.handle
    }

    /// True while the borrow is active
    pub fn is_valid(&self) -> bool {
        self.tracker.is_live(self.handle)
    }

    pub fn try_message(&self) -> Result<String> {
        self.tracker.with_live(self.handle, |addr| unsafe {
            abi::lift_auth_message(addr as *const sys::AuthResp)
        })?
    }

    pub fn try_original_request_id(&self) -> Result<u64> {
        self.tracker.with_live(self.handle, |addr| unsafe {
            abi::lift_auth_request_id(addr as *const sys::AuthResp)
        })?
    }

    /// Deep copy that outlives the callback
    pub fn try_to_owned(&self) -> Result<AuthResponse> {
        Ok(AuthResponse {
            message: self.try_message()?,
            original_request_id: self.try_original_request_id()?,
        })
    }

    pub fn message(&self) -> String {
        self.try_message().unwrap_or_else(|err| fatal(err))
    }

    pub fn original_request_id(&self) -> u64 {
        self.try_original_request_id().unwrap_or_else(|err| fatal(err))
    }

    /// Like [`try_to_owned`](Self::try_to_owned), panicking on failure
    pub fn to_owned(&self) -> AuthResponse {
        self.try_to_owned().unwrap_or_else(|err| fatal(err))
    }
}

fn fatal(err: BridgeError) -> ! {
    if err.is_ownership_violation() {
        panic!("ownership violation: {}", err)
    }
    panic!("unreadable auth response: {}", err)
}

impl fmt::Debug for BorrowedAuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BorrowedAuthResponse")
            .field("handle", &self.handle)
            .field("valid", &self.is_valid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_error_never_reaches_native() {
        let bridge = Bridge::default();
        let err = bridge
            .create_account("bad\0locator", "pw", |_| {}, |_| {})
            .unwrap_err();
        assert!(matches!(err, BridgeError::Encode(_)));

        let app = AppInfo::new(1, "nul\0name", Key::filled(0));
        assert!(matches!(
            bridge.register_app(&app, |_| {}),
            Err(BridgeError::Encode(_))
        ));
    }

    #[test]
    fn test_once_ignores_second_delivery() {
        let (tx, rx) = std::sync::mpsc::channel();
        let mut callback = once(move |reply: Reply<i32>| tx.send(reply).unwrap());
        callback(Payload::value(FfiResult::ok(), &3i32));
        callback(Payload::value(FfiResult::ok(), &4i32));
        assert_eq!(rx.try_iter().collect::<Vec<_>>(), vec![Ok(3)]);
    }
}
