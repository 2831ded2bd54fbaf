//! `extern "C"` entry points invoked by native code
//!
//! Each trampoline copies whatever native memory it was handed into a
//! [`Payload`] before returning, then routes it to the registration named by
//! `ctx` in the global registry. They never unwind: closure panics are caught
//! by the registry and nothing here panics.

use std::os::raw::{c_char, c_void};

use super::abi;
use super::sys;
use crate::registry::{Body, CallbackHandle, CallbackRegistry, NativeRef, Payload};
use crate::types::{BridgeError, FfiResult, Result};

fn wire_body(encoded: Result<Vec<u8>>) -> Body {
    match encoded {
        Ok(bytes) => Body::Wire(bytes),
        Err(err) => Body::Fault(err.to_string()),
    }
}

fn encoded(write: impl FnOnce(&mut Vec<u8>) -> Result<()>) -> Body {
    let mut out = Vec::new();
    wire_body(write(&mut out).map(|()| out))
}

fn deliver(ctx: *mut c_void, payload: Payload) {
    let handle = CallbackHandle::from_ctx(ctx);
    match CallbackRegistry::global().invoke(handle, payload) {
        Ok(()) => {}
        Err(BridgeError::StaleHandle(_)) => {
            log::warn!("Dropped native callback for stale handle {}", handle);
        }
        Err(err) => log::error!("Native callback for {} failed: {}", handle, err),
    }
}

pub(crate) unsafe extern "C" fn unit_cb(ctx: *mut c_void, result: *const sys::FfiResult) {
    deliver(ctx, Payload::new(abi::lift_status(result), Body::Empty));
}

pub(crate) unsafe extern "C" fn i32_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    value: i32,
) {
    deliver(ctx, Payload::value(abi::lift_status(result), &value));
}

pub(crate) unsafe extern "C" fn string_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    value: *const c_char,
) {
    let body = encoded(|out| abi::encode_text(value, out));
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

pub(crate) unsafe extern "C" fn key_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    key: *const sys::Key,
) {
    let body = encoded(|out| abi::encode_key(key, out));
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

pub(crate) unsafe extern "C" fn i32_array_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    ptr: *const i32,
    len: usize,
) {
    let body = encoded(|out| abi::encode_i32s(ptr, len, out));
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

pub(crate) unsafe extern "C" fn key_array_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    ptr: *const sys::Key,
    len: usize,
) {
    let body = encoded(|out| abi::encode_keys(ptr, len, out));
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

pub(crate) unsafe extern "C" fn app_parts_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    id: i32,
    name: *const c_char,
    key: *const sys::Key,
) {
    let body = encoded(|out| {
        crate::codec::Wire::encode(&id, out)?;
        abi::encode_text(name, out)?;
        abi::encode_key(key, out)
    });
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

pub(crate) unsafe extern "C" fn app_info_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    app_info: *const sys::AppInfo,
) {
    let body = encoded(|out| abi::encode_app_info(app_info, out));
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}

/// Second half of `create_account`: ends the multi-shot registration
pub(crate) unsafe extern "C" fn disconnect_cb(ctx: *mut c_void, result: *const sys::FfiResult) {
    deliver(
        ctx,
        Payload::new(abi::lift_status(result), Body::Empty).terminal(),
    );
}

pub(crate) unsafe extern "C" fn account_event_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    event: *const sys::AccountEvent,
) {
    let mut out = Vec::new();
    let (body, terminal) = match abi::encode_event(event, &mut out) {
        Ok(terminal) => (Body::Wire(out), terminal),
        // A stream we can not read any further is over
        Err(err) => (Body::Fault(err.to_string()), true),
    };
    let payload = Payload::new(abi::lift_status(result), body);
    deliver(ctx, if terminal { payload.terminal() } else { payload });
}

pub(crate) unsafe extern "C" fn text_cb(ctx: *mut c_void, text: *const c_char) {
    let body = encoded(|out| abi::encode_text(text, out));
    deliver(ctx, Payload::new(FfiResult::ok(), body));
}

/// The response is only valid during this call, so it is passed by reference
/// and the registered closure must finish with it before returning
pub(crate) unsafe extern "C" fn auth_resp_cb(
    ctx: *mut c_void,
    result: *const sys::FfiResult,
    resp: *const sys::AuthResp,
) {
    let body = if resp.is_null() {
        Body::Empty
    } else {
        Body::Native(NativeRef::new(resp))
    };
    deliver(ctx, Payload::new(abi::lift_status(result), body));
}
