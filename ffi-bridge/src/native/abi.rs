//! Lowering of managed values into native layouts and lifting of native data
//! back into wire payloads
//!
//! Lowered values own every buffer the native struct points into, so the raw
//! struct stays valid for as long as the lowered value is alive. Lifting always
//! copies; nothing returned here refers to native memory.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::slice;

use super::sys;
use crate::codec::{self, Wire};
use crate::types::{AppInfo, BridgeError, FfiResult, Key, Result};

/// Copy text into a NUL-terminated buffer
pub fn lower_text(field: &str, text: &str) -> Result<CString> {
    CString::new(text).map_err(|e| {
        BridgeError::Encode(format!(
            "{} contains a NUL byte at {}",
            field,
            e.nul_position()
        ))
    })
}

pub fn lower_key(key: &Key) -> sys::Key {
    sys::Key {
        bytes: *key.as_bytes(),
    }
}

pub fn lower_keys(keys: &[Key]) -> Vec<sys::Key> {
    keys.iter().map(lower_key).collect()
}

/// An `AppInfo` in native layout together with the storage it points into
pub struct LoweredAppInfo {
    // Heap buffer of a CString does not move when the CString does
    _name: CString,
    raw: sys::AppInfo,
}

impl LoweredAppInfo {
    pub fn as_ptr(&self) -> *const sys::AppInfo {
        &self.raw
    }
}

pub fn lower_app_info(app: &AppInfo) -> Result<LoweredAppInfo> {
    let name = lower_text("AppInfo.name", &app.name)?;
    let raw = sys::AppInfo {
        id: app.id,
        name: name.as_ptr(),
        key: lower_key(&app.key),
    };
    Ok(LoweredAppInfo { _name: name, raw })
}

/// Copy a native status
///
/// # Safety
/// `result` must be null or point to a valid `FfiResult` whose `error` is null
/// or a NUL-terminated string.
pub unsafe fn lift_status(result: *const sys::FfiResult) -> FfiResult {
    match result.as_ref() {
        Some(raw) => lift_status_value(raw),
        None => FfiResult::error(super::NULL_ARGUMENT, "native callback passed no status"),
    }
}

/// # Safety
/// `raw.error` must be null or a NUL-terminated string.
pub unsafe fn lift_status_value(raw: &sys::FfiResult) -> FfiResult {
    let message = text_bytes(raw.error)
        .map(|bytes| String::from_utf8_lossy(bytes).into_owned());
    FfiResult {
        error_code: raw.error_code,
        message,
    }
}

/// Bytes of a NUL-terminated string, without the terminator
///
/// # Safety
/// `text` must be null or a NUL-terminated string that stays valid for `'a`.
pub unsafe fn text_bytes<'a>(text: *const c_char) -> Option<&'a [u8]> {
    if text.is_null() {
        None
    } else {
        Some(CStr::from_ptr(text).to_bytes())
    }
}

/// Borrow a native array
///
/// # Safety
/// If `ptr` is non-null it must point to `len` initialised elements valid for `'a`.
pub unsafe fn native_slice<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T]> {
    if ptr.is_null() {
        if len == 0 {
            return Ok(&[]);
        }
        return Err(BridgeError::Decode(format!("null array with {} elements", len)));
    }
    Ok(slice::from_raw_parts(ptr, len))
}

unsafe fn required<'a, T>(ptr: *const T, what: &str) -> Result<&'a T> {
    ptr.as_ref()
        .ok_or_else(|| BridgeError::Decode(format!("null {}", what)))
}

/// # Safety
/// `text` must be null or a NUL-terminated string.
pub unsafe fn encode_text(text: *const c_char, out: &mut Vec<u8>) -> Result<()> {
    let bytes = text_bytes(text).ok_or_else(|| BridgeError::Decode("null string".to_string()))?;
    codec::put_text_bytes(out, bytes)
}

/// # Safety
/// `key` must be null or point to a valid `Key`.
pub unsafe fn encode_key(key: *const sys::Key, out: &mut Vec<u8>) -> Result<()> {
    let key = required(key, "key")?;
    Key::<{ sys::KEY_LEN }>::new(key.bytes).encode(out)
}

/// # Safety
/// `app` must be null or point to a valid `AppInfo` whose `name` is null or
/// NUL-terminated.
pub unsafe fn encode_app_info(app: *const sys::AppInfo, out: &mut Vec<u8>) -> Result<()> {
    let app = required(app, "AppInfo")?;
    app.id.encode(out)?;
    encode_text(app.name, out)?;
    Key::<{ sys::KEY_LEN }>::new(app.key.bytes).encode(out)
}

/// # Safety
/// `ptr` must be null or point to `len` valid keys.
pub unsafe fn encode_keys(ptr: *const sys::Key, len: usize, out: &mut Vec<u8>) -> Result<()> {
    let keys = native_slice(ptr, len)?;
    codec::put_count(out, keys.len())?;
    for key in keys {
        encode_key(key, out)?;
    }
    Ok(())
}

/// # Safety
/// `ptr` must be null or point to `len` valid integers.
pub unsafe fn encode_i32s(ptr: *const i32, len: usize, out: &mut Vec<u8>) -> Result<()> {
    let values = native_slice(ptr, len)?;
    codec::put_count(out, values.len())?;
    for value in values {
        value.encode(out)?;
    }
    Ok(())
}

/// Encode a tagged account event; returns whether it ends the stream
///
/// Only the union field selected by `tag` is read.
///
/// # Safety
/// `event` must be null or point to a valid `AccountEvent`.
pub unsafe fn encode_event(event: *const sys::AccountEvent, out: &mut Vec<u8>) -> Result<bool> {
    let event = required(event, "AccountEvent")?;
    match event.tag {
        sys::ACCOUNT_EVENT_CONNECTED => {
            codec::EVENT_CONNECTED.encode(out)?;
            encode_app_info(&event.payload.connected.app_info, out)?;
            Ok(false)
        }
        sys::ACCOUNT_EVENT_DISCONNECTED => {
            codec::EVENT_DISCONNECTED.encode(out)?;
            Ok(true)
        }
        tag => Err(BridgeError::Decode(format!("unknown account event tag {}", tag))),
    }
}

/// Copy the message of a borrowed authorisation response
///
/// Fails with `Decode` for a null message or one that is not valid UTF-8.
///
/// # Safety
/// `resp` must be null or point to a valid `AuthResp` whose `msg` is null or
/// NUL-terminated.
pub unsafe fn lift_auth_message(resp: *const sys::AuthResp) -> Result<String> {
    let resp = required(resp, "AuthResp")?;
    let bytes =
        text_bytes(resp.msg).ok_or_else(|| BridgeError::Decode("null message".to_string()))?;
    std::str::from_utf8(bytes)
        .map(str::to_owned)
        .map_err(|e| BridgeError::Decode(format!("invalid UTF-8 in auth message: {}", e)))
}

/// # Safety
/// `resp` must be null or point to a valid `AuthResp`.
pub unsafe fn lift_auth_request_id(resp: *const sys::AuthResp) -> Result<u64> {
    Ok(required(resp, "AuthResp")?.orig_req_id)
}
