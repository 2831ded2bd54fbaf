//! Raw declarations of the native backend C API (`native/backend.h`)
//!
//! Layouts mirror the header exactly. Nothing here is safe to call directly;
//! the bridge wraps every call.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_void};

pub const KEY_LEN: usize = 8;

pub const ACCOUNT_EVENT_CONNECTED: i32 = 0;
pub const ACCOUNT_EVENT_DISCONNECTED: i32 = 1;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub bytes: [u8; KEY_LEN],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AppInfo {
    pub id: i32,
    pub name: *const c_char,
    pub key: Key,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FfiResult {
    pub error_code: i32,
    pub error: *const c_char,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AccountConnected {
    pub app_info: AppInfo,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AccountDisconnected {
    pub reserved: u8,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub union AccountEventPayload {
    pub connected: AccountConnected,
    pub disconnected: AccountDisconnected,
}

/// Tagged union: `tag` selects the populated `payload` field
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AccountEvent {
    pub tag: i32,
    pub payload: AccountEventPayload,
}

/// Opaque request created by `auth_req_new`
#[repr(C)]
pub struct AuthReq {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct AuthResp {
    pub msg: *const c_char,
    pub orig_req_id: u64,
}

pub type cb_t = Option<unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult)>;
pub type cb_i32_t =
    Option<unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, value: i32)>;
pub type cb_string_t =
    Option<unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, value: *const c_char)>;
pub type cb_Key_t =
    Option<unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, key: *const Key)>;
pub type cb_i32_array_t = Option<
    unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, ptr: *const i32, len: usize),
>;
pub type cb_Key_array_t = Option<
    unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, ptr: *const Key, len: usize),
>;
pub type cb_i32_string_Key_t = Option<
    unsafe extern "C" fn(
        ctx: *mut c_void,
        result: *const FfiResult,
        id: i32,
        name: *const c_char,
        key: *const Key,
    ),
>;
pub type cb_AppInfo_t = Option<
    unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, app_info: *const AppInfo),
>;
pub type cb_AccountEvent_t = Option<
    unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, event: *const AccountEvent),
>;
pub type cb_AuthResp_t = Option<
    unsafe extern "C" fn(ctx: *mut c_void, result: *const FfiResult, resp: *const AuthResp),
>;
pub type cb_text_t = Option<unsafe extern "C" fn(ctx: *mut c_void, text: *const c_char)>;

// Linked from the static library built by build.rs
extern "C" {
    pub fn register_app(app_info: *const AppInfo, ctx: *mut c_void, o_cb: cb_t) -> FfiResult;
    pub fn get_app_id(app_info: *const AppInfo, ctx: *mut c_void, o_cb: cb_i32_t) -> FfiResult;
    pub fn get_app_name(app_info: *const AppInfo, ctx: *mut c_void, o_cb: cb_string_t)
        -> FfiResult;
    pub fn get_app_key(app_info: *const AppInfo, ctx: *mut c_void, o_cb: cb_Key_t) -> FfiResult;
    pub fn random_numbers(ctx: *mut c_void, o_cb: cb_i32_array_t) -> FfiResult;
    pub fn random_keys(ctx: *mut c_void, o_cb: cb_Key_array_t) -> FfiResult;
    pub fn get_app_info(
        app_info: *const AppInfo,
        ctx: *mut c_void,
        o_cb: cb_i32_string_Key_t,
    ) -> FfiResult;

    pub fn create_account(
        locator: *const c_char,
        password: *const c_char,
        ctx: *mut c_void,
        o_connect_cb: cb_AppInfo_t,
        o_disconnect_cb: cb_t,
    ) -> FfiResult;
    pub fn create_account_events(
        locator: *const c_char,
        password: *const c_char,
        ctx: *mut c_void,
        o_cb: cb_AccountEvent_t,
    ) -> FfiResult;

    pub fn verify_signature(ptr: *const u8, len: usize, ctx: *mut c_void, o_cb: cb_t)
        -> FfiResult;
    pub fn verify_keys(ptr: *const Key, len: usize, ctx: *mut c_void, o_cb: cb_t) -> FfiResult;

    pub fn backend_with_string(ctx: *mut c_void, o_cb: cb_text_t) -> FfiResult;
    pub fn backend_with_string_async(ctx: *mut c_void, o_cb: cb_text_t) -> FfiResult;

    pub fn auth_req_new(
        app_id: *const c_char,
        app_name: *const c_char,
        vendor: *const c_char,
        needs_own_container: bool,
        req_id: u64,
    ) -> *mut AuthReq;
    pub fn auth_req_free(req: *mut AuthReq);

    pub fn backend_on_auth_request(
        req: *const AuthReq,
        ctx: *mut c_void,
        o_cb: cb_AuthResp_t,
    ) -> FfiResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{align_of, size_of};

    #[test]
    fn test_layouts_follow_c_rules() {
        assert_eq!(size_of::<Key>(), KEY_LEN);
        assert_eq!(align_of::<Key>(), 1);
        // int32 id, padding, pointer, key, tail padding
        assert_eq!(size_of::<AppInfo>() % align_of::<*const c_char>(), 0);
        assert!(size_of::<AccountEventPayload>() >= size_of::<AccountConnected>());
        assert_eq!(size_of::<AuthReq>(), 0);
    }
}
