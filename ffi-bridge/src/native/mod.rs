//! Native backend boundary
//!
//! `sys` declares the C API, `abi` converts between managed values and native
//! layouts, `trampolines` are the `extern "C"` callbacks handed to native code.

pub mod sys;
pub(crate) mod abi;
pub(crate) mod trampolines;

/// Status codes reported by the reference backend
pub const OK: i32 = 0;
pub const NULL_ARGUMENT: i32 = -1;
pub const THREAD: i32 = -2;
pub const ALLOC: i32 = -3;
pub const FORMAT: i32 = -4;
pub const INVALID_SIGNATURE: i32 = -11;
