//! FFI Bridge Library
//!
//! A managed front end for a native backend that reports results through C
//! callbacks, possibly from its own worker threads.
//!
//! # Architecture
//!
//! - Values crossing the boundary are copied through a byte-level codec
//! - Callbacks are registered in a registry and native code only sees an
//!   opaque handle, never a pointer into managed memory
//! - Every native call goes through one invoker that maps the native status
//!   and settles the registration (synchronous or asynchronous dispatch)
//! - Native-resident records are tracked with an explicit Borrowed or Owned
//!   policy, so use-after-free and double free are detected
//!
//! The library does NOT:
//! - Retry or time out native calls on its own
//! - Run an event loop (callers wait on [`PendingCall`])
//! - Generate reports (see the ffi-bridge-demo binary)
//!
//! # Example Usage
//!
//! ```no_run
//! use ffi_bridge::{AppInfo, Bridge, BridgeConfig, Key};
//! use std::time::Duration;
//!
//! let bridge = Bridge::new(BridgeConfig::new().with_callback_timeout(Duration::from_secs(2)));
//! let app = AppInfo::new(1234, "Unique-App", Key::new([1, 2, 3, 5, 7, 11, 13, 17]));
//!
//! let call = bridge
//!     .get_app_key(&app, |reply| match reply {
//!         Ok(key) => println!("key: {}", key),
//!         Err(e) => eprintln!("get_app_key failed: {}", e),
//!     })
//!     .unwrap();
//!
//! call.wait_default().unwrap();
//! ```

// Public modules
pub mod codec;
pub mod config;
pub mod native;
pub mod ownership;
pub mod registry;
pub mod types;

// Re-export main types for convenience
pub use bindings::{BorrowedAuthResponse, OwnedAuthRequest};
pub use completion::{Latch, LatchToken, PendingCall};
pub use config::BridgeConfig;
pub use invoker::{Bridge, Dispatch, EntryPoint};
pub use ownership::{NativeObject, ObjectHandle, OwnershipTracker, Policy};
pub use registry::{Body, Callback, CallbackHandle, CallbackMode, CallbackRegistry, Payload};
pub use types::{
    AppInfo, AuthRequestInfo, AuthResponse, BridgeError, Event, FfiResult, Key, Reply, Result,
    KEY_LEN,
};

// Internal modules (re-exported above)
mod bindings;
mod completion;
mod invoker;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
