//! Core types exchanged across the bridge
//!
//! Every type here is a managed-side value: it owns its data and is copied,
//! never shared, when it crosses into or out of native code.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ownership::ObjectHandle;
use crate::registry::CallbackHandle;

/// Length of the key buffers used by the native backend
pub const KEY_LEN: usize = 8;

/// Result type for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

/// What a typed callback receives: the decoded payload, or the error the
/// native side reported (or that decoding its payload produced)
pub type Reply<T> = std::result::Result<T, BridgeError>;

/// Native call outcome: `error_code == 0` means success
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FfiResult {
    pub error_code: i32,
    pub message: Option<String>,
}

impl FfiResult {
    /// Reserved success code
    pub const OK_CODE: i32 = 0;

    pub fn ok() -> Self {
        Self {
            error_code: Self::OK_CODE,
            message: None,
        }
    }

    pub fn error(error_code: i32, message: impl Into<String>) -> Self {
        Self {
            error_code,
            message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_code == Self::OK_CODE
    }
}

impl fmt::Display for FfiResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{} ({})", message, self.error_code),
            None => write!(f, "code {}", self.error_code),
        }
    }
}

/// Fixed-size byte buffer
///
/// Immutable once constructed; the bytes are always copied in and out.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "Vec<u8>", into = "Vec<u8>")]
pub struct Key<const N: usize = KEY_LEN> {
    bytes: [u8; N],
}

impl<const N: usize> Key<N> {
    pub const LEN: usize = N;

    pub const fn new(bytes: [u8; N]) -> Self {
        Self { bytes }
    }

    /// Builds a key from a slice that must hold exactly `N` bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; N] = bytes.try_into().map_err(|_| BridgeError::SizeMismatch {
            expected: N,
            actual: bytes.len(),
        })?;
        Ok(Self { bytes })
    }

    /// Key with every byte set to `byte`
    pub const fn filled(byte: u8) -> Self {
        Self { bytes: [byte; N] }
    }

    pub fn as_bytes(&self) -> &[u8; N] {
        &self.bytes
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }
}

impl<const N: usize> TryFrom<&[u8]> for Key<N> {
    type Error = BridgeError;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        Self::from_slice(bytes)
    }
}

impl<const N: usize> TryFrom<Vec<u8>> for Key<N> {
    type Error = BridgeError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Self::from_slice(&bytes)
    }
}

impl<const N: usize> From<Key<N>> for Vec<u8> {
    fn from(key: Key<N>) -> Self {
        key.to_vec()
    }
}

impl<const N: usize> From<[u8; N]> for Key<N> {
    fn from(bytes: [u8; N]) -> Self {
        Self::new(bytes)
    }
}

impl<const N: usize> fmt::Debug for Key<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({:?})", self.bytes)
    }
}

impl<const N: usize> fmt::Display for Key<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.bytes)
    }
}

/// Application descriptor passed to and returned from the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppInfo {
    pub id: i32,
    pub name: String,
    pub key: Key,
}

impl AppInfo {
    pub fn new(id: i32, name: impl Into<String>, key: Key) -> Self {
        Self {
            id,
            name: name.into(),
            key,
        }
    }
}

impl fmt::Display for AppInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{ id: {}, name: {}, key: {} }}", self.id, self.name, self.key)
    }
}

/// Account lifecycle notification
///
/// Exactly one variant is populated per delivered event. `Disconnected`
/// ends the stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    Connected(AppInfo),
    Disconnected,
}

impl Event {
    /// True for the variant after which no further events are delivered
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Disconnected)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Connected(app) => write!(f, "connected {}", app),
            Event::Disconnected => write!(f, "disconnected"),
        }
    }
}

/// Fields of a native-resident authorisation request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRequestInfo {
    pub app_id: String,
    pub app_name: String,
    pub vendor: String,
    pub needs_own_container: bool,
    pub request_id: u64,
}

/// Deep copy of a native authorisation response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResponse {
    pub message: String,
    pub original_request_id: u64,
}

/// Errors that can occur while crossing the bridge
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BridgeError {
    #[error("Failed to encode argument: {0}")]
    Encode(String),

    #[error("Failed to decode payload: {0}")]
    Decode(String),

    #[error("Fixed-size buffer mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Callback handle {0} is no longer registered")]
    StaleHandle(CallbackHandle),

    #[error("Callback handle {0} invoked from inside its own callback")]
    ReentrantInvoke(CallbackHandle),

    #[error("Callback for handle {0} panicked")]
    CallbackPanicked(CallbackHandle),

    #[error("Native object {0} used after it was freed")]
    UseAfterFree(ObjectHandle),

    #[error("Native object {0} released twice")]
    DoubleFree(ObjectHandle),

    #[error("Native object {0} is borrowed, not owned")]
    NotOwned(ObjectHandle),

    #[error("Native object {0} was never issued")]
    UnknownObject(ObjectHandle),

    #[error("Native call failed: {0}")]
    Native(FfiResult),

    #[error("Timed out after {waited_ms} ms waiting for {entry}")]
    Timeout { entry: String, waited_ms: u64 },
}

impl BridgeError {
    /// Native error code, if this error was reported by the native side
    pub fn native_code(&self) -> Option<i32> {
        match self {
            BridgeError::Native(result) => Some(result.error_code),
            _ => None,
        }
    }

    /// Ownership violations indicate a broken invariant, not a runtime condition
    pub fn is_ownership_violation(&self) -> bool {
        matches!(
            self,
            BridgeError::UseAfterFree(_)
                | BridgeError::DoubleFree(_)
                | BridgeError::NotOwned(_)
                | BridgeError::UnknownObject(_)
        )
    }
}
