//! Demo configuration loading and parsing
//!
//! Every section is optional; a missing file section falls back to the
//! values the demo has always used.

use anyhow::{bail, Context, Result};
use ffi_bridge::{AppInfo, AuthRequestInfo, BridgeConfig, Key};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main demo configuration (loaded from a TOML file)
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct DemoConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub app: AppConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub signatures: SignaturesConfig,
    #[serde(default)]
    pub keys: KeysConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub stress: StressConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default = "default_app_id")]
    pub id: i32,
    #[serde(default = "default_app_name")]
    pub name: String,
    #[serde(default = "default_app_key")]
    pub key: Key,
}

fn default_app_id() -> i32 {
    1234
}

fn default_app_name() -> String {
    "Unique-App".to_string()
}

fn default_app_key() -> Key {
    Key::new([1, 2, 3, 5, 7, 11, 13, 17])
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            id: default_app_id(),
            name: default_app_name(),
            key: default_app_key(),
        }
    }
}

impl AppConfig {
    pub fn app_info(&self) -> AppInfo {
        AppInfo::new(self.id, self.name.clone(), self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountConfig {
    #[serde(default = "default_locator")]
    pub locator: String,
    #[serde(default = "default_password")]
    pub password: String,
}

fn default_locator() -> String {
    "my_locator".to_string()
}

fn default_password() -> String {
    "my_password".to_string()
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            locator: default_locator(),
            password: default_password(),
        }
    }
}

/// Signatures to verify; `rejected` ones are expected to fail
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SignaturesConfig {
    #[serde(default = "default_accepted")]
    pub accepted: Vec<Vec<u8>>,
    #[serde(default = "default_rejected")]
    pub rejected: Vec<Vec<u8>>,
}

fn default_accepted() -> Vec<Vec<u8>> {
    vec![vec![1, 1, 1, 2, 1, 1, 2, 1]]
}

fn default_rejected() -> Vec<Vec<u8>> {
    vec![vec![0; 8]]
}

impl Default for SignaturesConfig {
    fn default() -> Self {
        Self {
            accepted: default_accepted(),
            rejected: default_rejected(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct KeysConfig {
    #[serde(default = "default_keys")]
    pub verify: Vec<Key>,
}

fn default_keys() -> Vec<Key> {
    vec![Key::filled(0), Key::filled(1), Key::filled(2)]
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            verify: default_keys(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default = "default_auth_app_id")]
    pub app_id: String,
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_vendor")]
    pub vendor: String,
    #[serde(default)]
    pub needs_own_container: bool,
    #[serde(default = "default_request_id")]
    pub request_id: u64,
}

fn default_auth_app_id() -> String {
    "net.unique.app".to_string()
}

fn default_vendor() -> String {
    "Unique Vendor".to_string()
}

fn default_request_id() -> u64 {
    1
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            app_id: default_auth_app_id(),
            app_name: default_app_name(),
            vendor: default_vendor(),
            needs_own_container: false,
            request_id: default_request_id(),
        }
    }
}

impl AuthConfig {
    pub fn request_info(&self) -> AuthRequestInfo {
        AuthRequestInfo {
            app_id: self.app_id.clone(),
            app_name: self.app_name.clone(),
            vendor: self.vendor.clone(),
            needs_own_container: self.needs_own_container,
            request_id: self.request_id,
        }
    }
}

/// Parallel load used by the `stress` scenario
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StressConfig {
    #[serde(default = "default_stress_calls")]
    pub calls: usize,
    /// Worker threads (0 = rayon default)
    #[serde(default)]
    pub threads: usize,
}

fn default_stress_calls() -> usize {
    200
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            calls: default_stress_calls(),
            threads: 0,
        }
    }
}

impl DemoConfig {
    fn validate(&self) -> Result<()> {
        if self.account.locator.contains('\0') || self.account.password.contains('\0') {
            bail!("account credentials must not contain NUL bytes");
        }
        if self.bridge.callback_timeout_ms == 0 {
            bail!("bridge.callback_timeout_ms must be greater than zero");
        }
        if self.stress.calls == 0 {
            bail!("stress.calls must be greater than zero");
        }
        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<DemoConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: DemoConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}
