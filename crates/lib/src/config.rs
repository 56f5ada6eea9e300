//! Gateway connection settings and their persistence.
//!
//! The effective config is built in three layers: built-in defaults, environment overrides
//! (`DASHAI_GATEWAY_URL`, `DASHAI_GATEWAY_TOKEN`, `DASHAI_AGENT_ID`, `DASHAI_GATEWAY_ENABLED`),
//! then the persisted blob. The blob is one JSON object stored under [`STORAGE_KEY`]; unknown
//! fields are ignored and missing fields fall back to the lower layers.
//!
//! Only fields that were explicitly saved are persisted. Values coming from the environment or
//! the defaults stay out of the blob, so a `DASHAI_GATEWAY_TOKEN` is never written to disk.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Fixed key the config blob is stored under.
pub const STORAGE_KEY: &str = "openclaw-gateway-config";

/// Agent id that needs no `x-openclaw-agent-id` header.
pub const DEFAULT_AGENT_ID: &str = "main";

const DEFAULT_GATEWAY_URL: &str = "http://127.0.0.1:18789";

/// Gateway connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Base URL of the gateway (e.g. `http://127.0.0.1:18789`).
    pub gateway_url: String,
    /// Bearer token; empty means no `Authorization` header.
    pub token: String,
    /// Gateway agent; sent as model `openclaw:<agentId>`.
    pub agent_id: String,
    /// User switch: when false, collaborators go straight to their fallback.
    pub enabled: bool,
    /// Use SSE streaming for chat sessions.
    pub streaming: bool,
    /// Forwarded as the `user` field of chat requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_user: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            gateway_url: DEFAULT_GATEWAY_URL.to_string(),
            token: String::new(),
            agent_id: DEFAULT_AGENT_ID.to_string(),
            enabled: false,
            streaming: true,
            session_user: None,
        }
    }
}

/// Partial update; `None` fields leave the current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub streaming: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_user: Option<String>,
}

impl PartialConfig {
    /// Field-wise union; fields set in `other` win.
    pub fn overlay(&self, other: &PartialConfig) -> PartialConfig {
        PartialConfig {
            gateway_url: other.gateway_url.clone().or_else(|| self.gateway_url.clone()),
            token: other.token.clone().or_else(|| self.token.clone()),
            agent_id: other.agent_id.clone().or_else(|| self.agent_id.clone()),
            enabled: other.enabled.or(self.enabled),
            streaming: other.streaming.or(self.streaming),
            session_user: other.session_user.clone().or_else(|| self.session_user.clone()),
        }
    }
}

impl GatewayConfig {
    /// Shallow merge: every field set in `partial` replaces the current one.
    pub fn merged(&self, partial: &PartialConfig) -> GatewayConfig {
        GatewayConfig {
            gateway_url: partial
                .gateway_url
                .clone()
                .unwrap_or_else(|| self.gateway_url.clone()),
            token: partial.token.clone().unwrap_or_else(|| self.token.clone()),
            agent_id: partial
                .agent_id
                .clone()
                .unwrap_or_else(|| self.agent_id.clone()),
            enabled: partial.enabled.unwrap_or(self.enabled),
            streaming: partial.streaming.unwrap_or(self.streaming),
            session_user: partial
                .session_user
                .clone()
                .or_else(|| self.session_user.clone()),
        }
    }

    /// Agent id with blanks normalized to the default agent.
    pub fn effective_agent_id(&self) -> &str {
        let id = self.agent_id.trim();
        if id.is_empty() {
            DEFAULT_AGENT_ID
        } else {
            id
        }
    }

    /// Model name the gateway routes on.
    pub fn model(&self) -> String {
        format!("openclaw:{}", self.effective_agent_id())
    }

    /// Token if one is configured (trimmed, non-empty).
    pub fn bearer_token(&self) -> Option<&str> {
        let t = self.token.trim();
        if t.is_empty() {
            None
        } else {
            Some(t)
        }
    }

    /// Gateway URL without trailing slashes, for joining endpoint paths.
    pub fn base_url(&self) -> &str {
        self.gateway_url.trim().trim_end_matches('/')
    }
}

/// True iff the gateway URL is non-empty and starts with `http`.
pub fn is_valid(config: &GatewayConfig) -> bool {
    is_valid_url(Some(config.gateway_url.as_str()))
}

/// URL half of [`is_valid`]; `None` stands for an absent field.
pub fn is_valid_url(url: Option<&str>) -> bool {
    match url {
        Some(u) => !u.is_empty() && u.starts_with("http"),
        None => false,
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_flag(name: &str) -> Option<bool> {
    env_value(name).map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

/// Built-in defaults with environment overrides applied.
pub fn defaults_from_env() -> GatewayConfig {
    GatewayConfig::default().merged(&PartialConfig {
        gateway_url: env_value("DASHAI_GATEWAY_URL"),
        token: env_value("DASHAI_GATEWAY_TOKEN"),
        agent_id: env_value("DASHAI_AGENT_ID"),
        enabled: env_flag("DASHAI_GATEWAY_ENABLED"),
        streaming: None,
        session_user: None,
    })
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config storage io failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Key/value blob storage the config store persists into.
pub trait ConfigStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError>;
    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError>;
    fn remove(&self, key: &str) -> Result<(), ConfigError>;
}

/// One `<key>.json` file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl ConfigStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let path = self.path_for(key);
        match std::fs::read_to_string(&path) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| ConfigError::Io {
            path: self.dir.clone(),
            source,
        })?;
        let path = self.path_for(key);
        std::fs::write(&path, value).map_err(|source| ConfigError::Io { path, source })
    }

    fn remove(&self, key: &str) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ConfigError::Io { path, source }),
        }
    }
}

/// In-process storage; nothing touches disk.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConfigStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, ConfigError> {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), ConfigError> {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), ConfigError> {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.remove(key);
        Ok(())
    }
}

/// Resolve the config directory: `DASHAI_CONFIG_DIR`, else `~/.dashai`.
pub fn default_config_dir() -> PathBuf {
    std::env::var("DASHAI_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".dashai"))
                .unwrap_or_else(|| PathBuf::from(".dashai"))
        })
}

/// Loads, merges, and persists [`GatewayConfig`].
#[derive(Clone)]
pub struct ConfigStore {
    storage: Arc<dyn ConfigStorage>,
}

impl ConfigStore {
    pub fn new(storage: Arc<dyn ConfigStorage>) -> Self {
        Self { storage }
    }

    /// Store backed by `<dir>/openclaw-gateway-config.json`.
    pub fn file(dir: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(FileStorage::new(dir)))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Current config. Never fails: unreadable or malformed blobs yield the defaults.
    pub fn load(&self) -> GatewayConfig {
        defaults_from_env().merged(&self.stored())
    }

    /// Fields held in the persisted blob; empty when it is missing, unreadable, or malformed.
    fn stored(&self) -> PartialConfig {
        let raw = match self.storage.get(STORAGE_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return PartialConfig::default(),
            Err(e) => {
                log::warn!("config: reading persisted config failed, using defaults: {}", e);
                return PartialConfig::default();
            }
        };
        serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!("config: persisted config is malformed, using defaults: {}", e);
            PartialConfig::default()
        })
    }

    /// Merge `partial` into the persisted fields, persist them, and return the resulting
    /// effective config.
    pub fn save(&self, partial: &PartialConfig) -> Result<GatewayConfig, ConfigError> {
        let stored = self.stored().overlay(partial);
        let blob = serde_json::to_string(&stored)?;
        self.storage.set(STORAGE_KEY, &blob)?;
        let merged = defaults_from_env().merged(&stored);
        log::debug!("config: saved gateway config for {}", merged.base_url());
        Ok(merged)
    }

    /// Remove the persisted blob; the next [`load`](Self::load) returns defaults.
    pub fn clear(&self) -> Result<(), ConfigError> {
        self.storage.remove(STORAGE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(raw: &str) -> ConfigStore {
        let storage = MemoryStorage::new();
        storage.set(STORAGE_KEY, raw).unwrap();
        ConfigStore::new(Arc::new(storage))
    }

    #[test]
    fn validity_requires_http_prefix() {
        let mut c = GatewayConfig::default();
        assert!(is_valid(&c));
        c.gateway_url = "https://gw.example.com".to_string();
        assert!(is_valid(&c));
        c.gateway_url = String::new();
        assert!(!is_valid(&c));
        c.gateway_url = "ftp://x".to_string();
        assert!(!is_valid(&c));
        assert!(!is_valid_url(None));
    }

    #[test]
    fn model_and_agent_normalization() {
        let mut c = GatewayConfig::default();
        assert_eq!(c.model(), "openclaw:main");
        c.agent_id = "  ".to_string();
        assert_eq!(c.effective_agent_id(), "main");
        c.agent_id = "coach".to_string();
        assert_eq!(c.model(), "openclaw:coach");
    }

    #[test]
    fn save_empty_partial_is_idempotent() {
        let store = ConfigStore::in_memory();
        let before = store
            .save(&PartialConfig {
                gateway_url: Some("http://gw.local:9000".to_string()),
                ..Default::default()
            })
            .unwrap();
        let returned = store.save(&PartialConfig::default()).unwrap();
        assert_eq!(returned, before);
        assert_eq!(store.load(), before);
    }

    #[test]
    fn save_token_leaves_other_fields() {
        let store = ConfigStore::in_memory();
        let before = store.load();
        store
            .save(&PartialConfig {
                token: Some("abc".to_string()),
                ..Default::default()
            })
            .unwrap();
        let after = store.load();
        assert_eq!(after.token, "abc");
        assert_eq!(after.gateway_url, before.gateway_url);
        assert_eq!(after.agent_id, before.agent_id);
        assert_eq!(after.enabled, before.enabled);
        assert_eq!(after.streaming, before.streaming);
        assert_eq!(after.session_user, before.session_user);
    }

    #[test]
    fn save_persists_only_explicit_fields() {
        let storage = MemoryStorage::new();
        let store = ConfigStore::new(Arc::new(storage.clone()));
        store
            .save(&PartialConfig {
                agent_id: Some("coach".to_string()),
                ..Default::default()
            })
            .unwrap();
        store
            .save(&PartialConfig {
                enabled: Some(true),
                ..Default::default()
            })
            .unwrap();

        let raw = storage.get(STORAGE_KEY).unwrap().unwrap();
        let blob: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(blob, serde_json::json!({"agentId": "coach", "enabled": true}));
        assert_eq!(store.load().agent_id, "coach");
        assert!(store.load().enabled);
    }

    #[test]
    fn overlay_prefers_newer_fields() {
        let old = PartialConfig {
            token: Some("old".to_string()),
            agent_id: Some("coach".to_string()),
            ..Default::default()
        };
        let new = PartialConfig {
            token: Some("new".to_string()),
            ..Default::default()
        };
        let merged = old.overlay(&new);
        assert_eq!(merged.token.as_deref(), Some("new"));
        assert_eq!(merged.agent_id.as_deref(), Some("coach"));
        assert_eq!(merged.gateway_url, None);
    }

    #[test]
    fn malformed_blob_falls_back_to_defaults() {
        let store = store_with("{not json");
        assert_eq!(store.load(), defaults_from_env());
    }

    #[test]
    fn partial_blob_keeps_defaults_and_ignores_unknown_fields() {
        let store = store_with(r#"{"token":"t1","legacyTheme":"dark"}"#);
        let c = store.load();
        assert_eq!(c.token, "t1");
        assert_eq!(c.agent_id, defaults_from_env().agent_id);
    }

    #[test]
    fn clear_restores_defaults() {
        let store = ConfigStore::in_memory();
        store
            .save(&PartialConfig {
                enabled: Some(true),
                agent_id: Some("coach".to_string()),
                ..Default::default()
            })
            .unwrap();
        store.clear().unwrap();
        assert_eq!(store.load(), defaults_from_env());
    }

    #[test]
    fn file_storage_round_trip_and_missing_remove() {
        let dir = std::env::temp_dir().join(format!("dashai-config-test-{}", uuid::Uuid::new_v4()));
        let store = ConfigStore::file(&dir);
        let saved = store
            .save(&PartialConfig {
                session_user: Some("u-1".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(dir.join("openclaw-gateway-config.json").exists());
        assert_eq!(store.load(), saved);
        store.clear().unwrap();
        store.clear().unwrap();
        assert_eq!(store.load().session_user, None);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
