use crate::converter::{ResultStore, DEFAULT_STORE_MAX_BYTES, DEFAULT_STORE_MAX_FILES};
use crate::types::{CompressionSettings, MAX_ATTEMPTS};
use std::env;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub compression: CompressionConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct CompressionConfig {
    pub max_upload_bytes: usize,
    pub max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub max_files: usize,
    pub max_bytes: u64,
}

impl AppConfig {
    /// Process environment, after loading `.env` if one exists.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset or unparsable values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: lookup("PORT")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(8002),
            },
            compression: CompressionConfig {
                max_upload_bytes: lookup("MAX_UPLOAD_BYTES")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(50 * 1024 * 1024), // 50MB
                max_attempts: lookup("MAX_ATTEMPTS")
                    .and_then(|v| v.parse::<u32>().ok())
                    .unwrap_or(MAX_ATTEMPTS)
                    .clamp(1, MAX_ATTEMPTS),
            },
            storage: StorageConfig {
                max_files: lookup("RESULT_STORE_MAX_FILES")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_STORE_MAX_FILES),
                max_bytes: lookup("RESULT_STORE_MAX_BYTES")
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(DEFAULT_STORE_MAX_BYTES), // 256MB
            },
        }
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn compression_settings(&self) -> CompressionSettings {
        CompressionSettings::default().with_max_attempts(self.compression.max_attempts)
    }

    pub fn result_store(&self) -> ResultStore {
        ResultStore::with_limits(self.storage.max_files, self.storage.max_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SourceFormat;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> AppConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = config_from(&[]);
        assert_eq!(config.server_address(), "0.0.0.0:8002");
        assert_eq!(config.compression.max_upload_bytes, 50 * 1024 * 1024);
        assert_eq!(config.compression.max_attempts, 10);
        assert_eq!(config.storage.max_files, 64);
        assert_eq!(config.storage.max_bytes, 256 * 1024 * 1024);
    }

    #[test]
    fn result_store_limits_come_from_config() {
        let config = config_from(&[("RESULT_STORE_MAX_FILES", "1")]);
        let mut store = config.result_store();
        let first = store.store("a.png".to_string(), SourceFormat::Png, vec![0; 8]);
        store.store("b.png".to_string(), SourceFormat::Png, vec![0; 8]);
        assert!(store.get(&first).is_none());
        assert_eq!(store.stats().file_count, 1);
    }

    #[test]
    fn reads_overrides_and_ignores_garbage() {
        let config = config_from(&[("HOST", "127.0.0.1"), ("PORT", "nope"), ("MAX_ATTEMPTS", "4")]);
        assert_eq!(config.server_address(), "127.0.0.1:8002");

        let settings = config.compression_settings();
        assert_eq!(settings.image.search.max_attempts, 4);
        assert_eq!(settings.document.search.max_attempts, 4);
    }

    #[test]
    fn attempt_budget_is_clamped() {
        assert_eq!(config_from(&[("MAX_ATTEMPTS", "50")]).compression.max_attempts, 10);
        assert_eq!(config_from(&[("MAX_ATTEMPTS", "0")]).compression.max_attempts, 1);
    }
}
