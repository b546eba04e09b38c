use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::cache::CacheSettings;
use crate::models::PredefinedTag;

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct CatalogConfig {
    pub listen_addr: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub database_acquire_timeout_ms: u64,
    pub run_migrations: bool,

    /// No URL means no cache: every read goes to the database.
    pub redis_url: Option<String>,
    pub cache_prefix: String,
    pub cache_image_ttl_secs: u64,
    pub cache_list_ttl_secs: u64,
    pub cache_stat_ttl_secs: u64,
    pub cache_operation_timeout_ms: u64,

    pub storage_dir: String,
    pub public_base_url: String,
    pub log_dir: String,

    pub predefined_tags: Vec<PredefinedTag>,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialCatalogConfig {
    listen_addr: Option<String>,
    database_url: Option<String>,
    database_max_connections: Option<u32>,
    database_acquire_timeout_ms: Option<u64>,
    run_migrations: Option<bool>,
    redis_url: Option<String>,
    cache_prefix: Option<String>,
    cache_image_ttl_secs: Option<u64>,
    cache_list_ttl_secs: Option<u64>,
    cache_stat_ttl_secs: Option<u64>,
    cache_operation_timeout_ms: Option<u64>,
    storage_dir: Option<String>,
    public_base_url: Option<String>,
    log_dir: Option<String>,
    #[serde(default)]
    predefined_tags: Option<Vec<PredefinedTag>>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_storage_dir() -> String {
    "data/images".to_string()
}

fn default_public_base_url() -> String {
    "http://localhost:8080/files".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

impl CatalogConfig {
    /// Layers defaults, the optional TOML file at `config_path` and `CATALOG_*`
    /// environment variables, later layers winning. `DATABASE_URL` is accepted as a
    /// fallback for `CATALOG_DATABASE_URL`.
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let file_config: PartialCatalogConfig = match config_path {
            Some(path_str) if Path::new(path_str).exists() => {
                let contents = fs::read_to_string(path_str)
                    .map_err(|e| format!("Failed to read config file at {path_str:?}: {e}"))?;
                parse_toml(&contents)
                    .map_err(|e| format!("Failed to parse TOML from config file at {path_str:?}: {e}"))?
            }
            _ => PartialCatalogConfig::default(),
        };

        let mut env_config: PartialCatalogConfig = envy::prefixed("CATALOG_")
            .from_env::<PartialCatalogConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;
        if env_config.database_url.is_none() {
            env_config.database_url = std::env::var("DATABASE_URL").ok();
        }

        Self::merge(env_config, file_config)
    }

    fn merge(env: PartialCatalogConfig, file: PartialCatalogConfig) -> Result<Self, String> {
        let defaults = CacheSettings::default();
        let config = CatalogConfig {
            listen_addr: env.listen_addr.or(file.listen_addr).unwrap_or_else(default_listen_addr),
            database_url: env
                .database_url
                .or(file.database_url)
                .ok_or("DATABASE_URL is required")?,
            database_max_connections: env
                .database_max_connections
                .or(file.database_max_connections)
                .unwrap_or(10),
            database_acquire_timeout_ms: env
                .database_acquire_timeout_ms
                .or(file.database_acquire_timeout_ms)
                .unwrap_or(5_000),
            run_migrations: env.run_migrations.or(file.run_migrations).unwrap_or(true),
            redis_url: env
                .redis_url
                .or(file.redis_url)
                .filter(|url| !url.trim().is_empty()),
            cache_prefix: env.cache_prefix.or(file.cache_prefix).unwrap_or(defaults.prefix),
            cache_image_ttl_secs: env
                .cache_image_ttl_secs
                .or(file.cache_image_ttl_secs)
                .unwrap_or(defaults.image_ttl.as_secs()),
            cache_list_ttl_secs: env
                .cache_list_ttl_secs
                .or(file.cache_list_ttl_secs)
                .unwrap_or(defaults.list_ttl.as_secs()),
            cache_stat_ttl_secs: env
                .cache_stat_ttl_secs
                .or(file.cache_stat_ttl_secs)
                .unwrap_or(defaults.stat_ttl.as_secs()),
            cache_operation_timeout_ms: env
                .cache_operation_timeout_ms
                .or(file.cache_operation_timeout_ms)
                .unwrap_or(defaults.operation_timeout.as_millis() as u64),
            storage_dir: env.storage_dir.or(file.storage_dir).unwrap_or_else(default_storage_dir),
            public_base_url: env
                .public_base_url
                .or(file.public_base_url)
                .unwrap_or_else(default_public_base_url),
            log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
            predefined_tags: env
                .predefined_tags
                .or(file.predefined_tags)
                .unwrap_or_default(),
        };

        if config.cache_operation_timeout_ms >= config.database_acquire_timeout_ms {
            return Err(format!(
                "cache_operation_timeout_ms ({}) must be shorter than database_acquire_timeout_ms ({})",
                config.cache_operation_timeout_ms, config.database_acquire_timeout_ms
            ));
        }
        let prefix = &config.cache_prefix;
        if prefix.is_empty()
            || prefix
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, '*' | '?' | '[' | ']' | ':'))
        {
            return Err(format!(
                "cache_prefix '{prefix}' must be non-empty without whitespace, ':' or glob characters"
            ));
        }
        Ok(config)
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            prefix: self.cache_prefix.clone(),
            image_ttl: Duration::from_secs(self.cache_image_ttl_secs),
            list_ttl: Duration::from_secs(self.cache_list_ttl_secs),
            stat_ttl: Duration::from_secs(self.cache_stat_ttl_secs),
            operation_timeout: Duration::from_millis(self.cache_operation_timeout_ms),
        }
    }
}

fn parse_toml(contents: &str) -> Result<PartialCatalogConfig, toml::de::Error> {
    toml::from_str(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILE: &str = r##"
listen_addr = "127.0.0.1:9000"
database_url = "postgres://file/catalog"
redis_url = "redis://127.0.0.1/"
cache_list_ttl_secs = 60

[[predefined_tags]]
name = "nature"
category = "scene"
display_order = 1

[[predefined_tags]]
name = "portrait"
color = "#ff8800"
"##;

    #[test]
    fn test_file_values_over_defaults() {
        let config = CatalogConfig::merge(PartialCatalogConfig::default(), parse_toml(FILE).unwrap()).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1/"));
        assert_eq!(config.cache_list_ttl_secs, 60);
        assert_eq!(config.cache_image_ttl_secs, 24 * 60 * 60);
        assert_eq!(config.predefined_tags.len(), 2);
        assert_eq!(config.predefined_tags[1].color.as_deref(), Some("#ff8800"));

        let settings = config.cache_settings();
        assert_eq!(settings.list_ttl, Duration::from_secs(60));
        assert_eq!(settings.operation_timeout, Duration::from_millis(250));
        assert_eq!(settings.prefix, "image-catalog");
    }

    #[test]
    fn test_env_overrides_file() {
        let env = PartialCatalogConfig {
            database_url: Some("postgres://env/catalog".to_string()),
            redis_url: Some("  ".to_string()),
            ..PartialCatalogConfig::default()
        };
        let config = CatalogConfig::merge(env, parse_toml(FILE).unwrap()).unwrap();
        assert_eq!(config.database_url, "postgres://env/catalog");
        // A blank URL disables the cache.
        assert_eq!(config.redis_url, None);
    }

    #[test]
    fn test_database_url_is_required() {
        let err = CatalogConfig::merge(PartialCatalogConfig::default(), PartialCatalogConfig::default()).unwrap_err();
        assert!(err.contains("DATABASE_URL"));
    }

    #[test]
    fn test_cache_timeout_must_undercut_pool_timeout() {
        let file = PartialCatalogConfig {
            database_url: Some("postgres://x".to_string()),
            database_acquire_timeout_ms: Some(100),
            cache_operation_timeout_ms: Some(200),
            ..PartialCatalogConfig::default()
        };
        assert!(CatalogConfig::merge(PartialCatalogConfig::default(), file).is_err());
    }

    #[test]
    fn test_cache_prefix_is_validated() {
        for prefix in ["", "cat*", "img catalog", "a:b", "cat[1]"] {
            let env = PartialCatalogConfig {
                database_url: Some("postgres://x".to_string()),
                cache_prefix: Some(prefix.to_string()),
                ..PartialCatalogConfig::default()
            };
            let err = CatalogConfig::merge(env, PartialCatalogConfig::default()).unwrap_err();
            assert!(err.contains("cache_prefix"), "{prefix}: {err}");
        }
    }
}
