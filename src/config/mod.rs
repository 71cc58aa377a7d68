//! Configuration module for the Pinmap backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use reqwest::Url;

use crate::db::StoreOptions;
use crate::router::RoutePolicy;

/// App shell assets, relative to the app origin.
const SHELL_ASSETS: [&str; 7] = [
    "./",
    "./index.html",
    "./styles.css",
    "./app.js",
    "./manifest.json",
    "./icon-192.png",
    "./icon-512.png",
];

/// Map library and marker images loaded from CDNs.
const CDN_ASSETS: [&str; 6] = [
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
    "https://unpkg.com/leaflet@1.9.4/dist/leaflet.js",
    "https://raw.githubusercontent.com/pointhi/leaflet-color-markers/master/img/marker-icon-2x-green.png",
    "https://raw.githubusercontent.com/pointhi/leaflet-color-markers/master/img/marker-icon-2x-blue.png",
    "https://raw.githubusercontent.com/pointhi/leaflet-color-markers/master/img/marker-icon-2x-grey.png",
    "https://cdnjs.cloudflare.com/ajax/libs/leaflet/1.9.4/images/marker-shadow.png",
];

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the record store and the offline cache
    pub data_dir: PathBuf,
    pub store_name: String,
    /// Target schema version of the record store
    pub store_version: i64,
    pub cache_prefix: String,
    pub cache_version: String,
    /// Upstream origin of the app shell, always ending in `/`
    pub app_origin: Url,
    pub tile_hosts: Vec<String>,
    /// Absolute URLs cached at install time
    pub asset_manifest: Vec<String>,
    /// Address of the JSON API listener
    pub bind_addr: SocketAddr,
    /// Address of the caching proxy listener
    pub proxy_addr: SocketAddr,
    pub fetch_timeout: Duration,
    pub busy_timeout: Duration,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    pub log_format: LogFormat,
}

/// A configuration value that could not be used.
#[derive(Debug)]
pub enum ConfigError {
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    Manifest {
        path: PathBuf,
        reason: String,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value, reason } => {
                write!(f, "invalid {}={:?}: {}", var, value, reason)
            }
            ConfigError::Manifest { path, reason } => {
                write!(f, "cannot load asset manifest {}: {}", path.display(), reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let data_dir = PathBuf::from(var("PINMAP_DATA_DIR", "./data"));
        let store_name = non_empty("PINMAP_STORE_NAME", var("PINMAP_STORE_NAME", "pinmap"))?;

        let store_version: i64 = parse("PINMAP_STORE_VERSION", var("PINMAP_STORE_VERSION", "1"))?;
        if store_version < 1 {
            return Err(invalid(
                "PINMAP_STORE_VERSION",
                store_version.to_string(),
                "must be at least 1",
            ));
        }

        let cache_prefix = non_empty("PINMAP_CACHE_PREFIX", var("PINMAP_CACHE_PREFIX", "pinmap"))?;
        let cache_version = non_empty("PINMAP_CACHE_VERSION", var("PINMAP_CACHE_VERSION", "v1"))?;

        let app_origin = parse_origin(var("PINMAP_APP_ORIGIN", "http://127.0.0.1:5173/"))?;

        let tile_hosts = var("PINMAP_TILE_HOSTS", "tile.openstreetmap.org")
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        let asset_manifest = match lookup("PINMAP_ASSET_MANIFEST") {
            Some(path) => load_manifest(Path::new(&path), &app_origin)?,
            None => default_manifest(&app_origin),
        };

        let bind_addr = parse("PINMAP_BIND_ADDR", var("PINMAP_BIND_ADDR", "127.0.0.1:8080"))?;
        let proxy_addr = parse("PINMAP_PROXY_ADDR", var("PINMAP_PROXY_ADDR", "127.0.0.1:8081"))?;

        let fetch_timeout = Duration::from_secs(parse(
            "PINMAP_FETCH_TIMEOUT_SECS",
            var("PINMAP_FETCH_TIMEOUT_SECS", "15"),
        )?);
        let busy_timeout = Duration::from_millis(parse(
            "PINMAP_BUSY_TIMEOUT_MS",
            var("PINMAP_BUSY_TIMEOUT_MS", "5000"),
        )?);

        let log_level = var("PINMAP_LOG_LEVEL", "info");
        let log_format = match var("PINMAP_LOG_FORMAT", "text").to_ascii_lowercase().as_str() {
            "text" => LogFormat::Text,
            "json" => LogFormat::Json,
            other => {
                return Err(invalid(
                    "PINMAP_LOG_FORMAT",
                    other.to_string(),
                    "expected text or json",
                ))
            }
        };

        Ok(Self {
            data_dir,
            store_name,
            store_version,
            cache_prefix,
            cache_version,
            app_origin,
            tile_hosts,
            asset_manifest,
            bind_addr,
            proxy_addr,
            fetch_timeout,
            busy_timeout,
            log_level,
            log_format,
        })
    }

    /// Name of the cache generation this build serves, e.g. `pinmap-v1`.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.cache_prefix, self.cache_version)
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            busy_timeout: self.busy_timeout,
            ..StoreOptions::default()
        }
    }

    pub fn route_policy(&self) -> RoutePolicy {
        RoutePolicy {
            app_origin: self.app_origin.clone(),
            tile_hosts: self.tile_hosts.clone(),
        }
    }
}

fn invalid(var: &'static str, value: String, reason: impl ToString) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.to_string(),
    }
}

fn parse<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| invalid(var, value.clone(), e))
}

fn non_empty(var: &'static str, value: String) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(invalid(var, value, "must not be empty"));
    }
    Ok(trimmed.to_string())
}

fn parse_origin(value: String) -> Result<Url, ConfigError> {
    let mut url = Url::parse(value.trim()).map_err(|e| invalid("PINMAP_APP_ORIGIN", value.clone(), e))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("PINMAP_APP_ORIGIN", value, "expected an http(s) URL"));
    }
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn default_manifest(app_origin: &Url) -> Vec<String> {
    SHELL_ASSETS
        .iter()
        .chain(CDN_ASSETS.iter())
        .filter_map(|asset| app_origin.join(asset).ok())
        .map(String::from)
        .collect()
}

/// Read a JSON array of URLs. Relative entries resolve against the app origin.
fn load_manifest(path: &Path, app_origin: &Url) -> Result<Vec<String>, ConfigError> {
    let manifest_error = |reason: String| ConfigError::Manifest {
        path: path.to_path_buf(),
        reason,
    };

    let raw = std::fs::read_to_string(path).map_err(|e| manifest_error(e.to_string()))?;
    let entries: Vec<String> =
        serde_json::from_str(&raw).map_err(|e| manifest_error(e.to_string()))?;

    entries
        .iter()
        .map(|entry| {
            app_origin
                .join(entry)
                .map(String::from)
                .map_err(|e| manifest_error(format!("{}: {}", entry, e)))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.store_name, "pinmap");
        assert_eq!(config.store_version, 1);
        assert_eq!(config.cache_name(), "pinmap-v1");
        assert_eq!(config.app_origin.as_str(), "http://127.0.0.1:5173/");
        assert_eq!(config.tile_hosts, vec!["tile.openstreetmap.org"]);
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(config.proxy_addr.to_string(), "127.0.0.1:8081");
        assert_eq!(config.fetch_timeout, Duration::from_secs(15));
        assert_eq!(config.busy_timeout, Duration::from_millis(5000));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_default_manifest_resolves_shell_against_origin() {
        let config = config_from(&[("PINMAP_APP_ORIGIN", "https://pins.example.org/app")]).unwrap();

        assert_eq!(config.app_origin.as_str(), "https://pins.example.org/app/");
        assert_eq!(config.asset_manifest.len(), 13);
        assert_eq!(config.asset_manifest[0], "https://pins.example.org/app/");
        assert_eq!(
            config.asset_manifest[1],
            "https://pins.example.org/app/index.html"
        );
        assert!(config
            .asset_manifest
            .contains(&"https://unpkg.com/leaflet@1.9.4/dist/leaflet.js".to_string()));
    }

    #[test]
    fn test_tile_hosts_are_split_and_trimmed() {
        let config = config_from(&[(
            "PINMAP_TILE_HOSTS",
            "tile.openstreetmap.org, tiles.example.net ,,",
        )])
        .unwrap();
        assert_eq!(
            config.tile_hosts,
            vec!["tile.openstreetmap.org", "tiles.example.net"]
        );
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let err = config_from(&[("PINMAP_BIND_ADDR", "not-an-addr")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                var: "PINMAP_BIND_ADDR",
                ..
            }
        ));

        let err = config_from(&[("PINMAP_STORE_VERSION", "0")]).unwrap_err();
        assert!(err.to_string().contains("PINMAP_STORE_VERSION"));

        assert!(config_from(&[("PINMAP_APP_ORIGIN", "ftp://files.example.org/")]).is_err());
        assert!(config_from(&[("PINMAP_CACHE_VERSION", "  ")]).is_err());
        assert!(config_from(&[("PINMAP_LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_manifest_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(
            &path,
            r#"["./index.html", "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"]"#,
        )
        .unwrap();

        let config = config_from(&[("PINMAP_ASSET_MANIFEST", path.to_str().unwrap())]).unwrap();
        assert_eq!(
            config.asset_manifest,
            vec![
                "http://127.0.0.1:5173/index.html",
                "https://unpkg.com/leaflet@1.9.4/dist/leaflet.css",
            ]
        );

        let missing = dir.path().join("missing.json");
        let err = config_from(&[("PINMAP_ASSET_MANIFEST", missing.to_str().unwrap())]).unwrap_err();
        assert!(matches!(err, ConfigError::Manifest { .. }));
    }
}
