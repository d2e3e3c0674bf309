//! Sidecar configuration.
//!
//! All settings can be overridden via FETCH_BRIDGE_* environment variables.

use std::path::PathBuf;

use url::Url;

const PREFIX: &str = "FETCH_BRIDGE_";

/// Configuration for the fetch-bridge sidecar.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Unix socket the sidecar listens on.
    pub socket_path: PathBuf,
    /// Directory containing route .toml files.
    pub route_dir: PathBuf,
    /// Default script timeout in milliseconds (default: 30 seconds).
    pub timeout_ms: u64,
    /// Base for relative fetch URLs.
    pub base_url: Option<Url>,
    /// Replacement polyfill bundle; `None` uses the embedded one.
    pub polyfill_path: Option<PathBuf>,
    /// tracing filter directive; falls back to `RUST_LOG`.
    pub log_filter: String,
}

impl BridgeConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |name: &str| var(&format!("{PREFIX}{name}")).filter(|v| !v.is_empty());

        let base_url = match get("BASE_URL") {
            Some(raw) => match Url::parse(&raw) {
                Ok(url) => Some(url),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "ignoring invalid {PREFIX}BASE_URL");
                    None
                }
            },
            None => defaults.base_url,
        };

        Self {
            socket_path: get("SOCKET").map(PathBuf::from).unwrap_or(defaults.socket_path),
            route_dir: get("ROUTE_DIR").map(PathBuf::from).unwrap_or(defaults.route_dir),
            timeout_ms: parse_u64(get("TIMEOUT_MS"), defaults.timeout_ms),
            base_url,
            polyfill_path: get("POLYFILL").map(PathBuf::from),
            log_filter: get("LOG")
                .or_else(|| var("RUST_LOG").filter(|v| !v.is_empty()))
                .unwrap_or(defaults.log_filter),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/fetch-bridge.sock"),
            route_dir: PathBuf::from("./routes"),
            timeout_ms: 30_000,
            base_url: Url::parse("http://localhost/").ok(),
            polyfill_path: None,
            log_filter: "info".into(),
        }
    }
}

/// Parse a u64 setting, falling back to a default.
fn parse_u64(value: Option<String>, default: u64) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> BridgeConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BridgeConfig::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]);
        assert_eq!(cfg.socket_path, PathBuf::from("/tmp/fetch-bridge.sock"));
        assert_eq!(cfg.route_dir, PathBuf::from("./routes"));
        assert_eq!(cfg.timeout_ms, 30_000);
        assert_eq!(cfg.base_url.unwrap().as_str(), "http://localhost/");
        assert!(cfg.polyfill_path.is_none());
        assert_eq!(cfg.log_filter, "info");
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("FETCH_BRIDGE_SOCKET", "/run/fb.sock"),
            ("FETCH_BRIDGE_ROUTE_DIR", "/etc/fb/routes"),
            ("FETCH_BRIDGE_TIMEOUT_MS", "1500"),
            ("FETCH_BRIDGE_BASE_URL", "https://api.internal/v1/"),
            ("FETCH_BRIDGE_POLYFILL", "/etc/fb/fetch.js"),
            ("FETCH_BRIDGE_LOG", "fetch_bridge=debug"),
        ]);
        assert_eq!(cfg.socket_path, PathBuf::from("/run/fb.sock"));
        assert_eq!(cfg.route_dir, PathBuf::from("/etc/fb/routes"));
        assert_eq!(cfg.timeout_ms, 1500);
        assert_eq!(cfg.base_url.unwrap().as_str(), "https://api.internal/v1/");
        assert_eq!(cfg.polyfill_path, Some(PathBuf::from("/etc/fb/fetch.js")));
        assert_eq!(cfg.log_filter, "fetch_bridge=debug");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let cfg = config(&[
            ("FETCH_BRIDGE_TIMEOUT_MS", "soon"),
            ("FETCH_BRIDGE_BASE_URL", "not a url"),
        ]);
        assert_eq!(cfg.timeout_ms, 30_000);
        assert!(cfg.base_url.is_none());
    }

    #[test]
    fn test_log_filter_precedence() {
        assert_eq!(config(&[("RUST_LOG", "warn")]).log_filter, "warn");
        let cfg = config(&[("RUST_LOG", "warn"), ("FETCH_BRIDGE_LOG", "debug")]);
        assert_eq!(cfg.log_filter, "debug");
    }
}
