// Runtime configuration, read once from the environment at startup

use std::net::{SocketAddr, TcpStream};
use std::path::PathBuf;
use std::time::Duration;

use crate::resolver::browser::{BrowserConfig, StreamMarkers};
use crate::resolver::muxer::MuxerConfig;
use crate::resolver::quality_selector::DEFAULT_VIDEO_QUALITY_TOKENS;
use crate::resolver::utils::DEFAULT_USER_AGENT;

const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";

/// Local ports commonly used by SOCKS5 clients, probed for `PROXY=auto`
const COMMON_SOCKS_PORTS: &[u16] = &[1080, 7890, 10808, 1081, 7891];

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    /// Externally reachable base URL (merged files are linked under it)
    pub public_base_url: String,
    pub cache_dir: PathBuf,
    pub ffmpeg_path: String,
    pub chrome_path: Option<PathBuf>,
    pub production: bool,
    /// Route the raw upstream passthrough. Never on in production.
    pub debug_endpoints: bool,
    /// Include diagnostics in error bodies
    pub expose_error_details: bool,
    pub browser_fallback: bool,
    pub fetch_timeout: Duration,
    pub navigation_timeout: Duration,
    pub settle: Duration,
    pub remux_timeout_secs: u64,
    /// Merged files older than this are purged; kept forever when None
    pub cache_max_age: Option<Duration>,
    pub video_quality_tokens: Vec<String>,
    pub user_agent: String,
    pub proxy: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; unset or blank keys take their defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let production = get("APP_ENV").is_some_and(|v| v.eq_ignore_ascii_case("production"));

        let debug_endpoints = flag(get("DEBUG_ENDPOINTS"), "DEBUG_ENDPOINTS", false);
        if production && debug_endpoints {
            tracing::warn!("DEBUG_ENDPOINTS ignored in production");
        }

        let bind_addr = get("BIND_ADDR")
            .and_then(|v| parse_or_warn::<SocketAddr>("BIND_ADDR", &v))
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 3000)));

        let video_quality_tokens = get("VIDEO_QUALITY_TOKENS")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>()
            })
            .filter(|tokens| !tokens.is_empty())
            .unwrap_or_else(|| {
                DEFAULT_VIDEO_QUALITY_TOKENS
                    .iter()
                    .map(|t| t.to_string())
                    .collect()
            });

        let proxy = match get("PROXY") {
            Some(p) if p.eq_ignore_ascii_case("auto") => detect_local_socks_proxy(),
            other => other,
        };

        Self {
            bind_addr,
            public_base_url: get("PUBLIC_BASE_URL")
                .unwrap_or_else(|| DEFAULT_PUBLIC_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            cache_dir: get("CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_dir),
            ffmpeg_path: get("FFMPEG_PATH").unwrap_or_else(|| "ffmpeg".to_string()),
            chrome_path: get("CHROME_PATH").map(PathBuf::from),
            production,
            debug_endpoints: debug_endpoints && !production,
            expose_error_details: flag(get("EXPOSE_ERROR_DETAILS"), "EXPOSE_ERROR_DETAILS", !production),
            browser_fallback: flag(get("BROWSER_FALLBACK"), "BROWSER_FALLBACK", true),
            fetch_timeout: Duration::from_secs(secs(get("FETCH_TIMEOUT_SECS"), "FETCH_TIMEOUT_SECS", 10)),
            navigation_timeout: Duration::from_secs(secs(
                get("NAVIGATION_TIMEOUT_SECS"),
                "NAVIGATION_TIMEOUT_SECS",
                30,
            )),
            settle: Duration::from_secs(secs(get("SETTLE_SECS"), "SETTLE_SECS", 5)),
            remux_timeout_secs: secs(get("REMUX_TIMEOUT_SECS"), "REMUX_TIMEOUT_SECS", 120),
            cache_max_age: get("CACHE_MAX_AGE_SECS")
                .and_then(|v| parse_or_warn::<u64>("CACHE_MAX_AGE_SECS", &v))
                .filter(|&s| s > 0)
                .map(Duration::from_secs),
            video_quality_tokens,
            user_agent: get("USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            proxy,
        }
    }

    pub fn muxer_config(&self) -> MuxerConfig {
        MuxerConfig {
            cache_dir: self.cache_dir.clone(),
            public_base_url: self.public_base_url.clone(),
            ffmpeg_path: self.ffmpeg_path.clone(),
            remux_timeout_secs: self.remux_timeout_secs,
        }
    }

    pub fn browser_config(&self) -> BrowserConfig {
        BrowserConfig {
            chrome_path: self.chrome_path.clone(),
            user_agent: self.user_agent.clone(),
            navigation_timeout: self.navigation_timeout,
            settle: self.settle,
            video_quality_tokens: self.video_quality_tokens.clone(),
            markers: StreamMarkers::default(),
            ..BrowserConfig::default()
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("reel-resolver")
}

fn parse_or_warn<T: std::str::FromStr>(key: &str, value: &str) -> Option<T> {
    match value.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value, "invalid value, using default");
            None
        }
    }
}

fn secs(value: Option<String>, key: &str, default: u64) -> u64 {
    value
        .and_then(|v| parse_or_warn::<u64>(key, &v))
        .filter(|&s| s > 0)
        .unwrap_or(default)
}

fn flag(value: Option<String>, key: &str, default: bool) -> bool {
    match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => default,
        Some("1" | "true" | "yes" | "on") => true,
        Some("0" | "false" | "no" | "off") => false,
        Some(other) => {
            tracing::warn!(key, value = other, "invalid flag, using default");
            default
        }
    }
}

/// First local SOCKS5 listener on a well-known port
pub fn detect_local_socks_proxy() -> Option<String> {
    for &port in COMMON_SOCKS_PORTS {
        let addr = SocketAddr::from(([127, 0, 0, 1], port));
        if TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok() {
            tracing::info!(port, "detected local SOCKS5 proxy");
            return Some(format!("socks5h://127.0.0.1:{}", port));
        }
    }

    tracing::info!("no local SOCKS5 proxy detected");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> AppConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(c.public_base_url, DEFAULT_PUBLIC_BASE_URL);
        assert_eq!(c.ffmpeg_path, "ffmpeg");
        assert_eq!(c.fetch_timeout, Duration::from_secs(10));
        assert_eq!(c.navigation_timeout, Duration::from_secs(30));
        assert_eq!(c.settle, Duration::from_secs(5));
        assert_eq!(c.remux_timeout_secs, 120);
        assert_eq!(c.cache_max_age, None);
        assert!(!c.production);
        assert!(!c.debug_endpoints);
        assert!(c.expose_error_details);
        assert!(c.browser_fallback);
        assert!(c.cache_dir.ends_with("reel-resolver"));
        assert_eq!(c.video_quality_tokens[0], "1080p");
    }

    #[test]
    fn test_production_forces_debug_off() {
        let c = config(&[("APP_ENV", "production"), ("DEBUG_ENDPOINTS", "true")]);
        assert!(c.production);
        assert!(!c.debug_endpoints);
        assert!(!c.expose_error_details);

        let c = config(&[("APP_ENV", "development"), ("DEBUG_ENDPOINTS", "1")]);
        assert!(c.debug_endpoints);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let c = config(&[
            ("BIND_ADDR", "not-an-addr"),
            ("FETCH_TIMEOUT_SECS", "soon"),
            ("REMUX_TIMEOUT_SECS", "0"),
            ("BROWSER_FALLBACK", "maybe"),
            ("CACHE_MAX_AGE_SECS", "a week"),
        ]);
        assert_eq!(c.cache_max_age, None);
        assert_eq!(c.bind_addr.to_string(), "0.0.0.0:3000");
        assert_eq!(c.fetch_timeout, Duration::from_secs(10));
        assert_eq!(c.remux_timeout_secs, 120);
        assert!(c.browser_fallback);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("PUBLIC_BASE_URL", "https://media.example.com/"),
            ("VIDEO_QUALITY_TOKENS", " 720p, ,480p "),
            ("CACHE_DIR", "/srv/cache"),
            ("PROXY", "socks5h://10.0.0.1:1080"),
            ("CACHE_MAX_AGE_SECS", "86400"),
        ]);
        assert_eq!(c.cache_max_age, Some(Duration::from_secs(86400)));
        assert_eq!(c.public_base_url, "https://media.example.com");
        assert_eq!(c.video_quality_tokens, vec!["720p", "480p"]);
        assert_eq!(c.cache_dir, PathBuf::from("/srv/cache"));
        assert_eq!(c.proxy.as_deref(), Some("socks5h://10.0.0.1:1080"));
        assert_eq!(c.muxer_config().public_base_url, "https://media.example.com");
        assert_eq!(c.browser_config().video_quality_tokens, vec!["720p", "480p"]);
    }
}
