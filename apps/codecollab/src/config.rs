use std::env;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:5001";
const SOCKET_PATH: &str = "ws";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },
    #[error("invalid {field}: {reason}")]
    InvalidUrl { field: &'static str, reason: String },
}

/// Backoff between reconnect attempts: doubles from `initial` up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.min(16)).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(10),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Server origin, e.g. `http://localhost:5001/`. REST lives under `api/`.
    pub api_url: Url,
    pub socket_url: Url,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// Minimum spacing between outbound cursor updates. Zero sends every move.
    pub cursor_debounce: Duration,
}

impl Config {
    pub fn new(api_url: impl AsRef<str>) -> Result<Self, ConfigError> {
        let api_url = parse_base(api_url.as_ref(), "api url")?;
        let socket_url = derive_socket_url(&api_url)?;
        Ok(Self {
            api_url,
            socket_url,
            connect_timeout: Duration::from_secs(5),
            reconnect: ReconnectPolicy::default(),
            cursor_debounce: Duration::ZERO,
        })
    }

    /// Load configuration from `CODECOLLAB_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api = env::var("CODECOLLAB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let mut config = Self::new(api)?;

        if let Some(socket) = non_empty_var("CODECOLLAB_SOCKET_URL") {
            config.socket_url = parse_base(&socket, "socket url")?;
        }
        if let Some(timeout) = millis_var("CODECOLLAB_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = timeout;
        }
        if let Some(initial) = millis_var("CODECOLLAB_RECONNECT_INITIAL_MS") {
            config.reconnect.initial = initial;
        }
        if let Some(max) = millis_var("CODECOLLAB_RECONNECT_MAX_MS") {
            config.reconnect.max = max;
        }
        if let Some(debounce) = millis_var("CODECOLLAB_CURSOR_DEBOUNCE_MS") {
            config.cursor_debounce = debounce;
        }
        Ok(config)
    }

    /// Root for REST endpoints, always ending in `/api/`.
    pub fn rest_base(&self) -> Result<Url, ConfigError> {
        self.api_url
            .join("api/")
            .map_err(|err| ConfigError::InvalidUrl {
                field: "api url",
                reason: err.to_string(),
            })
    }

    /// Resolves a server-relative media path (e.g. an uploaded audio file).
    pub fn media_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        match self.api_url.join(path.trim_start_matches('/')) {
            Ok(url) => url.to_string(),
            Err(_) => path.to_string(),
        }
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn millis_var(name: &str) -> Option<Duration> {
    non_empty_var(name)
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn parse_base(raw: &str, field: &'static str) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Empty { field });
    }
    let mut candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("{}{trimmed}", infer_scheme(trimmed))
    };
    if !candidate.ends_with('/') {
        candidate.push('/');
    }
    Url::parse(&candidate).map_err(|err| ConfigError::InvalidUrl {
        field,
        reason: err.to_string(),
    })
}

fn derive_socket_url(api: &Url) -> Result<Url, ConfigError> {
    let scheme = match api.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let mut socket = api.join(SOCKET_PATH).map_err(|err| ConfigError::InvalidUrl {
        field: "socket url",
        reason: err.to_string(),
    })?;
    socket
        .set_scheme(scheme)
        .map_err(|_| ConfigError::InvalidUrl {
            field: "socket url",
            reason: format!("cannot use scheme {scheme}"),
        })?;
    Ok(socket)
}

pub(crate) fn infer_scheme(base: &str) -> &'static str {
    let host_part = base
        .split('/')
        .next()
        .unwrap_or(base)
        .trim_start_matches('[')
        .split(']')
        .next()
        .unwrap_or(base);
    let host = host_part.to_ascii_lowercase();
    let private = host.starts_with("localhost")
        || host.starts_with("127.")
        || host.starts_with("0.0.0.0")
        || host.starts_with("10.")
        || host.starts_with("192.168.")
        || host == "::1"
        || host
            .strip_prefix("172.")
            .and_then(|rest| rest.split('.').next())
            .and_then(|octet| octet.parse::<u8>().ok())
            .map(|octet| (16..32).contains(&octet))
            .unwrap_or(false);
    if private { "http://" } else { "https://" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    const VARS: &[&str] = &[
        "CODECOLLAB_API_URL",
        "CODECOLLAB_SOCKET_URL",
        "CODECOLLAB_CONNECT_TIMEOUT_MS",
        "CODECOLLAB_RECONNECT_INITIAL_MS",
        "CODECOLLAB_RECONNECT_MAX_MS",
        "CODECOLLAB_CURSOR_DEBOUNCE_MS",
    ];

    fn clear_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    #[test_timeout::timeout]
    fn infers_scheme_for_bare_hosts() {
        assert_eq!(infer_scheme("collab.example.com"), "https://");
        assert_eq!(infer_scheme("localhost:5001"), "http://");
        assert_eq!(infer_scheme("192.168.1.4:5001"), "http://");
        assert_eq!(infer_scheme("172.20.0.3"), "http://");
        assert_eq!(infer_scheme("172.40.0.3"), "https://");
        assert_eq!(infer_scheme("[::1]:5001"), "http://");
    }

    #[test_timeout::timeout]
    fn derives_socket_and_rest_urls() {
        let config = Config::new("localhost:5001").unwrap();
        assert_eq!(config.api_url.as_str(), "http://localhost:5001/");
        assert_eq!(config.socket_url.as_str(), "ws://localhost:5001/ws");
        assert_eq!(
            config.rest_base().unwrap().as_str(),
            "http://localhost:5001/api/"
        );

        let secure = Config::new("https://collab.example.com").unwrap();
        assert_eq!(secure.socket_url.as_str(), "wss://collab.example.com/ws");
    }

    #[test_timeout::timeout]
    fn rejects_empty_api_url() {
        assert!(matches!(Config::new("  "), Err(ConfigError::Empty { .. })));
    }

    #[test_timeout::timeout]
    fn media_urls_resolve_against_origin() {
        let config = Config::new("http://localhost:5001").unwrap();
        assert_eq!(
            config.media_url("/uploads/audio/a.webm"),
            "http://localhost:5001/uploads/audio/a.webm"
        );
        assert_eq!(
            config.media_url("https://cdn.example.com/a.webm"),
            "https://cdn.example.com/a.webm"
        );
    }

    #[test_timeout::timeout]
    fn reconnect_delay_doubles_and_caps() {
        let policy = ReconnectPolicy {
            initial: Duration::from_millis(100),
            max: Duration::from_millis(1000),
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(4), Duration::from_millis(1000));
        assert_eq!(policy.delay(40), Duration::from_millis(1000));
    }

    #[test_timeout::timeout]
    fn from_env_defaults_and_overrides() {
        let _lock = ENV_MUTEX.lock().unwrap();
        clear_vars();

        let config = Config::from_env().unwrap();
        assert_eq!(config.api_url.as_str(), "http://localhost:5001/");
        assert_eq!(config.cursor_debounce, Duration::ZERO);

        unsafe {
            env::set_var("CODECOLLAB_API_URL", "collab.example.com");
            env::set_var("CODECOLLAB_SOCKET_URL", "wss://rt.example.com/socket");
            env::set_var("CODECOLLAB_CURSOR_DEBOUNCE_MS", "40");
            env::set_var("CODECOLLAB_RECONNECT_MAX_MS", "2500");
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.api_url.as_str(), "https://collab.example.com/");
        assert_eq!(config.socket_url.as_str(), "wss://rt.example.com/socket/");
        assert_eq!(config.cursor_debounce, Duration::from_millis(40));
        assert_eq!(config.reconnect.max, Duration::from_millis(2500));

        clear_vars();
    }
}
