//! Client configuration

use std::time::Duration;

/// Default storefront API (the production deployment)
pub const DEFAULT_API_URL: &str = "https://thrift-ease-1.onrender.com";

/// Configuration for the session store and its HTTP client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the storefront API, without trailing slash
    pub base_url: String,

    /// Timeout applied to every outbound request (default: 10s)
    pub request_timeout: Duration,

    /// Cadence of the background reconciliation loop (default: 1s)
    pub sync_interval: Duration,

    /// Namespace prepended to every persisted key (default: "thriftease:")
    pub key_prefix: String,

    /// Whether cart mutations push to the server immediately (default: true).
    /// When false, saves are only queued and go out on the next sync.
    pub sync_on_mutation: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(1),
            key_prefix: "thriftease:".to_string(),
            sync_on_mutation: true,
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at the given API base URL
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        Self::default().with_base_url(base_url)
    }

    /// Build a configuration from `THRIFTEASE_*` environment variables.
    ///
    /// Unset or unparseable variables keep their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var("THRIFTEASE_API_URL") {
            config = config.with_base_url(url);
        }
        if let Some(secs) = env_u64("THRIFTEASE_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = env_u64("THRIFTEASE_SYNC_INTERVAL_MS") {
            config.sync_interval = Duration::from_millis(ms);
        }
        if let Ok(prefix) = std::env::var("THRIFTEASE_KEY_PREFIX") {
            config.key_prefix = prefix;
        }
        config
    }

    /// Set the API base URL; a trailing slash is stripped
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        let url: String = base_url.into();
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set the per-request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the background reconciliation cadence
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    /// Set the persisted key namespace
    pub fn with_key_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Enable or disable immediate server pushes on cart mutation
    pub fn with_sync_on_mutation(mut self, enabled: bool) -> Self {
        self.sync_on_mutation = enabled;
        self
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(variable = name, value = %raw, "ignoring unparseable setting");
            None
        }
    }
}
