use std::sync::Arc;

use jobboard_core::ApiError;
use tokio::sync::watch;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid server url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Shared, explicitly passed server configuration.
///
/// Clones share one value. The transport reads it on every request and the
/// event stream on every (re)connect, so an update takes effect without
/// rebuilding either; [`Config::subscribe`] lets owners react immediately.
#[derive(Debug, Clone)]
pub struct Config {
    base_url: Arc<watch::Sender<Option<String>>>,
}

impl Config {
    pub fn unconfigured() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self {
            base_url: Arc::new(tx),
        }
    }

    pub fn with_base_url(raw: &str) -> Result<Self, ConfigError> {
        let config = Self::unconfigured();
        config.update_base_url(raw)?;
        Ok(config)
    }

    /// Normalised base url, e.g. `http://host:8000`.
    pub fn base_url(&self) -> Option<String> {
        self.base_url.borrow().clone()
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.borrow().is_some()
    }

    /// Validates and stores a new base url, returning its normalised form.
    pub fn update_base_url(&self, raw: &str) -> Result<String, ConfigError> {
        let normalized = normalize_base_url(raw)?;
        self.base_url.send_replace(Some(normalized.clone()));
        Ok(normalized)
    }

    pub fn clear_base_url(&self) {
        self.base_url.send_replace(None);
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<String>> {
        self.base_url.subscribe()
    }

    /// Absolute http(s) url for an API path.
    pub fn http_url(&self, path: &str) -> Result<String, ApiError> {
        let base = self.base_url().ok_or_else(ApiError::not_configured)?;
        Ok(join(&base, path))
    }

    /// Absolute ws(s) url for a stream path.
    pub fn stream_url(&self, path: &str) -> Result<String, ApiError> {
        let base = self.base_url().ok_or_else(ApiError::not_configured)?;
        let ws_base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base
        };
        Ok(join(&ws_base, path))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::unconfigured()
    }
}

/// Accepts `http`/`https` urls with a host. Surrounding whitespace and
/// trailing slashes are dropped; a path prefix is kept.
pub fn normalize_base_url(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(trimmed).map_err(|err| invalid(&err.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(invalid("query strings and fragments are not supported"));
    }

    Ok(parsed.as_str().trim_end_matches('/').to_string())
}

fn join(base: &str, path: &str) -> String {
    format!("{}/{}", base, path.trim_start_matches('/'))
}
