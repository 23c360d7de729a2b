use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("host is empty")]
    EmptyHost,

    #[error("host must be an http:// or https:// url")]
    InvalidHost,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_like_debounce_ms() -> u64 {
    500
}

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ClientConfig {
    /// Base url of the server, without trailing slash
    pub host: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_like_debounce_ms")]
    pub like_debounce_ms: u64,
}

impl ClientConfig {
    pub fn new(host: &str) -> Result<ClientConfig, ConfigError> {
        Ok(ClientConfig {
            host: normalize_host(host)?,
            request_timeout_ms: default_request_timeout_ms(),
            like_debounce_ms: default_like_debounce_ms(),
        })
    }

    /// Re-normalizes `host`, for configs that were deserialized
    pub fn validate(mut self) -> Result<ClientConfig, ConfigError> {
        self.host = normalize_host(&self.host)?;
        Ok(self)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn like_debounce(&self) -> Duration {
        Duration::from_millis(self.like_debounce_ms)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    pub fn feed_url(&self) -> String {
        let ws_host = match self.host.strip_prefix("https://") {
            Some(rest) => format!("wss://{rest}"),
            None => format!("ws://{}", self.host.trim_start_matches("http://")),
        };
        format!("{ws_host}{}", crate::api::paths::FEED)
    }
}

fn normalize_host(raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ConfigError::EmptyHost);
    }
    let remainder = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or(ConfigError::InvalidHost)?;
    if remainder.trim().is_empty() || remainder.starts_with('/') {
        return Err(ConfigError::InvalidHost);
    }
    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_normalization() {
        assert_eq!(
            ClientConfig::new(" https://gym.example.org/ ").unwrap().host,
            "https://gym.example.org"
        );
        assert_eq!(ClientConfig::new("  "), Err(ConfigError::EmptyHost));
        assert_eq!(
            ClientConfig::new("gym.example.org"),
            Err(ConfigError::InvalidHost)
        );
        assert_eq!(ClientConfig::new("http:///x"), Err(ConfigError::InvalidHost));
    }

    #[test]
    fn feed_url_follows_the_http_scheme() {
        let secure = ClientConfig::new("https://gym.example.org").unwrap();
        assert_eq!(secure.feed_url(), "wss://gym.example.org/ws/feed");
        let local = ClientConfig::new("http://localhost:8080").unwrap();
        assert_eq!(local.feed_url(), "ws://localhost:8080/ws/feed");
        assert_eq!(local.url("/api/auth/me"), "http://localhost:8080/api/auth/me");
    }

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: ClientConfig =
            serde_json::from_str(r#"{"host": "http://localhost:8080/"}"#).unwrap();
        let cfg = cfg.validate().unwrap();
        assert_eq!(cfg.host, "http://localhost:8080");
        assert_eq!(cfg.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.like_debounce(), Duration::from_millis(500));
    }
}
