use crate::error::{ClientError, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TIMEOUT: &str = "30s";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MIN_BACKOFF: &str = "100ms";
const DEFAULT_MAX_BACKOFF: &str = "10s";

/// Client settings as they come out of a config file.
///
/// Durations are kept as strings (`"250ms"`, `"1m30s"`) until [`ClientConfig::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub cert: PathBuf,
    pub key: PathBuf,
    pub ca_bundle: PathBuf,
    pub server_url: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_backoff")]
    pub min_backoff: String,
    #[serde(default = "default_max_backoff")]
    pub max_backoff: String,
}

fn default_timeout() -> String {
    DEFAULT_TIMEOUT.to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_min_backoff() -> String {
    DEFAULT_MIN_BACKOFF.to_string()
}

fn default_max_backoff() -> String {
    DEFAULT_MAX_BACKOFF.to_string()
}

impl ClientConfig {
    pub fn new(
        cert: impl Into<PathBuf>,
        key: impl Into<PathBuf>,
        ca_bundle: impl Into<PathBuf>,
        server_url: impl Into<String>,
    ) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
            ca_bundle: ca_bundle.into(),
            server_url: server_url.into(),
            timeout: default_timeout(),
            max_retries: default_max_retries(),
            min_backoff: default_min_backoff(),
            max_backoff: default_max_backoff(),
        }
    }

    pub fn timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = timeout.into();
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(mut self, min: impl Into<String>, max: impl Into<String>) -> Self {
        self.min_backoff = min.into();
        self.max_backoff = max.into();
        self
    }

    /// Parse every field into a [`ClientParams`]. Nothing touches the network or the
    /// certificate files here.
    pub fn validate(&self) -> Result<ClientParams> {
        let timeout = parse_field("timeout", &self.timeout)?;
        let min_backoff = parse_field("min backoff", &self.min_backoff)?;
        let max_backoff = parse_field("max backoff", &self.max_backoff)?;

        if self.max_retries == 0 {
            return Err(ClientError::config("max_retries must be at least 1"));
        }

        let server_url = Url::parse(&self.server_url).map_err(|e| {
            ClientError::config(format!("bad server url '{}': {}", self.server_url, e))
        })?;
        if !matches!(server_url.scheme(), "http" | "https") || server_url.cannot_be_a_base() {
            return Err(ClientError::config(format!(
                "bad server url '{}': expected an absolute http(s) url",
                self.server_url
            )));
        }

        Ok(ClientParams {
            cert_file: self.cert.clone(),
            key_file: self.key.clone(),
            ca_bundle: self.ca_bundle.clone(),
            server_url,
            timeout,
            max_retries: self.max_retries,
            min_backoff,
            max_backoff,
        })
    }
}

/// Validated, immutable parameters. Every transport is built from these.
#[derive(Debug, Clone)]
pub struct ClientParams {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
    pub ca_bundle: PathBuf,
    pub server_url: Url,
    pub timeout: Duration,
    pub max_retries: u32,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
}

fn parse_field(field: &str, value: &str) -> Result<Duration> {
    parse_duration(value)
        .map_err(|e| ClientError::config(format!("bad {} value '{}': {}", field, value, e)))
}

/// Parse a duration in the `300ms` / `1.5s` / `1h2m3s` notation.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let s = input.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    if s.is_empty() {
        return Err("empty duration".to_string());
    }
    if s.starts_with('-') {
        return Err("negative durations are not allowed".to_string());
    }
    let s = s.strip_prefix('+').unwrap_or(s);

    let mut total_nanos = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, tail) = rest.split_at(number_len);
        if number.is_empty() || number == "." {
            return Err(format!("invalid duration '{}'", input));
        }
        let value: f64 = number
            .parse()
            .map_err(|_| format!("invalid number '{}'", number))?;

        let unit_len = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_len);
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(format!("missing unit in duration '{}'", input)),
            other => return Err(format!("unknown unit '{}' in duration '{}'", other, input)),
        };

        total_nanos += value * scale;
        rest = next;
    }

    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(format!("duration '{}' out of range", input));
    }
    Ok(Duration::from_nanos(total_nanos.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ClientConfig {
        ClientConfig::new(
            "/etc/keysync/client.crt",
            "/etc/keysync/client.key",
            "/etc/keysync/ca.crt",
            "https://keywhiz.example.com:4444/",
        )
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("300ms").unwrap(), Duration::from_millis(300));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("10us").unwrap(), Duration::from_micros(10));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("ten seconds").is_err());
        assert!(parse_duration("5d").is_err());
        assert!(parse_duration("-1s").is_err());
    }

    #[test]
    fn test_validate_defaults() {
        let params = config().validate().unwrap();
        assert_eq!(params.timeout, Duration::from_secs(30));
        assert_eq!(params.max_retries, 3);
        assert_eq!(params.min_backoff, Duration::from_millis(100));
        assert_eq!(params.max_backoff, Duration::from_secs(10));
        assert_eq!(params.server_url.host_str(), Some("keywhiz.example.com"));
    }

    #[test]
    fn test_validate_reports_bad_field() {
        let err = config().timeout("soon").validate().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
        assert!(err.to_string().contains("bad timeout value 'soon'"));

        let err = config().backoff("1s", "forever").validate().unwrap_err();
        assert!(err.to_string().contains("max backoff"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let err = config().max_retries(0).validate().unwrap_err();
        assert!(matches!(err, ClientError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let mut cfg = config();
        cfg.server_url = "keywhiz.example.com".to_string();
        assert!(cfg.validate().is_err());

        cfg.server_url = "ftp://keywhiz.example.com".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let json = r#"{
            "cert": "/certs/client.pem",
            "key": "/certs/client.key",
            "ca_bundle": "/certs/ca.pem",
            "server_url": "https://localhost:4444",
            "min_backoff": "1ms"
        }"#;
        let cfg: ClientConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.timeout, "30s");
        assert_eq!(cfg.max_retries, 3);
        assert_eq!(cfg.min_backoff, "1ms");
        assert_eq!(cfg.max_backoff, "10s");
    }
}
