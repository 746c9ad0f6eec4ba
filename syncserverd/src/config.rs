use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

use crate::logging::LogFormat;
use crate::sync::backoff::RetryPolicy;

const DEFAULT_RETRY_LIMIT: u64 = 5;
const DEFAULT_RETRY_BASE_MS: u64 = 250;
const DEFAULT_RETRY_MAX_MS: u64 = 10_000;

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub server_url: String,
    pub token: String,
    /// `None` selects the default location under the XDG data directory.
    pub db_path: Option<PathBuf>,
    pub retry_limit: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub log_format: LogFormat,
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> anyhow::Result<Self> {
        let server_url = required(&vars, "SYNCSERVER_URL")?;
        let token = required(&vars, "SYNCSERVER_TOKEN")?;
        let db_path = vars
            .get("SYNCSERVER_DB")
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
            .map(PathBuf::from);
        let retry_limit = u32::try_from(read_u64(&vars, "SYNCSERVER_RETRY_LIMIT", DEFAULT_RETRY_LIMIT))
            .unwrap_or(u32::MAX);
        let retry_base = Duration::from_millis(read_u64(
            &vars,
            "SYNCSERVER_RETRY_BASE_MS",
            DEFAULT_RETRY_BASE_MS,
        ));
        let retry_max = Duration::from_millis(read_u64(
            &vars,
            "SYNCSERVER_RETRY_MAX_MS",
            DEFAULT_RETRY_MAX_MS,
        ));
        let log_format = match vars.get("SYNCSERVER_LOG_FORMAT") {
            Some(value) => value
                .parse()
                .context("SYNCSERVER_LOG_FORMAT must be `compact` or `json`")?,
            None => LogFormat::default(),
        };

        Ok(Self {
            server_url,
            token,
            db_path,
            retry_limit,
            retry_base,
            retry_max,
            log_format,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_limit, self.retry_base, self.retry_max)
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> anyhow::Result<String> {
    vars.get(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .with_context(|| format!("{name} is not set"))
}

fn read_u64(vars: &HashMap<String, String>, name: &str, default: u64) -> u64 {
    vars.get(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    fn base() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SYNCSERVER_URL", "https://sync.example.com"),
            ("SYNCSERVER_TOKEN", "secret"),
        ]
    }

    #[test]
    fn defaults_apply_when_only_required_values_are_set() {
        let config = ClientConfig::from_vars(vars(&base())).unwrap();
        assert_eq!(config.server_url, "https://sync.example.com");
        assert_eq!(config.token, "secret");
        assert_eq!(config.db_path, None);
        assert_eq!(config.retry_limit, 5);
        assert_eq!(config.retry_base, Duration::from_millis(250));
        assert_eq!(config.retry_max, Duration::from_secs(10));
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn missing_url_is_an_error() {
        let err = ClientConfig::from_vars(vars(&[("SYNCSERVER_TOKEN", "secret")])).unwrap_err();
        assert!(err.to_string().contains("SYNCSERVER_URL"));
    }

    #[test]
    fn blank_token_is_an_error() {
        let err = ClientConfig::from_vars(vars(&[
            ("SYNCSERVER_URL", "https://sync.example.com"),
            ("SYNCSERVER_TOKEN", "  "),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("SYNCSERVER_TOKEN"));
    }

    #[test]
    fn overrides_are_read() {
        let mut pairs = base();
        pairs.extend([
            ("SYNCSERVER_DB", "/var/lib/syncserver/q.db"),
            ("SYNCSERVER_RETRY_LIMIT", "2"),
            ("SYNCSERVER_RETRY_BASE_MS", "10"),
            ("SYNCSERVER_RETRY_MAX_MS", "40"),
            ("SYNCSERVER_LOG_FORMAT", "json"),
        ]);
        let config = ClientConfig::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.db_path, Some(PathBuf::from("/var/lib/syncserver/q.db")));
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.retry_policy().max_consecutive_errors(), 2);
    }

    #[test]
    fn unparsable_numbers_fall_back_to_defaults() {
        let mut pairs = base();
        pairs.push(("SYNCSERVER_RETRY_LIMIT", "many"));
        let config = ClientConfig::from_vars(vars(&pairs)).unwrap();
        assert_eq!(config.retry_limit, 5);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        let mut pairs = base();
        pairs.push(("SYNCSERVER_LOG_FORMAT", "xml"));
        assert!(ClientConfig::from_vars(vars(&pairs)).is_err());
    }
}
