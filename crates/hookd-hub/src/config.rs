//! Hub connection settings.

use std::time::Duration;

use hookd_core::Environment;

use crate::error::{HubError, Result};

pub const ENV_SERVER_URL: &str = "HOOKD_SERVER_URL";
pub const ENV_API_KEY: &str = "HOOKD_API_KEY";
pub const ENV_API_USER: &str = "HOOKD_API_USER";
pub const ENV_REQUEST_TIMEOUT: &str = "HOOKD_REQUEST_TIMEOUT";

/// Used for `authenticate` and connect attempts when nothing else is configured.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

const TCP_SCHEME: &str = "tcp://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// `host:port` of the hub.
    pub address: String,
    pub api_key: String,
    pub api_user: String,
    /// Connect in the background instead of on an explicit `connect()`.
    pub auto_connect: bool,
    /// Explicit request timeout. Also bounds how long the server waits for an
    /// auto-connecting session.
    pub request_timeout: Option<Duration>,
}

impl HubConfig {
    /// Build a config for an explicitly connecting session.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::InvalidUrl`] if `server_url` is not `host:port`
    /// with an optional `tcp://` scheme.
    pub fn new(
        server_url: &str,
        api_user: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            address: parse_address(server_url)?,
            api_key: api_key.into(),
            api_user: api_user.into(),
            auto_connect: false,
            request_timeout: None,
        })
    }

    /// Read `HOOKD_SERVER_URL`, `HOOKD_API_USER`, `HOOKD_API_KEY` and the
    /// optional `HOOKD_REQUEST_TIMEOUT` (seconds).
    ///
    /// # Errors
    ///
    /// Returns [`HubError::MissingCredential`] for a missing or blank
    /// required variable, [`HubError::InvalidUrl`] for an unusable address or
    /// timeout.
    pub fn from_environment(env: &Environment) -> Result<Self> {
        let require = |name: &'static str| {
            env.non_empty(name)
                .map(str::to_string)
                .ok_or(HubError::MissingCredential(name))
        };

        let server_url = require(ENV_SERVER_URL)?;
        let api_user = require(ENV_API_USER)?;
        let api_key = require(ENV_API_KEY)?;

        let mut config = Self::new(&server_url, api_user, api_key)?;

        if let Some(raw) = env.non_empty(ENV_REQUEST_TIMEOUT) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                HubError::InvalidUrl(format!("{ENV_REQUEST_TIMEOUT}={raw} is not a number of seconds"))
            })?;
            config.request_timeout = Some(Duration::from_secs(secs));
        }

        Ok(config)
    }

    #[must_use]
    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn effective_timeout(&self) -> Duration {
        self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT)
    }
}

fn parse_address(server_url: &str) -> Result<String> {
    let trimmed = server_url.trim();
    let rest = match trimmed.split_once("://") {
        None => trimmed,
        Some(_) if trimmed.starts_with(TCP_SCHEME) => &trimmed[TCP_SCHEME.len()..],
        Some((scheme, _)) => {
            return Err(HubError::InvalidUrl(format!(
                "unsupported scheme `{scheme}` in {server_url}"
            )));
        }
    };
    let rest = rest.trim_end_matches('/');

    let Some((host, port)) = rest.rsplit_once(':') else {
        return Err(HubError::InvalidUrl(format!("{server_url} has no port")));
    };
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(HubError::InvalidUrl(server_url.to_string()));
    }

    Ok(rest.to_string())
}
