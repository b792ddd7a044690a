//! Client configuration, from code or from environment variables.

use std::time::Duration;

use cozy_realtime_shared::{RealtimeError, Result, REALTIME_PATH};
use serde::Deserialize;
use url::Url;

use crate::connection::ReconnectConfig;

/// Where and how to reach the realtime endpoint of a cozy instance.
///
/// Either `domain` (optionally with `secure`) or `url` must be set, and
/// `token` always. See [`crate::validator::validate`].
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RealtimeConfig {
    /// Cozy domain, e.g. `alice.mycozy.cloud`.
    pub domain: Option<String>,
    /// Use `wss` instead of `ws`. Defaults to true; ignored when `url` is set.
    pub secure: Option<bool>,
    /// Application token sent in the `AUTH` frame.
    pub token: Option<String>,
    /// Instance URL, can replace `domain` and `secure`.
    pub url: Option<String>,
}

impl RealtimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = Some(secure);
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Read the configuration from environment variables.
    ///
    /// Environment variables:
    /// - `COZY_REALTIME_DOMAIN`: cozy domain
    /// - `COZY_REALTIME_URL`: cozy URL, replaces domain and secure
    /// - `COZY_REALTIME_TOKEN`: application token
    /// - `COZY_REALTIME_SECURE`: "true" | "false" (default: "true")
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        let secure = var("COZY_REALTIME_SECURE").map(|v| {
            !matches!(v.to_lowercase().as_str(), "false" | "0" | "no" | "off")
        });

        Self {
            domain: var("COZY_REALTIME_DOMAIN"),
            secure,
            token: var("COZY_REALTIME_TOKEN"),
            url: var("COZY_REALTIME_URL"),
        }
    }

    /// Fill unset fields from `other`.
    pub fn or(self, other: RealtimeConfig) -> Self {
        Self {
            domain: self.domain.or(other.domain),
            secure: self.secure.or(other.secure),
            token: self.token.or(other.token),
            url: self.url.or(other.url),
        }
    }

    /// Value of a string field by name; empty strings read as absent.
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "domain" => self.domain.as_deref(),
            "token" => self.token.as_deref(),
            "url" => self.url.as_deref(),
            _ => None,
        };
        value.filter(|v| !v.is_empty())
    }
}

/// Resolved realtime endpoint of a validated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `ws://` or `wss://` URL of the realtime route.
    pub url: String,
    pub token: String,
}

impl Endpoint {
    /// Build the endpoint. Expects a configuration that passed validation.
    pub fn resolve(config: &RealtimeConfig) -> Result<Self> {
        let token = config
            .field("token")
            .ok_or_else(|| RealtimeError::Configuration {
                field: "token",
                message: "is required".to_string(),
            })?
            .to_string();

        let parsed_url = config.field("url").map(Url::parse).transpose().map_err(|e| {
            RealtimeError::Configuration {
                field: "url",
                message: format!("should be a URL ({})", e),
            }
        })?;

        let secure = match &parsed_url {
            Some(url) => matches!(url.scheme(), "https" | "wss"),
            None => config.secure.unwrap_or(true),
        };

        let domain = match (config.field("domain"), &parsed_url) {
            (Some(domain), _) => domain.trim_end_matches('/').to_string(),
            (None, Some(url)) => host_of(url)?,
            (None, None) => {
                return Err(RealtimeError::Configuration {
                    field: "domain",
                    message: "is required if no url is provided".to_string(),
                })
            }
        };

        let scheme = if secure { "wss" } else { "ws" };
        Ok(Self {
            url: format!("{}://{}{}", scheme, domain, REALTIME_PATH),
            token,
        })
    }
}

fn host_of(url: &Url) -> Result<String> {
    let host = url.host_str().ok_or_else(|| RealtimeError::Configuration {
        field: "url",
        message: "should have a host".to_string(),
    })?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// How long to wait for the peer to answer our close frame.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection behaviour fixed for the lifetime of a client.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub reconnect: ReconnectConfig,
    /// Opt-in: on Ctrl-C, close the socket cleanly then exit the process
    /// with status 130.
    ///
    /// Installing the hook takes over SIGINT for the whole process, so only
    /// enable it in programs without their own Ctrl-C handling.
    pub close_on_shutdown: bool,
    /// Time left to the peer to answer a close frame before the socket is
    /// dropped.
    pub close_timeout: Duration,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            close_on_shutdown: false,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
        }
    }
}
