use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_API_VERSION: &str = "1.16.1";
pub const DEFAULT_CLIENT_NAME: &str = "navplay";
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Legacy environment names accepted when the primary one is unset.
const URL_ALIASES: &[&str] = &["NAVIDROME_BASE_URL", "SUBSONIC_URL"];
const USER_ALIASES: &[&str] = &["NAVIDROME_USER"];
const PASSWORD_ALIASES: &[&str] = &["NAVIDROME_PASS", "NAVIDROME_PASSWORD"];

/// Configuration errors
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("invalid upstream URL {value:?}: {reason}")]
    InvalidUrl { value: String, reason: String },
    #[error("a pre-hashed token needs both SUBSONIC_TOKEN and SUBSONIC_SALT")]
    IncompleteToken,
    #[error("unknown auth mode {0:?} (expected \"token\" or \"password\")")]
    InvalidAuthMode(String),
}

/// How the password is presented to the upstream server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AuthMode {
    /// `t` = md5(password + salt) with a fresh salt per request.
    #[default]
    Token,
    /// `p` = hex-encoded password with the `enc:` prefix.
    Password,
}

impl FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "token" => Ok(Self::Token),
            "password" | "plain" => Ok(Self::Password),
            _ => Err(ConfigError::InvalidAuthMode(s.to_string())),
        }
    }
}

/// The secret half of the upstream credentials.
#[derive(Clone, PartialEq, Eq)]
pub enum Secret {
    Password(String),
    /// Token and salt computed ahead of time, sent verbatim on every call.
    Token { token: String, salt: String },
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Password(_) => f.write_str("Password(***)"),
            Self::Token { .. } => f.write_str("Token { token: ***, salt: *** }"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
}

/// Everything the upstream client needs. Built once at startup and never mutated.
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL without trailing slash, e.g. `http://127.0.0.1:4533`.
    pub base_url: String,
    pub credentials: Credentials,
    pub auth_mode: AuthMode,
    pub api_version: String,
    pub client_name: String,
    pub connect_timeout: Duration,
}

impl UpstreamConfig {
    /// Config with a plain password and defaults for everything else.
    pub fn new(base_url: &str, username: &str, password: &str) -> Result<Self, ConfigError> {
        RawUpstreamConfig {
            url: Some(base_url.to_string()),
            user: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Default::default()
        }
        .resolve()
    }
}

/// Unvalidated settings as they arrive from flags and environment.
#[derive(Clone, Debug, Default)]
pub struct RawUpstreamConfig {
    pub url: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub salt: Option<String>,
    pub auth_mode: Option<String>,
    pub api_version: Option<String>,
    pub client_name: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl RawUpstreamConfig {
    /// Fill unset values from the legacy environment names.
    pub fn with_env_aliases<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| names.iter().find_map(|n| non_blank(lookup(n)));

        if non_blank(self.url.clone()).is_none() {
            self.url = first(URL_ALIASES);
        }
        if non_blank(self.user.clone()).is_none() {
            self.user = first(USER_ALIASES);
        }
        if non_blank(self.password.clone()).is_none() {
            self.password = first(PASSWORD_ALIASES);
        }
        self
    }

    pub fn resolve(self) -> Result<UpstreamConfig, ConfigError> {
        let url = non_blank(self.url).ok_or(ConfigError::Missing("NAVIDROME_URL"))?;
        let base_url = validate_base_url(&url)?;

        let username = non_blank(self.user).ok_or(ConfigError::Missing("SUBSONIC_USER"))?;

        let mut auth_mode = match non_blank(self.auth_mode) {
            Some(mode) => mode.parse()?,
            None => AuthMode::default(),
        };

        let secret = match (
            non_blank(self.password),
            non_blank(self.token),
            non_blank(self.salt),
        ) {
            (Some(password), _, _) => Secret::Password(password),
            (None, Some(token), Some(salt)) => {
                auth_mode = AuthMode::Token;
                Secret::Token { token, salt }
            }
            (None, Some(_), None) | (None, None, Some(_)) => {
                return Err(ConfigError::IncompleteToken)
            }
            (None, None, None) => return Err(ConfigError::Missing("SUBSONIC_PASSWORD")),
        };

        Ok(UpstreamConfig {
            base_url,
            credentials: Credentials { username, secret },
            auth_mode,
            api_version: non_blank(self.api_version)
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            client_name: non_blank(self.client_name)
                .unwrap_or_else(|| DEFAULT_CLIENT_NAME.to_string()),
            connect_timeout: Duration::from_secs(
                self.connect_timeout_secs
                    .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS),
            ),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn validate_base_url(value: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        value: value.to_string(),
        reason: reason.to_string(),
    };

    let parsed = reqwest::Url::parse(value).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("missing host"));
    }
    if parsed.query().is_some() {
        return Err(invalid("must not carry a query string"));
    }

    Ok(value.trim_end_matches('/').to_string())
}
