//! Connection and link addresses.

use std::fmt;

use thiserror::Error;
use url::Url;

/// Default port for plain AMQP.
pub const AMQP_PORT: u16 = 5672;
/// Default port for AMQP over TLS.
pub const AMQPS_PORT: u16 = 5671;

/// Address parse error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("address is empty")]
    Empty,
    #[error("malformed address {address:?}: {reason}")]
    Malformed { address: String, reason: String },
    #[error("unsupported scheme {0:?}, expected amqp or amqps")]
    UnsupportedScheme(String),
    #[error("address {0:?} has no host")]
    MissingHost(String),
    #[error("link address {0:?} contains whitespace or control characters")]
    IllegalCharacters(String),
}

/// Transport security mode selected by the URI scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    /// `amqp://`
    Plain,
    /// `amqps://`
    Tls,
}

/// Parsed connection address: `scheme://[user:pass@]host[:port]/[path]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddress {
    original: String,
    security: Security,
    host: String,
    port: u16,
    username: Option<String>,
    password: Option<String>,
    path: String,
}

impl ServiceAddress {
    /// Parse a connection URI.
    ///
    /// # Errors
    /// Returns error if the address is empty, malformed, lacks a host or
    /// uses a scheme other than `amqp`/`amqps`.
    pub fn parse(address: &str) -> Result<Self, AddressError> {
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(AddressError::Empty);
        }

        let url = Url::parse(trimmed).map_err(|e| AddressError::Malformed {
            address: trimmed.to_string(),
            reason: e.to_string(),
        })?;

        let (security, default_port) = match url.scheme() {
            "amqp" => (Security::Plain, AMQP_PORT),
            "amqps" => (Security::Tls, AMQPS_PORT),
            other => return Err(AddressError::UnsupportedScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| AddressError::MissingHost(trimmed.to_string()))?
            .to_string();

        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(ToString::to_string);
        let password = url.password().map(ToString::to_string);

        Ok(Self {
            original: trimmed.to_string(),
            security,
            host,
            port: url.port().unwrap_or(default_port),
            username,
            password,
            path: url.path().trim_start_matches('/').to_string(),
        })
    }

    /// Security mode.
    #[must_use]
    pub const fn security(&self) -> Security {
        self.security
    }

    /// Host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port, defaulted from the scheme when absent.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, the key engines use for endpoints.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// User name from the URI user-info.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Password from the URI user-info.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Path without the leading slash.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The address as given, trimmed.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.original
    }
}

impl fmt::Display for ServiceAddress {
    /// Displays without credentials.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = match self.security {
            Security::Plain => "amqp",
            Security::Tls => "amqps",
        };
        write!(f, "{scheme}://{}:{}", self.host, self.port)?;
        if !self.path.is_empty() {
            write!(f, "/{}", self.path)?;
        }
        Ok(())
    }
}

/// Validate a link address (put destination or subscribe source).
///
/// # Errors
/// Returns error if empty or containing whitespace/control characters.
pub fn validate_link_address(address: &str) -> Result<(), AddressError> {
    if address.is_empty() {
        return Err(AddressError::Empty);
    }
    if address.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(AddressError::IllegalCharacters(address.to_string()));
    }
    Ok(())
}
