//! Flight service endpoints
//!
//! An [`Endpoint`] names the remote catalog service: host, port and whether the
//! channel is encrypted. Endpoints are parsed from the Flight URI forms
//! (`grpc+tcp://host:port`, `grpc+tls://host:port`), plain HTTP/2 URIs, or a
//! bare `host:port` pair.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Transport scheme of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Plaintext,
    Tls,
}

impl Scheme {
    /// Map a URI scheme onto a transport scheme
    pub fn from_uri_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "grpc" | "grpc+tcp" | "http" => Ok(Scheme::Plaintext),
            "grpc+tls" | "https" => Ok(Scheme::Tls),
            _ => Err(CoreError::UnsupportedScheme(scheme.to_string())),
        }
    }

    /// Canonical Flight URI scheme
    pub fn flight_scheme(&self) -> &'static str {
        match self {
            Scheme::Plaintext => "grpc+tcp",
            Scheme::Tls => "grpc+tls",
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self, Scheme::Tls)
    }
}

/// Address of a remote Flight catalog service
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
    scheme: Scheme,
}

impl Endpoint {
    /// Create a plaintext endpoint
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            scheme: Scheme::Plaintext,
        }
    }

    /// Create an encrypted endpoint
    pub fn tls(host: impl Into<String>, port: u16) -> Self {
        Self::new(host, port).with_scheme(Scheme::Tls)
    }

    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// `host:port`, with IPv6 hosts bracketed
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// HTTP/2 URI used to open the transport channel
    pub fn uri(&self, tls: bool) -> String {
        let scheme = if tls { "https" } else { "http" };
        format!("{}://{}", scheme, self.authority())
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme.flight_scheme(), self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let input = s.trim();

        let (scheme, rest) = match input.split_once("://") {
            Some((scheme, rest)) => (Scheme::from_uri_scheme(scheme)?, rest),
            None => (Scheme::Plaintext, input),
        };

        let authority = rest.strip_suffix('/').unwrap_or(rest);
        if authority.contains('/') {
            return Err(CoreError::invalid_address(input, "unexpected path"));
        }

        let (host, port) = split_host_port(input, authority)?;
        Ok(Endpoint::new(host, port).with_scheme(scheme))
    }
}

fn split_host_port(address: &str, authority: &str) -> Result<(String, u16)> {
    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let (host, tail) = bracketed
            .split_once(']')
            .ok_or_else(|| CoreError::invalid_address(address, "unterminated '['"))?;
        let port = tail
            .strip_prefix(':')
            .ok_or_else(|| CoreError::invalid_address(address, "missing port"))?;
        (host, port)
    } else {
        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| CoreError::invalid_address(address, "missing port"))?;
        if host.contains(':') {
            return Err(CoreError::invalid_address(
                address,
                "IPv6 hosts must be bracketed",
            ));
        }
        (host, port)
    };

    if host.is_empty() {
        return Err(CoreError::invalid_address(address, "empty host"));
    }

    let port: u16 = port
        .parse()
        .map_err(|_| CoreError::invalid_address(address, format!("invalid port '{}'", port)))?;
    if port == 0 {
        return Err(CoreError::invalid_address(address, "port must be non-zero"));
    }

    Ok((host.to_string(), port))
}

impl TryFrom<String> for Endpoint {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}
