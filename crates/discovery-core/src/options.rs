//! Connection options
//!
//! Everything a client needs besides the endpoint is carried by an explicit
//! [`ConnectionOptions`] value handed over at construction.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Options for establishing a catalog connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionOptions {
    /// Budget for transport connect plus handshake, in milliseconds
    pub timeout_ms: u64,
    /// Deadline for a single catalog request, in milliseconds
    pub request_timeout_ms: u64,
    /// Reconnect schedule used while establishing the connection
    pub retry_policy: RetryPolicy,
    /// Negotiate TLS even when the endpoint scheme is plaintext
    pub tls_enabled: bool,
    /// PEM bundle of trusted CA certificates
    pub tls_ca_cert: Option<PathBuf>,
    /// Server name to verify instead of the endpoint host
    pub tls_domain: Option<String>,
    /// Perform the Flight handshake after connecting
    pub handshake: bool,
    /// Protocol version advertised in the handshake
    pub protocol_version: u64,
    /// Defer connecting until the first request
    pub lazy: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            retry_policy: RetryPolicy::None,
            tls_enabled: false,
            tls_ca_cert: None,
            tls_domain: None,
            handshake: true,
            protocol_version: 0,
            lazy: false,
        }
    }
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_request_timeout_ms(mut self, request_timeout_ms: u64) -> Self {
        self.request_timeout_ms = request_timeout_ms;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_tls(mut self, enabled: bool) -> Self {
        self.tls_enabled = enabled;
        self
    }

    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.tls_ca_cert = Some(path.into());
        self
    }

    pub fn with_tls_domain(mut self, domain: impl Into<String>) -> Self {
        self.tls_domain = Some(domain.into());
        self
    }

    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    pub fn with_protocol_version(mut self, version: u64) -> Self {
        self.protocol_version = version;
        self
    }

    pub fn with_lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Check that the options describe a usable connection
    pub fn validate(&self) -> Result<()> {
        if self.timeout_ms == 0 {
            return Err(CoreError::InvalidOption(
                "timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(CoreError::InvalidOption(
                "request_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.tls_domain, Some(domain) if domain.is_empty()) {
            return Err(CoreError::InvalidOption(
                "tls_domain must not be empty".to_string(),
            ));
        }
        self.retry_policy.validate()
    }
}

/// Reconnect schedule applied while establishing a connection.
///
/// Requests are never retried; a failed listing is reported to the caller.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    #[default]
    None,
    Fixed {
        delay_ms: u64,
        max_retries: u32,
    },
    Exponential {
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
        max_retries: u32,
    },
}

impl RetryPolicy {
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        RetryPolicy::Fixed {
            delay_ms: millis(delay),
            max_retries,
        }
    }

    /// Doubling back-off starting at `initial`, capped at `max`
    pub fn exponential(initial: Duration, max: Duration, max_retries: u32) -> Self {
        RetryPolicy::Exponential {
            initial_delay_ms: millis(initial),
            max_delay_ms: millis(max),
            multiplier: 2.0,
            max_retries,
        }
    }

    /// Delays to wait before each reconnect attempt
    pub fn delays(&self) -> RetryDelays {
        RetryDelays {
            policy: self.clone(),
            attempt: 0,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            RetryPolicy::None => Ok(()),
            RetryPolicy::Fixed { delay_ms, .. } => {
                if *delay_ms == 0 {
                    return Err(CoreError::InvalidOption(
                        "fixed retry delay must be greater than zero".to_string(),
                    ));
                }
                Ok(())
            }
            RetryPolicy::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                ..
            } => {
                if *initial_delay_ms == 0 || max_delay_ms < initial_delay_ms {
                    return Err(CoreError::InvalidOption(format!(
                        "exponential retry needs 0 < initial ({}) <= max ({})",
                        initial_delay_ms, max_delay_ms
                    )));
                }
                if !multiplier.is_finite() || *multiplier < 1.0 {
                    return Err(CoreError::InvalidOption(format!(
                        "retry multiplier must be at least 1, got {}",
                        multiplier
                    )));
                }
                Ok(())
            }
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Iterator over the back-off schedule of a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct RetryDelays {
    policy: RetryPolicy,
    attempt: u32,
}

impl Iterator for RetryDelays {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay_ms = match &self.policy {
            RetryPolicy::None => return None,
            RetryPolicy::Fixed {
                delay_ms,
                max_retries,
            } => {
                if self.attempt >= *max_retries {
                    return None;
                }
                *delay_ms
            }
            RetryPolicy::Exponential {
                initial_delay_ms,
                max_delay_ms,
                multiplier,
                max_retries,
            } => {
                if self.attempt >= *max_retries {
                    return None;
                }
                let exponent = i32::try_from(self.attempt).unwrap_or(i32::MAX);
                let scaled = *initial_delay_ms as f64 * multiplier.powi(exponent);
                scaled.min(*max_delay_ms as f64) as u64
            }
        };

        self.attempt += 1;
        Some(Duration::from_millis(delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = ConnectionOptions::default();
        assert_eq!(options.timeout(), Duration::from_secs(5));
        assert_eq!(options.request_timeout(), Duration::from_secs(30));
        assert_eq!(options.retry_policy, RetryPolicy::None);
        assert!(options.handshake);
        assert!(!options.tls_enabled);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_timeouts_rejected() {
        assert!(ConnectionOptions::new().with_timeout_ms(0).validate().is_err());
        assert!(ConnectionOptions::new()
            .with_request_timeout_ms(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_no_retry_schedule() {
        assert_eq!(RetryPolicy::None.delays().count(), 0);
    }

    #[test]
    fn test_fixed_retry_schedule() {
        let delays: Vec<_> = RetryPolicy::fixed(Duration::from_millis(250), 3)
            .delays()
            .collect();
        assert_eq!(delays, vec![Duration::from_millis(250); 3]);
    }

    #[test]
    fn test_exponential_retry_is_capped() {
        let policy =
            RetryPolicy::exponential(Duration::from_millis(100), Duration::from_millis(500), 5);
        let delays: Vec<u64> = policy.delays().map(|d| d.as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn test_invalid_retry_policies() {
        let shrinking = RetryPolicy::Exponential {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 0.5,
            max_retries: 3,
        };
        assert!(ConnectionOptions::new()
            .with_retry_policy(shrinking)
            .validate()
            .is_err());

        let inverted =
            RetryPolicy::exponential(Duration::from_millis(500), Duration::from_millis(100), 3);
        assert!(ConnectionOptions::new()
            .with_retry_policy(inverted)
            .validate()
            .is_err());

        let zero = RetryPolicy::fixed(Duration::ZERO, 2);
        assert!(ConnectionOptions::new()
            .with_retry_policy(zero)
            .validate()
            .is_err());
    }

    #[test]
    fn test_options_from_partial_json() {
        let json = r#"{
            "timeout_ms": 100,
            "tls_enabled": true,
            "retry_policy": { "kind": "fixed", "delay_ms": 50, "max_retries": 2 }
        }"#;
        let options: ConnectionOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.timeout_ms, 100);
        assert!(options.tls_enabled);
        assert_eq!(options.request_timeout_ms, 30_000);
        assert_eq!(
            options.retry_policy,
            RetryPolicy::Fixed {
                delay_ms: 50,
                max_retries: 2
            }
        );
    }

    #[test]
    fn test_huge_delays_saturate() {
        let fixed = RetryPolicy::fixed(Duration::MAX, 1);
        assert_eq!(
            fixed,
            RetryPolicy::Fixed {
                delay_ms: u64::MAX,
                max_retries: 1
            }
        );

        let policy =
            RetryPolicy::exponential(Duration::from_millis(10), Duration::from_secs(5), u32::MAX);
        let mut delays = RetryDelays {
            policy,
            attempt: u32::MAX - 1,
        };
        assert_eq!(delays.next(), Some(Duration::from_secs(5)));
        assert_eq!(delays.next(), None);
    }
}
