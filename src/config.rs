//! Link configuration.
//!
//! All timing values default to what the sensor firmware was tuned against:
//! a 5 second connect timeout and a 5 second liveness poll.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::transport::{ConnectOptions, TextEncoding};

/// Default connect timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default liveness poll interval (5 seconds).
pub const DEFAULT_LIVENESS_INTERVAL: Duration = Duration::from_secs(5);

/// Default cap on a single buffered record, in bytes.
pub const DEFAULT_MAX_RECORD_LEN: usize = 1024;

/// Configuration for a [`LinkManager`](crate::LinkManager).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// How long the transport may take to open a session.
    pub connect_timeout: Duration,
    /// Period of the liveness poll on a connected session.
    pub liveness_interval: Duration,
    /// Consecutive failed liveness checks before the link counts as lost.
    pub liveness_failure_threshold: u32,
    /// Record delimiter requested from the transport and used for line framing.
    pub delimiter: u8,
    /// Text encoding of incoming records.
    pub encoding: TextEncoding,
    /// Longest record accepted; longer ones are dropped however they are split.
    pub max_record_len: usize,
    /// Capacity of the broadcast channels handed to async subscribers.
    pub channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            liveness_interval: DEFAULT_LIVENESS_INTERVAL,
            liveness_failure_threshold: 1,
            delimiter: b'\n',
            encoding: TextEncoding::Utf8,
            max_record_len: DEFAULT_MAX_RECORD_LEN,
            channel_capacity: 64,
        }
    }
}

impl LinkConfig {
    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the liveness poll interval.
    pub fn with_liveness_interval(mut self, interval: Duration) -> Self {
        self.liveness_interval = interval;
        self
    }

    /// Set how many consecutive liveness failures tear the link down.
    pub fn with_liveness_failure_threshold(mut self, threshold: u32) -> Self {
        self.liveness_failure_threshold = threshold;
        self
    }

    /// Set the record delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Set the text encoding.
    pub fn with_encoding(mut self, encoding: TextEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the longest incomplete record kept between chunks.
    pub fn with_max_record_len(mut self, len: usize) -> Self {
        self.max_record_len = len;
        self
    }

    /// Options passed to [`Transport::connect`](crate::transport::Transport::connect).
    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            delimiter: self.delimiter,
            encoding: self.encoding,
        }
    }

    /// Check the configuration for values the link cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(invalid("connect_timeout", format!("{:?}", self.connect_timeout)));
        }
        if self.liveness_interval.is_zero() {
            return Err(invalid(
                "liveness_interval",
                format!("{:?}", self.liveness_interval),
            ));
        }
        if self.liveness_failure_threshold == 0 {
            return Err(invalid("liveness_failure_threshold", "0"));
        }
        if self.max_record_len == 0 {
            return Err(invalid("max_record_len", "0"));
        }
        if self.channel_capacity == 0 {
            return Err(invalid("channel_capacity", "0"));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: impl Into<String>) -> Error {
    Error::InvalidParameter {
        name: name.to_string(),
        value: value.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LinkConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.liveness_interval, Duration::from_secs(5));
        assert_eq!(config.liveness_failure_threshold, 1);
        assert_eq!(config.delimiter, b'\n');
        assert_eq!(config.encoding, TextEncoding::Utf8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = LinkConfig::default()
            .with_connect_timeout(Duration::from_secs(2))
            .with_liveness_interval(Duration::from_millis(500))
            .with_liveness_failure_threshold(3)
            .with_delimiter(b'\r')
            .with_encoding(TextEncoding::Ascii)
            .with_max_record_len(256);

        assert_eq!(config.connect_timeout, Duration::from_secs(2));
        assert_eq!(config.liveness_interval, Duration::from_millis(500));
        assert_eq!(config.liveness_failure_threshold, 3);
        assert_eq!(config.max_record_len, 256);

        let options = config.connect_options();
        assert_eq!(options.delimiter, b'\r');
        assert_eq!(options.encoding, TextEncoding::Ascii);
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let err = LinkConfig::default()
            .with_connect_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { ref name, .. } if name == "connect_timeout"));

        assert!(LinkConfig::default()
            .with_liveness_failure_threshold(0)
            .validate()
            .is_err());
        assert!(LinkConfig::default()
            .with_liveness_interval(Duration::ZERO)
            .validate()
            .is_err());
    }
}
