//! Environmental management
//!
//! Runtime knobs are collected in a `Config`. A process wide default is read once from the
//! environment (see `Config::from_env`); communicators carry their own copy so that tests and
//! embedders can run differently configured groups side by side.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use log::warn;
use once_cell::sync::Lazy;

use crate::error::{Error, Result};

static GLOBAL: Lazy<Config> = Lazy::new(|| {
    Config::from_env().unwrap_or_else(|err| {
        warn!("ignoring environment configuration: {}", err);
        Config::default()
    })
});

/// How values of unknown size are transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DynamicProtocol {
    /// The sender transmits the payload as one message; the receiver probes for its length and
    /// receives it with a matched receive.
    #[default]
    Probe,
    /// The sender announces the payload length in a separate message on the user tag; the
    /// receiver sizes its buffer from the announcement before receiving the payload.
    SizePrefix,
}

impl FromStr for DynamicProtocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "probe" => Ok(DynamicProtocol::Probe),
            "size-prefix" => Ok(DynamicProtocol::SizePrefix),
            _ => Err(Error::Config {
                key: "RANKWIRE_DYNAMIC_PROTOCOL",
                value: s.to_string(),
            }),
        }
    }
}

/// Pacing of the polling loops used when waiting on several requests
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Polling {
    /// Number of fruitless passes that only yield the thread
    pub spins: u32,
    /// First sleep once spinning is over
    pub initial: Duration,
    /// Longest sleep between two passes
    pub max: Duration,
    /// Growth factor of the sleep
    pub factor: u32,
}

impl Default for Polling {
    fn default() -> Self {
        Polling {
            spins: 16,
            initial: Duration::from_micros(1),
            max: Duration::from_millis(1),
            factor: 2,
        }
    }
}

/// Runtime configuration of a communicator
///
/// # Examples
///
/// ```
/// use rankwire::environment::{Config, DynamicProtocol};
///
/// let config = Config::default()
///     .with_dynamic_protocol(DynamicProtocol::SizePrefix)
///     .with_eager_limit(1024);
/// assert_eq!(config.dynamic_protocol(), DynamicProtocol::SizePrefix);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    dynamic_protocol: DynamicProtocol,
    polling: Polling,
    eager_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            dynamic_protocol: DynamicProtocol::default(),
            polling: Polling::default(),
            eager_limit: 64 * 1024,
        }
    }
}

fn parse_var<T: FromStr>(key: &'static str) -> Result<Option<T>> {
    match env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| Error::Config { key, value }),
        Err(_) => Ok(None),
    }
}

impl Config {
    /// Read the configuration from the environment.
    ///
    /// - `RANKWIRE_DYNAMIC_PROTOCOL`: `probe` or `size-prefix`
    /// - `RANKWIRE_EAGER_LIMIT`: largest message in bytes whose send completes without a match
    /// - `RANKWIRE_POLL_MAX_US`: longest sleep of polling loops, in microseconds
    ///
    /// Unset variables keep their default.
    pub fn from_env() -> Result<Config> {
        let mut config = Config::default();
        if let Ok(value) = env::var("RANKWIRE_DYNAMIC_PROTOCOL") {
            config.dynamic_protocol = value.trim().parse()?;
        }
        if let Some(limit) = parse_var("RANKWIRE_EAGER_LIMIT")? {
            config.eager_limit = limit;
        }
        if let Some(micros) = parse_var("RANKWIRE_POLL_MAX_US")? {
            config.polling.max = Duration::from_micros(micros);
        }
        Ok(config)
    }

    /// The process wide default, read from the environment on first use.
    pub fn global() -> &'static Config {
        &GLOBAL
    }

    /// Use `protocol` for values of unknown size.
    pub fn with_dynamic_protocol(mut self, protocol: DynamicProtocol) -> Self {
        self.dynamic_protocol = protocol;
        self
    }

    /// Use `polling` in multi-request waits.
    pub fn with_polling(mut self, polling: Polling) -> Self {
        self.polling = polling;
        self
    }

    /// Complete sends of up to `limit` bytes without waiting for a match.
    pub fn with_eager_limit(mut self, limit: usize) -> Self {
        self.eager_limit = limit;
        self
    }

    /// Protocol used for values of unknown size
    pub fn dynamic_protocol(&self) -> DynamicProtocol {
        self.dynamic_protocol
    }

    /// Pacing of multi-request waits
    pub fn polling(&self) -> Polling {
        self.polling
    }

    /// Largest send in bytes that completes without a match
    pub fn eager_limit(&self) -> usize {
        self.eager_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocols_parse_from_their_names() {
        assert_eq!("probe".parse::<DynamicProtocol>().unwrap(), DynamicProtocol::Probe);
        assert_eq!(
            "size-prefix".parse::<DynamicProtocol>().unwrap(),
            DynamicProtocol::SizePrefix
        );
        assert!(matches!(
            "legacy".parse::<DynamicProtocol>(),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn builders_override_defaults() {
        let polling = Polling {
            spins: 0,
            ..Polling::default()
        };
        let config = Config::default().with_polling(polling).with_eager_limit(0);
        assert_eq!(config.polling().spins, 0);
        assert_eq!(config.eager_limit(), 0);
        assert_eq!(config.dynamic_protocol(), DynamicProtocol::Probe);
    }
}
