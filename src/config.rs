// src/config.rs
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use lazy_static::lazy_static;
use thiserror::Error;

use crate::text_record::FALLBACK_LANGUAGE;

pub const ENV_WS_ADDR: &str = "NFC_WS_ADDR";
pub const ENV_POLL_MS: &str = "NFC_POLL_MS";
pub const ENV_LANGUAGE: &str = "NFC_LANGUAGE";

const DEFAULT_WS_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 3500);
const DEFAULT_POLL_MS: u64 = 500;

lazy_static! {
    /// Language of the process locale, `en` when none is set.
    pub static ref SYSTEM_LANGUAGE: String = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|key| env::var(key).ok())
        .find_map(|locale| locale_language(&locale))
        .unwrap_or_else(|| FALLBACK_LANGUAGE.to_string());
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("NFC_WS_ADDR={value} is not a socket address: {source}")]
    InvalidAddress {
        value: String,
        source: std::net::AddrParseError,
    },

    #[error("NFC_POLL_MS={value} is not a number of milliseconds: {source}")]
    InvalidPollInterval {
        value: String,
        source: std::num::ParseIntError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub listen_addr: SocketAddr,
    /// Upper bound on each wait for reader/card events.
    pub poll_interval: Duration,
    pub default_language: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(DEFAULT_WS_ADDR),
            poll_interval: Duration::from_millis(DEFAULT_POLL_MS),
            default_language: SYSTEM_LANGUAGE.clone(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_WS_ADDR) {
            config.listen_addr = value
                .parse()
                .map_err(|source| ConfigError::InvalidAddress { value, source })?;
        }

        if let Some(value) = lookup(ENV_POLL_MS) {
            let millis: u64 = value
                .parse()
                .map_err(|source| ConfigError::InvalidPollInterval { value, source })?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Some(value) = lookup(ENV_LANGUAGE).filter(|v| !v.trim().is_empty()) {
            config.default_language = value;
        }

        Ok(config)
    }
}

// "en_US.UTF-8" -> "en"; "C" and "POSIX" carry no language
fn locale_language(locale: &str) -> Option<String> {
    let language = locale
        .split(['_', '.', '@', '-'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    match language.as_str() {
        "" | "c" | "posix" => None,
        _ => Some(language),
    }
}
