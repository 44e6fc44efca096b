//! Store configuration.
//!
//! - [`StoreConfig`]: raw key-value options attached to a table declaration
//! - [`RdbmsStoreConfig`]: the typed view the adapter runs with

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::StoreError;
use crate::retry::RetryPolicy;

/// Default width of `VARCHAR` columns without a length override.
pub const DEFAULT_STRING_LENGTH: u32 = 254;

/// Options recognized by [`RdbmsStoreConfig::from_config`].
pub const KNOWN_KEYS: &[&str] = &[
    "jdbc.url",
    "username",
    "password",
    "table.name",
    "field.length",
    "field.length.default",
    "table.create",
    "pool.size",
    "pool.idle.timeout.ms",
    "pool.acquire.timeout.ms",
    "query.timeout.ms",
    "retry.max.attempts",
    "retry.backoff.ms",
    "cursor.page.size",
];

/// The `@Store(type = "rdbms", ...)` options of a table declaration.
///
/// Option keys are case-insensitive and stored lowercased. Values stay
/// raw strings until read through one of the typed accessors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    store_type: String,
    #[serde(default, deserialize_with = "lowercase_keys")]
    properties: BTreeMap<String, String>,
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = BTreeMap::<String, String>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

impl StoreConfig {
    /// Options for a store of `store_type` (`"rdbms"` for this adapter).
    #[must_use]
    pub fn new(store_type: impl Into<String>) -> Self {
        Self {
            store_type: store_type.into(),
            properties: BTreeMap::new(),
        }
    }

    /// The `type` element of the annotation.
    #[must_use]
    pub fn store_type(&self) -> &str {
        &self.store_type
    }

    /// Sets `key` to `value`, replacing any earlier value.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.properties
            .insert(key.as_ref().to_lowercase(), value.into());
    }

    /// Builder-style [`set`](Self::set).
    #[must_use]
    pub fn option(mut self, key: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// The trimmed value of `key`; blank values count as unset.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.properties
            .get(&key.to_lowercase())
            .map(String::as_str)
            .map(str::trim)
            .filter(|v| !v.is_empty())
    }

    /// The value of a mandatory option.
    ///
    /// # Errors
    ///
    /// `StoreError::MissingConfig` if `key` is unset.
    pub fn require(&self, key: &str) -> Result<&str, StoreError> {
        self.get(key)
            .ok_or_else(|| StoreError::MissingConfig(key.to_string()))
    }

    /// Reads `key` as a number.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` naming the key if the value does not parse.
    pub fn number<T>(&self, key: &str) -> Result<Option<T>, StoreError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        self.get(key)
            .map(|v| {
                v.parse::<T>().map_err(|e| {
                    StoreError::Configuration(format!("invalid value for '{key}': {e}"))
                })
            })
            .transpose()
    }

    /// Reads `key` as `true` or `false`, ignoring case.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` for any other value.
    pub fn flag(&self, key: &str) -> Result<Option<bool>, StoreError> {
        self.get(key)
            .map(|v| match v.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(StoreError::Configuration(format!(
                    "invalid value for '{key}': '{v}' (expected true or false)"
                ))),
            })
            .transpose()
    }

    /// Reads `key` as a whole number of milliseconds.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` if the value is not an unsigned integer.
    pub fn millis(&self, key: &str) -> Result<Option<Duration>, StoreError> {
        Ok(self.number::<u64>(key)?.map(Duration::from_millis))
    }

    /// Reads `field.length` (`"attr:len, attr:len"`) into per-attribute widths.
    ///
    /// # Errors
    ///
    /// `StoreError::Configuration` for a malformed pair.
    pub fn field_lengths(&self) -> Result<BTreeMap<String, u32>, StoreError> {
        let mut out = BTreeMap::new();
        let Some(raw) = self.get("field.length") else {
            return Ok(out);
        };
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let malformed = |why: &str| {
                StoreError::Configuration(format!("invalid field.length entry '{pair}': {why}"))
            };
            let (attr, len) = pair
                .split_once(':')
                .ok_or_else(|| malformed("expected 'attribute:length'"))?;
            let attr = attr.trim();
            if attr.is_empty() {
                return Err(malformed("empty attribute"));
            }
            let len: u32 = len
                .trim()
                .parse()
                .map_err(|_| malformed("length must be a positive integer"))?;
            out.insert(attr.to_string(), len);
        }
        Ok(out)
    }

    /// Keys this adapter does not recognize.
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.properties
            .keys()
            .map(String::as_str)
            .filter(|k| !KNOWN_KEYS.contains(k))
    }
}

/// Typed configuration of the relational table adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct RdbmsStoreConfig {
    /// Backend URL.
    pub url: String,
    /// Username passed to the connection factory.
    pub username: String,
    /// Password passed to the connection factory.
    pub password: String,
    /// Physical table name; `None` uses the definition name.
    pub table_name: Option<String>,
    /// Per-attribute `VARCHAR` widths.
    pub field_lengths: BTreeMap<String, u32>,
    /// Width of text columns without an override.
    pub default_string_length: u32,
    /// Create the table when it does not exist.
    pub create_table: bool,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Idle connections older than this are closed.
    pub idle_timeout: Duration,
    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,
    /// Backend busy/statement timeout.
    pub query_timeout: Duration,
    /// Attempts for operations failing with transient errors.
    pub retry_max_attempts: u32,
    /// First retry delay.
    pub retry_backoff: Duration,
    /// Rows fetched per cursor page.
    pub cursor_page_size: usize,
}

impl Default for RdbmsStoreConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            username: String::new(),
            password: String::new(),
            table_name: None,
            field_lengths: BTreeMap::new(),
            default_string_length: DEFAULT_STRING_LENGTH,
            create_table: true,
            pool_size: 4,
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(5),
            query_timeout: Duration::from_secs(5),
            retry_max_attempts: 3,
            retry_backoff: Duration::from_millis(20),
            cursor_page_size: 256,
        }
    }
}

impl RdbmsStoreConfig {
    /// Creates a config for `url` with all other options at their defaults.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Parses the typed config from raw options.
    ///
    /// # Required keys
    ///
    /// - `jdbc.url` - backend URL
    ///
    /// # Errors
    ///
    /// Returns `StoreError::MissingConfig` if a required key is absent, or
    /// `StoreError::Configuration` on invalid values.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        if !config.store_type().eq_ignore_ascii_case("rdbms") {
            return Err(StoreError::Configuration(format!(
                "store type '{}' is not handled by the relational adapter",
                config.store_type()
            )));
        }
        for key in config.unknown_keys() {
            warn!(key = %key, "ignoring unrecognized store option");
        }

        let defaults = Self::default();
        let cfg = Self {
            url: config.require("jdbc.url")?.to_string(),
            username: config.get("username").unwrap_or_default().to_string(),
            password: config.get("password").unwrap_or_default().to_string(),
            table_name: config.get("table.name").map(str::to_string),
            field_lengths: config.field_lengths()?,
            default_string_length: config
                .number("field.length.default")?
                .unwrap_or(defaults.default_string_length),
            create_table: config.flag("table.create")?.unwrap_or(defaults.create_table),
            pool_size: config.number("pool.size")?.unwrap_or(defaults.pool_size),
            idle_timeout: config
                .millis("pool.idle.timeout.ms")?
                .unwrap_or(defaults.idle_timeout),
            acquire_timeout: config
                .millis("pool.acquire.timeout.ms")?
                .unwrap_or(defaults.acquire_timeout),
            query_timeout: config
                .millis("query.timeout.ms")?
                .unwrap_or(defaults.query_timeout),
            retry_max_attempts: config
                .number("retry.max.attempts")?
                .unwrap_or(defaults.retry_max_attempts),
            retry_backoff: config
                .millis("retry.backoff.ms")?
                .unwrap_or(defaults.retry_backoff),
            cursor_page_size: config
                .number("cursor.page.size")?
                .unwrap_or(defaults.cursor_page_size),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates the configuration for consistency.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Configuration` on invalid values.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.url.trim().is_empty() {
            return Err(StoreError::MissingConfig("jdbc.url".into()));
        }
        if self.pool_size == 0 {
            return Err(StoreError::Configuration("pool.size must be > 0".into()));
        }
        if self.cursor_page_size == 0 {
            return Err(StoreError::Configuration(
                "cursor.page.size must be > 0".into(),
            ));
        }
        if self.retry_max_attempts == 0 {
            return Err(StoreError::Configuration(
                "retry.max.attempts must be > 0".into(),
            ));
        }
        if self.default_string_length == 0 {
            return Err(StoreError::Configuration(
                "field.length.default must be > 0".into(),
            ));
        }
        if let Some((attr, _)) = self.field_lengths.iter().find(|(_, len)| **len == 0) {
            return Err(StoreError::Configuration(format!(
                "field.length for '{attr}' must be > 0"
            )));
        }
        Ok(())
    }

    /// Retry policy for transient failures.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_max_attempts, self.retry_backoff)
    }
}
