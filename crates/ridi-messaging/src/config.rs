/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */


//! Configuration for producers, consumers and listeners.
//!
//! Use [`MessagingConfig::builder()`] in code, or
//! [`MessagingConfig::from_env()`] in services that configure through the
//! environment:
//!
//! | variable | default |
//! |----------|---------|
//! | `RIDI_MESSAGING_DATABASE_URL` (or `DATABASE_URL`) | none |
//! | `RIDI_MESSAGING_VISIBILITY_TIMEOUT_MS` | 30000 |
//! | `RIDI_MESSAGING_POLL_INTERVAL_MS` | 100 |
//! | `RIDI_MESSAGING_MAX_POLL_WAIT_MS` | 90000 |
//! | `RIDI_MESSAGING_BATCH_CEILING` | 100 |
//! | `RIDI_MESSAGING_MAX_CONSECUTIVE_FAILURES` | 10 |
//! | `RIDI_MESSAGING_FAILURE_BACKOFF_MS` | 1000 |
//! | `RIDI_MESSAGING_DB_POOL_SIZE` | 10 |

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const ENV_DATABASE_URL: &str = "RIDI_MESSAGING_DATABASE_URL";
pub const ENV_VISIBILITY_TIMEOUT_MS: &str = "RIDI_MESSAGING_VISIBILITY_TIMEOUT_MS";
pub const ENV_POLL_INTERVAL_MS: &str = "RIDI_MESSAGING_POLL_INTERVAL_MS";
pub const ENV_MAX_POLL_WAIT_MS: &str = "RIDI_MESSAGING_MAX_POLL_WAIT_MS";
pub const ENV_BATCH_CEILING: &str = "RIDI_MESSAGING_BATCH_CEILING";
pub const ENV_MAX_CONSECUTIVE_FAILURES: &str = "RIDI_MESSAGING_MAX_CONSECUTIVE_FAILURES";
pub const ENV_FAILURE_BACKOFF_MS: &str = "RIDI_MESSAGING_FAILURE_BACKOFF_MS";
pub const ENV_DB_POOL_SIZE: &str = "RIDI_MESSAGING_DB_POOL_SIZE";

/// Configuration for the queue.
///
/// # Construction
///
/// ```rust,ignore
/// let config = MessagingConfig::builder()
///     .visibility_timeout(Duration::from_secs(5))
///     .max_poll_wait(Duration::from_secs(60))
///     .build();
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MessagingConfig {
    database_url: Option<String>,
    visibility_timeout: Duration,
    poll_interval: Duration,
    max_poll_wait: Duration,
    batch_ceiling: usize,
    max_consecutive_failures: u32,
    failure_backoff: Duration,
    db_pool_size: u32,
}

impl MessagingConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> MessagingConfigBuilder {
        MessagingConfigBuilder::default()
    }

    /// Loads `.env` if present, then reads `RIDI_MESSAGING_*` variables.
    ///
    /// Unset variables keep their defaults; set but unparsable ones are
    /// an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        // A missing .env file is normal in deployed services
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(url) = lookup(ENV_DATABASE_URL).or_else(|| lookup("DATABASE_URL")) {
            builder = builder.database_url(url);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_VISIBILITY_TIMEOUT_MS)? {
            builder = builder.visibility_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_POLL_INTERVAL_MS)? {
            builder = builder.poll_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_MAX_POLL_WAIT_MS)? {
            builder = builder.max_poll_wait(Duration::from_millis(ms));
        }
        if let Some(n) = parse::<usize>(&lookup, ENV_BATCH_CEILING)? {
            builder = builder.batch_ceiling(n);
        }
        if let Some(n) = parse::<u32>(&lookup, ENV_MAX_CONSECUTIVE_FAILURES)? {
            builder = builder.max_consecutive_failures(n);
        }
        if let Some(ms) = parse::<u64>(&lookup, ENV_FAILURE_BACKOFF_MS)? {
            builder = builder.failure_backoff(Duration::from_millis(ms));
        }
        if let Some(n) = parse::<u32>(&lookup, ENV_DB_POOL_SIZE)? {
            builder = builder.db_pool_size(n);
        }

        Ok(builder.build())
    }

    /// Database URL, when configured through the environment.
    pub fn database_url(&self) -> Option<&str> {
        self.database_url.as_deref()
    }

    /// The database URL, or an error naming the variable to set.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url().ok_or(ConfigError::Missing(ENV_DATABASE_URL))
    }

    /// How long a claimed message stays hidden from other consumers.
    pub fn visibility_timeout(&self) -> Duration {
        self.visibility_timeout
    }

    /// How often an idle listener re-checks its queue.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Longest a single long-poll waits before returning empty.
    pub fn max_poll_wait(&self) -> Duration {
        self.max_poll_wait
    }

    /// Most messages an unbounded listener claims per cycle.
    pub fn batch_ceiling(&self) -> usize {
        self.batch_ceiling
    }

    /// Consecutive failed cycles after which a listener gives up.
    pub fn max_consecutive_failures(&self) -> u32 {
        self.max_consecutive_failures
    }

    /// Pause between a failed cycle and the next attempt.
    pub fn failure_backoff(&self) -> Duration {
        self.failure_backoff
    }

    /// Number of database connections in the pool.
    pub fn db_pool_size(&self) -> u32 {
        self.db_pool_size
    }
}

fn parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
    }
}

/// Builder for [`MessagingConfig`].
#[derive(Debug, Clone)]
pub struct MessagingConfigBuilder {
    config: MessagingConfig,
}

impl Default for MessagingConfigBuilder {
    fn default() -> Self {
        Self {
            config: MessagingConfig {
                database_url: None,
                visibility_timeout: Duration::from_secs(30),
                poll_interval: Duration::from_millis(100),
                max_poll_wait: Duration::from_secs(90),
                batch_ceiling: 100,
                max_consecutive_failures: 10,
                failure_backoff: Duration::from_secs(1),
                db_pool_size: 10,
            },
        }
    }
}

impl MessagingConfigBuilder {
    pub fn database_url(mut self, value: impl Into<String>) -> Self {
        self.config.database_url = Some(value.into());
        self
    }

    pub fn visibility_timeout(mut self, value: Duration) -> Self {
        self.config.visibility_timeout = value;
        self
    }

    pub fn poll_interval(mut self, value: Duration) -> Self {
        self.config.poll_interval = value;
        self
    }

    pub fn max_poll_wait(mut self, value: Duration) -> Self {
        self.config.max_poll_wait = value;
        self
    }

    /// Sets the unbounded claim ceiling. Values below 1 become 1.
    pub fn batch_ceiling(mut self, value: usize) -> Self {
        self.config.batch_ceiling = value.max(1);
        self
    }

    /// Sets the failure limit. Values below 1 become 1.
    pub fn max_consecutive_failures(mut self, value: u32) -> Self {
        self.config.max_consecutive_failures = value.max(1);
        self
    }

    pub fn failure_backoff(mut self, value: Duration) -> Self {
        self.config.failure_backoff = value;
        self
    }

    pub fn db_pool_size(mut self, value: u32) -> Self {
        self.config.db_pool_size = value;
        self
    }

    pub fn build(self) -> MessagingConfig {
        self.config
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        MessagingConfigBuilder::default().build()
    }
}
