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


//! Error types for every layer of the queue.
//!
//! - [`DatabaseError`]: connection setup and migrations
//! - [`QueueError`]: store operations (claim, ack, enqueue)
//! - [`PayloadError`]: typed payload encoding, decoding and validation
//! - [`MessagingError`]: what producers see, either of the two above
//! - [`ConfigError`]: environment configuration
//!
//! Handler failures are plain [`anyhow::Error`] values; the queue only logs
//! them.

use thiserror::Error;

/// Errors raised while creating connection pools or running migrations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The URL does not name a supported backend.
    #[error(
        "Unable to detect database backend from URL '{0}'. \
         Expected postgres://, postgresql://, sqlite://, or a file path."
    )]
    UnsupportedUrl(String),

    /// The PostgreSQL URL could not be parsed.
    #[error("Invalid PostgreSQL URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The connection pool could not be built or a connection could not be obtained.
    #[error("Connection pool error: {0}")]
    Pool(String),

    /// A connection was requested for the wrong backend.
    #[error("Backend mismatch: expected {expected}, database is {actual}")]
    BackendMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Pending migrations failed to apply.
    #[error("Migration failed: {0}")]
    Migration(String),

    /// The dedicated LISTEN connection could not be set up.
    #[error("Failed to start LISTEN connection: {0}")]
    Listen(#[from] tokio_postgres::Error),
}

/// Errors raised while validating a queue name.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueNameError {
    /// Queue name is empty or exceeds the maximum length.
    #[error("Queue name length invalid: '{name}' (must be 1-{max} characters)")]
    InvalidLength { name: String, max: usize },

    /// Queue name does not start with a letter or underscore.
    #[error("Queue name must start with a letter or underscore: '{0}'")]
    InvalidStart(String),

    /// Queue name contains characters other than ASCII alphanumerics or underscore.
    #[error(
        "Queue name contains invalid characters (only alphanumeric and underscore allowed): '{0}'"
    )]
    InvalidCharacters(String),

    /// The name is valid but no queue is registered under it.
    #[error("No queue registered under the name '{0}'")]
    Unregistered(String),
}

/// Errors raised by [`QueueStore`](crate::QueueStore) operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The pool could not hand out a connection, or the blocking
    /// interaction with it was aborted.
    #[error("Connection pool error: {0}")]
    ConnectionPool(String),

    /// The statement itself failed.
    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    /// The queue name was rejected before touching the database.
    #[error(transparent)]
    QueueName(#[from] QueueNameError),
}

impl From<DatabaseError> for QueueError {
    fn from(err: DatabaseError) -> Self {
        QueueError::ConnectionPool(err.to_string())
    }
}

/// Errors raised while turning typed payloads into rows and back.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The payload could not be serialized to JSON.
    #[error("Failed to serialize payload for queue '{queue}': {source}")]
    Serialize {
        queue: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A stored row did not decode into the queue's payload type.
    #[error("Failed to decode message {message_id} on queue '{queue}': {source}")]
    Decode {
        queue: &'static str,
        message_id: i64,
        #[source]
        source: serde_json::Error,
    },

    /// The payload decoded but broke a rule of its queue.
    #[error("Invalid payload for queue '{queue}': {reason}")]
    Invalid { queue: &'static str, reason: String },
}

impl PayloadError {
    /// Shorthand used by [`Queue::validate`](crate::Queue::validate) implementations.
    pub fn invalid(queue: &'static str, reason: impl Into<String>) -> Self {
        PayloadError::Invalid {
            queue,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced to producers and to callers setting up [`Messaging`](crate::Messaging).
#[derive(Debug, Error)]
pub enum MessagingError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised while loading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required variable is not set.
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    /// A variable is set but does not parse.
    #[error("Invalid value for {name}: '{value}'")]
    Invalid { name: &'static str, value: String },
}
