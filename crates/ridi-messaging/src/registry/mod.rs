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


//! Typed message registry.
//!
//! Each queue is a marker type implementing [`Queue`], which ties the queue's
//! name to the one payload shape it carries. Producers and consumers are
//! generic over `Queue`, so a payload for one queue cannot be sent to
//! another and handlers always receive the decoded type.
//!
//! ```rust,ignore
//! use ridi_messaging::registry::{RouteMapGen, RouteMapGenPayload};
//!
//! producer
//!     .send::<RouteMapGen>(&RouteMapGenPayload { route_id: "r1".into() })
//!     .await?;
//! ```
//!
//! New queues are added by declaring a marker type and implementing
//! [`Queue`] for it. The built-in queues are listed in [`QueueName`].

mod payloads;

pub use payloads::{
    ChangeType, DataSyncNotify, DataSyncNotifyPayload, PlanMapGen, PlanMapGenPayload, PlanNew,
    PlanNewPayload, RecordValue, RouteMapGen, RouteMapGenPayload, SyncRecord, UserNew,
    UserNewPayload,
};

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{PayloadError, QueueNameError};
use crate::models::queue_message::QueueMessage;

/// Maximum length of a queue name.
pub const MAX_QUEUE_NAME_LENGTH: usize = 48;

/// A named queue and the payload type it carries.
pub trait Queue: Send + Sync + 'static {
    /// Name stored in the `queue_name` column. Must pass [`validate_queue_name`].
    const NAME: &'static str;

    /// The payload shape of every message on this queue.
    type Payload: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Checks rules the type system cannot express. Runs before every send
    /// and after every decode.
    fn validate(_payload: &Self::Payload) -> Result<(), PayloadError> {
        Ok(())
    }
}

/// Validates a queue name.
///
/// Queue names end up in SQL parameters and in NOTIFY payloads, so they are
/// restricted to identifiers: 1-48 ASCII letters, digits or underscores,
/// starting with a letter or underscore.
///
/// # Examples
///
/// ```
/// use ridi_messaging::registry::validate_queue_name;
///
/// assert!(validate_queue_name("plan_new").is_ok());
/// assert!(validate_queue_name("9lives").is_err());
/// assert!(validate_queue_name("plan-new").is_err());
/// ```
pub fn validate_queue_name(name: &str) -> Result<&str, QueueNameError> {
    if name.is_empty() || name.len() > MAX_QUEUE_NAME_LENGTH {
        return Err(QueueNameError::InvalidLength {
            name: name.to_string(),
            max: MAX_QUEUE_NAME_LENGTH,
        });
    }

    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    if !starts_ok {
        return Err(QueueNameError::InvalidStart(name.to_string()));
    }

    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(QueueNameError::InvalidCharacters(name.to_string()));
    }

    Ok(name)
}

/// Validates and serializes a payload for queue `Q`.
pub fn encode<Q: Queue>(payload: &Q::Payload) -> Result<String, PayloadError> {
    Q::validate(payload)?;
    serde_json::to_string(payload).map_err(|source| PayloadError::Serialize {
        queue: Q::NAME,
        source,
    })
}

/// Decodes and validates the payload of a stored message.
pub fn decode<Q: Queue>(message: &QueueMessage) -> Result<Q::Payload, PayloadError> {
    let payload: Q::Payload =
        serde_json::from_str(&message.payload).map_err(|source| PayloadError::Decode {
            queue: Q::NAME,
            message_id: message.id,
            source,
        })?;
    Q::validate(&payload)?;
    Ok(payload)
}

/// The queues registered by this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    PlanNew,
    PlanMapGen,
    RouteMapGen,
    UserNew,
    DataSyncNotify,
}

impl QueueName {
    pub const ALL: [QueueName; 5] = [
        QueueName::PlanNew,
        QueueName::PlanMapGen,
        QueueName::RouteMapGen,
        QueueName::UserNew,
        QueueName::DataSyncNotify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::PlanNew => PlanNew::NAME,
            QueueName::PlanMapGen => PlanMapGen::NAME,
            QueueName::RouteMapGen => RouteMapGen::NAME,
            QueueName::UserNew => UserNew::NAME,
            QueueName::DataSyncNotify => DataSyncNotify::NAME,
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = QueueNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        validate_queue_name(s)?;
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| QueueNameError::Unregistered(s.to_string()))
    }
}
