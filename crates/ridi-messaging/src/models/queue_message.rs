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


//! Queue Message Model
//!
//! Domain structures for rows of the `queue_messages` table. These are what
//! handlers and callers of [`QueueStore`](crate::QueueStore) see; the diesel
//! row types live next to the store.

use crate::database::universal_types::UniversalTimestamp;
use serde::{Deserialize, Serialize};

/// Identifier of a message. Assigned by the database in insertion order.
pub type MessageId = i64;

/// A message as stored in a queue.
///
/// The payload is kept as raw JSON text; typed access goes through
/// [`Delivery::data`](crate::Delivery).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Insertion-ordered identifier
    pub id: MessageId,
    /// Logical queue the message belongs to
    pub queue_name: String,
    /// Serialized payload (JSON)
    pub payload: String,
    /// When the message was sent
    pub enqueued_at: UniversalTimestamp,
    /// The message cannot be claimed before this instant
    pub visible_at: UniversalTimestamp,
    /// Number of times the message has been claimed
    pub read_count: i32,
    /// Set once the message is archived
    pub archived_at: Option<UniversalTimestamp>,
}

impl QueueMessage {
    /// Returns true once the message has been archived.
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Returns true if the message has been claimed more than once.
    pub fn is_redelivery(&self) -> bool {
        self.read_count > 1
    }
}

/// Point-in-time counters for one queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub queue_name: String,
    /// Non-archived messages whose visibility has lapsed
    pub claimable: i64,
    /// Non-archived messages currently hidden by a claim or a delay
    pub in_flight: i64,
    /// Archived messages still retained
    pub archived: i64,
    /// Enqueue time of the oldest non-archived message
    pub oldest_pending_at: Option<UniversalTimestamp>,
    /// Highest read count among non-archived messages
    pub max_read_count: Option<i32>,
}

impl QueueMetrics {
    /// Non-archived messages, claimable or not.
    pub fn pending(&self) -> i64 {
        self.claimable + self.in_flight
    }
}
