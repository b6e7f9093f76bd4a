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


//! Typed message producer.

use std::time::Duration;

use tracing::info;

use crate::error::MessagingError;
use crate::models::queue_message::MessageId;
use crate::registry::{encode, Queue};
use crate::store::QueueStore;

/// Sends typed payloads into their queues.
///
/// Each call makes exactly one insert attempt. Failures are returned to the
/// caller; nothing is retried internally.
#[derive(Clone, Debug)]
pub struct MessageProducer {
    store: QueueStore,
}

impl MessageProducer {
    pub fn new(store: QueueStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    /// Validates, serializes and enqueues `payload` on queue `Q`.
    ///
    /// The message is claimable as soon as this returns.
    pub async fn send<Q: Queue>(&self, payload: &Q::Payload) -> Result<MessageId, MessagingError> {
        self.send_delayed::<Q>(payload, Duration::ZERO).await
    }

    /// Like [`send`](Self::send), but the message stays hidden for `delay`.
    pub async fn send_delayed<Q: Queue>(
        &self,
        payload: &Q::Payload,
        delay: Duration,
    ) -> Result<MessageId, MessagingError> {
        let body = encode::<Q>(payload)?;
        let id = self.store.send(Q::NAME, body, delay).await?;

        info!(queue = Q::NAME, message_id = id, "Message sent");
        Ok(id)
    }

    /// Sends several payloads in one transaction.
    ///
    /// Every payload is validated first; if any is rejected nothing is
    /// written. Ids come back in the order of `payloads`.
    pub async fn send_batch<Q: Queue>(
        &self,
        payloads: &[Q::Payload],
    ) -> Result<Vec<MessageId>, MessagingError> {
        let bodies = payloads
            .iter()
            .map(encode::<Q>)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.store.send_batch(Q::NAME, bodies, Duration::ZERO).await?;

        info!(queue = Q::NAME, count = ids.len(), "Message batch sent");
        Ok(ids)
    }
}
