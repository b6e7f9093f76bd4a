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


//! Inserting messages.

use std::time::Duration;

use diesel::prelude::*;
use tracing::debug;

use super::models::NewQueueMessageRow;
use super::QueueStore;
use crate::database::schema::queue_messages;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::QueueError;
use crate::models::queue_message::MessageId;
use crate::registry::validate_queue_name;
use crate::telemetry;

impl QueueStore {
    /// Inserts one message that becomes claimable after `delay`.
    ///
    /// Returns the new message id once the insert has committed. The payload
    /// is stored as given; typed validation happens in the producer.
    pub async fn send(
        &self,
        queue: &str,
        payload: String,
        delay: Duration,
    ) -> Result<MessageId, QueueError> {
        validate_queue_name(queue)?;
        let now = UniversalTimestamp::now();
        let row = NewQueueMessageRow::new(queue, payload, now, now.after(delay));

        let id = crate::dispatch_backend!(
            self.backend(),
            self.send_postgres(row).await,
            self.send_sqlite(row).await
        )?;

        debug!(queue, message_id = id, "Message enqueued");
        telemetry::increment(telemetry::SENT_TOTAL, queue, 1);
        Ok(id)
    }

    async fn send_postgres(&self, row: NewQueueMessageRow) -> Result<MessageId, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let id = conn
            .interact(move |conn| {
                diesel::insert_into(queue_messages::table)
                    .values(&row)
                    .returning(queue_messages::id)
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(id)
    }

    async fn send_sqlite(&self, row: NewQueueMessageRow) -> Result<MessageId, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let id = conn
            .interact(move |conn| {
                diesel::insert_into(queue_messages::table)
                    .values(&row)
                    .returning(queue_messages::id)
                    .get_result::<i64>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(id)
    }

    /// Inserts several messages in one transaction.
    ///
    /// Either every message is committed or none is. Ids are returned in
    /// the order of `payloads`.
    pub async fn send_batch(
        &self,
        queue: &str,
        payloads: Vec<String>,
        delay: Duration,
    ) -> Result<Vec<MessageId>, QueueError> {
        validate_queue_name(queue)?;
        if payloads.is_empty() {
            return Ok(Vec::new());
        }

        let now = UniversalTimestamp::now();
        let visible_at = now.after(delay);
        let rows: Vec<NewQueueMessageRow> = payloads
            .into_iter()
            .map(|payload| NewQueueMessageRow::new(queue, payload, now, visible_at))
            .collect();

        let ids = crate::dispatch_backend!(
            self.backend(),
            self.send_batch_postgres(rows).await,
            self.send_batch_sqlite(rows).await
        )?;

        debug!(queue, count = ids.len(), "Message batch enqueued");
        telemetry::increment(telemetry::SENT_TOTAL, queue, ids.len() as u64);
        Ok(ids)
    }

    async fn send_batch_postgres(
        &self,
        rows: Vec<NewQueueMessageRow>,
    ) -> Result<Vec<MessageId>, QueueError> {
        use diesel::connection::Connection;

        let conn = self.database.get_postgres_connection().await?;

        let ids = conn
            .interact(move |conn| {
                conn.transaction::<_, diesel::result::Error, _>(|conn| {
                    rows.iter()
                        .map(|row| {
                            diesel::insert_into(queue_messages::table)
                                .values(row)
                                .returning(queue_messages::id)
                                .get_result::<i64>(conn)
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(ids)
    }

    async fn send_batch_sqlite(
        &self,
        rows: Vec<NewQueueMessageRow>,
    ) -> Result<Vec<MessageId>, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let ids = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    rows.iter()
                        .map(|row| {
                            diesel::insert_into(queue_messages::table)
                                .values(row)
                                .returning(queue_messages::id)
                                .get_result::<i64>(conn)
                        })
                        .collect::<Result<Vec<_>, _>>()
                })
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(ids)
    }
}
