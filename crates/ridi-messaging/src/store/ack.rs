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


//! Acknowledging messages: delete, archive and visibility extension.
//!
//! All three operations target one message by queue name and id and
//! report whether a row was affected. Acting on a message that is already
//! gone (or already archived) is not an error; it returns `Ok(false)`.

use std::time::Duration;

use diesel::prelude::*;
use tracing::{debug, info};

use super::QueueStore;
use crate::database::schema::queue_messages;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::QueueError;
use crate::models::queue_message::MessageId;
use crate::registry::validate_queue_name;
use crate::telemetry;

impl QueueStore {
    /// Removes a message that has not been archived.
    pub async fn delete(&self, queue: &str, id: MessageId) -> Result<bool, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();

        let affected = crate::dispatch_backend!(
            self.backend(),
            self.delete_postgres(queue_name, id).await,
            self.delete_sqlite(queue_name, id).await
        )?;

        let deleted = affected > 0;
        if deleted {
            info!(queue, message_id = id, "Message deleted");
            telemetry::increment(telemetry::DELETED_TOTAL, queue, 1);
        } else {
            debug!(queue, message_id = id, "Delete matched no message");
        }
        Ok(deleted)
    }

    async fn delete_postgres(&self, queue: String, id: MessageId) -> Result<usize, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    async fn delete_sqlite(&self, queue: String, id: MessageId) -> Result<usize, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    /// Marks a message archived. The row is kept but never claimed again.
    pub async fn archive(&self, queue: &str, id: MessageId) -> Result<bool, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();
        let now = UniversalTimestamp::now().to_millis();

        let affected = crate::dispatch_backend!(
            self.backend(),
            self.archive_postgres(queue_name, id, now).await,
            self.archive_sqlite(queue_name, id, now).await
        )?;

        let archived = affected > 0;
        if archived {
            info!(queue, message_id = id, "Message archived");
            telemetry::increment(telemetry::ARCHIVED_TOTAL, queue, 1);
        } else {
            debug!(queue, message_id = id, "Archive matched no message");
        }
        Ok(archived)
    }

    async fn archive_postgres(
        &self,
        queue: String,
        id: MessageId,
        now: i64,
    ) -> Result<usize, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .set(queue_messages::archived_at.eq(Some(now)))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    async fn archive_sqlite(
        &self,
        queue: String,
        id: MessageId,
        now: i64,
    ) -> Result<usize, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .set(queue_messages::archived_at.eq(Some(now)))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    /// Hides a message until `now + timeout`.
    ///
    /// Used both to extend a claim that needs more time and, with a zero
    /// timeout, to release a message for immediate redelivery. Archived
    /// messages are left untouched.
    pub async fn set_visibility_timeout(
        &self,
        queue: &str,
        id: MessageId,
        timeout: Duration,
    ) -> Result<bool, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();
        let visible_at = UniversalTimestamp::now().after(timeout).to_millis();

        let affected = crate::dispatch_backend!(
            self.backend(),
            self.set_visibility_postgres(queue_name, id, visible_at)
                .await,
            self.set_visibility_sqlite(queue_name, id, visible_at).await
        )?;

        debug!(
            queue,
            message_id = id,
            timeout_ms = timeout.as_millis() as u64,
            updated = affected > 0,
            "Visibility timeout set"
        );
        Ok(affected > 0)
    }

    async fn set_visibility_postgres(
        &self,
        queue: String,
        id: MessageId,
        visible_at: i64,
    ) -> Result<usize, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .set(queue_messages::visible_at.eq(visible_at))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }

    async fn set_visibility_sqlite(
        &self,
        queue: String,
        id: MessageId,
        visible_at: i64,
    ) -> Result<usize, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let affected = conn
            .interact(move |conn| {
                diesel::update(
                    queue_messages::table
                        .filter(queue_messages::id.eq(id))
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .set(queue_messages::visible_at.eq(visible_at))
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(affected)
    }
}
