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


//! Inspection and housekeeping: find, metrics and purging.

use diesel::dsl::{max, min};
use diesel::prelude::*;
use tracing::info;

use super::models::QueueMessageRow;
use super::QueueStore;
use crate::database::schema::queue_messages;
use crate::database::universal_types::UniversalTimestamp;
use crate::error::QueueError;
use crate::models::queue_message::{MessageId, QueueMessage, QueueMetrics};
use crate::registry::validate_queue_name;

/// Raw counters in the order (claimable, in_flight, archived, oldest, max_reads).
type MetricsRow = (i64, i64, i64, Option<i64>, Option<i32>);

impl QueueStore {
    /// Reads a message without claiming it. Archived messages are returned too.
    pub async fn find(
        &self,
        queue: &str,
        id: MessageId,
    ) -> Result<Option<QueueMessage>, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();

        let row = crate::dispatch_backend!(
            self.backend(),
            self.find_postgres(queue_name, id).await,
            self.find_sqlite(queue_name, id).await
        )?;

        Ok(row.map(QueueMessage::from))
    }

    async fn find_postgres(
        &self,
        queue: String,
        id: MessageId,
    ) -> Result<Option<QueueMessageRow>, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let row = conn
            .interact(move |conn| {
                queue_messages::table
                    .filter(queue_messages::id.eq(id))
                    .filter(queue_messages::queue_name.eq(queue))
                    .select(QueueMessageRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(row)
    }

    async fn find_sqlite(
        &self,
        queue: String,
        id: MessageId,
    ) -> Result<Option<QueueMessageRow>, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| {
                queue_messages::table
                    .filter(queue_messages::id.eq(id))
                    .filter(queue_messages::queue_name.eq(queue))
                    .select(QueueMessageRow::as_select())
                    .first(conn)
                    .optional()
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(row)
    }

    /// Snapshot of a queue's backlog.
    ///
    /// Messages left pending for a long time (a high `max_read_count` or an
    /// old `oldest_pending_at`) usually point at a handler that keeps failing.
    pub async fn metrics(&self, queue: &str) -> Result<QueueMetrics, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();
        let now = UniversalTimestamp::now().to_millis();

        let (claimable, in_flight, archived, oldest, max_read_count) = crate::dispatch_backend!(
            self.backend(),
            self.metrics_postgres(queue_name, now).await,
            self.metrics_sqlite(queue_name, now).await
        )?;

        Ok(QueueMetrics {
            queue_name: queue.to_string(),
            claimable,
            in_flight,
            archived,
            oldest_pending_at: oldest.map(UniversalTimestamp::from_millis),
            max_read_count,
        })
    }

    async fn metrics_postgres(&self, queue: String, now: i64) -> Result<MetricsRow, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let row = conn
            .interact(move |conn| -> Result<MetricsRow, diesel::result::Error> {
                let pending = queue_messages::table
                    .filter(queue_messages::queue_name.eq(&queue))
                    .filter(queue_messages::archived_at.is_null());

                let claimable = pending
                    .clone()
                    .filter(queue_messages::visible_at.le(now))
                    .count()
                    .get_result(conn)?;
                let in_flight = pending
                    .clone()
                    .filter(queue_messages::visible_at.gt(now))
                    .count()
                    .get_result(conn)?;
                let archived = queue_messages::table
                    .filter(queue_messages::queue_name.eq(&queue))
                    .filter(queue_messages::archived_at.is_not_null())
                    .count()
                    .get_result(conn)?;
                let (oldest, max_reads) = pending
                    .select((min(queue_messages::enqueued_at), max(queue_messages::read_count)))
                    .get_result(conn)?;

                Ok((claimable, in_flight, archived, oldest, max_reads))
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(row)
    }

    async fn metrics_sqlite(&self, queue: String, now: i64) -> Result<MetricsRow, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let row = conn
            .interact(move |conn| -> Result<MetricsRow, diesel::result::Error> {
                let pending = queue_messages::table
                    .filter(queue_messages::queue_name.eq(&queue))
                    .filter(queue_messages::archived_at.is_null());

                let claimable = pending
                    .clone()
                    .filter(queue_messages::visible_at.le(now))
                    .count()
                    .get_result(conn)?;
                let in_flight = pending
                    .clone()
                    .filter(queue_messages::visible_at.gt(now))
                    .count()
                    .get_result(conn)?;
                let archived = queue_messages::table
                    .filter(queue_messages::queue_name.eq(&queue))
                    .filter(queue_messages::archived_at.is_not_null())
                    .count()
                    .get_result(conn)?;
                let (oldest, max_reads) = pending
                    .select((min(queue_messages::enqueued_at), max(queue_messages::read_count)))
                    .get_result(conn)?;

                Ok((claimable, in_flight, archived, oldest, max_reads))
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(row)
    }

    /// Deletes every non-archived message of `queue`, claimed or not.
    pub async fn purge(&self, queue: &str) -> Result<usize, QueueError> {
        validate_queue_name(queue)?;
        let queue_name = queue.to_string();

        let purged = crate::dispatch_backend!(
            self.backend(),
            self.purge_postgres(queue_name).await,
            self.purge_sqlite(queue_name).await
        )?;

        info!(queue, purged, "Queue purged");
        Ok(purged)
    }

    async fn purge_postgres(&self, queue: String) -> Result<usize, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let purged = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(purged)
    }

    async fn purge_sqlite(&self, queue: String) -> Result<usize, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let purged = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::queue_name.eq(queue))
                        .filter(queue_messages::archived_at.is_null()),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(purged)
    }

    /// Deletes archived messages of every queue archived before `cutoff`.
    pub async fn purge_archived(&self, cutoff: UniversalTimestamp) -> Result<usize, QueueError> {
        let cutoff_ms = cutoff.to_millis();

        let purged = crate::dispatch_backend!(
            self.backend(),
            self.purge_archived_postgres(cutoff_ms).await,
            self.purge_archived_sqlite(cutoff_ms).await
        )?;

        info!(purged, %cutoff, "Archived messages purged");
        Ok(purged)
    }

    async fn purge_archived_postgres(&self, cutoff: i64) -> Result<usize, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        let purged = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::archived_at.is_not_null())
                        .filter(queue_messages::archived_at.lt(cutoff)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(purged)
    }

    async fn purge_archived_sqlite(&self, cutoff: i64) -> Result<usize, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        let purged = conn
            .interact(move |conn| {
                diesel::delete(
                    queue_messages::table
                        .filter(queue_messages::archived_at.is_not_null())
                        .filter(queue_messages::archived_at.lt(cutoff)),
                )
                .execute(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(purged)
    }
}
