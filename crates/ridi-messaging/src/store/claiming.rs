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


//! Claiming messages for processing.
//!
//! A claim reads up to `limit` visible messages of one queue and, in the
//! same statement, pushes their `visible_at` forward by the visibility
//! timeout and increments `read_count`. Until that timeout lapses no other
//! claim can see them.

use std::time::Duration;

use diesel::prelude::*;
use diesel::sql_types::{BigInt, Text};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::models::{into_messages, QueueMessageRow};
use super::QueueStore;
use crate::database::universal_types::UniversalTimestamp;
use crate::dispatcher::WorkDistributor;
use crate::error::QueueError;
use crate::models::queue_message::QueueMessage;
use crate::registry::validate_queue_name;
use crate::telemetry;

const CLAIM_POSTGRES: &str = r#"
    UPDATE queue_messages
    SET visible_at = $1, read_count = read_count + 1
    WHERE id IN (
        SELECT id FROM queue_messages
        WHERE queue_name = $2
          AND archived_at IS NULL
          AND visible_at <= $3
        ORDER BY id ASC
        LIMIT $4
        FOR UPDATE SKIP LOCKED
    )
    RETURNING id, queue_name, payload, enqueued_at, visible_at, read_count, archived_at
"#;

const CLAIM_SQLITE: &str = r#"
    UPDATE queue_messages
    SET visible_at = ?, read_count = read_count + 1
    WHERE id IN (
        SELECT id FROM queue_messages
        WHERE queue_name = ?
          AND archived_at IS NULL
          AND visible_at <= ?
        ORDER BY id ASC
        LIMIT ?
    )
    RETURNING id, queue_name, payload, enqueued_at, visible_at, read_count, archived_at
"#;

impl QueueStore {
    /// Atomically claims up to `limit` visible messages of `queue`.
    ///
    /// Claimed messages are hidden for `visibility_timeout` and come back
    /// ordered by id. An empty result means nothing was claimable.
    pub async fn claim(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        limit: usize,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        validate_queue_name(queue)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let now = UniversalTimestamp::now();
        let hidden_until = now.after(visibility_timeout);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        let rows = crate::dispatch_backend!(
            self.backend(),
            self.claim_postgres(queue.to_string(), now, hidden_until, limit)
                .await,
            self.claim_sqlite(queue.to_string(), now, hidden_until, limit)
                .await
        )?;

        if !rows.is_empty() {
            debug!(queue, count = rows.len(), "Claimed messages");
            telemetry::increment(telemetry::CLAIMED_TOTAL, queue, rows.len() as u64);
        }
        Ok(into_messages(rows))
    }

    async fn claim_postgres(
        &self,
        queue: String,
        now: UniversalTimestamp,
        hidden_until: UniversalTimestamp,
        limit: i64,
    ) -> Result<Vec<QueueMessageRow>, QueueError> {
        let conn = self.database.get_postgres_connection().await?;

        // The subquery locks the candidate rows and skips rows another
        // claimer holds, so concurrent claims never return the same message.
        let rows = conn
            .interact(move |conn| {
                diesel::sql_query(CLAIM_POSTGRES)
                    .bind::<BigInt, _>(hidden_until.to_millis())
                    .bind::<Text, _>(queue)
                    .bind::<BigInt, _>(now.to_millis())
                    .bind::<BigInt, _>(limit)
                    .load::<QueueMessageRow>(conn)
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(rows)
    }

    async fn claim_sqlite(
        &self,
        queue: String,
        now: UniversalTimestamp,
        hidden_until: UniversalTimestamp,
        limit: i64,
    ) -> Result<Vec<QueueMessageRow>, QueueError> {
        let conn = self.database.get_sqlite_connection().await?;

        // SQLite has no FOR UPDATE SKIP LOCKED. An IMMEDIATE transaction takes
        // the write lock up front, which serializes claimers.
        let rows = conn
            .interact(move |conn| {
                conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
                    diesel::sql_query(CLAIM_SQLITE)
                        .bind::<BigInt, _>(hidden_until.to_millis())
                        .bind::<Text, _>(queue)
                        .bind::<BigInt, _>(now.to_millis())
                        .bind::<BigInt, _>(limit)
                        .load::<QueueMessageRow>(conn)
                })
            })
            .await
            .map_err(|e| QueueError::ConnectionPool(e.to_string()))??;

        Ok(rows)
    }

    /// Claims messages, waiting up to `max_wait` for some to appear.
    ///
    /// Between attempts the call parks on `distributor`, which wakes it after
    /// its poll interval, on a PostgreSQL notification, or on shutdown.
    /// Returns an empty batch once `max_wait` has elapsed or the distributor
    /// has been shut down.
    pub async fn read_with_poll(
        &self,
        queue: &str,
        visibility_timeout: Duration,
        limit: usize,
        max_wait: Duration,
        distributor: &dyn WorkDistributor,
    ) -> Result<Vec<QueueMessage>, QueueError> {
        // Durations past the clock's range wait for a day at most
        let deadline = Instant::now()
            .checked_add(max_wait)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        loop {
            let claimed = self.claim(queue, visibility_timeout, limit).await?;
            if !claimed.is_empty() {
                return Ok(claimed);
            }

            let now = Instant::now();
            if now >= deadline || distributor.is_shutdown() {
                return Ok(claimed);
            }

            if tokio::time::timeout(deadline - now, distributor.wait_for_work(queue))
                .await
                .is_err()
            {
                trace!(queue, "Long poll reached its deadline");
            }
        }
    }
}
