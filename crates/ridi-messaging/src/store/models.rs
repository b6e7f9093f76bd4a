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


//! Diesel row types for `queue_messages`.

use diesel::prelude::*;

use crate::database::schema::queue_messages;
use crate::database::universal_types::UniversalTimestamp;
use crate::models::queue_message::QueueMessage;

#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = queue_messages)]
pub(crate) struct QueueMessageRow {
    pub id: i64,
    pub queue_name: String,
    pub payload: String,
    pub enqueued_at: i64,
    pub visible_at: i64,
    pub read_count: i32,
    pub archived_at: Option<i64>,
}

impl From<QueueMessageRow> for QueueMessage {
    fn from(row: QueueMessageRow) -> Self {
        QueueMessage {
            id: row.id,
            queue_name: row.queue_name,
            payload: row.payload,
            enqueued_at: UniversalTimestamp::from_millis(row.enqueued_at),
            visible_at: UniversalTimestamp::from_millis(row.visible_at),
            read_count: row.read_count,
            archived_at: row.archived_at.map(UniversalTimestamp::from_millis),
        }
    }
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = queue_messages)]
pub(crate) struct NewQueueMessageRow {
    pub queue_name: String,
    pub payload: String,
    pub enqueued_at: i64,
    pub visible_at: i64,
    pub read_count: i32,
}

impl NewQueueMessageRow {
    /// A fresh row that becomes claimable at `visible_at`.
    pub fn new(
        queue_name: &str,
        payload: String,
        enqueued_at: UniversalTimestamp,
        visible_at: UniversalTimestamp,
    ) -> Self {
        Self {
            queue_name: queue_name.to_string(),
            payload,
            enqueued_at: enqueued_at.to_millis(),
            visible_at: visible_at.to_millis(),
            read_count: 0,
        }
    }
}

/// Sorts claimed rows by id; `RETURNING` gives no order guarantee.
pub(crate) fn into_messages(mut rows: Vec<QueueMessageRow>) -> Vec<QueueMessage> {
    rows.sort_by_key(|row| row.id);
    rows.into_iter().map(QueueMessage::from).collect()
}
