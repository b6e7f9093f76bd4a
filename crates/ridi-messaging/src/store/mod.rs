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


//! Queue store with runtime backend selection.
//!
//! [`QueueStore`] owns every statement that touches `queue_messages`. Each
//! public operation dispatches to a PostgreSQL or SQLite implementation
//! based on the backend detected when the [`Database`] was created.
//!
//! Operations are split by concern:
//! - `enqueue`: inserting messages
//! - `claiming`: claim-for-processing and the long-poll loop
//! - `ack`: delete, archive and visibility extension
//! - `maintenance`: inspection, metrics and purging

mod ack;
mod claiming;
mod enqueue;
mod maintenance;
pub(crate) mod models;

use crate::database::{BackendType, Database};

/// Dispatches to a backend-specific expression.
///
/// ```rust,ignore
/// crate::dispatch_backend!(
///     self.backend(),
///     self.delete_postgres(queue, id).await,
///     self.delete_sqlite(queue, id).await
/// )
/// ```
#[macro_export]
macro_rules! dispatch_backend {
    ($backend:expr, $pg:expr, $sqlite:expr) => {
        match $backend {
            $crate::database::BackendType::Postgres => $pg,
            $crate::database::BackendType::Sqlite => $sqlite,
        }
    };
}

/// Atomic operations on the `queue_messages` table.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone, Debug)]
pub struct QueueStore {
    database: Database,
}

impl QueueStore {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn backend(&self) -> BackendType {
        self.database.backend()
    }
}
