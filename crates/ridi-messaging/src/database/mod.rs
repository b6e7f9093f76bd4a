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


//! Database layer: connection pools, schema, migrations and timestamp types.
//!
//! The queue runs on PostgreSQL or SQLite, chosen at runtime from the
//! connection URL. Both backends share one table definition
//! ([`schema::queue_messages`]); timestamps are stored as epoch
//! milliseconds so the same diesel types work on either.

pub mod connection;
pub mod schema;
pub mod universal_types;

pub use connection::{AnyPool, BackendType, Database};
pub use universal_types::UniversalTimestamp;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

/// Migrations for the PostgreSQL backend (table, indexes, NOTIFY trigger).
pub const POSTGRES_MIGRATIONS: EmbeddedMigrations =
    embed_migrations!("src/database/migrations/postgres");

/// Migrations for the SQLite backend.
pub const SQLITE_MIGRATIONS: EmbeddedMigrations = embed_migrations!("src/database/migrations/sqlite");

/// Channel the PostgreSQL insert trigger notifies on. The payload is the
/// queue name of the inserted row.
pub const NOTIFY_CHANNEL: &str = "queue_message";
