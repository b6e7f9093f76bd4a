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


//! Timestamp wrapper shared by both backends.
//!
//! Domain code works with `UniversalTimestamp`; the store converts to and
//! from epoch milliseconds at the row boundary so PostgreSQL and SQLite see
//! the same `BIGINT` column type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Millisecond-precision UTC timestamp.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct UniversalTimestamp(pub DateTime<Utc>);

impl UniversalTimestamp {
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }

    pub fn into_inner(self) -> DateTime<Utc> {
        self.0
    }

    /// Epoch milliseconds, the storage representation.
    pub fn to_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Rebuilds a timestamp from its storage representation. Values outside
    /// chrono's range clamp to the nearest representable instant.
    pub fn from_millis(millis: i64) -> Self {
        let clamped = millis.clamp(Self::min_millis(), Self::max_millis());
        Self(DateTime::<Utc>::from_timestamp_millis(clamped).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }

    /// This instant shifted forward by `duration`, saturating at the latest
    /// representable instant.
    pub fn after(&self, duration: Duration) -> Self {
        let delta = i64::try_from(duration.as_millis()).unwrap_or(i64::MAX);
        Self::from_millis(self.to_millis().saturating_add(delta))
    }

    /// The latest instant that round-trips through epoch milliseconds.
    pub fn max() -> Self {
        Self::from_millis(Self::max_millis())
    }

    fn max_millis() -> i64 {
        DateTime::<Utc>::MAX_UTC.timestamp_millis()
    }

    fn min_millis() -> i64 {
        DateTime::<Utc>::MIN_UTC.timestamp_millis()
    }
}

impl fmt::Display for UniversalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

impl From<DateTime<Utc>> for UniversalTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl From<UniversalTimestamp> for DateTime<Utc> {
    fn from(wrapper: UniversalTimestamp) -> Self {
        wrapper.0
    }
}
