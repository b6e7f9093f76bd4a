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


//! Diesel schema for the queue table.
//!
//! One table holds every queue, partitioned by `queue_name`. Timestamps are
//! epoch milliseconds (see [`UniversalTimestamp`](super::UniversalTimestamp)).

diesel::table! {
    queue_messages (id) {
        id -> BigInt,
        queue_name -> Text,
        payload -> Text,
        enqueued_at -> BigInt,
        visible_at -> BigInt,
        read_count -> Integer,
        archived_at -> Nullable<BigInt>,
    }
}
