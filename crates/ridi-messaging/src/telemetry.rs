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


//! Counters emitted by the queue. No exporter is installed here; host
//! processes register a `metrics` recorder if they want these.

pub(crate) const SENT_TOTAL: &str = "ridi_messaging_sent_total";
pub(crate) const CLAIMED_TOTAL: &str = "ridi_messaging_claimed_total";
pub(crate) const DELETED_TOTAL: &str = "ridi_messaging_deleted_total";
pub(crate) const ARCHIVED_TOTAL: &str = "ridi_messaging_archived_total";
pub(crate) const HANDLER_FAILURES_TOTAL: &str = "ridi_messaging_handler_failures_total";

pub(crate) fn increment(name: &'static str, queue: &str, count: u64) {
    if count == 0 {
        return;
    }
    metrics::counter!(name, "queue" => queue.to_string()).increment(count);
}
