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


//! Payload types of the built-in queues.
//!
//! Field names are camelCase on the wire; the producers and consumers in
//! other services read and write the same JSON.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::Queue;
use crate::error::PayloadError;

fn require_id(queue: &'static str, field: &str, value: &str) -> Result<(), PayloadError> {
    if value.trim().is_empty() {
        return Err(PayloadError::invalid(queue, format!("{field} must not be empty")));
    }
    Ok(())
}

/// A plan was created and needs routing.
pub struct PlanNew;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNewPayload {
    pub plan_id: String,
    /// Set when the plan is re-queued to search a wider area.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wider_retry_num: Option<u32>,
}

impl PlanNewPayload {
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            wider_retry_num: None,
        }
    }

    pub fn with_wider_retry(mut self, retry: u32) -> Self {
        self.wider_retry_num = Some(retry);
        self
    }
}

impl Queue for PlanNew {
    const NAME: &'static str = "plan_new";
    type Payload = PlanNewPayload;

    fn validate(payload: &PlanNewPayload) -> Result<(), PayloadError> {
        require_id(Self::NAME, "planId", &payload.plan_id)
    }
}

/// A plan's map preview needs regenerating.
pub struct PlanMapGen;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMapGenPayload {
    pub plan_id: String,
}

impl Queue for PlanMapGen {
    const NAME: &'static str = "plan_map_gen";
    type Payload = PlanMapGenPayload;

    fn validate(payload: &PlanMapGenPayload) -> Result<(), PayloadError> {
        require_id(Self::NAME, "planId", &payload.plan_id)
    }
}

/// A route's map preview needs regenerating.
pub struct RouteMapGen;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMapGenPayload {
    pub route_id: String,
}

impl Queue for RouteMapGen {
    const NAME: &'static str = "route_map_gen";
    type Payload = RouteMapGenPayload;

    fn validate(payload: &RouteMapGenPayload) -> Result<(), PayloadError> {
        require_id(Self::NAME, "routeId", &payload.route_id)
    }
}

/// A user signed up.
pub struct UserNew;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNewPayload {
    pub user_id: String,
}

impl Queue for UserNew {
    const NAME: &'static str = "user_new";
    type Payload = UserNewPayload;

    fn validate(payload: &UserNewPayload) -> Result<(), PayloadError> {
        require_id(Self::NAME, "userId", &payload.user_id)
    }
}

/// A row changed in a replicated table.
pub struct DataSyncNotify;

/// Kind of row change, serialized as `INSERT`, `UPDATE` or `DELETE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeType {
    Insert,
    Update,
    Delete,
}

/// A column value in a replicated row. Only scalars are replicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl RecordValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            RecordValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Column name to value.
pub type SyncRecord = BTreeMap<String, RecordValue>;

/// Row-change notification.
///
/// `record` is the row after the change and `old_record` the row before it:
/// an insert carries only `record`, a delete only `old_record`, an update
/// both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSyncNotifyPayload {
    #[serde(rename = "type")]
    pub change: ChangeType,
    pub table: String,
    pub schema: String,
    pub record: Option<SyncRecord>,
    pub old_record: Option<SyncRecord>,
}

impl DataSyncNotifyPayload {
    pub fn insert(table: impl Into<String>, schema: impl Into<String>, record: SyncRecord) -> Self {
        Self {
            change: ChangeType::Insert,
            table: table.into(),
            schema: schema.into(),
            record: Some(record),
            old_record: None,
        }
    }

    pub fn update(
        table: impl Into<String>,
        schema: impl Into<String>,
        record: SyncRecord,
        old_record: SyncRecord,
    ) -> Self {
        Self {
            change: ChangeType::Update,
            table: table.into(),
            schema: schema.into(),
            record: Some(record),
            old_record: Some(old_record),
        }
    }

    pub fn delete(
        table: impl Into<String>,
        schema: impl Into<String>,
        old_record: SyncRecord,
    ) -> Self {
        Self {
            change: ChangeType::Delete,
            table: table.into(),
            schema: schema.into(),
            record: None,
            old_record: Some(old_record),
        }
    }

    /// The row the change applies to: the new row for inserts and updates,
    /// the removed row for deletes.
    pub fn row(&self) -> Option<&SyncRecord> {
        match self.change {
            ChangeType::Insert | ChangeType::Update => self.record.as_ref(),
            ChangeType::Delete => self.old_record.as_ref(),
        }
    }

    /// Owner of the changed row, read from the row's `userId` column.
    pub fn user_id(&self) -> Option<&str> {
        self.row()?.get("userId")?.as_str()
    }
}

impl Queue for DataSyncNotify {
    const NAME: &'static str = "data_sync_notify";
    type Payload = DataSyncNotifyPayload;

    fn validate(payload: &DataSyncNotifyPayload) -> Result<(), PayloadError> {
        require_id(Self::NAME, "table", &payload.table)?;
        require_id(Self::NAME, "schema", &payload.schema)?;

        let shape_ok = match payload.change {
            ChangeType::Insert => payload.record.is_some() && payload.old_record.is_none(),
            ChangeType::Update => payload.record.is_some() && payload.old_record.is_some(),
            ChangeType::Delete => payload.record.is_none() && payload.old_record.is_some(),
        };
        if !shape_ok {
            return Err(PayloadError::invalid(
                Self::NAME,
                format!(
                    "{:?} change has the wrong record/old_record combination",
                    payload.change
                ),
            ));
        }
        Ok(())
    }
}
