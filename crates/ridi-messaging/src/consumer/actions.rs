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


//! Per-message acknowledgment actions.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::models::queue_message::MessageId;
use crate::store::QueueStore;

/// Acknowledgment capability for one claimed message.
///
/// Every action targets the message by queue name and id. Deleting or
/// archiving a message that is already gone returns `Ok(false)`, so a
/// handler that runs twice for the same message never fails on its ack.
#[derive(Debug, Clone)]
pub struct AckActions {
    store: QueueStore,
    queue_name: String,
    message_id: MessageId,
}

impl AckActions {
    pub fn new(store: QueueStore, queue_name: impl Into<String>, message_id: MessageId) -> Self {
        Self {
            store,
            queue_name: queue_name.into(),
            message_id,
        }
    }

    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    /// Removes the message. Returns `false` if it was already deleted or archived.
    pub async fn delete_message(&self) -> Result<bool, QueueError> {
        self.store.delete(&self.queue_name, self.message_id).await
    }

    /// Archives the message. Returns `false` if it was already deleted or archived.
    pub async fn archive_message(&self) -> Result<bool, QueueError> {
        self.store.archive(&self.queue_name, self.message_id).await
    }

    /// Hides the message until `now + timeout`. May be called repeatedly.
    pub async fn set_visibility_timeout(&self, timeout: Duration) -> Result<bool, QueueError> {
        self.store
            .set_visibility_timeout(&self.queue_name, self.message_id, timeout)
            .await
    }

    /// Keeps the message hidden while a long handler runs.
    ///
    /// Every `interval` the message's visibility is pushed to `now +
    /// extension`. Pick `extension` longer than `interval` so the message
    /// never becomes visible in between. The heartbeat ends when the
    /// returned guard is dropped or the message is gone.
    pub fn heartbeat(&self, interval: Duration, extension: Duration) -> Heartbeat {
        let actions = self.clone();
        let interval = interval.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            loop {
                ticker.tick().await;
                match actions.set_visibility_timeout(extension).await {
                    Ok(true) => debug!(
                        queue = %actions.queue_name,
                        message_id = actions.message_id,
                        "Heartbeat extended visibility"
                    ),
                    Ok(false) => {
                        debug!(
                            queue = %actions.queue_name,
                            message_id = actions.message_id,
                            "Heartbeat target gone, stopping"
                        );
                        break;
                    }
                    Err(e) => warn!(
                        queue = %actions.queue_name,
                        message_id = actions.message_id,
                        error = %e,
                        "Heartbeat failed to extend visibility"
                    ),
                }
            }
        });

        Heartbeat {
            handle: Some(handle),
        }
    }
}

/// Guard for a running visibility heartbeat. Dropping it stops the heartbeat.
#[derive(Debug)]
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Stops the heartbeat.
    pub fn stop(mut self) {
        self.abort();
    }

    /// Returns true while the heartbeat task is still extending visibility.
    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn abort(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.abort();
    }
}
