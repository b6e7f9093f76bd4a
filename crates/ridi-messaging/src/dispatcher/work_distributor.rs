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


//! Work distribution abstraction for waking idle listeners.
//!
//! A listener that finds its queue empty parks on a [`WorkDistributor`]
//! before claiming again. Implementations decide what ends the wait:
//!
//! - [`PostgresDistributor`]: LISTEN/NOTIFY on the `queue_message` channel,
//!   with a poll fallback in case a notification is missed
//! - [`PollingDistributor`]: a fixed poll interval, for any backend
//!
//! Both return promptly once [`WorkDistributor::shutdown`] has been called.
//!
//! # Example
//!
//! ```rust,ignore
//! use ridi_messaging::dispatcher::{PollingDistributor, WorkDistributor};
//!
//! let distributor = PollingDistributor::with_poll_interval(Duration::from_millis(100));
//!
//! while !distributor.is_shutdown() {
//!     let messages = store.claim("plan_new", Duration::from_secs(30), 10).await?;
//!     if messages.is_empty() {
//!         distributor.wait_for_work("plan_new").await;
//!     }
//! }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::database::{BackendType, Database, NOTIFY_CHANNEL};
use crate::error::DatabaseError;

/// Trait for abstracting work notification mechanisms.
#[async_trait]
pub trait WorkDistributor: Send + Sync {
    /// Waits until messages might be available on `queue`, or a poll
    /// interval elapses.
    ///
    /// The caller should attempt a claim after this returns and cope with
    /// finding nothing.
    async fn wait_for_work(&self, queue: &str);

    /// Stops the distributor. Current and future waits return promptly.
    fn shutdown(&self);

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    async fn wait_for_shutdown(&self);

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    fn is_shutdown(&self) -> bool;
}

/// Shutdown flag paired with a wakeup for tasks already waiting.
#[derive(Debug, Default)]
struct ShutdownSignal {
    flag: AtomicBool,
    notify: Notify,
}

impl ShutdownSignal {
    fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_set(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a trigger in between is not lost
        notified.as_mut().enable();
        if self.is_set() {
            return;
        }
        notified.await;
    }
}

/// Work distributor that polls at a fixed interval.
///
/// Works with every backend. SQLite has no notification mechanism, so this
/// is the distributor used there.
#[derive(Debug)]
pub struct PollingDistributor {
    poll_interval: Duration,
    shutdown: Arc<ShutdownSignal>,
}

impl PollingDistributor {
    /// Default poll interval
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

    pub fn new() -> Self {
        Self::with_poll_interval(Self::DEFAULT_POLL_INTERVAL)
    }

    /// Creates a polling distributor that wakes every `poll_interval`.
    pub fn with_poll_interval(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            shutdown: Arc::new(ShutdownSignal::default()),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

impl Default for PollingDistributor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkDistributor for PollingDistributor {
    async fn wait_for_work(&self, queue: &str) {
        if self.shutdown.is_set() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(self.poll_interval) => {
                debug!(queue, "Poll interval elapsed");
            }
            _ = self.shutdown.wait() => {
                debug!(queue, "Polling distributor shut down");
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.trigger();
    }

    async fn wait_for_shutdown(&self) {
        self.shutdown.wait().await;
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }
}

/// PostgreSQL work distributor using LISTEN/NOTIFY.
///
/// Holds a dedicated connection listening on the `queue_message` channel.
/// The insert trigger on `queue_messages` sends the queue name as the
/// notification payload, so only listeners of that queue are woken:
///
/// ```sql
/// CREATE TRIGGER queue_messages_notify
///     AFTER INSERT ON queue_messages
///     FOR EACH ROW EXECUTE FUNCTION notify_queue_message();
/// ```
///
/// Waits also end after `poll_fallback`, which covers notifications lost
/// while the listen connection was down.
pub struct PostgresDistributor {
    /// One wakeup per queue that has had a waiter
    wakers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
    poll_fallback: Duration,
    shutdown: Arc<ShutdownSignal>,
    /// Background notification task
    listener_handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl PostgresDistributor {
    /// Opens the LISTEN connection and spawns the notification task.
    ///
    /// # Arguments
    ///
    /// * `database_url` - PostgreSQL connection URL for the listen connection
    /// * `poll_fallback` - Longest wait without a notification
    pub async fn new(database_url: &str, poll_fallback: Duration) -> Result<Self, DatabaseError> {
        let wakers = Arc::new(Mutex::new(HashMap::new()));
        let shutdown = Arc::new(ShutdownSignal::default());

        let listener_handle =
            Self::spawn_listener(database_url, wakers.clone(), shutdown.clone()).await?;

        Ok(Self {
            wakers,
            poll_fallback,
            shutdown,
            listener_handle: Mutex::new(Some(listener_handle)),
        })
    }

    async fn spawn_listener(
        database_url: &str,
        wakers: Arc<Mutex<HashMap<String, Arc<Notify>>>>,
        shutdown: Arc<ShutdownSignal>,
    ) -> Result<tokio::task::JoinHandle<()>, DatabaseError> {
        use futures::StreamExt;
        use tokio::sync::mpsc;

        let (client, mut connection) =
            tokio_postgres::connect(database_url, tokio_postgres::NoTls).await?;

        let (tx, mut rx) = mpsc::unbounded_channel();

        // Drive the connection and forward its async messages
        let conn_shutdown = shutdown.clone();
        tokio::spawn(async move {
            let stream = futures::stream::poll_fn(move |cx| connection.poll_message(cx));
            futures::pin_mut!(stream);

            loop {
                tokio::select! {
                    msg = stream.next() => match msg {
                        Some(Ok(msg)) => {
                            if tx.send(msg).is_err() {
                                break;
                            }
                        }
                        Some(Err(e)) => {
                            error!("PostgreSQL listen connection error: {}", e);
                            break;
                        }
                        None => break,
                    },
                    _ = conn_shutdown.wait() => break,
                }
            }
        });

        client
            .batch_execute(&format!("LISTEN {NOTIFY_CHANNEL}"))
            .await?;
        info!(
            "PostgreSQL LISTEN/NOTIFY listener started on channel '{}'",
            NOTIFY_CHANNEL
        );

        let handle = tokio::spawn(async move {
            // Dropping the client closes the connection
            let _client = client;

            loop {
                tokio::select! {
                    msg = rx.recv() => match msg {
                        Some(tokio_postgres::AsyncMessage::Notification(notification)) => {
                            let queue = notification.payload();
                            debug!(queue, "Received NOTIFY on '{}'", notification.channel());
                            if let Some(waker) = wakers.lock().get(queue) {
                                waker.notify_waiters();
                            }
                        }
                        Some(_) => {}
                        None => {
                            warn!("PostgreSQL listen connection closed, falling back to polling");
                            break;
                        }
                    },
                    _ = shutdown.wait() => {
                        debug!("PostgreSQL listener shutting down");
                        break;
                    }
                }
            }
        });

        Ok(handle)
    }

    fn waker(&self, queue: &str) -> Arc<Notify> {
        self.wakers
            .lock()
            .entry(queue.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }
}

#[async_trait]
impl WorkDistributor for PostgresDistributor {
    async fn wait_for_work(&self, queue: &str) {
        if self.shutdown.is_set() {
            return;
        }

        let waker = self.waker(queue);
        tokio::select! {
            _ = waker.notified() => {
                debug!(queue, "Woke from NOTIFY signal");
            }
            _ = tokio::time::sleep(self.poll_fallback) => {
                debug!(queue, "Woke from fallback poll timeout");
            }
            _ = self.shutdown.wait() => {
                debug!(queue, "PostgreSQL distributor shut down");
            }
        }
    }

    fn shutdown(&self) {
        self.shutdown.trigger();
    }

    async fn wait_for_shutdown(&self) {
        self.shutdown.wait().await;
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.is_set()
    }
}

impl Drop for PostgresDistributor {
    fn drop(&mut self) {
        self.shutdown.trigger();
        if let Some(handle) = self.listener_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Creates the work distributor suited to the database backend.
///
/// PostgreSQL gets a [`PostgresDistributor`] on the database's own URL with
/// `poll_interval` as its fallback; SQLite gets a [`PollingDistributor`].
pub async fn create_work_distributor(
    database: &Database,
    poll_interval: Duration,
) -> Result<Arc<dyn WorkDistributor>, DatabaseError> {
    match database.backend() {
        BackendType::Postgres => Ok(Arc::new(
            PostgresDistributor::new(database.url(), poll_interval).await?,
        )),
        BackendType::Sqlite => Ok(Arc::new(PollingDistributor::with_poll_interval(
            poll_interval,
        ))),
    }
}
