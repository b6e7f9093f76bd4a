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


//! Consuming messages: listeners, handlers and acknowledgment.
//!
//! [`MessageConsumer::listen`] spawns one [`Listener`] task per call. Each
//! listener claims messages of a single queue and runs the handler for each
//! in its own task, so a failing or panicking handler only affects its own
//! message. All listeners of a consumer share one stop flag and one
//! [`WorkDistributor`].

mod actions;
mod handler;
mod listener;

pub use actions::{AckActions, Heartbeat};
pub use handler::{Delivery, MessageHandler};
pub use listener::Listener;

use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::MessagingConfig;
use crate::dispatcher::{PollingDistributor, WorkDistributor};
use crate::registry::Queue;
use crate::store::QueueStore;

/// How many messages a listener processes at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// Claim at most `n` messages and wait for all of their handlers before
    /// claiming again.
    Bounded(NonZeroUsize),
    /// Claim up to the configured batch ceiling each cycle and do not wait
    /// for handlers. In-flight work is not bounded.
    Unbounded,
}

impl Concurrency {
    /// Bounded concurrency; `0` is treated as `1`.
    pub fn bounded(limit: usize) -> Self {
        Concurrency::Bounded(NonZeroUsize::new(limit).unwrap_or(NonZeroUsize::MIN))
    }

    /// Messages to claim per cycle.
    pub(crate) fn claim_limit(&self, batch_ceiling: usize) -> usize {
        match self {
            Concurrency::Bounded(n) => n.get().min(batch_ceiling.max(1)),
            Concurrency::Unbounded => batch_ceiling.max(1),
        }
    }
}

impl Default for Concurrency {
    fn default() -> Self {
        Concurrency::Bounded(NonZeroUsize::MIN)
    }
}

/// Spawns and supervises listeners.
///
/// Dropping the consumer stops its listeners the same way [`stop`](Self::stop) does.
///
/// ```rust,ignore
/// let consumer = MessageConsumer::new(store, MessagingConfig::default());
/// consumer.listen::<PlanNew, _>(handler, Concurrency::bounded(1));
///
/// // later
/// consumer.stop();
/// consumer.join().await;
/// ```
pub struct MessageConsumer {
    store: QueueStore,
    config: MessagingConfig,
    distributor: Arc<dyn WorkDistributor>,
    running: Arc<AtomicBool>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    next_listener_id: AtomicUsize,
}

impl MessageConsumer {
    /// Creates a consumer that polls every `config.poll_interval()`.
    pub fn new(store: QueueStore, config: MessagingConfig) -> Self {
        let distributor = Arc::new(PollingDistributor::with_poll_interval(
            config.poll_interval(),
        ));
        Self::with_distributor(store, config, distributor)
    }

    /// Creates a consumer that waits on `distributor` between empty polls.
    pub fn with_distributor(
        store: QueueStore,
        config: MessagingConfig,
        distributor: Arc<dyn WorkDistributor>,
    ) -> Self {
        Self {
            store,
            config,
            distributor,
            running: Arc::new(AtomicBool::new(true)),
            listeners: Mutex::new(Vec::new()),
            next_listener_id: AtomicUsize::new(1),
        }
    }

    pub fn store(&self) -> &QueueStore {
        &self.store
    }

    pub fn config(&self) -> &MessagingConfig {
        &self.config
    }

    /// Builds a listener for queue `Q` without spawning it.
    pub fn listener<Q, H>(&self, handler: H, concurrency: Concurrency) -> Listener<Q, H>
    where
        Q: Queue,
        H: MessageHandler<Q>,
    {
        Listener::new(
            self.next_listener_id.fetch_add(1, Ordering::SeqCst),
            self.store.clone(),
            handler,
            concurrency,
            self.config.clone(),
            self.distributor.clone(),
            self.running.clone(),
        )
    }

    /// Spawns a listener for queue `Q` on the current tokio runtime.
    ///
    /// The listener runs until [`stop`](Self::stop) is called or it gives
    /// up after repeated database failures. Returns the listener id used
    /// in its log fields.
    pub fn listen<Q, H>(&self, handler: H, concurrency: Concurrency) -> usize
    where
        Q: Queue,
        H: MessageHandler<Q>,
    {
        if !self.is_running() {
            warn!(queue = Q::NAME, "Listener registered on a stopped consumer");
        }

        let listener = self.listener::<Q, H>(handler, concurrency);
        let id = listener.id();
        let handle = tokio::spawn(listener.run());
        self.listeners.lock().push(handle);

        info!(queue = Q::NAME, listener = id, "Listener spawned");
        id
    }

    /// Asks every listener to stop.
    ///
    /// Listeners finish their current cycle, including in-flight handlers,
    /// and then exit. Idle long-polls are woken. Await [`join`](Self::join)
    /// to wait for them. A stopped consumer cannot be restarted.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("Stopping message consumer");
        }
        self.distributor.shutdown();
    }

    /// False once [`stop`](Self::stop) was called or a listener crashed.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Waits for every spawned listener to exit.
    pub async fn join(&self) {
        let handles = std::mem::take(&mut *self.listeners.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Listener task ended abnormally");
            }
        }
    }

    /// Number of listeners spawned and not yet joined.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

impl Drop for MessageConsumer {
    fn drop(&mut self) {
        // Detached listeners would otherwise keep polling forever
        self.running.store(false, Ordering::SeqCst);
        self.distributor.shutdown();
    }
}
