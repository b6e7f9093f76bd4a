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


//! The listener loop for one queue.
//!
//! A listener repeatedly claims a batch, hands each message to its handler
//! in a separate task and, in bounded mode, waits for the batch to settle
//! before claiming again. Handler tasks are never cancelled: when the
//! listener stops it waits for them before returning.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::actions::AckActions;
use super::handler::{Delivery, MessageHandler};
use super::Concurrency;
use crate::config::MessagingConfig;
use crate::dispatcher::WorkDistributor;
use crate::error::QueueError;
use crate::models::queue_message::QueueMessage;
use crate::registry::{decode, Queue};
use crate::store::QueueStore;
use crate::telemetry;

/// Claims and dispatches messages of queue `Q` to handler `H`.
///
/// Usually spawned by [`MessageConsumer::listen`](super::MessageConsumer::listen).
/// Hosts that drive polling themselves can build one with
/// [`MessageConsumer::listener`](super::MessageConsumer::listener) and call
/// [`poll_once`](Self::poll_once).
pub struct Listener<Q: Queue, H: MessageHandler<Q>> {
    id: usize,
    store: QueueStore,
    handler: Arc<H>,
    concurrency: Concurrency,
    config: MessagingConfig,
    distributor: Arc<dyn WorkDistributor>,
    running: Arc<AtomicBool>,
    in_flight: JoinSet<()>,
    _queue: PhantomData<fn() -> Q>,
}

impl<Q: Queue, H: MessageHandler<Q>> Listener<Q, H> {
    pub(crate) fn new(
        id: usize,
        store: QueueStore,
        handler: H,
        concurrency: Concurrency,
        config: MessagingConfig,
        distributor: Arc<dyn WorkDistributor>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id,
            store,
            handler: Arc::new(handler),
            concurrency,
            config,
            distributor,
            running,
            in_flight: JoinSet::new(),
            _queue: PhantomData,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    /// Handler tasks dispatched but not yet observed as finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn claim_limit(&self) -> usize {
        self.concurrency.claim_limit(self.config.batch_ceiling())
    }

    /// Runs one claim and dispatch cycle without long-polling.
    ///
    /// Returns the number of messages dispatched. In bounded mode their
    /// handlers have finished by the time this returns.
    pub async fn poll_once(&mut self) -> Result<usize, QueueError> {
        let messages = self
            .store
            .claim(Q::NAME, self.config.visibility_timeout(), self.claim_limit())
            .await?;
        Ok(self.dispatch(messages).await)
    }

    /// One long-poll cycle: waits up to `max_poll_wait` for messages, then
    /// dispatches whatever was claimed.
    async fn cycle(&mut self) -> Result<usize, QueueError> {
        let messages = self
            .store
            .read_with_poll(
                Q::NAME,
                self.config.visibility_timeout(),
                self.claim_limit(),
                self.config.max_poll_wait(),
                self.distributor.as_ref(),
            )
            .await?;
        Ok(self.dispatch(messages).await)
    }

    async fn dispatch(&mut self, messages: Vec<QueueMessage>) -> usize {
        let count = messages.len();

        for message in messages {
            let actions = AckActions::new(self.store.clone(), Q::NAME, message.id);
            let span = info_span!(
                "message",
                queue = Q::NAME,
                message_id = message.id,
                read_count = message.read_count,
                listener = self.id
            );
            self.in_flight
                .spawn(process::<Q, H>(self.handler.clone(), message, actions).instrument(span));
        }

        match self.concurrency {
            Concurrency::Bounded(_) => self.drain().await,
            Concurrency::Unbounded => {
                while let Some(result) = self.in_flight.try_join_next() {
                    observe::<Q>(result);
                }
            }
        }

        count
    }

    /// Waits for every dispatched handler to finish.
    async fn drain(&mut self) {
        while let Some(result) = self.in_flight.join_next().await {
            observe::<Q>(result);
        }
    }

    /// Runs cycles until the consumer stops.
    ///
    /// A failed cycle is retried after `failure_backoff`, or sooner if the
    /// consumer stops in the meantime. After
    /// `max_consecutive_failures` failures in a row the consumer is marked
    /// stopped and the listener exits.
    pub async fn run(mut self) {
        let span = info_span!("listener", queue = Q::NAME, listener = self.id);

        async move {
            info!(concurrency = ?self.concurrency, "Listener started");
            let max_failures = self.config.max_consecutive_failures();
            let mut failures = 0u32;

            while self.running.load(Ordering::SeqCst) {
                match self.cycle().await {
                    Ok(dispatched) => {
                        failures = 0;
                        if dispatched == 0 {
                            debug!("Long poll returned empty");
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        if failures >= max_failures {
                            error!(
                                failures,
                                error = %e,
                                "Listener crashed after repeated failures, stopping consumer"
                            );
                            self.running.store(false, Ordering::SeqCst);
                            self.distributor.shutdown();
                            break;
                        }
                        warn!(
                            failures,
                            max_failures,
                            error = %e,
                            "Listener cycle failed, retrying"
                        );
                        tokio::select! {
                            _ = tokio::time::sleep(self.config.failure_backoff()) => {}
                            _ = self.distributor.wait_for_shutdown() => {
                                debug!("Backoff interrupted by shutdown");
                            }
                        }
                    }
                }
            }

            self.drain().await;
            info!("Listener stopped");
        }
        .instrument(span)
        .await
    }
}

/// Decodes the message and runs the handler, logging the outcome.
async fn process<Q: Queue, H: MessageHandler<Q>>(
    handler: Arc<H>,
    message: QueueMessage,
    actions: AckActions,
) {
    let result = match decode::<Q>(&message) {
        Ok(data) => {
            handler
                .handle(Delivery {
                    message,
                    data,
                    actions,
                })
                .await
        }
        Err(err) => {
            warn!(error = %err, "Message payload rejected");
            handler.handle_invalid(message, err, actions).await
        }
    };

    match result {
        Ok(()) => info!("Message processed"),
        Err(e) => {
            error!(
                error = %format!("{e:#}"),
                "Handler failed, message will be redelivered after its visibility timeout"
            );
            telemetry::increment(telemetry::HANDLER_FAILURES_TOTAL, Q::NAME, 1);
        }
    }
}

fn observe<Q: Queue>(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!(
                queue = Q::NAME,
                "Handler panicked, message will be redelivered after its visibility timeout"
            );
            telemetry::increment(telemetry::HANDLER_FAILURES_TOTAL, Q::NAME, 1);
        } else {
            warn!(queue = Q::NAME, error = %e, "Handler task cancelled");
        }
    }
}
