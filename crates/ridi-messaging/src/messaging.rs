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


//! One-stop setup for services that both send and consume.

use std::time::Duration;

use tracing::info;

use crate::config::MessagingConfig;
use crate::consumer::{Concurrency, MessageConsumer, MessageHandler};
use crate::database::Database;
use crate::dispatcher::create_work_distributor;
use crate::error::MessagingError;
use crate::models::queue_message::MessageId;
use crate::producer::MessageProducer;
use crate::registry::Queue;
use crate::store::QueueStore;

/// A producer and a consumer sharing one database pool.
pub struct Messaging {
    producer: MessageProducer,
    consumer: MessageConsumer,
}

impl Messaging {
    /// Creates a messaging instance whose listeners poll at the configured
    /// interval, whatever the backend.
    pub fn new(database: Database, config: MessagingConfig) -> Self {
        let store = QueueStore::new(database);
        Self {
            producer: MessageProducer::new(store.clone()),
            consumer: MessageConsumer::new(store, config),
        }
    }

    /// Like [`new`](Self::new), but on PostgreSQL idle listeners are also
    /// woken by `NOTIFY` from the insert trigger.
    pub async fn connect(database: Database, config: MessagingConfig) -> Result<Self, MessagingError> {
        let distributor = create_work_distributor(&database, config.poll_interval()).await?;
        let store = QueueStore::new(database);
        Ok(Self {
            producer: MessageProducer::new(store.clone()),
            consumer: MessageConsumer::with_distributor(store, config, distributor),
        })
    }

    /// Configures everything from the environment: reads
    /// [`MessagingConfig::from_env`], connects, runs migrations and starts
    /// the backend's work distributor.
    pub async fn from_env() -> Result<Self, MessagingError> {
        let config = MessagingConfig::from_env()?;
        let database = Database::connect(config.require_database_url()?, config.db_pool_size())?;
        database.run_migrations().await?;

        info!(backend = database.backend().as_str(), "Messaging configured from environment");
        Self::connect(database, config).await
    }

    pub fn producer(&self) -> &MessageProducer {
        &self.producer
    }

    pub fn consumer(&self) -> &MessageConsumer {
        &self.consumer
    }

    pub fn store(&self) -> &QueueStore {
        self.producer.store()
    }

    /// See [`MessageProducer::send`].
    pub async fn send<Q: Queue>(&self, payload: &Q::Payload) -> Result<MessageId, MessagingError> {
        self.producer.send::<Q>(payload).await
    }

    /// See [`MessageProducer::send_delayed`].
    pub async fn send_delayed<Q: Queue>(
        &self,
        payload: &Q::Payload,
        delay: Duration,
    ) -> Result<MessageId, MessagingError> {
        self.producer.send_delayed::<Q>(payload, delay).await
    }

    /// See [`MessageProducer::send_batch`].
    pub async fn send_batch<Q: Queue>(
        &self,
        payloads: &[Q::Payload],
    ) -> Result<Vec<MessageId>, MessagingError> {
        self.producer.send_batch::<Q>(payloads).await
    }

    /// See [`MessageConsumer::listen`].
    pub fn listen<Q, H>(&self, handler: H, concurrency: Concurrency) -> usize
    where
        Q: Queue,
        H: MessageHandler<Q>,
    {
        self.consumer.listen::<Q, H>(handler, concurrency)
    }

    pub fn stop(&self) {
        self.consumer.stop();
    }

    pub fn is_running(&self) -> bool {
        self.consumer.is_running()
    }

    pub async fn join(&self) {
        self.consumer.join().await;
    }
}
