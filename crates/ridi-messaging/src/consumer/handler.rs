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


//! Message handlers and the delivery they receive.

use async_trait::async_trait;
use std::future::Future;

use super::actions::AckActions;
use crate::error::PayloadError;
use crate::models::queue_message::QueueMessage;
use crate::registry::Queue;

/// One claimed message, handed to a [`MessageHandler`].
#[derive(Debug, Clone)]
pub struct Delivery<P> {
    /// The stored message. `message.read_count` tells a first delivery
    /// (1) from a redelivery.
    pub message: QueueMessage,
    /// The decoded, validated payload
    pub data: P,
    /// Acknowledgment actions bound to this message
    pub actions: AckActions,
}

/// Processes messages of queue `Q`.
///
/// A handler acknowledges through [`AckActions`]. Returning an error (or
/// panicking) leaves the message hidden until its visibility timeout lapses,
/// after which it is delivered again.
///
/// Any `Fn(Delivery<Q::Payload>) -> impl Future<Output = anyhow::Result<()>>`
/// closure is a handler:
///
/// ```rust,ignore
/// consumer.listen::<RouteMapGen, _>(
///     |delivery: Delivery<RouteMapGenPayload>| async move {
///         render_preview(&delivery.data.route_id).await?;
///         delivery.actions.delete_message().await?;
///         anyhow::Ok(())
///     },
///     Concurrency::bounded(2),
/// );
/// ```
#[async_trait]
pub trait MessageHandler<Q: Queue>: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery<Q::Payload>) -> anyhow::Result<()>;

    /// Called when a claimed message does not decode or fails validation.
    ///
    /// The default surfaces `error` as a handler failure, so the message is
    /// redelivered after its timeout. Override it to archive poison
    /// messages instead.
    async fn handle_invalid(
        &self,
        message: QueueMessage,
        error: PayloadError,
        actions: AckActions,
    ) -> anyhow::Result<()> {
        let _ = (message, actions);
        Err(error.into())
    }
}

#[async_trait]
impl<Q, F, Fut> MessageHandler<Q> for F
where
    Q: Queue,
    F: Fn(Delivery<Q::Payload>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, delivery: Delivery<Q::Payload>) -> anyhow::Result<()> {
        (self)(delivery).await
    }
}
