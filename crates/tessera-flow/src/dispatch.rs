//! Retry-budget policy layered over a queue transport.
//!
//! The transport ([`QueueTransport`]) moves opaque payloads; the
//! [`Dispatcher`] is where task semantics enter the picture. It encodes
//! and decodes [`TaskKey`] payloads at the boundary, applies the attempt
//! budget from [`DispatchPolicy`], and dead-letters poison messages whose
//! payloads no longer parse.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use tessera_core::task_key::TaskKey;

use crate::config::DispatchPolicy;
use crate::error::Result;
use crate::queue::{LeasedMessage, QueueDepth, QueueTransport};

/// A received message resolved to its task key.
#[derive(Debug, Clone)]
pub struct DispatchedTask {
    /// The leased transport message.
    pub message: LeasedMessage,
    /// The task key decoded from the payload.
    pub key: TaskKey,
}

/// What happened to a failed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Returned to the main queue for another attempt.
    Requeued,
    /// Attempt budget exhausted; moved to the dead-letter queue.
    DeadLettered,
}

impl Disposition {
    /// Returns true if the message was dead-lettered.
    #[must_use]
    pub const fn is_dead_lettered(&self) -> bool {
        matches!(self, Self::DeadLettered)
    }
}

/// Policy wrapper around a queue transport.
///
/// Cheap to clone; workers share one dispatcher per queue.
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn QueueTransport>,
    policy: DispatchPolicy,
}

impl Dispatcher {
    /// Creates a dispatcher over a transport handle.
    #[must_use]
    pub fn new(transport: Arc<dyn QueueTransport>, policy: DispatchPolicy) -> Self {
        Self { transport, policy }
    }

    /// Returns the dispatch policy in effect.
    #[must_use]
    pub const fn policy(&self) -> &DispatchPolicy {
        &self.policy
    }

    /// Returns the underlying queue's name.
    #[must_use]
    pub fn queue_name(&self) -> &str {
        self.transport.name()
    }

    /// Publishes one task key.
    pub async fn publish_key(&self, key: &TaskKey) -> Result<()> {
        self.transport.publish(&key.canonical_string()).await
    }

    /// Publishes a sequence of task keys, returning how many were sent.
    pub async fn publish_all(&self, keys: impl Iterator<Item = &TaskKey> + Send) -> Result<usize> {
        let mut published = 0;
        for key in keys {
            self.publish_key(key).await?;
            published += 1;
        }
        Ok(published)
    }

    /// Receives one task, leased for `visibility`.
    ///
    /// Messages whose payload no longer parses as a task key are poison:
    /// they are dead-lettered on the spot and the next message is tried.
    /// Returns `None` when the queue has nothing ready.
    pub async fn receive_task(&self, visibility: Duration) -> Result<Option<DispatchedTask>> {
        loop {
            let Some(message) = self
                .transport
                .receive(1, visibility)
                .await?
                .into_iter()
                .next()
            else {
                return Ok(None);
            };
            match message.payload.parse::<TaskKey>() {
                Ok(key) => return Ok(Some(DispatchedTask { message, key })),
                Err(err) => {
                    warn!(
                        message_id = %message.message_id,
                        payload = %message.payload,
                        error = %err,
                        "dead-lettering message with unparseable payload"
                    );
                    self.transport.dead_letter(&message).await?;
                }
            }
        }
    }

    /// Extends the lease on a message.
    pub async fn renew(&self, message: &LeasedMessage, extension: Duration) -> Result<()> {
        self.transport.renew(message, extension).await
    }

    /// Acknowledges a completed message, removing it permanently.
    pub async fn complete(&self, message: &LeasedMessage) -> Result<()> {
        self.transport.ack(message).await
    }

    /// Handles a retryable failure: requeue if budget remains, otherwise
    /// dead-letter.
    pub async fn retry_or_bury(&self, message: &LeasedMessage) -> Result<Disposition> {
        if message.attempt >= self.policy.max_attempts {
            self.transport.dead_letter(message).await?;
            Ok(Disposition::DeadLettered)
        } else {
            self.transport.fail(message).await?;
            Ok(Disposition::Requeued)
        }
    }

    /// Dead-letters a message unconditionally (non-retryable failure).
    pub async fn bury(&self, message: &LeasedMessage) -> Result<()> {
        self.transport.dead_letter(message).await
    }

    /// Moves dead-lettered messages back to the main queue, honoring the
    /// policy's attempt-reset setting. Returns the number moved.
    pub async fn redrive(&self) -> Result<usize> {
        self.transport
            .redrive(self.policy.reset_attempts_on_redrive)
            .await
    }

    /// Returns the current queue population.
    pub async fn depth(&self) -> Result<QueueDepth> {
        self.transport.depth().await
    }
}
