//! Queue transport abstraction with lease and dead-letter semantics.
//!
//! This module provides:
//!
//! - [`QueueTransport`]: Trait over any queue offering
//!   publish / receive-with-lease / ack / fail / dead-letter / redrive
//! - [`LeasedMessage`]: A received message plus its lease receipt
//! - [`memory::InMemoryQueue`]: Single-process transport for tests and
//!   in-process drain runs
//! - [`fs::FsQueue`]: Directory-backed transport for multi-process runs
//!   on a shared filesystem
//!
//! ## Design Principles
//!
//! - **Opaque payloads**: The transport carries strings; task semantics
//!   live in [`crate::dispatch`]
//! - **At-least-once**: An expired lease makes the message visible again;
//!   consumers must tolerate redelivery
//! - **Fenced receipts**: Every lease has a single-use receipt; after the
//!   lease expires and the message is redelivered, operations with the
//!   old receipt fail with [`Error::LeaseLost`](crate::error::Error)
//! - **Explicit handles**: Transports are constructed and passed in, not
//!   ambient globals, so tests can substitute an in-memory fake

pub mod fs;
pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Converts a std duration to a chrono duration without panicking.
pub(crate) fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
}

/// A message held under a visibility lease.
///
/// The worker holds only the lease, never the message: if the lease
/// expires before acknowledgement, the transport hands the message to the
/// next caller of [`QueueTransport::receive`] and this receipt goes stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedMessage {
    /// Transport-assigned message identifier, stable across deliveries.
    pub message_id: String,
    /// Single-use lease receipt for renew/ack/fail operations.
    pub receipt: String,
    /// Opaque payload as published.
    pub payload: String,
    /// Delivery count, including this delivery.
    pub attempt: u32,
    /// When the current lease expires.
    pub lease_deadline: DateTime<Utc>,
}

/// Queue population broken down by message state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueDepth {
    /// Messages visible to the next receive (including expired leases
    /// awaiting reclaim).
    pub ready: usize,
    /// Messages under an unexpired lease.
    pub leased: usize,
    /// Messages in the dead-letter queue.
    pub dead: usize,
}

impl QueueDepth {
    /// Returns true if no live work remains (dead-lettered messages do
    /// not count; they stay put until an explicit redrive).
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.ready == 0 && self.leased == 0
    }
}

/// Transport abstraction for queue-mediated work distribution.
///
/// Any transport offering these operations is substitutable: the
/// in-memory and filesystem queues here, or a managed cloud queue behind
/// the same trait.
///
/// ## Attempt Counting
///
/// The attempt counter is the delivery count, incremented at `receive`.
/// A lease-expiry redelivery therefore counts against the retry budget
/// exactly like an explicit `fail`.
///
/// ## Thread Safety
///
/// All methods are `Send + Sync` to support concurrent polling from many
/// worker tasks.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    /// Publishes a payload to the main queue.
    async fn publish(&self, payload: &str) -> Result<()>;

    /// Receives up to `max_messages`, each leased for `visibility`.
    ///
    /// Returns an empty vector when nothing is ready. Messages whose
    /// previous lease expired are reclaimed and redelivered here, with
    /// their attempt count incremented.
    async fn receive(&self, max_messages: usize, visibility: Duration) -> Result<Vec<LeasedMessage>>;

    /// Extends the lease on a message by `extension` from now.
    ///
    /// # Errors
    ///
    /// Fails with `Error::LeaseLost` if the receipt is stale.
    async fn renew(&self, message: &LeasedMessage, extension: Duration) -> Result<()>;

    /// Acknowledges a message, removing it permanently.
    ///
    /// # Errors
    ///
    /// Fails with `Error::LeaseLost` if the receipt is stale.
    async fn ack(&self, message: &LeasedMessage) -> Result<()>;

    /// Returns a message to the queue, immediately visible.
    ///
    /// # Errors
    ///
    /// Fails with `Error::LeaseLost` if the receipt is stale.
    async fn fail(&self, message: &LeasedMessage) -> Result<()>;

    /// Moves a message to the dead-letter queue.
    ///
    /// Dead-lettered messages never reappear in `receive` until an
    /// explicit [`redrive`](Self::redrive).
    ///
    /// # Errors
    ///
    /// Fails with `Error::LeaseLost` if the receipt is stale.
    async fn dead_letter(&self, message: &LeasedMessage) -> Result<()>;

    /// Moves every dead-lettered message back to the main queue,
    /// preserving payloads. Resets attempt counts to zero when
    /// `reset_attempts` is set.
    ///
    /// Returns the number of messages moved.
    async fn redrive(&self, reset_attempts: bool) -> Result<usize>;

    /// Returns the current queue population.
    async fn depth(&self) -> Result<QueueDepth>;

    /// Returns the queue's name or identifier.
    fn name(&self) -> &str;
}
