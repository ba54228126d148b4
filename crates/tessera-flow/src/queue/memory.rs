//! In-memory queue transport.
//!
//! Single-process only: tasks are not visible across process boundaries,
//! so this transport suits tests and the in-process publish-then-drain
//! path. Lease semantics are identical to the durable transports:
//! visibility deadlines, fenced receipts, dead-letter, redrive.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ulid::Ulid;

use super::{to_chrono, LeasedMessage, QueueDepth, QueueTransport};
use crate::error::{Error, Result};

/// Where a message currently lives.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Slot {
    /// Visible to the next receive.
    Ready,
    /// Held under a lease.
    Leased {
        receipt: String,
        deadline: DateTime<Utc>,
    },
    /// In the dead-letter queue.
    Dead,
}

#[derive(Debug)]
struct MessageState {
    payload: String,
    attempt: u32,
    /// Publish order; receives hand out ready messages oldest-first.
    seq: u64,
    slot: Slot,
}

#[derive(Debug, Default)]
struct QueueState {
    messages: HashMap<String, MessageState>,
    next_seq: u64,
}

/// Converts a lock poison error to a transport error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::transport("queue lock poisoned")
}

/// In-memory queue transport for tests and single-process runs.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    state: RwLock<QueueState>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new("default")
    }
}

impl InMemoryQueue {
    /// Creates a new, empty in-memory queue.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(QueueState::default()),
        }
    }

    /// Validates that `message`'s receipt still holds its lease.
    fn check_receipt(state: &MessageState, message: &LeasedMessage) -> Result<()> {
        match &state.slot {
            Slot::Leased { receipt, .. } if *receipt == message.receipt => Ok(()),
            _ => Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            }),
        }
    }

    fn with_leased<R>(
        &self,
        message: &LeasedMessage,
        apply: impl FnOnce(&mut MessageState) -> R,
    ) -> Result<R> {
        let mut state = self.state.write().map_err(poison_err)?;
        let entry = state
            .messages
            .get_mut(&message.message_id)
            .ok_or_else(|| Error::LeaseLost {
                message_id: message.message_id.clone(),
            })?;
        Self::check_receipt(entry, message)?;
        Ok(apply(entry))
    }
}

#[async_trait]
impl QueueTransport for InMemoryQueue {
    async fn publish(&self, payload: &str) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let seq = state.next_seq;
        state.next_seq += 1;
        state.messages.insert(
            Ulid::new().to_string(),
            MessageState {
                payload: payload.to_string(),
                attempt: 0,
                seq,
                slot: Slot::Ready,
            },
        );
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<LeasedMessage>> {
        let now = Utc::now();
        let mut state = self.state.write().map_err(poison_err)?;

        // Expired leases become visible again before anything is handed out.
        for entry in state.messages.values_mut() {
            if matches!(&entry.slot, Slot::Leased { deadline, .. } if *deadline <= now) {
                entry.slot = Slot::Ready;
            }
        }

        let mut ready: Vec<(u64, String)> = state
            .messages
            .iter()
            .filter(|(_, entry)| entry.slot == Slot::Ready)
            .map(|(id, entry)| (entry.seq, id.clone()))
            .collect();
        ready.sort_unstable();

        let deadline = now + to_chrono(visibility);
        let mut leased = Vec::new();
        for (_, message_id) in ready.into_iter().take(max_messages) {
            let entry = state
                .messages
                .get_mut(&message_id)
                .ok_or_else(|| Error::transport("ready message vanished"))?;
            let receipt = Ulid::new().to_string();
            entry.attempt += 1;
            entry.slot = Slot::Leased {
                receipt: receipt.clone(),
                deadline,
            };
            leased.push(LeasedMessage {
                message_id,
                receipt,
                payload: entry.payload.clone(),
                attempt: entry.attempt,
                lease_deadline: deadline,
            });
        }
        Ok(leased)
    }

    async fn renew(&self, message: &LeasedMessage, extension: Duration) -> Result<()> {
        let deadline = Utc::now() + to_chrono(extension);
        self.with_leased(message, |entry| {
            entry.slot = Slot::Leased {
                receipt: message.receipt.clone(),
                deadline,
            };
        })
    }

    async fn ack(&self, message: &LeasedMessage) -> Result<()> {
        {
            let mut state = self.state.write().map_err(poison_err)?;
            let entry = state
                .messages
                .get(&message.message_id)
                .ok_or_else(|| Error::LeaseLost {
                    message_id: message.message_id.clone(),
                })?;
            Self::check_receipt(entry, message)?;
            state.messages.remove(&message.message_id);
        }
        Ok(())
    }

    async fn fail(&self, message: &LeasedMessage) -> Result<()> {
        self.with_leased(message, |entry| {
            entry.slot = Slot::Ready;
        })
    }

    async fn dead_letter(&self, message: &LeasedMessage) -> Result<()> {
        self.with_leased(message, |entry| {
            entry.slot = Slot::Dead;
        })
    }

    async fn redrive(&self, reset_attempts: bool) -> Result<usize> {
        let mut state = self.state.write().map_err(poison_err)?;
        let mut moved = 0;
        for entry in state.messages.values_mut() {
            if entry.slot == Slot::Dead {
                entry.slot = Slot::Ready;
                if reset_attempts {
                    entry.attempt = 0;
                }
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let now = Utc::now();
        let state = self.state.read().map_err(poison_err)?;
        let mut depth = QueueDepth::default();
        for entry in state.messages.values() {
            match &entry.slot {
                Slot::Ready => depth.ready += 1,
                // An expired lease is logically ready; it just has not
                // been reclaimed by a receive yet.
                Slot::Leased { deadline, .. } if *deadline <= now => depth.ready += 1,
                Slot::Leased { .. } => depth.leased += 1,
                Slot::Dead => depth.dead += 1,
            }
        }
        Ok(depth)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VIS: Duration = Duration::from_millis(80);

    async fn receive_one(queue: &InMemoryQueue, visibility: Duration) -> Option<LeasedMessage> {
        queue
            .receive(1, visibility)
            .await
            .expect("receive")
            .into_iter()
            .next()
    }

    #[tokio::test]
    async fn publish_receive_ack_removes_permanently() {
        let queue = InMemoryQueue::new("test");
        queue.publish("2016--P1Y/x+000/y+000").await.unwrap();

        let msg = receive_one(&queue, VIS).await.expect("message ready");
        assert_eq!(msg.payload, "2016--P1Y/x+000/y+000");
        assert_eq!(msg.attempt, 1);
        queue.ack(&msg).await.unwrap();

        tokio::time::sleep(VIS * 2).await;
        assert!(receive_one(&queue, VIS).await.is_none());
        assert!(queue.depth().await.unwrap().is_drained());
    }

    #[tokio::test]
    async fn unacked_message_reappears_after_visibility_timeout() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let first = receive_one(&queue, VIS).await.expect("first delivery");
        // Invisible while the lease holds.
        assert!(receive_one(&queue, VIS).await.is_none());

        tokio::time::sleep(VIS * 2).await;
        let second = receive_one(&queue, VIS).await.expect("redelivery");
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.receipt, first.receipt);
    }

    #[tokio::test]
    async fn stale_receipt_is_lease_lost() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let first = receive_one(&queue, VIS).await.unwrap();
        tokio::time::sleep(VIS * 2).await;
        let _second = receive_one(&queue, VIS).await.expect("redelivery");

        assert!(matches!(
            queue.ack(&first).await,
            Err(Error::LeaseLost { .. })
        ));
        assert!(matches!(
            queue.renew(&first, VIS).await,
            Err(Error::LeaseLost { .. })
        ));
        assert!(matches!(
            queue.fail(&first).await,
            Err(Error::LeaseLost { .. })
        ));
    }

    #[tokio::test]
    async fn renewal_keeps_message_invisible() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(VIS / 2).await;
            queue.renew(&msg, VIS).await.unwrap();
            assert!(receive_one(&queue, VIS).await.is_none());
        }
        queue.ack(&msg).await.unwrap();
    }

    #[tokio::test]
    async fn fail_makes_message_immediately_visible() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        queue.fail(&msg).await.unwrap();

        let again = receive_one(&queue, VIS).await.expect("visible again");
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn dead_letter_and_redrive_round_trip() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        queue.dead_letter(&msg).await.unwrap();

        // Dead-lettered messages never come back on their own.
        tokio::time::sleep(VIS * 2).await;
        assert!(receive_one(&queue, VIS).await.is_none());
        assert_eq!(queue.depth().await.unwrap().dead, 1);

        let moved = queue.redrive(true).await.unwrap();
        assert_eq!(moved, 1);
        let redriven = receive_one(&queue, VIS).await.expect("redriven");
        assert_eq!(redriven.payload, "payload");
        assert_eq!(redriven.attempt, 1, "attempt counter reset before delivery");
    }

    #[tokio::test]
    async fn redrive_can_keep_attempt_counts() {
        let queue = InMemoryQueue::new("test");
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        queue.dead_letter(&msg).await.unwrap();

        queue.redrive(false).await.unwrap();
        let redriven = receive_one(&queue, VIS).await.unwrap();
        assert_eq!(redriven.attempt, 2, "delivery count keeps climbing");
    }

    #[tokio::test]
    async fn receive_hands_out_oldest_first() {
        let queue = InMemoryQueue::new("test");
        for payload in ["a", "b", "c"] {
            queue.publish(payload).await.unwrap();
        }
        let batch = queue.receive(10, VIS).await.unwrap();
        let payloads: Vec<&str> = batch.iter().map(|m| m.payload.as_str()).collect();
        assert_eq!(payloads, vec!["a", "b", "c"]);
    }
}
