//! Directory-backed queue transport.
//!
//! Messages are self-contained JSON files moved between three
//! subdirectories of the queue root:
//!
//! ```text
//! <root>/ready/<id>.json    visible to the next receive
//! <root>/leased/<id>.json   held under a lease (deadline in the file)
//! <root>/dead/<id>.json     dead-letter queue
//! <root>/tmp/               private staging for claims and rewrites
//! ```
//!
//! Atomic `rename` arbitrates every ownership transfer, so many worker
//! processes on a shared filesystem can poll the same queue root without
//! locks: whichever process renames a message file first owns it, and the
//! losers move on. A claim goes `ready -> tmp -> leased` so that a
//! half-written lease file is never visible to the expired-lease
//! reclaimer. Delivery stays at-least-once, same as any transport behind
//! [`QueueTransport`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::{to_chrono, LeasedMessage, QueueDepth, QueueTransport};
use crate::error::{Error, Result};

/// On-disk form of one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageFile {
    message_id: String,
    payload: String,
    attempt: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    receipt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lease_deadline: Option<DateTime<Utc>>,
}

/// Filesystem queue transport for multi-process runs.
#[derive(Debug)]
pub struct FsQueue {
    root: PathBuf,
    name: String,
}

impl FsQueue {
    /// Opens (creating if needed) a queue rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the directory layout cannot be
    /// created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["ready", "leased", "dead", "tmp"] {
            fs::create_dir_all(root.join(sub))
                .map_err(|e| Error::transport_with_source(format!("create queue dir {sub}"), e))?;
        }
        let name = root.display().to_string();
        Ok(Self { root, name })
    }

    fn dir(&self, sub: &str) -> PathBuf {
        self.root.join(sub)
    }

    fn message_path(&self, sub: &str, message_id: &str) -> PathBuf {
        self.dir(sub).join(format!("{message_id}.json"))
    }

    /// Lists message files in a subdirectory, oldest first.
    ///
    /// Message ids are ULIDs, so lexical filename order is publish order.
    fn list(&self, sub: &str) -> Result<Vec<PathBuf>> {
        let dir = self.dir(sub);
        let entries = fs::read_dir(&dir)
            .map_err(|e| Error::transport_with_source(format!("read {}", dir.display()), e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(std::result::Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Reads a message file; `None` if it vanished under us (another
    /// process won a rename race).
    fn read_message(path: &Path) -> Result<Option<MessageFile>> {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let message = serde_json::from_str(&contents).map_err(|e| {
                    Error::transport_with_source(format!("corrupt message file {}", path.display()), e)
                })?;
                Ok(Some(message))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::transport_with_source(
                format!("read {}", path.display()),
                e,
            )),
        }
    }

    /// Writes `message` to a private tmp file and returns its path.
    fn stage(&self, message: &MessageFile) -> Result<PathBuf> {
        let path = self.dir("tmp").join(format!("{}.json", Ulid::new()));
        let contents = serde_json::to_string(message)
            .map_err(|e| Error::transport_with_source("encode message", e))?;
        fs::write(&path, contents)
            .map_err(|e| Error::transport_with_source(format!("write {}", path.display()), e))?;
        Ok(path)
    }

    /// Atomically moves `from` onto `to`; `false` if `from` is gone.
    fn try_rename(from: &Path, to: &Path) -> Result<bool> {
        match fs::rename(from, to) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::transport_with_source(
                format!("rename {} -> {}", from.display(), to.display()),
                e,
            )),
        }
    }

    /// Validates the caller's receipt against the on-disk lease and
    /// returns the lease path plus its current contents.
    fn validate_lease(&self, message: &LeasedMessage) -> Result<(PathBuf, MessageFile)> {
        let path = self.message_path("leased", &message.message_id);
        let on_disk = Self::read_message(&path)?.ok_or_else(|| Error::LeaseLost {
            message_id: message.message_id.clone(),
        })?;
        if on_disk.receipt.as_deref() == Some(message.receipt.as_str()) {
            Ok((path, on_disk))
        } else {
            Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            })
        }
    }

    /// Moves leased messages whose deadline has passed back to `ready/`.
    fn reclaim_expired(&self, now: DateTime<Utc>) -> Result<()> {
        for path in self.list("leased")? {
            let Some(message) = Self::read_message(&path)? else {
                continue;
            };
            let expired = message.lease_deadline.is_none_or(|deadline| deadline <= now);
            if expired {
                // Losing this race just means another process reclaimed it.
                Self::try_rename(&path, &self.message_path("ready", &message.message_id))?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for FsQueue {
    async fn publish(&self, payload: &str) -> Result<()> {
        let message = MessageFile {
            message_id: Ulid::new().to_string(),
            payload: payload.to_string(),
            attempt: 0,
            receipt: None,
            lease_deadline: None,
        };
        let staged = self.stage(&message)?;
        Self::try_rename(&staged, &self.message_path("ready", &message.message_id))?;
        Ok(())
    }

    async fn receive(
        &self,
        max_messages: usize,
        visibility: Duration,
    ) -> Result<Vec<LeasedMessage>> {
        let now = Utc::now();
        self.reclaim_expired(now)?;

        let deadline = now + to_chrono(visibility);
        let mut leased = Vec::new();
        for path in self.list("ready")? {
            if leased.len() >= max_messages {
                break;
            }
            // Claim into tmp/ first so the reclaimer never sees a lease
            // file with a stale deadline still inside.
            let claim = self.dir("tmp").join(format!("claim-{}.json", Ulid::new()));
            if !Self::try_rename(&path, &claim)? {
                continue; // another worker got it
            }
            let Some(mut message) = Self::read_message(&claim)? else {
                continue;
            };
            message.attempt += 1;
            let receipt = Ulid::new().to_string();
            message.receipt = Some(receipt.clone());
            message.lease_deadline = Some(deadline);

            let staged = self.stage(&message)?;
            Self::try_rename(&staged, &self.message_path("leased", &message.message_id))?;
            fs::remove_file(&claim).ok();

            leased.push(LeasedMessage {
                message_id: message.message_id,
                receipt,
                payload: message.payload,
                attempt: message.attempt,
                lease_deadline: deadline,
            });
        }
        Ok(leased)
    }

    async fn renew(&self, message: &LeasedMessage, extension: Duration) -> Result<()> {
        let (path, mut on_disk) = self.validate_lease(message)?;
        on_disk.lease_deadline = Some(Utc::now() + to_chrono(extension));
        let staged = self.stage(&on_disk)?;
        if Self::try_rename(&staged, &path)? {
            Ok(())
        } else {
            Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            })
        }
    }

    async fn ack(&self, message: &LeasedMessage) -> Result<()> {
        let (path, _) = self.validate_lease(message)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            }),
            Err(e) => Err(Error::transport_with_source(
                format!("remove {}", path.display()),
                e,
            )),
        }
    }

    async fn fail(&self, message: &LeasedMessage) -> Result<()> {
        let (path, _) = self.validate_lease(message)?;
        if Self::try_rename(&path, &self.message_path("ready", &message.message_id))? {
            Ok(())
        } else {
            Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            })
        }
    }

    async fn dead_letter(&self, message: &LeasedMessage) -> Result<()> {
        let (path, _) = self.validate_lease(message)?;
        if Self::try_rename(&path, &self.message_path("dead", &message.message_id))? {
            Ok(())
        } else {
            Err(Error::LeaseLost {
                message_id: message.message_id.clone(),
            })
        }
    }

    async fn redrive(&self, reset_attempts: bool) -> Result<usize> {
        let mut moved = 0;
        for path in self.list("dead")? {
            let Some(mut message) = Self::read_message(&path)? else {
                continue;
            };
            if reset_attempts && message.attempt != 0 {
                message.attempt = 0;
                message.receipt = None;
                message.lease_deadline = None;
                // Replace in place first so a crash between the two
                // renames never leaves two copies of the message.
                let staged = self.stage(&message)?;
                if !Self::try_rename(&staged, &path)? {
                    continue;
                }
            }
            if Self::try_rename(&path, &self.message_path("ready", &message.message_id))? {
                moved += 1;
            }
        }
        Ok(moved)
    }

    async fn depth(&self) -> Result<QueueDepth> {
        let now = Utc::now();
        let mut depth = QueueDepth {
            ready: self.list("ready")?.len(),
            leased: 0,
            dead: self.list("dead")?.len(),
        };
        for path in self.list("leased")? {
            let Some(message) = Self::read_message(&path)? else {
                continue;
            };
            if message.lease_deadline.is_some_and(|deadline| deadline > now) {
                depth.leased += 1;
            } else {
                // Expired but not yet reclaimed: logically ready.
                depth.ready += 1;
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

    fn queue() -> (tempfile::TempDir, FsQueue) {
        let dir = tempfile::tempdir().expect("tempdir");
        let queue = FsQueue::open(dir.path().join("queue")).expect("open queue");
        (dir, queue)
    }

    async fn receive_one(queue: &FsQueue, visibility: Duration) -> Option<LeasedMessage> {
        queue
            .receive(1, visibility)
            .await
            .expect("receive")
            .into_iter()
            .next()
    }

    #[tokio::test]
    async fn publish_receive_ack_round_trip() {
        let (_dir, queue) = queue();
        queue.publish("2016--P1Y/x+001/y+002").await.unwrap();

        let msg = receive_one(&queue, VIS).await.expect("message");
        assert_eq!(msg.payload, "2016--P1Y/x+001/y+002");
        assert_eq!(msg.attempt, 1);

        queue.ack(&msg).await.unwrap();
        assert!(queue.depth().await.unwrap().is_drained());
        assert_eq!(queue.depth().await.unwrap().dead, 0);
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed_with_fresh_receipt() {
        let (_dir, queue) = queue();
        queue.publish("payload").await.unwrap();

        let first = receive_one(&queue, VIS).await.unwrap();
        assert!(receive_one(&queue, VIS).await.is_none());

        tokio::time::sleep(VIS * 2).await;
        let second = receive_one(&queue, VIS).await.expect("redelivery");
        assert_eq!(second.message_id, first.message_id);
        assert_eq!(second.attempt, 2);
        assert_ne!(second.receipt, first.receipt);

        // The old receipt no longer works.
        assert!(matches!(
            queue.ack(&first).await,
            Err(Error::LeaseLost { .. })
        ));
        queue.ack(&second).await.unwrap();
    }

    #[tokio::test]
    async fn fail_returns_message_immediately() {
        let (_dir, queue) = queue();
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        queue.fail(&msg).await.unwrap();
        let again = receive_one(&queue, VIS).await.expect("visible now");
        assert_eq!(again.attempt, 2);
    }

    #[tokio::test]
    async fn dead_letter_redrive_preserves_payload() {
        let (_dir, queue) = queue();
        queue.publish("the-payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        queue.dead_letter(&msg).await.unwrap();
        assert_eq!(queue.depth().await.unwrap().dead, 1);
        assert!(receive_one(&queue, VIS).await.is_none());

        assert_eq!(queue.redrive(true).await.unwrap(), 1);
        let redriven = receive_one(&queue, VIS).await.expect("redriven");
        assert_eq!(redriven.payload, "the-payload");
        assert_eq!(redriven.attempt, 1);
    }

    #[tokio::test]
    async fn two_handles_share_one_queue_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("queue");
        let producer = FsQueue::open(&root).unwrap();
        let consumer = FsQueue::open(&root).unwrap();

        producer.publish("a").await.unwrap();
        producer.publish("b").await.unwrap();

        let first = receive_one(&consumer, VIS).await.expect("a");
        let second = receive_one(&producer, VIS).await.expect("b");
        assert_ne!(first.message_id, second.message_id);
        // Both handles see the same leases.
        consumer.ack(&second).await.unwrap();
        consumer.ack(&first).await.unwrap();
        assert!(producer.depth().await.unwrap().is_drained());
    }

    #[tokio::test]
    async fn renewal_extends_the_lease() {
        let (_dir, queue) = queue();
        queue.publish("payload").await.unwrap();

        let msg = receive_one(&queue, VIS).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(VIS / 2).await;
            queue.renew(&msg, VIS).await.unwrap();
            assert!(receive_one(&queue, VIS).await.is_none());
        }
        queue.ack(&msg).await.unwrap();
    }
}
