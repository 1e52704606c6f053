//! Single-process coordination backend.
//!
//! [`MemoryBackend`] implements every coordination trait on top of in-process
//! hashes and tokio broadcast channels. Share it between handlers through an
//! `Arc` to simulate several gateway nodes in one process. It can be told to
//! fail specific operation kinds and, with [`MemoryBackend::with_journal`],
//! records every outbound write and publish, which makes it the backend of
//! choice for tests.

use crate::store::{
    CounterStore, Message, NotificationBus, StateStore, Subscription, WriteBatch, WriteOp,
};
use crate::CoordinationError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Kinds of operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `get_field` returns [`CoordinationError::Unavailable`].
    Reads,
    /// `commit` returns [`CoordinationError::Unavailable`] without applying anything.
    Writes,
    /// `increment_field` and `delete_field` fail.
    Counters,
    /// `subscribe` fails.
    Subscribe,
    /// Direct `publish` fails. Publishes inside a batch follow [`Fault::Writes`].
    Publish,
}

#[derive(Default)]
struct Faults {
    reads: AtomicBool,
    writes: AtomicBool,
    counters: AtomicBool,
    subscribe: AtomicBool,
    publish: AtomicBool,
}

impl Faults {
    fn flag(&self, fault: Fault) -> &AtomicBool {
        match fault {
            Fault::Reads => &self.reads,
            Fault::Writes => &self.writes,
            Fault::Counters => &self.counters,
            Fault::Subscribe => &self.subscribe,
            Fault::Publish => &self.publish,
        }
    }

    fn check(&self, fault: Fault) -> Result<(), CoordinationError> {
        if self.flag(fault).load(Ordering::Acquire) {
            Err(CoordinationError::Unavailable(format!(
                "injected {fault:?} fault"
            )))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct Tables {
    hashes: HashMap<String, HashMap<String, String>>,
    channels: HashMap<String, broadcast::Sender<Message>>,
    journal: Option<Journal>,
}

#[derive(Default)]
struct Journal {
    commits: Vec<WriteBatch>,
    published: Vec<Message>,
}

impl Tables {
    fn publish(&mut self, channel: &str, payload: String) -> usize {
        let message = Message {
            channel: channel.to_string(),
            payload,
        };
        if let Some(journal) = self.journal.as_mut() {
            journal.published.push(message.clone());
        }
        match self.channels.get(channel) {
            Some(sender) => sender.send(message).unwrap_or(0),
            None => 0,
        }
    }
}

/// In-memory hashes plus pub/sub.
pub struct MemoryBackend {
    tables: Mutex<Tables>,
    faults: Faults,
    channel_capacity: usize,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::with_channel_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates an empty backend whose channels buffer at most `capacity`
    /// undelivered messages per subscriber. Slow subscribers skip the excess.
    pub fn with_channel_capacity(capacity: usize) -> Self {
        Self {
            tables: Mutex::new(Tables::default()),
            faults: Faults::default(),
            channel_capacity: capacity.max(1),
        }
    }

    /// Records every committed batch and published message from now on.
    ///
    /// The journal grows with every transition and is never trimmed, so
    /// only enable it where the backend is short-lived, such as tests.
    pub fn with_journal(self) -> Self {
        self.tables().journal.get_or_insert_with(Journal::default);
        self
    }

    /// Turns an injected fault on or off.
    pub fn set_fault(&self, fault: Fault, enabled: bool) {
        self.faults.flag(fault).store(enabled, Ordering::Release);
    }

    /// Reads a field directly, bypassing fault injection.
    pub fn field(&self, key: &str, field: &str) -> Option<String> {
        self.tables()
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field))
            .cloned()
    }

    /// Writes a field directly, bypassing fault injection and the journal.
    pub fn seed_field(&self, key: &str, field: &str, value: &str) {
        self.tables()
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Every batch committed so far, oldest first. Empty unless the journal
    /// is enabled.
    pub fn commits(&self) -> Vec<WriteBatch> {
        self.tables()
            .journal
            .as_ref()
            .map(|journal| journal.commits.clone())
            .unwrap_or_default()
    }

    /// Every message published so far (directly or through a batch). Empty
    /// unless the journal is enabled.
    pub fn published(&self) -> Vec<Message> {
        self.tables()
            .journal
            .as_ref()
            .map(|journal| journal.published.clone())
            .unwrap_or_default()
    }

    /// Forgets recorded commits and publishes. Stored data is kept.
    pub fn clear_journal(&self) {
        if let Some(journal) = self.tables().journal.as_mut() {
            journal.commits.clear();
            journal.published.clear();
        }
    }

    /// Ends every subscription on `channel`, as a server dropping its
    /// subscribers would. Returns whether the channel had been subscribed.
    pub fn close_channel(&self, channel: &str) -> bool {
        self.tables().channels.remove(channel).is_some()
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.tables()
            .channels
            .get(channel)
            .map(broadcast::Sender::receiver_count)
            .unwrap_or(0)
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tables = self.tables();
        f.debug_struct("MemoryBackend")
            .field("hashes", &tables.hashes.len())
            .field("channels", &tables.channels.len())
            .field("journal", &tables.journal.is_some())
            .finish()
    }
}

impl CounterStore for MemoryBackend {
    async fn increment_field(
        &self,
        key: &str,
        field: &str,
        by: i64,
    ) -> Result<i64, CoordinationError> {
        self.faults.check(Fault::Counters)?;

        let mut tables = self.tables();
        let slot = tables
            .hashes
            .entry(key.to_string())
            .or_default()
            .entry(field.to_string())
            .or_insert_with(|| "0".to_string());

        let current: i64 = slot.parse().map_err(|_| CoordinationError::NotAnInteger {
            key: key.to_string(),
            field: field.to_string(),
        })?;
        let next = current.saturating_add(by);
        *slot = next.to_string();
        Ok(next)
    }

    async fn delete_field(&self, key: &str, field: &str) -> Result<bool, CoordinationError> {
        self.faults.check(Fault::Counters)?;

        let mut tables = self.tables();
        Ok(tables
            .hashes
            .get_mut(key)
            .map(|hash| hash.remove(field).is_some())
            .unwrap_or(false))
    }
}

impl StateStore for MemoryBackend {
    async fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, CoordinationError> {
        self.faults.check(Fault::Reads)?;
        Ok(self.field(key, field))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), CoordinationError> {
        self.faults.check(Fault::Writes)?;

        let mut tables = self.tables();
        if let Some(journal) = tables.journal.as_mut() {
            journal.commits.push(batch.clone());
        }
        for op in batch.into_ops() {
            match op {
                WriteOp::SetField { key, field, value } => {
                    tables.hashes.entry(key).or_default().insert(field, value);
                }
                WriteOp::DeleteField { key, field } => {
                    if let Some(hash) = tables.hashes.get_mut(&key) {
                        hash.remove(&field);
                    }
                }
                WriteOp::Publish { channel, payload } => {
                    tables.publish(&channel, payload);
                }
            }
        }
        Ok(())
    }
}

impl NotificationBus for MemoryBackend {
    async fn publish(&self, channel: &str, payload: String) -> Result<usize, CoordinationError> {
        self.faults.check(Fault::Publish)?;
        Ok(self.tables().publish(channel, payload))
    }

    async fn subscribe(&self, channel: &str) -> Result<Subscription, CoordinationError> {
        self.faults.check(Fault::Subscribe)?;

        let receiver = {
            let mut tables = self.tables();
            let capacity = self.channel_capacity;
            tables
                .channels
                .entry(channel.to_string())
                .or_insert_with(|| broadcast::channel(capacity).0)
                .subscribe()
        };

        let stream = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => return Some((message, receiver)),
                    Err(RecvError::Lagged(_skipped)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(skipped = _skipped, "subscriber lagged, messages dropped");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        });

        Ok(Box::pin(stream))
    }
}
