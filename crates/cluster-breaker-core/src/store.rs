//! Interfaces of the shared stores and the notification bus.
//!
//! The traits mirror the primitives of a hash-oriented key-value server with
//! pub/sub: per-field atomic increment, field get/delete, a batch that is
//! submitted as a single unit, and channel subscriptions. Implementations
//! must make [`CounterStore::increment_field`] atomic across every node;
//! callers never perform read-modify-write sequences on their own.

use crate::CoordinationError;
use futures::stream::BoxStream;
use std::future::Future;

/// A message delivered on a subscribed channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message was published on.
    pub channel: String,
    /// Raw payload.
    pub payload: String,
}

/// A live subscription. Dropping it unsubscribes.
pub type Subscription = BoxStream<'static, Message>;

/// One operation of a [`WriteBatch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Set `field` of hash `key` to `value`.
    SetField {
        key: String,
        field: String,
        value: String,
    },
    /// Remove `field` from hash `key`.
    DeleteField { key: String, field: String },
    /// Publish `payload` on `channel`.
    Publish { channel: String, payload: String },
}

/// Operations submitted together, in order, as one unit.
///
/// The writer observes the batch as a single submission. Readers on other
/// nodes may still observe the individual effects (a field write and a
/// published message) as separate events.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a field write.
    pub fn set_field(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.ops.push(WriteOp::SetField {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    /// Queues a field deletion.
    pub fn delete_field(mut self, key: impl Into<String>, field: impl Into<String>) -> Self {
        self.ops.push(WriteOp::DeleteField {
            key: key.into(),
            field: field.into(),
        });
        self
    }

    /// Queues a publish.
    pub fn publish(mut self, channel: impl Into<String>, payload: impl Into<String>) -> Self {
        self.ops.push(WriteOp::Publish {
            channel: channel.into(),
            payload: payload.into(),
        });
        self
    }

    /// Queued operations, in submission order.
    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    /// Consumes the batch.
    pub fn into_ops(self) -> Vec<WriteOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Shared failure counters.
pub trait CounterStore: Send + Sync + 'static {
    /// Atomically adds `by` to `field` of hash `key` and returns the new value.
    /// A missing field counts as zero.
    fn increment_field(
        &self,
        key: &str,
        field: &str,
        by: i64,
    ) -> impl Future<Output = Result<i64, CoordinationError>> + Send;

    /// Removes `field` from hash `key`. Returns whether it existed.
    fn delete_field(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<bool, CoordinationError>> + Send;
}

/// Shared canonical states.
pub trait StateStore: Send + Sync + 'static {
    /// Reads `field` of hash `key`.
    fn get_field(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>, CoordinationError>> + Send;

    /// Submits every operation of `batch` as one unit.
    fn commit(&self, batch: WriteBatch) -> impl Future<Output = Result<(), CoordinationError>> + Send;
}

/// Publish/subscribe channel.
pub trait NotificationBus: Send + Sync + 'static {
    /// Publishes `payload` on `channel`; returns the number of receivers.
    fn publish(
        &self,
        channel: &str,
        payload: String,
    ) -> impl Future<Output = Result<usize, CoordinationError>> + Send;

    /// Subscribes to `channel`. Messages published after this resolves are
    /// delivered on the returned stream.
    fn subscribe(
        &self,
        channel: &str,
    ) -> impl Future<Output = Result<Subscription, CoordinationError>> + Send;
}

/// Everything a distributed circuit needs from the coordination layer.
pub trait CoordinationBackend: CounterStore + StateStore + NotificationBus {}

impl<T> CoordinationBackend for T where T: CounterStore + StateStore + NotificationBus {}
