//! Coordination primitives for cluster-coherent circuit breakers.
//!
//! This crate holds what every node of a gateway cluster has to agree on:
//! - Interfaces of the shared counter store, shared state store and
//!   notification bus ([`CounterStore`], [`StateStore`], [`NotificationBus`])
//! - Key and channel naming ([`Keyspace`])
//! - The notification payload format ([`Notification`])
//! - An in-process backend ([`MemoryBackend`])
//! - The event listener plumbing used for observability

pub mod events;
pub mod keyspace;
pub mod memory;
pub mod store;
pub mod wire;

mod error;

pub use error::CoordinationError;
pub use events::{ClusterEvent, EventListener, EventListeners, FnListener};
pub use keyspace::Keyspace;
pub use memory::{Fault, MemoryBackend};
pub use store::{
    CoordinationBackend, CounterStore, Message, NotificationBus, StateStore, Subscription,
    WriteBatch, WriteOp,
};
pub use wire::{Notification, SharedState};
