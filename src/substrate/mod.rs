//! Coordination substrate: the abstraction over the distributed primitives
//! (FIFO queue, priority queue, key/value map, pub/sub topic) plus cluster
//! membership queries and liveness callbacks that every other component is
//! built on.
//!
//! All call sites go through these traits, never against a concrete backend.
//! [`local::LocalCluster`] provides the in-process implementation; a real
//! clustering library can be slotted in behind the same interface.

pub mod local;

use std::collections::BTreeSet;
use std::future::Future;

use crate::error::Result;

pub use local::{LocalCluster, LocalSubstrate};

/// Opaque handle returned by listener registration, used for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Callback invoked on connection-state changes. The boolean is `true` on
/// the very first successful connection and `false` on every reconnection
/// after a drop, so callers can distinguish first-time initialization from
/// re-registration of listeners lost during the outage.
pub type ConnectionStateCallback = Box<dyn Fn(bool) + Send + Sync>;

/// Callback invoked with the short name of a client that disconnected.
/// Only meaningful on core (data member) nodes.
pub type ClientDisconnectionCallback = Box<dyn Fn(&str) + Send + Sync>;

/// Bounds every value stored in a distributed collection must satisfy.
pub trait Item: Clone + Send + Sync + 'static {}
impl<T: Clone + Send + Sync + 'static> Item for T {}

/// A cluster-shared blocking queue. For priority queues the ordering is
/// fixed at creation time by the item's `Ord`, not per call.
pub trait DistributedQueue<T: Item>: Clone + Send + Sync + 'static {
    /// Insert an item. Fails fast with `NotConnected` on a disconnected handle.
    fn offer(&self, item: T) -> impl Future<Output = Result<()>> + Send;

    /// Remove and return the head, waiting until one is available. This is
    /// the ownership-transfer point for job dispatch.
    fn take(&self) -> impl Future<Output = Result<T>> + Send;

    /// Remove and return the head if one is present, without waiting.
    fn poll(&self) -> impl Future<Output = Result<Option<T>>> + Send;

    fn len(&self) -> impl Future<Output = Result<usize>> + Send;

    fn is_empty(&self) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.len().await? == 0) }
    }
}

/// A cluster-shared key/value map. `compute` is the only primitive strong
/// enough for atomic claim and atomic append; components never
/// read-modify-write around it.
pub trait DistributedMap<K, V>: Clone + Send + Sync + 'static
where
    K: Item + Eq + std::hash::Hash + Ord,
    V: Item,
{
    fn get(&self, key: &K) -> impl Future<Output = Result<Option<V>>> + Send;

    fn put(&self, key: K, value: V) -> impl Future<Output = Result<Option<V>>> + Send;

    fn remove(&self, key: &K) -> impl Future<Output = Result<Option<V>>> + Send;

    /// Atomically replace the value at `key` with `f(current)`. Returning
    /// `None` from `f` removes the entry. The new value is returned.
    fn compute<F>(&self, key: K, f: F) -> impl Future<Output = Result<Option<V>>> + Send
    where
        F: FnOnce(Option<V>) -> Option<V> + Send;

    fn keys(&self) -> impl Future<Output = Result<Vec<K>>> + Send;

    fn len(&self) -> impl Future<Output = Result<usize>> + Send;

    fn is_empty(&self) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.len().await? == 0) }
    }
}

/// A cluster-wide broadcast topic. Every subscriber observes every message
/// published after it subscribed.
pub trait DistributedTopic<T: Item>: Clone + Send + Sync + 'static {
    type Subscription: TopicSubscription<T>;

    fn publish(&self, message: T) -> impl Future<Output = Result<()>> + Send;

    fn subscribe(&self) -> Result<Self::Subscription>;
}

pub trait TopicSubscription<T: Item>: Send + 'static {
    /// Receive the next message, waiting until one arrives. Returns `None`
    /// once the topic is gone (cluster shut down).
    fn recv(&mut self) -> impl Future<Output = Option<T>> + Send;
}

/// The substrate contract. Named collections are stable and unique per
/// cluster; asking for the same name twice yields handles onto the same
/// underlying collection.
pub trait Substrate: Clone + Send + Sync + 'static {
    type Queue<T: Item>: DistributedQueue<T>;
    type PriorityQueue<T: Item + Ord>: DistributedQueue<T>;
    type Map<K: Item + Eq + std::hash::Hash + Ord, V: Item>: DistributedMap<K, V>;
    type Topic<T: Item>: DistributedTopic<T>;

    /// A FIFO queue shared cluster-wide.
    fn queue<T: Item>(&self, name: &str) -> Self::Queue<T>;

    /// A priority-ordered queue; ordering comes from `T: Ord` and is fixed
    /// at creation time.
    fn priority_queue<T: Item + Ord>(&self, name: &str) -> Self::PriorityQueue<T>;

    fn map<K: Item + Eq + std::hash::Hash + Ord, V: Item>(&self, name: &str) -> Self::Map<K, V>;

    fn topic<T: Item>(&self, name: &str) -> Self::Topic<T>;

    /// True for any member that has joined the cluster, whether or not its
    /// client handshake has completed.
    fn is_instance_running(&self) -> bool;

    /// True only once this handle has completed its handshake with at least
    /// one member. An agent may be "running" before it is usable.
    fn is_connected_to_cluster(&self) -> bool;

    fn local_member_address(&self) -> String;

    /// Addresses of all current cluster members. Never null: an empty set
    /// when disconnected.
    fn cluster_member_addresses(&self) -> BTreeSet<String>;

    /// True when no data member (core node) is currently reachable.
    fn no_data_member_available(&self) -> bool;

    /// Short names of connected clients. Meaningful on core nodes only;
    /// always empty on agents.
    fn connected_client_names(&self) -> BTreeSet<String>;

    fn add_connection_state_listener(&self, callback: ConnectionStateCallback) -> ListenerId;

    /// Idempotent: returns `true` the first time a registered id is removed
    /// and `false` thereafter.
    fn remove_connection_state_listener(&self, id: ListenerId) -> bool;

    /// Core-node only. Returns `None` on nodes where client disconnection
    /// tracking is unsupported (agents); callers must tolerate that.
    fn add_client_disconnection_listener(
        &self,
        callback: ClientDisconnectionCallback,
    ) -> Option<ListenerId>;

    fn remove_client_disconnection_listener(&self, id: ListenerId) -> bool;
}
