//! In-process substrate implementation.
//!
//! A [`LocalCluster`] is the shared backbone: named collections, the member
//! and client rosters, and the client-disconnection listener table. Each
//! process-local node holds a [`LocalSubstrate`] handle onto it, created via
//! [`LocalCluster::member`] (core node, data member) or
//! [`LocalCluster::client`] (build agent). Handles start out running but not
//! connected; [`LocalSubstrate::connect`] completes the handshake, and
//! [`LocalSubstrate::disconnect`] simulates a drop (firing the
//! client-disconnection listeners on core nodes when a client goes away).

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tokio::sync::Notify;

use crate::error::{HiveError, Result};
use crate::substrate::{
    ClientDisconnectionCallback, ConnectionStateCallback, DistributedMap, DistributedQueue,
    DistributedTopic, Item, ListenerId, Substrate, TopicSubscription,
};

const TOPIC_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeKind {
    DataMember,
    Client,
}

struct ClusterInner {
    collections: Mutex<HashMap<(String, TypeId), Box<dyn Any + Send + Sync>>>,
    members: Mutex<BTreeSet<String>>,
    clients: Mutex<BTreeSet<String>>,
    disconnection_listeners: Mutex<HashMap<u64, ClientDisconnectionCallback>>,
    next_listener_id: AtomicU64,
}

/// The shared in-process cluster backbone.
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<ClusterInner>,
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                collections: Mutex::new(HashMap::new()),
                members: Mutex::new(BTreeSet::new()),
                clients: Mutex::new(BTreeSet::new()),
                disconnection_listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
            }),
        }
    }

    /// Create a data-member (core node) handle. Not yet connected.
    pub fn member(&self, address: impl Into<String>) -> LocalSubstrate {
        LocalSubstrate::new(self.inner.clone(), address.into(), NodeKind::DataMember)
    }

    /// Create a client (build agent) handle. Not yet connected.
    pub fn client(&self, name: impl Into<String>) -> LocalSubstrate {
        LocalSubstrate::new(self.inner.clone(), name.into(), NodeKind::Client)
    }

    /// Fetch or create the shared backing store for a named collection.
    /// The same (name, type) pair always yields the same store.
    fn shared<C: Any + Send + Sync + Clone>(&self, name: &str, make: impl FnOnce() -> C) -> C {
        let key = (name.to_string(), TypeId::of::<C>());
        let mut collections = self
            .inner
            .collections
            .lock()
            .expect("collection registry lock poisoned");
        if let Some(existing) = collections.get(&key).and_then(|c| c.downcast_ref::<C>()) {
            return existing.clone();
        }
        let created = make();
        collections.insert(key, Box::new(created.clone()));
        created
    }
}

struct HandleState {
    cluster: Arc<ClusterInner>,
    name: String,
    kind: NodeKind,
    running: AtomicBool,
    connected: AtomicBool,
    ever_connected: AtomicBool,
    connection_listeners: Mutex<HashMap<u64, ConnectionStateCallback>>,
}

/// One node's view of the cluster.
#[derive(Clone)]
pub struct LocalSubstrate {
    cluster: LocalCluster,
    state: Arc<HandleState>,
}

impl LocalSubstrate {
    fn new(cluster: Arc<ClusterInner>, name: String, kind: NodeKind) -> Self {
        Self {
            cluster: LocalCluster {
                inner: cluster.clone(),
            },
            state: Arc::new(HandleState {
                cluster,
                name,
                kind,
                running: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                ever_connected: AtomicBool::new(false),
                connection_listeners: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Complete the handshake and join the cluster. Fires connection-state
    /// listeners with `true` on the first connection and `false` on every
    /// reconnection after a drop.
    pub fn connect(&self) {
        if self.state.connected.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.state.kind {
            NodeKind::DataMember => {
                self.state
                    .cluster
                    .members
                    .lock()
                    .expect("member roster lock poisoned")
                    .insert(self.state.name.clone());
            }
            NodeKind::Client => {
                self.state
                    .cluster
                    .clients
                    .lock()
                    .expect("client roster lock poisoned")
                    .insert(self.state.name.clone());
            }
        }
        let first = !self.state.ever_connected.swap(true, Ordering::SeqCst);
        let listeners = self
            .state
            .connection_listeners
            .lock()
            .expect("connection listener lock poisoned");
        for callback in listeners.values() {
            callback(first);
        }
        tracing::debug!(node = %self.state.name, first, "Node connected to cluster");
    }

    /// Drop off the cluster. For clients this fires every registered
    /// client-disconnection listener with the client's short name, which is
    /// the sole trigger for orphaned-job recovery.
    pub fn disconnect(&self) {
        if !self.state.connected.swap(false, Ordering::SeqCst) {
            return;
        }
        match self.state.kind {
            NodeKind::DataMember => {
                self.state
                    .cluster
                    .members
                    .lock()
                    .expect("member roster lock poisoned")
                    .remove(&self.state.name);
            }
            NodeKind::Client => {
                self.state
                    .cluster
                    .clients
                    .lock()
                    .expect("client roster lock poisoned")
                    .remove(&self.state.name);
                let listeners = self
                    .state
                    .cluster
                    .disconnection_listeners
                    .lock()
                    .expect("disconnection listener lock poisoned");
                for callback in listeners.values() {
                    callback(&self.state.name);
                }
            }
        }
        tracing::debug!(node = %self.state.name, "Node disconnected from cluster");
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.state.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HiveError::NotConnected)
        }
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

struct FifoShared<T> {
    items: Mutex<VecDeque<T>>,
    available: Notify,
}

/// FIFO queue handle.
pub struct LocalQueue<T> {
    shared: Arc<FifoShared<T>>,
    node: LocalSubstrate,
}

impl<T> Clone for LocalQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            node: self.node.clone(),
        }
    }
}

impl<T: Item> DistributedQueue<T> for LocalQueue<T> {
    async fn offer(&self, item: T) -> Result<()> {
        self.node.ensure_connected()?;
        self.shared
            .items
            .lock()
            .expect("queue lock poisoned")
            .push_back(item);
        self.shared.available.notify_one();
        Ok(())
    }

    async fn take(&self) -> Result<T> {
        loop {
            self.node.ensure_connected()?;
            // Register for wakeup before checking, so an offer racing with
            // the check cannot be missed.
            let notified = self.shared.available.notified();
            if let Some(item) = self
                .shared
                .items
                .lock()
                .expect("queue lock poisoned")
                .pop_front()
            {
                return Ok(item);
            }
            notified.await;
        }
    }

    async fn poll(&self) -> Result<Option<T>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .items
            .lock()
            .expect("queue lock poisoned")
            .pop_front())
    }

    async fn len(&self) -> Result<usize> {
        self.node.ensure_connected()?;
        Ok(self.shared.items.lock().expect("queue lock poisoned").len())
    }
}

// ---------------------------------------------------------------------------
// Priority queue
// ---------------------------------------------------------------------------

struct PriorityShared<T> {
    items: Mutex<BinaryHeap<T>>,
    available: Notify,
}

/// Priority queue handle; ordering is the item's `Ord`, greatest first,
/// fixed at creation time.
pub struct LocalPriorityQueue<T: Ord> {
    shared: Arc<PriorityShared<T>>,
    node: LocalSubstrate,
}

impl<T: Ord> Clone for LocalPriorityQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            node: self.node.clone(),
        }
    }
}

impl<T: Item + Ord> DistributedQueue<T> for LocalPriorityQueue<T> {
    async fn offer(&self, item: T) -> Result<()> {
        self.node.ensure_connected()?;
        self.shared
            .items
            .lock()
            .expect("priority queue lock poisoned")
            .push(item);
        self.shared.available.notify_one();
        Ok(())
    }

    async fn take(&self) -> Result<T> {
        loop {
            self.node.ensure_connected()?;
            let notified = self.shared.available.notified();
            if let Some(item) = self
                .shared
                .items
                .lock()
                .expect("priority queue lock poisoned")
                .pop()
            {
                return Ok(item);
            }
            notified.await;
        }
    }

    async fn poll(&self) -> Result<Option<T>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .items
            .lock()
            .expect("priority queue lock poisoned")
            .pop())
    }

    async fn len(&self) -> Result<usize> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .items
            .lock()
            .expect("priority queue lock poisoned")
            .len())
    }
}

// ---------------------------------------------------------------------------
// Map
// ---------------------------------------------------------------------------

struct MapShared<K, V> {
    entries: Mutex<HashMap<K, V>>,
}

/// Key/value map handle.
pub struct LocalMap<K, V> {
    shared: Arc<MapShared<K, V>>,
    node: LocalSubstrate,
}

impl<K, V> Clone for LocalMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            node: self.node.clone(),
        }
    }
}

impl<K, V> DistributedMap<K, V> for LocalMap<K, V>
where
    K: Item + Eq + std::hash::Hash + Ord,
    V: Item,
{
    async fn get(&self, key: &K) -> Result<Option<V>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .entries
            .lock()
            .expect("map lock poisoned")
            .get(key)
            .cloned())
    }

    async fn put(&self, key: K, value: V) -> Result<Option<V>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .entries
            .lock()
            .expect("map lock poisoned")
            .insert(key, value))
    }

    async fn remove(&self, key: &K) -> Result<Option<V>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .entries
            .lock()
            .expect("map lock poisoned")
            .remove(key))
    }

    async fn compute<F>(&self, key: K, f: F) -> Result<Option<V>>
    where
        F: FnOnce(Option<V>) -> Option<V> + Send,
    {
        self.node.ensure_connected()?;
        let mut entries = self.shared.entries.lock().expect("map lock poisoned");
        let current = entries.remove(&key);
        let next = f(current);
        if let Some(value) = next.clone() {
            entries.insert(key, value);
        }
        Ok(next)
    }

    async fn keys(&self) -> Result<Vec<K>> {
        self.node.ensure_connected()?;
        Ok(self
            .shared
            .entries
            .lock()
            .expect("map lock poisoned")
            .keys()
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        self.node.ensure_connected()?;
        Ok(self.shared.entries.lock().expect("map lock poisoned").len())
    }
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

/// Pub/sub topic handle over a broadcast channel.
pub struct LocalTopic<T> {
    sender: broadcast::Sender<T>,
    node: LocalSubstrate,
}

impl<T> Clone for LocalTopic<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            node: self.node.clone(),
        }
    }
}

pub struct LocalSubscription<T> {
    receiver: broadcast::Receiver<T>,
}

impl<T: Item> TopicSubscription<T> for LocalSubscription<T> {
    async fn recv(&mut self) -> Option<T> {
        loop {
            match self.receiver.recv().await {
                Ok(message) => return Some(message),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Topic subscriber lagged, messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl<T: Item> DistributedTopic<T> for LocalTopic<T> {
    type Subscription = LocalSubscription<T>;

    async fn publish(&self, message: T) -> Result<()> {
        self.node.ensure_connected()?;
        // A send error only means there are no subscribers right now.
        let _ = self.sender.send(message);
        Ok(())
    }

    fn subscribe(&self) -> Result<Self::Subscription> {
        self.node.ensure_connected()?;
        Ok(LocalSubscription {
            receiver: self.sender.subscribe(),
        })
    }
}

// ---------------------------------------------------------------------------
// Substrate impl
// ---------------------------------------------------------------------------

impl Substrate for LocalSubstrate {
    type Queue<T: Item> = LocalQueue<T>;
    type PriorityQueue<T: Item + Ord> = LocalPriorityQueue<T>;
    type Map<K: Item + Eq + std::hash::Hash + Ord, V: Item> = LocalMap<K, V>;
    type Topic<T: Item> = LocalTopic<T>;

    fn queue<T: Item>(&self, name: &str) -> LocalQueue<T> {
        let shared = self.cluster.shared(name, || {
            Arc::new(FifoShared {
                items: Mutex::new(VecDeque::new()),
                available: Notify::new(),
            })
        });
        LocalQueue {
            shared,
            node: self.clone(),
        }
    }

    fn priority_queue<T: Item + Ord>(&self, name: &str) -> LocalPriorityQueue<T> {
        let shared = self.cluster.shared(name, || {
            Arc::new(PriorityShared {
                items: Mutex::new(BinaryHeap::new()),
                available: Notify::new(),
            })
        });
        LocalPriorityQueue {
            shared,
            node: self.clone(),
        }
    }

    fn map<K: Item + Eq + std::hash::Hash + Ord, V: Item>(&self, name: &str) -> LocalMap<K, V> {
        let shared = self.cluster.shared(name, || {
            Arc::new(MapShared {
                entries: Mutex::new(HashMap::new()),
            })
        });
        LocalMap {
            shared,
            node: self.clone(),
        }
    }

    fn topic<T: Item>(&self, name: &str) -> LocalTopic<T> {
        let sender = self
            .cluster
            .shared(name, || broadcast::Sender::<T>::new(TOPIC_CAPACITY));
        LocalTopic {
            sender,
            node: self.clone(),
        }
    }

    fn is_instance_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    fn is_connected_to_cluster(&self) -> bool {
        self.state.connected.load(Ordering::SeqCst)
    }

    fn local_member_address(&self) -> String {
        self.state.name.clone()
    }

    fn cluster_member_addresses(&self) -> BTreeSet<String> {
        if !self.is_connected_to_cluster() {
            return BTreeSet::new();
        }
        self.state
            .cluster
            .members
            .lock()
            .expect("member roster lock poisoned")
            .clone()
    }

    fn no_data_member_available(&self) -> bool {
        self.cluster_member_addresses().is_empty()
    }

    fn connected_client_names(&self) -> BTreeSet<String> {
        if self.state.kind == NodeKind::Client || !self.is_connected_to_cluster() {
            return BTreeSet::new();
        }
        self.state
            .cluster
            .clients
            .lock()
            .expect("client roster lock poisoned")
            .clone()
    }

    fn add_connection_state_listener(&self, callback: ConnectionStateCallback) -> ListenerId {
        let id = self
            .state
            .cluster
            .next_listener_id
            .fetch_add(1, Ordering::SeqCst);
        self.state
            .connection_listeners
            .lock()
            .expect("connection listener lock poisoned")
            .insert(id, callback);
        ListenerId(id)
    }

    fn remove_connection_state_listener(&self, id: ListenerId) -> bool {
        self.state
            .connection_listeners
            .lock()
            .expect("connection listener lock poisoned")
            .remove(&id.0)
            .is_some()
    }

    fn add_client_disconnection_listener(
        &self,
        callback: ClientDisconnectionCallback,
    ) -> Option<ListenerId> {
        if self.state.kind == NodeKind::Client {
            return None;
        }
        let id = self
            .state
            .cluster
            .next_listener_id
            .fetch_add(1, Ordering::SeqCst);
        self.state
            .cluster
            .disconnection_listeners
            .lock()
            .expect("disconnection listener lock poisoned")
            .insert(id, callback);
        Some(ListenerId(id))
    }

    fn remove_client_disconnection_listener(&self, id: ListenerId) -> bool {
        self.state
            .cluster
            .disconnection_listeners
            .lock()
            .expect("disconnection listener lock poisoned")
            .remove(&id.0)
            .is_some()
    }
}
