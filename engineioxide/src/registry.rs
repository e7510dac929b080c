//! Process-wide map of active session ids to sockets.

use std::sync::Arc;

use dashmap::DashMap;

use crate::sid::Sid;
use crate::socket::Socket;

/// Not a singleton: created explicitly and handed to the dispatcher, so
/// tests may instantiate several independent registries.
///
/// Backed by [`DashMap`], which shards its internal locking by key -- insert
/// and lookup on a given `Sid` are linearizable with respect to each other,
/// while distinct sessions never contend on the same shard lock.
pub struct Registry<Data>(DashMap<Sid, Arc<Socket<Data>>>);

impl<Data> Registry<Data> {
    pub fn new() -> Self {
        Registry(DashMap::new())
    }

    pub fn insert(&self, socket: Arc<Socket<Data>>) {
        self.0.insert(socket.id.clone(), socket);
    }

    pub fn get(&self, sid: &Sid) -> Option<Arc<Socket<Data>>> {
        self.0.get(sid).map(|entry| Arc::clone(entry.value()))
    }

    /// Idempotent: removing an id that is not present is a no-op.
    pub fn remove(&self, sid: &Sid) {
        self.0.remove(sid);
    }

    pub fn sockets(&self) -> Vec<Arc<Socket<Data>>> {
        self.0.iter().map(|entry| Arc::clone(entry.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<Data> Default for Registry<Data> {
    fn default() -> Self {
        Self::new()
    }
}
