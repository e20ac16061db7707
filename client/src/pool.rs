//! Connection pool book-keeping.
use std::collections::{HashMap, HashSet};

use tumbaga_common::server::ServerId;

use crate::interface::Conn;

/// Tracks every server the coordinator has an opinion about: a dial in
/// flight (*pending*), a live connection (*connected*), or a failed one
/// (*disconnected*). A server is in at most one set at a time.
///
/// Pending dials keep their handle so that a pool restart can stop
/// in-flight attempts along with established connections.
#[derive(Default)]
pub struct Pool {
    pending: HashMap<ServerId, Conn>,
    connected: HashMap<ServerId, Conn>,
    disconnected: HashSet<ServerId>,
}

impl Pool {
    /// Servers with a live connection.
    pub fn connected(&self) -> &HashMap<ServerId, Conn> {
        &self.connected
    }

    /// Servers with a dial in flight.
    pub fn pending(&self) -> &HashMap<ServerId, Conn> {
        &self.pending
    }

    /// Servers that failed and are excluded from random picks.
    pub fn disconnected(&self) -> &HashSet<ServerId> {
        &self.disconnected
    }

    /// Track a dial in flight. Dialing a previously failed server is a
    /// deliberate retry, so the server leaves the disconnected set.
    pub fn dialed(&mut self, id: ServerId, conn: Conn) {
        self.disconnected.remove(&id);
        self.pending.insert(id, conn);
    }

    /// Classify a server as connected.
    pub fn admit(&mut self, id: ServerId, conn: Conn) {
        self.pending.remove(&id);
        self.disconnected.remove(&id);
        self.connected.insert(id, conn);
    }

    /// Classify a server as disconnected.
    pub fn retire(&mut self, id: &ServerId) {
        self.pending.remove(id);
        self.connected.remove(id);
        self.disconnected.insert(id.clone());
    }

    /// Forget past failures, making every server eligible again.
    pub fn clear_disconnected(&mut self) {
        self.disconnected.clear();
    }

    /// Whether the pool holds an opinion about this server.
    pub fn is_tracked(&self, id: &ServerId) -> bool {
        self.pending.contains_key(id)
            || self.connected.contains_key(id)
            || self.disconnected.contains(id)
    }

    /// Every held connection handle, in flight or established.
    pub fn handles(&self) -> impl Iterator<Item = &Conn> {
        self.pending.values().chain(self.connected.values())
    }
}
