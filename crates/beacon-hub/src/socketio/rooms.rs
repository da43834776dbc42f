//! Room index: user/session/machine rooms, the RPC method registry, and
//! the table of live connections.
//!
//! One writer lock guards every map. Broadcasters take the read lock only
//! long enough to snapshot a member list; socket writes happen outside.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::connection::{ClientType, Connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    User,
    Session,
    Machine,
}

type Room = HashMap<u64, Arc<Connection>>;

#[derive(Default)]
struct Rooms {
    users: HashMap<String, Room>,
    sessions: HashMap<String, Room>,
    machines: HashMap<String, Room>,
    rpc_by_method: HashMap<String, Arc<Connection>>,
    conns: HashMap<u64, Arc<Connection>>,
}

impl Rooms {
    fn map_mut(&mut self, kind: RoomKind) -> &mut HashMap<String, Room> {
        match kind {
            RoomKind::User => &mut self.users,
            RoomKind::Session => &mut self.sessions,
            RoomKind::Machine => &mut self.machines,
        }
    }

    fn map(&self, kind: RoomKind) -> &HashMap<String, Room> {
        match kind {
            RoomKind::User => &self.users,
            RoomKind::Session => &self.sessions,
            RoomKind::Machine => &self.machines,
        }
    }

    fn join(&mut self, kind: RoomKind, key: &str, conn: &Arc<Connection>) {
        if key.is_empty() {
            return;
        }
        self.map_mut(kind)
            .entry(key.to_string())
            .or_default()
            .insert(conn.key(), Arc::clone(conn));
    }

    fn leave(&mut self, kind: RoomKind, key: &str, conn: &Connection) {
        let rooms = self.map_mut(kind);
        if let Some(room) = rooms.get_mut(key) {
            room.remove(&conn.key());
            if room.is_empty() {
                rooms.remove(key);
            }
        }
    }
}

#[derive(Default)]
pub struct RoomIndex {
    inner: RwLock<Rooms>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track a freshly opened socket, before any handshake.
    pub fn track(&self, conn: &Arc<Connection>) {
        self.inner
            .write()
            .unwrap()
            .conns
            .insert(conn.key(), Arc::clone(conn));
    }

    /// Join the scope rooms recorded at CONNECT: user room only for
    /// user-scoped clients, session/machine rooms whenever the ids exist.
    pub fn join_scope(&self, conn: &Arc<Connection>) {
        let Some(scope) = conn.scope() else {
            return;
        };
        let mut rooms = self.inner.write().unwrap();
        if scope.client_type == ClientType::UserScoped {
            rooms.join(RoomKind::User, &scope.user_id, conn);
        }
        if let Some(sid) = &scope.session_id {
            rooms.join(RoomKind::Session, sid, conn);
        }
        if let Some(mid) = &scope.machine_id {
            rooms.join(RoomKind::Machine, mid, conn);
        }
    }

    /// Remove the connection from every room and drop every RPC method it
    /// owns. Safe to call repeatedly.
    pub fn unregister(&self, conn: &Connection) {
        let mut rooms = self.inner.write().unwrap();
        rooms.conns.remove(&conn.key());
        if let Some(scope) = conn.scope() {
            if scope.client_type == ClientType::UserScoped {
                rooms.leave(RoomKind::User, &scope.user_id, conn);
            }
            if let Some(sid) = &scope.session_id {
                rooms.leave(RoomKind::Session, sid, conn);
            }
            if let Some(mid) = &scope.machine_id {
                rooms.leave(RoomKind::Machine, mid, conn);
            }
        }
        rooms
            .rpc_by_method
            .retain(|_, owner| owner.key() != conn.key());
    }

    /// Snapshot the union of the given rooms, one entry per connection even
    /// when it is a member of several of them.
    pub fn members_union(&self, targets: &[(RoomKind, &str)]) -> Vec<Arc<Connection>> {
        let rooms = self.inner.read().unwrap();
        let mut seen: HashMap<u64, Arc<Connection>> = HashMap::new();
        for (kind, key) in targets {
            if key.is_empty() {
                continue;
            }
            if let Some(room) = rooms.map(*kind).get(*key) {
                for (k, conn) in room {
                    seen.entry(*k).or_insert_with(|| Arc::clone(conn));
                }
            }
        }
        seen.into_values().collect()
    }

    /// Last-writer-wins method registration.
    pub fn rpc_register(&self, method: &str, conn: &Arc<Connection>) {
        if method.is_empty() {
            return;
        }
        self.inner
            .write()
            .unwrap()
            .rpc_by_method
            .insert(method.to_string(), Arc::clone(conn));
    }

    /// Drop a method only if this connection still owns it.
    pub fn rpc_unregister(&self, method: &str, conn: &Connection) {
        let mut rooms = self.inner.write().unwrap();
        if let Some(owner) = rooms.rpc_by_method.get(method)
            && owner.key() == conn.key()
        {
            rooms.rpc_by_method.remove(method);
        }
    }

    pub fn rpc_owner(&self, method: &str) -> Option<Arc<Connection>> {
        self.inner
            .read()
            .unwrap()
            .rpc_by_method
            .get(method)
            .cloned()
    }

    /// All tracked connections, for graceful shutdown.
    pub fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.inner.read().unwrap().conns.values().cloned().collect()
    }

    #[cfg(test)]
    fn room_size(&self, kind: RoomKind, key: &str) -> usize {
        self.inner
            .read()
            .unwrap()
            .map(kind)
            .get(key)
            .map_or(0, |r| r.len())
    }
}
