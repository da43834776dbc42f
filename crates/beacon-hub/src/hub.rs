//! The legacy user-feed hub: a plain user-keyed broadcast channel used by
//! the `/ws` endpoint, predating the Socket.IO transport.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc::UnboundedSender;

/// Handle returned by `register`; identifies the membership to drop.
#[derive(Debug, Clone)]
pub struct FeedHandle {
    user_id: String,
    key: u64,
}

#[derive(Default)]
pub struct FeedHub {
    rooms: RwLock<HashMap<String, HashMap<u64, UnboundedSender<String>>>>,
    next_key: AtomicU64,
}

impl FeedHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, user_id: &str, tx: UnboundedSender<String>) -> FeedHandle {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed) + 1;
        self.rooms
            .write()
            .unwrap()
            .entry(user_id.to_string())
            .or_default()
            .insert(key, tx);
        FeedHandle {
            user_id: user_id.to_string(),
            key,
        }
    }

    pub fn unregister(&self, handle: &FeedHandle) {
        let mut rooms = self.rooms.write().unwrap();
        if let Some(room) = rooms.get_mut(&handle.user_id) {
            room.remove(&handle.key);
            if room.is_empty() {
                rooms.remove(&handle.user_id);
            }
        }
    }

    /// Snapshot the user's members under the read lock, write outside it,
    /// and evict peers whose channel is gone.
    pub fn broadcast(&self, user_id: &str, message: &str) {
        let members: Vec<(u64, UnboundedSender<String>)> = {
            let rooms = self.rooms.read().unwrap();
            match rooms.get(user_id) {
                Some(room) => room.iter().map(|(k, tx)| (*k, tx.clone())).collect(),
                None => return,
            }
        };

        let mut failed = Vec::new();
        for (key, tx) in members {
            if tx.send(message.to_string()).is_err() {
                failed.push(key);
            }
        }
        if !failed.is_empty() {
            let mut rooms = self.rooms.write().unwrap();
            if let Some(room) = rooms.get_mut(user_id) {
                for key in failed {
                    room.remove(&key);
                }
                if room.is_empty() {
                    rooms.remove(user_id);
                }
            }
        }
    }

    #[cfg(test)]
    fn member_count(&self, user_id: &str) -> usize {
        self.rooms
            .read()
            .unwrap()
            .get(user_id)
            .map_or(0, |room| room.len())
    }
}
