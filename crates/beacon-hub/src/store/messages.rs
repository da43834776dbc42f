//! The in-memory message log: a linear per-session vector appended in seq
//! order, plus the store-level append/list operations.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{Result, bail};
use uuid::Uuid;

use super::Store;
use super::types::SessionMessage;

#[derive(Default)]
pub struct MessageLog {
    data: RwLock<HashMap<String, Vec<SessionMessage>>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, session_id: &str, message: SessionMessage) {
        self.data
            .write()
            .unwrap()
            .entry(session_id.to_string())
            .or_default()
            .push(message);
    }

    pub fn get_after(&self, session_id: &str, after: i64, limit: usize) -> Vec<SessionMessage> {
        let data = self.data.read().unwrap();
        let Some(messages) = data.get(session_id) else {
            return Vec::new();
        };
        messages
            .iter()
            .filter(|m| m.seq > after)
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn delete_session(&self, session_id: &str) {
        self.data.write().unwrap().remove(session_id);
    }
}

impl Store {
    /// Append a message to a session the user owns. Not CAS: the next
    /// per-session seq is drawn atomically with the append.
    pub fn append_message(
        &self,
        user_id: &str,
        session_id: &str,
        content: &str,
        now: i64,
    ) -> Result<SessionMessage> {
        if self.get_session(user_id, session_id).is_none() {
            bail!("session not found");
        }

        let seq = self.seq.next_for_session(session_id);
        let message = SessionMessage {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            seq,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.messages.append(session_id, message.clone());
        Ok(message)
    }

    pub fn list_messages(
        &self,
        user_id: &str,
        session_id: &str,
        after: i64,
        limit: i64,
    ) -> Result<Vec<SessionMessage>> {
        if self.get_session(user_id, session_id).is_none() {
            bail!("session not found");
        }
        let limit = if limit <= 0 { 100 } else { limit as usize };
        Ok(self.messages.get_after(session_id, after, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with_session() -> (Store, String) {
        let store = Store::new();
        let (s, _) = store
            .get_or_create_session("u1", "t1", "m", None, None, 1)
            .unwrap();
        (store, s.id)
    }

    #[test]
    fn append_assigns_contiguous_seq() {
        let (store, sid) = store_with_session();
        for expected in 1..=5 {
            let msg = store.append_message("u1", &sid, "enc", 10).unwrap();
            assert_eq!(msg.seq, expected);
        }

        let all = store.list_messages("u1", &sid, 0, 0).unwrap();
        let seqs: Vec<i64> = all.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn append_requires_owned_session() {
        let (store, sid) = store_with_session();
        assert!(store.append_message("u2", &sid, "enc", 10).is_err());
        assert!(store.append_message("u1", "missing", "enc", 10).is_err());
    }

    #[test]
    fn list_honors_cursor_and_limit() {
        let (store, sid) = store_with_session();
        for _ in 0..10 {
            store.append_message("u1", &sid, "enc", 10).unwrap();
        }

        let after = store.list_messages("u1", &sid, 7, 0).unwrap();
        assert_eq!(after.iter().map(|m| m.seq).collect::<Vec<_>>(), vec![8, 9, 10]);

        let limited = store.list_messages("u1", &sid, 0, 4).unwrap();
        assert_eq!(limited.len(), 4);
        assert_eq!(limited[0].seq, 1);
    }

    #[test]
    fn deleting_session_drops_its_messages() {
        let (store, sid) = store_with_session();
        store.append_message("u1", &sid, "enc", 10).unwrap();
        assert!(store.delete_session("u1", &sid, 11));
        assert!(store.list_messages("u1", &sid, 0, 0).is_err());
        assert!(store.messages.get_after(&sid, 0, 10).is_empty());
    }
}
