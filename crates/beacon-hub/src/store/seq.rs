use std::collections::HashMap;
use std::sync::Mutex;

/// Per-session message sequence numbers, contiguous from 1. Guarded by its
/// own mutex so message appends do not contend with the main store lock.
#[derive(Default)]
pub struct SessionSeq {
    per_session: Mutex<HashMap<String, i64>>,
}

impl SessionSeq {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_for_session(&self, session_id: &str) -> i64 {
        let mut map = self.per_session.lock().unwrap();
        let counter = map.entry(session_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }
}
