pub mod accounts;
pub mod artifacts;
pub mod machines;
pub mod messages;
pub mod persistence;
pub mod seq;
pub mod sessions;
pub mod types;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::warn;

use messages::MessageLog;
use seq::SessionSeq;
use types::{Account, AccountSettings, Artifact, AuthRequest, Machine, Session};

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Default)]
pub struct StoreOptions {
    pub machines_state_file: Option<PathBuf>,
}

/// All tables live behind one read-write lock; the message log and the
/// per-session sequence generator carry their own locks for contention
/// isolation. Snapshot persistence for machines happens outside the table
/// lock, serialized by `persist_lock`.
pub struct Store {
    state: RwLock<State>,
    pub(crate) messages: MessageLog,
    pub(crate) seq: SessionSeq,
    machines_state_file: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

#[derive(Default)]
pub(crate) struct State {
    pub(crate) accounts_by_public_key: HashMap<String, Account>,
    pub(crate) auth_requests_by_key: HashMap<String, AuthRequest>,
    pub(crate) sessions_by_id: HashMap<String, Session>,
    pub(crate) session_id_by_user_tag: HashMap<(String, String), String>,
    pub(crate) machines_by_id: HashMap<String, Machine>,
    pub(crate) artifacts_by_key: HashMap<(String, String), Artifact>,
    pub(crate) artifact_seq: i64,
    pub(crate) settings_by_user: HashMap<String, AccountSettings>,
}

impl Store {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(opts: StoreOptions) -> Self {
        let store = Self {
            state: RwLock::new(State::default()),
            messages: MessageLog::new(),
            seq: SessionSeq::new(),
            machines_state_file: opts.machines_state_file,
            persist_lock: Mutex::new(()),
        };

        if let Some(path) = store.machines_state_file.clone() {
            match persistence::load_machines(&path) {
                Ok(machines) => {
                    let mut state = store.state.write().unwrap();
                    for m in machines {
                        if m.id.is_empty() || m.user_id.is_empty() {
                            continue;
                        }
                        state.machines_by_id.insert(m.id.clone(), m);
                    }
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "machines state load failed, starting clean");
                }
            }
        }

        store
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap()
    }

    pub(crate) fn persistence_enabled(&self) -> bool {
        self.machines_state_file.is_some()
    }

    /// Write a machines snapshot to disk. Failures are logged; in-memory
    /// state stays authoritative for the process lifetime.
    pub(crate) fn persist_machines(&self, snapshot: &[Machine]) {
        let Some(path) = &self.machines_state_file else {
            return;
        };
        let _guard = self.persist_lock.lock().unwrap();
        if let Err(err) = persistence::write_snapshot(path, snapshot, now_millis()) {
            warn!(path = %path.display(), error = %err, "machines state write failed");
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}
