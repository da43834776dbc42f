//! Sessions: get-or-create with field merge, CAS updates, activity flags,
//! and tombstone deletion.

use anyhow::{Result, bail};
use uuid::Uuid;

use super::Store;
use super::types::{Session, UpdateOutcome};

impl Store {
    /// Reuse the live session for `(user_id, tag)` or mint a new one. On
    /// reuse, incoming fields are merged: a differing non-empty metadata or
    /// differing agent state bumps the matching version counter; a data
    /// encryption key overwrites without a version bump. A tombstoned
    /// session releases its tag slot. The bool is true when created.
    pub fn get_or_create_session(
        &self,
        user_id: &str,
        tag: &str,
        metadata: &str,
        agent_state: Option<&str>,
        data_encryption_key: Option<&str>,
        now: i64,
    ) -> Result<(Session, bool)> {
        if user_id.is_empty() {
            bail!("missing userID");
        }
        if tag.is_empty() {
            bail!("missing tag");
        }

        let mut state = self.write();
        let key = (user_id.to_string(), tag.to_string());
        if let Some(sid) = state.session_id_by_user_tag.get(&key).cloned() {
            let deleted = state
                .sessions_by_id
                .get(&sid)
                .is_none_or(|session| session.deleted);
            if deleted {
                state.session_id_by_user_tag.remove(&key);
            } else {
                let session = state
                    .sessions_by_id
                    .get_mut(&sid)
                    .expect("tag index points at a live session");
                let mut changed = false;
                if !metadata.is_empty() && metadata != session.metadata {
                    session.metadata = metadata.to_string();
                    session.metadata_version += 1;
                    changed = true;
                }
                if let Some(agent_state) = agent_state
                    && session.agent_state.as_deref() != Some(agent_state)
                {
                    session.agent_state = Some(agent_state.to_string());
                    session.agent_state_version += 1;
                    changed = true;
                }
                if let Some(dek) = data_encryption_key {
                    session.data_encryption_key = Some(dek.to_string());
                    changed = true;
                }
                if changed {
                    session.updated_at = now;
                }
                return Ok((session.clone(), false));
            }
        }

        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            tag: tag.to_string(),
            seq: 0,
            metadata: metadata.to_string(),
            metadata_version: if metadata.is_empty() { 0 } else { 1 },
            agent_state: agent_state.map(str::to_string),
            agent_state_version: if agent_state.is_some() { 1 } else { 0 },
            data_encryption_key: data_encryption_key.map(str::to_string),
            active: false,
            active_at: 0,
            created_at: now,
            updated_at: now,
            deleted: false,
        };
        state
            .sessions_by_id
            .insert(session.id.clone(), session.clone());
        state.session_id_by_user_tag.insert(key, session.id.clone());
        Ok((session, true))
    }

    pub fn get_session(&self, user_id: &str, session_id: &str) -> Option<Session> {
        let state = self.read();
        let session = state.sessions_by_id.get(session_id)?;
        if session.user_id != user_id || session.deleted {
            return None;
        }
        Some(session.clone())
    }

    /// Live sessions for a user, most recently updated first.
    pub fn list_sessions(&self, user_id: &str) -> Vec<Session> {
        let state = self.read();
        let mut result: Vec<Session> = state
            .sessions_by_id
            .values()
            .filter(|s| s.user_id == user_id && !s.deleted)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result
    }

    pub fn update_session_metadata(
        &self,
        user_id: &str,
        session_id: &str,
        expected_version: i64,
        metadata: &str,
        now: i64,
    ) -> UpdateOutcome<String> {
        let mut state = self.write();
        let Some(session) = state.sessions_by_id.get_mut(session_id) else {
            return UpdateOutcome::NotFound;
        };
        if session.user_id != user_id || session.deleted {
            return UpdateOutcome::NotFound;
        }
        if expected_version != session.metadata_version {
            return UpdateOutcome::VersionMismatch {
                version: session.metadata_version,
                value: session.metadata.clone(),
            };
        }

        session.metadata = metadata.to_string();
        session.metadata_version += 1;
        session.updated_at = now;
        UpdateOutcome::Success {
            version: session.metadata_version,
            value: session.metadata.clone(),
        }
    }

    pub fn update_session_agent_state(
        &self,
        user_id: &str,
        session_id: &str,
        expected_version: i64,
        agent_state: Option<&str>,
        now: i64,
    ) -> UpdateOutcome<Option<String>> {
        let mut state = self.write();
        let Some(session) = state.sessions_by_id.get_mut(session_id) else {
            return UpdateOutcome::NotFound;
        };
        if session.user_id != user_id || session.deleted {
            return UpdateOutcome::NotFound;
        }
        if expected_version != session.agent_state_version {
            return UpdateOutcome::VersionMismatch {
                version: session.agent_state_version,
                value: session.agent_state.clone(),
            };
        }

        session.agent_state = agent_state.map(str::to_string);
        session.agent_state_version += 1;
        session.updated_at = now;
        UpdateOutcome::Success {
            version: session.agent_state_version,
            value: session.agent_state.clone(),
        }
    }

    /// Flip the activity flag; `active_at` is only recorded when the
    /// session becomes active.
    pub fn set_session_active(
        &self,
        user_id: &str,
        session_id: &str,
        active: bool,
        active_at: i64,
        now: i64,
    ) -> bool {
        let mut state = self.write();
        let Some(session) = state.sessions_by_id.get_mut(session_id) else {
            return false;
        };
        if session.user_id != user_id || session.deleted {
            return false;
        }
        session.active = active;
        if active {
            session.active_at = active_at;
        }
        session.updated_at = now;
        true
    }

    /// Tombstone the session, release its tag slot, and drop its messages.
    pub fn delete_session(&self, user_id: &str, session_id: &str, now: i64) -> bool {
        let mut state = self.write();
        let Some(session) = state.sessions_by_id.get_mut(session_id) else {
            return false;
        };
        if session.user_id != user_id || session.deleted {
            return false;
        }
        session.deleted = true;
        session.updated_at = now;
        let tag = session.tag.clone();

        let key = (user_id.to_string(), tag);
        if state.session_id_by_user_tag.get(&key).map(String::as_str) == Some(session_id) {
            state.session_id_by_user_tag.remove(&key);
        }
        drop(state);

        self.messages.delete_session(session_id);
        true
    }
}
