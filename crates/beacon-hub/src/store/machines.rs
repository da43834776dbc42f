//! Machines: client-supplied ids owned by exactly one user for life, with
//! optional snapshot persistence after every effective mutation.

use anyhow::{Result, bail};

use super::types::{Machine, UpdateOutcome};
use super::{State, Store};

impl State {
    /// Snapshot for the persistence file, sorted by id for stable output.
    pub(crate) fn machine_snapshot(&self) -> Vec<Machine> {
        let mut machines: Vec<Machine> = self.machines_by_id.values().cloned().collect();
        machines.sort_by(|a, b| a.id.cmp(&b.id));
        machines
    }
}

impl Store {
    /// Create or merge-update a machine. An id registered to another user
    /// is rejected outright. Merge semantics mirror session reuse: changed
    /// non-empty metadata and changed daemon state bump their counters, a
    /// data encryption key overwrites silently.
    pub fn upsert_machine(
        &self,
        user_id: &str,
        machine_id: &str,
        metadata: &str,
        daemon_state: Option<&str>,
        data_encryption_key: Option<&str>,
        now: i64,
    ) -> Result<(Machine, bool)> {
        if machine_id.is_empty() {
            bail!("missing machine id");
        }

        let (machine, created, snapshot) = {
            let mut state = self.write();
            if let Some(existing) = state.machines_by_id.get_mut(machine_id) {
                if existing.user_id != user_id {
                    bail!("machine belongs to another user");
                }

                let mut changed = false;
                if !metadata.is_empty() && metadata != existing.metadata {
                    existing.metadata = metadata.to_string();
                    existing.metadata_version += 1;
                    changed = true;
                }
                if let Some(daemon_state) = daemon_state
                    && existing.daemon_state.as_deref() != Some(daemon_state)
                {
                    existing.daemon_state = Some(daemon_state.to_string());
                    existing.daemon_state_version += 1;
                    changed = true;
                }
                if let Some(dek) = data_encryption_key {
                    existing.data_encryption_key = Some(dek.to_string());
                    changed = true;
                }
                if changed {
                    existing.updated_at = now;
                }
                let machine = existing.clone();
                let snapshot =
                    (changed && self.persistence_enabled()).then(|| state.machine_snapshot());
                (machine, false, snapshot)
            } else {
                let machine = Machine {
                    id: machine_id.to_string(),
                    user_id: user_id.to_string(),
                    metadata: metadata.to_string(),
                    metadata_version: if metadata.is_empty() { 0 } else { 1 },
                    daemon_state: daemon_state.map(str::to_string),
                    daemon_state_version: if daemon_state.is_some() { 1 } else { 0 },
                    data_encryption_key: data_encryption_key.map(str::to_string),
                    created_at: now,
                    updated_at: now,
                };
                state
                    .machines_by_id
                    .insert(machine_id.to_string(), machine.clone());
                let snapshot = self.persistence_enabled().then(|| state.machine_snapshot());
                (machine, true, snapshot)
            }
        };

        if let Some(snapshot) = snapshot {
            self.persist_machines(&snapshot);
        }
        Ok((machine, created))
    }

    pub fn get_machine(&self, user_id: &str, machine_id: &str) -> Option<Machine> {
        let state = self.read();
        let machine = state.machines_by_id.get(machine_id)?;
        if machine.user_id != user_id {
            return None;
        }
        Some(machine.clone())
    }

    /// API listing, most recently updated first. The persistence snapshot
    /// uses id order instead.
    pub fn list_machines(&self, user_id: &str) -> Vec<Machine> {
        let state = self.read();
        let mut result: Vec<Machine> = state
            .machines_by_id
            .values()
            .filter(|m| m.user_id == user_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result
    }

    pub fn update_machine_metadata(
        &self,
        user_id: &str,
        machine_id: &str,
        expected_version: i64,
        metadata: &str,
        now: i64,
    ) -> UpdateOutcome<String> {
        let (outcome, snapshot) = {
            let mut state = self.write();
            let Some(machine) = state.machines_by_id.get_mut(machine_id) else {
                return UpdateOutcome::NotFound;
            };
            if machine.user_id != user_id {
                return UpdateOutcome::NotFound;
            }
            if expected_version != machine.metadata_version {
                return UpdateOutcome::VersionMismatch {
                    version: machine.metadata_version,
                    value: machine.metadata.clone(),
                };
            }

            machine.metadata = metadata.to_string();
            machine.metadata_version += 1;
            machine.updated_at = now;
            let outcome = UpdateOutcome::Success {
                version: machine.metadata_version,
                value: machine.metadata.clone(),
            };
            let snapshot = self.persistence_enabled().then(|| state.machine_snapshot());
            (outcome, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.persist_machines(&snapshot);
        }
        outcome
    }

    pub fn update_machine_daemon_state(
        &self,
        user_id: &str,
        machine_id: &str,
        expected_version: i64,
        daemon_state: Option<&str>,
        now: i64,
    ) -> UpdateOutcome<Option<String>> {
        let (outcome, snapshot) = {
            let mut state = self.write();
            let Some(machine) = state.machines_by_id.get_mut(machine_id) else {
                return UpdateOutcome::NotFound;
            };
            if machine.user_id != user_id {
                return UpdateOutcome::NotFound;
            }
            if expected_version != machine.daemon_state_version {
                return UpdateOutcome::VersionMismatch {
                    version: machine.daemon_state_version,
                    value: machine.daemon_state.clone(),
                };
            }

            machine.daemon_state = daemon_state.map(str::to_string);
            machine.daemon_state_version += 1;
            machine.updated_at = now;
            let outcome = UpdateOutcome::Success {
                version: machine.daemon_state_version,
                value: machine.daemon_state.clone(),
            };
            let snapshot = self.persistence_enabled().then(|| state.machine_snapshot());
            (outcome, snapshot)
        };

        if let Some(snapshot) = snapshot {
            self.persist_machines(&snapshot);
        }
        outcome
    }
}
