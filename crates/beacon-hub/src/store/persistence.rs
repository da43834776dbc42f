//! Machines snapshot persistence: a single JSON document written with
//! temp-file + fsync + rename, owner-readable only.

use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::Machine;

const SNAPSHOT_VERSION: i64 = 1;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotFile {
    version: i64,
    machines: Vec<Machine>,
    saved_at: i64,
}

/// Read a snapshot. A missing or empty file starts clean; an unknown
/// version refuses to load.
pub fn load_machines(path: &Path) -> Result<Vec<Machine>> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("read {}", path.display())),
    };
    if data.is_empty() {
        return Ok(Vec::new());
    }

    let file: SnapshotFile =
        serde_json::from_slice(&data).with_context(|| format!("parse {}", path.display()))?;
    if file.version != SNAPSHOT_VERSION {
        bail!("unsupported machines state version {}", file.version);
    }
    Ok(file.machines)
}

pub fn write_snapshot(path: &Path, machines: &[Machine], saved_at: i64) -> Result<()> {
    let Some(dir) = path.parent() else {
        bail!("machines state file has no parent directory");
    };
    fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
    }

    let file = SnapshotFile {
        version: SNAPSHOT_VERSION,
        machines: machines.to_vec(),
        saved_at,
    };
    let mut data = serde_json::to_vec_pretty(&file).context("encode machines snapshot")?;
    data.push(b'\n');

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "machines".to_string());
    let tmp_path = dir.join(format!("{file_name}.tmp-{}", Uuid::new_v4()));

    let result = (|| -> Result<()> {
        let mut tmp = fs::File::create(&tmp_path)
            .with_context(|| format!("create {}", tmp_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tmp.set_permissions(fs::Permissions::from_mode(0o600))
                .context("chmod temp snapshot")?;
        }
        tmp.write_all(&data).context("write temp snapshot")?;
        tmp.sync_all().context("sync temp snapshot")?;
        drop(tmp);
        fs::rename(&tmp_path, path)
            .with_context(|| format!("rename into {}", path.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Store, StoreOptions};

    fn machine(id: &str, user: &str) -> Machine {
        Machine {
            id: id.into(),
            user_id: user.into(),
            metadata: "meta".into(),
            metadata_version: 1,
            daemon_state: None,
            daemon_state_version: 0,
            data_encryption_key: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn missing_file_starts_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machines.json");
        assert!(load_machines(&path).unwrap().is_empty());
    }

    #[test]
    fn snapshot_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machines.json");
        write_snapshot(&path, &[machine("m1", "u1"), machine("m2", "u2")], 99).unwrap();

        let loaded = load_machines(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, "m1");
        assert_eq!(loaded[0].user_id, "u1");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn unknown_version_refuses_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machines.json");
        std::fs::write(&path, r#"{"version":2,"machines":[],"savedAt":1}"#).unwrap();
        assert!(load_machines(&path).is_err());
    }

    #[test]
    fn empty_file_starts_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machines.json");
        std::fs::write(&path, "").unwrap();
        assert!(load_machines(&path).unwrap().is_empty());
    }

    #[test]
    fn store_restart_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("machines.json");

        {
            let store = Store::with_options(StoreOptions {
                machines_state_file: Some(path.clone()),
            });
            store
                .upsert_machine("u1", "m1", "meta", Some("ds"), Some("dek"), 7)
                .unwrap();
            store
                .update_machine_metadata("u1", "m1", 1, "meta2", 8);
        }

        let reopened = Store::with_options(StoreOptions {
            machines_state_file: Some(path),
        });
        let machines = reopened.list_machines("u1");
        assert_eq!(machines.len(), 1);
        assert_eq!(machines[0].metadata, "meta2");
        assert_eq!(machines[0].metadata_version, 2);
        assert_eq!(machines[0].daemon_state.as_deref(), Some("ds"));
        assert!(reopened.list_machines("u2").is_empty());
    }

    #[test]
    fn entries_missing_ids_are_skipped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("machines.json");
        write_snapshot(&path, &[machine("", "u1"), machine("m2", "")], 1).unwrap();

        let store = Store::with_options(StoreOptions {
            machines_state_file: Some(path),
        });
        assert!(store.list_machines("u1").is_empty());
        assert!(store.get_machine("", "m2").is_none());
    }
}
