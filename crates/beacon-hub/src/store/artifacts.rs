//! Artifacts: `(user, id)` keyed blobs whose header and body carry
//! independent version counters, plus a store-wide artifact sequence.

use anyhow::{Result, bail};

use super::Store;
use super::types::Artifact;

/// Outcome of an artifact update. On success only the sides that were
/// submitted carry new versions; on mismatch the current state of both
/// sides is reported and nothing was changed.
#[derive(Debug, Default)]
pub struct ArtifactUpdate {
    pub success: bool,
    pub header_version: Option<i64>,
    pub body_version: Option<i64>,
    pub current_header_version: Option<i64>,
    pub current_body_version: Option<i64>,
    pub current_header: Option<String>,
    pub current_body: Option<String>,
}

impl ArtifactUpdate {
    fn mismatch(artifact: &Artifact) -> Self {
        Self {
            success: false,
            current_header_version: Some(artifact.header_version),
            current_body_version: Some(artifact.body_version),
            current_header: Some(artifact.header.clone()),
            current_body: Some(artifact.body.clone()),
            ..Self::default()
        }
    }
}

impl Store {
    pub fn list_artifacts(&self, user_id: &str) -> Vec<Artifact> {
        let state = self.read();
        let mut result: Vec<Artifact> = state
            .artifacts_by_key
            .values()
            .filter(|a| a.user_id == user_id && !a.deleted)
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.updated_at
                .cmp(&a.updated_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        result
    }

    pub fn get_artifact(&self, user_id: &str, artifact_id: &str) -> Option<Artifact> {
        let state = self.read();
        let artifact = state
            .artifacts_by_key
            .get(&(user_id.to_string(), artifact_id.to_string()))?;
        if artifact.deleted {
            return None;
        }
        Some(artifact.clone())
    }

    /// Create an artifact with header and body both at version 1. Returns
    /// the existing artifact with `created = false` when the id is taken.
    pub fn create_artifact(
        &self,
        user_id: &str,
        artifact_id: &str,
        header: &str,
        body: &str,
        data_encryption_key: &str,
        now: i64,
    ) -> Result<(Artifact, bool)> {
        if user_id.is_empty() {
            bail!("missing user id");
        }
        if artifact_id.is_empty() {
            bail!("missing artifact id");
        }
        if header.is_empty() || body.is_empty() || data_encryption_key.is_empty() {
            bail!("missing artifact fields");
        }

        let mut state = self.write();
        let key = (user_id.to_string(), artifact_id.to_string());
        if let Some(existing) = state.artifacts_by_key.get(&key)
            && !existing.deleted
        {
            return Ok((existing.clone(), false));
        }

        state.artifact_seq += 1;
        let artifact = Artifact {
            id: artifact_id.to_string(),
            user_id: user_id.to_string(),
            header: header.to_string(),
            header_version: 1,
            body: body.to_string(),
            body_version: 1,
            data_encryption_key: data_encryption_key.to_string(),
            seq: state.artifact_seq,
            created_at: now,
            updated_at: now,
            deleted: false,
        };
        state.artifacts_by_key.insert(key, artifact.clone());
        Ok((artifact, true))
    }

    /// Update header, body, neither, or both. Each submitted side is CAS
    /// checked against the stored version; any mismatch aborts the whole
    /// update with no state change. A no-op update still succeeds and
    /// advances the artifact sequence.
    pub fn update_artifact(
        &self,
        user_id: &str,
        artifact_id: &str,
        header: Option<&str>,
        expected_header_version: Option<i64>,
        body: Option<&str>,
        expected_body_version: Option<i64>,
        now: i64,
    ) -> Result<ArtifactUpdate> {
        if user_id.is_empty() {
            bail!("missing user id");
        }
        if artifact_id.is_empty() {
            bail!("missing artifact id");
        }

        let mut state = self.write();
        let key = (user_id.to_string(), artifact_id.to_string());
        let Some(artifact) = state.artifacts_by_key.get(&key) else {
            bail!("artifact not found");
        };
        if artifact.deleted {
            bail!("artifact not found");
        }

        if header.is_some() && expected_header_version != Some(artifact.header_version) {
            return Ok(ArtifactUpdate::mismatch(artifact));
        }
        if body.is_some() && expected_body_version != Some(artifact.body_version) {
            return Ok(ArtifactUpdate::mismatch(artifact));
        }

        let seq = {
            state.artifact_seq += 1;
            state.artifact_seq
        };
        let artifact = state
            .artifacts_by_key
            .get_mut(&key)
            .expect("artifact present under write lock");

        let mut result = ArtifactUpdate {
            success: true,
            ..ArtifactUpdate::default()
        };
        if let Some(header) = header {
            artifact.header = header.to_string();
            artifact.header_version += 1;
            result.header_version = Some(artifact.header_version);
        }
        if let Some(body) = body {
            artifact.body = body.to_string();
            artifact.body_version += 1;
            result.body_version = Some(artifact.body_version);
        }
        artifact.updated_at = now;
        artifact.seq = seq;
        Ok(result)
    }

    pub fn delete_artifact(&self, user_id: &str, artifact_id: &str) -> bool {
        if user_id.is_empty() || artifact_id.is_empty() {
            return false;
        }

        let mut state = self.write();
        let key = (user_id.to_string(), artifact_id.to_string());
        let Some(artifact) = state.artifacts_by_key.get_mut(&key) else {
            return false;
        };
        if artifact.deleted {
            return false;
        }
        artifact.deleted = true;
        true
    }
}
