use serde::{Deserialize, Serialize};

/// Created on first successful login; immutable afterwards.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: String,
    pub public_key: String,
    pub created_at: i64,
}

/// A device pairing request, created by an unauthenticated poll and
/// upgraded by an authenticated approval. `supports_v2` only ever flips to
/// true.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub id: String,
    pub public_key: String,
    pub supports_v2: bool,
    pub response: String,
    pub response_account_id: String,
    pub token: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub tag: String,
    pub seq: i64,
    pub metadata: String,
    pub metadata_version: i64,
    pub agent_state: Option<String>,
    pub agent_state_version: i64,
    pub data_encryption_key: Option<String>,
    pub active: bool,
    pub active_at: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
pub struct SessionMessage {
    pub id: String,
    pub session_id: String,
    pub seq: i64,
    pub content: String,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Serialized into the machines snapshot file, hence the serde derives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    pub id: String,
    pub user_id: String,
    pub metadata: String,
    pub metadata_version: i64,
    pub daemon_state: Option<String>,
    pub daemon_state_version: i64,
    pub data_encryption_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone)]
pub struct Artifact {
    pub id: String,
    pub user_id: String,
    pub header: String,
    pub header_version: i64,
    pub body: String,
    pub body_version: i64,
    pub data_encryption_key: String,
    pub seq: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AccountSettings {
    pub settings: Option<String>,
    pub version: i64,
}

/// Result of a compare-and-swap mutation. Mismatches carry the current
/// version and value so clients can rebase.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome<T> {
    Success { version: i64, value: T },
    VersionMismatch { version: i64, value: T },
    NotFound,
}

impl<T> UpdateOutcome<T> {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::VersionMismatch { .. } => "version-mismatch",
            Self::NotFound => "not-found",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
