//! Accounts, pairing requests, and versioned account settings.

use uuid::Uuid;

use super::Store;
use super::types::{Account, AccountSettings, AuthRequest, UpdateOutcome};

impl Store {
    /// Look up or mint the account for a device public key. The bool is
    /// true when the account was created by this call.
    pub fn get_or_create_account(&self, public_key: &str, now: i64) -> (Account, bool) {
        let mut state = self.write();
        if let Some(existing) = state.accounts_by_public_key.get(public_key) {
            return (existing.clone(), false);
        }

        let account = Account {
            id: Uuid::new_v4().to_string(),
            public_key: public_key.to_string(),
            created_at: now,
        };
        state
            .accounts_by_public_key
            .insert(public_key.to_string(), account.clone());
        (account, true)
    }

    pub fn get_auth_request(&self, public_key: &str) -> Option<AuthRequest> {
        self.read().auth_requests_by_key.get(public_key).cloned()
    }

    /// Poll-or-create a pairing request. `supports_v2` is sticky-true.
    pub fn upsert_auth_request(&self, public_key: &str, supports_v2: bool, now: i64) -> AuthRequest {
        let mut state = self.write();
        if let Some(existing) = state.auth_requests_by_key.get_mut(public_key) {
            existing.supports_v2 = existing.supports_v2 || supports_v2;
            existing.updated_at = now;
            return existing.clone();
        }

        let request = AuthRequest {
            id: Uuid::new_v4().to_string(),
            public_key: public_key.to_string(),
            supports_v2,
            response: String::new(),
            response_account_id: String::new(),
            token: String::new(),
            created_at: now,
            updated_at: now,
        };
        state
            .auth_requests_by_key
            .insert(public_key.to_string(), request.clone());
        request
    }

    /// Attach the approving account's response and minted token to a
    /// pending request. Returns None when no request exists for the key.
    pub fn authorize_auth_request(
        &self,
        public_key: &str,
        response: &str,
        response_account_id: &str,
        token: &str,
        now: i64,
    ) -> Option<AuthRequest> {
        let mut state = self.write();
        let request = state.auth_requests_by_key.get_mut(public_key)?;
        request.response = response.to_string();
        request.response_account_id = response_account_id.to_string();
        request.token = token.to_string();
        request.updated_at = now;
        Some(request.clone())
    }

    pub fn account_settings(&self, user_id: &str) -> AccountSettings {
        self.read()
            .settings_by_user
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// CAS update of the settings blob. The slot starts at version 0 with
    /// no value, so the first successful write uses `expected_version = 0`.
    pub fn update_account_settings(
        &self,
        user_id: &str,
        expected_version: i64,
        settings: &str,
    ) -> UpdateOutcome<Option<String>> {
        if user_id.is_empty() {
            return UpdateOutcome::NotFound;
        }

        let mut state = self.write();
        let entry = state.settings_by_user.entry(user_id.to_string()).or_default();
        if expected_version != entry.version {
            return UpdateOutcome::VersionMismatch {
                version: entry.version,
                value: entry.settings.clone(),
            };
        }

        entry.version += 1;
        entry.settings = Some(settings.to_string());
        UpdateOutcome::Success {
            version: entry.version,
            value: entry.settings.clone(),
        }
    }
}
