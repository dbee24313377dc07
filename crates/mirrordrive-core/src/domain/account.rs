//! Account context
//!
//! An [`AccountContext`] identifies one remote drive mirrored into one local
//! root, together with the tunables the engine reads for that account.
//! Tunables are supplied when the account is created (see
//! `config::AccountsConfig::settings_for`) rather than derived from the
//! account's name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    errors::DomainError,
    newtypes::{AccountId, DeltaToken, RemotePath, SyncPath},
};

/// Authentication state of an account as last observed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthState {
    /// Credentials are valid and the account can sync
    #[default]
    Authenticated,
    /// Access token has expired and must be refreshed by the login collaborator
    TokenExpired,
    /// The user signed out; the account is kept but never synced
    SignedOut,
}

impl AuthState {
    /// Returns true if the account can perform sync operations
    pub fn can_sync(&self) -> bool {
        matches!(self, AuthState::Authenticated)
    }

    /// Stable string form used by the state store
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthState::Authenticated => "authenticated",
            AuthState::TokenExpired => "token_expired",
            AuthState::SignedOut => "signed_out",
        }
    }
}

impl std::str::FromStr for AuthState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "authenticated" => Ok(AuthState::Authenticated),
            "token_expired" => Ok(AuthState::TokenExpired),
            "signed_out" => Ok(AuthState::SignedOut),
            other => Err(DomainError::ValidationFailed(format!(
                "Unknown auth state: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-account tunables read by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountSettings {
    /// Upper bound on concurrent uploads
    pub max_parallel_uploads: usize,
    /// Upper bound on concurrent downloads
    pub max_parallel_downloads: usize,
    /// Number of rows written per batch during a full listing
    pub batch_size: usize,
    /// Seconds between automatic sync runs
    pub auto_sync_interval_secs: u64,
    /// Whether each run writes a session log row
    pub detailed_logging: bool,
    /// Remote folders mirrored locally; `/` mirrors the whole drive
    pub selected_folders: Vec<RemotePath>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            max_parallel_uploads: 2,
            max_parallel_downloads: 3,
            batch_size: 200,
            auto_sync_interval_secs: 300,
            detailed_logging: false,
            selected_folders: vec![RemotePath::root()],
        }
    }
}

impl AccountSettings {
    /// True if `path` lies inside one of the selected folders
    pub fn is_selected(&self, path: &RemotePath) -> bool {
        self.selected_folders.iter().any(|f| path.is_within(f))
    }

    /// Check the tunables are usable
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` naming the first bad field
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.max_parallel_uploads == 0 {
            return Err(DomainError::ValidationFailed(
                "max_parallel_uploads must be greater than 0".to_string(),
            ));
        }
        if self.max_parallel_downloads == 0 {
            return Err(DomainError::ValidationFailed(
                "max_parallel_downloads must be greater than 0".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(DomainError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// One remote drive mirrored into one local root
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountContext {
    id: AccountId,
    /// Identifier of the account at the remote service (e.g. a user principal)
    external_id: String,
    display_name: String,
    local_root: SyncPath,
    auth_state: AuthState,
    /// Continuation token as of the last finished session
    delta_token: Option<DeltaToken>,
    last_sync: Option<DateTime<Utc>>,
    settings: AccountSettings,
    created_at: DateTime<Utc>,
}

impl AccountContext {
    /// Create a new authenticated account
    pub fn new(
        external_id: impl Into<String>,
        display_name: impl Into<String>,
        local_root: SyncPath,
        settings: AccountSettings,
    ) -> Self {
        Self {
            id: AccountId::new(),
            external_id: external_id.into(),
            display_name: display_name.into(),
            local_root,
            auth_state: AuthState::Authenticated,
            delta_token: None,
            last_sync: None,
            settings,
            created_at: Utc::now(),
        }
    }

    /// Rebuild an account from stored fields
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: AccountId,
        external_id: String,
        display_name: String,
        local_root: SyncPath,
        auth_state: AuthState,
        delta_token: Option<DeltaToken>,
        last_sync: Option<DateTime<Utc>>,
        settings: AccountSettings,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            external_id,
            display_name,
            local_root,
            auth_state,
            delta_token,
            last_sync,
            settings,
            created_at,
        }
    }

    // --- Getters ---

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn external_id(&self) -> &str {
        &self.external_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn local_root(&self) -> &SyncPath {
        &self.local_root
    }

    pub fn auth_state(&self) -> &AuthState {
        &self.auth_state
    }

    pub fn delta_token(&self) -> Option<&DeltaToken> {
        self.delta_token.as_ref()
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    pub fn settings(&self) -> &AccountSettings {
        &self.settings
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// True if at least one folder is selected for mirroring
    pub fn has_selection(&self) -> bool {
        !self.settings.selected_folders.is_empty()
    }

    // --- Session boundary mutations ---

    /// Record the end of a successful session
    pub fn record_sync(&mut self, token: Option<DeltaToken>, at: DateTime<Utc>) {
        if token.is_some() {
            self.delta_token = token;
        }
        self.last_sync = Some(at);
    }

    /// Forget the continuation token so the next session performs a full listing
    pub fn clear_delta_token(&mut self) {
        self.delta_token = None;
    }

    pub fn set_auth_state(&mut self, state: AuthState) {
        self.auth_state = state;
    }

    pub fn set_settings(&mut self, settings: AccountSettings) {
        self.settings = settings;
    }
}
