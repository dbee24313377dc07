//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for identifiers and values. Each newtype
//! checks its invariants at construction time.

use std::fmt::{self, Display, Formatter};
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| DomainError::InvalidId(e.to_string()))
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Identifier of a persisted [`DriveItem`](super::DriveItem) row
    UniqueId
);
uuid_id!(
    /// Identifier for account contexts
    AccountId
);
uuid_id!(
    /// Identifier for a single sync run
    SessionId
);
uuid_id!(
    /// Identifier for recorded conflicts
    ConflictId
);

/// Row identifier of an append-only operation log entry (assigned by the store)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(i64);

impl OperationId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn value(&self) -> i64 {
        self.0
    }
}

impl Display for OperationId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A validated absolute local path
///
/// SyncPath is always absolute and lexically normalized (no `.` or `..`).
/// The path does not have to exist.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SyncPath(PathBuf);

impl SyncPath {
    /// Create a new SyncPath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is relative or escapes `/`
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!("{} is relative", path.display())));
        }

        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(format!(
                            "{} climbs above /",
                            path.display()
                        )));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(Self(normalized))
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Get the path relative to a root
    ///
    /// # Errors
    /// Returns error if this path is not within the root
    pub fn relative_to(&self, root: &SyncPath) -> Result<PathBuf, DomainError> {
        self.0
            .strip_prefix(&root.0)
            .map(Path::to_path_buf)
            .map_err(|_| DomainError::PathNotInSyncRoot(self.0.display().to_string()))
    }

    /// Resolve a remote-relative path (e.g. `/Documents/a.txt`) under this root
    ///
    /// # Errors
    /// Returns error if the resulting path is invalid
    pub fn join_remote(&self, remote: &RemotePath) -> Result<Self, DomainError> {
        let relative = remote.as_str().trim_start_matches('/');
        if relative.is_empty() {
            return Ok(self.clone());
        }
        Self::new(self.0.join(relative))
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for SyncPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<SyncPath> for PathBuf {
    fn from(sync_path: SyncPath) -> Self {
        sync_path.0
    }
}

impl AsRef<Path> for SyncPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

/// Shared conversions for string newtypes whose `new` validates
///
/// Deserialization goes through `new`, so a stored value that no longer
/// validates is rejected instead of silently accepted.
macro_rules! string_newtype {
    ($name:ident) => {
        impl $name {
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s.to_owned())
            }
        }

        impl TryFrom<String> for $name {
            type Error = DomainError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

/// A drive-relative path, always rooted at `/` (e.g. `/Documents/file1.txt`)
///
/// This is the key that pairs a local file with its remote counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemotePath(String);

impl RemotePath {
    /// Create a new RemotePath
    ///
    /// # Errors
    /// Returns error if the path is not rooted, contains `//` or `..`
    pub fn new(path: String) -> Result<Self, DomainError> {
        if !path.starts_with('/') {
            return Err(DomainError::InvalidRemotePath(format!(
                "{path} is not rooted at /"
            )));
        }

        if path.len() > 1 && (path.contains("//") || path.ends_with('/')) {
            return Err(DomainError::InvalidRemotePath(format!(
                "{path} has an empty segment"
            )));
        }

        if path.split('/').any(|segment| segment == "..") {
            return Err(DomainError::InvalidRemotePath(format!(
                "{path} contains .."
            )));
        }

        Ok(Self(path))
    }

    /// Build a RemotePath from a path relative to a local root
    ///
    /// # Errors
    /// Returns error if a component is not valid UTF-8 or the result is invalid
    pub fn from_relative(relative: &Path) -> Result<Self, DomainError> {
        let mut out = String::new();
        for component in relative.components() {
            match component {
                Component::Normal(c) => {
                    let part = c.to_str().ok_or_else(|| {
                        DomainError::InvalidRemotePath(format!(
                            "Non UTF-8 path component in {}",
                            relative.display()
                        ))
                    })?;
                    out.push('/');
                    out.push_str(part);
                }
                Component::CurDir => {}
                _ => {
                    return Err(DomainError::InvalidRemotePath(format!(
                        "Unexpected component in relative path: {}",
                        relative.display()
                    )))
                }
            }
        }

        if out.is_empty() {
            return Ok(Self::root());
        }
        Self::new(out)
    }

    /// The drive root `/`
    #[must_use]
    pub fn root() -> Self {
        Self("/".to_string())
    }

    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    /// Join a single path component
    ///
    /// # Errors
    /// Returns error if the component is empty or contains a separator
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if component.is_empty() || component.contains('/') || component == ".." {
            return Err(DomainError::InvalidRemotePath(format!(
                "{component:?} is not a single name"
            )));
        }

        if self.is_root() {
            Self::new(format!("/{component}"))
        } else {
            Self::new(format!("{}/{component}", self.0))
        }
    }

    /// Get the parent path (`None` for the root)
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }

        match self.0.rfind('/') {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(self.0[..idx].to_string())),
            None => None,
        }
    }

    /// Get the last path component
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit('/').next()
    }

    /// True if this path equals `folder` or lies beneath it
    #[must_use]
    pub fn is_within(&self, folder: &RemotePath) -> bool {
        if folder.is_root() || self == folder {
            return true;
        }
        self.0
            .strip_prefix(folder.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

string_newtype!(RemotePath);

// ============================================================================
// Remote identity types
// ============================================================================

/// Remote item identifier assigned by the cloud drive
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// # Errors
    /// Returns error if the ID is empty or contains whitespace or separators
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId("empty".to_string()));
        }

        if !id
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '!' | '-' | '_' | '.'))
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "{id:?} has characters outside [A-Za-z0-9!._-]"
            )));
        }

        Ok(Self(id))
    }
}

string_newtype!(RemoteId);

/// Base64-encoded content hash (quickXorHash for the Graph drive)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileHash(String);

impl FileHash {
    /// # Errors
    /// Returns error if the hash is empty or not Base64
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.is_empty() {
            return Err(DomainError::InvalidHash("empty".to_string()));
        }

        if !hash
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
        {
            return Err(DomainError::InvalidHash(format!(
                "{hash:?} is not base64"
            )));
        }

        Ok(Self(hash))
    }
}

string_newtype!(FileHash);

/// Opaque delta continuation cursor
///
/// Either a bare token or a full next-page URL; only the remote adapter
/// interprets the contents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeltaToken(String);

impl DeltaToken {
    /// # Errors
    /// Returns error if the token is empty
    pub fn new(token: String) -> Result<Self, DomainError> {
        if token.trim().is_empty() {
            return Err(DomainError::InvalidDeltaToken("blank".to_string()));
        }
        Ok(Self(token))
    }
}

string_newtype!(DeltaToken);
