use std::fmt;

// === RemoteError ===

/// Errors returned by the Raindrop.io API client.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteError {
    /// Transport failure or a non-2xx HTTP status.
    Unavailable(String),
    /// The API token was rejected (HTTP 401/403) or none is stored.
    InvalidToken,
    /// The API answered 2xx but with `result: false`.
    Api(String),
    /// The response body could not be decoded.
    Parse(String),
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::Unavailable(msg) => write!(f, "Raindrop API unavailable: {}", msg),
            RemoteError::InvalidToken => write!(f, "Raindrop API token is invalid or missing"),
            RemoteError::Api(msg) => write!(f, "Raindrop API error: {}", msg),
            RemoteError::Parse(msg) => write!(f, "Raindrop API response parse error: {}", msg),
        }
    }
}

impl std::error::Error for RemoteError {}

// === StoreError ===

/// Errors related to local bookmark tree operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Node with the given ID was not found.
    NotFound(String),
    /// The node exists but is a bookmark where a folder was required.
    NotAFolder(String),
    /// Database operation failed.
    DatabaseError(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Bookmark node not found: {}", id),
            StoreError::NotAFolder(id) => write!(f, "Bookmark node is not a folder: {}", id),
            StoreError::DatabaseError(msg) => write!(f, "Bookmark database error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

// === StorageError ===

/// Errors related to the durable key-value store.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    /// Database operation failed.
    DatabaseError(String),
    /// A stored value could not be serialized or deserialized.
    SerializationError(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::DatabaseError(msg) => write!(f, "Storage database error: {}", msg),
            StorageError::SerializationError(msg) => {
                write!(f, "Storage serialization error: {}", msg)
            }
        }
    }
}

impl std::error::Error for StorageError {}

// === SettingsError ===

/// Errors related to settings management.
#[derive(Debug)]
pub enum SettingsError {
    /// An I/O error occurred while reading or writing settings.
    IoError(String),
    /// Failed to serialize or deserialize settings.
    SerializationError(String),
    /// The provided settings key is invalid.
    InvalidKey(String),
    /// The provided settings value is invalid.
    InvalidValue(String),
}

impl fmt::Display for SettingsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingsError::IoError(msg) => write!(f, "Settings I/O error: {}", msg),
            SettingsError::SerializationError(msg) => {
                write!(f, "Settings serialization error: {}", msg)
            }
            SettingsError::InvalidKey(key) => write!(f, "Invalid settings key: {}", key),
            SettingsError::InvalidValue(msg) => {
                write!(f, "Invalid settings value: {}", msg)
            }
        }
    }
}

impl std::error::Error for SettingsError {}

// === SyncError ===

/// Run-level errors of a synchronization.
///
/// Malformed items are not represented here: they only bump the skip counter.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncError {
    /// A structural remote read failed.
    Remote(RemoteError),
    /// A structural local bookmark operation failed.
    LocalStore(StoreError),
    /// Reading or writing sync metadata failed.
    Storage(StorageError),
    /// The run was cancelled by the user.
    Cancelled,
    /// The lifecycle watchdog expired before the run finished.
    Timeout,
    /// Another run holds the single-flight guard.
    AlreadyInProgress,
    /// No API token is stored.
    MissingToken,
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::Remote(e) => write!(f, "{}", e),
            SyncError::LocalStore(e) => write!(f, "{}", e),
            SyncError::Storage(e) => write!(f, "{}", e),
            SyncError::Cancelled => write!(f, "Sync cancelled"),
            SyncError::Timeout => write!(f, "Sync timed out"),
            SyncError::AlreadyInProgress => write!(f, "Already in progress"),
            SyncError::MissingToken => write!(f, "No token provided"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::Remote(e) => Some(e),
            SyncError::LocalStore(e) => Some(e),
            SyncError::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl SyncError {
    /// True when the failure means the user has to re-enter the API token.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SyncError::Remote(RemoteError::InvalidToken) | SyncError::MissingToken)
    }
}

impl From<RemoteError> for SyncError {
    fn from(e: RemoteError) -> Self {
        SyncError::Remote(e)
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        SyncError::LocalStore(e)
    }
}

impl From<StorageError> for SyncError {
    fn from(e: StorageError) -> Self {
        SyncError::Storage(e)
    }
}
