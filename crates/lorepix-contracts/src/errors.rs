use thiserror::Error;

/// Failures of the durable association/settings substrate.
///
/// `Load` is fail-soft: the caller resets to an empty state and keeps
/// running. `Persistence` is surfaced to the user and the in-memory state
/// is rolled back so a reload cannot silently diverge from disk.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored data could not be parsed: {0}")]
    Load(String),
    #[error("persisting to storage failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unsupported image type '{0}'")]
    InvalidType(String),
    #[error("image is {size} bytes, over the {limit} byte limit")]
    TooLarge { size: u64, limit: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("image could not be loaded from '{url}': {reason}")]
pub struct ImageLoadError {
    pub url: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host hook '{0}' is unavailable")]
pub struct HostIntegrationUnavailable(pub String);
