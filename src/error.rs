// for error definitions
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    /// The store could not be reached: connection refused, IO failure, command
    /// timeout or a cluster that is down.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// The store answered, but with something we cannot use (script error,
    /// wrong type, malformed reply).
    #[error("Store protocol error: {0}")]
    StoreProtocol(String),

    /// Caller error: empty key, zero limit/window/interval/capacity.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking lock acquisition ran out of time
    #[error("Timed out after {waited_ms}ms waiting for lock '{name}'")]
    LockTimeout { name: String, waited_ms: u64 },

    /// Release or extend attempted with a token that no longer owns the lock
    #[error("Lock '{0}' is not owned by this holder")]
    LockNotOwned(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A cache-aside compute function failed
    #[error("Compute failed: {0}")]
    Compute(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Coarse classification of [`GuardError`], used by failure and retry policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    StoreUnavailable,
    StoreProtocol,
    InvalidArgument,
    LockTimeout,
    LockNotOwned,
    Other,
}

impl GuardError {
    pub fn class(&self) -> ErrorClass {
        match self {
            GuardError::StoreUnavailable(_) => ErrorClass::StoreUnavailable,
            GuardError::StoreProtocol(_) => ErrorClass::StoreProtocol,
            GuardError::InvalidArgument(_) => ErrorClass::InvalidArgument,
            GuardError::LockTimeout { .. } => ErrorClass::LockTimeout,
            GuardError::LockNotOwned(_) => ErrorClass::LockNotOwned,
            GuardError::Config(_) | GuardError::Serialization(_) | GuardError::Compute(_) => {
                ErrorClass::Other
            }
        }
    }

    /// True for errors raised by the store rather than by the caller.
    pub fn is_store_error(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::StoreUnavailable | ErrorClass::StoreProtocol
        )
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        GuardError::InvalidArgument(msg.into())
    }
}

// Connection-class failures are "unavailable", anything else the server said is protocol
impl From<redis::RedisError> for GuardError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_timeout()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_cluster_error()
        {
            return GuardError::StoreUnavailable(err.to_string());
        }

        match err.kind() {
            redis::ErrorKind::ClusterDown
            | redis::ErrorKind::MasterDown
            | redis::ErrorKind::BusyLoadingError
            | redis::ErrorKind::TryAgain => GuardError::StoreUnavailable(err.to_string()),
            _ => GuardError::StoreProtocol(err.to_string()),
        }
    }
}

// implement conversions from serde_json::Error to GuardError
impl From<serde_json::Error> for GuardError {
    fn from(err: serde_json::Error) -> Self {
        GuardError::Serialization(err.to_string())
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, GuardError>;

/// Validates a key before any store call.
pub(crate) fn ensure_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(GuardError::invalid("key must not be empty"));
    }
    Ok(())
}
