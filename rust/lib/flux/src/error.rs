use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("debounced dispatch requires a tokio runtime")]
    NoRuntime,
}

/// Reject empty keys before any state is touched.
pub(crate) fn validate_key(key: &str) -> Result<(), StateError> {
    if key.is_empty() {
        return Err(StateError::InvalidArgument("no key provided".to_string()));
    }
    Ok(())
}
