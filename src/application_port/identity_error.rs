use crate::domain_port::SessionError;

#[derive(Debug, thiserror::Error)]
pub enum IdentityStoreError {
    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: &'static str, reason: String },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("more than one user found with the same {field}: {value:?}")]
    NonUniqueResult { field: &'static str, value: String },
    #[error("user store has been disposed")]
    Disposed,
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IdentityStoreError {
    pub fn blank(name: &'static str) -> Self {
        IdentityStoreError::InvalidArgument {
            name,
            reason: "must not be empty or whitespace".to_string(),
        }
    }

    pub fn unsaved(name: &'static str) -> Self {
        IdentityStoreError::InvalidArgument {
            name,
            reason: "user has no id, create it first".to_string(),
        }
    }
}

pub fn require_non_blank<'a>(value: &'a str, name: &'static str) -> Result<&'a str, IdentityStoreError> {
    if value.trim().is_empty() {
        Err(IdentityStoreError::blank(name))
    } else {
        Ok(value)
    }
}
