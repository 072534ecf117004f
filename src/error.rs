//! Error types for run configuration and backend calls.
//!
//! Client-side problems (`ConfigError`) never reach the network layer; backend and
//! transport failures (`ClientError`) are values the caller turns into a notice.

/// Problems detected while building or submitting a run configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Run name '{name}' {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("Run configuration is incomplete: missing {}", missing.join(", "))]
    Incomplete { missing: Vec<&'static str> },
}

impl ConfigError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Field the error is scoped to, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ConfigError::Validation { field, .. } => Some(field),
            ConfigError::InvalidName { .. } => Some("name"),
            ConfigError::Incomplete { .. } => None,
        }
    }
}

/// Failure of a backend call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// The server answered with an error payload; the message is shown verbatim.
    #[error("{0}")]
    Backend(String),

    /// The request itself failed. The message is generic; the cause goes to the log.
    #[error("{0}")]
    Transport(String),
}

impl ClientError {
    pub fn message(&self) -> &str {
        match self {
            ClientError::Backend(m) | ClientError::Transport(m) => m,
        }
    }
}

/// Anything that can stop the wizard from advancing or submitting.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WizardError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("A submission is already in progress")]
    Busy,
}
