//! Hook error taxonomy
//!
//! Every failure the registry or service can report is a variant here, so the
//! HTTP layer can map them exhaustively instead of comparing strings.

use std::io;

use thiserror::Error;

/// Errors raised by the hook registry and hook service.
#[derive(Debug, Error)]
pub enum HookError {
    /// No hook with this id exists.
    #[error("hook not found: {0}")]
    NotFound(String),

    /// A hook with this id already exists.
    #[error("hook already exists: {0}")]
    AlreadyExists(String),

    /// The supplied token does not match the hook's token.
    #[error("invalid token for hook {0}")]
    InvalidToken(String),

    /// The hook exists but is disabled.
    #[error("hook is disabled: {0}")]
    Disabled(String),

    /// The hook payload failed validation.
    #[error("invalid hook configuration: {0}")]
    Validation(String),

    /// Storage or flag file I/O failed.
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The hook store could not be encoded or decoded.
    #[error("hook store serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HookError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        HookError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn validation(message: impl Into<String>) -> Self {
        HookError::Validation(message.into())
    }

    /// Stable machine-readable error code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            HookError::NotFound(_) => "not_found",
            HookError::AlreadyExists(_) => "already_exists",
            HookError::InvalidToken(_) => "invalid_token",
            HookError::Disabled(_) => "hook_disabled",
            HookError::Validation(_) => "validation_failed",
            HookError::Io { .. } | HookError::Serialization(_) => "io_error",
        }
    }

    /// Whether the caller can fix the request and retry.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, HookError::Io { .. } | HookError::Serialization(_))
    }
}
