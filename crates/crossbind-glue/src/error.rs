//! Glue generation error types.

use crossbind_core::CoreError;

use crate::diagnostic::ErrorCode;

/// Errors raised while generating glue.
#[derive(Debug, thiserror::Error)]
pub enum GlueError {
    /// No compatible wrapper or vtable counterpart. Recoverable: the member
    /// is skipped.
    #[error("structural mismatch for '{member}': {detail}")]
    StructuralMismatch { member: String, detail: String },

    /// A construct outside the handled cases.
    #[error("[{code}] unsupported in '{member}': {detail}")]
    Unsupported {
        code: ErrorCode,
        member: String,
        detail: String,
    },

    /// A state upstream invariants should have ruled out.
    #[error("[{code}] internal inconsistency: {detail}")]
    Internal { code: ErrorCode, detail: String },

    /// A referenced type, class, or protocol is missing from the fact base.
    #[error("unresolved reference '{name}'")]
    UnresolvedReference { name: String },

    #[error("invalid configuration: {detail}")]
    InvalidConfig { detail: String },

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error category, as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StructuralMismatch,
    Unsupported,
    Internal,
    UnresolvedReference,
    /// Malformed fact base, configuration, or file access.
    Input,
}

impl GlueError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GlueError::StructuralMismatch { .. } => ErrorKind::StructuralMismatch,
            GlueError::Unsupported { .. } => ErrorKind::Unsupported,
            GlueError::Internal { .. } => ErrorKind::Internal,
            GlueError::UnresolvedReference { .. } => ErrorKind::UnresolvedReference,
            GlueError::Core(CoreError::UnresolvedType { .. }) => ErrorKind::UnresolvedReference,
            GlueError::InvalidConfig { .. }
            | GlueError::Core(_)
            | GlueError::Toml(_)
            | GlueError::Io(_) => ErrorKind::Input,
        }
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            GlueError::StructuralMismatch { .. } => ErrorCode::G1001,
            GlueError::Unsupported { code, .. } | GlueError::Internal { code, .. } => *code,
            GlueError::InvalidConfig { .. } => ErrorCode::G4003,
            _ if self.kind() == ErrorKind::UnresolvedReference => ErrorCode::G4001,
            _ => ErrorCode::G4002,
        }
    }

    /// Only structural mismatches are caught at member granularity.
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::StructuralMismatch
    }

    pub(crate) fn unsupported(code: ErrorCode, member: impl Into<String>, detail: impl Into<String>) -> Self {
        GlueError::Unsupported {
            code,
            member: member.into(),
            detail: detail.into(),
        }
    }

    pub(crate) fn internal(code: ErrorCode, detail: impl Into<String>) -> Self {
        GlueError::Internal {
            code,
            detail: detail.into(),
        }
    }
}

/// Result type alias for glue operations.
pub type Result<T> = std::result::Result<T, GlueError>;
