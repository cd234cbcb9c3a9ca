//! Error types for the crossbind type model.

/// Errors raised while parsing type specs or loading and querying the fact base.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid type spec '{input}': {detail}")]
    InvalidTypeSpec { input: String, detail: String },

    #[error("invalid fact base: {detail}")]
    InvalidFactBase { detail: String },

    #[error("unresolved type '{name}'")]
    UnresolvedType { name: String },

    #[error("generic parameter '{name}' is not declared in this context")]
    UnknownGeneric { name: String },

    #[error("unsupported fact base format '{extension}'")]
    UnsupportedFormat { extension: String },

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for crossbind-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
