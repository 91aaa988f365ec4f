use std::io;

/// Error type for simple_git_notifier operations
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unsupported protocol '{0}' (expected one of: git, ssh, https)")]
    UnsupportedProtocol(String),

    #[error("Git operation failed: {operation}\n{message}")]
    MirrorUpdateFailed { operation: String, message: String },

    #[error("Notifier invocation failed: {0}")]
    NotifierFailed(String),

    #[error("Notifier timed out after {secs}s")]
    NotifierTimeout { secs: u64 },

    #[error("Webhook validation failed: {0}")]
    WebhookValidationFailed(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

/// Helper type for Results that use NotifyError
pub type Result<T> = std::result::Result<T, NotifyError>;
