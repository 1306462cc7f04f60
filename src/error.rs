use std::io;

/// Custom error type for simple_site_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("Archive download failed: {0}")]
    Transport(String),

    #[error("Archive extraction failed: {0}")]
    Extraction(String),

    #[error("Site build failed: {0}")]
    Build(String),

    #[error("Listing bucket objects failed: {0}")]
    StorageList(String),

    #[error("Deleting bucket objects failed: {0}")]
    StorageDelete(String),

    #[error("Upload failed for {} of {} files: {}", failed.len(), failed.len() + uploaded, failed.join(", "))]
    StorageUpload { failed: Vec<String>, uploaded: usize },

    #[error("Webhook validation failed: {0}")]
    Auth(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),
}

impl DeployError {
    /// Short stable label used in log fields and deployment records.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Transport(_) => "transport",
            DeployError::Extraction(_) => "extraction",
            DeployError::Build(_) => "build",
            DeployError::StorageList(_) => "storage_list",
            DeployError::StorageDelete(_) => "storage_delete",
            DeployError::StorageUpload { .. } => "storage_upload",
            DeployError::Auth(_) => "auth",
            DeployError::ConfigError(_) => "config",
            DeployError::IoError(_) => "io",
            DeployError::TomlParseError(_) => "toml",
        }
    }
}

/// Helper type for Results that use DeployError
pub type Result<T> = std::result::Result<T, DeployError>;
