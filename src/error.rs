use thiserror::Error;

/// Main error type for camwatch
#[derive(Error, Debug)]
pub enum CamwatchError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// File system I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Object storage transfer errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Filesystem observer errors
    #[error("Watch error: {0}")]
    Watch(String),

    /// The upload succeeded but its status record could not be written
    #[error("Failed to record upload status for {file_name}: {source}")]
    StatusWrite {
        file_name: String,
        #[source]
        source: Box<CamwatchError>,
    },

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenient Result type using CamwatchError
pub type Result<T> = std::result::Result<T, CamwatchError>;
