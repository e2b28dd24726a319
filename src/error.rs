use thiserror::Error;

/// Pre-parse rejection of an input file. Messages name the file, never its bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SecurityError {
    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("file too large: {name} is {size} bytes (limit {limit})")]
    FileTooLarge { name: String, size: u64, limit: u64 },

    #[error("unsupported file type: {ext} ({name})")]
    UnsupportedType { name: String, ext: String },

    #[error("could not read {name}: {reason}")]
    Unreadable { name: String, reason: String },
}

/// Structural problems in a parsed table.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no data")]
    NoData,

    #[error("missing required columns: {0:?}")]
    MissingColumns(Vec<String>),

    #[error("missing columns for metrics calculation: {0:?}")]
    MissingMetricsColumns(Vec<String>),
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("security check failed: {0}")]
    Security(#[from] SecurityError),

    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Malformed content reported by the tabular reader.
    #[error("could not parse {file}: {reason}")]
    Parse { file: String, reason: String },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl JournalError {
    pub fn parse(file: &str, reason: impl std::fmt::Display) -> Self {
        JournalError::Parse {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly tag used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            JournalError::Security(_) => "security",
            JournalError::Validation(_) => "validation",
            JournalError::Parse { .. } => "parse",
            JournalError::Storage(_) => "storage",
            JournalError::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, JournalError>;
