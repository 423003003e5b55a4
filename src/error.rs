use thiserror::Error;

#[derive(Error, Debug)]
pub enum RevenueError {
    #[error("No recognizable revenue sources found among {0} input(s)")]
    NoSources(usize),

    #[error("Source '{source_id}' has an unrecognized schema: {details}")]
    Schema { source_id: String, details: String },

    #[error("Source '{source_id}' was not recognized: {details}")]
    UnrecognizedSource { source_id: String, details: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid month {0}: must be between 1 and 12")]
    InvalidMonth(u32),

    #[error("Verification failed: {0}")]
    VerificationFailed(String),

    #[error("Annotation store error: {0}")]
    AnnotationStore(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl RevenueError {
    pub fn schema(source_id: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Schema {
            source_id: source_id.into(),
            details: details.into(),
        }
    }

    /// Per-source failures are skipped during a load; everything else aborts it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Schema { .. } | Self::UnrecognizedSource { .. })
    }
}

pub type Result<T> = std::result::Result<T, RevenueError>;
