use thiserror::Error;

#[derive(Debug, Error)]
pub enum PerformanceError {
    #[error("unknown export format `{0}`, expected `json` or `csv`")]
    UnknownFormat(String),
    #[error("failed to serialize metrics: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to format metric timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
}
