use thiserror::Error;

#[derive(Error, Debug)]
pub enum SnifferError {
    #[error("invalid ratio {0}: must be finite and non-negative")]
    InvalidRatio(f64),

    #[error("capture error: {0}")]
    Capture(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnifferError>;
