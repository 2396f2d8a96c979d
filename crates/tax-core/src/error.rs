use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Unknown asset id: {0}")]
    UnknownAsset(u32),

    #[error("Unknown event id: {0}")]
    UnknownEvent(u32),

    #[error("Inconsistent event: {0}")]
    InconsistentEvent(String),

    #[error("Report sink error: {0}")]
    Sink(String),
}
