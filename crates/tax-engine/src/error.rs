use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Import error: {0}")]
    Import(#[from] broker_import::ImportError),

    /// The global event ordering cannot be trusted; the run must abort
    /// rather than produce a silently wrong report.
    #[error("Sort key integrity failure:\n{0}")]
    SortKeyConflict(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),
}
