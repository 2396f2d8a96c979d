use crate::error::CoreError;
use crate::realized::PipelineOutput;

/// Sink for the finished report.
///
/// The engine hands over the full pipeline output once; rendering
/// (console, PDF, files) is entirely the sink's concern.
pub trait ReportSink {
    fn emit(&mut self, output: &PipelineOutput) -> Result<(), CoreError>;
}
