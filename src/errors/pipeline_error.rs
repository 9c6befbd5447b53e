use slotflow_core::BatchingError;
use slotflow_queue::{QueueError, RunError};
use thiserror::Error;

/// Error de nivel aplicación: agrupa los errores de los crates del núcleo.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Error de agrupamiento: {0}")]
    Batching(#[from] BatchingError),
    #[error("Configuración de matching inválida ({} problema(s)): {}", .0.len(), join_issues(.0))]
    InvalidMatching(Vec<BatchingError>),
    #[error("Error de ejecución: {0}")]
    Run(#[from] RunError),
    #[error("Error de cola: {0}")]
    Queue(#[from] QueueError),
    #[error("Error de configuración: {0}")]
    Config(String),
}

fn join_issues(issues: &[BatchingError]) -> String {
    issues.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

/// Dentro del cuerpo de un runnable, un `PipelineError` es un fallo (o la
/// cancelación original si venía de la cola).
impl From<PipelineError> for RunError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Run(run) => run,
            other => RunError::from_error(other),
        }
    }
}
