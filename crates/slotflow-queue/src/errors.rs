//! Errores de ejecución y de la cola.

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Resultado no exitoso del cuerpo de un `Runnable`.
///
/// `Cancelled` no es un fallo: los suscriptores lo distinguen vía
/// `InterruptReason`.
#[derive(Debug, Clone, Error)]
pub enum RunError {
    #[error("cancelled")]
    Cancelled,
    #[error("{message}")]
    Failed {
        message: String,
        #[source]
        cause: Option<Arc<dyn StdError + Send + Sync>>,
    },
    #[error("panicked: {0}")]
    Panicked(String),
}

impl RunError {
    pub fn failed(message: impl Into<String>) -> Self {
        RunError::Failed { message: message.into(),
                           cause: None }
    }

    /// Envuelve un error arbitrario conservándolo como causa.
    pub fn from_error<E>(error: E) -> Self
        where E: StdError + Send + Sync + 'static
    {
        RunError::Failed { message: error.to_string(),
                           cause: Some(Arc::new(error)) }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunError::Cancelled)
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync)> {
        match self {
            RunError::Failed { cause, .. } => cause.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to spawn worker for queue `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}
