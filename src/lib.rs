//! Slotflow
//!
//! Librería de integración sobre `slotflow-core` y `slotflow-queue`:
//! - `config`: variables de entorno (.env) y política por defecto.
//! - `errors`: `PipelineError`, el error de la capa de aplicación.
//! - `node`: un nodo del pipeline empaquetado como runnable de la cola.
//!
//! Puede usarse desde `main.rs` o por otros crates/clientes.

pub mod config;
pub mod errors;
pub mod node;

use once_cell::sync::OnceCell;
use slotflow_queue::RunnableQueue;

pub use config::{AppConfig, CONFIG};
pub use errors::PipelineError;
pub use node::{NodeRun, StepInputs, StepProcessor};

static DEFAULT_QUEUE: OnceCell<RunnableQueue> = OnceCell::new();

/// Cola compartida del proceso, creada a demanda con `CONFIG.queue_settings()`.
/// Vive hasta el final del proceso.
pub fn default_queue() -> Result<&'static RunnableQueue, PipelineError> {
    DEFAULT_QUEUE.get_or_try_init(|| Ok(RunnableQueue::new(CONFIG.queue_settings())?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_queue_is_shared() {
        let a = default_queue().unwrap();
        let b = default_queue().unwrap();
        assert!(std::ptr::eq(a, b));
        assert_eq!(a.name(), CONFIG.queue_name);
    }
}
