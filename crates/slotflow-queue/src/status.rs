use serde::{Deserialize, Serialize};

/// Estado de un `Runnable`.
///
/// Transiciones válidas:
/// - `Created` -> `Enqueued`
/// - `Enqueued` -> `Running`
/// - `Enqueued` -> `Interrupted` (cancelado antes de empezar)
/// - `Running` -> `Finished`
/// - `Running` -> `Interrupted`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunnableState {
    /// Creado, todavía fuera de cualquier cola.
    Created,
    /// En la lista de pendientes.
    Enqueued,
    /// El worker está ejecutando su cuerpo.
    Running,
    /// Terminó correctamente.
    Finished,
    /// Cancelado o fallido.
    Interrupted,
}

impl RunnableState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunnableState::Finished | RunnableState::Interrupted)
    }

    pub fn can_transition(self, to: RunnableState) -> bool {
        use RunnableState::*;
        matches!((self, to),
                 (Created, Enqueued)
                 | (Enqueued, Running)
                 | (Enqueued, Interrupted)
                 | (Running, Finished)
                 | (Running, Interrupted))
    }
}
