//! Tipos de evento de la cola y estructura `QueueEvent`.
//!
//! Para un mismo runnable los eventos llegan en orden total:
//! `Enqueued`, `Started`, `Progress`*, y exactamente un terminal
//! (`Finished` o `Interrupted`). Un runnable cancelado antes de empezar
//! emite `Interrupted` sin `Started`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;

use crate::errors::RunError;
use crate::progress::ProgressSnapshot;
use crate::runnable::Runnable;

/// Causa de un `Interrupted`.
#[derive(Debug, Clone)]
pub enum InterruptReason {
    /// Cancelación cooperativa. `before_start` indica que el cuerpo nunca
    /// llegó a ejecutarse.
    Cancelled { before_start: bool },
    /// El cuerpo devolvió error o entró en pánico.
    Failed(RunError),
}

impl InterruptReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InterruptReason::Cancelled { .. })
    }
}

#[derive(Debug, Clone)]
pub enum QueueEventKind {
    Enqueued,
    Started,
    Progress(ProgressSnapshot),
    Finished,
    /// `log` contiene las líneas registradas hasta la interrupción.
    Interrupted { reason: InterruptReason, log: Vec<String> },
}

/// Discriminante sin datos, para filtrar suscripciones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    Enqueued,
    Started,
    Progress,
    Finished,
    Interrupted,
}

impl QueueEventKind {
    pub fn kind(&self) -> EventKind {
        match self {
            QueueEventKind::Enqueued => EventKind::Enqueued,
            QueueEventKind::Started => EventKind::Started,
            QueueEventKind::Progress(_) => EventKind::Progress,
            QueueEventKind::Finished => EventKind::Finished,
            QueueEventKind::Interrupted { .. } => EventKind::Interrupted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEventKind::Finished | QueueEventKind::Interrupted { .. })
    }
}

#[derive(Clone)]
pub struct QueueEvent {
    pub seq: u64, // asignado por la cola (orden de emisión)
    pub runnable: Arc<Runnable>,
    pub kind: QueueEventKind,
    pub ts: DateTime<Utc>,
}

impl fmt::Debug for QueueEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueEvent")
         .field("seq", &self.seq)
         .field("runnable", &self.runnable.label())
         .field("kind", &self.kind)
         .field("ts", &self.ts)
         .finish()
    }
}
