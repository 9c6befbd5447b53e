//! slotflow-queue: cola secuencial de trabajos con cancelación cooperativa y
//! progreso jerárquico.
//!
//! - `Runnable`: label + cuerpo `FnOnce(&ProgressContext)`.
//! - `ProgressContext`: árbol de ámbitos con flag de cancelación atómico y
//!   log retenido.
//! - `RunnableQueue`: un único worker, FIFO, eventos entregados en el hilo
//!   del worker.
//!
//! No hay instancia global: cada cola se construye explícitamente.

pub mod errors;
pub mod event;
pub mod progress;
pub mod queue;
pub mod runnable;
pub mod status;

pub use errors::{QueueError, RunError};
pub use event::{EventBus, EventKind, InterruptReason, QueueEvent, QueueEventKind, Subscription};
pub use progress::{ProgressContext, ProgressSink, ProgressSnapshot};
pub use queue::{QueueSettings, RunnableQueue};
pub use runnable::{RunBody, Runnable};
pub use status::RunnableState;
