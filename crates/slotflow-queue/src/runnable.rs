//! Unidad de trabajo ejecutada por la cola.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::RunError;
use crate::progress::ProgressContext;
use crate::status::RunnableState;

/// Cuerpo de un runnable. Debe consultar la cancelación de su contexto.
pub type RunBody = Box<dyn FnOnce(&ProgressContext) -> Result<(), RunError> + Send>;

struct Lifecycle {
    state: RunnableState,
    error: Option<RunError>,
    settled: bool,
}

pub struct Runnable {
    id: Uuid,
    label: String,
    progress: ProgressContext,
    body: Mutex<Option<RunBody>>,
    lifecycle: Mutex<Lifecycle>,
    settled: Condvar,
}

impl Runnable {
    pub fn new<F>(label: impl Into<String>, body: F) -> Arc<Self>
        where F: FnOnce(&ProgressContext) -> Result<(), RunError> + Send + 'static
    {
        let id = Uuid::new_v4();
        let label = label.into();
        Arc::new(Self { id,
                        progress: ProgressContext::new(id, label.clone()),
                        label,
                        body: Mutex::new(Some(Box::new(body))),
                        lifecycle: Mutex::new(Lifecycle { state: RunnableState::Created,
                                                          error: None,
                                                          settled: false }),
                        settled: Condvar::new() })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Contexto raíz. Lectura y cancelación son seguras desde cualquier hilo.
    pub fn progress(&self) -> &ProgressContext {
        &self.progress
    }

    pub fn state(&self) -> RunnableState {
        self.lifecycle.lock().state
    }

    /// Error del cuerpo si terminó `Interrupted` por fallo o cancelación.
    pub fn error(&self) -> Option<RunError> {
        self.lifecycle.lock().error.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.progress.is_cancelled()
    }

    /// Marca el runnable como cancelado. Sólo avisa al cuerpo; para sacarlo
    /// de la lista de pendientes usar `RunnableQueue::cancel`.
    pub fn cancel(&self) {
        self.progress.cancel();
    }

    /// Espera a que los eventos terminales se hayan entregado. `None` espera
    /// sin límite. Devuelve `false` si venció el plazo.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        match timeout {
            None => {
                while !lifecycle.settled {
                    self.settled.wait(&mut lifecycle);
                }
                true
            }
            Some(timeout) => {
                let deadline = Instant::now() + timeout;
                while !lifecycle.settled {
                    if self.settled.wait_until(&mut lifecycle, deadline).timed_out() {
                        break;
                    }
                }
                lifecycle.settled
            }
        }
    }

    pub(crate) fn take_body(&self) -> Option<RunBody> {
        self.body.lock().take()
    }

    /// Aplica la transición si es válida.
    pub(crate) fn transition(&self, to: RunnableState) -> bool {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state.can_transition(to) {
            lifecycle.state = to;
            true
        } else {
            false
        }
    }

    pub(crate) fn record_error(&self, error: RunError) {
        self.lifecycle.lock().error = Some(error);
    }

    pub(crate) fn settle(&self) {
        self.lifecycle.lock().settled = true;
        self.settled.notify_all();
    }
}

impl fmt::Debug for Runnable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runnable")
         .field("id", &self.id)
         .field("label", &self.label)
         .field("state", &self.state())
         .finish()
    }
}
