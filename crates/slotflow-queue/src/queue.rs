//! `RunnableQueue`: un worker dedicado que ejecuta runnables de a uno.
//!
//! Invariantes:
//! - FIFO entre pendientes; exactamente un runnable en ejecución a la vez.
//! - Todos los eventos se entregan en el hilo del worker, en orden de
//!   emisión. Los que se originan en otros hilos (`enqueue`, `cancel`) pasan
//!   por una bandeja de salida que el worker vacía.
//! - `Runnable::wait` retorna después de que el evento terminal fue
//!   entregado a todos los suscriptores.

use chrono::Utc;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::errors::{QueueError, RunError};
use crate::event::{EventBus, EventKind, InterruptReason, QueueEvent, QueueEventKind, Subscription};
use crate::progress::{ProgressSink, ProgressSnapshot};
use crate::runnable::Runnable;
use crate::status::RunnableState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSettings {
    /// Nombre de la cola y de su hilo worker.
    pub name: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self { name: "default".to_string() }
    }
}

impl QueueSettings {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<Arc<Runnable>>,
    current: Option<Arc<Runnable>>,
    outbox: VecDeque<QueueEvent>,
    /// Un evento sacado de la bandeja se está entregando.
    delivering: bool,
    shutdown: bool,
}

impl QueueState {
    fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.current.is_none() && self.outbox.is_empty() && !self.delivering
    }
}

struct Shared {
    name: String,
    state: Mutex<QueueState>,
    wake: Condvar,
    idle: Condvar,
    bus: EventBus,
    seq: AtomicU64,
    flushing: AtomicBool,
    worker: OnceCell<ThreadId>,
}

pub struct RunnableQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl RunnableQueue {
    /// Crea la cola y arranca su worker.
    pub fn new(settings: QueueSettings) -> Result<Self, QueueError> {
        let shared = Arc::new(Shared { name: settings.name.clone(),
                                       state: Mutex::new(QueueState::default()),
                                       wake: Condvar::new(),
                                       idle: Condvar::new(),
                                       bus: EventBus::new(),
                                       seq: AtomicU64::new(0),
                                       flushing: AtomicBool::new(false),
                                       worker: OnceCell::new() });
        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new().name(format!("slotflow-queue-{}", settings.name))
                                           .spawn(move || worker_loop(worker_shared))
                                           .map_err(|source| QueueError::Spawn { name: settings.name,
                                                                                 source })?;
        Ok(Self { shared,
                  worker: Some(handle) })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Agrega el runnable al final de la lista. No bloquea. Un runnable que
    /// ya pasó por una cola se ignora.
    pub fn enqueue(&self, runnable: &Arc<Runnable>) {
        if !runnable.transition(RunnableState::Enqueued) {
            warn!("queue `{}`: runnable `{}` was already enqueued once, ignoring",
                  self.shared.name,
                  runnable.label());
            return;
        }
        let mut state = self.shared.state.lock();
        self.shared.push_event(&mut state, runnable, QueueEventKind::Enqueued);
        if state.shutdown {
            self.shared.interrupt_pending(&mut state, runnable);
        } else {
            state.pending.push_back(Arc::clone(runnable));
        }
        self.shared.wake.notify_all();
    }

    /// Cancela el runnable. Si está pendiente se quita de la lista y se
    /// reporta `Interrupted` sin ejecutarse; si está en ejecución sólo se
    /// marca el flag. Idempotente.
    pub fn cancel(&self, runnable: &Runnable) {
        self.cancel_id(runnable.id());
    }

    /// Igual que `cancel`, por id. Devuelve `true` si el runnable estaba
    /// pendiente o en ejecución en esta cola.
    pub fn cancel_id(&self, id: Uuid) -> bool {
        let mut state = self.shared.state.lock();
        if let Some(pos) = state.pending.iter().position(|r| r.id() == id) {
            if let Some(runnable) = state.pending.remove(pos) {
                runnable.cancel();
                self.shared.interrupt_pending(&mut state, &runnable);
                self.shared.wake.notify_all();
            }
            return true;
        }
        match &state.current {
            Some(current) if current.id() == id => {
                current.cancel();
                true
            }
            _ => false,
        }
    }

    /// Cancela todos los pendientes y devuelve cuántos eran.
    pub fn clear_pending(&self) -> usize {
        let mut state = self.shared.state.lock();
        let drained: Vec<Arc<Runnable>> = state.pending.drain(..).collect();
        for runnable in &drained {
            runnable.cancel();
            self.shared.interrupt_pending(&mut state, runnable);
        }
        self.shared.wake.notify_all();
        drained.len()
    }

    /// Cancela pendientes y el runnable en ejecución.
    pub fn cancel_all(&self) {
        self.clear_pending();
        if let Some(current) = self.current_runnable() {
            current.cancel();
        }
    }

    pub fn current_runnable(&self) -> Option<Arc<Runnable>> {
        self.shared.state.lock().current.clone()
    }

    pub fn pending(&self) -> Vec<Arc<Runnable>> {
        self.shared.state.lock().pending.iter().cloned().collect()
    }

    /// Pendientes más el que está en ejecución.
    pub fn len(&self) -> usize {
        let state = self.shared.state.lock();
        state.pending.len() + usize::from(state.current.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sin trabajo ni eventos por entregar.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().is_idle()
    }

    /// Bloquea hasta que la cola quede ociosa. `false` si venció el plazo.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            if self.shared.idle.wait_until(&mut state, deadline).timed_out() {
                return state.is_idle();
            }
        }
        true
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
        where F: Fn(&QueueEvent) + Send + Sync + 'static
    {
        self.shared.bus.subscribe(listener)
    }

    pub fn subscribe_to<F>(&self, kinds: impl IntoIterator<Item = EventKind>, listener: F) -> Subscription
        where F: Fn(&QueueEvent) + Send + Sync + 'static
    {
        self.shared.bus.subscribe_to(kinds, listener)
    }

    pub fn on_enqueued(&self, listener: impl Fn(&Arc<Runnable>) + Send + Sync + 'static) -> Subscription {
        self.subscribe_to([EventKind::Enqueued], move |e| listener(&e.runnable))
    }

    pub fn on_started(&self, listener: impl Fn(&Arc<Runnable>) + Send + Sync + 'static) -> Subscription {
        self.subscribe_to([EventKind::Started], move |e| listener(&e.runnable))
    }

    pub fn on_progress(&self,
                       listener: impl Fn(&Arc<Runnable>, &ProgressSnapshot) + Send + Sync + 'static)
                       -> Subscription {
        self.subscribe_to([EventKind::Progress], move |e| {
                if let QueueEventKind::Progress(snapshot) = &e.kind {
                    listener(&e.runnable, snapshot);
                }
            })
    }

    pub fn on_finished(&self, listener: impl Fn(&Arc<Runnable>) + Send + Sync + 'static) -> Subscription {
        self.subscribe_to([EventKind::Finished], move |e| listener(&e.runnable))
    }

    pub fn on_interrupted(&self,
                          listener: impl Fn(&Arc<Runnable>, &InterruptReason, &[String]) + Send + Sync + 'static)
                          -> Subscription {
        self.subscribe_to([EventKind::Interrupted], move |e| {
                if let QueueEventKind::Interrupted { reason, log } = &e.kind {
                    listener(&e.runnable, reason, log);
                }
            })
    }
}

impl Drop for RunnableQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            let drained: Vec<Arc<Runnable>> = state.pending.drain(..).collect();
            for runnable in &drained {
                runnable.cancel();
                self.shared.interrupt_pending(&mut state, runnable);
            }
            if let Some(current) = &state.current {
                current.cancel();
            }
            self.shared.wake.notify_all();
        }
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Shared {
    fn push_event(&self, state: &mut QueueState, runnable: &Arc<Runnable>, kind: QueueEventKind) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        state.outbox.push_back(QueueEvent { seq,
                                            runnable: Arc::clone(runnable),
                                            kind,
                                            ts: Utc::now() });
    }

    /// Interrupted de un runnable que nunca arrancó.
    fn interrupt_pending(&self, state: &mut QueueState, runnable: &Arc<Runnable>) {
        if runnable.transition(RunnableState::Interrupted) {
            runnable.record_error(RunError::Cancelled);
            debug!("queue `{}`: `{}` cancelled before start", self.name, runnable.label());
            let kind = QueueEventKind::Interrupted { reason: InterruptReason::Cancelled { before_start: true },
                                                     log: runnable.progress().log_lines() };
            self.push_event(state, runnable, kind);
        }
    }

    fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    /// Entrega la bandeja de salida. Sólo en el hilo worker; una llamada
    /// reentrante (desde un listener) no hace nada y el bucle externo
    /// continúa.
    fn flush(&self) {
        if !self.is_worker_thread() || self.flushing.swap(true, Ordering::AcqRel) {
            return;
        }
        loop {
            let next = {
                let mut state = self.state.lock();
                let next = state.outbox.pop_front();
                state.delivering = next.is_some();
                next
            };
            let Some(event) = next else {
                break;
            };
            self.bus.publish(&event);
            if event.kind.is_terminal() {
                event.runnable.settle();
            }
        }
        self.flushing.store(false, Ordering::Release);
    }

    fn run(self: &Arc<Self>, runnable: Arc<Runnable>) {
        if runnable.is_cancelled() {
            let mut state = self.state.lock();
            state.current = None;
            self.interrupt_pending(&mut state, &runnable);
            drop(state);
            self.flush();
            return;
        }
        if !runnable.transition(RunnableState::Running) {
            warn!("queue `{}`: `{}` is not runnable ({:?})", self.name, runnable.label(), runnable.state());
            self.state.lock().current = None;
            return;
        }
        info!("queue `{}`: started `{}`", self.name, runnable.label());
        {
            let mut state = self.state.lock();
            self.push_event(&mut state, &runnable, QueueEventKind::Started);
        }
        self.flush();

        let sink: Arc<dyn ProgressSink> = Arc::new(QueueSink { shared: Arc::downgrade(self),
                                                               runnable: Arc::downgrade(&runnable) });
        runnable.progress().attach_sink(sink);
        let result = match runnable.take_body() {
            Some(body) => catch_unwind(AssertUnwindSafe(|| body(runnable.progress())))
                .unwrap_or_else(|payload| Err(RunError::Panicked(panic_message(payload.as_ref())))),
            None => Err(RunError::failed("runnable body was already consumed")),
        };
        runnable.progress().detach_sink();

        let kind = match result {
            Ok(()) => {
                runnable.transition(RunnableState::Finished);
                info!("queue `{}`: finished `{}`", self.name, runnable.label());
                QueueEventKind::Finished
            }
            Err(error) => {
                runnable.transition(RunnableState::Interrupted);
                let reason = if error.is_cancelled() {
                    info!("queue `{}`: `{}` cancelled", self.name, runnable.label());
                    InterruptReason::Cancelled { before_start: false }
                } else {
                    warn!("queue `{}`: `{}` failed: {}", self.name, runnable.label(), error);
                    InterruptReason::Failed(error.clone())
                };
                runnable.record_error(error);
                QueueEventKind::Interrupted { reason,
                                              log: runnable.progress().log_lines() }
            }
        };
        {
            let mut state = self.state.lock();
            state.current = None;
            self.push_event(&mut state, &runnable, kind);
        }
        self.flush();
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let _ = shared.worker.set(thread::current().id());
    info!("queue `{}`: worker started", shared.name);
    loop {
        shared.flush();
        let next = {
            let mut state = shared.state.lock();
            if state.shutdown {
                None
            } else if let Some(runnable) = state.pending.pop_front() {
                state.current = Some(Arc::clone(&runnable));
                Some(runnable)
            } else {
                if state.outbox.is_empty() {
                    shared.idle.notify_all();
                    shared.wake.wait(&mut state);
                }
                continue;
            }
        };
        match next {
            Some(runnable) => shared.run(runnable),
            None => break,
        }
    }
    shared.flush();
    shared.idle.notify_all();
    info!("queue `{}`: worker stopped", shared.name);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Reenvía el progreso del runnable en curso como eventos de la cola.
struct QueueSink {
    shared: Weak<Shared>,
    runnable: Weak<Runnable>,
}

impl ProgressSink for QueueSink {
    fn on_progress(&self, snapshot: ProgressSnapshot) {
        let (Some(shared), Some(runnable)) = (self.shared.upgrade(), self.runnable.upgrade()) else {
            return;
        };
        {
            let mut state = shared.state.lock();
            shared.push_event(&mut state, &runnable, QueueEventKind::Progress(snapshot));
        }
        shared.flush();
    }
}
