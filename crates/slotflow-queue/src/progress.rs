//! Contexto jerárquico de progreso y cancelación.
//!
//! Cada `Runnable` recibe un `ProgressContext` raíz. `resolve` abre un
//! ámbito hijo (p. ej. `"Batch 3/10"`); los mensajes de un hijo se publican
//! con la ruta completa de ancestros (`"Batch 3/10 > Slice 12/50 > msg"`).
//!
//! Cancelación: cada ámbito tiene un flag atómico. Un ámbito está cancelado
//! si lo está él o cualquiera de sus ancestros, por lo que cancelar la raíz
//! cancela todo el árbol. Las lecturas no toman locks.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::RunError;

/// Foto inmutable de una notificación de progreso.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub runnable: Uuid,
    pub path: Vec<String>,
    pub current: usize,
    pub max: usize,
    pub message: String,
}

impl fmt::Display for ProgressSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.path {
            write!(f, "{segment} > ")?;
        }
        f.write_str(&self.message)
    }
}

/// Destino de las notificaciones (lo instala la cola mientras el runnable
/// se ejecuta). Debe retornar rápido.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, snapshot: ProgressSnapshot);
}

struct Scope {
    cancelled: AtomicBool,
    parent: Option<Arc<Scope>>,
    children: Mutex<BTreeMap<String, Arc<Scope>>>,
}

impl Scope {
    fn new(parent: Option<Arc<Scope>>) -> Arc<Self> {
        Arc::new(Self { cancelled: AtomicBool::new(false),
                        parent,
                        children: Mutex::new(BTreeMap::new()) })
    }

    fn is_cancelled(&self) -> bool {
        let mut scope = Some(self);
        while let Some(s) = scope {
            if s.cancelled.load(Ordering::Acquire) {
                return true;
            }
            scope = s.parent.as_deref();
        }
        false
    }
}

struct Shared {
    runnable: Uuid,
    label: String,
    sink: RwLock<Option<Arc<dyn ProgressSink>>>,
    log: Mutex<Vec<String>>,
    latest: RwLock<Option<ProgressSnapshot>>,
}

/// Handle de progreso de un ámbito. Clonarlo es barato y comparte estado.
#[derive(Clone)]
pub struct ProgressContext {
    shared: Arc<Shared>,
    scope: Arc<Scope>,
    path: Vec<String>,
    current: usize,
    max: usize,
}

impl ProgressContext {
    pub fn new(runnable: Uuid, label: impl Into<String>) -> Self {
        let shared = Shared { runnable,
                              label: label.into(),
                              sink: RwLock::new(None),
                              log: Mutex::new(Vec::new()),
                              latest: RwLock::new(None) };
        Self { shared: Arc::new(shared),
               scope: Scope::new(None),
               path: Vec::new(),
               current: 0,
               max: 0 }
    }

    /// Ámbito hijo `label` en la posición `current` de `max` (se muestra
    /// 1-based). El ámbito se reutiliza entre llamadas con el mismo label.
    pub fn resolve(&self, label: &str, current: usize, max: usize) -> ProgressContext {
        let scope = Arc::clone(self.scope
                                   .children
                                   .lock()
                                   .entry(label.to_string())
                                   .or_insert_with(|| Scope::new(Some(Arc::clone(&self.scope)))));
        let segment = if max > 0 { format!("{label} {}/{max}", current + 1) } else { label.to_string() };
        let mut path = self.path.clone();
        path.push(segment);
        ProgressContext { shared: Arc::clone(&self.shared),
                          scope,
                          path,
                          current,
                          max }
    }

    /// Registra un mensaje en este ámbito, lo notifica al sink y devuelve la
    /// instantánea inmutable emitida.
    pub fn log(&self, message: impl Into<String>) -> ProgressSnapshot {
        let snapshot = ProgressSnapshot { runnable: self.shared.runnable,
                                          path: self.path.clone(),
                                          current: self.current,
                                          max: self.max,
                                          message: message.into() };
        self.shared.log.lock().push(snapshot.to_string());
        *self.shared.latest.write() = Some(snapshot.clone());
        let sink = self.shared.sink.read().clone();
        if let Some(sink) = sink {
            sink.on_progress(snapshot.clone());
        }
        snapshot
    }

    pub fn is_cancelled(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Cancela este ámbito y sus descendientes. Idempotente.
    pub fn cancel(&self) {
        self.scope.cancelled.store(true, Ordering::Release);
    }

    /// Punto de chequeo cooperativo: `Err(Cancelled)` si hay que parar.
    pub fn check_cancelled(&self) -> Result<(), RunError> {
        if self.is_cancelled() {
            Err(RunError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn runnable_id(&self) -> Uuid {
        self.shared.runnable
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn path_string(&self) -> String {
        self.path.join(" > ")
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn max(&self) -> usize {
        self.max
    }

    /// Líneas registradas por cualquier ámbito del mismo runnable.
    pub fn log_lines(&self) -> Vec<String> {
        self.shared.log.lock().clone()
    }

    pub fn latest(&self) -> Option<ProgressSnapshot> {
        self.shared.latest.read().clone()
    }

    pub(crate) fn attach_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.shared.sink.write() = Some(sink);
    }

    pub(crate) fn detach_sink(&self) {
        *self.shared.sink.write() = None;
    }
}

impl fmt::Debug for ProgressContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressContext")
         .field("runnable", &self.shared.runnable)
         .field("label", &self.shared.label)
         .field("path", &self.path)
         .field("cancelled", &self.is_cancelled())
         .finish()
    }
}
