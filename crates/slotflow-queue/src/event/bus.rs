//! Bus de eventos con suscripciones explícitas.
//!
//! `subscribe` devuelve un `Subscription`; soltarlo desuscribe. Los
//! listeners se invocan sincrónicamente en el hilo que publica (el worker de
//! la cola) y deben retornar rápido.

use log::error;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use super::{EventKind, QueueEvent};

pub type Listener = Arc<dyn Fn(&QueueEvent) + Send + Sync>;

struct Entry {
    kinds: Option<BTreeSet<EventKind>>,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    entries: BTreeMap<u64, Entry>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Suscribe a todos los eventos.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
        where F: Fn(&QueueEvent) + Send + Sync + 'static
    {
        self.register(None, Arc::new(listener))
    }

    /// Suscribe sólo a los tipos dados.
    pub fn subscribe_to<F>(&self, kinds: impl IntoIterator<Item = EventKind>, listener: F) -> Subscription
        where F: Fn(&QueueEvent) + Send + Sync + 'static
    {
        self.register(Some(kinds.into_iter().collect()), Arc::new(listener))
    }

    fn register(&self, kinds: Option<BTreeSet<EventKind>>, listener: Listener) -> Subscription {
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.entries.insert(id, Entry { kinds, listener });
        Subscription { id,
                       registry: Arc::downgrade(&self.registry),
                       active: true }
    }

    /// Entrega `event` a cada listener interesado, en orden de suscripción.
    /// Un listener que entra en pánico se registra y no afecta a los demás.
    pub fn publish(&self, event: &QueueEvent) {
        let kind = event.kind.kind();
        let listeners: Vec<Listener> = self.registry
                                           .lock()
                                           .entries
                                           .values()
                                           .filter(|e| e.kinds.as_ref().map_or(true, |k| k.contains(&kind)))
                                           .map(|e| Arc::clone(&e.listener))
                                           .collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!("listener panicked while handling {:?} of `{}`", kind, event.runnable.label());
            }
        }
    }

    pub fn listener_count(&self) -> usize {
        self.registry.lock().entries.len()
    }
}

/// Handle de una suscripción. Al soltarse se desuscribe.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
    active: bool,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Mantiene el listener registrado mientras viva el bus.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().entries.remove(&self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::QueueEventKind;
    use crate::runnable::Runnable;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: QueueEventKind) -> QueueEvent {
        QueueEvent { seq: 0,
                     runnable: Runnable::new("job", |_| Ok(())),
                     kind,
                     ts: Utc::now() }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = bus.subscribe(move |_| {
                         h.fetch_add(1, Ordering::SeqCst);
                     });
        bus.publish(&event(QueueEventKind::Started));
        drop(sub);
        bus.publish(&event(QueueEventKind::Started));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn filtered_subscription_and_detach() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        bus.subscribe_to([EventKind::Finished], move |_| {
               h.fetch_add(1, Ordering::SeqCst);
           })
           .detach();
        bus.publish(&event(QueueEventKind::Started));
        bus.publish(&event(QueueEventKind::Finished));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn panicking_listener_does_not_starve_others() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let _a = bus.subscribe(|_| panic!("boom"));
        let _b = bus.subscribe(move |_| {
                        h.fetch_add(1, Ordering::SeqCst);
                    });
        bus.publish(&event(QueueEventKind::Enqueued));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
