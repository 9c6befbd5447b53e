//! Eventos de la cola y su bus de suscripción.

pub mod bus;
pub mod types;

pub use bus::{EventBus, Subscription};
pub use types::{EventKind, InterruptReason, QueueEvent, QueueEventKind};
