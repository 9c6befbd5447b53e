//! Constantes del generador.
//!
//! `BATCHING_VERSION` participa en el fingerprint de cada `IterationStep`: si
//! cambia la semántica del agrupamiento, los fingerprints cambian aunque las
//! slots y la configuración sean idénticas.

/// Versión lógica del algoritmo de agrupamiento.
pub const BATCHING_VERSION: &str = "B1.0";

/// Representación textual del valor ausente (⊥) en claves y mensajes.
pub const MISSING_VALUE_DISPLAY: &str = "⊥";
