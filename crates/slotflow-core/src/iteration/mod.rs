//! Generación de pasos de iteración (join por anotaciones).
//!
//! Flujo:
//! 1. `MatchingConfig` define las columnas de referencia y cómo se combinan
//!    las anotaciones.
//! 2. `generate` agrupa las filas de todas las slots por firma (valores de
//!    las columnas de referencia, ⊥ si faltan) y produce un `IterationStep`
//!    por firma, ordenado de forma total y estable.
//! 3. `skip_incomplete` y `limit` filtran el resultado ya ordenado.

mod config;
mod expression;
mod generator;
mod limit;
mod step;

pub use config::{ColumnMatching, ColumnStrategy, MatchingConfig, MatchingParams, HASH_PREFIX};
pub use expression::{ExpressionError, KeyExpression};
pub use generator::{generate, GenerationOutcome};
pub use limit::StepLimit;
pub use step::{DataAnnotationRef, IterationStep, SingleIterationStep, StepKey};
