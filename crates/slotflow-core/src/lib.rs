//! slotflow-core: agrupación determinista de filas en pasos de iteración.
//!
//! Un nodo del pipeline recibe varias `DataSlot` (tablas ordenadas de filas
//! anotadas) y necesita saber qué filas procesar juntas. Este crate resuelve
//! ese join por metadatos:
//! - `annotation`: pares nombre/valor y estrategias de merge de valores.
//! - `slot`: almacén append-only de filas (payload opaco + anotaciones).
//! - `iteration`: el generador de `IterationStep` y su configuración.
//! - `hashing`: JSON canónico + blake3 para fingerprints estables de pasos.
//!
//! El generador es una función pura: mismas slots + misma configuración
//! producen exactamente la misma lista de pasos.

pub mod annotation;
pub mod constants;
pub mod errors;
pub mod hashing;
pub mod iteration;
pub mod slot;

pub use annotation::{AnnotationSet, DataAnnotationMergeStrategy, MergeStrategy, TextAnnotation};
pub use errors::BatchingError;
pub use iteration::{generate, ColumnMatching, ColumnStrategy, DataAnnotationRef, ExpressionError, GenerationOutcome,
                    IterationStep, KeyExpression, MatchingConfig, MatchingParams, SingleIterationStep, StepKey,
                    StepLimit};
pub use slot::{DataContext, DataRow, DataSlot};
