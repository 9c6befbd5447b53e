//! Errores del generador de pasos.
//!
//! Dos familias conviven en el mismo enum:
//! - configuración (`DuplicateMatch`, `UnknownColumn`, ...): se acumulan en
//!   `GenerationOutcome::issues` para mostrarlas todas antes de ejecutar.
//! - evaluación (`Expression`, `MergeConflict`): atribuidas a una fila
//!   concreta; el resto de filas sigue su curso.
//!
//! Sólo `DuplicateSlot` y `ErrorDensityExceeded` abortan `generate` con
//! `Err`; `InvalidLimit` y `MissingExpression` surgen al resolver
//! `MatchingParams`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum BatchingError {
    #[error("slot name `{0}` appears more than once")]
    DuplicateSlot(String),
    #[error("slot `{slot}` has {} rows matching [{key}] but merging is disabled", .rows.len())]
    DuplicateMatch { slot: String, key: String, rows: Vec<usize> },
    #[error("custom column `{0}` does not appear in any slot")]
    UnknownColumn(String),
    #[error("invalid column name `{0}`")]
    InvalidColumnName(String),
    #[error("key expression failed on {slot}[{row}]: {message}")]
    Expression { slot: String, row: usize, message: String },
    #[error("annotation `{name}` conflicts on {slot}[{row}]: `{existing}` vs `{incoming}`")]
    MergeConflict {
        slot: String,
        row: usize,
        name: String,
        existing: String,
        incoming: String,
    },
    #[error("{failed} of {total} rows failed evaluation (allowed fraction {max_fraction})")]
    ErrorDensityExceeded { failed: usize, total: usize, max_fraction: f64 },
    #[error("invalid limit expression `{0}`")]
    InvalidLimit(String),
    #[error("expression-derived matching requires a key expression")]
    MissingExpression,
}

impl BatchingError {
    /// Problemas que impiden una ejecución correcta y deben resolverse antes
    /// de encolar el nodo.
    pub fn is_configuration(&self) -> bool {
        matches!(self,
                 BatchingError::DuplicateSlot(_)
                 | BatchingError::DuplicateMatch { .. }
                 | BatchingError::UnknownColumn(_)
                 | BatchingError::InvalidColumnName(_)
                 | BatchingError::InvalidLimit(_)
                 | BatchingError::MissingExpression)
    }

    /// Errores atribuidos a una fila concreta durante la evaluación.
    pub fn is_evaluation(&self) -> bool {
        matches!(self, BatchingError::Expression { .. } | BatchingError::MergeConflict { .. })
    }

    /// Slot y fila a la que se atribuye el problema, si aplica.
    pub fn location(&self) -> Option<(&str, usize)> {
        match self {
            BatchingError::Expression { slot, row, .. } | BatchingError::MergeConflict { slot, row, .. } => {
                Some((slot.as_str(), *row))
            }
            _ => None,
        }
    }
}
