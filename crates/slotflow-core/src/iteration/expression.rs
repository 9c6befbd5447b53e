//! Contrato para columnas de referencia derivadas por expresión.
//!
//! El generador no conoce ninguna sintaxis de expresiones: recibe un
//! evaluador inyectado que, dada la anotación de una fila, devuelve la clave
//! de esa fila (nombre de columna -> valor). Las columnas que una fila no
//! devuelve se tratan como ⊥.

use std::collections::BTreeMap;
use thiserror::Error;

use crate::annotation::AnnotationSet;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ExpressionError(pub String);

/// Evaluador de claves por fila.
pub trait KeyExpression: Send + Sync {
    /// Clave de la fila. Debe ser determinista y sin efectos secundarios.
    fn evaluate(&self, annotations: &AnnotationSet) -> Result<BTreeMap<String, String>, ExpressionError>;

    /// Texto legible para logs.
    fn describe(&self) -> String {
        "custom key expression".to_string()
    }
}

impl<F> KeyExpression for F where F: Fn(&AnnotationSet) -> Result<BTreeMap<String, String>, ExpressionError> + Send + Sync
{
    fn evaluate(&self, annotations: &AnnotationSet) -> Result<BTreeMap<String, String>, ExpressionError> {
        self(annotations)
    }
}
