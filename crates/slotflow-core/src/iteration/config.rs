//! Configuración del matching.
//!
//! `MatchingParams` es la forma serializable que guarda la aplicación (los
//! parámetros que el usuario ve en el nodo); `MatchingConfig` es la forma
//! resuelta que consume `generate`, con el evaluador de expresiones ya
//! inyectado.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use super::{KeyExpression, StepLimit};
use crate::annotation::{DataAnnotationMergeStrategy, MergeStrategy};
use crate::errors::BatchingError;

/// Prefijo de las anotaciones marcadas como clave (`#dataset`).
pub const HASH_PREFIX: &str = "#";

/// Cómo se determinan las columnas de referencia (clave del join).
#[derive(Clone)]
pub enum ColumnStrategy {
    /// Unión de todos los nombres de anotación de todas las slots.
    Union,
    /// Nombres presentes en todas las slots.
    Intersection,
    /// Como `Union`, pero sólo con los nombres que empiezan por el prefijo.
    PrefixUnion(String),
    /// Como `Intersection`, pero sólo con los nombres que empiezan por el
    /// prefijo.
    PrefixIntersection(String),
    /// Conjunto explícito; el resto de anotaciones sólo se mezcla.
    Custom(BTreeSet<String>),
    /// Clave calculada por fila mediante un evaluador externo.
    ExpressionDerived(Arc<dyn KeyExpression>),
    /// Un único paso con todas las filas.
    MergeAll,
    /// Un paso por fila, en orden de slot y fila.
    SplitAll,
}

impl fmt::Debug for ColumnStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnStrategy::Union => f.write_str("Union"),
            ColumnStrategy::Intersection => f.write_str("Intersection"),
            ColumnStrategy::PrefixUnion(p) => f.debug_tuple("PrefixUnion").field(p).finish(),
            ColumnStrategy::PrefixIntersection(p) => f.debug_tuple("PrefixIntersection").field(p).finish(),
            ColumnStrategy::Custom(cols) => f.debug_tuple("Custom").field(cols).finish(),
            ColumnStrategy::ExpressionDerived(e) => f.debug_tuple("ExpressionDerived").field(&e.describe()).finish(),
            ColumnStrategy::MergeAll => f.write_str("MergeAll"),
            ColumnStrategy::SplitAll => f.write_str("SplitAll"),
        }
    }
}

/// Configuración resuelta para `generate`.
#[derive(Debug, Clone)]
pub struct MatchingConfig {
    pub column_strategy: ColumnStrategy,
    pub merge_strategy: MergeStrategy,
    pub data_merge_strategy: DataAnnotationMergeStrategy,
    /// `false`: join estricto 1:1, más de una fila por slot y firma es un
    /// error de configuración.
    pub apply_merging: bool,
    pub skip_incomplete: bool,
    pub limit: Option<StepLimit>,
    /// Slots que no cuentan para `complete`.
    pub optional_slots: BTreeSet<String>,
    /// Fracción máxima de filas con error de evaluación antes de abortar.
    pub max_row_error_fraction: Option<f64>,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self { column_strategy: ColumnStrategy::Union,
               merge_strategy: MergeStrategy::default(),
               data_merge_strategy: DataAnnotationMergeStrategy::default(),
               apply_merging: true,
               skip_incomplete: false,
               limit: None,
               optional_slots: BTreeSet::new(),
               max_row_error_fraction: None }
    }
}

impl MatchingConfig {
    pub fn new(column_strategy: ColumnStrategy) -> Self {
        Self { column_strategy,
               ..Self::default() }
    }

    pub fn custom_columns<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self::new(ColumnStrategy::Custom(columns.into_iter().map(Into::into).collect()))
    }

    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> Self {
        self.merge_strategy = strategy;
        self
    }

    pub fn with_data_merge_strategy(mut self, strategy: DataAnnotationMergeStrategy) -> Self {
        self.data_merge_strategy = strategy;
        self
    }

    pub fn with_merging(mut self, apply_merging: bool) -> Self {
        self.apply_merging = apply_merging;
        self
    }

    pub fn with_skip_incomplete(mut self, skip: bool) -> Self {
        self.skip_incomplete = skip;
        self
    }

    pub fn with_limit(mut self, limit: StepLimit) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_optional_slot(mut self, slot: impl Into<String>) -> Self {
        self.optional_slots.insert(slot.into());
        self
    }

    /// Fija la fracción máxima de filas con error. Se acota a `[0, 1]`; un
    /// `NaN` cuenta como `0` (ningún error tolerado).
    pub fn with_max_row_error_fraction(mut self, fraction: f64) -> Self {
        self.max_row_error_fraction = Some(normalize_fraction(fraction));
        self
    }
}

pub(crate) fn normalize_fraction(fraction: f64) -> f64 {
    if fraction.is_nan() {
        0.0
    } else {
        fraction.clamp(0.0, 1.0)
    }
}

/// Modo de matching tal como lo elige el usuario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColumnMatching {
    #[default]
    Union,
    Intersection,
    /// Unión de las anotaciones con prefijo `#`.
    PrefixHashUnion,
    /// Intersección de las anotaciones con prefijo `#`.
    PrefixHashIntersection,
    Custom,
    ExpressionDerived,
    MergeAll,
    SplitAll,
    /// Sin columnas de referencia: equivale a `Custom` vacío.
    None,
}

/// Parámetros de usuario serializables del matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingParams {
    pub column_matching: ColumnMatching,
    pub custom_columns: BTreeSet<String>,
    pub merge_strategy: MergeStrategy,
    pub data_merge_strategy: DataAnnotationMergeStrategy,
    pub apply_merging: bool,
    pub skip_incomplete: bool,
    /// Expresión de límite (`"0-2,5"`).
    pub limit: Option<String>,
    pub optional_slots: BTreeSet<String>,
}

impl Default for MatchingParams {
    fn default() -> Self {
        Self { column_matching: ColumnMatching::default(),
               custom_columns: BTreeSet::new(),
               merge_strategy: MergeStrategy::default(),
               data_merge_strategy: DataAnnotationMergeStrategy::default(),
               apply_merging: true,
               skip_incomplete: false,
               limit: None,
               optional_slots: BTreeSet::new() }
    }
}

impl MatchingParams {
    /// Resuelve los parámetros. `expression` sólo se usa (y es obligatorio)
    /// con `ColumnMatching::ExpressionDerived`.
    pub fn into_config(self, expression: Option<Arc<dyn KeyExpression>>) -> Result<MatchingConfig, BatchingError> {
        let column_strategy = match self.column_matching {
            ColumnMatching::Union => ColumnStrategy::Union,
            ColumnMatching::Intersection => ColumnStrategy::Intersection,
            ColumnMatching::PrefixHashUnion => ColumnStrategy::PrefixUnion(HASH_PREFIX.to_string()),
            ColumnMatching::PrefixHashIntersection => ColumnStrategy::PrefixIntersection(HASH_PREFIX.to_string()),
            ColumnMatching::Custom => ColumnStrategy::Custom(self.custom_columns),
            ColumnMatching::ExpressionDerived => {
                ColumnStrategy::ExpressionDerived(expression.ok_or(BatchingError::MissingExpression)?)
            }
            ColumnMatching::MergeAll => ColumnStrategy::MergeAll,
            ColumnMatching::SplitAll => ColumnStrategy::SplitAll,
            ColumnMatching::None => ColumnStrategy::Custom(BTreeSet::new()),
        };
        let limit = self.limit
                        .as_deref()
                        .map(StepLimit::parse)
                        .transpose()?;
        Ok(MatchingConfig { column_strategy,
                            merge_strategy: self.merge_strategy,
                            data_merge_strategy: self.data_merge_strategy,
                            apply_merging: self.apply_merging,
                            skip_incomplete: self.skip_incomplete,
                            limit,
                            optional_slots: self.optional_slots,
                            max_row_error_fraction: None })
    }
}
