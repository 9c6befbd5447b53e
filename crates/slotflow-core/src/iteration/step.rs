//! `IterationStep`: un lote de filas (un subconjunto por slot) que un nodo
//! procesa en una sola invocación.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::annotation::AnnotationSet;
use crate::constants::{BATCHING_VERSION, MISSING_VALUE_DISPLAY};
use crate::hashing::hash_value;
use crate::slot::{DataContext, DataRow, DataSlot};

/// Clave de orden de un paso.
///
/// `Values` lleva los valores de las columnas de referencia en orden de
/// nombre; `None` es ⊥ y ordena antes que cualquier texto. `Row` se usa en
/// `SplitAll` y ordena por slot de declaración y luego fila.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StepKey {
    Values(Vec<(String, Option<String>)>),
    Row { slot_index: usize, row: usize },
}

impl StepKey {
    /// Valor de una columna de referencia: `Some(None)` si la columna existe
    /// pero vale ⊥.
    pub fn value(&self, column: &str) -> Option<Option<&str>> {
        match self {
            StepKey::Values(values) => values.iter()
                                             .find(|(c, _)| c == column)
                                             .map(|(_, v)| v.as_deref()),
            StepKey::Row { .. } => None,
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKey::Values(values) => {
                let parts: Vec<String> = values.iter()
                                               .map(|(c, v)| format!("{c}={}", v.as_deref().unwrap_or(MISSING_VALUE_DISPLAY)))
                                               .collect();
                f.write_str(&parts.join(", "))
            }
            StepKey::Row { slot_index, row } => write!(f, "slot#{slot_index} row {row}"),
        }
    }
}

/// Referencia a una anotación de datos concreta dentro de las slots de
/// entrada.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DataAnnotationRef {
    pub slot: String,
    pub row: usize,
    pub name: String,
}

impl DataAnnotationRef {
    pub fn resolve<'a, T>(&self, slots: &'a [DataSlot<T>]) -> Option<&'a Arc<T>> {
        slots.iter()
             .find(|s| s.name() == self.slot)
             .and_then(|s| s.row(self.row))
             .and_then(|r| r.data_annotations.get(&self.name))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationStep {
    key: StepKey,
    rows_by_slot: IndexMap<String, BTreeSet<usize>>,
    merged_annotations: AnnotationSet,
    merged_data_annotations: IndexMap<String, DataAnnotationRef>,
    complete: bool,
}

impl IterationStep {
    pub(crate) fn new(key: StepKey,
                      rows_by_slot: IndexMap<String, BTreeSet<usize>>,
                      merged_annotations: AnnotationSet,
                      merged_data_annotations: IndexMap<String, DataAnnotationRef>,
                      complete: bool)
                      -> Self {
        Self { key,
               rows_by_slot,
               merged_annotations,
               merged_data_annotations,
               complete }
    }

    pub fn key(&self) -> &StepKey {
        &self.key
    }

    /// Filas por slot, en orden de declaración. Toda slot de entrada aparece,
    /// con conjunto vacío si no aporta filas.
    pub fn rows_by_slot(&self) -> &IndexMap<String, BTreeSet<usize>> {
        &self.rows_by_slot
    }

    pub fn rows(&self, slot: &str) -> Option<&BTreeSet<usize>> {
        self.rows_by_slot.get(slot)
    }

    /// Filas de `slot` que pertenecen a este paso.
    pub fn input_rows<'a, T>(&'a self, slot: &'a DataSlot<T>) -> impl Iterator<Item = &'a DataRow<T>> + 'a {
        self.rows_by_slot
            .get(slot.name())
            .into_iter()
            .flat_map(move |rows| slot.select(rows))
    }

    pub fn merged_annotations(&self) -> &AnnotationSet {
        &self.merged_annotations
    }

    pub fn merged_data_annotations(&self) -> &IndexMap<String, DataAnnotationRef> {
        &self.merged_data_annotations
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn row_count(&self) -> usize {
        self.rows_by_slot.values().map(BTreeSet::len).sum()
    }

    /// Versión de fila única, si ninguna slot aporta más de una fila.
    pub fn as_single(&self) -> Option<SingleIterationStep> {
        let mut rows = IndexMap::with_capacity(self.rows_by_slot.len());
        for (slot, set) in &self.rows_by_slot {
            if set.len() > 1 {
                return None;
            }
            rows.insert(slot.clone(), set.first().copied());
        }
        Some(SingleIterationStep { key: self.key.clone(),
                                   rows,
                                   merged_annotations: self.merged_annotations.clone(),
                                   complete: self.complete })
    }

    /// Identidad estable del paso (blake3 sobre JSON canónico de filas y
    /// anotaciones). No depende del orden de inserción de las anotaciones.
    pub fn fingerprint(&self) -> String {
        let rows: Map<String, Value> = self.rows_by_slot
                                           .iter()
                                           .map(|(slot, set)| (slot.clone(), json!(set)))
                                           .collect();
        let annotations: Map<String, Value> = self.merged_annotations
                                                  .iter()
                                                  .map(|(k, v)| (k.to_string(), Value::from(v)))
                                                  .collect();
        hash_value(&json!({
                       "version": BATCHING_VERSION,
                       "rows": rows,
                       "annotations": annotations,
                   }))
    }

    /// Contexto de procedencia para una fila de salida: hijo de los
    /// contextos de todas las filas de entrada del paso.
    pub fn derive_context<T>(&self, slots: &[DataSlot<T>], source: Option<&str>) -> DataContext {
        let parents = slots.iter().flat_map(|slot| self.input_rows(slot).map(|r| &r.context));
        DataContext::derive(parents, source)
    }
}

impl Ord for IterationStep {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.rows_by_slot.iter().cmp(other.rows_by_slot.iter()))
            .then_with(|| self.merged_annotations.to_sorted().cmp(&other.merged_annotations.to_sorted()))
            .then_with(|| {
                self.merged_data_annotations
                    .iter()
                    .cmp(other.merged_data_annotations.iter())
            })
            .then_with(|| self.complete.cmp(&other.complete))
    }
}

impl PartialOrd for IterationStep {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IterationStep {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IterationStep {}

/// Paso con como máximo una fila por slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SingleIterationStep {
    pub key: StepKey,
    pub rows: IndexMap<String, Option<usize>>,
    pub merged_annotations: AnnotationSet,
    pub complete: bool,
}

impl SingleIterationStep {
    pub fn row(&self, slot: &str) -> Option<usize> {
        self.rows.get(slot).copied().flatten()
    }
}
