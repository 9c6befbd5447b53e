//! Estrategias de merge de valores de anotación.
//!
//! Cuando varias filas agrupadas en un mismo paso aportan el mismo nombre de
//! anotación con valores distintos, la `MergeStrategy` decide el valor final.
//! La estrategia se elige una vez (enum cerrado) antes de generar; el orden de
//! aplicación es siempre: slots en orden de declaración, filas en orden
//! dentro de cada slot.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

use super::AnnotationSet;

/// Estrategia para resolver dos valores distintos de la misma anotación.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MergeStrategy {
    /// Reúne los valores distintos en una lista JSON (`["a","b"]`).
    #[default]
    Merge,
    /// El valor entrante reemplaza al existente.
    OverwriteExisting,
    /// Se conserva el primer valor visto.
    KeepExisting,
    /// La anotación en conflicto se elimina del paso.
    Discard,
    /// Concatena con el separador dado (no conmutativa).
    Join(String),
    /// Un conflicto se reporta como error de evaluación.
    Error,
}

/// Resultado de aplicar una estrategia a un conflicto.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Value(String),
    Discard,
}

impl MergeStrategy {
    /// Aplica la estrategia a `(existing, incoming)`. `None` indica que la
    /// estrategia rechaza el conflicto.
    pub fn apply(&self, existing: &str, incoming: &str) -> Option<MergeOutcome> {
        if existing == incoming {
            return Some(MergeOutcome::Value(existing.to_string()));
        }
        match self {
            MergeStrategy::Merge => Some(MergeOutcome::Value(merge_values(existing, incoming))),
            MergeStrategy::OverwriteExisting => Some(MergeOutcome::Value(incoming.to_string())),
            MergeStrategy::KeepExisting => Some(MergeOutcome::Value(existing.to_string())),
            MergeStrategy::Discard => Some(MergeOutcome::Discard),
            MergeStrategy::Join(separator) => Some(MergeOutcome::Value(format!("{existing}{separator}{incoming}"))),
            MergeStrategy::Error => None,
        }
    }
}

/// Une dos valores en una lista JSON de valores distintos, expandiendo los
/// valores que ya son resultado de un merge previo.
fn merge_values(existing: &str, incoming: &str) -> String {
    let mut values = split_merged(existing);
    for v in split_merged(incoming) {
        if !values.contains(&v) {
            values.push(v);
        }
    }
    if values.len() == 1 {
        values.remove(0)
    } else {
        Value::from(values).to_string()
    }
}

fn split_merged(value: &str) -> Vec<String> {
    if value.starts_with('[') {
        if let Ok(list) = serde_json::from_str::<Vec<String>>(value) {
            return list;
        }
    }
    vec![value.to_string()]
}

/// Estrategia para anotaciones de datos (payloads opacos con nombre).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DataAnnotationMergeStrategy {
    #[default]
    OverwriteExisting,
    KeepExisting,
    Discard,
}

/// Acumulador de anotaciones de texto para un paso.
///
/// Las columnas de referencia se fijan con `lock` y no participan en el
/// merge: todas las filas del grupo coinciden en ellas por construcción.
#[derive(Debug)]
pub struct AnnotationMerger<'a> {
    strategy: &'a MergeStrategy,
    merged: AnnotationSet,
    locked: BTreeSet<String>,
    discarded: BTreeSet<String>,
}

impl<'a> AnnotationMerger<'a> {
    pub fn new(strategy: &'a MergeStrategy) -> Self {
        Self { strategy,
               merged: AnnotationSet::new(),
               locked: BTreeSet::new(),
               discarded: BTreeSet::new() }
    }

    pub fn lock(&mut self, name: &str, value: &str) {
        self.merged.insert(name, value);
        self.locked.insert(name.to_string());
    }

    /// Ofrece un valor entrante. En conflicto rechazado devuelve el valor
    /// existente (que se conserva).
    pub fn offer(&mut self, name: &str, incoming: &str) -> Result<(), String> {
        if self.locked.contains(name) || self.discarded.contains(name) {
            return Ok(());
        }
        let existing = match self.merged.get(name) {
            None => {
                self.merged.insert(name, incoming);
                return Ok(());
            }
            Some(existing) if existing == incoming => return Ok(()),
            Some(existing) => existing.to_string(),
        };
        match self.strategy.apply(&existing, incoming) {
            Some(MergeOutcome::Value(v)) => {
                self.merged.insert(name, v);
                Ok(())
            }
            Some(MergeOutcome::Discard) => {
                self.merged.remove(name);
                self.discarded.insert(name.to_string());
                Ok(())
            }
            None => Err(existing),
        }
    }

    pub fn finish(self) -> AnnotationSet {
        self.merged
    }
}

/// Acumulador genérico para anotaciones de datos.
#[derive(Debug)]
pub struct DataAnnotationMerger<V> {
    strategy: DataAnnotationMergeStrategy,
    merged: IndexMap<String, V>,
    discarded: BTreeSet<String>,
}

impl<V> DataAnnotationMerger<V> {
    pub fn new(strategy: DataAnnotationMergeStrategy) -> Self {
        Self { strategy,
               merged: IndexMap::new(),
               discarded: BTreeSet::new() }
    }

    pub fn offer(&mut self, name: &str, value: V) {
        if self.discarded.contains(name) {
            return;
        }
        if !self.merged.contains_key(name) {
            self.merged.insert(name.to_string(), value);
            return;
        }
        match self.strategy {
            DataAnnotationMergeStrategy::OverwriteExisting => {
                self.merged.insert(name.to_string(), value);
            }
            DataAnnotationMergeStrategy::KeepExisting => {}
            DataAnnotationMergeStrategy::Discard => {
                self.merged.shift_remove(name);
                self.discarded.insert(name.to_string());
            }
        }
    }

    pub fn finish(self) -> IndexMap<String, V> {
        self.merged
    }
}
