//! Row Store (`DataSlot`): tabla ordenada y append-only de filas.
//!
//! Cada fila lleva un payload opaco, un conjunto de anotaciones de texto,
//! anotaciones de datos con nombre y un `DataContext` de procedencia. El
//! generador sólo lee anotaciones; payloads y contexto viajan sin
//! interpretarse.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::annotation::AnnotationSet;

/// Marcador de procedencia (rama/merge) de una fila.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataContext {
    pub id: Uuid,
    pub parents: Vec<Uuid>,
    pub source: Option<String>,
}

impl DataContext {
    pub fn new(source: Option<&str>) -> Self {
        Self { id: Uuid::new_v4(),
               parents: Vec::new(),
               source: source.map(str::to_string) }
    }

    /// Contexto nuevo derivado de los contextos dados (sin duplicados, en
    /// orden de aparición).
    pub fn derive<'a>(parents: impl IntoIterator<Item = &'a DataContext>, source: Option<&str>) -> Self {
        let mut ids: Vec<Uuid> = Vec::new();
        for p in parents {
            if !ids.contains(&p.id) {
                ids.push(p.id);
            }
        }
        Self { id: Uuid::new_v4(),
               parents: ids,
               source: source.map(str::to_string) }
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }
}

impl Default for DataContext {
    fn default() -> Self {
        Self::new(None)
    }
}

/// Fila inmutable una vez agregada a una slot.
#[derive(Debug)]
pub struct DataRow<T> {
    pub payload: Arc<T>,
    pub annotations: AnnotationSet,
    pub data_annotations: IndexMap<String, Arc<T>>,
    pub context: DataContext,
}

impl<T> Clone for DataRow<T> {
    fn clone(&self) -> Self {
        Self { payload: Arc::clone(&self.payload),
               annotations: self.annotations.clone(),
               data_annotations: self.data_annotations.clone(),
               context: self.context.clone() }
    }
}

impl<T> DataRow<T> {
    pub fn new(payload: T) -> Self {
        Self::from_shared(Arc::new(payload))
    }

    pub fn from_shared(payload: Arc<T>) -> Self {
        Self { payload,
               annotations: AnnotationSet::new(),
               data_annotations: IndexMap::new(),
               context: DataContext::default() }
    }

    pub fn with_annotation(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(name, value);
        self
    }

    pub fn with_annotations<K: Into<String>, V: Into<String>>(mut self, items: impl IntoIterator<Item = (K, V)>) -> Self {
        for (k, v) in items {
            self.annotations.insert(k, v);
        }
        self
    }

    pub fn with_data_annotation(mut self, name: impl Into<String>, data: T) -> Self {
        self.data_annotations.insert(name.into(), Arc::new(data));
        self
    }

    pub fn with_context(mut self, context: DataContext) -> Self {
        self.context = context;
        self
    }
}

/// Almacén de filas identificado por nombre.
#[derive(Debug)]
pub struct DataSlot<T> {
    name: String,
    rows: Vec<DataRow<T>>,
}

impl<T> Clone for DataSlot<T> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(),
               rows: self.rows.clone() }
    }
}

impl<T> DataSlot<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(),
               rows: Vec::new() }
    }

    pub fn with_rows(name: impl Into<String>, rows: impl IntoIterator<Item = DataRow<T>>) -> Self {
        let mut slot = Self::new(name);
        slot.extend(rows);
        slot
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Agrega una fila y devuelve su índice.
    pub fn push(&mut self, row: DataRow<T>) -> usize {
        self.rows.push(row);
        self.rows.len() - 1
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = DataRow<T>>) {
        self.rows.extend(rows);
    }

    pub fn row(&self, index: usize) -> Option<&DataRow<T>> {
        self.rows.get(index)
    }

    pub fn rows(&self) -> &[DataRow<T>] {
        &self.rows
    }

    pub fn annotation(&self, row: usize, name: &str) -> Option<&str> {
        self.rows.get(row).and_then(|r| r.annotations.get(name))
    }

    /// Nombres de anotación presentes en al menos una fila (ordenados).
    pub fn annotation_column_names(&self) -> BTreeSet<String> {
        self.rows
            .iter()
            .flat_map(|r| r.annotations.names().map(str::to_string))
            .collect()
    }

    /// Filas seleccionadas por índice; índices fuera de rango se ignoran.
    pub fn select<'a>(&'a self, rows: &'a BTreeSet<usize>) -> impl Iterator<Item = &'a DataRow<T>> + 'a {
        rows.iter().filter_map(move |i| self.rows.get(*i))
    }
}
