//! Modelo de anotaciones.
//!
//! Una anotación es un par `(nombre, valor)` de texto asociado a una fila.
//! Sirve a la vez como dato y como clave de join. Los nombres se guardan tal
//! cual (sin escapes); el llamador decide cómo direccionar caracteres
//! reservados.

mod merge;

pub use merge::{AnnotationMerger, DataAnnotationMergeStrategy, DataAnnotationMerger, MergeOutcome, MergeStrategy};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anotación de texto individual.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TextAnnotation {
    pub name: String,
    pub value: String,
}

impl TextAnnotation {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(),
               value: value.into() }
    }
}

/// Conjunto de anotaciones de una fila.
///
/// Los nombres son únicos: insertar un nombre existente reemplaza su valor
/// (last write wins). Se conserva el orden de inserción para la
/// presentación; toda comparación o hash usa `to_sorted`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationSet {
    entries: IndexMap<String, String>,
}

impl AnnotationSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserta o reemplaza; devuelve el valor anterior si existía.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.entries.insert(name.into(), value.into())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.shift_remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Vista ordenada por nombre (base de comparaciones deterministas).
    pub fn to_sorted(&self) -> BTreeMap<&str, &str> {
        self.iter().collect()
    }

    pub fn to_annotations(&self) -> Vec<TextAnnotation> {
        self.iter().map(|(k, v)| TextAnnotation::new(k, v)).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut set = AnnotationSet::new();
        for (k, v) in iter {
            set.insert(k, v);
        }
        set
    }
}

impl FromIterator<TextAnnotation> for AnnotationSet {
    fn from_iter<I: IntoIterator<Item = TextAnnotation>>(iter: I) -> Self {
        iter.into_iter().map(|a| (a.name, a.value)).collect()
    }
}
