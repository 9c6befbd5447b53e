//! Generador de pasos de iteración.
//!
//! Función pura: agrupa las filas de todas las slots por su firma sobre las
//! columnas de referencia y construye un `IterationStep` por firma. Los
//! problemas por fila o por firma se acumulan en `GenerationOutcome::issues`
//! en lugar de abortar.

use indexmap::IndexMap;
use log::{debug, warn};
use std::collections::{BTreeMap, BTreeSet};

use super::config::normalize_fraction;
use super::{ColumnStrategy, DataAnnotationRef, IterationStep, KeyExpression, MatchingConfig, StepKey};
use crate::annotation::{AnnotationMerger, DataAnnotationMerger};
use crate::errors::BatchingError;
use crate::slot::{DataRow, DataSlot};

/// Firma de una fila: un valor por columna de referencia (`None` = ⊥).
type Signature = Vec<Option<String>>;

/// Resultado de `generate`: pasos + problemas detectados.
#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    /// Pasos ordenados, tras `skip_incomplete` y `limit`.
    pub steps: Vec<IterationStep>,
    pub issues: Vec<BatchingError>,
    pub reference_columns: BTreeSet<String>,
    /// Pasos generados antes de filtrar.
    pub total_generated: usize,
}

impl GenerationOutcome {
    pub fn has_issues(&self) -> bool {
        !self.issues.is_empty()
    }

    pub fn configuration_issues(&self) -> impl Iterator<Item = &BatchingError> {
        self.issues.iter().filter(|e| e.is_configuration())
    }

    pub fn evaluation_issues(&self) -> impl Iterator<Item = &BatchingError> {
        self.issues.iter().filter(|e| e.is_evaluation())
    }

    /// Política fail-fast: cualquier problema de configuración invalida el
    /// resultado completo.
    pub fn into_result(self) -> Result<Vec<IterationStep>, Vec<BatchingError>> {
        let config: Vec<BatchingError> = self.issues.into_iter().filter(BatchingError::is_configuration).collect();
        if config.is_empty() {
            Ok(self.steps)
        } else {
            Err(config)
        }
    }
}

/// Genera los pasos de iteración para `slots` según `config`.
///
/// Errores: `DuplicateSlot` si dos slots comparten nombre y
/// `ErrorDensityExceeded` si la fracción de filas con error de evaluación
/// supera `config.max_row_error_fraction`. Todo lo demás se reporta en
/// `issues`.
pub fn generate<T>(slots: &[DataSlot<T>], config: &MatchingConfig) -> Result<GenerationOutcome, BatchingError> {
    let mut names = BTreeSet::new();
    for slot in slots {
        if !names.insert(slot.name()) {
            return Err(BatchingError::DuplicateSlot(slot.name().to_string()));
        }
    }

    let mut issues = Vec::new();
    let total_rows: usize = slots.iter().map(DataSlot::len).sum();

    let (reference_columns, mut steps) = match &config.column_strategy {
        ColumnStrategy::SplitAll => (BTreeSet::new(), split_all(slots, config)),
        ColumnStrategy::ExpressionDerived(expression) => {
            let (columns, signatures, failed) = expression_signatures(slots, expression.as_ref(), &mut issues);
            check_density(failed, total_rows, config)?;
            let steps = join(slots, &columns, &signatures, config, &mut issues);
            (columns, steps)
        }
        strategy => {
            let columns = reference_columns(slots, strategy, &mut issues);
            let signatures = slots.iter()
                                  .map(|slot| {
                                      slot.rows()
                                          .iter()
                                          .map(|row| Some(project(&columns, |c| row.annotations.get(c))))
                                          .collect()
                                  })
                                  .collect::<Vec<_>>();
            let steps = join(slots, &columns, &signatures, config, &mut issues);
            (columns, steps)
        }
    };
    debug!("reference columns: {:?}", reference_columns);

    steps.sort();
    let total_generated = steps.len();
    if config.skip_incomplete {
        steps.retain(IterationStep::is_complete);
    }
    if let Some(limit) = &config.limit {
        steps = steps.into_iter()
                     .enumerate()
                     .filter(|(i, _)| limit.contains(*i))
                     .map(|(_, s)| s)
                     .collect();
    }

    if !issues.is_empty() {
        warn!("step generation reported {} issue(s)", issues.len());
    }
    debug!("generated {} step(s), kept {}", total_generated, steps.len());
    Ok(GenerationOutcome { steps,
                           issues,
                           reference_columns,
                           total_generated })
}

fn check_density(failed: usize, total: usize, config: &MatchingConfig) -> Result<(), BatchingError> {
    match config.max_row_error_fraction.map(normalize_fraction) {
        Some(max_fraction) if total > 0 && (failed as f64 / total as f64) > max_fraction => {
            Err(BatchingError::ErrorDensityExceeded { failed,
                                                      total,
                                                      max_fraction })
        }
        _ => Ok(()),
    }
}

fn project<'a>(columns: &BTreeSet<String>, lookup: impl Fn(&str) -> Option<&'a str>) -> Signature {
    columns.iter().map(|c| lookup(c).map(str::to_string)).collect()
}

fn reference_columns<T>(slots: &[DataSlot<T>],
                        strategy: &ColumnStrategy,
                        issues: &mut Vec<BatchingError>)
                        -> BTreeSet<String> {
    match strategy {
        ColumnStrategy::Union => column_union(slots, ""),
        ColumnStrategy::PrefixUnion(prefix) => column_union(slots, prefix),
        ColumnStrategy::Intersection => column_intersection(slots, ""),
        ColumnStrategy::PrefixIntersection(prefix) => column_intersection(slots, prefix),
        ColumnStrategy::Custom(columns) => {
            let known: BTreeSet<String> = slots.iter().flat_map(DataSlot::annotation_column_names).collect();
            let mut out = BTreeSet::new();
            for column in columns {
                if column.trim().is_empty() {
                    issues.push(BatchingError::InvalidColumnName(column.clone()));
                    continue;
                }
                if !known.contains(column) {
                    issues.push(BatchingError::UnknownColumn(column.clone()));
                }
                out.insert(column.clone());
            }
            out
        }
        ColumnStrategy::MergeAll | ColumnStrategy::SplitAll | ColumnStrategy::ExpressionDerived(_) => BTreeSet::new(),
    }
}

fn prefixed_names<T>(slot: &DataSlot<T>, prefix: &str) -> BTreeSet<String> {
    let mut names = slot.annotation_column_names();
    names.retain(|name| name.starts_with(prefix));
    names
}

fn column_union<T>(slots: &[DataSlot<T>], prefix: &str) -> BTreeSet<String> {
    slots.iter().flat_map(|slot| prefixed_names(slot, prefix)).collect()
}

fn column_intersection<T>(slots: &[DataSlot<T>], prefix: &str) -> BTreeSet<String> {
    let mut per_slot = slots.iter().map(|slot| prefixed_names(slot, prefix));
    let first = per_slot.next().unwrap_or_default();
    per_slot.fold(first, |acc, names| acc.intersection(&names).cloned().collect())
}

/// Evalúa la expresión por fila. Las filas con error quedan fuera (`None`)
/// y se reportan con su slot e índice.
fn expression_signatures<T>(slots: &[DataSlot<T>],
                            expression: &dyn KeyExpression,
                            issues: &mut Vec<BatchingError>)
                            -> (BTreeSet<String>, Vec<Vec<Option<Signature>>>, usize) {
    debug!("evaluating key expression: {}", expression.describe());
    let mut failed = 0;
    let keys: Vec<Vec<Option<BTreeMap<String, String>>>> =
        slots.iter()
             .map(|slot| {
                 slot.rows()
                     .iter()
                     .enumerate()
                     .map(|(row, data)| match expression.evaluate(&data.annotations) {
                         Ok(key) => Some(key),
                         Err(e) => {
                             failed += 1;
                             issues.push(BatchingError::Expression { slot: slot.name().to_string(),
                                                                     row,
                                                                     message: e.0 });
                             None
                         }
                     })
                     .collect()
             })
             .collect();

    let columns: BTreeSet<String> = keys.iter()
                                        .flatten()
                                        .flatten()
                                        .flat_map(|k| k.keys().cloned())
                                        .collect();
    let signatures = keys.iter()
                         .map(|rows| {
                             rows.iter()
                                 .map(|key| key.as_ref().map(|k| project(&columns, |c| k.get(c).map(String::as_str))))
                                 .collect()
                         })
                         .collect();
    (columns, signatures, failed)
}

/// Outer join por firma. `signatures[s][r] == None` excluye la fila.
fn join<T>(slots: &[DataSlot<T>],
           columns: &BTreeSet<String>,
           signatures: &[Vec<Option<Signature>>],
           config: &MatchingConfig,
           issues: &mut Vec<BatchingError>)
           -> Vec<IterationStep> {
    let mut index: BTreeMap<&Signature, Vec<Vec<usize>>> = BTreeMap::new();
    for (slot_index, rows) in signatures.iter().enumerate() {
        for (row, signature) in rows.iter().enumerate() {
            if let Some(signature) = signature {
                index.entry(signature).or_insert_with(|| vec![Vec::new(); slots.len()])[slot_index].push(row);
            }
        }
    }

    let mut steps = Vec::with_capacity(index.len());
    for (signature, rows_per_slot) in index {
        let key = StepKey::Values(columns.iter().cloned().zip(signature.iter().cloned()).collect());

        if !config.apply_merging {
            let mut duplicated = false;
            for (slot, rows) in slots.iter().zip(&rows_per_slot) {
                if rows.len() > 1 {
                    duplicated = true;
                    issues.push(BatchingError::DuplicateMatch { slot: slot.name().to_string(),
                                                                key: key.to_string(),
                                                                rows: rows.clone() });
                }
            }
            if duplicated {
                continue;
            }
        }

        let complete = slots.iter()
                            .zip(&rows_per_slot)
                            .all(|(slot, rows)| !rows.is_empty() || config.optional_slots.contains(slot.name()));

        let mut merger = AnnotationMerger::new(&config.merge_strategy);
        for (column, value) in columns.iter().zip(signature) {
            if let Some(value) = value {
                merger.lock(column, value);
            }
        }
        let mut data_merger = DataAnnotationMerger::new(config.data_merge_strategy);
        for (slot, rows) in slots.iter().zip(&rows_per_slot) {
            for &row in rows {
                if let Some(data) = slot.row(row) {
                    merge_row(slot.name(), row, data, &mut merger, &mut data_merger, issues);
                }
            }
        }

        let rows_by_slot = slots.iter()
                                .zip(rows_per_slot)
                                .map(|(slot, rows)| (slot.name().to_string(), rows.into_iter().collect()))
                                .collect();
        steps.push(IterationStep::new(key, rows_by_slot, merger.finish(), data_merger.finish(), complete));
    }
    steps
}

fn merge_row<T>(slot: &str,
                row: usize,
                data: &DataRow<T>,
                merger: &mut AnnotationMerger<'_>,
                data_merger: &mut DataAnnotationMerger<DataAnnotationRef>,
                issues: &mut Vec<BatchingError>) {
    for (name, incoming) in data.annotations.iter() {
        if let Err(existing) = merger.offer(name, incoming) {
            issues.push(BatchingError::MergeConflict { slot: slot.to_string(),
                                                       row,
                                                       name: name.to_string(),
                                                       existing,
                                                       incoming: incoming.to_string() });
        }
    }
    for name in data.data_annotations.keys() {
        data_merger.offer(name,
                          DataAnnotationRef { slot: slot.to_string(),
                                              row,
                                              name: name.clone() });
    }
}

/// Un paso por fila; la clave `Row` conserva el orden de declaración.
fn split_all<T>(slots: &[DataSlot<T>], config: &MatchingConfig) -> Vec<IterationStep> {
    let mut steps = Vec::with_capacity(slots.iter().map(DataSlot::len).sum());
    for (slot_index, slot) in slots.iter().enumerate() {
        for (row, data) in slot.rows().iter().enumerate() {
            let rows_by_slot: IndexMap<String, BTreeSet<usize>> =
                slots.iter()
                     .enumerate()
                     .map(|(i, s)| {
                         let rows = if i == slot_index { BTreeSet::from([row]) } else { BTreeSet::new() };
                         (s.name().to_string(), rows)
                     })
                     .collect();
            let complete = slots.iter()
                                .enumerate()
                                .all(|(i, s)| i == slot_index || config.optional_slots.contains(s.name()));
            let data_annotations = data.data_annotations
                                       .keys()
                                       .map(|name| {
                                           (name.clone(),
                                            DataAnnotationRef { slot: slot.name().to_string(),
                                                                row,
                                                                name: name.clone() })
                                       })
                                       .collect();
            steps.push(IterationStep::new(StepKey::Row { slot_index, row },
                                          rows_by_slot,
                                          data.annotations.clone(),
                                          data_annotations,
                                          complete));
        }
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::MergeStrategy;

    fn slot(name: &str, rows: &[&[(&str, &str)]]) -> DataSlot<usize> {
        DataSlot::with_rows(name,
                            rows.iter()
                                .enumerate()
                                .map(|(i, a)| DataRow::new(i).with_annotations(a.iter().copied())))
    }

    #[test]
    fn duplicate_slot_names_abort() {
        let slots = vec![slot("A", &[]), slot("A", &[])];
        assert_eq!(generate(&slots, &MatchingConfig::default()).unwrap_err(),
                   BatchingError::DuplicateSlot("A".into()));
    }

    #[test]
    fn no_slots_generate_nothing() {
        let out = generate::<()>(&[], &MatchingConfig::default()).unwrap();
        assert!(out.steps.is_empty());
        assert!(!out.has_issues());
    }

    #[test]
    fn custom_columns_report_invalid_and_unknown_names() {
        let slots = vec![slot("A", &[&[("cond", "a")]])];
        let out = generate(&slots, &MatchingConfig::custom_columns(["cond", " ", "missing"])).unwrap();
        assert!(out.issues.contains(&BatchingError::InvalidColumnName(" ".into())));
        assert!(out.issues.contains(&BatchingError::UnknownColumn("missing".into())));
        assert_eq!(out.reference_columns, BTreeSet::from(["cond".to_string(), "missing".to_string()]));
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].key().value("missing"), Some(None));
    }

    #[test]
    fn non_key_annotations_ride_along() {
        let slots = vec![slot("A", &[&[("cond", "a"), ("note", "x")], &[("cond", "a"), ("note", "y")]])];
        let cfg = MatchingConfig::custom_columns(["cond"]).with_merge_strategy(MergeStrategy::Join("+".into()));
        let out = generate(&slots, &cfg).unwrap();
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].merged_annotations().get("note"), Some("x+y"));
        assert_eq!(out.steps[0].merged_annotations().get("cond"), Some("a"));
    }

    #[test]
    fn error_strategy_reports_conflict_and_keeps_step() {
        let slots = vec![slot("A", &[&[("cond", "a"), ("note", "x")]]),
                         slot("B", &[&[("cond", "a"), ("note", "y")]])];
        let cfg = MatchingConfig::custom_columns(["cond"]).with_merge_strategy(MergeStrategy::Error);
        let out = generate(&slots, &cfg).unwrap();
        assert_eq!(out.steps.len(), 1);
        assert_eq!(out.steps[0].merged_annotations().get("note"), Some("x"));
        assert_eq!(out.evaluation_issues().count(), 1);
        assert_eq!(out.issues[0].location(), Some(("B", 0)));
    }

    #[test]
    fn optional_slots_do_not_affect_completeness() {
        let slots = vec![slot("A", &[&[("cond", "a")]]), slot("B", &[])];
        let out = generate(&slots, &MatchingConfig::default().with_optional_slot("B")).unwrap();
        assert!(out.steps[0].is_complete());
        assert_eq!(out.steps[0].rows("B"), Some(&BTreeSet::new()));
    }
}
