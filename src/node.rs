//! Ejecución de un nodo del pipeline sobre la cola.
//!
//! `NodeRun` empaqueta las slots de entrada, la configuración de matching y
//! un `StepProcessor`. Como runnable:
//! 1. genera los pasos; si hay problemas de configuración no procesa nada y
//!    falla listándolos todos;
//! 2. procesa los pasos en orden, chequeando cancelación *entre* pasos;
//! 3. agrega las filas de cada paso a la slot de salida de una sola vez, de
//!    modo que una cancelación deja exactamente los pasos completados.

use log::{debug, warn};
use parking_lot::RwLock;
use slotflow_core::{generate, DataRow, DataSlot, GenerationOutcome, IterationStep, MatchingConfig};
use slotflow_queue::{ProgressContext, RunError, Runnable};
use std::sync::Arc;

use crate::errors::PipelineError;

/// Entradas de una invocación del procesador.
pub struct StepInputs<'a, T> {
    /// Posición del paso en la lista (ya filtrada).
    pub index: usize,
    pub total: usize,
    pub step: &'a IterationStep,
    pub slots: &'a [DataSlot<T>],
    /// Ámbito de progreso del paso (`"Batch i/n"`).
    pub progress: &'a ProgressContext,
}

impl<'a, T> StepInputs<'a, T> {
    /// Filas de la slot `name` que pertenecen al paso.
    pub fn rows(&self, name: &str) -> Vec<&'a DataRow<T>> {
        let step = self.step;
        self.slots
            .iter()
            .filter(|s| s.name() == name)
            .flat_map(|s| step.input_rows(s))
            .collect()
    }

    pub fn annotation(&self, name: &str) -> Option<&'a str> {
        self.step.merged_annotations().get(name)
    }
}

/// Lógica de un nodo: transforma las filas de un paso en filas de salida.
pub trait StepProcessor<T>: Send + Sync {
    fn process(&self, inputs: &StepInputs<'_, T>) -> Result<Vec<DataRow<T>>, RunError>;
}

impl<T, F> StepProcessor<T> for F where F: Fn(&StepInputs<'_, T>) -> Result<Vec<DataRow<T>>, RunError> + Send + Sync
{
    fn process(&self, inputs: &StepInputs<'_, T>) -> Result<Vec<DataRow<T>>, RunError> {
        self(inputs)
    }
}

pub struct NodeRun<T> {
    label: String,
    inputs: Arc<Vec<DataSlot<T>>>,
    config: MatchingConfig,
    processor: Arc<dyn StepProcessor<T>>,
    output: Arc<RwLock<DataSlot<T>>>,
}

impl<T> NodeRun<T> where T: Send + Sync + 'static
{
    pub fn new<P>(label: impl Into<String>,
                  inputs: Vec<DataSlot<T>>,
                  config: MatchingConfig,
                  processor: P,
                  output: impl Into<String>)
                  -> Self
        where P: StepProcessor<T> + 'static
    {
        Self { label: label.into(),
               inputs: Arc::new(inputs),
               config,
               processor: Arc::new(processor),
               output: Arc::new(RwLock::new(DataSlot::new(output))) }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Slot de salida compartida; se llena mientras el runnable avanza.
    pub fn output(&self) -> Arc<RwLock<DataSlot<T>>> {
        Arc::clone(&self.output)
    }

    /// Genera los pasos sin ejecutar nada (vista previa en la UI).
    pub fn preview(&self) -> Result<GenerationOutcome, PipelineError> {
        Ok(generate(&self.inputs, &self.config)?)
    }

    /// Empaqueta el nodo como runnable para la cola.
    pub fn into_runnable(self) -> Arc<Runnable> {
        let NodeRun { label,
                      inputs,
                      config,
                      processor,
                      output } = self;
        Runnable::new(label.clone(), move |ctx| {
            let outcome = generate(&inputs, &config).map_err(PipelineError::from)?;
            let issues: Vec<_> = outcome.configuration_issues().cloned().collect();
            if !issues.is_empty() {
                for issue in &issues {
                    ctx.log(issue.to_string());
                }
                return Err(PipelineError::InvalidMatching(issues).into());
            }
            for issue in outcome.evaluation_issues() {
                warn!("node `{}`: {}", label, issue);
                ctx.log(format!("warning: {issue}"));
            }

            let total = outcome.steps.len();
            debug!("node `{}`: {} step(s) of {} generated", label, total, outcome.total_generated);
            for (index, step) in outcome.steps.iter().enumerate() {
                ctx.check_cancelled()?;
                let scope = ctx.resolve("Batch", index, total);
                let step_inputs = StepInputs { index,
                                               total,
                                               step,
                                               slots: &inputs,
                                               progress: &scope };
                let produced = processor.process(&step_inputs)?;
                let rows: Vec<DataRow<T>> = produced.into_iter()
                                                    .map(|row| attribute(row, step, &inputs, &label))
                                                    .collect();
                let count = rows.len();
                output.write().extend(rows);
                scope.log(format!("{count} row(s)"));
            }
            Ok(())
        })
    }
}

/// Completa una fila de salida con las anotaciones del paso (sin pisar las
/// que el procesador fijó) y su procedencia.
fn attribute<T>(mut row: DataRow<T>, step: &IterationStep, slots: &[DataSlot<T>], label: &str) -> DataRow<T> {
    for (name, value) in step.merged_annotations().iter() {
        if !row.annotations.contains(name) {
            row.annotations.insert(name, value);
        }
    }
    for (name, reference) in step.merged_data_annotations() {
        if row.data_annotations.contains_key(name) {
            continue;
        }
        if let Some(data) = reference.resolve(slots) {
            row.data_annotations.insert(name.clone(), Arc::clone(data));
        }
    }
    row.context = step.derive_context(slots, Some(label));
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotflow_core::ColumnStrategy;

    fn slots() -> Vec<DataSlot<i32>> {
        vec![DataSlot::with_rows("a",
                                 [DataRow::new(1).with_annotation("cond", "x").with_data_annotation("ref", 100),
                                  DataRow::new(2).with_annotation("cond", "y")]),
             DataSlot::with_rows("b", [DataRow::new(10).with_annotation("cond", "x")])]
    }

    #[test]
    fn attribute_fills_missing_annotations_only() {
        let slots = slots();
        let outcome = generate(&slots, &MatchingConfig::new(ColumnStrategy::Union)).unwrap();
        let step = &outcome.steps[0];
        assert_eq!(step.merged_annotations().get("cond"), Some("x"));

        let plain = attribute(DataRow::new(0), step, &slots, "sum");
        assert_eq!(plain.annotations.get("cond"), Some("x"));
        assert_eq!(plain.data_annotations.get("ref").map(|d| **d), Some(100));
        assert_eq!(plain.context.source.as_deref(), Some("sum"));
        assert_eq!(plain.context.parents.len(), 2);

        let own = attribute(DataRow::new(0).with_annotation("cond", "mine"), step, &slots, "sum");
        assert_eq!(own.annotations.get("cond"), Some("mine"));
    }

    #[test]
    fn preview_does_not_touch_the_output() {
        let node = NodeRun::new("sum",
                                slots(),
                                MatchingConfig::new(ColumnStrategy::Union),
                                |_: &StepInputs<'_, i32>| Ok(vec![DataRow::new(0)]),
                                "out");
        let outcome = node.preview().unwrap();
        assert_eq!(outcome.steps.len(), 2);
        assert!(node.output().read().is_empty());
        assert_eq!(node.label(), "sum");
    }
}
