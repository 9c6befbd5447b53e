//! Demo: agrupa mediciones con su calibración por anotación `sample` y
//! procesa cada paso en la cola por defecto.

use rayon::prelude::*;
use serde_json::json;
use slotflow::{default_queue, NodeRun, PipelineError, StepInputs, CONFIG};
use slotflow_core::{DataRow, DataSlot, MatchingParams};
use slotflow_queue::{QueueEventKind, RunError};
use std::time::Duration;

fn measurements() -> DataSlot<f64> {
    let rows = [("s1", 1.20), ("s1", 1.35), ("s2", 0.80), ("s2", 0.95), ("s3", 2.10)];
    DataSlot::with_rows("measurements",
                        rows.into_iter()
                            .map(|(sample, value)| DataRow::new(value).with_annotation("sample", sample)))
}

fn calibration() -> DataSlot<f64> {
    let rows = [("s1", 0.10), ("s2", -0.05)];
    DataSlot::with_rows("calibration",
                        rows.into_iter()
                            .map(|(sample, offset)| DataRow::new(offset).with_annotation("sample", sample)))
}

/// Resta el offset de calibración a cada medición del paso.
fn correct(inputs: &StepInputs<'_, f64>) -> Result<Vec<DataRow<f64>>, RunError> {
    let offset = inputs.rows("calibration").first().map(|r| *r.payload).unwrap_or(0.0);
    let values: Vec<f64> = inputs.rows("measurements").iter().map(|r| *r.payload).collect();
    let corrected: Vec<f64> = values.par_iter().map(|v| v - offset).collect();
    inputs.progress.log(format!("{} valor(es), offset {offset}", corrected.len()));
    Ok(corrected.into_iter().map(DataRow::new).collect())
}

fn run() -> Result<(), PipelineError> {
    let params: MatchingParams = serde_json::from_value(json!({
                                     "column_matching": "Custom",
                                     "custom_columns": ["sample"],
                                     "merge_strategy": {"Join": ";"},
                                     "optional_slots": ["calibration"],
                                 })).map_err(|e| PipelineError::Config(e.to_string()))?;
    let config = CONFIG.apply_policy(params.into_config(None)?);

    let node = NodeRun::new("corregir", vec![measurements(), calibration()], config, correct, "corrected");
    for step in node.preview()?.steps {
        println!("paso [{}] filas={} completo={}", step.key(), step.row_count(), step.is_complete());
    }

    let queue = default_queue()?;
    let _events = queue.subscribe(|event| match &event.kind {
                           QueueEventKind::Progress(snapshot) => println!("  {snapshot}"),
                           other => println!("{} {:?}", event.runnable.label(), other.kind()),
                       });
    let output = node.output();
    let runnable = node.into_runnable();
    queue.enqueue(&runnable);
    if !runnable.wait(Some(Duration::from_secs(30))) {
        return Err(PipelineError::Config("la demo no terminó a tiempo".into()));
    }
    if let Some(err) = runnable.error() {
        return Err(err.into());
    }

    for row in output.read().rows() {
        println!("sample={} valor={:.2}",
                 row.annotations.get("sample").unwrap_or("⊥"),
                 row.payload);
    }
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
