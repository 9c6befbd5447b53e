//! Configuración central de la aplicación.
//! Carga variables de entorno (.env) una sola vez y expone una estructura
//! inmutable (`CONFIG`). Los crates `slotflow-core` y `slotflow-queue` no leen
//! el entorno: reciben su política a través de `MatchingConfig` y
//! `QueueSettings`, que se construyen aquí.
use dotenvy::dotenv;
use once_cell::sync::Lazy;
use slotflow_core::{MatchingConfig, MatchingParams};
use slotflow_queue::QueueSettings;
use std::env;

use crate::errors::PipelineError;

// Carga perezosa del archivo .env una sola vez.
static DOTENV_LOADED: Lazy<()> = Lazy::new(|| {
    let _ = dotenv(); // ignora error si no existe .env
});

/// Configuración global de la aplicación.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Nombre de la cola por defecto (y de su hilo worker).
    pub queue_name: String,
    /// Fracción máxima de filas con error de evaluación por generación.
    /// `None` = sin límite.
    pub max_row_error_fraction: Option<f64>,
    /// Valor por defecto de `skip_incomplete` para los nodos.
    pub skip_incomplete: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self { queue_name: "default".to_string(),
               max_row_error_fraction: None,
               skip_incomplete: false }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, PipelineError> {
        Lazy::force(&DOTENV_LOADED);
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Construye la configuración a partir de una función de búsqueda de
    /// variables (útil en tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, PipelineError> {
        let defaults = Self::default();
        let queue_name = lookup("SLOTFLOW_QUEUE_NAME").map(|v| v.trim().to_string())
                                                      .filter(|v| !v.is_empty())
                                                      .unwrap_or(defaults.queue_name);
        let max_row_error_fraction = match lookup("SLOTFLOW_MAX_ROW_ERROR_FRACTION") {
            None => None,
            Some(raw) => {
                let value: f64 = raw.trim().parse().map_err(|_| {
                                                      PipelineError::Config(format!("SLOTFLOW_MAX_ROW_ERROR_FRACTION no es un número: {raw}"))
                                                  })?;
                if !(0.0..=1.0).contains(&value) {
                    return Err(PipelineError::Config(format!("SLOTFLOW_MAX_ROW_ERROR_FRACTION fuera de [0, 1]: {value}")));
                }
                Some(value)
            }
        };
        let skip_incomplete = match lookup("SLOTFLOW_SKIP_INCOMPLETE") {
            None => defaults.skip_incomplete,
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                                             PipelineError::Config(format!("SLOTFLOW_SKIP_INCOMPLETE no es booleano: {raw}"))
                                         })?,
        };
        Ok(Self { queue_name,
                  max_row_error_fraction,
                  skip_incomplete })
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings::named(self.queue_name.clone())
    }

    /// Parámetros de matching por defecto para un nodo nuevo.
    pub fn matching_params(&self) -> MatchingParams {
        MatchingParams { skip_incomplete: self.skip_incomplete,
                         ..MatchingParams::default() }
    }

    /// Aplica la política de densidad de errores si el nodo no fijó una.
    pub fn apply_policy(&self, mut config: MatchingConfig) -> MatchingConfig {
        if config.max_row_error_fraction.is_none() {
            config.max_row_error_fraction = self.max_row_error_fraction;
        }
        config
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Instancia global perezosa de configuración, evaluada una sola vez. Una
/// variable inválida se reporta y se usan los valores por defecto.
pub static CONFIG: Lazy<AppConfig> = Lazy::new(|| {
    AppConfig::from_env().unwrap_or_else(|e| {
                             log::warn!("{e}; usando configuración por defecto");
                             AppConfig::default()
                         })
});

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        assert_eq!(AppConfig::from_lookup(lookup(&[])).unwrap(), AppConfig::default());
    }

    #[test]
    fn reads_all_variables() {
        let cfg = AppConfig::from_lookup(lookup(&[("SLOTFLOW_QUEUE_NAME", "batch"),
                                                  ("SLOTFLOW_MAX_ROW_ERROR_FRACTION", "0.25"),
                                                  ("SLOTFLOW_SKIP_INCOMPLETE", "yes")])).unwrap();
        assert_eq!(cfg.queue_name, "batch");
        assert_eq!(cfg.max_row_error_fraction, Some(0.25));
        assert!(cfg.skip_incomplete);
        assert!(cfg.matching_params().skip_incomplete);
        assert_eq!(cfg.queue_settings().name, "batch");
    }

    #[test]
    fn rejects_invalid_values() {
        for vars in [[("SLOTFLOW_MAX_ROW_ERROR_FRACTION", "abc")],
                     [("SLOTFLOW_MAX_ROW_ERROR_FRACTION", "1.5")],
                     [("SLOTFLOW_SKIP_INCOMPLETE", "maybe")]]
        {
            assert!(matches!(AppConfig::from_lookup(lookup(&vars)), Err(PipelineError::Config(_))));
        }
    }

    #[test]
    fn policy_does_not_override_node_choice() {
        let cfg = AppConfig { max_row_error_fraction: Some(0.1),
                              ..AppConfig::default() };
        assert_eq!(cfg.apply_policy(MatchingConfig::default()).max_row_error_fraction, Some(0.1));
        let own = MatchingConfig::default().with_max_row_error_fraction(0.5);
        assert_eq!(cfg.apply_policy(own).max_row_error_fraction, Some(0.5));
    }
}
