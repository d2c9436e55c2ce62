use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::estimator::Estimator;

/// Opaque per-task tuning options: string key → string value, with typed
/// accessors. The core never parses configuration files; whoever does
/// hands the resulting lookups over in this form.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Options {
    map: HashMap<String, String>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: &str, value: impl ToString) {
        self.map.insert(key.to_string(), value.to_string());
    }

    pub fn is_set(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.get(key).and_then(|v| v.parse().ok())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| match v {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        })
    }
}

/// Top-level reduction configuration: worker counts, the ordered task
/// list, and the opaque per-task options.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ReductionConfig {
    /// Worker threads for the fork engine. 0 = auto.
    pub threads: usize,
    /// Concurrent scan pipelines. 0 = auto (min(threads, scans)).
    pub pipelines: usize,
    /// How many times the task list runs against every scan.
    pub rounds: usize,
    /// Ordered task names, executed per integration.
    pub tasks: Vec<String>,
    /// Default estimator: robust (weighted median) vs maximum likelihood.
    pub robust: bool,
    /// Merge each scan into the shared source model after its task list.
    pub extract_source: bool,
    /// Below this many valid channels an integration is dropped.
    pub min_channels: usize,
    /// Below this many frames an integration is dropped.
    pub min_frames: usize,
    pub options: Options,
}

impl Default for ReductionConfig {
    fn default() -> Self {
        Self {
            threads: 0,
            pipelines: 0,
            rounds: 1,
            tasks: vec![
                "offsets".to_string(),
                "correlated.sky".to_string(),
                "weighting".to_string(),
                "despike".to_string(),
            ],
            robust: false,
            extract_source: false,
            min_channels: 2,
            min_frames: 16,
            options: Options::default(),
        }
    }
}

impl ReductionConfig {
    /// The estimator for a named task: a per-task `<task>.robust` option
    /// overrides the global default.
    pub fn estimator(&self, task: &str) -> Estimator {
        let robust = self
            .options
            .get_bool(&format!("{task}.robust"))
            .unwrap_or(self.robust);
        if robust {
            Estimator::Robust
        } else {
            Estimator::MaximumLikelihood
        }
    }
}
