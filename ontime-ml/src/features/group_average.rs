//! Learned per-group mean delay with a global fallback.
//!
//! Fitting groups the training rows by carrier, origin and destination and
//! records the mean of the delay column for each group plus the unconditional
//! mean. Transform substitutes the learned mean for each key and falls back to
//! the global mean for unseen or missing keys.

use super::{Transformer, columns};
use crate::config::FeatureSettings;
use crate::data::frame::{Frame, as_category, as_f64, number};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Mean delay per category of one grouping column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTable {
    pub source_column: String,
    pub output_column: String,
    pub means: BTreeMap<String, f64>,
}

impl GroupTable {
    pub fn lookup(&self, key: Option<&str>) -> Option<f64> {
        key.and_then(|k| self.means.get(k).copied())
    }
}

/// Everything learned by [`GroupAverageEncoder::fit`]. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAverageState {
    pub global_mean: f64,
    pub tables: Vec<GroupTable>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupAverageEncoder {
    pub delay_column: String,
    /// `(grouping column, output column)` pairs.
    pub groups: Vec<(String, String)>,
    state: Option<GroupAverageState>,
}

impl Default for GroupAverageEncoder {
    fn default() -> Self {
        Self::from_settings(&FeatureSettings::default())
    }
}

impl GroupAverageEncoder {
    pub fn from_settings(settings: &FeatureSettings) -> Self {
        Self {
            delay_column: settings.delay_column.clone(),
            groups: vec![
                (
                    settings.carrier_column.clone(),
                    columns::CARRIER_MEAN_DELAY.to_string(),
                ),
                (
                    settings.origin_column.clone(),
                    columns::ORIGIN_MEAN_DELAY.to_string(),
                ),
                (
                    settings.destination_column.clone(),
                    columns::DESTINATION_MEAN_DELAY.to_string(),
                ),
            ],
            state: None,
        }
    }

    pub fn state(&self) -> Option<&GroupAverageState> {
        self.state.as_ref()
    }

    pub fn global_mean(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.global_mean)
    }

    pub fn output_columns(&self) -> Vec<&str> {
        self.groups.iter().map(|(_, out)| out.as_str()).collect()
    }
}

impl Transformer for GroupAverageEncoder {
    fn name(&self) -> &'static str {
        "GroupAverageEncoder"
    }

    fn fit(&mut self, frame: &Frame) -> Result<(), MlError> {
        let delay_idx = frame.column_index(&self.delay_column).ok_or_else(|| {
            MlError::config(format!(
                "delay column '{}' is required to fit group averages",
                self.delay_column
            ))
        })?;

        let delays: Vec<Option<f64>> = (0..frame.row_count())
            .map(|r| as_f64(frame.value(r, delay_idx)))
            .collect();
        let observed: Vec<f64> = delays.iter().flatten().copied().collect();
        if observed.is_empty() {
            return Err(MlError::dataset(format!(
                "no non-missing values in '{}' to average",
                self.delay_column
            )));
        }
        let global_mean = observed.iter().sum::<f64>() / observed.len() as f64;

        let mut tables = Vec::with_capacity(self.groups.len());
        for (source, output) in &self.groups {
            let idx = frame.require_column(source)?;
            let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
            for (r, delay) in delays.iter().enumerate() {
                let (Some(delay), Some(key)) = (delay, as_category(frame.value(r, idx))) else {
                    continue;
                };
                let entry = sums.entry(key).or_insert((0.0, 0));
                entry.0 += delay;
                entry.1 += 1;
            }
            let means: BTreeMap<String, f64> = sums
                .into_iter()
                .map(|(k, (sum, count))| (k, sum / count as f64))
                .collect();
            debug!(column = %source, groups = means.len(), "Learned group means");
            tables.push(GroupTable {
                source_column: source.clone(),
                output_column: output.clone(),
                means,
            });
        }

        info!(
            rows = observed.len(),
            global_mean, "Fitted group-average encoder"
        );
        self.state = Some(GroupAverageState {
            global_mean,
            tables,
        });
        Ok(())
    }

    fn transform(&self, mut frame: Frame) -> Result<Frame, MlError> {
        let state = self.state.as_ref().ok_or(MlError::NotFitted {
            component: "GroupAverageEncoder",
        })?;

        for table in &state.tables {
            let idx = frame.require_column(&table.source_column)?;
            let mut fallbacks = 0usize;
            let values: Vec<Value> = (0..frame.row_count())
                .map(|r| {
                    let key = as_category(frame.value(r, idx));
                    let mean = table.lookup(key.as_deref()).unwrap_or_else(|| {
                        fallbacks += 1;
                        state.global_mean
                    });
                    number(mean)
                })
                .collect();
            if fallbacks > 0 {
                debug!(
                    column = %table.source_column,
                    rows = fallbacks,
                    "Unseen or missing keys mapped to the global mean"
                );
            }
            frame.set_column(&table.output_column, values)?;
        }
        Ok(frame)
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn is_fitted(&self) -> bool {
        self.state.is_some()
    }
}
