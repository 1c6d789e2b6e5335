//! Column typing handed to the pre-processor.

use super::columns;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which derived columns are numeric and which are categorical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureConfig {
    #[serde(default = "default_numeric")]
    pub numeric: Vec<String>,
    #[serde(default = "default_categorical")]
    pub categorical: Vec<String>,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            numeric: default_numeric(),
            categorical: default_categorical(),
        }
    }
}

fn default_numeric() -> Vec<String> {
    [
        columns::HOUR,
        columns::DAY_OF_WEEK,
        columns::MONTH,
        columns::WEEKEND,
        columns::PEAK_SEASON,
        columns::HOUR_SIN,
        columns::HOUR_COS,
        columns::IS_HUB,
        columns::CARRIER_MEAN_DELAY,
        columns::ORIGIN_MEAN_DELAY,
        columns::DESTINATION_MEAN_DELAY,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_categorical() -> Vec<String> {
    [
        columns::CARRIER,
        columns::ORIGIN,
        columns::DESTINATION,
        columns::LINE_TYPE,
        columns::PERIOD_OF_DAY,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl FeatureConfig {
    pub fn new(numeric: Vec<String>, categorical: Vec<String>) -> Self {
        Self {
            numeric,
            categorical,
        }
    }

    /// All configured columns, numeric first.
    pub fn all_columns(&self) -> Vec<String> {
        self.numeric
            .iter()
            .chain(self.categorical.iter())
            .cloned()
            .collect()
    }

    /// Check the two lists are disjoint, duplicate-free, non-empty together,
    /// and drawn from `guaranteed`.
    pub fn validate(&self, guaranteed: &[String]) -> Result<(), MlError> {
        if self.numeric.is_empty() && self.categorical.is_empty() {
            return Err(MlError::config("feature configuration lists no columns"));
        }

        let numeric: BTreeSet<&str> = self.numeric.iter().map(String::as_str).collect();
        let categorical: BTreeSet<&str> = self.categorical.iter().map(String::as_str).collect();
        if numeric.len() != self.numeric.len() || categorical.len() != self.categorical.len() {
            return Err(MlError::config("feature configuration repeats a column"));
        }

        let overlap: Vec<&str> = numeric.intersection(&categorical).copied().collect();
        if !overlap.is_empty() {
            return Err(MlError::config(format!(
                "columns configured as both numeric and categorical: {overlap:?}"
            )));
        }

        let guaranteed: BTreeSet<&str> = guaranteed.iter().map(String::as_str).collect();
        let unknown: Vec<&str> = numeric
            .union(&categorical)
            .filter(|c| !guaranteed.contains(*c))
            .copied()
            .collect();
        if !unknown.is_empty() {
            return Err(MlError::config(format!(
                "configured columns are not produced by the feature pipeline: {unknown:?}"
            )));
        }
        Ok(())
    }
}
