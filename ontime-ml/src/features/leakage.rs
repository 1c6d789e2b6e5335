//! Drop-list filter applied last in the feature pipeline.

use super::Transformer;
use crate::config::FeatureSettings;
use crate::data::Frame;
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Removes every listed column that is present. Absent columns are ignored,
/// so a second pass is always a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeakageGuard {
    pub drop_columns: Vec<String>,
}

impl Default for LeakageGuard {
    fn default() -> Self {
        Self::new(FeatureSettings::default().leakage_columns)
    }
}

impl LeakageGuard {
    pub fn new(drop_columns: Vec<String>) -> Self {
        Self { drop_columns }
    }

    pub fn drops(&self, column: &str) -> bool {
        self.drop_columns.iter().any(|c| c == column)
    }
}

impl Transformer for LeakageGuard {
    fn name(&self) -> &'static str {
        "LeakageGuard"
    }

    fn fit(&mut self, _frame: &Frame) -> Result<(), MlError> {
        Ok(())
    }

    fn transform(&self, mut frame: Frame) -> Result<Frame, MlError> {
        let dropped = frame.drop_columns(&self.drop_columns);
        if !dropped.is_empty() {
            debug!(columns = ?dropped, "Removed leakage columns");
        }
        Ok(frame)
    }

    fn is_stateful(&self) -> bool {
        false
    }
}
