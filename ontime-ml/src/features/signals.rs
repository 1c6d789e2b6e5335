//! Cyclic hour encoding and the hub-airport flag.

use super::{Transformer, columns};
use crate::config::FeatureSettings;
use crate::data::frame::{Frame, as_category, as_f64, number};
use crate::error::MlError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::f64::consts::PI;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedSignals {
    pub origin_column: String,
    pub destination_column: String,
    pub hub_airports: BTreeSet<String>,
}

impl Default for DerivedSignals {
    fn default() -> Self {
        Self::from_settings(&FeatureSettings::default())
    }
}

impl DerivedSignals {
    pub fn from_settings(settings: &FeatureSettings) -> Self {
        Self {
            origin_column: settings.origin_column.clone(),
            destination_column: settings.destination_column.clone(),
            hub_airports: settings.hub_airports.iter().cloned().collect(),
        }
    }

    pub fn output_columns() -> [&'static str; 3] {
        [columns::HOUR_SIN, columns::HOUR_COS, columns::IS_HUB]
    }

    fn is_hub(&self, code: Option<String>) -> bool {
        code.is_some_and(|c| self.hub_airports.contains(&c.to_uppercase()))
    }
}

/// `(sin(2πh/24), cos(2πh/24))`.
pub fn cyclic_hour(hour: f64) -> (f64, f64) {
    let angle = 2.0 * PI * hour / 24.0;
    (angle.sin(), angle.cos())
}

impl Transformer for DerivedSignals {
    fn name(&self) -> &'static str {
        "DerivedSignals"
    }

    fn fit(&mut self, _frame: &Frame) -> Result<(), MlError> {
        Ok(())
    }

    fn transform(&self, mut frame: Frame) -> Result<Frame, MlError> {
        let hours: Vec<Option<f64>> = frame
            .values(columns::HOUR)?
            .into_iter()
            .map(as_f64)
            .collect();
        let (sin, cos): (Vec<Value>, Vec<Value>) = hours
            .iter()
            .map(|h| match h {
                Some(h) => {
                    let (s, c) = cyclic_hour(*h);
                    (number(s), number(c))
                }
                None => (Value::Null, Value::Null),
            })
            .unzip();

        let origin = frame.require_column(&self.origin_column)?;
        let destination = frame.require_column(&self.destination_column)?;
        let hub: Vec<Value> = (0..frame.row_count())
            .map(|r| {
                let flagged = self.is_hub(as_category(frame.value(r, origin)))
                    || self.is_hub(as_category(frame.value(r, destination)));
                Value::from(u8::from(flagged))
            })
            .collect();

        frame.set_column(columns::HOUR_SIN, sin)?;
        frame.set_column(columns::HOUR_COS, cos)?;
        frame.set_column(columns::IS_HUB, hub)?;
        Ok(frame)
    }

    fn is_stateful(&self) -> bool {
        false
    }
}
