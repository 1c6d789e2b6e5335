//! Target construction for historical extracts.
//!
//! Rows are flagged for quality problems, flagged rows are removed, and the
//! survivors gain the departure delay in minutes plus the binary target.

use crate::config::LabelConfig;
use crate::data::frame::{Frame, number, parse_timestamp};
use crate::error::MlError;
use chrono::Datelike;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

/// Per-row quality problems detected before labelling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityFlags {
    pub missing_scheduled: bool,
    pub missing_actual: bool,
    pub year_out_of_range: bool,
}

impl QualityFlags {
    pub fn any(&self) -> bool {
        self.missing_scheduled || self.missing_actual || self.year_out_of_range
    }
}

/// Counts gathered while labelling one extract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelReport {
    pub total_rows: usize,
    pub missing_scheduled: usize,
    pub missing_actual: usize,
    pub year_out_of_range: usize,
    pub kept_rows: usize,
    pub positives: usize,
}

impl LabelReport {
    pub fn positive_rate(&self) -> f64 {
        if self.kept_rows == 0 {
            0.0
        } else {
            self.positives as f64 / self.kept_rows as f64
        }
    }
}

/// Flag one row given its scheduled and actual departure cells.
pub fn quality_flags(scheduled: &Value, actual: &Value, config: &LabelConfig) -> QualityFlags {
    let sched = parse_timestamp(scheduled);
    QualityFlags {
        missing_scheduled: sched.is_none(),
        missing_actual: parse_timestamp(actual).is_none(),
        year_out_of_range: sched
            .map(|ts| ts.year() < config.min_year || ts.year() > config.max_year)
            .unwrap_or(false),
    }
}

/// Drop flagged rows, then add `delay_column` (minutes, may be negative) and
/// the binary target column.
pub fn build_labels(
    mut frame: Frame,
    scheduled_column: &str,
    delay_column: &str,
    config: &LabelConfig,
) -> Result<(Frame, LabelReport), MlError> {
    let sched_idx = frame.require_column(scheduled_column)?;
    let actual_idx = frame.require_column(&config.actual_departure_column)?;

    let mut report = LabelReport {
        total_rows: frame.row_count(),
        ..Default::default()
    };

    let mut delays = Vec::with_capacity(frame.row_count());
    let mut keep = Vec::with_capacity(frame.row_count());
    for (i, row) in frame.rows.iter().enumerate() {
        let scheduled = row.get(sched_idx).unwrap_or(&Value::Null);
        let actual = row.get(actual_idx).unwrap_or(&Value::Null);
        let flags = quality_flags(scheduled, actual, config);
        report.missing_scheduled += flags.missing_scheduled as usize;
        report.missing_actual += flags.missing_actual as usize;
        report.year_out_of_range += flags.year_out_of_range as usize;
        if flags.any() {
            continue;
        }
        if let (Some(s), Some(a)) = (parse_timestamp(scheduled), parse_timestamp(actual)) {
            delays.push((a - s).num_milliseconds() as f64 / 60_000.0);
            keep.push(i);
        }
    }

    if keep.len() < frame.row_count() {
        warn!(
            dropped = frame.row_count() - keep.len(),
            missing_scheduled = report.missing_scheduled,
            missing_actual = report.missing_actual,
            year_out_of_range = report.year_out_of_range,
            "Dropped rows failing label quality checks"
        );
        frame = frame.select_rows(&keep);
    }

    let targets: Vec<Value> = delays
        .iter()
        .map(|&d| Value::from(u8::from(d > config.threshold_minutes)))
        .collect();
    report.positives = delays
        .iter()
        .filter(|&&d| d > config.threshold_minutes)
        .count();
    report.kept_rows = delays.len();

    frame.set_column(delay_column, delays.into_iter().map(number).collect())?;
    frame.set_column(&config.target_column, targets)?;

    info!(
        kept = report.kept_rows,
        positives = report.positives,
        threshold = config.threshold_minutes,
        "Built delay labels"
    );
    Ok((frame, report))
}

/// Target column as class labels. Anything other than a 0/1 number is an error.
pub fn target_vector(values: &[Value]) -> Result<Vec<u8>, MlError> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| match crate::data::frame::as_f64(v) {
            Some(x) if x == 0.0 => Ok(0),
            Some(x) if x == 1.0 => Ok(1),
            _ => Err(MlError::dataset(format!(
                "target value at row {i} is not 0 or 1: {v}"
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::frame::Record;
    use serde_json::json;

    fn frame() -> Frame {
        let rows = [
            json!({"partida_prevista": "2024-01-10 08:00:00", "partida_real": "2024-01-10 08:10:00"}),
            json!({"partida_prevista": "2024-01-10 09:00:00", "partida_real": "2024-01-10 09:45:30"}),
            json!({"partida_prevista": "2024-01-10 10:00:00", "partida_real": null}),
            json!({"partida_prevista": "2019-01-10 10:00:00", "partida_real": "2019-01-10 10:00:00"}),
            json!({"partida_prevista": "garbage", "partida_real": "2024-01-10 10:00:00"}),
            json!({"partida_prevista": "2024-01-10 11:00:00", "partida_real": "2024-01-10 10:55:00"}),
        ];
        let records: Vec<Record> = rows
            .iter()
            .map(|r| r.as_object().cloned().unwrap())
            .collect();
        Frame::from_records(&records)
    }

    #[test]
    fn test_build_labels_filters_and_thresholds() {
        let config = LabelConfig::default();
        let (out, report) =
            build_labels(frame(), "partida_prevista", "atraso_partida_min", &config).unwrap();

        assert_eq!(report.total_rows, 6);
        assert_eq!(report.missing_actual, 1);
        assert_eq!(report.missing_scheduled, 1);
        assert_eq!(report.year_out_of_range, 1);
        assert_eq!(report.kept_rows, 3);
        assert_eq!(report.positives, 1);

        let delays = out.values("atraso_partida_min").unwrap();
        assert_eq!(delays[0], &json!(10.0));
        assert_eq!(delays[1], &json!(45.5));
        assert_eq!(delays[2], &json!(-5.0));
        let target = out.values("atrasado").unwrap();
        assert_eq!(target, vec![&json!(0), &json!(1), &json!(0)]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let config = LabelConfig {
            threshold_minutes: 10.0,
            ..Default::default()
        };
        let (out, _) =
            build_labels(frame(), "partida_prevista", "atraso_partida_min", &config).unwrap();
        // exactly 10 minutes late is on time
        assert_eq!(out.values("atrasado").unwrap()[0], &json!(0));
    }

    #[test]
    fn test_missing_actual_column_is_config_error() {
        let records = vec![
            json!({"partida_prevista": "2024-01-10 08:00:00"})
                .as_object()
                .cloned()
                .unwrap(),
        ];
        let err = build_labels(
            Frame::from_records(&records),
            "partida_prevista",
            "atraso_partida_min",
            &LabelConfig::default(),
        )
        .unwrap_err();
        assert!(matches!(err, MlError::MissingColumn(c) if c == "partida_real"));
    }

    #[test]
    fn test_target_vector() {
        assert_eq!(
            target_vector(&[json!(0), json!(1.0), json!("1")]).unwrap(),
            vec![0, 1, 1]
        );
        assert!(target_vector(&[json!(2)]).is_err());
        assert!(target_vector(&[Value::Null]).is_err());
    }
}
