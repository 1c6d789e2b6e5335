//! Calendar features derived from the scheduled departure.

use super::{Transformer, columns};
use crate::config::FeatureSettings;
use crate::data::frame::{Frame, as_f64, number, parse_timestamp};
use crate::error::MlError;
use chrono::{Datelike, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Four-valued period-of-day label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodOfDay {
    Madrugada,
    #[serde(rename = "Manhã")]
    Manha,
    Tarde,
    Noite,
}

impl PeriodOfDay {
    /// `[5, 12)` morning, `[12, 18)` afternoon, `[18, 22)` night, everything
    /// else early morning.
    pub fn from_hour(hour: u32) -> Self {
        match hour {
            5..=11 => Self::Manha,
            12..=17 => Self::Tarde,
            18..=21 => Self::Noite,
            _ => Self::Madrugada,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Madrugada => "Madrugada",
            Self::Manha => "Manhã",
            Self::Tarde => "Tarde",
            Self::Noite => "Noite",
        }
    }
}

impl std::fmt::Display for PeriodOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Stateless calendar deriver.
///
/// Adds hour, weekday (Monday = 0), month, period label, weekend flag
/// (Friday through Sunday) and peak-season flag. When the raw delay column is
/// present it also adds `atraso_log` and `atraso_capped`; both are leakage and
/// are stripped later by the guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemporalFeatures {
    pub timestamp_column: String,
    pub delay_column: String,
    pub peak_months: Vec<u32>,
    pub delay_cap_minutes: f64,
}

impl Default for TemporalFeatures {
    fn default() -> Self {
        Self::from_settings(&FeatureSettings::default())
    }
}

impl TemporalFeatures {
    pub fn from_settings(settings: &FeatureSettings) -> Self {
        Self {
            timestamp_column: settings.timestamp_column.clone(),
            delay_column: settings.delay_column.clone(),
            peak_months: settings.peak_months.clone(),
            delay_cap_minutes: settings.delay_cap_minutes,
        }
    }

    pub fn output_columns() -> [&'static str; 6] {
        [
            columns::HOUR,
            columns::DAY_OF_WEEK,
            columns::MONTH,
            columns::PERIOD_OF_DAY,
            columns::WEEKEND,
            columns::PEAK_SEASON,
        ]
    }
}

impl Transformer for TemporalFeatures {
    fn name(&self) -> &'static str {
        "TemporalFeatures"
    }

    fn fit(&mut self, _frame: &Frame) -> Result<(), MlError> {
        Ok(())
    }

    fn transform(&self, mut frame: Frame) -> Result<Frame, MlError> {
        let idx = frame.require_column(&self.timestamp_column)?;
        let n = frame.row_count();

        let mut hour = Vec::with_capacity(n);
        let mut weekday = Vec::with_capacity(n);
        let mut month = Vec::with_capacity(n);
        let mut period = Vec::with_capacity(n);
        let mut weekend = Vec::with_capacity(n);
        let mut peak = Vec::with_capacity(n);
        let mut unparseable = 0usize;

        for r in 0..n {
            match parse_timestamp(frame.value(r, idx)) {
                Some(ts) => {
                    let dow = ts.weekday().num_days_from_monday();
                    hour.push(Value::from(ts.hour()));
                    weekday.push(Value::from(dow));
                    month.push(Value::from(ts.month()));
                    period.push(Value::from(PeriodOfDay::from_hour(ts.hour()).label()));
                    weekend.push(Value::from(u8::from(dow >= 4)));
                    peak.push(Value::from(u8::from(
                        self.peak_months.contains(&ts.month()),
                    )));
                }
                None => {
                    unparseable += 1;
                    for col in [
                        &mut hour,
                        &mut weekday,
                        &mut month,
                        &mut period,
                        &mut weekend,
                        &mut peak,
                    ] {
                        col.push(Value::Null);
                    }
                }
            }
        }

        if unparseable > 0 {
            debug!(
                rows = unparseable,
                column = %self.timestamp_column,
                "Unparseable timestamps produce missing temporal features"
            );
        }

        for (name, values) in Self::output_columns()
            .into_iter()
            .zip([hour, weekday, month, period, weekend, peak])
        {
            frame.set_column(name, values)?;
        }

        if let Ok(delays) = frame.values(&self.delay_column) {
            let delays: Vec<Option<f64>> = delays.into_iter().map(as_f64).collect();
            let log: Vec<Value> = delays
                .iter()
                .map(|d| d.map_or(Value::Null, |d| number(d.max(0.0).ln_1p())))
                .collect();
            let capped: Vec<Value> = delays
                .iter()
                .map(|d| {
                    d.map_or(Value::Null, |d| {
                        number(d.clamp(0.0, self.delay_cap_minutes))
                    })
                })
                .collect();
            frame.set_column(columns::DELAY_LOG, log)?;
            frame.set_column(columns::DELAY_CAPPED, capped)?;
        }

        Ok(frame)
    }

    fn is_stateful(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use serde_json::json;

    fn frame(values: &[Value]) -> Frame {
        let records: Vec<Record> = values
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect();
        Frame::from_records(&records)
    }

    #[test]
    fn test_period_boundaries() {
        assert_eq!(PeriodOfDay::from_hour(0), PeriodOfDay::Madrugada);
        assert_eq!(PeriodOfDay::from_hour(4), PeriodOfDay::Madrugada);
        assert_eq!(PeriodOfDay::from_hour(5), PeriodOfDay::Manha);
        assert_eq!(PeriodOfDay::from_hour(11), PeriodOfDay::Manha);
        assert_eq!(PeriodOfDay::from_hour(12), PeriodOfDay::Tarde);
        assert_eq!(PeriodOfDay::from_hour(17), PeriodOfDay::Tarde);
        assert_eq!(PeriodOfDay::from_hour(18), PeriodOfDay::Noite);
        assert_eq!(PeriodOfDay::from_hour(21), PeriodOfDay::Noite);
        assert_eq!(PeriodOfDay::from_hour(22), PeriodOfDay::Madrugada);
        assert_eq!(PeriodOfDay::from_hour(23), PeriodOfDay::Madrugada);
        assert_eq!(PeriodOfDay::Manha.label(), "Manhã");
        assert_eq!(
            serde_json::to_value(PeriodOfDay::Manha).unwrap(),
            json!("Manhã")
        );
    }

    #[test]
    fn test_transform_derives_calendar_columns() {
        // 2024-03-01 is a Friday
        let out = TemporalFeatures::default()
            .transform(frame(&[json!({"partida_prevista": "2024-03-01 22:30:00"})]))
            .unwrap();
        let row = &out.to_records()[0];
        assert_eq!(row["hora_dia"], json!(22));
        assert_eq!(row["dia_semana"], json!(4));
        assert_eq!(row["mes_ano"], json!(3));
        assert_eq!(row["periodo_dia"], json!("Madrugada"));
        assert_eq!(row["fim_de_semana"], json!(1));
        assert_eq!(row["alta_temporada"], json!(0));
        assert!(!out.has_column("atraso_log"));
    }

    #[test]
    fn test_peak_months_and_weekdays() {
        // 2024-07-03 is a Wednesday, 2024-12-22 a Sunday
        let out = TemporalFeatures::default()
            .transform(frame(&[
                json!({"partida_prevista": "2024-07-03 06:00:00"}),
                json!({"partida_prevista": "2024-12-22 13:15:00"}),
            ]))
            .unwrap();
        let rows = out.to_records();
        assert_eq!(rows[0]["alta_temporada"], json!(1));
        assert_eq!(rows[0]["fim_de_semana"], json!(0));
        assert_eq!(rows[0]["periodo_dia"], json!("Manhã"));
        assert_eq!(rows[1]["alta_temporada"], json!(1));
        assert_eq!(rows[1]["fim_de_semana"], json!(1));
        assert_eq!(rows[1]["dia_semana"], json!(6));
    }

    #[test]
    fn test_unparseable_timestamp_is_missing() {
        let out = TemporalFeatures::default()
            .transform(frame(&[json!({"partida_prevista": "31/31/2024 99:99"})]))
            .unwrap();
        let row = &out.to_records()[0];
        for col in TemporalFeatures::output_columns() {
            assert_eq!(row[col], Value::Null, "{col}");
        }
    }

    #[test]
    fn test_delay_variants_when_delay_present() {
        let out = TemporalFeatures::default()
            .transform(frame(&[
                json!({"partida_prevista": "2024-03-01 10:00:00", "atraso_partida_min": 300.0}),
                json!({"partida_prevista": "2024-03-01 10:00:00", "atraso_partida_min": -7.0}),
                json!({"partida_prevista": "2024-03-01 10:00:00", "atraso_partida_min": null}),
            ]))
            .unwrap();
        let rows = out.to_records();
        assert_eq!(rows[0]["atraso_capped"], json!(120.0));
        assert!((rows[0]["atraso_log"].as_f64().unwrap() - 301f64.ln()).abs() < 1e-12);
        assert_eq!(rows[1]["atraso_capped"], json!(0.0));
        assert_eq!(rows[1]["atraso_log"], json!(0.0));
        assert_eq!(rows[2]["atraso_log"], Value::Null);
    }

    #[test]
    fn test_missing_timestamp_column() {
        let err = TemporalFeatures::default()
            .transform(frame(&[json!({"empresa_aerea": "GLO"})]))
            .unwrap_err();
        assert!(matches!(err, MlError::MissingColumn(c) if c == "partida_prevista"));
    }
}
