//! Synthetic flight extracts shared by the integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, NaiveDateTime};
use ontime_ml::config::OntimeConfig;
use ontime_ml::data::{Frame, Record, build_labels};
use ontime_ml::features::columns;
use ontime_ml::models::{GbdtParams, ModelSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Value, json};

const CARRIERS: [&str; 3] = ["GLO", "AZU", "TAM"];
const AIRPORTS: [&str; 6] = ["SBGR", "SBRJ", "SBPA", "SBFL", "SBCT", "SBKP"];

fn start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

fn fmt(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Raw extract in chronological order. Evening departures and one carrier
/// run late; every 50th row lacks its actual departure.
pub fn raw_flights(n: usize, seed: u64) -> Frame {
    let mut rng = StdRng::seed_from_u64(seed);
    let records: Vec<Record> = (0..n)
        .map(|i| {
            let scheduled = start() + Duration::minutes(97 * i as i64);
            let carrier = CARRIERS[rng.gen_range(0..CARRIERS.len())];
            let origin = rng.gen_range(0..AIRPORTS.len());
            let destination = (origin + rng.gen_range(1..AIRPORTS.len())) % AIRPORTS.len();

            let evening = (17..23).contains(&chrono::Timelike::hour(&scheduled));
            let mut delay: f64 = rng.gen_range(-5.0..10.0);
            if evening {
                delay += 25.0;
            }
            if carrier == "AZU" {
                delay += 8.0;
            }
            let actual = if i % 50 == 49 {
                Value::Null
            } else {
                json!(fmt(scheduled + Duration::seconds((delay * 60.0) as i64)))
            };

            json!({
                "partida_prevista": fmt(scheduled),
                "partida_real": actual,
                "empresa_aerea": carrier,
                "aerodromo_origem": AIRPORTS[origin],
                "aerodromo_destino": AIRPORTS[destination],
                "codigo_tipo_linha": "N",
                "situacao_voo": "REALIZADO",
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect();
    Frame::from_records(&records)
}

/// Raw extract with quality-flagged rows removed, delay minutes and the
/// binary target added.
pub fn labelled_flights(n: usize, seed: u64) -> Frame {
    let config = OntimeConfig::default();
    let (frame, _) = build_labels(
        raw_flights(n, seed),
        columns::SCHEDULED_DEPARTURE,
        columns::DELAY_MINUTES,
        &config.label,
    )
    .unwrap();
    frame
}

/// Defaults sized for small synthetic data.
pub fn test_config() -> OntimeConfig {
    let mut config = OntimeConfig::default();
    config.training.min_category_frequency = 1;
    config.model = Some(ModelSpec::GradientBoosting(GbdtParams {
        n_estimators: 30,
        max_depth: 3,
        ..Default::default()
    }));
    config
}

pub fn record(value: Value) -> Record {
    value.as_object().cloned().unwrap()
}

/// The serving scenario: a late-evening departure out of a hub.
pub fn evening_hub_record() -> Record {
    record(json!({
        "partida_prevista": "2024-03-01 22:30:00",
        "empresa_aerea": "GLO",
        "aerodromo_origem": "SBGR",
        "aerodromo_destino": "SBRJ",
        "codigo_tipo_linha": "N"
    }))
}
