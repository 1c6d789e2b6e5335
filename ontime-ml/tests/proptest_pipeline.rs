//! Property-based tests for feature stages and partitioning using proptest.

use proptest::prelude::*;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use ontime_ml::data::{Frame, Record, as_f64};
use ontime_ml::features::{
    FeaturePipeline, GroupAverageEncoder, LeakageGuard, PeriodOfDay, Transformer, columns,
};
use ontime_ml::partition::{check_temporal_order, temporal_split, temporal_split_by_cutoff};
use serde_json::json;

const TS: &str = columns::SCHEDULED_DEPARTURE;
const CARRIERS: [&str; 4] = ["GLO", "AZU", "TAM", "PTB"];
const AIRPORTS: [&str; 4] = ["SBGR", "SBPA", "SBFL", "SBCT"];

fn base() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap()
}

fn stamp(offset_minutes: i64) -> String {
    (base() + Duration::minutes(offset_minutes))
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// One row per entry: (minutes after the base instant, carrier, origin, delay).
fn flights(rows: &[(i64, usize, usize, f64)]) -> Frame {
    let records: Vec<Record> = rows
        .iter()
        .map(|&(offset, carrier, origin, delay)| {
            json!({
                "partida_prevista": stamp(offset),
                "empresa_aerea": CARRIERS[carrier % CARRIERS.len()],
                "aerodromo_origem": AIRPORTS[origin % AIRPORTS.len()],
                "aerodromo_destino": AIRPORTS[(origin + 1) % AIRPORTS.len()],
                "codigo_tipo_linha": "N",
                "atraso_partida_min": delay,
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect();
    Frame::from_records(&records)
}

fn flight_rows(max: usize) -> impl Strategy<Value = Vec<(i64, usize, usize, f64)>> {
    prop::collection::vec((0i64..86_400, 0usize..4, 0usize..4, -30.0f64..240.0), 1..max)
}

// --- Temporal derivation ---

proptest! {
    #[test]
    fn period_of_day_follows_hour_table(hour in 0u32..24) {
        let expected = match hour {
            5..=11 => "Manhã",
            12..=17 => "Tarde",
            18..=21 => "Noite",
            _ => "Madrugada",
        };
        prop_assert_eq!(PeriodOfDay::from_hour(hour).label(), expected);
    }
}

// --- Partitioning ---

proptest! {
    #[test]
    fn temporal_split_keeps_every_row_in_order(
        rows in flight_rows(80),
        train_size in 0.1f64..0.8,
        val_size in 0.0f64..0.15,
    ) {
        let frame = flights(&rows);
        let parts = temporal_split(&frame, TS, train_size, val_size).unwrap();
        let (train, validation, test) = parts.sizes();
        prop_assert_eq!(train + validation + test, rows.len());
        prop_assert!(
            check_temporal_order(&[&parts.train, &parts.validation, &parts.test], TS).is_ok()
        );
    }

    #[test]
    fn cutoff_split_requires_ordered_cutoffs(
        rows in flight_rows(60),
        train_day in 0i64..60,
        val_day in 0i64..60,
    ) {
        let frame = flights(&rows);
        let day = |d: i64| (base() + Duration::days(d)).format("%Y-%m-%d").to_string();
        let result = temporal_split_by_cutoff(&frame, TS, &day(train_day), &day(val_day));
        if train_day > val_day {
            prop_assert!(result.is_err());
        } else {
            let parts = result.unwrap();
            let (train, validation, test) = parts.sizes();
            prop_assert_eq!(train + validation + test, rows.len());
            prop_assert!(
                check_temporal_order(&[&parts.train, &parts.validation, &parts.test], TS).is_ok()
            );
        }
    }
}

// --- Feature stages ---

proptest! {
    #[test]
    fn leakage_guard_is_idempotent(rows in flight_rows(20), with_target in any::<bool>()) {
        let mut frame = flights(&rows);
        if with_target {
            let target = vec![json!(0); frame.row_count()];
            frame.set_column(columns::TARGET, target).unwrap();
        }
        let guard = LeakageGuard::default();
        let once = guard.transform(frame).unwrap();
        let twice = guard.transform(once.clone()).unwrap();
        prop_assert!(!once.has_column(columns::DELAY_MINUTES));
        prop_assert!(!once.has_column(columns::TARGET));
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn unseen_carrier_maps_to_global_mean(rows in flight_rows(40)) {
        let mut encoder = GroupAverageEncoder::default();
        encoder.fit(&flights(&rows)).unwrap();
        let global = encoder.global_mean().unwrap();

        let expected = rows.iter().map(|r| r.3).sum::<f64>() / rows.len() as f64;
        prop_assert!((global - expected).abs() < 1e-9);

        let unseen: Record = json!({
            "empresa_aerea": "ZZZ",
            "aerodromo_origem": "XXXX",
            "aerodromo_destino": null,
        })
        .as_object()
        .cloned()
        .unwrap();
        let out = encoder.transform(Frame::from_record(&unseen)).unwrap();
        for column in [
            columns::CARRIER_MEAN_DELAY,
            columns::ORIGIN_MEAN_DELAY,
            columns::DESTINATION_MEAN_DELAY,
        ] {
            let value = as_f64(out.values(column).unwrap()[0]).unwrap();
            prop_assert!((value - global).abs() < 1e-9);
        }
    }

    #[test]
    fn fitted_pipeline_transform_is_repeatable(
        rows in flight_rows(40),
        sample in flight_rows(10),
    ) {
        let mut pipeline = FeaturePipeline::default();
        pipeline.fit(&flights(&rows)).unwrap();

        let first = pipeline.transform(flights(&sample)).unwrap();
        let second = pipeline.transform(flights(&sample)).unwrap();
        prop_assert!(!first.has_column(columns::DELAY_MINUTES));
        prop_assert_eq!(first, second);
    }
}
