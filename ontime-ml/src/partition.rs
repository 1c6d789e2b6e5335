//! Train/validation/test partitioning.
//!
//! Two modes: stratified (class proportions preserved, row order ignored) and
//! time-ordered (ascending by timestamp, cut at proportional indices or
//! calendar cutoffs). Every time-ordered result is checked so that no row in
//! an earlier partition is later than any row in the next one.

use crate::config::{SplitConfig, SplitStrategy};
use crate::data::frame::{Frame, as_category, format_timestamp, parse_timestamp};
use crate::error::MlError;
use chrono::NaiveDateTime;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Three partitions sharing one schema. `validation` is empty for
/// stratified splits.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionTriple {
    pub train: Frame,
    pub validation: Frame,
    pub test: Frame,
}

impl PartitionTriple {
    pub fn sizes(&self) -> (usize, usize, usize) {
        (
            self.train.row_count(),
            self.validation.row_count(),
            self.test.row_count(),
        )
    }
}

/// Split by a fixed test fraction while preserving target class proportions.
pub fn stratified_split(
    frame: &Frame,
    target_column: &str,
    test_size: f64,
    seed: u64,
) -> Result<(Frame, Frame), MlError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(MlError::config(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let target = frame.require_column(target_column)?;

    let mut by_class: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for r in 0..frame.row_count() {
        let class = as_category(frame.value(r, target)).ok_or_else(|| {
            MlError::dataset(format!("row {r} has no value in '{target_column}'"))
        })?;
        by_class.entry(class).or_default().push(r);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut test = Vec::new();
    for (class, mut indices) in by_class {
        indices.shuffle(&mut rng);
        let n_test = ((indices.len() as f64) * test_size).round() as usize;
        let n_test = n_test.min(indices.len());
        debug!(class = %class, rows = indices.len(), test = n_test, "Stratum allocated");
        test.extend_from_slice(&indices[..n_test]);
        train.extend_from_slice(&indices[n_test..]);
    }
    if train.is_empty() || test.is_empty() {
        return Err(MlError::dataset(format!(
            "stratified split of {} rows with test_size {test_size} leaves an empty partition",
            frame.row_count()
        )));
    }
    train.sort_unstable();
    test.sort_unstable();

    info!(
        train = train.len(),
        test = test.len(),
        "Stratified split complete"
    );
    Ok((frame.select_rows(&train), frame.select_rows(&test)))
}

/// Row indices with a parseable timestamp, stably sorted ascending.
fn sorted_by_time(
    frame: &Frame,
    timestamp_column: &str,
) -> Result<Vec<(usize, NaiveDateTime)>, MlError> {
    let idx = frame.require_column(timestamp_column)?;
    let mut rows: Vec<(usize, NaiveDateTime)> = (0..frame.row_count())
        .filter_map(|r| parse_timestamp(frame.value(r, idx)).map(|ts| (r, ts)))
        .collect();
    let excluded = frame.row_count() - rows.len();
    if excluded > 0 {
        warn!(
            rows = excluded,
            column = %timestamp_column,
            "Rows with unparseable timestamps excluded from time-ordered split"
        );
    }
    rows.sort_by_key(|&(_, ts)| ts);
    Ok(rows)
}

fn proportional_count(n: usize, fraction: f64) -> usize {
    ((n as f64) * fraction + 1e-9).floor() as usize
}

fn select(frame: &Frame, rows: &[(usize, NaiveDateTime)]) -> Frame {
    let indices: Vec<usize> = rows.iter().map(|&(i, _)| i).collect();
    frame.select_rows(&indices)
}

/// Time-ordered split at proportional indices (e.g. 70/10/20).
pub fn temporal_split(
    frame: &Frame,
    timestamp_column: &str,
    train_size: f64,
    val_size: f64,
) -> Result<PartitionTriple, MlError> {
    if !(train_size > 0.0 && val_size >= 0.0 && train_size + val_size < 1.0) {
        return Err(MlError::config(format!(
            "invalid temporal split sizes: train {train_size}, validation {val_size}"
        )));
    }
    let rows = sorted_by_time(frame, timestamp_column)?;
    let n = rows.len();
    let train_end = proportional_count(n, train_size);
    let val_end = proportional_count(n, train_size + val_size).min(n);

    let triple = PartitionTriple {
        train: select(frame, &rows[..train_end]),
        validation: select(frame, &rows[train_end..val_end]),
        test: select(frame, &rows[val_end..]),
    };
    check_temporal_order(
        &[&triple.train, &triple.validation, &triple.test],
        timestamp_column,
    )?;
    let (train, validation, test) = triple.sizes();
    info!(train, validation, test, "Temporal split complete");
    Ok(triple)
}

/// Upper bound of a calendar cutoff, inclusive.
///
/// A bare date (`2022-12-31`) means midnight at the start of that day, so
/// later departures on the same day fall into the next partition.
pub fn parse_cutoff(raw: &str) -> Result<NaiveDateTime, MlError> {
    let raw = raw.trim();
    parse_timestamp(&Value::String(raw.to_string()))
        .ok_or_else(|| MlError::config(format!("unparseable cutoff '{raw}'")))
}

/// Time-ordered split at explicit calendar cutoffs: train up to
/// `train_cutoff`, validation up to `val_cutoff`, test after.
pub fn temporal_split_by_cutoff(
    frame: &Frame,
    timestamp_column: &str,
    train_cutoff: &str,
    val_cutoff: &str,
) -> Result<PartitionTriple, MlError> {
    let train_end = parse_cutoff(train_cutoff)?;
    let val_end = parse_cutoff(val_cutoff)?;
    if train_end > val_end {
        return Err(MlError::invariant(format!(
            "train cutoff {train_cutoff} is after validation cutoff {val_cutoff}"
        )));
    }

    let rows = sorted_by_time(frame, timestamp_column)?;
    let train_len = rows.partition_point(|&(_, ts)| ts <= train_end);
    let val_len = rows.partition_point(|&(_, ts)| ts <= val_end);

    let triple = PartitionTriple {
        train: select(frame, &rows[..train_len]),
        validation: select(frame, &rows[train_len..val_len]),
        test: select(frame, &rows[val_len..]),
    };
    check_temporal_order(
        &[&triple.train, &triple.validation, &triple.test],
        timestamp_column,
    )?;
    let (train, validation, test) = triple.sizes();
    info!(
        train,
        validation,
        test,
        train_cutoff = %format_timestamp(&train_end),
        val_cutoff = %format_timestamp(&val_end),
        "Cutoff split complete"
    );
    Ok(triple)
}

/// Assert `max(partition i) <= min(partition i + 1)` across consecutive
/// non-empty partitions.
pub fn check_temporal_order(partitions: &[&Frame], timestamp_column: &str) -> Result<(), MlError> {
    let mut previous: Option<(usize, NaiveDateTime)> = None;
    for (i, part) in partitions.iter().enumerate() {
        if part.is_empty() {
            warn!(partition = i, "Empty partition skipped in temporal order check");
            continue;
        }
        let idx = part.require_column(timestamp_column)?;
        let stamps: Vec<NaiveDateTime> = (0..part.row_count())
            .filter_map(|r| parse_timestamp(part.value(r, idx)))
            .collect();
        let (Some(min), Some(max)) = (stamps.iter().min(), stamps.iter().max()) else {
            continue;
        };
        if let Some((j, prev_max)) = previous {
            if prev_max > *min {
                return Err(MlError::invariant(format!(
                    "partition {j} ends at {} but partition {i} starts at {}",
                    format_timestamp(&prev_max),
                    format_timestamp(min)
                )));
            }
        }
        previous = Some((i, *max));
    }
    Ok(())
}

/// Dispatch on the configured strategy.
pub fn split(
    frame: &Frame,
    config: &SplitConfig,
    timestamp_column: &str,
    target_column: &str,
) -> Result<PartitionTriple, MlError> {
    match &config.strategy {
        SplitStrategy::Stratified { test_size } => {
            let (train, test) = stratified_split(frame, target_column, *test_size, config.seed)?;
            Ok(PartitionTriple {
                validation: Frame::new(train.columns.clone()),
                train,
                test,
            })
        }
        SplitStrategy::Temporal {
            train_size,
            val_size,
        } => temporal_split(frame, timestamp_column, *train_size, *val_size),
        SplitStrategy::Cutoff {
            train_cutoff,
            val_cutoff,
        } => temporal_split_by_cutoff(frame, timestamp_column, train_cutoff, val_cutoff),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Record;
    use serde_json::json;

    fn frame(n: usize) -> Frame {
        // deliberately shuffled day order
        let records: Vec<Record> = (0..n)
            .map(|i| {
                let day = (i * 7) % n + 1;
                json!({
                    "partida_prevista": format!("2024-01-{day:02} 10:00:00"),
                    "atrasado": u8::from(i % 4 == 0),
                })
                .as_object()
                .cloned()
                .unwrap()
            })
            .collect();
        Frame::from_records(&records)
    }

    #[test]
    fn test_stratified_preserves_proportions() {
        let f = frame(20);
        let (train, test) = stratified_split(&f, "atrasado", 0.2, 7).unwrap();
        assert_eq!(train.row_count() + test.row_count(), 20);
        let positives = |f: &Frame| {
            f.values("atrasado")
                .unwrap()
                .into_iter()
                .filter(|v| **v == json!(1))
                .count()
        };
        assert_eq!(positives(&test), 1);
        assert_eq!(positives(&train), 4);
        assert_eq!(test.row_count(), 4);
    }

    #[test]
    fn test_stratified_is_seeded() {
        let f = frame(20);
        let a = stratified_split(&f, "atrasado", 0.3, 11).unwrap();
        let b = stratified_split(&f, "atrasado", 0.3, 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_stratified_rejects_bad_fraction() {
        assert!(stratified_split(&frame(10), "atrasado", 1.0, 0).is_err());
        assert!(matches!(
            stratified_split(&frame(10), "nope", 0.2, 0),
            Err(MlError::MissingColumn(_))
        ));
    }

    #[test]
    fn test_temporal_split_orders_and_cuts() {
        let f = frame(10);
        let triple = temporal_split(&f, "partida_prevista", 0.7, 0.1).unwrap();
        assert_eq!(triple.sizes(), (7, 1, 2));
        assert_eq!(
            triple.validation.values("partida_prevista").unwrap()[0],
            &json!("2024-01-08 10:00:00")
        );
        check_temporal_order(
            &[&triple.train, &triple.validation, &triple.test],
            "partida_prevista",
        )
        .unwrap();
    }

    #[test]
    fn test_temporal_split_cuts_at_cumulative_fraction() {
        // 15 * 0.7 = 10.5 and 15 * 0.8 = 12: validation holds rows 10 and 11
        let f = frame(15);
        let triple = temporal_split(&f, "partida_prevista", 0.7, 0.1).unwrap();
        assert_eq!(triple.sizes(), (10, 2, 3));
        assert_eq!(
            triple.test.values("partida_prevista").unwrap()[0],
            &json!("2024-01-13 10:00:00")
        );
    }

    #[test]
    fn test_bare_date_cutoff_is_midnight() {
        let f = frame(10);
        let triple =
            temporal_split_by_cutoff(&f, "partida_prevista", "2024-01-05", "2024-01-07").unwrap();
        // 2024-01-05 10:00 is after the first cutoff
        assert_eq!(triple.sizes(), (4, 2, 4));
    }

    #[test]
    fn test_cutoff_day_departures_move_to_next_partition() {
        let records: Vec<Record> = [
            "2022-12-30 08:00:00",
            "2022-12-31 10:00:00",
            "2023-06-01 12:00:00",
            "2024-01-05 09:30:00",
        ]
        .iter()
        .map(|ts| json!({ "partida_prevista": ts }).as_object().cloned().unwrap())
        .collect();
        let f = Frame::from_records(&records);
        let triple =
            temporal_split_by_cutoff(&f, "partida_prevista", "2022-12-31", "2023-12-31").unwrap();
        assert_eq!(triple.sizes(), (1, 2, 1));
        assert_eq!(
            triple.validation.values("partida_prevista").unwrap()[0],
            &json!("2022-12-31 10:00:00")
        );
    }

    #[test]
    fn test_cutoff_with_time_is_literal() {
        let f = frame(10);
        let triple = temporal_split_by_cutoff(
            &f,
            "partida_prevista",
            "2024-01-05 10:00:00",
            "2024-01-07 10:00:00",
        )
        .unwrap();
        assert_eq!(triple.sizes(), (5, 2, 3));
    }

    #[test]
    fn test_reversed_cutoffs_raise() {
        let err = temporal_split_by_cutoff(&frame(10), "partida_prevista", "2024-01-07", "2024-01-05")
            .unwrap_err();
        assert!(matches!(err, MlError::InvariantViolation(_)));
    }

    #[test]
    fn test_order_check_detects_overlap() {
        let f = frame(10);
        let late = f.select_rows(&[0]); // 2024-01-01
        let early = f.select_rows(&[1]); // 2024-01-08
        let err = check_temporal_order(&[&early, &late], "partida_prevista").unwrap_err();
        assert!(matches!(err, MlError::InvariantViolation(_)));
        check_temporal_order(&[&late, &Frame::new(f.columns.clone()), &early], "partida_prevista")
            .unwrap();
    }

    #[test]
    fn test_unparseable_rows_are_excluded() {
        let mut f = frame(4);
        let idx = f.column_index("partida_prevista").unwrap();
        f.rows[0][idx] = json!("??");
        let triple = temporal_split(&f, "partida_prevista", 0.5, 0.0).unwrap();
        let (a, b, c) = triple.sizes();
        assert_eq!(a + b + c, 3);
    }

    #[test]
    fn test_parse_cutoff() {
        assert_eq!(
            format_timestamp(&parse_cutoff("2024-06-30").unwrap()),
            "2024-06-30 00:00:00"
        );
        assert_eq!(
            format_timestamp(&parse_cutoff("2024-06-30 12:00").unwrap()),
            "2024-06-30 12:00:00"
        );
        assert!(parse_cutoff("junho").is_err());
    }
}
