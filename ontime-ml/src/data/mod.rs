//! Tabular data model: raw records, row batches, dense matrices and labels.

pub mod frame;
pub mod labels;
pub mod matrix;

pub use frame::{Frame, Record, as_category, as_f64, format_timestamp, number, parse_timestamp};
pub use labels::{LabelReport, QualityFlags, build_labels, target_vector};
pub use matrix::Matrix;
