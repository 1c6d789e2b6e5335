//! Binary classification metrics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Precision, recall, F1 and support for one class or one average.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    #[serde(rename = "f1-score")]
    pub f1_score: f64,
    pub support: usize,
}

/// Per-class report with accuracy and macro/weighted averages. Divisions by
/// zero yield 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub classes: BTreeMap<String, ClassMetrics>,
    pub accuracy: f64,
    #[serde(rename = "macro avg")]
    pub macro_avg: ClassMetrics,
    #[serde(rename = "weighted avg")]
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    pub fn class(&self, label: u8) -> ClassMetrics {
        self.classes
            .get(&label.to_string())
            .copied()
            .unwrap_or_default()
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// `[[tn, fp], [fn, tp]]`: rows are true labels, columns predictions.
pub fn confusion_matrix(y_true: &[u8], y_pred: &[u8]) -> [[usize; 2]; 2] {
    let mut cm = [[0usize; 2]; 2];
    for (&t, &p) in y_true.iter().zip(y_pred) {
        cm[usize::from(t.min(1))][usize::from(p.min(1))] += 1;
    }
    cm
}

pub fn classification_report(y_true: &[u8], y_pred: &[u8]) -> ClassificationReport {
    let cm = confusion_matrix(y_true, y_pred);
    let total = y_true.len().min(y_pred.len());

    let mut classes = BTreeMap::new();
    for label in 0..2 {
        let tp = cm[label][label];
        let predicted = cm[0][label] + cm[1][label];
        let support = cm[label][0] + cm[label][1];
        let precision = ratio(tp, predicted);
        let recall = ratio(tp, support);
        let f1_score = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };
        classes.insert(
            label.to_string(),
            ClassMetrics {
                precision,
                recall,
                f1_score,
                support,
            },
        );
    }

    let n_classes = classes.len() as f64;
    let mut macro_avg = ClassMetrics {
        support: total,
        ..Default::default()
    };
    let mut weighted_avg = macro_avg;
    for m in classes.values() {
        macro_avg.precision += m.precision / n_classes;
        macro_avg.recall += m.recall / n_classes;
        macro_avg.f1_score += m.f1_score / n_classes;
        let w = ratio(m.support, total);
        weighted_avg.precision += m.precision * w;
        weighted_avg.recall += m.recall * w;
        weighted_avg.f1_score += m.f1_score * w;
    }

    ClassificationReport {
        classes,
        accuracy: ratio(cm[0][0] + cm[1][1], total),
        macro_avg,
        weighted_avg,
    }
}

/// Area under the ROC curve via the rank statistic, averaging tied ranks.
/// `None` when only one class is present.
pub fn roc_auc(y_true: &[u8], scores: &[f64]) -> Option<f64> {
    let n_pos = y_true.iter().filter(|&&y| y == 1).count();
    let n_neg = y_true.len() - n_pos;
    if n_pos == 0 || n_neg == 0 || scores.len() != y_true.len() {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut ranks = vec![0.0; scores.len()];
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // 1-based average rank of the tie group
        let rank = (i + j) as f64 / 2.0 + 1.0;
        for &k in &order[i..=j] {
            ranks[k] = rank;
        }
        i = j + 1;
    }

    let pos_rank_sum: f64 = ranks
        .iter()
        .zip(y_true)
        .filter(|(_, y)| **y == 1)
        .map(|(r, _)| r)
        .sum();
    let u = pos_rank_sum - (n_pos * (n_pos + 1)) as f64 / 2.0;
    Some(u / (n_pos * n_neg) as f64)
}

/// Full evaluation of one test partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationMetrics {
    pub classification_report: ClassificationReport,
    pub confusion_matrix: [[usize; 2]; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roc_auc: Option<f64>,
}

impl EvaluationMetrics {
    pub fn compute(y_true: &[u8], y_pred: &[u8], proba: Option<&[f64]>) -> Self {
        Self {
            classification_report: classification_report(y_true, y_pred),
            confusion_matrix: confusion_matrix(y_true, y_pred),
            roc_auc: proba.and_then(|p| roc_auc(y_true, p)),
        }
    }

    /// Flattened view centred on the positive (delayed) class.
    pub fn summary(&self) -> MetricsSummary {
        let pos = self.classification_report.class(1);
        MetricsSummary {
            accuracy: self.classification_report.accuracy,
            precision_pos: pos.precision,
            recall_pos: pos.recall,
            f1_pos: pos.f1_score,
            support_pos: pos.support,
            f1_macro: self.classification_report.macro_avg.f1_score,
            f1_weighted: self.classification_report.weighted_avg.f1_score,
            roc_auc: self.roc_auc,
            confusion_matrix: self.confusion_matrix,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub accuracy: f64,
    pub precision_pos: f64,
    pub recall_pos: f64,
    pub f1_pos: f64,
    pub support_pos: usize,
    pub f1_macro: f64,
    pub f1_weighted: f64,
    pub roc_auc: Option<f64>,
    pub confusion_matrix: [[usize; 2]; 2],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confusion_matrix_layout() {
        let cm = confusion_matrix(&[0, 0, 1, 1, 1], &[0, 1, 0, 1, 1]);
        assert_eq!(cm, [[1, 1], [1, 2]]);
    }

    #[test]
    fn test_report_values() {
        let report = classification_report(&[0, 0, 1, 1, 1], &[0, 1, 0, 1, 1]);
        let pos = report.class(1);
        assert!((pos.precision - 2.0 / 3.0).abs() < 1e-12);
        assert!((pos.recall - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(pos.support, 3);
        assert!((report.accuracy - 0.6).abs() < 1e-12);
        let neg = report.class(0);
        assert!((neg.f1_score - 0.5).abs() < 1e-12);
        assert!((report.macro_avg.f1_score - (0.5 + 2.0 / 3.0) / 2.0).abs() < 1e-12);
        assert!(
            (report.weighted_avg.f1_score - (0.5 * 0.4 + 2.0 / 3.0 * 0.6)).abs() < 1e-12
        );
    }

    #[test]
    fn test_zero_division_is_zero() {
        let report = classification_report(&[0, 0, 1], &[0, 0, 0]);
        assert_eq!(report.class(1).precision, 0.0);
        assert_eq!(report.class(1).f1_score, 0.0);
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[0, 0, 1, 1], &[0.1, 0.4, 0.35, 0.8]), Some(0.75));
        assert_eq!(roc_auc(&[0, 1], &[0.5, 0.5]), Some(0.5));
        assert_eq!(roc_auc(&[1, 1], &[0.2, 0.9]), None);
    }

    #[test]
    fn test_summary_serialises_report_keys() {
        let metrics = EvaluationMetrics::compute(&[0, 1, 1], &[0, 1, 0], Some(&[0.2, 0.9, 0.4]));
        let json = serde_json::to_value(&metrics.classification_report).unwrap();
        assert!(json.get("macro avg").is_some());
        assert!(json["classes"]["1"].get("f1-score").is_some());
        let summary = metrics.summary();
        assert_eq!(summary.support_pos, 2);
        assert_eq!(summary.roc_auc, Some(1.0));
    }
}
