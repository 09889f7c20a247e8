//! Classification metrics and per-training history

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Evaluation of a classifier on a held-out split.
///
/// Precision, recall and F1 are support-weighted averages over the classes,
/// so imbalanced outcome distributions do not hide a weak minority class.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvalReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub log_loss: f64,
    pub samples: usize,
}

impl fmt::Display for EvalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Acc: {:.2}% | P: {:.3} | R: {:.3} | F1: {:.3} | LogLoss: {:.4} ({} samples)",
            self.accuracy * 100.0,
            self.precision,
            self.recall,
            self.f1,
            self.log_loss,
            self.samples
        )
    }
}

/// Evaluate class predictions against the truth.
///
/// `probabilities` (rows × classes) feeds the log-loss; without it the
/// log-loss is reported as 0.
pub fn evaluate_classification(
    truth: &[usize],
    predicted: &[usize],
    probabilities: Option<&Array2<f32>>,
    classes: usize,
) -> EvalReport {
    let n = truth.len();
    if n == 0 {
        return EvalReport {
            accuracy: 0.0,
            precision: 0.0,
            recall: 0.0,
            f1: 0.0,
            log_loss: 0.0,
            samples: 0,
        };
    }

    let correct = truth
        .iter()
        .zip(predicted)
        .filter(|(t, p)| t == p)
        .count();
    let accuracy = correct as f64 / n as f64;

    let mut precision = 0.0;
    let mut recall = 0.0;
    let mut f1 = 0.0;
    for class in 0..classes {
        let tp = truth
            .iter()
            .zip(predicted)
            .filter(|(&t, &p)| t == class && p == class)
            .count() as f64;
        let fp = truth
            .iter()
            .zip(predicted)
            .filter(|(&t, &p)| t != class && p == class)
            .count() as f64;
        let fn_ = truth
            .iter()
            .zip(predicted)
            .filter(|(&t, &p)| t == class && p != class)
            .count() as f64;
        let support = truth.iter().filter(|&&t| t == class).count() as f64;

        let class_precision = if tp + fp > 0.0 { tp / (tp + fp) } else { 0.0 };
        let class_recall = if tp + fn_ > 0.0 { tp / (tp + fn_) } else { 0.0 };
        let class_f1 = if class_precision + class_recall > 0.0 {
            2.0 * class_precision * class_recall / (class_precision + class_recall)
        } else {
            0.0
        };

        let weight = support / n as f64;
        precision += weight * class_precision;
        recall += weight * class_recall;
        f1 += weight * class_f1;
    }

    let log_loss = probabilities
        .map(|probs| {
            let mut total = 0.0f64;
            for (row, &t) in truth.iter().enumerate() {
                let p = (probs[[row, t]] as f64).clamp(1e-15, 1.0);
                total -= p.ln();
            }
            total / n as f64
        })
        .unwrap_or(0.0);

    EvalReport {
        accuracy,
        precision,
        recall,
        f1,
        log_loss,
        samples: n,
    }
}

/// Metric series accumulated across training runs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsHistory {
    pub accuracy: Vec<f64>,
    pub precision: Vec<f64>,
    pub recall: Vec<f64>,
    pub f1: Vec<f64>,
    pub log_loss: Vec<f64>,
}

impl MetricsHistory {
    pub fn record(&mut self, report: &EvalReport) {
        self.accuracy.push(report.accuracy);
        self.precision.push(report.precision);
        self.recall.push(report.recall);
        self.f1.push(report.f1);
        self.log_loss.push(report.log_loss);
    }

    /// Most recent report, if any training has run
    pub fn latest(&self) -> Option<EvalReport> {
        let i = self.accuracy.len().checked_sub(1)?;
        Some(EvalReport {
            accuracy: self.accuracy[i],
            precision: self.precision[i],
            recall: self.recall[i],
            f1: self.f1[i],
            log_loss: self.log_loss[i],
            samples: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.accuracy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accuracy.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_perfect_predictions() {
        let truth = [0, 1, 2, 1];
        let report = evaluate_classification(&truth, &truth, None, 3);
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.recall, 1.0);
        assert_eq!(report.f1, 1.0);
    }

    #[test]
    fn test_weighted_metrics_reflect_support() {
        // Class 0: 3 rows all correct; class 1: 1 row wrong
        let truth = [0, 0, 0, 1];
        let predicted = [0, 0, 0, 0];
        let report = evaluate_classification(&truth, &predicted, None, 2);

        assert_eq!(report.accuracy, 0.75);
        // recall: class 0 = 1.0 (w 0.75), class 1 = 0.0 (w 0.25)
        assert!((report.recall - 0.75).abs() < 1e-9);
        // precision: class 0 = 3/4 (w 0.75), class 1 = 0 (w 0.25)
        assert!((report.precision - 0.5625).abs() < 1e-9);
    }

    #[test]
    fn test_log_loss_punishes_confident_mistakes() {
        let truth = [0, 1];
        let predicted = [0, 1];
        let good = array![[0.9, 0.1], [0.1, 0.9]];
        let bad = array![[0.6, 0.4], [0.6, 0.4]];

        let good_report = evaluate_classification(&truth, &predicted, Some(&good), 2);
        let bad_report = evaluate_classification(&truth, &predicted, Some(&bad), 2);
        assert!(good_report.log_loss < bad_report.log_loss);
    }

    #[test]
    fn test_history_records_in_order() {
        let mut history = MetricsHistory::default();
        assert!(history.latest().is_none());

        let report = evaluate_classification(&[0, 1], &[0, 1], None, 2);
        history.record(&report);
        assert_eq!(history.len(), 1);
        assert_eq!(history.latest().unwrap().accuracy, 1.0);
    }
}
