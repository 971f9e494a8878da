//! # Label Prediction
//!
//! Scores each sample by summing, over all composite variables, the risk of the
//! category it carries, then relabels: a sample becomes a case only when its
//! score is strictly above the population mean of this round.
//!
//! The mean is clamped into the observed score range before comparing, so a
//! population whose scores all tie always comes back as all controls even when
//! the floating-point mean rounds just below the shared score.
//!
//! The predictor reads from the round's frozen risk tables and writes a fresh
//! label vector; the previous labels are never touched mid-pass.

use rayon::prelude::*;

use crate::risk::RiskTables;
use crate::types::ShapeError;
use crate::variables::CompositeMatrix;

/// The outcome of one prediction pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub scores: Vec<f64>,
    pub mean_score: f64,
    pub labels: Vec<bool>,
}

impl Prediction {
    pub fn cases(&self) -> usize {
        self.labels.iter().filter(|&&label| label).count()
    }

    pub fn controls(&self) -> usize {
        self.labels.len() - self.cases()
    }

    /// Every sample received the same label, so the round carries no signal.
    pub fn is_degenerate(&self) -> bool {
        !self.labels.is_empty() && (self.cases() == 0 || self.controls() == 0)
    }
}

/// Per-sample aggregate risk. Samples are independent given the tables, so this
/// runs in parallel across samples.
pub fn aggregate_scores(
    matrix: &CompositeMatrix,
    tables: &RiskTables,
) -> Result<Vec<f64>, ShapeError> {
    if tables.len() != matrix.num_variables() {
        return Err(ShapeError::TableCount {
            tables: tables.len(),
            variables: matrix.num_variables(),
        });
    }
    Ok((0..matrix.num_samples())
        .into_par_iter()
        .map(|sample| {
            tables
                .tables()
                .iter()
                .enumerate()
                .map(|(variable, table)| table.contribution(&matrix.category(sample, variable)))
                .sum()
        })
        .collect())
}

/// Arithmetic mean; zero for an empty population.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// The mean of `scores`, kept inside `[min, max]` of the scores themselves.
pub fn decision_threshold(scores: &[f64]) -> f64 {
    let Some(&first) = scores.first() else {
        return 0.0;
    };
    let (low, high) = scores
        .iter()
        .fold((first, first), |(low, high), &score| (low.min(score), high.max(score)));
    mean(scores).clamp(low, high)
}

/// Scores every sample and re-binarises at the mean score.
pub fn predict_labels(
    matrix: &CompositeMatrix,
    tables: &RiskTables,
) -> Result<Prediction, ShapeError> {
    let scores = aggregate_scores(matrix, tables)?;
    let mean_score = decision_threshold(&scores);
    let labels = scores.iter().map(|&score| score > mean_score).collect();
    Ok(Prediction {
        scores,
        mean_score,
        labels,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderTier;
    use crate::risk::estimate_risk_tables;
    use crate::types::{Genotype, GenotypeMatrix};
    use crate::variables::{VariantPool, build_composites};
    use approx::assert_abs_diff_eq;

    fn single_variant_matrix(calls: &[Genotype]) -> CompositeMatrix {
        let genotypes = GenotypeMatrix::from_calls(
            vec!["v1".into()],
            (1..=calls.len()).map(|s| format!("s{s}")).collect(),
            &calls.iter().map(|&call| vec![call]).collect::<Vec<_>>(),
        )
        .unwrap();
        let (_, matrix) =
            build_composites(&VariantPool::in_input_order(&genotypes), &[OrderTier::new(1, 1)])
                .unwrap();
        matrix
    }

    #[test]
    fn fixed_point_example() {
        use Genotype::*;
        let matrix = single_variant_matrix(&[Reference, Heterozygous, Alternate, Heterozygous]);
        let labels = [true, false, true, false];
        let tables = estimate_risk_tables(&matrix, &labels).unwrap();
        let prediction = predict_labels(&matrix, &tables).unwrap();

        assert_abs_diff_eq!(prediction.scores[0], 2.0);
        assert_abs_diff_eq!(prediction.scores[1], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(prediction.mean_score, 7.0 / 6.0, epsilon = 1e-12);
        assert_eq!(prediction.labels, labels);
        assert!(!prediction.is_degenerate());
    }

    #[test]
    fn cases_are_exactly_the_samples_above_the_mean() {
        use Genotype::*;
        let matrix = single_variant_matrix(&[
            Reference,
            Reference,
            Heterozygous,
            Alternate,
            Alternate,
            Heterozygous,
            Reference,
        ]);
        let labels = [true, false, true, false, false, true, true];
        let tables = estimate_risk_tables(&matrix, &labels).unwrap();
        let prediction = predict_labels(&matrix, &tables).unwrap();

        let above = prediction
            .scores
            .iter()
            .filter(|&&score| score > prediction.mean_score)
            .count();
        assert_eq!(prediction.cases(), above);
        for (score, label) in prediction.scores.iter().zip(&prediction.labels) {
            if *score <= prediction.mean_score {
                assert!(!label);
            }
        }
    }

    #[test]
    fn equal_scores_make_everyone_a_control() {
        use Genotype::*;
        let matrix = single_variant_matrix(&[Heterozygous; 5]);
        let tables = estimate_risk_tables(&matrix, &[true, false, true, false, true]).unwrap();
        let prediction = predict_labels(&matrix, &tables).unwrap();
        assert!(prediction.labels.iter().all(|&label| !label));
        assert!(prediction.is_degenerate());
    }

    #[test]
    fn tied_scores_stay_controls_whatever_the_rounding() {
        // The summed mean of six copies of 1/7 lands one ulp below 1/7.
        let matrix = single_variant_matrix(&[Genotype::Heterozygous; 6]);
        let tables = estimate_risk_tables(&matrix, &[false; 6]).unwrap();
        let prediction = predict_labels(&matrix, &tables).unwrap();
        assert_eq!(prediction.scores[0], 1.0 / 7.0);
        assert_eq!(prediction.mean_score, prediction.scores[0]);
        assert_eq!(prediction.labels, [false; 6]);

        for samples in 1..60 {
            let matrix = single_variant_matrix(&vec![Genotype::Heterozygous; samples]);
            for cases in 0..=samples {
                let labels: Vec<bool> = (0..samples).map(|s| s < cases).collect();
                let tables = estimate_risk_tables(&matrix, &labels).unwrap();
                let prediction = predict_labels(&matrix, &tables).unwrap();
                assert_eq!(
                    prediction.cases(),
                    0,
                    "{samples} tied samples with {cases} initial cases produced cases"
                );
                assert!(prediction.is_degenerate());
            }
        }
    }

    #[test]
    fn threshold_stays_within_the_score_range() {
        assert_eq!(decision_threshold(&[]), 0.0);
        let tied = vec![0.1; 10];
        assert_eq!(decision_threshold(&tied), 0.1);
        assert!(tied.iter().all(|&score| score <= decision_threshold(&tied)));
        assert_abs_diff_eq!(decision_threshold(&[1.0, 2.0, 6.0]), 3.0);
    }

    #[test]
    fn tables_from_another_matrix_are_rejected() {
        use Genotype::*;
        let matrix = single_variant_matrix(&[Reference, Alternate]);
        let genotypes = GenotypeMatrix::from_calls(
            vec!["v1".into(), "v2".into()],
            vec!["s1".into(), "s2".into()],
            &[vec![Reference, Alternate], vec![Alternate, Reference]],
        )
        .unwrap();
        let (_, wider) =
            build_composites(&VariantPool::in_input_order(&genotypes), &[OrderTier::new(2, 1)])
                .unwrap();
        let tables = estimate_risk_tables(&wider, &[true, false]).unwrap();
        assert_eq!(
            predict_labels(&matrix, &tables),
            Err(ShapeError::TableCount {
                tables: 2,
                variables: 1
            })
        );
    }

    #[test]
    fn empty_population_is_not_degenerate() {
        let matrix = single_variant_matrix(&[]);
        let tables = estimate_risk_tables(&matrix, &[]).unwrap();
        let prediction = predict_labels(&matrix, &tables).unwrap();
        assert!(prediction.labels.is_empty());
        assert_eq!(prediction.mean_score, 0.0);
        assert!(!prediction.is_degenerate());
    }
}
