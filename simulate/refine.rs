//! # Phenotype Refinement Loop
//!
//! A round-indexed state machine whose only state is the label vector. One
//! transition estimates risk tables from the current labels, predicts new labels
//! from those tables and discards the tables. The loop runs exactly the
//! configured number of rounds; there is no convergence check.

use rand::Rng;
use std::fmt;
use thiserror::Error;

use crate::predict::predict_labels;
use crate::risk::estimate_risk_tables;
use crate::types::ShapeError;
use crate::variables::CompositeMatrix;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RefineError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

/// What one round did to the labels.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    /// 1-based round number.
    pub round: usize,
    pub cases: usize,
    pub controls: usize,
    pub mean_score: f64,
    /// All samples ended the round with the same label.
    pub degenerate: bool,
}

impl fmt::Display for RoundReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {}: {} cases, {} controls, mean score {:.4}",
            self.round, self.cases, self.controls, self.mean_score
        )
    }
}

/// Observer for reporting progress through the refinement rounds.
pub trait RoundObserver {
    fn on_start(&mut self, total_rounds: usize) {
        let _ = total_rounds;
    }
    fn on_round(&mut self, report: &RoundReport) {
        let _ = report;
    }
    fn on_finish(&mut self) {}
}

#[derive(Default)]
pub struct NoopRoundObserver;

impl RoundObserver for NoopRoundObserver {}

/// The loop state: how many rounds have run and the labels they produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementState {
    round: usize,
    labels: Vec<bool>,
}

impl RefinementState {
    pub fn new(matrix: &CompositeMatrix, labels: Vec<bool>) -> Result<Self, RefineError> {
        ShapeError::check_labels(&labels, matrix.num_samples())?;
        Ok(Self { round: 0, labels })
    }

    pub fn round(&self) -> usize {
        self.round
    }

    pub fn labels(&self) -> &[bool] {
        &self.labels
    }

    pub fn into_labels(self) -> Vec<bool> {
        self.labels
    }

    /// Runs one estimate-then-predict round. The previous labels are only read;
    /// the returned state carries a wholly new label vector.
    pub fn advance(&self, matrix: &CompositeMatrix) -> Result<(Self, RoundReport), RefineError> {
        let tables = estimate_risk_tables(matrix, &self.labels)?;
        let prediction = predict_labels(matrix, &tables)?;
        drop(tables);

        let round = self.round + 1;
        let report = RoundReport {
            round,
            cases: prediction.cases(),
            controls: prediction.controls(),
            mean_score: prediction.mean_score,
            degenerate: prediction.is_degenerate(),
        };
        Ok((
            Self {
                round,
                labels: prediction.labels,
            },
            report,
        ))
    }
}

/// Independent fair-coin labels, `true` = case.
pub fn random_labels<R: Rng + ?Sized>(num_samples: usize, rng: &mut R) -> Vec<bool> {
    (0..num_samples).map(|_| rng.random_bool(0.5)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefinementSummary {
    pub rounds: usize,
    pub degenerate_rounds: usize,
    pub final_cases: usize,
}

/// Runs exactly `num_loop` rounds starting from `initial` labels.
pub fn refine(
    matrix: &CompositeMatrix,
    initial: Vec<bool>,
    num_loop: usize,
    observer: &mut dyn RoundObserver,
) -> Result<(Vec<bool>, RefinementSummary), RefineError> {
    let mut state = RefinementState::new(matrix, initial)?;
    let mut degenerate_rounds = 0usize;

    observer.on_start(num_loop);
    for _ in 0..num_loop {
        let (next, report) = state.advance(matrix)?;
        if report.degenerate {
            degenerate_rounds += 1;
            log::warn!(
                "Degenerate {report}: every sample received the same label; the phenotype has lost its signal."
            );
        } else {
            log::debug!("Completed {report}");
        }
        observer.on_round(&report);
        state = next;
    }
    observer.on_finish();

    let rounds = state.round();
    let labels = state.into_labels();
    let final_cases = labels.iter().filter(|&&label| label).count();
    log::info!(
        "Refinement finished after {rounds} rounds: {final_cases} cases out of {} samples ({degenerate_rounds} degenerate rounds).",
        labels.len()
    );

    Ok((
        labels,
        RefinementSummary {
            rounds,
            degenerate_rounds,
            final_cases,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderTier;
    use crate::types::{Genotype, GenotypeMatrix};
    use crate::variables::{VariantPool, build_composites};
    use ndarray::Array2;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[derive(Default)]
    struct CountingObserver {
        announced: Option<usize>,
        reports: Vec<RoundReport>,
        finished: bool,
    }

    impl RoundObserver for CountingObserver {
        fn on_start(&mut self, total_rounds: usize) {
            self.announced = Some(total_rounds);
        }
        fn on_round(&mut self, report: &RoundReport) {
            self.reports.push(report.clone());
        }
        fn on_finish(&mut self) {
            self.finished = true;
        }
    }

    fn random_matrix(seed: u64, samples: usize, variants: usize) -> CompositeMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let dosages = Array2::from_shape_fn((samples, variants), |_| rng.random_range(0..3u8));
        let genotypes = GenotypeMatrix::new(
            (0..variants).map(|v| format!("snp{v}")).collect(),
            (0..samples).map(|s| format!("s{s}")).collect(),
            dosages,
        )
        .unwrap();
        let tiers = [OrderTier::new(4, 1), OrderTier::new(3, 2)];
        build_composites(&VariantPool::in_input_order(&genotypes), &tiers)
            .unwrap()
            .1
    }

    #[test]
    fn zero_rounds_leave_labels_untouched() {
        let matrix = random_matrix(1, 40, 10);
        let mut rng = StdRng::seed_from_u64(2);
        let initial = random_labels(40, &mut rng);
        let mut observer = CountingObserver::default();
        let (labels, summary) = refine(&matrix, initial.clone(), 0, &mut observer).unwrap();
        assert_eq!(labels, initial);
        assert_eq!(summary.rounds, 0);
        assert!(observer.reports.is_empty());
        assert_eq!(observer.announced, Some(0));
        assert!(observer.finished);
    }

    #[test]
    fn runs_exactly_the_requested_rounds() {
        let matrix = random_matrix(3, 60, 10);
        let mut rng = StdRng::seed_from_u64(4);
        let initial = random_labels(60, &mut rng);
        let mut observer = CountingObserver::default();
        let (_, summary) = refine(&matrix, initial, 7, &mut observer).unwrap();
        assert_eq!(summary.rounds, 7);
        let rounds: Vec<usize> = observer.reports.iter().map(|r| r.round).collect();
        assert_eq!(rounds, [1, 2, 3, 4, 5, 6, 7]);
        let degenerate = observer.reports.iter().filter(|r| r.degenerate).count();
        assert_eq!(summary.degenerate_rounds, degenerate);
    }

    #[test]
    fn loop_matches_manual_transitions() {
        let matrix = random_matrix(5, 50, 10);
        let mut rng = StdRng::seed_from_u64(6);
        let initial = random_labels(50, &mut rng);

        let mut state = RefinementState::new(&matrix, initial.clone()).unwrap();
        for _ in 0..3 {
            state = state.advance(&matrix).unwrap().0;
        }
        let (labels, _) = refine(&matrix, initial, 3, &mut NoopRoundObserver).unwrap();
        assert_eq!(labels, state.labels());
        assert_eq!(state.round(), 3);
    }

    #[test]
    fn fixed_point_is_stable() {
        use Genotype::*;
        let genotypes = GenotypeMatrix::from_calls(
            vec!["v1".into(), "v2".into()],
            (1..=4).map(|s| format!("s{s}")).collect(),
            &[
                vec![Reference, Reference],
                vec![Heterozygous, Reference],
                vec![Alternate, Reference],
                vec![Heterozygous, Reference],
            ],
        )
        .unwrap();
        let (_, matrix) =
            build_composites(&VariantPool::in_input_order(&genotypes), &[OrderTier::new(1, 1)])
                .unwrap();
        let initial = vec![true, false, true, false];
        for rounds in [1, 2, 10] {
            let (labels, summary) =
                refine(&matrix, initial.clone(), rounds, &mut NoopRoundObserver).unwrap();
            assert_eq!(labels, initial);
            assert_eq!(summary.final_cases, 2);
            assert_eq!(summary.degenerate_rounds, 0);
        }
    }

    #[test]
    fn degenerate_rounds_are_counted_and_the_loop_continues() {
        use Genotype::*;
        let genotypes = GenotypeMatrix::from_calls(
            vec!["v1".into()],
            (1..=4).map(|s| format!("s{s}")).collect(),
            &[vec![Alternate], vec![Alternate], vec![Alternate], vec![Alternate]],
        )
        .unwrap();
        let (_, matrix) =
            build_composites(&VariantPool::in_input_order(&genotypes), &[OrderTier::new(1, 1)])
                .unwrap();
        let mut observer = CountingObserver::default();
        let (labels, summary) =
            refine(&matrix, vec![true, false, false, true], 3, &mut observer).unwrap();
        assert_eq!(labels, [false; 4]);
        assert_eq!(summary.rounds, 3);
        assert_eq!(summary.degenerate_rounds, 3);
        assert_eq!(observer.reports.len(), 3);
    }

    #[test]
    fn label_count_must_match() {
        let matrix = random_matrix(7, 10, 10);
        let err = refine(&matrix, vec![true; 3], 1, &mut NoopRoundObserver).unwrap_err();
        assert_eq!(
            err,
            RefineError::Shape(ShapeError::LabelCount {
                labels: 3,
                samples: 10
            })
        );
    }

    #[test]
    fn advancing_against_a_different_matrix_is_an_error() {
        let matrix = random_matrix(8, 12, 10);
        let smaller = random_matrix(9, 8, 10);
        let state = RefinementState::new(&matrix, vec![true; 12]).unwrap();
        assert_eq!(
            state.advance(&smaller).unwrap_err(),
            RefineError::Shape(ShapeError::LabelCount {
                labels: 12,
                samples: 8
            })
        );
        assert!(state.advance(&matrix).is_ok());
    }
}
