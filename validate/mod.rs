//! # Post-hoc Validation
//!
//! Checks that the simulated phenotype can be recovered from genotypes: a
//! classifier is trained on a random 75% of the samples and its ranking quality
//! is measured on the remaining 25%. The classifier is a collaborator behind the
//! [`Classifier`] trait; [`forest::RandomForest`] is the stock implementation.

pub mod auc;
pub mod forest;

use ndarray::{Array1, ArrayView2, Axis};
use rand::Rng;
use std::fmt;
use thiserror::Error;

pub use auc::roc_auc;
pub use forest::{ForestParams, RandomForest};

/// Fraction of samples drawn into the training split.
pub const TRAIN_FRACTION: f64 = 0.75;

#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Feature matrix has {rows} rows but {labels} labels were given.")]
    ShapeMismatch { rows: usize, labels: usize },
    #[error("The feature set is empty.")]
    NoFeatures,
    #[error("There are no samples to train on.")]
    NoSamples,
    #[error("Classifier was fitted on {expected} features but received {found}.")]
    FeatureCountMismatch { expected: usize, found: usize },
    #[error("The classifier has not been fitted.")]
    NotFitted,
    #[error("Only one class is present, so the area under the curve is undefined.")]
    SingleClass,
}

/// A binary classifier over dosage features.
pub trait Classifier {
    fn fit(&mut self, features: ArrayView2<u8>, labels: &[bool]) -> Result<(), ValidationError>;

    /// Probability of the case class for every row.
    fn predict_proba(&self, features: ArrayView2<u8>) -> Result<Array1<f64>, ValidationError>;

    /// One non-negative weight per feature, summing to one when any split was made.
    fn feature_importances(&self) -> Array1<f64>;
}

/// The three variant sets the simulated phenotype is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSet {
    TruthVariants,
    VariableVariants,
    AllVariants,
}

impl FeatureSet {
    pub fn describe(self) -> &'static str {
        match self {
            Self::TruthVariants => "Truth SNPs",
            Self::VariableVariants => "All SNPs in variables",
            Self::AllVariants => "All SNPs in input file",
        }
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub feature_set: FeatureSet,
    pub num_features: usize,
    pub num_train: usize,
    pub num_test: usize,
    pub auc: f64,
    pub importances: Array1<f64>,
}

/// Trains `classifier` on a random split of the rows and scores the held-out part.
pub fn evaluate_feature_set<C, R>(
    feature_set: FeatureSet,
    features: ArrayView2<u8>,
    labels: &[bool],
    classifier: &mut C,
    rng: &mut R,
) -> Result<ValidationReport, ValidationError>
where
    C: Classifier + ?Sized,
    R: Rng + ?Sized,
{
    if features.nrows() != labels.len() {
        return Err(ValidationError::ShapeMismatch {
            rows: features.nrows(),
            labels: labels.len(),
        });
    }
    if features.ncols() == 0 {
        return Err(ValidationError::NoFeatures);
    }

    let (train, test): (Vec<usize>, Vec<usize>) =
        (0..labels.len()).partition(|_| rng.random::<f64>() <= TRAIN_FRACTION);
    let train_labels: Vec<bool> = train.iter().map(|&i| labels[i]).collect();
    let test_labels: Vec<bool> = test.iter().map(|&i| labels[i]).collect();

    classifier.fit(features.select(Axis(0), &train).view(), &train_labels)?;
    let probabilities = classifier.predict_proba(features.select(Axis(0), &test).view())?;
    let auc = roc_auc(&test_labels, &probabilities.to_vec())?;

    Ok(ValidationReport {
        feature_set,
        num_features: features.ncols(),
        num_train: train.len(),
        num_test: test.len(),
        auc,
        importances: classifier.feature_importances(),
    })
}
