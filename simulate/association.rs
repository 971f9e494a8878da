//! # Association Filter
//!
//! Tests every composite variable for independence between its category and the
//! final label, and keeps the variables whose p-value falls strictly below the
//! configured threshold. Those variables, and the variants they are made of,
//! form the truth set.

use ahash::AHashMap;
use natord::compare;
use rayon::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::collections::BTreeSet;
use thiserror::Error;

use crate::types::{Category, ShapeError};
use crate::variables::{CompositeMatrix, MembershipTable};

/// Reference thresholds for the p-value exceedance summary.
pub const EXCEEDANCE_THRESHOLDS: [f64; 7] = [1.0, 0.5, 1e-1, 1e-2, 1e-3, 1e-8, 1e-20];

#[derive(Error, Debug)]
pub enum AssociationError {
    #[error(transparent)]
    Shape(#[from] ShapeError),
    #[error("Could not evaluate the chi-squared distribution with {dof} degrees of freedom: {message}")]
    Distribution { dof: usize, message: String },
}

/// Pearson chi-squared test of independence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquareTest {
    pub statistic: f64,
    pub dof: usize,
    pub p_value: f64,
}

/// Label x category counts. `counts[j] = [controls, cases]` for the j-th observed category.
pub fn contingency_table(column: &[Category], labels: &[bool]) -> Vec<[u64; 2]> {
    debug_assert_eq!(column.len(), labels.len());
    let mut order: Vec<Category> = Vec::new();
    let mut counts: AHashMap<Category, [u64; 2]> = AHashMap::new();
    for (&category, &is_case) in column.iter().zip(labels) {
        let cell = counts.entry(category).or_insert_with(|| {
            order.push(category);
            [0, 0]
        });
        cell[usize::from(is_case)] += 1;
    }
    order.iter().map(|category| counts[category]).collect()
}

/// Runs the independence test on a two-row contingency table.
///
/// Only label rows that occur are used. With zero degrees of freedom the
/// statistic is 0 and the p-value 1. With one degree of freedom Yates'
/// continuity correction is applied.
pub fn chi_square_independence(counts: &[[u64; 2]]) -> Result<ChiSquareTest, AssociationError> {
    let row_totals = counts.iter().fold([0u64; 2], |mut totals, cell| {
        totals[0] += cell[0];
        totals[1] += cell[1];
        totals
    });
    let rows: Vec<usize> = (0..2).filter(|&row| row_totals[row] > 0).collect();
    let columns: Vec<&[u64; 2]> = counts.iter().filter(|cell| cell[0] + cell[1] > 0).collect();

    let dof = rows.len().saturating_sub(1) * columns.len().saturating_sub(1);
    if dof == 0 {
        return Ok(ChiSquareTest {
            statistic: 0.0,
            dof,
            p_value: 1.0,
        });
    }

    let total = (row_totals[0] + row_totals[1]) as f64;
    let mut statistic = 0.0;
    for cell in &columns {
        let column_total = (cell[0] + cell[1]) as f64;
        for &row in &rows {
            let expected = row_totals[row] as f64 * column_total / total;
            let mut observed = cell[row] as f64;
            if dof == 1 {
                let diff = expected - observed;
                observed += diff.signum() * diff.abs().min(0.5);
            }
            statistic += (observed - expected).powi(2) / expected;
        }
    }

    let distribution =
        ChiSquared::new(dof as f64).map_err(|err| AssociationError::Distribution {
            dof,
            message: err.to_string(),
        })?;
    Ok(ChiSquareTest {
        statistic,
        dof,
        p_value: distribution.sf(statistic),
    })
}

/// The test outcome of one composite variable.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableAssociation {
    pub name: String,
    pub test: ChiSquareTest,
}

/// Tests every composite variable against `labels`, in matrix column order.
pub fn test_associations(
    matrix: &CompositeMatrix,
    labels: &[bool],
) -> Result<Vec<VariableAssociation>, AssociationError> {
    ShapeError::check_labels(labels, matrix.num_samples())?;
    matrix
        .names()
        .par_iter()
        .zip(matrix.columns().par_iter())
        .map(|(name, column)| {
            let test = chi_square_independence(&contingency_table(column, labels))?;
            Ok(VariableAssociation {
                name: name.clone(),
                test,
            })
        })
        .collect()
}

/// Variables (and their variants) associated with the simulated label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruthSet {
    pub variables: Vec<String>,
    pub variants: Vec<String>,
}

/// Keeps the variables whose p-value is strictly below `threshold`.
///
/// Variables come back in membership order; variants are deduplicated and put
/// in natural sort order.
pub fn filter_truth(
    associations: &[VariableAssociation],
    membership: &MembershipTable,
    threshold: f64,
) -> TruthSet {
    let variables: Vec<String> = associations
        .iter()
        .filter(|association| association.test.p_value < threshold)
        .map(|association| association.name.clone())
        .collect();

    let mut variants: Vec<String> = variables
        .iter()
        .filter_map(|name| membership.get(name))
        .flat_map(|variable| variable.variants.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    variants.sort_by(|a, b| compare(a, b));

    TruthSet {
        variables,
        variants,
    }
}

/// How many p-values fall strictly below each threshold.
pub fn exceedance_table(p_values: &[f64], thresholds: &[f64]) -> Vec<(f64, usize)> {
    thresholds
        .iter()
        .map(|&threshold| {
            (
                threshold,
                p_values.iter().filter(|&&p| p < threshold).count(),
            )
        })
        .collect()
}

/// Logs the exceedance summary of a set of associations under a heading.
pub fn log_exceedance(heading: &str, associations: &[VariableAssociation]) {
    let p_values: Vec<f64> = associations.iter().map(|a| a.test.p_value).collect();
    log::info!("{heading}: variables below each p-value threshold");
    for (threshold, count) in exceedance_table(&p_values, &EXCEEDANCE_THRESHOLDS) {
        log::info!("  p < {threshold:e}: {count}");
    }
}
