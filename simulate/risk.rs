//! # Risk Table Estimation
//!
//! For every composite variable, tallies how often each observed category occurs
//! among cases and among controls under the current labels, and turns the tallies
//! into a Laplace-smoothed case/control ratio.
//!
//! Tables are round-local values. They are rebuilt from scratch for each round
//! and dropped once that round's labels have been predicted.

use ahash::AHashMap;
use rayon::prelude::*;

use crate::types::{Category, ShapeError};
use crate::variables::CompositeMatrix;

/// Case/control tallies of one category and the resulting risk score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryRisk {
    pub cases: u32,
    pub controls: u32,
    pub risk: f64,
}

/// `(cases + 1) / (controls + 1)`.
#[inline]
pub fn smoothed_risk(cases: u32, controls: u32) -> f64 {
    (f64::from(cases) + 1.0) / (f64::from(controls) + 1.0)
}

/// The risk table of a single composite variable.
///
/// Only categories seen in at least one sample are present.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RiskTable {
    entries: AHashMap<Category, CategoryRisk>,
}

impl RiskTable {
    /// Builds the table of one variable's column under `labels` (`true` = case).
    pub fn from_column(column: &[Category], labels: &[bool]) -> Self {
        debug_assert_eq!(column.len(), labels.len());
        let mut counts: AHashMap<Category, (u32, u32)> = AHashMap::new();
        for (&category, &is_case) in column.iter().zip(labels) {
            let tally = counts.entry(category).or_insert((0, 0));
            if is_case {
                tally.0 += 1;
            } else {
                tally.1 += 1;
            }
        }

        let entries = counts
            .into_iter()
            .map(|(category, (cases, controls))| {
                (
                    category,
                    CategoryRisk {
                        cases,
                        controls,
                        risk: smoothed_risk(cases, controls),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn get(&self, category: &Category) -> Option<&CategoryRisk> {
        self.entries.get(category)
    }

    pub fn risk(&self, category: &Category) -> Option<f64> {
        self.entries.get(category).map(|entry| entry.risk)
    }

    /// The amount a sample carrying `category` adds to its score. An absent
    /// category contributes exactly zero rather than a smoothed default.
    #[inline]
    pub fn contribution(&self, category: &Category) -> f64 {
        self.risk(category).unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Category, &CategoryRisk)> {
        self.entries.iter()
    }
}

/// One risk table per composite variable, in matrix column order.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskTables {
    tables: Vec<RiskTable>,
}

impl RiskTables {
    pub fn tables(&self) -> &[RiskTable] {
        &self.tables
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn table(&self, variable: usize) -> &RiskTable {
        &self.tables[variable]
    }
}

/// Estimates the risk table of every composite variable under `labels`.
///
/// Variables are independent, so the pass runs in parallel across columns.
pub fn estimate_risk_tables(
    matrix: &CompositeMatrix,
    labels: &[bool],
) -> Result<RiskTables, ShapeError> {
    ShapeError::check_labels(labels, matrix.num_samples())?;
    let tables = matrix
        .columns()
        .par_iter()
        .map(|column| RiskTable::from_column(column, labels))
        .collect();
    Ok(RiskTables { tables })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn categories(text: &[&str]) -> Vec<Category> {
        text.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn end_to_end_tallies() {
        let column = categories(&["R", "H", "A", "H"]);
        let labels = [true, false, true, false];
        let table = RiskTable::from_column(&column, &labels);

        let r: Category = "R".parse().unwrap();
        let h: Category = "H".parse().unwrap();
        let a: Category = "A".parse().unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.get(&r),
            Some(&CategoryRisk {
                cases: 1,
                controls: 0,
                risk: 2.0
            })
        );
        assert_abs_diff_eq!(table.risk(&a).unwrap(), 2.0);
        assert_eq!(table.get(&h).unwrap().controls, 2);
        assert_abs_diff_eq!(table.risk(&h).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn balanced_categories_score_one() {
        let column = categories(&["RH", "RH", "AA", "AA", "HR", "HR"]);
        let labels = [true, false, false, true, true, false];
        let table = RiskTable::from_column(&column, &labels);
        for (_, entry) in table.iter() {
            assert_eq!(entry.cases, entry.controls);
            assert_abs_diff_eq!(entry.risk, 1.0);
        }
    }

    #[test]
    fn unseen_categories_are_absent_and_contribute_zero() {
        let column = categories(&["RR", "RH"]);
        let table = RiskTable::from_column(&column, &[true, false]);
        let unseen: Category = "AA".parse().unwrap();
        assert!(table.get(&unseen).is_none());
        assert_eq!(table.contribution(&unseen), 0.0);
    }

    #[test]
    fn all_cases_still_smooth_controls() {
        let column = categories(&["A", "A", "A"]);
        let table = RiskTable::from_column(&column, &[true, true, true]);
        assert_abs_diff_eq!(table.risk(&"A".parse::<Category>().unwrap()).unwrap(), 4.0);
    }

    #[test]
    fn short_label_vector_is_rejected() {
        use crate::config::OrderTier;
        use crate::types::{Genotype, GenotypeMatrix};
        use crate::variables::{VariantPool, build_composites};

        let genotypes = GenotypeMatrix::from_calls(
            vec!["v1".into()],
            vec!["s1".into(), "s2".into(), "s3".into()],
            &[vec![Genotype::Reference], vec![Genotype::Alternate], vec![Genotype::Heterozygous]],
        )
        .unwrap();
        let (_, matrix) =
            build_composites(&VariantPool::in_input_order(&genotypes), &[OrderTier::new(1, 1)])
                .unwrap();
        assert_eq!(
            estimate_risk_tables(&matrix, &[true, false]),
            Err(ShapeError::LabelCount {
                labels: 2,
                samples: 3
            })
        );
        assert_eq!(estimate_risk_tables(&matrix, &[true, false, true]).unwrap().len(), 1);
    }
}
