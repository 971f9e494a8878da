//! # Composite Variable Construction
//!
//! Partitions the variant pool into named composite variables and derives each
//! variable's categorical genotype by concatenating its constituent calls.
//!
//! Variants are consumed strictly in pool order: tier by tier as declared, and
//! within a tier by increasing variable index. The builder itself never
//! randomises anything; a shuffled pool is the caller's business. For a fixed
//! pool and tier list the output is identical across runs.

use natord::compare;
use rand::Rng;
use rand::seq::SliceRandom;
use rayon::prelude::*;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::config::OrderTier;
use crate::types::{Category, GenotypeMatrix, MAX_CATEGORY_ORDER};

/// Rendering of an unused membership slot in tabular output.
pub const EMPTY_SLOT: &str = "---";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum BuildError {
    #[error(
        "There are not enough variants in the input: {needed} are needed to form all variables, but only {available} are available."
    )]
    InsufficientVariants { needed: usize, available: usize },
    #[error("Composite variables of order {order} exceed the supported maximum of {max}.")]
    OrderTooLarge { order: usize, max: usize },
}

/// An ordered view over the genotype matrix's variants, from which the builder
/// draws first-come-first-assigned.
#[derive(Debug, Clone)]
pub struct VariantPool<'a> {
    genotypes: &'a GenotypeMatrix,
    order: Vec<usize>,
}

impl<'a> VariantPool<'a> {
    /// The pool in input-file order.
    pub fn in_input_order(genotypes: &'a GenotypeMatrix) -> Self {
        Self {
            genotypes,
            order: (0..genotypes.num_variants()).collect(),
        }
    }

    /// The pool in a uniformly random order.
    pub fn shuffled<R: Rng + ?Sized>(genotypes: &'a GenotypeMatrix, rng: &mut R) -> Self {
        let mut pool = Self::in_input_order(genotypes);
        pool.order.shuffle(rng);
        pool
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn genotypes(&self) -> &'a GenotypeMatrix {
        self.genotypes
    }
}

/// One composite variable: a fixed-width membership record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeVariable {
    pub name: String,
    /// 1-based position of the tier in the configuration.
    pub tier: usize,
    /// 1-based position within the tier.
    pub index: usize,
    /// Constituent variant identifiers, in concatenation order.
    pub variants: Vec<String>,
}

impl CompositeVariable {
    pub fn order(&self) -> usize {
        self.variants.len()
    }
}

/// Canonical `O<tier>V<index>` name.
pub fn variable_name(tier: usize, index: usize) -> String {
    format!("O{tier}V{index}")
}

/// Variable name -> constituent variants, padded to the widest order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipTable {
    max_order: usize,
    variables: Vec<CompositeVariable>,
}

impl MembershipTable {
    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn variables(&self) -> &[CompositeVariable] {
        &self.variables
    }

    pub fn get(&self, name: &str) -> Option<&CompositeVariable> {
        self.variables.iter().find(|variable| variable.name == name)
    }

    /// The `max_order` membership slots of a variable; `None` marks padding.
    pub fn padded_slots<'t>(&self, variable: &'t CompositeVariable) -> Vec<Option<&'t str>> {
        (0..self.max_order)
            .map(|slot| variable.variants.get(slot).map(String::as_str))
            .collect()
    }

    /// The sub-table of the named variables, kept in table order. The padding
    /// width is inherited so restricted tables line up with the full one.
    pub fn restrict<S: AsRef<str>>(&self, names: &[S]) -> MembershipTable {
        let wanted: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
        MembershipTable {
            max_order: self.max_order,
            variables: self
                .variables
                .iter()
                .filter(|variable| wanted.contains(variable.name.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Every distinct variant referenced by the table, in natural sort order.
    pub fn distinct_variants(&self) -> Vec<String> {
        let mut variants: Vec<String> = self
            .variables
            .iter()
            .flat_map(|variable| variable.variants.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        variants.sort_by(|a, b| compare(a, b));
        variants
    }
}

/// Sample x composite-variable categories, stored one column per variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeMatrix {
    sample_ids: Vec<String>,
    names: Vec<String>,
    columns: Vec<Vec<Category>>,
}

impl CompositeMatrix {
    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    pub fn num_variables(&self) -> usize {
        self.names.len()
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn columns(&self) -> &[Vec<Category>] {
        &self.columns
    }

    pub fn column(&self, variable: usize) -> &[Category] {
        &self.columns[variable]
    }

    pub fn column_by_name(&self, name: &str) -> Option<&[Category]> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|variable| self.column(variable))
    }

    #[inline]
    pub fn category(&self, sample: usize, variable: usize) -> Category {
        self.columns[variable][sample]
    }
}

/// Forms every composite variable the tiers ask for, drawing from `pool`.
pub fn build_composites(
    pool: &VariantPool<'_>,
    tiers: &[OrderTier],
) -> Result<(MembershipTable, CompositeMatrix), BuildError> {
    let needed: usize = tiers.iter().map(OrderTier::num_snps).sum();
    if pool.len() < needed {
        return Err(BuildError::InsufficientVariants {
            needed,
            available: pool.len(),
        });
    }
    if let Some(tier) = tiers
        .iter()
        .find(|tier| tier.num_snps_in_var > MAX_CATEGORY_ORDER)
    {
        return Err(BuildError::OrderTooLarge {
            order: tier.num_snps_in_var,
            max: MAX_CATEGORY_ORDER,
        });
    }

    let genotypes = pool.genotypes();
    let mut next = pool.order.iter().copied();
    let mut layout: Vec<(CompositeVariable, Vec<usize>)> = Vec::new();
    for (position, tier) in tiers.iter().enumerate() {
        for index in 1..=tier.num_var {
            let members: Vec<usize> = next.by_ref().take(tier.num_snps_in_var).collect();
            let variable = CompositeVariable {
                name: variable_name(position + 1, index),
                tier: position + 1,
                index,
                variants: members
                    .iter()
                    .map(|&v| genotypes.variant_ids()[v].clone())
                    .collect(),
            };
            layout.push((variable, members));
        }
    }

    let columns: Vec<Vec<Category>> = layout
        .par_iter()
        .map(|(_, members)| {
            (0..genotypes.num_samples())
                .map(|sample| {
                    Category::from_calls(members.iter().map(|&v| genotypes.genotype(sample, v)))
                })
                .collect()
        })
        .collect();

    let max_order = tiers
        .iter()
        .map(|tier| tier.num_snps_in_var)
        .max()
        .unwrap_or(0);
    let variables: Vec<CompositeVariable> = layout.into_iter().map(|(v, _)| v).collect();
    let names = variables.iter().map(|v| v.name.clone()).collect();

    log::info!(
        "Formed {} composite variables from {} of {} pooled variants.",
        variables.len(),
        needed,
        pool.len()
    );

    Ok((
        MembershipTable {
            max_order,
            variables,
        },
        CompositeMatrix {
            sample_ids: genotypes.sample_ids().to_vec(),
            names,
            columns,
        },
    ))
}
