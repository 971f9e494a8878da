// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are used in one file.

use ahash::AHashMap;
use ndarray::{Array2, ArrayView2, Axis};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The longest composite variable whose category still packs into a `u64`
/// (3^40 < 2^64).
pub const MAX_CATEGORY_ORDER: usize = 40;

/// A single biallelic genotype call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Genotype {
    Reference,
    Heterozygous,
    Alternate,
}

impl Genotype {
    #[inline]
    pub fn from_dosage(dosage: u8) -> Option<Self> {
        match dosage {
            0 => Some(Self::Reference),
            1 => Some(Self::Heterozygous),
            2 => Some(Self::Alternate),
            _ => None,
        }
    }

    #[inline]
    pub fn dosage(self) -> u8 {
        match self {
            Self::Reference => 0,
            Self::Heterozygous => 1,
            Self::Alternate => 2,
        }
    }

    #[inline]
    pub fn symbol(self) -> char {
        match self {
            Self::Reference => 'R',
            Self::Heterozygous => 'H',
            Self::Alternate => 'A',
        }
    }

    pub fn from_symbol(symbol: char) -> Option<Self> {
        match symbol {
            'R' => Some(Self::Reference),
            'H' => Some(Self::Heterozygous),
            'A' => Some(Self::Alternate),
            _ => None,
        }
    }
}

/// The categorical value of a composite variable for one sample: the ordered
/// concatenation of its constituent calls, packed as a base-3 number.
///
/// Two categories compare equal exactly when their R/H/A renderings do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Category {
    code: u64,
    order: u8,
}

impl Category {
    pub const EMPTY: Category = Category { code: 0, order: 0 };

    /// Appends one more call to the right-hand end of the category.
    #[inline]
    pub fn push(self, call: Genotype) -> Self {
        debug_assert!((self.order as usize) < MAX_CATEGORY_ORDER);
        Self {
            code: self.code * 3 + u64::from(call.dosage()),
            order: self.order + 1,
        }
    }

    pub fn from_calls<I>(calls: I) -> Self
    where
        I: IntoIterator<Item = Genotype>,
    {
        calls.into_iter().fold(Self::EMPTY, Self::push)
    }

    #[inline]
    pub fn order(&self) -> usize {
        self.order as usize
    }

    /// The constituent calls, left to right.
    pub fn calls(&self) -> Vec<Genotype> {
        let mut calls = Vec::with_capacity(self.order());
        let mut code = self.code;
        for _ in 0..self.order {
            let digit = (code % 3) as u8;
            calls.push(Genotype::from_dosage(digit).unwrap_or(Genotype::Reference));
            code /= 3;
        }
        calls.reverse();
        calls
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for call in self.calls() {
            write!(f, "{}", call.symbol())?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CategoryParseError {
    #[error("'{0}' is not a genotype symbol; expected one of R, H or A")]
    UnknownSymbol(char),
    #[error("a category holds at most {max} calls, got {0}", max = MAX_CATEGORY_ORDER)]
    TooLong(usize),
    #[error("a category needs at least one call")]
    Empty,
}

impl FromStr for Category {
    type Err = CategoryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let len = s.chars().count();
        if len == 0 {
            return Err(CategoryParseError::Empty);
        }
        if len > MAX_CATEGORY_ORDER {
            return Err(CategoryParseError::TooLong(len));
        }
        s.chars().try_fold(Self::EMPTY, |category, symbol| {
            Genotype::from_symbol(symbol)
                .map(|call| category.push(call))
                .ok_or(CategoryParseError::UnknownSymbol(symbol))
        })
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MatrixError {
    #[error(
        "Genotype matrix has shape {rows}x{cols}, but {samples} samples and {variants} variants were named."
    )]
    ShapeMismatch {
        rows: usize,
        cols: usize,
        samples: usize,
        variants: usize,
    },
    #[error("Variant '{variant}' has an invalid dosage {dosage} for sample '{sample}'.")]
    InvalidDosage {
        variant: String,
        sample: String,
        dosage: u8,
    },
    #[error("Variant identifier '{0}' appears more than once.")]
    DuplicateVariant(String),
}

/// A per-sample or per-variable input that does not line up with the
/// composite matrix it is applied to.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ShapeError {
    #[error("Received {labels} labels for a matrix of {samples} samples.")]
    LabelCount { labels: usize, samples: usize },
    #[error("Received {tables} risk tables for a matrix of {variables} composite variables.")]
    TableCount { tables: usize, variables: usize },
}

impl ShapeError {
    pub fn check_labels(labels: &[bool], samples: usize) -> Result<(), Self> {
        if labels.len() == samples {
            Ok(())
        } else {
            Err(Self::LabelCount {
                labels: labels.len(),
                samples,
            })
        }
    }
}

/// The complete, immutable raw genotype matrix.
///
/// Dosages are stored samples x variants, one call per cell, no missing data.
#[derive(Debug, Clone)]
pub struct GenotypeMatrix {
    variant_ids: Vec<String>,
    sample_ids: Vec<String>,
    dosages: Array2<u8>,
    index: AHashMap<String, usize>,
}

impl GenotypeMatrix {
    pub fn new(
        variant_ids: Vec<String>,
        sample_ids: Vec<String>,
        dosages: Array2<u8>,
    ) -> Result<Self, MatrixError> {
        let (rows, cols) = dosages.dim();
        if rows != sample_ids.len() || cols != variant_ids.len() {
            return Err(MatrixError::ShapeMismatch {
                rows,
                cols,
                samples: sample_ids.len(),
                variants: variant_ids.len(),
            });
        }

        if let Some(((sample, variant), &dosage)) =
            dosages.indexed_iter().find(|(_, dosage)| **dosage > 2)
        {
            return Err(MatrixError::InvalidDosage {
                variant: variant_ids[variant].clone(),
                sample: sample_ids[sample].clone(),
                dosage,
            });
        }

        let mut index = AHashMap::with_capacity(variant_ids.len());
        for (i, id) in variant_ids.iter().enumerate() {
            if index.insert(id.clone(), i).is_some() {
                return Err(MatrixError::DuplicateVariant(id.clone()));
            }
        }

        Ok(Self {
            variant_ids,
            sample_ids,
            dosages,
            index,
        })
    }

    /// Builds a matrix from per-sample rows of calls. Mostly useful for small fixtures.
    pub fn from_calls(
        variant_ids: Vec<String>,
        sample_ids: Vec<String>,
        calls: &[Vec<Genotype>],
    ) -> Result<Self, MatrixError> {
        let cols = variant_ids.len();
        if calls.len() != sample_ids.len() || calls.iter().any(|row| row.len() != cols) {
            return Err(MatrixError::ShapeMismatch {
                rows: calls.len(),
                cols: calls.first().map_or(0, Vec::len),
                samples: sample_ids.len(),
                variants: cols,
            });
        }
        let dosages =
            Array2::from_shape_fn((calls.len(), cols), |(s, v)| calls[s][v].dosage());
        Self::new(variant_ids, sample_ids, dosages)
    }

    #[inline]
    pub fn num_samples(&self) -> usize {
        self.sample_ids.len()
    }

    #[inline]
    pub fn num_variants(&self) -> usize {
        self.variant_ids.len()
    }

    pub fn variant_ids(&self) -> &[String] {
        &self.variant_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn dosages(&self) -> ArrayView2<'_, u8> {
        self.dosages.view()
    }

    pub fn variant_index(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[inline]
    pub fn genotype(&self, sample: usize, variant: usize) -> Genotype {
        // Dosages are validated on construction.
        Genotype::from_dosage(self.dosages[[sample, variant]]).unwrap_or(Genotype::Reference)
    }

    /// Copies out the dosage columns of the named variants, in the order given.
    /// Unknown identifiers are skipped.
    pub fn select_variants<S: AsRef<str>>(&self, ids: &[S]) -> Array2<u8> {
        let columns: Vec<usize> = ids
            .iter()
            .filter_map(|id| self.variant_index(id.as_ref()))
            .collect();
        self.dosages.select(Axis(1), &columns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn category_renders_calls_left_to_right() {
        let category = Category::from_calls([
            Genotype::Reference,
            Genotype::Heterozygous,
            Genotype::Alternate,
        ]);
        assert_eq!(category.order(), 3);
        assert_eq!(category.to_string(), "RHA");
        assert_eq!("RHA".parse::<Category>().unwrap(), category);
    }

    #[test]
    fn categories_of_different_length_are_distinct() {
        let short: Category = "R".parse().unwrap();
        let long: Category = "RR".parse().unwrap();
        assert_ne!(short, long);
        assert_eq!(long.to_string(), "RR");
    }

    #[test]
    fn category_parse_rejects_bad_symbols() {
        assert_eq!(
            "RXA".parse::<Category>(),
            Err(CategoryParseError::UnknownSymbol('X'))
        );
        assert_eq!("".parse::<Category>(), Err(CategoryParseError::Empty));
        let long = "A".repeat(MAX_CATEGORY_ORDER + 1);
        assert_eq!(
            long.parse::<Category>(),
            Err(CategoryParseError::TooLong(MAX_CATEGORY_ORDER + 1))
        );
    }

    #[test]
    fn longest_category_survives_packing() {
        let text: String = "AHR".chars().cycle().take(MAX_CATEGORY_ORDER).collect();
        let category: Category = text.parse().unwrap();
        assert_eq!(category.to_string(), text);
    }

    #[test]
    fn matrix_rejects_out_of_range_dosages() {
        let err = GenotypeMatrix::new(
            vec!["a".into(), "b".into()],
            vec!["s1".into()],
            array![[0u8, 3]],
        )
        .unwrap_err();
        assert_eq!(
            err,
            MatrixError::InvalidDosage {
                variant: "b".into(),
                sample: "s1".into(),
                dosage: 3,
            }
        );
    }

    #[test]
    fn matrix_rejects_duplicate_variants() {
        let err = GenotypeMatrix::new(
            vec!["a".into(), "a".into()],
            vec!["s1".into()],
            array![[0u8, 1]],
        )
        .unwrap_err();
        assert_eq!(err, MatrixError::DuplicateVariant("a".into()));
    }

    #[test]
    fn select_variants_follows_requested_order() {
        let matrix = GenotypeMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["s1".into(), "s2".into()],
            array![[0u8, 1, 2], [2, 1, 0]],
        )
        .unwrap();
        let selected = matrix.select_variants(&["c", "missing", "a"]);
        assert_eq!(selected, array![[2u8, 0], [0, 2]]);
        assert_eq!(matrix.genotype(1, 0), Genotype::Alternate);
    }
}
