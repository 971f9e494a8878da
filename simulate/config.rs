//! # Simulation Configuration
//!
//! The run is described by a single TOML file. Key names follow the historic
//! camelCase layout (`numLoop`, `pvalueThr`, `variables = [{ numVar, numSnpsInVar }]`)
//! so existing configurations carry over without edits.
//!
//! Validation happens here, before any genotype is touched. Counts are unsigned,
//! so a negative value is rejected while parsing.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::types::MAX_CATEGORY_ORDER;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write configuration file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML configuration: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize configuration to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where the raw genotypes come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Vcf,
    Csv,
}

/// One order tier: `num_var` composite variables of `num_snps_in_var` variants each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderTier {
    pub num_var: usize,
    pub num_snps_in_var: usize,
}

impl OrderTier {
    pub fn new(num_var: usize, num_snps_in_var: usize) -> Self {
        Self {
            num_var,
            num_snps_in_var,
        }
    }

    /// Variants consumed by the whole tier.
    pub fn num_snps(&self) -> usize {
        self.num_var * self.num_snps_in_var
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    #[serde(default)]
    pub shuffle_snps: bool,
    pub input_type: InputType,
    #[serde(rename = "dumpCSV", default)]
    pub dump_csv: bool,
    pub input_prefix: String,
    pub output_prefix: String,
    pub pvalue_thr: f64,
    pub num_tree: usize,
    pub num_loop: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub variables: Vec<OrderTier>,
}

/// The configuration as echoed next to the outputs, with the derived totals.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedConfig<'a> {
    shuffle_snps: bool,
    input_type: InputType,
    #[serde(rename = "dumpCSV")]
    dump_csv: bool,
    input_prefix: &'a str,
    output_prefix: &'a str,
    pvalue_thr: f64,
    num_tree: usize,
    num_loop: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    num_variables: usize,
    num_snps_needed: usize,
    max_order: usize,
    variables: &'a [OrderTier],
}

impl SimulationConfig {
    /// Loads and validates a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.variables.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one order tier must be listed under `variables`".into(),
            ));
        }
        for (position, tier) in self.variables.iter().enumerate() {
            let tier_number = position + 1;
            if tier.num_var == 0 {
                return Err(ConfigError::Invalid(format!(
                    "order tier {tier_number} declares zero variables"
                )));
            }
            if tier.num_snps_in_var == 0 {
                return Err(ConfigError::Invalid(format!(
                    "order tier {tier_number} declares variables with zero variants"
                )));
            }
            if tier.num_snps_in_var > MAX_CATEGORY_ORDER {
                return Err(ConfigError::Invalid(format!(
                    "order tier {tier_number} asks for {} variants per variable; the maximum is {MAX_CATEGORY_ORDER}",
                    tier.num_snps_in_var
                )));
            }
        }
        if !(self.pvalue_thr > 0.0 && self.pvalue_thr <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "pvalueThr must lie in (0, 1], got {}",
                self.pvalue_thr
            )));
        }
        if self.num_tree == 0 {
            return Err(ConfigError::Invalid("numTree must be at least 1".into()));
        }
        Ok(())
    }

    pub fn num_variables(&self) -> usize {
        self.variables.iter().map(|tier| tier.num_var).sum()
    }

    pub fn num_snps_needed(&self) -> usize {
        self.variables.iter().map(OrderTier::num_snps).sum()
    }

    pub fn max_order(&self) -> usize {
        self.variables
            .iter()
            .map(|tier| tier.num_snps_in_var)
            .max()
            .unwrap_or(0)
    }

    /// Path of the raw genotype input. VCF input falls back to a gzipped file
    /// when the plain one does not exist.
    pub fn input_path(&self) -> PathBuf {
        match self.input_type {
            InputType::Csv => self.csv_input_path(),
            InputType::Vcf => {
                let plain = PathBuf::from(format!("{}.vcf", self.input_prefix));
                let gzipped = PathBuf::from(format!("{}.vcf.gz", self.input_prefix));
                if !plain.exists() && gzipped.exists() {
                    gzipped
                } else {
                    plain
                }
            }
        }
    }

    pub fn csv_input_path(&self) -> PathBuf {
        PathBuf::from(format!("{}.csv", self.input_prefix))
    }

    pub fn output_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}.{suffix}", self.output_prefix))
    }

    /// Writes the configuration and its derived totals as TOML.
    pub fn save_resolved(&self, path: &Path) -> Result<(), ConfigError> {
        let resolved = ResolvedConfig {
            shuffle_snps: self.shuffle_snps,
            input_type: self.input_type,
            dump_csv: self.dump_csv,
            input_prefix: &self.input_prefix,
            output_prefix: &self.output_prefix,
            pvalue_thr: self.pvalue_thr,
            num_tree: self.num_tree,
            num_loop: self.num_loop,
            seed: self.seed,
            num_variables: self.num_variables(),
            num_snps_needed: self.num_snps_needed(),
            max_order: self.max_order(),
            variables: &self.variables,
        };
        let toml_string = toml::to_string_pretty(&resolved)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }
}
