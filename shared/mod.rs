pub mod files;
pub mod genotypes;
pub mod output;
