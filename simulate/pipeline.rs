//! # Simulation Pipeline
//!
//! Drives one complete run: configuration, genotype input, composite variables,
//! the refinement loop, the association filter and the optional post-hoc
//! validation, writing every table under the configured output prefix.
//!
//! A run is all-or-nothing. The first hard failure aborts it; only the
//! validation stage may skip a feature set with a warning, because it runs after
//! the phenotype has been produced and written.

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::association::{
    AssociationError, TruthSet, VariableAssociation, filter_truth, log_exceedance,
    test_associations,
};
use crate::config::{ConfigError, SimulationConfig};
use crate::refine::{RefineError, RefinementSummary, RoundObserver, random_labels, refine};
use crate::shared::genotypes::{InputError, load_genotypes};
use crate::shared::output::{
    write_composite_matrix, write_membership, write_phenotype, write_truth_variants,
};
use crate::types::GenotypeMatrix;
use crate::validate::{
    FeatureSet, ForestParams, RandomForest, ValidationReport, evaluate_feature_set,
};
use crate::variables::{
    BuildError, CompositeMatrix, MembershipTable, VariantPool, build_composites,
};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Input(#[from] InputError),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Refine(#[from] RefineError),
    #[error(transparent)]
    Association(#[from] AssociationError),
    #[error("Failed to write '{}': {source}", path.display())]
    Output {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Knobs that come from the command line rather than the configuration file.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Overrides the configuration's seed.
    pub seed: Option<u64>,
    pub skip_validation: bool,
}

/// Everything the in-memory simulation produces.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub membership: MembershipTable,
    pub composites: CompositeMatrix,
    pub initial_labels: Vec<bool>,
    pub labels: Vec<bool>,
    pub associations: Vec<VariableAssociation>,
    pub truth: TruthSet,
    pub summary: RefinementSummary,
}

#[derive(Debug, Clone)]
pub struct SimulationOutcome {
    /// The seed the run actually used.
    pub seed: u64,
    pub simulation: Simulation,
    pub validation: Vec<ValidationReport>,
}

/// Simulates a phenotype from an already loaded genotype matrix.
///
/// `rng` drives the optional variant shuffle and the initial labels and
/// nothing else, so a seeded generator makes the whole result reproducible.
pub fn simulate_phenotype<R: Rng + ?Sized>(
    genotypes: &GenotypeMatrix,
    config: &SimulationConfig,
    rng: &mut R,
    observer: &mut dyn RoundObserver,
) -> Result<Simulation, PipelineError> {
    let needed = config.num_snps_needed();
    if genotypes.num_variants() < needed {
        return Err(BuildError::InsufficientVariants {
            needed,
            available: genotypes.num_variants(),
        }
        .into());
    }

    let pool = if config.shuffle_snps {
        log::info!("Shuffling the variant pool before forming variables.");
        VariantPool::shuffled(genotypes, rng)
    } else {
        VariantPool::in_input_order(genotypes)
    };
    let (membership, composites) = build_composites(&pool, &config.variables)?;

    let initial_labels = random_labels(composites.num_samples(), rng);
    log_exceedance(
        "Random phenotype",
        &test_associations(&composites, &initial_labels)?,
    );

    let (labels, summary) = refine(
        &composites,
        initial_labels.clone(),
        config.num_loop,
        observer,
    )?;

    let associations = test_associations(&composites, &labels)?;
    log_exceedance("Simulated phenotype", &associations);
    let truth = filter_truth(&associations, &membership, config.pvalue_thr);
    log::info!(
        "{} of {} variables pass p < {:e}, covering {} variants.",
        truth.variables.len(),
        membership.len(),
        config.pvalue_thr,
        truth.variants.len()
    );

    Ok(Simulation {
        membership,
        composites,
        initial_labels,
        labels,
        associations,
        truth,
        summary,
    })
}

/// Runs the whole pipeline described by `config`.
pub fn run(
    config: &SimulationConfig,
    options: &RunOptions,
    observer: &mut dyn RoundObserver,
) -> Result<SimulationOutcome, PipelineError> {
    config.validate()?;
    let seed = options
        .seed
        .or(config.seed)
        .unwrap_or_else(rand::random::<u64>);
    log::info!("Using seed {seed}.");

    if let Some(parent) = config.output_path("config.toml").parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let resolved = SimulationConfig {
        seed: Some(seed),
        ..config.clone()
    };
    resolved.save_resolved(&config.output_path("config.toml"))?;

    let genotypes = load_genotypes(config)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let simulation = simulate_phenotype(&genotypes, config, &mut rng, observer)?;

    write_output(&config.output_path("varData.csv"), |path| {
        write_membership(&simulation.membership, path)
    })?;
    write_output(&config.output_path("varGT.csv"), |path| {
        write_composite_matrix(&simulation.composites, path)
    })?;
    write_output(&config.output_path("pheno.csv"), |path| {
        write_phenotype(simulation.composites.sample_ids(), &simulation.labels, path)
    })?;
    let truth_table = simulation
        .membership
        .restrict(&simulation.truth.variables);
    write_output(&config.output_path("varDataTruth.csv"), |path| {
        write_membership(&truth_table, path)
    })?;
    write_output(&config.output_path("TruthSNP.csv"), |path| {
        write_truth_variants(&simulation.truth.variants, path)
    })?;

    let validation = if options.skip_validation {
        log::info!("Skipping validation.");
        Vec::new()
    } else {
        validate_phenotype(&genotypes, &simulation, config.num_tree, &mut rng)
    };

    Ok(SimulationOutcome {
        seed,
        simulation,
        validation,
    })
}

fn write_output<F>(path: &Path, write: F) -> Result<(), PipelineError>
where
    F: FnOnce(&Path) -> csv::Result<()>,
{
    write(path).map_err(|source| PipelineError::Output {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!("Wrote {}", path.display());
    Ok(())
}

/// Fits a random forest on each of the three variant sets and reports the
/// held-out AUC. Sets that cannot be evaluated are skipped with a warning.
pub fn validate_phenotype<R: Rng + ?Sized>(
    genotypes: &GenotypeMatrix,
    simulation: &Simulation,
    num_tree: usize,
    rng: &mut R,
) -> Vec<ValidationReport> {
    let feature_sets = [
        (FeatureSet::TruthVariants, simulation.truth.variants.clone()),
        (
            FeatureSet::VariableVariants,
            simulation.membership.distinct_variants(),
        ),
        (FeatureSet::AllVariants, genotypes.variant_ids().to_vec()),
    ];

    let mut reports = Vec::with_capacity(feature_sets.len());
    for (feature_set, variant_ids) in feature_sets {
        let features = genotypes.select_variants(&variant_ids);
        let mut forest = RandomForest::new(ForestParams::new(num_tree, rng.random()));
        match evaluate_feature_set(
            feature_set,
            features.view(),
            &simulation.labels,
            &mut forest,
            rng,
        ) {
            Ok(report) => {
                log::info!(
                    "{feature_set}: AUC {:.4} ({} variants, {} train / {} test samples)",
                    report.auc,
                    report.num_features,
                    report.num_train,
                    report.num_test
                );
                let strongest = report
                    .importances
                    .iter()
                    .zip(&variant_ids)
                    .sorted_by(|a, b| b.0.total_cmp(a.0))
                    .take(5)
                    .map(|(importance, id)| format!("{id}={importance:.3}"))
                    .join(", ");
                log::debug!("{feature_set}: most important variants {strongest}");
                reports.push(report);
            }
            Err(e) => log::warn!("Skipping validation on {feature_set}: {e}"),
        }
    }
    reports
}
