//! Genotype input: the CSV dosage layout and VCF (plain or gzipped).
//!
//! Both readers produce a [`GenotypeMatrix`]. Parsing is deliberately thin; the
//! interesting work starts once the matrix exists.

use ndarray::Array2;
use noodles_vcf::{
    self as vcf,
    variant::RecordBuf,
    variant::record::samples::keys::key,
    variant::record_buf::samples::sample::{
        Value,
        value::genotype::{Allele, Genotype as SampleGenotype},
    },
};
use std::fs::File;
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

use super::files::open_input;
use crate::config::{InputType, SimulationConfig};
use crate::types::{Genotype, GenotypeMatrix, MatrixError};

#[derive(Error, Debug)]
pub enum InputError {
    #[error("I/O error while reading genotypes: {0}")]
    Io(#[from] io::Error),
    #[error("Malformed CSV genotype file: {0}")]
    Csv(#[from] csv::Error),
    #[error("Parse error in '{path}' at line {line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },
    #[error("Invalid VCF record {record} in '{path}': {message}")]
    Record {
        path: String,
        record: usize,
        message: String,
    },
    #[error("Missing genotype call for variant '{variant}' in sample '{sample}'.")]
    MissingCall { variant: String, sample: String },
    #[error(transparent)]
    Matrix(#[from] MatrixError),
    #[error("No variants were found in '{0}'.")]
    Empty(PathBuf),
}

/// Reads genotypes the way the configuration asks for, optionally dumping VCF
/// input to the CSV layout next to it.
pub fn load_genotypes(config: &SimulationConfig) -> Result<GenotypeMatrix, InputError> {
    let path = config.input_path();
    log::info!("Reading genotypes from {}", path.display());
    let matrix = match config.input_type {
        InputType::Csv => read_csv_genotypes(&path)?,
        InputType::Vcf => {
            let matrix = read_vcf_genotypes(&path)?;
            if config.dump_csv {
                let dump = config.csv_input_path();
                write_csv_genotypes(&matrix, &dump)?;
                log::info!("Wrote parsed genotypes to {}", dump.display());
            }
            matrix
        }
    };
    log::info!(
        "Loaded {} variants for {} samples.",
        matrix.num_variants(),
        matrix.num_samples()
    );
    Ok(matrix)
}

/// Reads the `SNP,<sample ids...>` layout: one variant per row, dosage cells.
pub fn read_csv_genotypes(path: &Path) -> Result<GenotypeMatrix, InputError> {
    let mut reader = csv::ReaderBuilder::new().from_reader(open_input(path)?);
    let sample_ids: Vec<String> = reader
        .headers()?
        .iter()
        .skip(1)
        .map(str::to_string)
        .collect();

    let mut variant_ids = Vec::new();
    let mut rows: Vec<Vec<u8>> = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result?;
        // Line 1 is the header.
        let line = row + 2;
        let parse_error = |message: String| InputError::Parse {
            path: path.display().to_string(),
            line,
            message,
        };

        let mut fields = record.iter();
        let id = fields
            .next()
            .ok_or_else(|| parse_error("empty row".into()))?;
        let dosages = fields
            .map(|cell| match cell.trim().parse::<u8>() {
                Ok(dosage) if dosage <= 2 => Ok(dosage),
                _ => Err(parse_error(format!(
                    "variant '{id}' has dosage '{cell}', expected 0, 1 or 2"
                ))),
            })
            .collect::<Result<Vec<u8>, InputError>>()?;
        variant_ids.push(id.to_string());
        rows.push(dosages);
    }

    assemble(path, variant_ids, sample_ids, &rows)
}

/// Reads a VCF, keeping only the `GT` sub-field of every sample.
///
/// Variant identifiers are `CHROM:POS:REF:ALT`. Phased and unphased calls are
/// treated alike and a missing call is an error.
pub fn read_vcf_genotypes(path: &Path) -> Result<GenotypeMatrix, InputError> {
    let mut reader = vcf::io::Reader::new(open_input(path)?);
    let header = reader.read_header()?;
    let sample_ids: Vec<String> = header.sample_names().iter().cloned().collect();
    let path_display = path.display().to_string();

    let mut variant_ids = Vec::new();
    let mut rows: Vec<Vec<u8>> = Vec::new();
    let mut record = RecordBuf::default();
    loop {
        let bytes = reader.read_record_buf(&header, &mut record)?;
        if bytes == 0 {
            break;
        }
        let index = rows.len() + 1;
        let id = variant_id(&record);
        let invalid = |message: String| InputError::Record {
            path: path_display.clone(),
            record: index,
            message: format!("variant '{id}': {message}"),
        };
        let dosages = record_dosages(&record, &id, &sample_ids, &invalid)?;
        variant_ids.push(id);
        rows.push(dosages);
    }

    assemble(path, variant_ids, sample_ids, &rows)
}

fn variant_id(record: &RecordBuf) -> String {
    let alternates: &[String] = record.alternate_bases().as_ref();
    format!(
        "{}:{}:{}:{}",
        record.reference_sequence_name(),
        record.variant_start().map_or(0, usize::from),
        record.reference_bases(),
        alternates.join(",")
    )
}

/// The `GT` dosage of every sample in one record.
fn record_dosages(
    record: &RecordBuf,
    id: &str,
    sample_ids: &[String],
    invalid: &dyn Fn(String) -> InputError,
) -> Result<Vec<u8>, InputError> {
    let Some(calls) = record.samples().select(key::GENOTYPE) else {
        return Err(invalid("no GT field".into()));
    };

    sample_ids
        .iter()
        .enumerate()
        .map(|(index, sample)| {
            let missing = || InputError::MissingCall {
                variant: id.to_string(),
                sample: sample.clone(),
            };
            let call = match calls.get(index) {
                Some(Some(Value::Genotype(genotype))) => call_from_alleles(genotype.as_ref()),
                Some(Some(Value::String(text))) => {
                    let genotype = SampleGenotype::from_str(text).map_err(|err| {
                        invalid(format!("failed to parse genotype string '{text}': {err}"))
                    })?;
                    call_from_alleles(genotype.as_ref())
                }
                Some(Some(other)) => return Err(invalid(format!("unexpected GT value {other:?}"))),
                Some(None) | None => return Err(missing()),
            };
            call.map_err(invalid)?
                .map(Genotype::dosage)
                .ok_or_else(missing)
        })
        .collect()
}

/// Diploid biallelic call from parsed alleles; `None` when any allele is missing.
fn call_from_alleles(alleles: &[Allele]) -> Result<Option<Genotype>, String> {
    let Some(positions) = alleles
        .iter()
        .map(Allele::position)
        .collect::<Option<Vec<usize>>>()
    else {
        return Ok(None);
    };
    if positions.len() != 2 {
        return Err(format!(
            "expected a diploid GT, found {} alleles",
            positions.len()
        ));
    }
    let mut dosage = 0u8;
    for position in positions {
        match position {
            0 => {}
            1 => dosage += 1,
            other => {
                return Err(format!(
                    "unsupported allele {other} (only biallelic sites are accepted)"
                ));
            }
        }
    }
    Ok(Genotype::from_dosage(dosage))
}

/// Writes a matrix in the CSV input layout.
pub fn write_csv_genotypes(matrix: &GenotypeMatrix, path: &Path) -> Result<(), InputError> {
    let mut writer = csv::Writer::from_writer(BufWriter::new(File::create(path)?));
    writer.write_record(std::iter::once("SNP").chain(matrix.sample_ids().iter().map(String::as_str)))?;
    let dosages = matrix.dosages();
    for (variant, id) in matrix.variant_ids().iter().enumerate() {
        let mut record = Vec::with_capacity(matrix.num_samples() + 1);
        record.push(id.clone());
        record.extend(dosages.column(variant).iter().map(u8::to_string));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Turns variant-major rows into the samples x variants matrix.
fn assemble(
    path: &Path,
    variant_ids: Vec<String>,
    sample_ids: Vec<String>,
    rows: &[Vec<u8>],
) -> Result<GenotypeMatrix, InputError> {
    if variant_ids.is_empty() {
        return Err(InputError::Empty(path.to_path_buf()));
    }
    if let Some((variant, row)) = rows
        .iter()
        .enumerate()
        .find(|(_, row)| row.len() != sample_ids.len())
    {
        return Err(InputError::Parse {
            path: path.display().to_string(),
            line: variant + 2,
            message: format!(
                "variant '{}' has {} calls for {} samples",
                variant_ids[variant],
                row.len(),
                sample_ids.len()
            ),
        });
    }
    let dosages = Array2::from_shape_fn((sample_ids.len(), variant_ids.len()), |(s, v)| rows[v][s]);
    Ok(GenotypeMatrix::new(variant_ids, sample_ids, dosages)?)
}
