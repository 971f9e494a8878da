//! Tabular outputs of a simulation run, all written with the `csv` crate.

use itertools::Itertools;
use std::path::Path;

use crate::variables::{CompositeMatrix, EMPTY_SLOT, MembershipTable};

/// Membership table: one column per variable, an `order` row holding the tier
/// number, then `snp_1..snp_<max order>` with `---` in unused slots.
pub fn write_membership(table: &MembershipTable, path: &Path) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(
        std::iter::once("").chain(table.variables().iter().map(|v| v.name.as_str())),
    )?;

    let mut order_row = vec!["order".to_string()];
    order_row.extend(table.variables().iter().map(|v| v.tier.to_string()));
    writer.write_record(&order_row)?;

    let slots = table
        .variables()
        .iter()
        .map(|variable| table.padded_slots(variable))
        .collect_vec();
    for slot in 0..table.max_order() {
        let label = format!("snp_{}", slot + 1);
        let row = std::iter::once(label.as_str())
            .chain(slots.iter().map(|padded| padded[slot].unwrap_or(EMPTY_SLOT)))
            .collect_vec();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

/// Composite genotypes: one row per sample, one R/H/A string per variable.
pub fn write_composite_matrix(matrix: &CompositeMatrix, path: &Path) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(std::iter::once("").chain(matrix.names().iter().map(String::as_str)))?;
    for (sample, id) in matrix.sample_ids().iter().enumerate() {
        let row = std::iter::once(id.clone())
            .chain(
                (0..matrix.num_variables())
                    .map(|variable| matrix.category(sample, variable).to_string()),
            )
            .collect_vec();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_phenotype(sample_ids: &[String], labels: &[bool], path: &Path) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["sample", "lbl"])?;
    for (id, &label) in sample_ids.iter().zip_eq(labels) {
        writer.write_record([id.as_str(), if label { "1" } else { "0" }])?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_truth_variants(variants: &[String], path: &Path) -> csv::Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(["v"])?;
    for variant in variants {
        writer.write_record([variant])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OrderTier;
    use crate::types::GenotypeMatrix;
    use crate::variables::{VariantPool, build_composites};
    use ndarray::array;
    use std::fs;

    fn fixture() -> (MembershipTable, CompositeMatrix) {
        let genotypes = GenotypeMatrix::new(
            vec!["a".into(), "b".into(), "c".into()],
            vec!["s1".into(), "s2".into()],
            array![[0u8, 1, 2], [2, 2, 0]],
        )
        .unwrap();
        build_composites(
            &VariantPool::in_input_order(&genotypes),
            &[OrderTier::new(1, 1), OrderTier::new(1, 2)],
        )
        .unwrap()
    }

    #[test]
    fn membership_is_padded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.varData.csv");
        let (table, _) = fixture();
        write_membership(&table, &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ",O1V1,O2V1\norder,1,2\nsnp_1,a,b\nsnp_2,---,c\n"
        );
    }

    #[test]
    fn composite_rows_follow_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.varGT.csv");
        let (_, matrix) = fixture();
        write_composite_matrix(&matrix, &path).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            ",O1V1,O2V1\ns1,R,HA\ns2,A,AR\n"
        );
    }

    #[test]
    fn phenotype_and_truth_files() {
        let dir = tempfile::tempdir().unwrap();
        let pheno = dir.path().join("run.pheno.csv");
        let truth = dir.path().join("run.TruthSNP.csv");
        write_phenotype(&["s1".into(), "s2".into()], &[true, false], &pheno).unwrap();
        write_truth_variants(&["rs2".into(), "rs10".into()], &truth).unwrap();
        assert_eq!(fs::read_to_string(&pheno).unwrap(), "sample,lbl\ns1,1\ns2,0\n");
        assert_eq!(fs::read_to_string(&truth).unwrap(), "v\nrs2\nrs10\n");
    }
}
