use std::fs;
use std::process::Command;

use tempfile::tempdir;

const CONFIG: &str = "inputType = 'csv'\n\
inputPrefix = 'geno'\n\
outputPrefix = 'run'\n\
pvalueThr = 0.01\n\
numTree = 5\n\
numLoop = 3\n\
\n\
[[variables]]\n\
numVar = 2\n\
numSnpsInVar = 1\n\
\n\
[[variables]]\n\
numVar = 1\n\
numSnpsInVar = 2\n";

const GENOTYPES: &str = "SNP,a,b,c,d,e,f\n\
rs1,0,1,2,1,0,2\n\
rs2,2,2,0,1,1,0\n\
rs3,1,0,0,2,2,1\n\
rs4,0,0,1,1,2,2\n";

#[test]
fn cli_writes_outputs_relative_to_the_working_directory() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("geno.csv"), GENOTYPES).expect("write genotypes");
    fs::write(tmp.path().join("run.toml"), CONFIG).expect("write config");

    let exe = env!("CARGO_BIN_EXE_polyepi");
    let status = Command::new(exe)
        .current_dir(tmp.path())
        .args(["run.toml", "--seed", "3", "--threads", "2", "--skip-validation"])
        .status()
        .expect("run polyepi cli");

    assert!(status.success(), "CLI exited with status {status:?}");
    for suffix in ["config.toml", "varData.csv", "varGT.csv", "pheno.csv", "varDataTruth.csv", "TruthSNP.csv"] {
        assert!(
            tmp.path().join(format!("run.{suffix}")).exists(),
            "run.{suffix} missing"
        );
    }
}

#[test]
fn cli_rejects_an_invalid_configuration() {
    let tmp = tempdir().expect("temporary directory");
    fs::write(tmp.path().join("geno.csv"), GENOTYPES).expect("write genotypes");
    fs::write(
        tmp.path().join("run.toml"),
        CONFIG.replace("numSnpsInVar = 2", "numSnpsInVar = 0"),
    )
    .expect("write config");

    let output = Command::new(env!("CARGO_BIN_EXE_polyepi"))
        .current_dir(tmp.path())
        .arg("run.toml")
        .output()
        .expect("run polyepi cli");

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid configuration"), "stderr was: {stderr}");
    assert!(!tmp.path().join("run.pheno.csv").exists());
}
