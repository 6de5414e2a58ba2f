//! Integration tests for slitred

mod pipeline;
mod support;

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::Path;
    use tempfile::TempDir;

    const MANIFEST: &str = r#"
[[exposure]]
filename = "b0001.fits"
target = "HD 1"

[exposure.metadata]
slitwid = "1.0"
dichroic = "d55"
disperser = "600/4000"
cdangle = 23.5

[[exposure]]
filename = "b0002.fits"
target = "HD 2"

[exposure.metadata]
slitwid = "1.0"
dichroic = "d55"
disperser = "600/4000"
cdangle = 23.5
"#;

    /// Command isolated from user and project config
    fn slitred(dir: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("slitred");
        cmd.current_dir(dir)
            .env_remove("SLITRED_CONFIG")
            .args(["--no-local", "--config"])
            .arg(dir.join("config.toml"));
        cmd
    }

    fn manifest(dir: &TempDir, content: &str) -> std::path::PathBuf {
        let path = dir.path().join("night.toml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("slitred")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("long-slit spectrograph reduction"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("slitred")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("slitred"));
    }

    #[test]
    fn config_path() {
        let dir = TempDir::new().unwrap();
        slitred(dir.path())
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let dir = TempDir::new().unwrap();
        slitred(dir.path())
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[reduce]"))
            .stdout(predicate::str::contains("reuse_master = false"));
    }

    #[test]
    fn config_init_then_set() {
        let dir = TempDir::new().unwrap();
        slitred(dir.path()).args(["config", "init"]).assert().success();
        slitred(dir.path())
            .args(["config", "set", "reduce.reuse_master", "true"])
            .assert()
            .success();

        let saved = std::fs::read_to_string(dir.path().join("config.toml")).unwrap();
        assert!(saved.contains("reuse_master = true"));
    }

    #[test]
    fn keys_lists_configuration_per_detector() {
        let dir = TempDir::new().unwrap();
        let path = manifest(&dir, MANIFEST);
        slitred(dir.path())
            .args(["keys", "--format", "plain"])
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "b0001.fits 1 S10-D55-G6004000-T235-B11",
            ));
    }

    #[test]
    fn run_missing_manifest() {
        let dir = TempDir::new().unwrap();
        slitred(dir.path())
            .args(["run", "nonexistent.toml"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Path not found"));
    }

    #[test]
    fn run_writes_spectra_and_qa() {
        let dir = TempDir::new().unwrap();
        let path = manifest(&dir, MANIFEST);
        let out = dir.path().join("out");

        slitred(dir.path())
            .args(["run", "--reuse-master", "--format", "json", "-o"])
            .arg(&out)
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"status\": 0"));

        assert!(out.join("spec1d_b0001.json").exists());
        assert!(out.join("spec1d_b0002.json").exists());

        let qa = std::fs::read_to_string(out.join("QA").join("qa_0001.jsonl")).unwrap();
        assert!(qa.contains("master_reused"));
        assert!(qa.contains("\"closed\""));
    }

    #[test]
    fn run_reports_failed_exposure() {
        let dir = TempDir::new().unwrap();
        let content = format!(
            "{}\n{}",
            MANIFEST,
            r#"
[[exposure]]
filename = "b0003.fits"
target = "HD 3"

[exposure.metadata]
cdangle = 30
fail = "wave"
"#
        );
        let path = manifest(&dir, &content);
        let out = dir.path().join("out");

        slitred(dir.path())
            .args(["run", "--format", "plain", "-o"])
            .arg(&out)
            .arg(&path)
            .assert()
            .failure()
            .stdout(predicate::str::contains("b0003.fits failed"))
            .stderr(predicate::str::contains("1 of 3 detector reductions failed"));

        assert!(out.join("spec1d_b0001.json").exists());
        assert!(!out.join("spec1d_b0003.json").exists());
    }

    #[test]
    fn prep_only_writes_no_spectra() {
        let dir = TempDir::new().unwrap();
        let path = manifest(&dir, MANIFEST);
        let out = dir.path().join("out");

        slitred(dir.path())
            .args(["run", "--prep-only", "--no-qa", "--format", "json", "-o"])
            .arg(&out)
            .arg(&path)
            .assert()
            .success()
            .stdout(predicate::str::contains("\"prep_only\": true"));

        assert!(!out.join("spec1d_b0001.json").exists());
    }
}
