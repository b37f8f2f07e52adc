use std::io::Write;

use tempfile::{tempdir, NamedTempFile};

const CONFIG: &str = r#"{
    "numberOfGenerations": 5,
    "matrixSize": 24,
    "squareSize": 2,
    "infectionPercentage": 30,
    "immunityPercentage": 40,
    "loseImmunityPercentage": 1,
    "vaccinationPercentage": 2,
    "deathPercentage": 4,
    "defaultPersonColor": [255, 255, 255],
    "incubationColor": [255, 200, 0],
    "infectedColor": [255, 0, 0],
    "immuneColor": [0, 200, 0],
    "deadColor": [60, 60, 60],
    "vaccinatedColor": [0, 100, 255],
    "millisecondsToWaitForEachGeneration": 0
}"#;

fn config_file(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
fn runs_a_strip_partitioned_simulation() {
    let config = config_file(CONFIG);
    let output_dir = tempdir().unwrap();
    let assert = assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .args(["--partition", "strip", "--processes", "3", "--random-seed", "5"])
        .arg("--output-dir")
        .arg(output_dir.path())
        .arg("--no-progress")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(
        stdout.contains("Simulated 5 generations on 3 processes"),
        "{stdout}"
    );
    assert!(output_dir.path().join("counts.csv").exists());
}

#[test]
fn generations_can_be_overridden() {
    let config = config_file(CONFIG);
    let assert = assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .args(["--generations", "2", "--no-progress"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("Simulated 2 generations on 1 processes"), "{stdout}");
}

#[test]
fn rejects_an_invalid_configuration() {
    let config = config_file(&CONFIG.replace("\"deathPercentage\": 4", "\"deathPercentage\": -4"));
    let assert = assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .arg("--no-progress")
        .assert()
        .failure();
    let stderr = String::from_utf8(assert.get_output().stderr.clone()).unwrap();
    assert!(stderr.contains("invalid configuration"), "{stderr}");
}

#[test]
fn rejects_an_impossible_partition() {
    let config = config_file(CONFIG);
    assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .args([
            "--partition",
            "block",
            "--process-rows",
            "2",
            "--process-cols",
            "2",
            "--processes",
            "3",
            "--no-progress",
        ])
        .assert()
        .failure();
}

#[test]
fn stdout_carries_only_the_summary_when_piped() {
    let config = config_file(CONFIG);
    let assert = assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .args(["--partition", "strip", "--processes", "2", "--random-seed", "3"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{stdout}");
    assert!(lines[0].starts_with("Simulated 5 generations on 2 processes"), "{stdout}");
    assert!(lines[1].starts_with("default="), "{stdout}");
}

#[test]
fn extra_configuration_keys_are_ignored() {
    let config = config_file(&CONFIG.replace(
        "\"matrixSize\": 24,",
        "\"matrixSize\": 24,\n    \"windowTitle\": \"epidemic\",",
    ));
    assert_cmd::Command::cargo_bin("epigrid")
        .unwrap()
        .arg("--config")
        .arg(config.path())
        .arg("--no-progress")
        .assert()
        .success();
}
