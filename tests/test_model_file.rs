use std::io::Write;
use std::sync::Arc;

use clap::Parser;
use tempfile::NamedTempFile;

use eaudit::cli::{Args, Config};
use eaudit::domain::ConfigError;
use eaudit::model::split_energy;

fn config_with_model(model_json: &str) -> Result<Config, ConfigError> {
    let mut file = NamedTempFile::new().expect("Failed to create temp model file");
    file.write_all(model_json.as_bytes()).expect("Failed to write model");
    let path = file.path().to_string_lossy().into_owned();
    let args = Args::try_parse_from(["eaudit", "-m", path.as_str(), "/bin/true"]).unwrap();
    Config::from_args(args)
}

#[test]
fn test_loads_model_from_file() {
    let config = config_with_model(
        r#"{
            "metric_names": ["instructions", "cycles"],
            "means": [0.0, 0.0],
            "std_devs": [1.0, 1.0],
            "rotation_matrix": [[1.0, 0.0], [0.0, 1.0]],
            "clusters": [{
                "center": [0.0, 0.0],
                "regressors": [
                    { "function": "power", "index": 0, "exponent": 1.0, "weight": 1e-9 }
                ]
            }]
        }"#,
    )
    .expect("valid model must load");

    assert_eq!(config.processor_model.metric_names(), ["instructions", "cycles"]);
    let score = config.processor_model.evaluate(&[2e9, 1e9]);
    assert!((score - 2.0).abs() < 1e-12);
}

#[test]
fn test_identity_model_splits_evenly() {
    // Two equal rotation rows collapse both metrics onto one axis; a lone
    // constant regressor then scores every input 1, so a global energy
    // delta divides evenly across cores.
    let config = config_with_model(
        r#"{
            "metric_names": ["instructions", "cycles"],
            "means": [0.0, 0.0],
            "std_devs": [1.0, 1.0],
            "rotation_matrix": [[1.0, 0.0], [1.0, 0.0]],
            "clusters": [{
                "center": [0.0, 0.0],
                "regressors": [{ "function": "constant", "weight": 1.0 }]
            }]
        }"#,
    )
    .expect("valid model must load");

    let model = &config.processor_model;
    for inputs in [[0.0, 0.0], [1.0, 2.0], [1e12, 7.0]] {
        assert_eq!(model.evaluate(&inputs), 1.0);
    }

    let scores = vec![model.evaluate(&[5.0, 5.0]), model.evaluate(&[1e9, 0.0])];
    assert_eq!(split_energy(42.0, &scores), vec![21.0, 21.0]);
}

#[test]
fn test_malformed_model_is_a_config_error() {
    let err = config_with_model(r#"{ "metric_names": ["instructions"] }"#).unwrap_err();
    assert!(matches!(err, ConfigError::MalformedModel { .. }));
}

#[test]
fn test_model_with_no_clusters_rejected() {
    let err = config_with_model(
        r#"{
            "metric_names": [], "means": [], "std_devs": [],
            "rotation_matrix": [], "clusters": []
        }"#,
    )
    .unwrap_err();
    assert!(err.to_string().contains("no clusters"));
}

#[test]
fn test_uncore_model_loads_independently() {
    let mut processor = NamedTempFile::new().unwrap();
    processor
        .write_all(
            br#"{
                "metric_names": ["instructions"],
                "means": [0.0], "std_devs": [1.0],
                "rotation_matrix": [[1.0]],
                "clusters": [{
                    "center": [0.0],
                    "regressors": [{ "function": "constant", "weight": 2.0 }]
                }]
            }"#,
        )
        .unwrap();
    let mut uncore = NamedTempFile::new().unwrap();
    uncore
        .write_all(
            br#"{
                "metric_names": ["instructions"],
                "means": [0.0], "std_devs": [1.0],
                "rotation_matrix": [[1.0]],
                "clusters": [{
                    "center": [0.0],
                    "regressors": [{ "function": "constant", "weight": 3.0 }]
                }]
            }"#,
        )
        .unwrap();

    let processor_path = processor.path().to_string_lossy().into_owned();
    let uncore_path = uncore.path().to_string_lossy().into_owned();
    let args = Args::try_parse_from([
        "eaudit",
        "-m",
        processor_path.as_str(),
        "-u",
        uncore_path.as_str(),
        "/bin/true",
    ])
    .unwrap();
    let config = Config::from_args(args).unwrap();

    assert!(!Arc::ptr_eq(&config.processor_model, &config.uncore_model));
    assert_eq!(config.processor_model.evaluate(&[1.0]), 2.0);
    assert_eq!(config.uncore_model.evaluate(&[1.0]), 3.0);
}
