use std::path::Path;

use labrun_core::errors::{ErrorInfo, LabError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("experiment", "power")
        .with_context("workspace", "qtl")
}

#[test]
fn config_error_surface() {
    let err = LabError::Config(sample_info("unknown_experiment", "no definition registered"));
    assert_eq!(err.info().code, "unknown_experiment");
    assert!(err.info().context.contains_key("experiment"));
}

#[test]
fn setup_error_surface() {
    let err = LabError::Setup(sample_info("no_jobs", "no job has been generated"));
    assert_eq!(err.info().code, "no_jobs");
    assert!(err.to_string().starts_with("setup error:"));
}

#[test]
fn storage_error_carries_path() {
    let err = LabError::storage("job_read", Path::new("/tmp/job/0/3.json"), "missing");
    assert_eq!(err.info().context.get("path").map(String::as_str), Some("/tmp/job/0/3.json"));
}

#[test]
fn display_includes_context_and_hint() {
    let err = LabError::Merge(
        ErrorInfo::new("merge_key_collision", "key written twice")
            .with_context("key", "7")
            .with_hint("each id must be produced by exactly one file"),
    );
    let rendered = err.to_string();
    assert!(rendered.contains("key=7"));
    assert!(rendered.contains("hint: each id"));
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = LabError::Cluster(ErrorInfo::new("submit_failed", "queue closed"));
    let json = serde_json::to_value(&err).expect("serialize");
    assert_eq!(json["family"], "Cluster");
    let back: LabError = serde_json::from_value(json).expect("deserialize");
    assert_eq!(back, err);
}
