//! 配置加载集成测试

use std::path::PathBuf;
use std::sync::Arc;

use hive::agents::MockAgentExecutor;
use hive::config::{load_config, PipelineProfile};
use hive::core::{ErrorKind, Phase, SupervisorBuilder, SupervisorError, SupervisorSettings};
use hive::oracle::MockOracle;
use hive::pipeline::Task;

fn write_config(dir: &tempfile::TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("hive.toml");
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(
        &dir,
        r#"
[pipeline]
profile = "light"
simple_task_max_words = 12

[quality]
quality_threshold = 0.9
refinement_threshold = 0.85
judge_enabled = true
judge_timeout_seconds = 5

[agents]
default_agent = "Scout"

[[agents.roster]]
name = "Scout"
description = "Finds things"
capabilities = ["web_search"]

[[agents.roster]]
name = "Scribe"
capabilities = ["writing"]
system_prompt = "You write."
"#,
    );

    let cfg = load_config(Some(path)).unwrap();
    assert_eq!(cfg.pipeline.profile, PipelineProfile::Light);
    assert_eq!(cfg.pipeline.simple_task_max_words, 12);
    assert!((cfg.quality.quality_threshold - 0.9).abs() < f64::EPSILON);
    assert!(cfg.quality.judge_enabled);
    assert_eq!(cfg.agents.roster.len(), 2);

    let settings = SupervisorSettings::from_config(&cfg).unwrap();
    assert_eq!(settings.judge_timeout.as_secs(), 5);

    let sup = SupervisorBuilder::from_config(&cfg)
        .with_oracle(Arc::new(MockOracle::new()))
        .with_executor(Arc::new(MockAgentExecutor::new()))
        .build()
        .unwrap();
    assert_eq!(sup.roster().default_agent(), "Scout");
    assert!(sup.roster().resolve("scribe").is_some());
    assert!(sup.has_judge());
}

#[test]
fn test_without_explicit_file_uses_defaults() {
    let cfg = load_config(None).unwrap();
    assert_eq!(cfg.agents.default_agent, "Generalist");
    assert!(SupervisorSettings::from_config(&cfg).is_ok());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(load_config(Some(dir.path().join("absent.toml"))).is_err());
}

#[test]
fn test_out_of_range_threshold_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[quality]\nquality_threshold = 1.5\n");
    let cfg = load_config(Some(path)).unwrap();
    assert!(matches!(
        SupervisorSettings::from_config(&cfg),
        Err(SupervisorError::ConfigurationInvalid(_))
    ));
}

#[tokio::test]
async fn test_invalid_file_fails_run_at_intake() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[quality]\nrefinement_min_improvement = -0.5\n");
    let cfg = load_config(Some(path)).unwrap();

    let oracle = Arc::new(MockOracle::new());
    let sup = SupervisorBuilder::from_config(&cfg)
        .with_oracle(oracle.clone())
        .with_executor(Arc::new(MockAgentExecutor::new()))
        .build()
        .unwrap();
    let outcome = sup
        .run(Task::new("Compare three databases for a write heavy workload please"))
        .await;
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.kind, ErrorKind::ConfigurationInvalid);
    assert_eq!(failure.phase, Phase::Intake);
    assert_eq!(oracle.total_calls(), 0);
}

#[test]
fn test_env_overrides_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(&dir, "[execution]\nphase_retry_budget = 4\n");
    std::env::set_var("HIVE__EXECUTION__PHASE_RETRY_BUDGET", "6");
    let cfg = load_config(Some(path));
    std::env::remove_var("HIVE__EXECUTION__PHASE_RETRY_BUDGET");
    assert_eq!(cfg.unwrap().execution.phase_retry_budget, 6);
}
