//! 引擎运行参数：由 AppConfig 转换而来，时长已转为 Duration
//!
//! 越界值直接返回 ConfigurationInvalid，从不悄悄修正。

use std::time::Duration;

use crate::agents::AgentRoster;
use crate::config::{AppConfig, PipelineProfile};
use crate::core::{RetryPolicy, SupervisorError};

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub profile: PipelineProfile,
    pub simple_task_max_words: usize,
    pub auto_parallel_min_agents: usize,
    pub analysis_cache_capacity: usize,

    pub max_parallel_agents: usize,
    pub retry: RetryPolicy,
    pub phase_timeout: Duration,
    pub phase_retry_budget: u32,
    pub slow_execution_threshold: Duration,
    pub oracle_timeout: Duration,

    pub quality_threshold: f64,
    pub refinement_threshold: f64,
    pub refinement_min_improvement: f64,
    pub max_refinement_rounds: usize,
    pub judge_enabled: bool,
    pub judge_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SupervisorSettings {
    /// 只做单位转换，不校验
    fn from(cfg: &AppConfig) -> Self {
        let e = &cfg.execution;
        let q = &cfg.quality;
        Self {
            profile: cfg.pipeline.profile,
            simple_task_max_words: cfg.pipeline.simple_task_max_words,
            auto_parallel_min_agents: cfg.pipeline.auto_parallel_min_agents,
            analysis_cache_capacity: cfg.pipeline.analysis_cache_capacity,
            max_parallel_agents: e.max_parallel_agents,
            retry: RetryPolicy {
                limit: e.agent_retry_limit,
                base_delay: Duration::from_millis(e.retry_base_delay_ms),
                max_delay: Duration::from_millis(e.retry_max_delay_ms),
            },
            phase_timeout: Duration::from_secs(e.phase_timeout_secs),
            phase_retry_budget: e.phase_retry_budget,
            slow_execution_threshold: Duration::from_secs(e.slow_execution_threshold_secs),
            oracle_timeout: Duration::from_secs(e.oracle_timeout_secs),
            quality_threshold: q.quality_threshold,
            refinement_threshold: q.refinement_threshold,
            refinement_min_improvement: q.refinement_min_improvement,
            max_refinement_rounds: q.max_refinement_rounds,
            judge_enabled: q.judge_enabled,
            judge_timeout: Duration::from_secs(q.judge_timeout_seconds),
        }
    }
}

fn check_unit(name: &str, v: f64) -> Result<(), SupervisorError> {
    if v.is_finite() && (0.0..=1.0).contains(&v) {
        Ok(())
    } else {
        Err(SupervisorError::ConfigurationInvalid(format!(
            "{name} must be within [0, 1], got {v}"
        )))
    }
}

impl SupervisorSettings {
    /// 转换并校验
    pub fn from_config(cfg: &AppConfig) -> Result<Self, SupervisorError> {
        let settings = Self::from(cfg);
        settings.validate_ranges()?;
        Ok(settings)
    }

    /// 数值范围校验（不涉及名单）
    pub fn validate_ranges(&self) -> Result<(), SupervisorError> {
        check_unit("quality_threshold", self.quality_threshold)?;
        check_unit("refinement_threshold", self.refinement_threshold)?;
        check_unit("refinement_min_improvement", self.refinement_min_improvement)?;
        if self.refinement_threshold > self.quality_threshold {
            return Err(SupervisorError::ConfigurationInvalid(format!(
                "refinement_threshold ({}) must not exceed quality_threshold ({})",
                self.refinement_threshold, self.quality_threshold
            )));
        }
        if self.max_parallel_agents == 0 {
            return Err(SupervisorError::ConfigurationInvalid(
                "max_parallel_agents must be at least 1".into(),
            ));
        }
        if self.auto_parallel_min_agents < 2 {
            return Err(SupervisorError::ConfigurationInvalid(
                "auto_parallel_min_agents must be at least 2".into(),
            ));
        }
        if self.analysis_cache_capacity == 0 {
            return Err(SupervisorError::ConfigurationInvalid(
                "analysis_cache_capacity must be at least 1".into(),
            ));
        }
        let durations = [
            ("phase_timeout", self.phase_timeout),
            ("oracle_timeout", self.oracle_timeout),
            ("judge_timeout_seconds", self.judge_timeout),
        ];
        for (name, d) in durations {
            if d.is_zero() {
                return Err(SupervisorError::ConfigurationInvalid(format!(
                    "{name} must be greater than zero"
                )));
            }
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(SupervisorError::ConfigurationInvalid(
                "retry_base_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        Ok(())
    }

    /// 运行开始时的完整校验：数值范围 + 名单非空 + 兜底 agent 在名单中
    pub fn validate(&self, roster: &AgentRoster) -> Result<(), SupervisorError> {
        self.validate_ranges()?;
        if roster.is_empty() {
            return Err(SupervisorError::ConfigurationInvalid(
                "agent roster is empty".into(),
            ));
        }
        if roster.resolve(roster.default_agent()).is_none() {
            return Err(SupervisorError::ConfigurationInvalid(format!(
                "default agent '{}' is not in the roster",
                roster.default_agent()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentProfile;

    #[test]
    fn test_defaults_are_valid() {
        let s = SupervisorSettings::from_config(&AppConfig::default()).unwrap();
        assert_eq!(s.retry.limit, 2);
        assert_eq!(s.judge_timeout, Duration::from_secs(20));
        s.validate(&AgentRoster::builtin()).unwrap();
    }

    #[test]
    fn test_out_of_range_threshold_rejected() {
        let mut cfg = AppConfig::default();
        cfg.quality.quality_threshold = 1.5;
        let err = SupervisorSettings::from_config(&cfg).unwrap_err();
        assert!(matches!(err, SupervisorError::ConfigurationInvalid(_)));
    }

    #[test]
    fn test_refinement_above_quality_rejected() {
        let s = SupervisorSettings {
            quality_threshold: 0.7,
            refinement_threshold: 0.9,
            ..Default::default()
        };
        assert!(s.validate_ranges().is_err());
    }

    #[test]
    fn test_nan_rejected() {
        let s = SupervisorSettings {
            refinement_min_improvement: f64::NAN,
            ..Default::default()
        };
        assert!(s.validate_ranges().is_err());
    }

    #[test]
    fn test_missing_default_agent_rejected() {
        let roster = AgentRoster::new(
            vec![AgentProfile::new("Coder", "codes", &["code"])],
            "Generalist",
        );
        let err = SupervisorSettings::default().validate(&roster).unwrap_err();
        assert!(err.to_string().contains("Generalist"));
    }
}
