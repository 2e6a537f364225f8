//! The strategy loop.

use crate::Harness;
use chrono::{DateTime, Utc};
use eyre::WrapErr;
use scfuzz_common::Result;
use scfuzz_config::SessionConfig;
use scfuzz_evm_coverage::CoverageSnapshot;
use scfuzz_evm_fuzz::{BugRecord, RandomStrategy, Strategy};
use serde::Serialize;
use std::{
    collections::BTreeMap,
    fs,
    path::Path,
    time::{Duration, Instant},
};

/// Limits of one session. `None` means unbounded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Budget {
    pub max_steps: Option<u64>,
    pub max_duration: Option<Duration>,
    /// Episode counters are reset every this many steps; `0` never resets them.
    pub episode_length: u64,
}

impl Default for Budget {
    fn default() -> Self {
        Self::from_config(&SessionConfig::default())
    }
}

impl Budget {
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            max_steps: config.max_steps,
            max_duration: config.max_duration(),
            episode_length: config.episode_length,
        }
    }

    /// At most `steps` steps, in a single episode.
    pub fn steps(steps: u64) -> Self {
        Self { max_steps: Some(steps), max_duration: None, episode_length: 0 }
    }

    pub fn with_episode_length(mut self, episode_length: u64) -> Self {
        self.episode_length = episode_length;
        self
    }
}

/// The reference strategy with the configured seed and value probability.
pub fn strategy_from_config(config: &SessionConfig) -> RandomStrategy {
    let mut strategy = RandomStrategy::new(config.seed);
    strategy.value_probability = config.value_probability.clamp(0.0, 1.0);
    strategy
}

/// Why a session ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StopReason {
    StepBudget,
    TimeBudget,
    /// The strategy proposed no transaction.
    StrategyExhausted,
}

/// Summary of a finished session.
#[derive(Clone, Debug, Serialize)]
pub struct SessionReport {
    pub strategy: String,
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
    pub stop_reason: StopReason,
    /// Every attempted step, failed ones included.
    pub steps: u64,
    pub successes: u64,
    pub reverts: u64,
    pub probes: u64,
    /// Steps that returned a tolerated error.
    pub failures: u64,
    pub failures_by_category: BTreeMap<String, u64>,
    pub episodes: u64,
    pub coverage: CoverageSnapshot,
    pub bugs: Vec<BugRecord>,
}

impl SessionReport {
    pub fn to_json(&self) -> eyre::Result<String> {
        serde_json::to_string_pretty(self).wrap_err("failed to serialize session report")
    }

    /// Writes the report as JSON, creating parent directories.
    pub fn write_json(&self, path: impl AsRef<Path>) -> eyre::Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, self.to_json()?)
            .wrap_err_with(|| format!("failed to write report to {}", path.display()))
    }
}

/// Drives a [`Strategy`] against a [`Harness`].
#[derive(Clone, Copy, Debug, Default)]
pub struct Session;

impl Session {
    /// Runs until the budget is spent or the strategy gives up.
    ///
    /// The budget is checked before every transaction. Resolution errors and timeouts are
    /// logged, counted and skipped; connection, configuration and node errors abort the session.
    pub async fn run(
        harness: &mut Harness,
        strategy: &mut dyn Strategy,
        budget: Budget,
    ) -> Result<SessionReport> {
        harness.discover().await?;
        harness.accounts().await?;

        let started_at = Utc::now();
        let started = Instant::now();
        info!(strategy = strategy.name(), ?budget, "session started");

        let mut steps = 0u64;
        let mut episode_steps = 0u64;
        let mut episodes = 1u64;
        let mut successes = 0u64;
        let mut reverts = 0u64;
        let mut probes = 0u64;
        let mut failures_by_category = BTreeMap::<String, u64>::new();

        let stop_reason = loop {
            if budget.max_steps.is_some_and(|max| steps >= max) {
                break StopReason::StepBudget;
            }
            if budget.max_duration.is_some_and(|max| started.elapsed() >= max) {
                break StopReason::TimeBudget;
            }
            if budget.episode_length > 0 && episode_steps >= budget.episode_length {
                harness.reset_episode();
                episodes += 1;
                episode_steps = 0;
            }

            let observation = harness.observation();
            let Some(intent) = strategy.select_transaction(&observation) else {
                break StopReason::StrategyExhausted;
            };
            steps += 1;
            episode_steps += 1;

            match harness.step(&intent).await {
                Ok((result, feedback)) => {
                    if result.success {
                        successes += 1;
                    } else {
                        reverts += 1;
                    }
                    probes += u64::from(result.probe);
                    trace!(step = steps, %intent, ?feedback, "step done");
                }
                Err(err) if err.is_fatal() => {
                    error!(step = steps, %intent, %err, "aborting session");
                    return Err(err);
                }
                Err(err) => {
                    warn!(step = steps, %intent, %err, "step failed");
                    let category = format!("{:?}", err.category()).to_lowercase();
                    *failures_by_category.entry(category).or_default() += 1;
                }
            }
        };

        let report = SessionReport {
            strategy: strategy.name().to_string(),
            started_at,
            duration: started.elapsed(),
            stop_reason,
            steps,
            successes,
            reverts,
            probes,
            failures: failures_by_category.values().sum(),
            failures_by_category,
            episodes,
            coverage: harness.coverage().snapshot(),
            bugs: harness.oracle().records().cloned().collect(),
        };
        info!(
            steps = report.steps,
            failures = report.failures,
            bugs = report.bugs.len(),
            reason = ?report.stop_reason,
            "session finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_from_config() {
        let config = SessionConfig {
            max_steps: None,
            max_duration_secs: Some(90),
            episode_length: 7,
            ..Default::default()
        };
        let budget = Budget::from_config(&config);
        assert_eq!(budget.max_steps, None);
        assert_eq!(budget.max_duration, Some(Duration::from_secs(90)));
        assert_eq!(budget.episode_length, 7);
        assert_eq!(Budget::steps(3).with_episode_length(2).episode_length, 2);
    }

    #[test]
    fn strategy_uses_the_session_settings() {
        let config = SessionConfig { seed: Some(7), value_probability: 3.0, ..Default::default() };
        assert_eq!(strategy_from_config(&config).value_probability, 1.0);
    }

    #[test]
    fn report_serializes() {
        let report = SessionReport {
            strategy: "random".into(),
            started_at: Utc::now(),
            duration: Duration::from_millis(1500),
            stop_reason: StopReason::StrategyExhausted,
            steps: 2,
            successes: 1,
            reverts: 0,
            probes: 0,
            failures: 1,
            failures_by_category: [("resolution".to_string(), 1)].into(),
            episodes: 1,
            coverage: CoverageSnapshot::default(),
            bugs: Vec::new(),
        };
        let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
        assert_eq!(json["stop_reason"], "strategy-exhausted");
        assert_eq!(json["failures_by_category"]["resolution"], 1);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports").join("session.json");
        report.write_json(&path).unwrap();
        assert!(fs::read_to_string(path).unwrap().contains("\"steps\": 2"));
    }
}
