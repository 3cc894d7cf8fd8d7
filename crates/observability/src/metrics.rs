//! Pipeline run metrics
//!
//! Recorded from finished [`PipelineRun`] records, so the runner itself stays
//! free of any metrics backend.

use std::collections::BTreeMap;
use std::fmt;

use contracts::{PipelineRun, StageRecord, StageStatus};
use metrics::{counter, histogram};

/// Record one stage outcome
///
/// Every stage counts towards `connectome_stage_total{stage,status}`;
/// stages that ran also record their duration, failed ones their kind.
pub fn record_stage_metrics(record: &StageRecord) {
    let stage = record.stage_id.to_string();
    counter!(
        "connectome_stage_total",
        "stage" => stage.clone(),
        "status" => record.status.as_str()
    )
    .increment(1);

    if let Some(duration) = record.duration() {
        histogram!("connectome_stage_duration_seconds", "stage" => stage.clone())
            .record(duration.num_milliseconds() as f64 / 1000.0);
    }

    if let Some(failure) = &record.failure {
        counter!(
            "connectome_stage_failures_total",
            "stage" => stage,
            "kind" => failure.kind.to_string()
        )
        .increment(1);
    }
}

/// Record a finished subject run and each of its stages
pub fn record_run_metrics(run: &PipelineRun, invocations: usize) {
    for record in &run.stages {
        record_stage_metrics(record);
    }

    counter!("connectome_tool_invocations_total").increment(invocations as u64);

    let outcome = if run.was_aborted() {
        "aborted"
    } else if run.is_success() {
        "success"
    } else {
        "failure"
    };
    counter!("connectome_runs_total", "outcome" => outcome).increment(1);

    if let Some(end) = run.finished_at {
        histogram!("connectome_run_duration_seconds")
            .record((end - run.started_at).num_milliseconds() as f64 / 1000.0);
    }
}

/// Batch statistics aggregated in memory
#[derive(Debug, Clone, Default)]
pub struct RunStatsAggregator {
    pub subjects: u64,
    pub succeeded_subjects: u64,
    pub failed_subjects: u64,
    pub tool_invocations: u64,

    /// Wall time of executed stages, in seconds
    pub stage_durations: BTreeMap<String, RunningStats>,

    /// Failures per stage
    pub stage_failures: BTreeMap<String, u64>,

    /// Whole-run wall time, in seconds
    pub run_durations: RunningStats,
}

impl RunStatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, run: &PipelineRun, invocations: usize) {
        self.subjects += 1;
        if run.is_success() {
            self.succeeded_subjects += 1;
        } else {
            self.failed_subjects += 1;
        }
        self.tool_invocations += invocations as u64;

        for record in &run.stages {
            if record.status == StageStatus::Succeeded {
                if let Some(duration) = record.duration() {
                    self.stage_durations
                        .entry(record.stage_id.to_string())
                        .or_default()
                        .push(duration.num_milliseconds() as f64 / 1000.0);
                }
            }
            if record.status == StageStatus::Failed {
                *self
                    .stage_failures
                    .entry(record.stage_id.to_string())
                    .or_insert(0) += 1;
            }
        }

        if let Some(end) = run.finished_at {
            self.run_durations
                .push((end - run.started_at).num_milliseconds() as f64 / 1000.0);
        }
    }

    pub fn summary(&self) -> RunStatsSummary {
        RunStatsSummary {
            subjects: self.subjects,
            succeeded_subjects: self.succeeded_subjects,
            failed_subjects: self.failed_subjects,
            tool_invocations: self.tool_invocations,
            run_seconds: StatsSummary::from(&self.run_durations),
            stage_seconds: self
                .stage_durations
                .iter()
                .map(|(stage, stats)| (stage.clone(), StatsSummary::from(stats)))
                .collect(),
            stage_failures: self.stage_failures.clone(),
        }
    }
}

/// Batch summary
#[derive(Debug, Clone, Default)]
pub struct RunStatsSummary {
    pub subjects: u64,
    pub succeeded_subjects: u64,
    pub failed_subjects: u64,
    pub tool_invocations: u64,
    pub run_seconds: StatsSummary,
    pub stage_seconds: BTreeMap<String, StatsSummary>,
    pub stage_failures: BTreeMap<String, u64>,
}

impl fmt::Display for RunStatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== Batch Summary ===")?;
        writeln!(
            f,
            "Subjects: {} ({} succeeded, {} failed)",
            self.subjects, self.succeeded_subjects, self.failed_subjects
        )?;
        writeln!(f, "Tool invocations: {}", self.tool_invocations)?;
        writeln!(f, "Run time (s): {}", self.run_seconds)?;

        if !self.stage_seconds.is_empty() {
            writeln!(f, "Stage time (s):")?;
            for (stage, stats) in &self.stage_seconds {
                writeln!(f, "  {stage}: {stats}")?;
            }
        }
        if !self.stage_failures.is_empty() {
            writeln!(f, "Failures:")?;
            for (stage, count) in &self.stage_failures {
                writeln!(f, "  {stage}: {count}")?;
            }
        }
        Ok(())
    }
}

/// Statistics summary
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.2}, max={:.2}, mean={:.2}, std={:.2} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// Online mean and variance (Welford)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// Sample variance
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }
}
