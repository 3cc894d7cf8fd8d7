//! Batch driver - independent subject runs with bounded concurrency

use std::fs;
use std::path::Path;
use std::sync::Arc;

use contracts::{PipelineError, SubjectId, ToolAdapter};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::report::RunReport;
use crate::runner::PipelineRunner;

/// Outcome of one subject in a batch
#[derive(Debug)]
pub struct SubjectOutcome {
    pub subject: SubjectId,
    pub result: Result<RunReport, PipelineError>,
}

impl SubjectOutcome {
    pub fn is_success(&self) -> bool {
        self.result.as_ref().is_ok_and(RunReport::is_success)
    }
}

/// Outcomes of every subject, in submission order
#[derive(Debug, Default)]
pub struct BatchReport {
    pub outcomes: Vec<SubjectOutcome>,
}

impl BatchReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(SubjectOutcome::is_success)
    }

    pub fn reports(&self) -> impl Iterator<Item = &RunReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }
}

/// `sub-*` directories directly below the BIDS root, sorted
pub fn discover_subjects(bids_root: &Path) -> Result<Vec<SubjectId>, PipelineError> {
    let mut subjects = Vec::new();
    for entry in fs::read_dir(bids_root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if name.starts_with("sub-") && name.len() > 4 {
                subjects.push(SubjectId::from(name));
            }
        }
    }
    subjects.sort();
    Ok(subjects)
}

/// Run subjects with at most `jobs` in flight
///
/// Each subject gets its own session; a failing subject never stops the
/// batch. Once the abort signal is raised, subjects not yet started still
/// report every stage as aborted.
pub async fn run_batch<A>(
    runner: Arc<PipelineRunner<A>>,
    subjects: Vec<SubjectId>,
    jobs: usize,
) -> BatchReport
where
    A: ToolAdapter + Sync + 'static,
{
    let jobs = jobs.max(1);
    let total = subjects.len();
    info!(subjects = total, jobs, "Batch started");

    let mut slots: Vec<Option<Result<RunReport, PipelineError>>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    let mut pending = subjects.iter().cloned().enumerate();
    let mut tasks = JoinSet::new();

    loop {
        while tasks.len() < jobs {
            let Some((idx, subject)) = pending.next() else {
                break;
            };
            let runner = Arc::clone(&runner);
            tasks.spawn(async move { (idx, runner.run_subject(subject).await) });
        }

        let Some(joined) = tasks.join_next().await else {
            break;
        };
        let (idx, result) = match joined {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "Subject task did not complete");
                continue;
            }
        };

        let subject = &subjects[idx];
        match &result {
            Ok(report) if report.is_success() => {
                info!(subject = %subject, summary = %report, "Subject finished")
            }
            Ok(report) => warn!(subject = %subject, summary = %report, "Subject failed"),
            Err(e) => error!(subject = %subject, error = %e, "Subject could not run"),
        }
        slots[idx] = Some(result);
    }

    let outcomes = subjects
        .into_iter()
        .zip(slots)
        .map(|(subject, slot)| SubjectOutcome {
            subject,
            result: slot.unwrap_or_else(|| {
                Err(PipelineError::Other("subject task did not complete".into()))
            }),
        })
        .collect();

    let report = BatchReport { outcomes };
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "Batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_discover_subjects() {
        let dir = TempDir::new().unwrap();
        for name in ["sub-002", "sub-001", "derivatives", "sub-"] {
            fs::create_dir(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("sub-003"), b"not a directory").unwrap();
        fs::write(dir.path().join("participants.tsv"), b"participant_id\n").unwrap();

        let subjects = discover_subjects(dir.path()).unwrap();
        assert_eq!(subjects, vec![SubjectId::from("sub-001"), SubjectId::from("sub-002")]);
    }

    #[test]
    fn test_discover_missing_root() {
        let dir = TempDir::new().unwrap();
        let err = discover_subjects(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }
}
