//! Batch install queue with a fixed-size worker pool
//!
//! Jobs are deduplicated by id, pushed onto a bounded channel and pulled by
//! N workers. Each job downloads into its own temp dir and extracts to its
//! own destination. A failing job is recorded and the batch carries on.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, info, warn};

use super::progress::{spawn_consumer, ProgressObserver, ProgressSink};
use crate::archive::{extract_archive, ExtractionTarget, Placement};
use crate::downloaders::{download_file, HttpClient};

/// Default number of concurrent workers
pub const DEFAULT_CONCURRENCY: usize = 4;

/// One queued install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    /// Logical identifier used for deduplication (livery name)
    pub id: String,
    pub url: String,
    pub destination: PathBuf,
    pub placement: Placement,
}

/// A job that did not complete
#[derive(Debug, Clone, Serialize)]
pub struct JobFailure {
    pub id: String,
    pub error: String,
}

/// Aggregated result of a batch; independent of completion order
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Jobs submitted, duplicates included
    pub requested: usize,
    pub duplicates_skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub failures: Vec<JobFailure>,
    pub finished_at: DateTime<Utc>,
}

impl BatchReport {
    pub fn executed(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Record failures that never reached a worker (unknown names etc.)
    pub fn record_failure(&mut self, id: impl Into<String>, error: impl Into<String>) {
        self.failed += 1;
        self.failures.push(JobFailure {
            id: id.into(),
            error: error.into(),
        });
    }
}

/// Batch runner settings
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub concurrency: usize,
    /// Where per-job temp dirs are created; system temp when `None`
    pub temp_dir: Option<PathBuf>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            temp_dir: None,
        }
    }
}

/// Drop repeated ids, keeping the first occurrence in order
pub fn dedup_jobs(jobs: Vec<BatchJob>) -> (Vec<BatchJob>, usize) {
    let mut seen = HashSet::new();
    let before = jobs.len();
    let unique: Vec<BatchJob> = jobs
        .into_iter()
        .filter(|job| seen.insert(job.id.clone()))
        .collect();
    let dropped = before - unique.len();
    (unique, dropped)
}

/// Outcome of a single job as seen by its worker
#[derive(Debug)]
enum JobOutcome {
    Succeeded(String),
    Failed(JobFailure),
}

impl JobOutcome {
    fn id(&self) -> &str {
        match self {
            JobOutcome::Succeeded(id) => id,
            JobOutcome::Failed(failure) => &failure.id,
        }
    }
}

/// Fold worker outcomes into `report`.
///
/// Any id in `expected` without an outcome (its worker died or the queue
/// closed before it was handed out) is counted as failed.
fn tally_outcomes(report: &mut BatchReport, expected: &[String], outcomes: Vec<JobOutcome>) {
    let mut reported = HashSet::new();
    for outcome in outcomes {
        reported.insert(outcome.id().to_string());
        match outcome {
            JobOutcome::Succeeded(_) => report.succeeded += 1,
            JobOutcome::Failed(failure) => {
                report.failed += 1;
                report.failures.push(failure);
            }
        }
    }
    for id in expected.iter().filter(|id| !reported.contains(*id)) {
        warn!("No outcome for '{}'", id);
        report.record_failure(id.clone(), "Worker stopped before reporting");
    }
}

/// Shared state for workers
struct WorkerContext {
    client: HttpClient,
    options: BatchOptions,
    sink: ProgressSink,
    started: AtomicUsize,
    total: usize,
}

/// Run every job across a fixed pool of workers.
///
/// Progress from all workers goes through one bounded channel to a single
/// consumer driving `observer`. The observer's `on_complete` fires exactly
/// once, after every worker and the consumer have finished. The observer is
/// handed back along with the report; an error here means the observer
/// itself panicked, never that a job failed.
pub async fn run_batch<O: ProgressObserver>(
    client: &HttpClient,
    jobs: Vec<BatchJob>,
    options: BatchOptions,
    observer: O,
) -> Result<(BatchReport, O)> {
    run_batch_with_rejected(client, jobs, Vec::new(), options, observer).await
}

/// [`run_batch`] with failures decided before any worker ran.
///
/// `rejected` entries count as requested and failed, and are part of the
/// report the observer sees on completion.
pub async fn run_batch_with_rejected<O: ProgressObserver>(
    client: &HttpClient,
    jobs: Vec<BatchJob>,
    rejected: Vec<JobFailure>,
    options: BatchOptions,
    observer: O,
) -> Result<(BatchReport, O)> {
    let requested = jobs.len() + rejected.len();
    let (jobs, duplicates_skipped) = dedup_jobs(jobs);
    if duplicates_skipped > 0 {
        info!("Skipped {} duplicate job(s)", duplicates_skipped);
    }

    let total = jobs.len();
    let ids: Vec<String> = jobs.iter().map(|job| job.id.clone()).collect();
    let concurrency = options.concurrency.max(1).min(total.max(1));
    info!("Starting batch: {} job(s), {} worker(s)", total, concurrency);

    let (sink, consumer) = spawn_consumer(observer);
    let ctx = Arc::new(WorkerContext {
        client: client.clone(),
        options,
        sink,
        started: AtomicUsize::new(0),
        total,
    });

    let (tx, rx) = mpsc::channel::<BatchJob>(total.max(1));
    let rx = Arc::new(Mutex::new(rx));

    let workers: Vec<_> = (1..=concurrency)
        .map(|worker_id| {
            let ctx = Arc::clone(&ctx);
            let rx = Arc::clone(&rx);
            tokio::spawn(async move { worker_loop(worker_id, ctx, rx).await })
        })
        .collect();

    for job in jobs {
        if tx.send(job).await.is_err() {
            // Every worker is gone; nothing left to pull the queue.
            error!("Job queue closed early");
            break;
        }
    }
    drop(tx);

    let mut report = BatchReport {
        requested,
        duplicates_skipped,
        succeeded: 0,
        failed: rejected.len(),
        failures: rejected,
        finished_at: Utc::now(),
    };

    let mut outcomes = Vec::with_capacity(total);
    for worker in workers {
        match worker.await {
            Ok(done) => outcomes.extend(done),
            Err(e) => error!("Batch worker panicked: {}", e),
        }
    }
    tally_outcomes(&mut report, &ids, outcomes);

    // Last sink clone goes away here, which lets the consumer finish.
    drop(ctx);
    let mut observer = consumer.await.context("Progress consumer failed")?;

    report.failures.sort_by(|a, b| a.id.cmp(&b.id));
    report.finished_at = Utc::now();
    info!(
        "Batch complete: {} succeeded, {} failed",
        report.succeeded, report.failed
    );
    observer.on_complete(&report);
    Ok((report, observer))
}

async fn worker_loop(
    worker_id: usize,
    ctx: Arc<WorkerContext>,
    rx: Arc<Mutex<mpsc::Receiver<BatchJob>>>,
) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    loop {
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        let current = ctx.started.fetch_add(1, Ordering::SeqCst) + 1;
        let sink = ctx.sink.for_job(&job.id);
        sink.status(format!("[{}/{}] Installing {}", current, ctx.total, job.id));
        sink.fraction(0.0);

        match run_job(&ctx, &job, &sink).await {
            Ok(()) => outcomes.push(JobOutcome::Succeeded(job.id.clone())),
            Err(e) => {
                warn!("Worker {}: '{}' failed: {:#}", worker_id, job.id, e);
                sink.status(format!("Failed: {}", job.id));
                outcomes.push(JobOutcome::Failed(JobFailure {
                    id: job.id.clone(),
                    error: format!("{:#}", e),
                }));
            }
        }
    }
    outcomes
}

/// Download then extract one job inside its own temp dir
async fn run_job(ctx: &WorkerContext, job: &BatchJob, sink: &ProgressSink) -> Result<()> {
    let temp_dir = make_temp_dir(ctx.options.temp_dir.as_deref())?;
    let archive_path = temp_dir.path().join("livery.zip");

    download_file(&ctx.client, &job.url, &archive_path, false, sink)
        .await
        .with_context(|| format!("Failed to download '{}'", job.id))?;

    let target = ExtractionTarget::new(&archive_path, &job.destination)
        .with_placement(job.placement.clone());
    let extract_sink = sink.clone();
    tokio::task::spawn_blocking(move || extract_archive(&target, &extract_sink))
        .await
        .context("Extraction task failed")?
        .with_context(|| format!("Failed to extract '{}'", job.id))?;

    // temp_dir drops here on success and on every early return above
    Ok(())
}

pub(crate) fn make_temp_dir(base: Option<&Path>) -> Result<tempfile::TempDir> {
    let builder = {
        let mut b = tempfile::Builder::new();
        b.prefix("ag330_");
        b
    };
    match base {
        Some(base) => {
            std::fs::create_dir_all(base)
                .with_context(|| format!("Failed to create {}", base.display()))?;
            builder
                .tempdir_in(base)
                .with_context(|| format!("Failed to create temp directory in {}", base.display()))
        }
        None => builder.tempdir().context("Failed to create temp directory"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(id: &str) -> BatchJob {
        BatchJob {
            id: id.to_string(),
            url: format!("https://files.zohopublic.com.cn/{}", id),
            destination: PathBuf::from("/tmp/liveries"),
            placement: Placement::Direct,
        }
    }

    #[test]
    fn test_dedup_keeps_first_in_order() {
        let (unique, dropped) = dedup_jobs(vec![job("b"), job("a"), job("b"), job("c"), job("a")]);
        let ids: Vec<_> = unique.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert_eq!(dropped, 2);
    }

    #[test]
    fn test_missing_outcomes_count_as_failures() {
        let mut report = BatchReport {
            requested: 3,
            duplicates_skipped: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            finished_at: Utc::now(),
        };
        let ids: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let outcomes = vec![
            JobOutcome::Succeeded("a".into()),
            JobOutcome::Failed(JobFailure {
                id: "b".into(),
                error: "HTTP 404".into(),
            }),
        ];

        tally_outcomes(&mut report, &ids, outcomes);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);
        assert_eq!(report.executed(), 3);
        assert_eq!(report.failures[1].id, "c");
        assert_eq!(report.failures[1].error, "Worker stopped before reporting");
    }

    #[test]
    fn test_record_failure() {
        let mut report = BatchReport {
            requested: 1,
            duplicates_skipped: 0,
            succeeded: 0,
            failed: 0,
            failures: Vec::new(),
            finished_at: Utc::now(),
        };
        report.record_failure("Unknown Livery", "not in catalog");
        assert_eq!(report.failed, 1);
        assert_eq!(report.executed(), 1);
        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("Unknown Livery"));
    }

    #[test]
    fn test_temp_dir_removed_on_drop() {
        let base = tempfile::tempdir().unwrap();
        let path = {
            let temp = make_temp_dir(Some(base.path())).unwrap();
            std::fs::write(temp.path().join("livery.zip"), b"partial").unwrap();
            temp.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_batch_still_completes_once() {
        struct CountComplete(usize);
        impl ProgressObserver for CountComplete {
            fn on_event(&mut self, _event: super::super::progress::ProgressEvent) {}
            fn on_complete(&mut self, _report: &BatchReport) {
                self.0 += 1;
            }
        }

        let client = HttpClient::new(Default::default()).unwrap();
        let (report, observer) =
            run_batch(&client, Vec::new(), BatchOptions::default(), CountComplete(0))
                .await
                .unwrap();
        assert_eq!(report.executed(), 0);
        assert_eq!(observer.0, 1);
    }

    #[tokio::test]
    async fn test_disallowed_hosts_fail_without_stopping_batch() {
        let client = HttpClient::new(Default::default()).unwrap();
        let dest = tempfile::tempdir().unwrap();
        let jobs: Vec<BatchJob> = (1..=3)
            .map(|i| BatchJob {
                id: format!("livery {}", i),
                url: format!("https://evil.example.com/{}.zip", i),
                destination: dest.path().to_path_buf(),
                placement: Placement::Direct,
            })
            .collect();

        let (report, _) = run_batch(
            &client,
            jobs,
            BatchOptions::default(),
            super::super::progress::NullObserver,
        )
        .await
        .unwrap();
        assert_eq!(report.failed, 3);
        assert_eq!(report.succeeded, 0);
        assert!(report.failures[0].error.contains("not allowed"));
    }

    #[tokio::test]
    async fn test_rejected_failures_reach_observer() {
        struct LastReport(Option<BatchReport>);
        impl ProgressObserver for LastReport {
            fn on_event(&mut self, _event: super::super::progress::ProgressEvent) {}
            fn on_complete(&mut self, report: &BatchReport) {
                self.0 = Some(report.clone());
            }
        }

        let client = HttpClient::new(Default::default()).unwrap();
        let rejected = vec![JobFailure {
            id: "Unknown".to_string(),
            error: "not in catalog".to_string(),
        }];
        let (report, observer) = run_batch_with_rejected(
            &client,
            Vec::new(),
            rejected,
            BatchOptions::default(),
            LastReport(None),
        )
        .await
        .unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(report.failed, 1);
        let seen = observer.0.unwrap();
        assert_eq!(seen.failures[0].id, "Unknown");
    }
}
