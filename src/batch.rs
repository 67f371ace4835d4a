//! Worker pool for large-scale repository processing.
//!
//! Files are partitioned into fixed-size batches that workers pull from a
//! shared queue. A failing file is recorded and its siblings carry on. Small
//! repositories skip the pool entirely and run sequentially in-process.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::types::{Chunk, PipelineConfig, SourceFile};

/// Per-file work done inside a batch: chunk, embed and store.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    async fn process_file(&self, file: &SourceFile) -> Result<Vec<Chunk>>;
}

/// Configuration for batch processing.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub files_per_batch: usize,
    /// Upper bound on concurrent workers, further capped by CPU parallelism
    pub max_workers: usize,
    /// Pause between consecutive batches of the same worker
    pub batch_delay: Duration,
    /// Below this many files, processing is sequential
    pub parallel_threshold: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            files_per_batch: 3,
            max_workers: 4,
            batch_delay: Duration::from_millis(1500),
            parallel_threshold: 50,
        }
    }
}

impl From<&PipelineConfig> for BatchConfig {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            files_per_batch: config.files_per_batch,
            max_workers: config.max_workers,
            batch_delay: Duration::from_millis(config.batch_delay_ms),
            parallel_threshold: config.parallel_threshold,
        }
    }
}

/// Files handed to exactly one worker.
#[derive(Debug, Clone)]
pub struct WorkBatch {
    pub batch_index: usize,
    pub files: Vec<SourceFile>,
}

#[derive(Debug, Clone)]
pub struct FileSuccess {
    pub path: String,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone)]
pub struct FileFailure {
    pub path: String,
    pub batch_index: usize,
    pub error: String,
}

/// Run-level options for one `process` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessOptions {
    /// No batch starts after this instant; running batches finish
    pub deadline: Option<Instant>,
}

/// Aggregated result of a pool run, in batch order.
#[derive(Debug, Clone, Default)]
pub struct PoolOutcome {
    pub succeeded: Vec<FileSuccess>,
    pub failed: Vec<FileFailure>,
    /// Paths never started because the deadline passed
    pub skipped: Vec<String>,
    pub batches: usize,
    pub workers: usize,
    pub timed_out: bool,
}

impl PoolOutcome {
    pub fn total_chunks(&self) -> usize {
        self.succeeded.iter().map(|s| s.chunks.len()).sum()
    }
}

struct BatchReport {
    batch_index: usize,
    succeeded: Vec<FileSuccess>,
    failed: Vec<FileFailure>,
}

/// Split files into batches of `files_per_batch`, preserving order.
pub fn partition(files: Vec<SourceFile>, files_per_batch: usize) -> Vec<WorkBatch> {
    let size = files_per_batch.max(1);
    let mut batches = Vec::with_capacity(files.len().div_ceil(size));
    let mut files = files.into_iter().peekable();
    while files.peek().is_some() {
        batches.push(WorkBatch {
            batch_index: batches.len(),
            files: files.by_ref().take(size).collect(),
        });
    }
    batches
}

/// Orchestrates parallel batch processing.
pub struct WorkerPool {
    processor: Arc<dyn FileProcessor>,
    config: BatchConfig,
}

impl WorkerPool {
    pub fn new(processor: Arc<dyn FileProcessor>, config: BatchConfig) -> Self {
        Self { processor, config }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Number of workers used for `file_count` files.
    pub fn worker_count(&self, file_count: usize) -> usize {
        if file_count < self.config.parallel_threshold {
            return 1;
        }
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let batches = file_count.div_ceil(self.config.files_per_batch.max(1));
        self.config.max_workers.min(cpus).min(batches).max(1)
    }

    /// Process every file, isolating failures per file.
    pub async fn process(&self, files: Vec<SourceFile>, options: ProcessOptions) -> PoolOutcome {
        let file_count = files.len();
        let workers = self.worker_count(file_count);
        let batches = partition(files, self.config.files_per_batch);
        let batch_count = batches.len();

        info!(
            files = file_count,
            batches = batch_count,
            workers,
            parallel = file_count >= self.config.parallel_threshold,
            "Starting batch processing"
        );

        let (mut reports, leftover) = if file_count < self.config.parallel_threshold {
            self.run_sequential(batches, options).await
        } else {
            self.run_parallel(batches, workers, options).await
        };

        reports.sort_by_key(|r| r.batch_index);
        let mut outcome = PoolOutcome {
            batches: batch_count,
            workers,
            timed_out: !leftover.is_empty(),
            skipped: leftover
                .into_iter()
                .flat_map(|b| b.files.into_iter().map(|f| f.path))
                .collect(),
            ..Default::default()
        };
        for report in reports {
            outcome.succeeded.extend(report.succeeded);
            outcome.failed.extend(report.failed);
        }

        info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            chunks = outcome.total_chunks(),
            timed_out = outcome.timed_out,
            "Batch processing complete"
        );
        outcome
    }

    async fn run_sequential(
        &self,
        batches: Vec<WorkBatch>,
        options: ProcessOptions,
    ) -> (Vec<BatchReport>, Vec<WorkBatch>) {
        let mut reports = Vec::with_capacity(batches.len());
        let mut pending: VecDeque<WorkBatch> = batches.into();

        while !deadline_passed(options.deadline) {
            let Some(batch) = pending.pop_front() else {
                break;
            };
            reports.push(run_batch(self.processor.as_ref(), 0, batch).await);
        }

        (reports, pending.into())
    }

    async fn run_parallel(
        &self,
        batches: Vec<WorkBatch>,
        workers: usize,
        options: ProcessOptions,
    ) -> (Vec<BatchReport>, Vec<WorkBatch>) {
        let queue = Arc::new(Mutex::new(VecDeque::from(batches)));
        let (tx, mut rx) = mpsc::channel::<BatchReport>(workers * 2);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let processor = Arc::clone(&self.processor);
            let delay = self.config.batch_delay;
            let span = info_span!("worker", worker);

            handles.push(tokio::spawn(
                async move {
                    let mut first = true;
                    loop {
                        if !first && !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        first = false;

                        if deadline_passed(options.deadline) {
                            debug!("Deadline passed, worker stopping");
                            break;
                        }
                        let batch = queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front();
                        let Some(batch) = batch else {
                            break;
                        };

                        let report = run_batch(processor.as_ref(), worker, batch).await;
                        if tx.send(report).await.is_err() {
                            break;
                        }
                    }
                }
                .instrument(span),
            ));
        }
        drop(tx);

        let mut reports = Vec::new();
        while let Some(report) = rx.recv().await {
            reports.push(report);
        }
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "Worker task ended abnormally");
            }
        }

        let leftover = std::mem::take(&mut *queue.lock().unwrap_or_else(PoisonError::into_inner));
        (reports, leftover.into())
    }
}

fn deadline_passed(deadline: Option<Instant>) -> bool {
    deadline.map_or(false, |d| Instant::now() >= d)
}

async fn run_batch(processor: &dyn FileProcessor, worker: usize, batch: WorkBatch) -> BatchReport {
    debug!(
        worker,
        batch_index = batch.batch_index,
        files = batch.files.len(),
        "Processing batch"
    );

    let mut report = BatchReport {
        batch_index: batch.batch_index,
        succeeded: Vec::new(),
        failed: Vec::new(),
    };

    for file in &batch.files {
        let result = AssertUnwindSafe(processor.process_file(file))
            .catch_unwind()
            .await;
        match result {
            Ok(Ok(chunks)) => report.succeeded.push(FileSuccess {
                path: file.path.clone(),
                chunks,
            }),
            Ok(Err(err)) => {
                warn!(path = %file.path, batch_index = batch.batch_index, error = %err, "File processing failed");
                report.failed.push(FileFailure {
                    path: file.path.clone(),
                    batch_index: batch.batch_index,
                    error: format!("{err:#}"),
                });
            }
            Err(_) => {
                warn!(path = %file.path, batch_index = batch.batch_index, "File processing panicked");
                report.failed.push(FileFailure {
                    path: file.path.clone(),
                    batch_index: batch.batch_index,
                    error: "processing panicked".to_string(),
                });
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use anyhow::bail;

    struct FakeProcessor {
        fail: HashSet<String>,
        work: Duration,
        calls: AtomicUsize,
    }

    impl FakeProcessor {
        fn new(fail: &[&str], work: Duration) -> Self {
            Self {
                fail: fail.iter().map(|s| s.to_string()).collect(),
                work,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl FileProcessor for FakeProcessor {
        async fn process_file(&self, file: &SourceFile) -> Result<Vec<Chunk>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            if self.fail.contains(&file.path) {
                bail!("forced failure for {}", file.path);
            }
            Ok(Vec::new())
        }
    }

    fn files(n: usize) -> Vec<SourceFile> {
        (0..n)
            .map(|i| SourceFile::new(format!("src/file_{i}.rs"), format!("fn f{i}() {{}}\n")))
            .collect()
    }

    #[test]
    fn test_partition() {
        let batches = partition(files(120), 3);
        assert_eq!(batches.len(), 40);
        assert!(batches.iter().all(|b| b.files.len() == 3));
        assert_eq!(batches[6].batch_index, 6);
        assert_eq!(batches[6].files[0].path, "src/file_18.rs");

        let uneven = partition(files(7), 3);
        assert_eq!(uneven.len(), 3);
        assert_eq!(uneven[2].files.len(), 1);
        assert!(partition(Vec::new(), 3).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_in_one_batch_is_isolated() {
        // Batch 7 (index 6) holds files 18..=20.
        let processor = Arc::new(FakeProcessor::new(&["src/file_19.rs"], Duration::ZERO));
        let pool = WorkerPool::new(processor.clone(), BatchConfig::default());

        let outcome = pool.process(files(120), ProcessOptions::default()).await;

        assert_eq!(outcome.batches, 40);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].path, "src/file_19.rs");
        assert_eq!(outcome.failed[0].batch_index, 6);
        assert!(outcome.failed[0].error.contains("forced failure"));
        assert_eq!(outcome.succeeded.len(), 119);
        assert!(outcome.skipped.is_empty());
        assert!(!outcome.timed_out);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 120);

        // Results come back in batch order regardless of worker timing.
        assert_eq!(outcome.succeeded[0].path, "src/file_0.rs");
        assert_eq!(outcome.succeeded[118].path, "src/file_119.rs");
    }

    #[tokio::test]
    async fn test_small_input_runs_sequentially() {
        let processor = Arc::new(FakeProcessor::new(&[], Duration::ZERO));
        let pool = WorkerPool::new(processor, BatchConfig::default());

        assert_eq!(pool.worker_count(10), 1);
        let outcome = pool.process(files(10), ProcessOptions::default()).await;
        assert_eq!(outcome.workers, 1);
        assert_eq!(outcome.batches, 4);
        assert_eq!(outcome.succeeded.len(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_lets_running_batch_finish() {
        let processor = Arc::new(FakeProcessor::new(&[], Duration::from_secs(10)));
        let pool = WorkerPool::new(processor, BatchConfig::default());
        let deadline = Instant::now() + Duration::from_secs(45);

        let outcome = pool
            .process(files(9), ProcessOptions { deadline: Some(deadline) })
            .await;

        // Batch 0 ends at 30s, batch 1 starts before the deadline and ends at 60s.
        assert_eq!(outcome.succeeded.len(), 6);
        assert_eq!(outcome.skipped, vec!["src/file_6.rs", "src/file_7.rs", "src/file_8.rs"]);
        assert!(outcome.timed_out);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_delay_between_batches_of_one_worker() {
        let processor = Arc::new(FakeProcessor::new(&[], Duration::ZERO));
        let config = BatchConfig {
            max_workers: 1,
            parallel_threshold: 0,
            ..Default::default()
        };
        let pool = WorkerPool::new(processor, config);
        let start = Instant::now();

        let outcome = pool.process(files(9), ProcessOptions::default()).await;

        assert_eq!(outcome.succeeded.len(), 9);
        assert!(Instant::now() - start >= Duration::from_millis(3000));
    }
}
