//! Failure-isolated per-file execution.
//!
//! Every file is an independent task. A task that fails or panics yields an
//! error for that file only; siblings keep running and no ordering between
//! files is promised.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, warn};

use crate::analysis::PyModule;
use crate::error::ExtractionError;

/// The per-file task contract shared by every strategy.
pub type FileTask<'a> = dyn Fn(&Path) -> Result<PyModule, ExtractionError> + Sync + 'a;

/// Result of one per-file task.
#[derive(Debug)]
pub struct TaskOutcome {
    pub path: PathBuf,
    pub result: Result<PyModule, ExtractionError>,
}

/// Run `task` on `path`, turning a panic into an [`ExtractionError`].
pub fn run_isolated(task: &FileTask<'_>, path: &Path) -> TaskOutcome {
    let result = match catch_unwind(AssertUnwindSafe(|| task(path))) {
        Ok(result) => result,
        Err(_) => Err(ExtractionError::Panicked {
            path: path.to_path_buf(),
        }),
    };
    TaskOutcome {
        path: path.to_path_buf(),
        result,
    }
}

/// How the per-file map is scheduled.
pub trait ExecutionStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Run `task` once per file. One outcome per input file, in any order.
    fn run(&self, files: &[PathBuf], task: &FileTask<'_>) -> Vec<TaskOutcome>;
}

/// One file after another on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct SequentialStrategy;

impl ExecutionStrategy for SequentialStrategy {
    fn name(&self) -> &'static str {
        "sequential"
    }

    fn run(&self, files: &[PathBuf], task: &FileTask<'_>) -> Vec<TaskOutcome> {
        files.iter().map(|f| run_isolated(task, f)).collect()
    }
}

/// A rayon thread pool; falls back to sequential if the pool cannot start.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolStrategy {
    /// Worker count; 0 lets rayon pick one per core.
    workers: usize,
}

impl ThreadPoolStrategy {
    pub fn new(workers: usize) -> Self {
        Self { workers }
    }
}

impl ExecutionStrategy for ThreadPoolStrategy {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn run(&self, files: &[PathBuf], task: &FileTask<'_>) -> Vec<TaskOutcome> {
        if files.is_empty() {
            return Vec::new();
        }

        let mut builder = rayon::ThreadPoolBuilder::new();
        if self.workers > 0 {
            builder = builder.num_threads(self.workers);
        }

        match builder.build() {
            Ok(pool) => {
                debug!(workers = pool.current_num_threads(), files = files.len(), "dispatching");
                pool.install(|| files.par_iter().map(|f| run_isolated(task, f)).collect())
            }
            Err(e) => {
                warn!("thread pool unavailable, running sequentially: {}", e);
                SequentialStrategy.run(files, task)
            }
        }
    }
}

/// Strategy for a worker count: one worker means sequential.
pub fn strategy_for(workers: usize) -> Box<dyn ExecutionStrategy> {
    if workers == 1 {
        Box::new(SequentialStrategy)
    } else {
        Box::new(ThreadPoolStrategy::new(workers))
    }
}
