use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use volstream_core::frame_budget::Deadline;

/// What happened to one job of [`WorkerPool::run`].
#[derive(Debug)]
pub enum JobOutcome<R, E> {
    Done { output: R, cpu_time: Duration },
    /// Not started because the deadline had passed.
    Expired,
    /// Not started because another job failed first.
    Skipped,
    Failed(E),
    Panicked,
}

impl<R, E> JobOutcome<R, E> {
    pub fn is_done(&self) -> bool {
        matches!(self, JobOutcome::Done { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, JobOutcome::Failed(_) | JobOutcome::Panicked)
    }
}

/// The outcomes of one [`WorkerPool::run`], in job order.
#[derive(Debug)]
pub struct RunReport<R, E> {
    pub outcomes: Vec<JobOutcome<R, E>>,
    /// Index of the job whose failure aborted the run.
    pub first_failure: Option<usize>,
}

/// A fixed set of worker threads that runs independent, individually failable jobs with a deadline.
pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    /// Leaves half of the cores to the render thread and the driver.
    pub fn default_num_threads() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get() / 2)
            .unwrap_or(1)
            .max(1)
    }

    pub fn new(num_threads: Option<usize>) -> Result<Self, ThreadPoolBuildError> {
        let num_threads = num_threads.unwrap_or_else(Self::default_num_threads).max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|i| format!("volstream-fill-{}", i))
            .build()?;
        log::debug!("Started {} fill workers", num_threads);
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `f` over `jobs` and blocks until every job has finished or been turned away.
    ///
    /// A job is not started once `deadline` has passed or once any job of this run has failed; jobs already running
    /// are allowed to finish. Panics inside `f` are caught and reported as [`JobOutcome::Panicked`].
    pub fn run<J, R, E, F>(&self, jobs: Vec<J>, deadline: &Deadline, f: F) -> RunReport<R, E>
    where
        J: Send,
        R: Send,
        E: Send,
        F: Fn(J) -> Result<R, E> + Sync,
    {
        let abort = AtomicBool::new(false);
        let first_failure = Mutex::new(None);

        let outcomes = self.pool.install(|| {
            jobs.into_par_iter()
                .enumerate()
                .map(|(i, job)| {
                    if abort.load(Ordering::Acquire) {
                        return JobOutcome::Skipped;
                    }
                    if deadline.is_expired() {
                        return JobOutcome::Expired;
                    }

                    let start = Instant::now();
                    let outcome = match catch_unwind(AssertUnwindSafe(|| f(job))) {
                        Ok(Ok(output)) => JobOutcome::Done {
                            output,
                            cpu_time: start.elapsed(),
                        },
                        Ok(Err(e)) => JobOutcome::Failed(e),
                        Err(_) => JobOutcome::Panicked,
                    };
                    if outcome.is_failure() {
                        abort.store(true, Ordering::Release);
                        let mut slot = first_failure.lock();
                        // Keep the lowest index so reports do not depend on scheduling.
                        if slot.map_or(true, |j| i < j) {
                            *slot = Some(i);
                        }
                    }
                    outcome
                })
                .collect()
        });

        RunReport {
            outcomes,
            first_failure: first_failure.into_inner(),
        }
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
