//! Bounded dispatch of test invocations.
//!
//! Variant selection stays on the calling thread; only finished snapshots are
//! handed to workers. At most `workers` jobs are in flight at any time: the
//! caller must drain a result before submitting past that bound.

use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::Scope;

/// Runs jobs either inline on the caller's thread or on a fixed set of scoped workers
pub(crate) enum Executor<'env, J, R> {
    Inline {
        work: &'env (dyn Fn(J) -> R + Sync),
        done: VecDeque<R>,
    },
    Pool(WorkerPool<J, R>),
}

impl<'env, J, R> Executor<'env, J, R>
where
    J: Send + 'env,
    R: Send + 'env,
{
    pub(crate) fn inline(work: &'env (dyn Fn(J) -> R + Sync)) -> Self {
        Executor::Inline {
            work,
            done: VecDeque::new(),
        }
    }

    /// Spawn `workers` threads in `scope`; with a single worker, run inline instead
    pub(crate) fn spawn<'scope>(
        scope: &'scope Scope<'scope, 'env>,
        workers: usize,
        work: &'env (dyn Fn(J) -> R + Sync),
    ) -> Self {
        if workers <= 1 {
            return Self::inline(work);
        }
        Executor::Pool(WorkerPool::spawn(scope, workers, work))
    }

    /// Whether another job can be submitted without exceeding the bound
    pub(crate) fn has_capacity(&self) -> bool {
        match self {
            Executor::Inline { .. } => true,
            Executor::Pool(pool) => pool.in_flight < pool.workers,
        }
    }

    pub(crate) fn submit(&mut self, job: J) {
        match self {
            Executor::Inline { work, done } => done.push_back((*work)(job)),
            Executor::Pool(pool) => pool.submit(job),
        }
    }

    /// Results that are already available, without blocking
    pub(crate) fn try_collect(&mut self) -> Vec<R> {
        match self {
            Executor::Inline { done, .. } => done.drain(..).collect(),
            Executor::Pool(pool) => pool.try_collect(),
        }
    }

    /// Block until one result is available; `None` when nothing is in flight
    pub(crate) fn wait_one(&mut self) -> Option<R> {
        match self {
            Executor::Inline { done, .. } => done.pop_front(),
            Executor::Pool(pool) => pool.wait_one(),
        }
    }

    /// Stop accepting jobs and collect every outstanding result
    pub(crate) fn finish(&mut self) -> Vec<R> {
        if let Executor::Pool(pool) = self {
            pool.close();
        }
        let mut results = self.try_collect();
        while let Some(result) = self.wait_one() {
            results.push(result);
        }
        results
    }
}

/// Fixed-size pool of scoped worker threads fed through a shared queue
pub(crate) struct WorkerPool<J, R> {
    jobs: Option<Sender<J>>,
    results: Receiver<R>,
    workers: usize,
    in_flight: usize,
}

impl<J: Send, R: Send> WorkerPool<J, R> {
    fn spawn<'scope, 'env>(
        scope: &'scope Scope<'scope, 'env>,
        workers: usize,
        work: &'env (dyn Fn(J) -> R + Sync),
    ) -> Self
    where
        J: 'env,
        R: 'env,
    {
        let (job_tx, job_rx) = mpsc::channel::<J>();
        let (result_tx, result_rx) = mpsc::channel::<R>();
        let job_rx = Arc::new(Mutex::new(job_rx));

        for worker in 0..workers {
            let job_rx = Arc::clone(&job_rx);
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                log::trace!("Worker {} started", worker);
                loop {
                    let job = match job_rx.lock() {
                        Ok(receiver) => receiver.recv(),
                        Err(_) => break,
                    };
                    let Ok(job) = job else { break };
                    if result_tx.send(work(job)).is_err() {
                        break;
                    }
                }
                log::trace!("Worker {} stopped", worker);
            });
        }

        Self {
            jobs: Some(job_tx),
            results: result_rx,
            workers,
            in_flight: 0,
        }
    }

    fn submit(&mut self, job: J) {
        if let Some(jobs) = &self.jobs {
            if jobs.send(job).is_ok() {
                self.in_flight += 1;
            }
        }
    }

    fn try_collect(&mut self) -> Vec<R> {
        let mut results = Vec::new();
        while let Ok(result) = self.results.try_recv() {
            self.in_flight -= 1;
            results.push(result);
        }
        results
    }

    fn wait_one(&mut self) -> Option<R> {
        if self.in_flight == 0 {
            return None;
        }
        let result = self.results.recv().ok()?;
        self.in_flight -= 1;
        Some(result)
    }

    /// Drop the job queue; workers drain what is queued, then exit
    fn close(&mut self) {
        self.jobs = None;
    }
}

impl<J, R> Drop for WorkerPool<J, R> {
    fn drop(&mut self) {
        self.jobs = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn inline_executor_runs_immediately() {
        let work: &(dyn Fn(u32) -> u32 + Sync) = &|job| job * 2;
        let mut executor = Executor::inline(work);
        executor.submit(3);
        executor.submit(4);
        assert_eq!(executor.try_collect(), vec![6, 8]);
        assert!(executor.finish().is_empty());
    }

    #[test]
    fn pool_never_exceeds_its_worker_count() {
        let running = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let work: &(dyn Fn(u32) -> u32 + Sync) = &|job| {
            let now = running.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(2));
            running.fetch_sub(1, Ordering::SeqCst);
            job
        };

        let mut results = std::thread::scope(|scope| {
            let mut executor = Executor::spawn(scope, 3, work);
            let mut results = Vec::new();
            for job in 0..20 {
                while !executor.has_capacity() {
                    results.extend(executor.wait_one());
                }
                executor.submit(job);
                results.extend(executor.try_collect());
            }
            results.extend(executor.finish());
            results
        });

        results.sort_unstable();
        assert_eq!(results, (0..20).collect::<Vec<_>>());
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
