//! Fixed-size pool of single-execution worker threads for independent batch
//! jobs.
//!
//! [`ThreadPool::work`] hands each queued job to the first ready worker and
//! returns once every job has finished. Jobs must not share mutable state;
//! the pool only provides the completion barrier.

use std::{
    fmt, mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    sync::lock_recover,
    thread::{ExecutionMode, Runnable, Thread, ThreadContext, ThreadRegistry},
    Signal,
};

/// Upper bound on how long the dispatcher sleeps before rechecking workers.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Function executed by a job: reads the inputs, writes the outputs and
/// reports success.
pub type JobFn<I, O> = Arc<dyn Fn(&[I], &mut [O]) -> bool + Send + Sync>;

/// One unit of work for the pool.
pub struct Job<I, O> {
    pub function: JobFn<I, O>,
    pub inputs: Vec<I>,
    pub outputs: Vec<O>,
    success: bool,
}

impl<I, O> Job<I, O> {
    pub fn new<F>(function: F, inputs: Vec<I>, outputs: Vec<O>) -> Self
    where
        F: Fn(&[I], &mut [O]) -> bool + Send + Sync + 'static,
    {
        Self::with_shared(Arc::new(function), inputs, outputs)
    }

    /// Creates a job around a function shared with other jobs.
    pub fn with_shared(function: JobFn<I, O>, inputs: Vec<I>, outputs: Vec<O>) -> Self {
        Self {
            function,
            inputs,
            outputs,
            success: false,
        }
    }

    /// Whether the job ran and its function reported success.
    pub fn success(&self) -> bool {
        self.success
    }

    fn execute(&mut self) {
        let function = Arc::clone(&self.function);
        let (inputs, outputs) = (&self.inputs, &mut self.outputs);
        self.success = match panic::catch_unwind(AssertUnwindSafe(|| function(inputs, outputs))) {
            Ok(success) => success,
            Err(_) => {
                tracing::warn!("job function panicked");
                false
            }
        };
    }
}

impl<I, O> fmt::Debug for Job<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .field("success", &self.success)
            .finish()
    }
}

/// Worker readiness. A worker is ready iff it holds no in-flight job.
enum WorkerState<I, O> {
    Ready,
    Assigned(usize, Job<I, O>),
    Running,
    Finished(usize, Job<I, O>),
}

struct PoolWorker<I, O> {
    state: Arc<Mutex<WorkerState<I, O>>>,
    idle: Arc<Signal>,
    current: Option<(usize, Job<I, O>)>,
}

impl<I, O> Runnable for PoolWorker<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn enter(&mut self, _ctx: &ThreadContext) {
        let mut state = lock_recover(&self.state);
        if let WorkerState::Assigned(index, job) = mem::replace(&mut *state, WorkerState::Ready) {
            *state = WorkerState::Running;
            self.current = Some((index, job));
        }
    }

    fn run(&mut self, _ctx: &ThreadContext) {
        if let Some((_, job)) = self.current.as_mut() {
            job.execute();
        }
    }

    fn flush(&mut self, _ctx: &ThreadContext) {
        let mut state = lock_recover(&self.state);
        *state = match self.current.take() {
            Some((index, job)) => WorkerState::Finished(index, job),
            None => WorkerState::Ready,
        };
        drop(state);
        self.idle.release();
    }
}

struct WorkerSlot<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    state: Arc<Mutex<WorkerState<I, O>>>,
    thread: Thread<PoolWorker<I, O>>,
}

impl<I, O> WorkerSlot<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Moves a finished job into `done` and joins the worker thread. Returns
    /// whether the worker is ready for a new job.
    fn collect(&mut self, done: &mut [Option<Job<I, O>>]) -> bool {
        let mut state = lock_recover(&self.state);
        match mem::replace(&mut *state, WorkerState::Ready) {
            WorkerState::Ready => {}
            WorkerState::Finished(index, job) => {
                drop(state);
                done[index] = Some(job);
                if let Err(err) = self.thread.stop() {
                    tracing::warn!(name = %self.thread.name(), error = %err, "worker stop failed");
                }
            }
            busy => {
                *state = busy;
                return false;
            }
        }
        true
    }

    fn dispatch(&mut self, index: usize, job: Job<I, O>) -> Result<(), Job<I, O>> {
        *lock_recover(&self.state) = WorkerState::Assigned(index, job);
        if let Err(err) = self.thread.start() {
            tracing::warn!(index, error = %err, "could not start worker");
            let mut state = lock_recover(&self.state);
            if let WorkerState::Assigned(_, job) = mem::replace(&mut *state, WorkerState::Ready) {
                return Err(job);
            }
        }
        Ok(())
    }
}

/// Pool of `n` workers executing a queue of independent jobs.
pub struct ThreadPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    name: String,
    workers: Vec<WorkerSlot<I, O>>,
    jobs: Vec<Job<I, O>>,
    idle: Arc<Signal>,
    poll_interval: Duration,
}

impl<I, O> ThreadPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a pool with `workers` threads (at least one).
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self::build(name.into(), workers, None)
    }

    /// Like [`ThreadPool::new`] but lists every worker in `registry`.
    pub fn with_registry(
        name: impl Into<String>,
        workers: usize,
        registry: &Arc<ThreadRegistry>,
    ) -> Self {
        Self::build(name.into(), workers, Some(registry))
    }

    fn build(name: String, workers: usize, registry: Option<&Arc<ThreadRegistry>>) -> Self {
        let idle = Arc::new(Signal::auto_reset());
        let workers = (0..workers.max(1))
            .map(|n| {
                let state = Arc::new(Mutex::new(WorkerState::Ready));
                let worker = PoolWorker {
                    state: Arc::clone(&state),
                    idle: Arc::clone(&idle),
                    current: None,
                };
                let mut thread =
                    Thread::new(worker, ExecutionMode::Single).with_name(format!("{name}#{n}"));
                if let Some(registry) = registry {
                    thread = thread.register(registry);
                }
                WorkerSlot { state, thread }
            })
            .collect();

        Self {
            name,
            workers,
            jobs: Vec::new(),
            idle,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval.max(Duration::from_millis(1));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job. Its success flag starts out false.
    pub fn add(&mut self, mut job: Job<I, O>) {
        job.success = false;
        self.jobs.push(job);
    }

    /// Discards all queued (or completed) jobs.
    pub fn clear(&mut self) {
        self.jobs.clear();
    }

    pub fn size(&self) -> usize {
        self.jobs.len()
    }

    pub fn get(&self, index: usize) -> Option<&Job<I, O>> {
        self.jobs.get(index)
    }

    pub fn jobs(&self) -> &[Job<I, O>] {
        &self.jobs
    }

    pub fn take_jobs(&mut self) -> Vec<Job<I, O>> {
        mem::take(&mut self.jobs)
    }

    /// Runs every queued job and blocks until all have finished. Returns true
    /// iff every job succeeded. Jobs stay in the pool in submission order.
    pub fn work(&mut self) -> bool {
        let queue = mem::take(&mut self.jobs);
        let mut done: Vec<Option<Job<I, O>>> = queue.iter().map(|_| None).collect();

        tracing::debug!(pool = %self.name, jobs = queue.len(), workers = self.workers.len(), "dispatching jobs");

        for (index, job) in queue.into_iter().enumerate() {
            let mut job = job;
            loop {
                match self.claim_worker(&mut done) {
                    Some(worker) => match self.workers[worker].dispatch(index, job) {
                        Ok(()) => break,
                        Err(returned) => {
                            job = returned;
                            job.success = false;
                            done[index] = Some(job);
                            break;
                        }
                    },
                    None => {
                        self.idle.wait_timeout(self.poll_interval);
                    }
                }
            }
        }

        while !self.all_ready(&mut done) {
            self.idle.wait_timeout(self.poll_interval);
        }

        self.jobs = done.into_iter().flatten().collect();

        let mut success = true;
        for (index, job) in self.jobs.iter().enumerate() {
            if !job.success {
                tracing::warn!(pool = %self.name, index, "job failed");
                success = false;
            }
        }
        success
    }

    fn claim_worker(&mut self, done: &mut [Option<Job<I, O>>]) -> Option<usize> {
        self.workers
            .iter_mut()
            .position(|worker| worker.collect(done))
    }

    fn all_ready(&mut self, done: &mut [Option<Job<I, O>>]) -> bool {
        let mut ready = true;
        for worker in &mut self.workers {
            ready &= worker.collect(done);
        }
        ready
    }
}

impl<I, O> fmt::Debug for ThreadPool<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.name)
            .field("workers", &self.workers.len())
            .field("jobs", &self.jobs.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::thread::sleep_ms;

    fn square(inputs: &[u64], outputs: &mut [u64]) -> bool {
        sleep_ms(5);
        for (out, value) in outputs.iter_mut().zip(inputs) {
            *out = value * value;
        }
        true
    }

    #[test]
    fn work_waits_for_every_job() {
        let mut pool = ThreadPool::new("square", 3);
        for n in 0..10u64 {
            pool.add(Job::new(square, vec![n, n + 1], vec![0, 0]));
        }

        assert!(pool.work());
        assert_eq!(pool.size(), 10);
        for (n, job) in pool.jobs().iter().enumerate() {
            let n = n as u64;
            assert!(job.success());
            assert_eq!(job.outputs, vec![n * n, (n + 1) * (n + 1)]);
        }
    }

    #[test]
    fn debug_reports_workers_and_jobs() {
        let mut pool: ThreadPool<String, usize> = ThreadPool::new("lengths", 2);
        pool.add(Job::new(
            |inputs: &[String], outputs: &mut [usize]| {
                outputs[0] = inputs[0].len();
                true
            },
            vec!["four".to_string()],
            vec![0],
        ));

        let debug = format!("{pool:?}");
        assert!(debug.contains("lengths"));
        assert!(debug.contains("workers: 2"));
        assert!(debug.contains("jobs: 1"));

        assert!(pool.work());
        assert_eq!(pool.get(0).unwrap().outputs, vec![4]);
    }

    #[test]
    fn failing_job_fails_the_batch() {
        let mut pool = ThreadPool::new("mixed", 2);
        for n in 0..5u32 {
            pool.add(Job::new(move |_: &[u32], _: &mut [u32]| n != 3, vec![], vec![]));
        }

        assert!(!pool.work());
        let failed: Vec<usize> = pool
            .jobs()
            .iter()
            .enumerate()
            .filter(|(_, job)| !job.success())
            .map(|(index, _)| index)
            .collect();
        assert_eq!(failed, vec![3]);
    }

    #[test]
    fn panicking_job_is_recorded_as_failure() {
        let mut pool: ThreadPool<(), ()> = ThreadPool::new("panic", 1);
        pool.add(Job::new(|_, _| panic!("boom"), vec![], vec![]));
        pool.add(Job::new(|_, _| true, vec![], vec![]));

        assert!(!pool.work());
        assert!(!pool.get(0).unwrap().success());
        assert!(pool.get(1).unwrap().success());
    }

    #[test]
    fn copy_job_round_trips_bytes() {
        let payload: Vec<u8> = (0..=255).collect();
        let mut pool = ThreadPool::new("copy", 2);
        pool.add(Job::new(
            |inputs: &[Vec<u8>], outputs: &mut [Vec<u8>]| {
                outputs[0] = inputs[0].clone();
                true
            },
            vec![payload.clone()],
            vec![Vec::new()],
        ));

        assert!(pool.work());
        assert_eq!(pool.get(0).unwrap().outputs[0], payload);
    }

    #[test]
    fn results_do_not_depend_on_worker_count() {
        let run = |workers: usize| {
            let mut pool = ThreadPool::new("independent", workers);
            let shared: JobFn<u64, u64> = Arc::new(square);
            for n in 0..6u64 {
                pool.add(Job::with_shared(Arc::clone(&shared), vec![n], vec![0]));
            }
            assert!(pool.work());
            pool.take_jobs()
                .into_iter()
                .map(|job| job.outputs[0])
                .collect::<Vec<_>>()
        };

        assert_eq!(run(1), run(4));
    }

    #[test]
    fn workers_are_reused_across_batches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut pool = ThreadPool::new("reuse", 2);

        for _ in 0..2 {
            for _ in 0..4 {
                let calls = Arc::clone(&calls);
                pool.add(Job::new(
                    move |_: &[()], _: &mut [()]| {
                        calls.fetch_add(1, Ordering::SeqCst);
                        true
                    },
                    vec![],
                    vec![],
                ));
            }
            assert!(pool.work());
            pool.clear();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(pool.size(), 0);
    }
}
