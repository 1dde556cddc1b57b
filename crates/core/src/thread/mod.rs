//! Owned OS threads with an `enter/run/flush` lifecycle.
//!
//! A [`Thread`] wraps one [`Runnable`]. `start()` spawns the native thread and
//! returns once the runnable's `enter` hook has completed, so initialisation
//! side effects are visible to the caller. In [`ExecutionMode::Continuous`]
//! the thread loops `run` until `stop()`; in [`ExecutionMode::Single`] it
//! calls `run` exactly once. `flush` runs in both modes.
//!
//! `stop()` is cooperative. It clears the active flag, calls the runnable's
//! terminator so a blocked `run` can return, and waits up to the configured
//! timeout. When the timeout elapses the thread is detached: the join handle
//! is dropped, `stop()` reports [`SignalPipeError::ThreadTimeout`], and the
//! runnable is handed back to the [`Thread`] if the detached thread ever
//! finishes. Threads are never killed.

use std::{
    fmt, io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use serde::Serialize;

use crate::{
    sync::{lock, lock_recover, Signal},
    Result, SignalPipeError,
};

/// Number of threads a registry tracks unless configured otherwise.
pub const DEFAULT_REGISTRY_CAPACITY: usize = 256;

/// Hook that unblocks a `run` stuck in a blocking call. Called from the
/// thread that invokes `stop()`.
pub type Terminator = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// `run` is called exactly once per start.
    Single,
    /// `run` is called in a loop while the thread is active.
    Continuous,
}

/// Work executed by a [`Thread`].
pub trait Runnable: Send + 'static {
    fn enter(&mut self, _ctx: &ThreadContext) {}

    fn run(&mut self, ctx: &ThreadContext);

    fn flush(&mut self, _ctx: &ThreadContext) {}

    /// Returns the hook `stop()` calls to interrupt a blocked `run`.
    fn terminator(&self) -> Option<Terminator> {
        None
    }
}

/// Sleeps the calling thread for `milliseconds`.
pub fn sleep_ms(milliseconds: u64) {
    std::thread::sleep(Duration::from_millis(milliseconds));
}

/// Sleeps the calling thread for `seconds`, rounded to whole milliseconds.
pub fn sleep_s(seconds: f64) {
    sleep_ms((seconds.max(0.0) * 1000.0 + 0.5) as u64);
}

#[derive(Debug, Default, Clone, Copy)]
struct Timing {
    started: Option<Instant>,
    stopped: Option<Instant>,
}

/// State shared between the owning [`Thread`], its native thread and the
/// registry.
#[derive(Debug)]
pub(crate) struct ThreadState {
    name: Mutex<String>,
    active: Mutex<bool>,
    first_cycle: AtomicBool,
    timing: Mutex<Timing>,
}

impl ThreadState {
    fn new(name: String) -> Self {
        Self {
            name: Mutex::new(name),
            active: Mutex::new(false),
            first_cycle: AtomicBool::new(true),
            timing: Mutex::new(Timing::default()),
        }
    }

    fn name(&self) -> String {
        lock_recover(&self.name).clone()
    }

    fn is_active(&self) -> bool {
        *lock_recover(&self.active)
    }

    fn set_active(&self, active: bool) {
        *lock_recover(&self.active) = active;
    }

    fn elapsed(&self) -> Duration {
        let timing = *lock_recover(&self.timing);
        match timing.started {
            Some(started) => timing
                .stopped
                .unwrap_or_else(Instant::now)
                .saturating_duration_since(started),
            None => Duration::ZERO,
        }
    }
}

/// View of the running thread handed to every hook.
#[derive(Debug, Clone)]
pub struct ThreadContext {
    state: Arc<ThreadState>,
}

impl ThreadContext {
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// True until the first `run` after `enter` has returned.
    pub fn is_first_cycle(&self) -> bool {
        self.state.first_cycle.load(Ordering::Acquire)
    }

    pub fn name(&self) -> String {
        self.state.name()
    }
}

/// Handle owning one native thread that executes a [`Runnable`].
pub struct Thread<R: Runnable> {
    state: Arc<ThreadState>,
    mode: ExecutionMode,
    timeout: Option<Duration>,
    slot: Arc<Mutex<Option<R>>>,
    handle: Option<JoinHandle<()>>,
    finished: Arc<Signal>,
    terminator: Option<Terminator>,
    registration: Option<(Arc<ThreadRegistry>, usize)>,
}

impl<R: Runnable> Thread<R> {
    /// Creates an inactive thread that waits forever on `stop()`.
    pub fn new(runnable: R, mode: ExecutionMode) -> Self {
        Self {
            state: Arc::new(ThreadState::new("noname".to_string())),
            mode,
            timeout: None,
            slot: Arc::new(Mutex::new(Some(runnable))),
            handle: None,
            finished: Arc::new(Signal::manual_reset()),
            terminator: None,
            registration: None,
        }
    }

    pub fn with_name(self, name: impl Into<String>) -> Self {
        self.set_name(name);
        self
    }

    /// Bounds how long `stop()` waits. A zero timeout waits forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Lists the thread in `registry` for diagnostics. Ignored once the
    /// registry is full.
    pub fn register(mut self, registry: &Arc<ThreadRegistry>) -> Self {
        if let Some((previous, id)) = self.registration.take() {
            previous.deregister(id);
        }
        self.registration = registry
            .register(&self.state)
            .map(|id| (Arc::clone(registry), id));
        self
    }

    pub fn name(&self) -> String {
        self.state.name()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *lock_recover(&self.state.name) = name.into();
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn is_first_cycle(&self) -> bool {
        self.state.first_cycle.load(Ordering::Acquire)
    }

    /// Whether a native thread has been started and not yet stopped.
    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Time between the last start and the last stop (or now).
    pub fn elapsed(&self) -> Duration {
        self.state.elapsed()
    }

    /// Takes the runnable out of a stopped thread.
    pub fn take_runnable(&mut self) -> Option<R> {
        if self.handle.is_some() {
            return None;
        }
        lock_recover(&self.slot).take()
    }

    /// Spawns the native thread and blocks until `enter` has completed.
    pub fn start(&mut self) -> Result<()> {
        let name = self.name();
        if self.handle.is_some() {
            return Err(SignalPipeError::AlreadyRunning(name));
        }

        self.terminator = lock(&self.slot, "thread runnable")?
            .as_ref()
            .ok_or_else(|| {
                SignalPipeError::msg(format!("thread `{name}` has no runnable to start"))
            })?
            .terminator();

        tracing::info!(
            name = %name,
            single = self.mode == ExecutionMode::Single,
            "start thread"
        );

        let entered = Arc::new(Signal::manual_reset());
        self.finished = Arc::new(Signal::manual_reset());
        *lock_recover(&self.state.timing) = Timing::default();

        let exit = ExitGuard {
            state: Arc::clone(&self.state),
            slot: Arc::clone(&self.slot),
            entered: Arc::clone(&entered),
            finished: Arc::clone(&self.finished),
            runnable: None,
        };
        let mode = self.mode;

        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || thread_main(mode, exit));

        let handle = match spawned {
            Ok(handle) => handle,
            Err(source) => {
                tracing::warn!(name = %name, error = %source, "start() failed");
                return Err(SignalPipeError::ThreadStart { name, source });
            }
        };

        entered.wait();
        lock_recover(&self.state.timing).started = Some(Instant::now());
        self.handle = Some(handle);

        Ok(())
    }

    /// Signals termination and waits for the thread, bounded by the timeout.
    pub fn stop(&mut self) -> Result<()> {
        let name = self.name();
        let Some(handle) = self.handle.take() else {
            tracing::debug!(name = %name, "stop() on a thread that is not running");
            return Ok(());
        };

        tracing::info!(
            name = %name,
            single = self.mode == ExecutionMode::Single,
            "terminate thread"
        );

        if self.mode == ExecutionMode::Continuous {
            self.state.set_active(false);
        }
        if let Some(terminate) = &self.terminator {
            terminate();
        }

        let finished = match self.timeout {
            None => {
                self.finished.wait();
                true
            }
            Some(timeout) => self.finished.wait_timeout(timeout),
        };
        lock_recover(&self.state.timing).stopped = Some(Instant::now());

        if !finished {
            let timeout = self.timeout.unwrap_or_default();
            tracing::warn!(name = %name, ?timeout, "time-out elapsed, detaching thread");
            drop(handle);
            return Err(SignalPipeError::ThreadTimeout { name, timeout });
        }

        if handle.join().is_err() {
            tracing::warn!(name = %name, "thread panicked");
            return Err(SignalPipeError::ThreadPanicked { name });
        }

        tracing::info!(name = %name, elapsed = ?self.elapsed(), "stop thread");
        Ok(())
    }
}

impl<R: Runnable> Drop for Thread<R> {
    fn drop(&mut self) {
        if self.handle.take().is_some() {
            tracing::debug!(name = %self.name(), "dropping running thread, detaching");
            if self.mode == ExecutionMode::Continuous {
                self.state.set_active(false);
            }
            if let Some(terminate) = &self.terminator {
                terminate();
            }
        }
        if let Some((registry, id)) = self.registration.take() {
            registry.deregister(id);
        }
    }
}

impl<R: Runnable> fmt::Debug for Thread<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name())
            .field("mode", &self.mode)
            .field("timeout", &self.timeout)
            .field("active", &self.is_active())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Restores thread state when the native thread exits, including by panic.
struct ExitGuard<R> {
    state: Arc<ThreadState>,
    slot: Arc<Mutex<Option<R>>>,
    entered: Arc<Signal>,
    finished: Arc<Signal>,
    runnable: Option<R>,
}

impl<R> Drop for ExitGuard<R> {
    fn drop(&mut self) {
        self.state.set_active(false);
        if let Some(runnable) = self.runnable.take() {
            *lock_recover(&self.slot) = Some(runnable);
        }
        self.entered.release();
        self.finished.release();
    }
}

fn thread_main<R: Runnable>(mode: ExecutionMode, mut exit: ExitGuard<R>) {
    let Some(runnable) = lock_recover(&exit.slot).take() else {
        return;
    };
    let state = Arc::clone(&exit.state);
    let entered = Arc::clone(&exit.entered);
    let runnable = exit.runnable.insert(runnable);
    let ctx = ThreadContext { state };

    ctx.state.first_cycle.store(true, Ordering::Release);
    runnable.enter(&ctx);
    ctx.state.set_active(true);
    entered.release();

    match mode {
        ExecutionMode::Single => {
            runnable.run(&ctx);
            ctx.state.first_cycle.store(false, Ordering::Release);
        }
        ExecutionMode::Continuous => {
            while ctx.is_active() {
                runnable.run(&ctx);
                ctx.state.first_cycle.store(false, Ordering::Release);
            }
        }
    }

    runnable.flush(&ctx);
}

/// Diagnostic snapshot of one registered thread.
#[derive(Debug, Clone, Serialize)]
pub struct ThreadInfo {
    pub name: String,
    pub active: bool,
    pub elapsed: Duration,
}

/// Bounded table of live threads for introspection.
///
/// Slots are handed out in registration order and never reused; once
/// `capacity` threads have registered, later threads simply run unlisted.
/// Entries hold weak references and are cleared when their thread drops.
#[derive(Debug)]
pub struct ThreadRegistry {
    capacity: usize,
    slots: Mutex<Vec<Option<Weak<ThreadState>>>>,
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_REGISTRY_CAPACITY)
    }
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity,
            slots: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn register(&self, state: &Arc<ThreadState>) -> Option<usize> {
        let mut slots = lock_recover(&self.slots);
        if slots.len() >= self.capacity {
            tracing::debug!(name = %state.name(), "thread registry full");
            return None;
        }
        slots.push(Some(Arc::downgrade(state)));
        Some(slots.len() - 1)
    }

    fn deregister(&self, id: usize) {
        if let Some(slot) = lock_recover(&self.slots).get_mut(id) {
            *slot = None;
        }
    }

    /// Number of registered threads that have not been dropped.
    pub fn len(&self) -> usize {
        lock_recover(&self.slots)
            .iter()
            .filter(|slot| slot.as_ref().is_some_and(|weak| weak.strong_count() > 0))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<ThreadInfo> {
        lock_recover(&self.slots)
            .iter()
            .flatten()
            .filter_map(Weak::upgrade)
            .map(|state| ThreadInfo {
                name: state.name(),
                active: state.is_active(),
                elapsed: state.elapsed(),
            })
            .collect()
    }

    /// Writes a `# running elapsed name` table of all live threads.
    pub fn write_info<W: io::Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "#   running\telapsed\t\tname")?;
        for (index, info) in self.snapshot().iter().enumerate() {
            writeln!(
                out,
                "{index:03} {}\t{:.3}s\t\t{}",
                info.active,
                info.elapsed.as_secs_f64(),
                info.name
            )?;
        }
        Ok(())
    }
}
