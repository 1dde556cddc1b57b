//! Runs a slow [`Transformer`] on a background thread without stalling the
//! real-time caller.
//!
//! Each cycle the caller either hands the new input to an idle worker or, if
//! the worker is still busy, drops it. Either way it immediately receives the
//! most recently completed output. The first cycle after `transform_enter`
//! yields zeros because nothing can have been computed yet.

use std::{
    mem,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex},
    time::Duration,
};

use serde::Serialize;

use crate::{
    component::{FrameInfo, Transformer},
    sync::{lock, lock_recover},
    thread::{ExecutionMode, Runnable, Terminator, Thread, ThreadContext, ThreadRegistry},
    Result, Signal, SignalPipeError, Stream, StreamShape,
};

/// Cycle counters of an [`Asynchronous`] adapter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AsyncStats {
    /// Inputs handed to the worker.
    pub handed_off: u64,
    /// Inputs dropped because the worker was busy.
    pub dropped: u64,
    /// Results published to the caller.
    pub completed: u64,
    /// Wrapped transforms that returned an error or panicked.
    pub failed: u64,
}

struct AsyncJob {
    info: FrameInfo,
    input: Stream,
    extra: Vec<Stream>,
}

impl AsyncJob {
    fn fill(&mut self, info: &FrameInfo, input: &Stream, extra: &[Stream]) {
        self.info = *info;
        self.input.copy_from(input);
        self.extra.truncate(extra.len());
        for (index, source) in extra.iter().enumerate() {
            match self.extra.get_mut(index) {
                Some(target) => target.copy_from(source),
                None => self.extra.push(source.clone()),
            }
        }
    }
}

/// `Ready` means the worker is idle and `output` holds the last complete
/// result.
enum Slot {
    Ready,
    Pending(AsyncJob),
    Busy,
}

struct AsyncState {
    slot: Slot,
    stop: bool,
    output: Stream,
    spare: Option<AsyncJob>,
    stats: AsyncStats,
}

impl AsyncState {
    fn new(output: StreamShape) -> Self {
        Self {
            slot: Slot::Ready,
            stop: false,
            output: Stream::new(output),
            spare: None,
            stats: AsyncStats::default(),
        }
    }
}

struct AsyncShared {
    state: Mutex<AsyncState>,
    wake: Signal,
}

struct AsyncWorker<T> {
    transformer: T,
    shared: Arc<AsyncShared>,
    scratch: Stream,
}

impl<T: Transformer + 'static> Runnable for AsyncWorker<T> {
    fn run(&mut self, _ctx: &ThreadContext) {
        if lock_recover(&self.shared.state).stop {
            return;
        }

        self.shared.wake.wait();

        let job = {
            let mut state = lock_recover(&self.shared.state);
            if state.stop {
                return;
            }
            match mem::replace(&mut state.slot, Slot::Busy) {
                Slot::Pending(job) => {
                    if self.scratch.num() != state.output.num()
                        || self.scratch.shape() != state.output.shape()
                    {
                        self.scratch.copy_from(&state.output);
                    }
                    job
                }
                other => {
                    state.slot = other;
                    return;
                }
            }
        };

        let (transformer, scratch) = (&mut self.transformer, &mut self.scratch);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            transformer.transform(&job.info, &job.input, scratch, &job.extra)
        }));

        let mut state = lock_recover(&self.shared.state);
        match result {
            Ok(Ok(())) => {
                state.output.copy_from(&self.scratch);
                state.stats.completed += 1;
            }
            Ok(Err(err)) => {
                tracing::warn!(
                    transformer = %self.transformer.name(),
                    error = %err,
                    "asynchronous transform failed"
                );
                state.stats.failed += 1;
            }
            Err(_) => {
                tracing::warn!(
                    transformer = %self.transformer.name(),
                    "asynchronous transform panicked"
                );
                state.stats.failed += 1;
            }
        }
        state.spare = Some(job);
        state.slot = Slot::Ready;
    }

    fn terminator(&self) -> Option<Terminator> {
        let shared = Arc::clone(&self.shared);
        Some(Arc::new(move || {
            lock_recover(&shared.state).stop = true;
            shared.wake.release();
        }))
    }
}

/// Wraps a transformer so that it runs on a dedicated background thread.
pub struct Asynchronous<T: Transformer + 'static> {
    name: String,
    idle: Option<T>,
    thread: Option<Thread<AsyncWorker<T>>>,
    shared: Arc<AsyncShared>,
    first_call: bool,
    timeout: Duration,
    registry: Option<Arc<ThreadRegistry>>,
}

impl<T: Transformer + 'static> Asynchronous<T> {
    pub fn new(transformer: T) -> Self {
        let name = format!("async:{}", transformer.name());
        let placeholder = StreamShape::new(1, crate::SampleType::Float, 0.0);
        Self {
            name,
            idle: Some(transformer),
            thread: None,
            shared: Arc::new(AsyncShared {
                state: Mutex::new(AsyncState::new(placeholder)),
                wake: Signal::auto_reset(),
            }),
            first_call: false,
            timeout: Duration::ZERO,
            registry: None,
        }
    }

    /// Bounds how long `transform_flush` waits for the worker. Zero waits
    /// forever.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_registry(mut self, registry: &Arc<ThreadRegistry>) -> Self {
        self.registry = Some(Arc::clone(registry));
        self
    }

    /// The wrapped transformer while the adapter is not entered.
    pub fn inner(&self) -> Option<&T> {
        self.idle.as_ref()
    }

    pub fn into_inner(mut self) -> Option<T> {
        self.idle.take()
    }

    pub fn is_entered(&self) -> bool {
        self.thread.is_some()
    }

    pub fn stats(&self) -> AsyncStats {
        lock_recover(&self.shared.state).stats
    }
}

impl<T: Transformer + 'static> Transformer for Asynchronous<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn transform_enter(
        &mut self,
        input: &StreamShape,
        output: &StreamShape,
        extra: &[StreamShape],
    ) -> Result<()> {
        let mut transformer = self
            .idle
            .take()
            .ok_or_else(|| SignalPipeError::AlreadyRunning(self.name.clone()))?;

        if let Err(err) = transformer.transform_enter(input, output, extra) {
            self.idle = Some(transformer);
            return Err(err);
        }

        self.shared = Arc::new(AsyncShared {
            state: Mutex::new(AsyncState::new(*output)),
            wake: Signal::auto_reset(),
        });
        self.first_call = true;

        let worker = AsyncWorker {
            transformer,
            shared: Arc::clone(&self.shared),
            scratch: Stream::new(*output),
        };
        let mut thread = Thread::new(worker, ExecutionMode::Continuous)
            .with_name(self.name.clone())
            .with_timeout(self.timeout);
        if let Some(registry) = &self.registry {
            thread = thread.register(registry);
        }

        if let Err(err) = thread.start() {
            self.idle = thread.take_runnable().map(|worker| worker.transformer);
            return Err(err);
        }
        self.thread = Some(thread);

        Ok(())
    }

    fn transform(
        &mut self,
        info: &FrameInfo,
        input: &Stream,
        output: &mut Stream,
        extra: &[Stream],
    ) -> Result<()> {
        if self.thread.is_none() {
            return Err(SignalPipeError::NotEntered(self.name.clone()));
        }

        let mut state = lock(&self.shared.state, "asynchronous state")?;

        if self.first_call {
            state.output = Stream::zeroed(output.shape(), output.num());
            self.first_call = false;
        }

        if matches!(state.slot, Slot::Ready) {
            let mut job = state.spare.take().unwrap_or_else(|| AsyncJob {
                info: *info,
                input: Stream::new(input.shape()),
                extra: Vec::with_capacity(extra.len()),
            });
            job.fill(info, input, extra);
            state.slot = Slot::Pending(job);
            state.stats.handed_off += 1;
            self.shared.wake.release();
        } else {
            state.stats.dropped += 1;
            tracing::debug!(name = %self.name, time = info.time, "worker busy, input dropped");
        }

        output.copy_from(&state.output);
        Ok(())
    }

    fn transform_flush(&mut self) -> Result<()> {
        let mut thread = self
            .thread
            .take()
            .ok_or_else(|| SignalPipeError::NotEntered(self.name.clone()))?;

        // A panicked worker still hands its runnable back; a detached one does not.
        let stopped = thread.stop();
        let Some(worker) = thread.take_runnable() else {
            stopped?;
            return Err(SignalPipeError::msg(format!("`{}` lost its worker", self.name)));
        };

        let mut transformer = worker.transformer;
        let result = transformer.transform_flush();
        self.idle = Some(transformer);

        let mut state = lock_recover(&self.shared.state);
        let shape = state.output.shape();
        state.output = Stream::new(shape);
        state.spare = None;
        state.slot = Slot::Ready;
        drop(state);

        stopped?;
        result
    }
}
