//! Core library of signal-pipe.
//!
//! The crate provides the concurrency building blocks of a real-time signal
//! pipeline together with the components they drive. [`Thread`] wraps an OS
//! thread around a [`Runnable`], [`ThreadPool`] runs batches of jobs to a
//! completion barrier and [`Asynchronous`] moves a slow [`Transformer`] off
//! the caller's thread. [`TriggerEventSender`] turns threshold crossings of a
//! [`Stream`] into timed [`Event`]s.

pub mod asynchronous;
pub mod component;
pub mod config;
pub mod error;
pub mod event;
pub mod pool;
pub mod spectrum;
pub mod stream;
pub mod sync;
pub mod thread;
pub mod trigger;

pub use asynchronous::{AsyncStats, Asynchronous};
pub use component::{Consumer, FrameInfo, Transformer};
pub use config::{AppConfig, PipelineConfig, PoolConfig, ThreadConfig};
pub use error::{Result, SignalPipeError};
pub use event::{
    Event, EventCollector, EventListener, EventPayload, EventState, JsonLinesListener, UniqueIds,
};
pub use pool::{Job, JobFn, ThreadPool};
pub use spectrum::{SpectralFeatures, SpectralFrame, SpectralSummary};
pub use stream::{SampleType, Stream, StreamShape};
pub use sync::Signal;
pub use thread::{
    sleep_ms, sleep_s, ExecutionMode, Runnable, Terminator, Thread, ThreadContext, ThreadInfo,
    ThreadRegistry,
};
pub use trigger::{PayloadKind, TriggerEventSender, TriggerKind, TriggerOptions};
