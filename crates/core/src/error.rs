use std::time::Duration;

/// Result alias that carries the custom [`SignalPipeError`] type.
pub type Result<T> = std::result::Result<T, SignalPipeError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum SignalPipeError {
    /// Free-form message for failures that do not fit a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// A caller handed in data the component cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Fatal setup error. The component refuses to run rather than produce
    /// silently wrong timing.
    #[error("configuration error: {0}")]
    Config(String),
    /// The operating system refused to create a thread.
    #[error("failed to start thread `{name}`: {source}")]
    ThreadStart {
        name: String,
        #[source]
        source: std::io::Error,
    },
    /// A thread did not finish before its stop deadline. The thread has been
    /// detached.
    #[error("thread `{name}` did not stop within {timeout:?}")]
    ThreadTimeout { name: String, timeout: Duration },
    /// A thread terminated by panicking.
    #[error("thread `{name}` panicked")]
    ThreadPanicked { name: String },
    /// `start()` was called on a thread that still owns its runnable.
    #[error("thread `{0}` is already running")]
    AlreadyRunning(String),
    /// A transformer was driven before `transform_enter`.
    #[error("`{0}` has not been entered")]
    NotEntered(String),
    /// A shared resource was poisoned by a panicking holder.
    #[error("{0} has been poisoned")]
    Poisoned(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON (de)serialisation errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Wrapper around FFT processing errors.
    #[error("{0}")]
    Fft(#[from] realfft::FftError),
}

impl SignalPipeError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Creates a configuration error.
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Self::Config(msg.into())
    }
}

impl From<&str> for SignalPipeError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SignalPipeError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
