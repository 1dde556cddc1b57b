use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    pool::DEFAULT_POLL_INTERVAL, thread::DEFAULT_REGISTRY_CAPACITY, trigger::TriggerOptions,
    Result, SignalPipeError,
};

/// Top-level configuration structure for the application.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub threads: ThreadConfig,
    pub pool: PoolConfig,
    pub pipeline: PipelineConfig,
    pub trigger: TriggerOptions,
}

impl AppConfig {
    pub fn live_defaults() -> Self {
        Self::default()
    }

    /// Reads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|err| {
            SignalPipeError::config(format!("cannot read {}: {err}", path.display()))
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pool.workers == 0 {
            return Err(SignalPipeError::config("pool needs at least one worker"));
        }
        if self.pipeline.sample_rate <= 0.0 {
            return Err(SignalPipeError::config("sample rate must be positive"));
        }
        if self.pipeline.frame_size < 2 {
            return Err(SignalPipeError::config("frame size must be at least two"));
        }
        Ok(())
    }
}

/// Settings shared by every background thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// How long `stop` waits for a thread. Zero waits forever.
    pub stop_timeout_ms: u64,
    pub registry_capacity: usize,
}

impl ThreadConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            stop_timeout_ms: 2_000,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
}

impl PoolConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
        }
    }
}

/// Framing of the processed signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub sample_rate: f64,
    /// New samples per cycle.
    pub frame_size: usize,
    /// Lookahead samples per cycle.
    pub delta_size: usize,
}

impl PipelineConfig {
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_size as f64 / self.sample_rate.max(f64::MIN_POSITIVE))
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            frame_size: 1024,
            delta_size: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_fall_back_to_defaults() {
        let path = std::env::temp_dir().join(format!(
            "signal-pipe-config-{}.json",
            std::process::id()
        ));
        fs::write(
            &path,
            r#"{ "pool": { "workers": 3 }, "trigger": { "threshold_in": 0.25, "eager": true } }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(config.pool.workers, 3);
        assert_eq!(config.pool.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.trigger.threshold_in, 0.25);
        assert!(config.trigger.eager);
        assert_eq!(config.trigger.sender, "trigger");
        assert_eq!(config.pipeline, PipelineConfig::default());
    }

    #[test]
    fn rejects_invalid_values() {
        let mut config = AppConfig::default();
        config.pool.workers = 0;
        assert!(matches!(config.validate(), Err(SignalPipeError::Config(_))));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = AppConfig::load("/nonexistent/signal-pipe.json").unwrap_err();
        assert!(matches!(err, SignalPipeError::Config(_)));
    }

    #[test]
    fn round_trips_through_json() {
        let config = AppConfig::live_defaults();
        let text = serde_json::to_string(&config).unwrap();
        let parsed: AppConfig = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }
}
