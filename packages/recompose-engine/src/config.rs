use crate::error::ConfigError;
use std::str::FromStr;

/// How the global write observer delivers the flush it schedules after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushMode {
    /// Flush synchronously inside the write. Deterministic; meant for tests and benches.
    Inline,
    /// Hand the flush to a background thread.
    #[default]
    Background,
}

impl FromStr for FlushMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "inline" => Ok(FlushMode::Inline),
            "background" => Ok(FlushMode::Background),
            _ => Err(ConfigError::InvalidFlushMode(s.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineConfig {
    pub flush_mode: FlushMode,
    /// Time handed to every frame. Nothing should depend on it.
    pub frame_time_nanos: u64,
}

impl EngineConfig {
    pub const FLUSH_MODE_ENV: &'static str = "RECOMPOSE_FLUSH_MODE";

    /// Defaults, overridden by `RECOMPOSE_FLUSH_MODE` when it is set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var(Self::FLUSH_MODE_ENV) {
            config.flush_mode = mode.parse()?;
        }
        Ok(config)
    }

    pub fn with_flush_mode(mut self, flush_mode: FlushMode) -> Self {
        self.flush_mode = flush_mode;
        self
    }

    pub fn with_frame_time_nanos(mut self, frame_time_nanos: u64) -> Self {
        self.frame_time_nanos = frame_time_nanos;
        self
    }
}
