//! Decoder configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::codec::VideoCodec;
use crate::error::ConfigError;
use crate::types::{CapacityPolicy, IoPattern, PlanarLayout};

/// Environment variable naming a JSON config file for [`DecoderConfig::from_env`].
pub const CONFIG_ENV_VAR: &str = "VDEC_CONFIG";

/// Which codec implementation the runtime session should select.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Implementation {
    /// Hardware if any adapter supports the codec, software otherwise.
    #[default]
    Auto,
    Hardware,
    Software,
}

impl Implementation {
    pub fn as_raw(self) -> i32 {
        match self {
            Self::Auto => 0,
            Self::Software => 1,
            Self::Hardware => 2,
        }
    }
}

/// Codec runtime backend driven by the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeBackend {
    /// Shared runtime library loaded at run time (`None` = platform default name).
    Library { path: Option<PathBuf> },
    /// In-process simulated device.
    Simulated,
}

impl Default for RuntimeBackend {
    fn default() -> Self {
        Self::Library { path: None }
    }
}

/// Decode engine configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub codec: VideoCodec,
    pub implementation: Implementation,
    pub io_pattern: IoPattern,
    /// Upper bound for a single synchronize wait.
    pub sync_timeout_ms: u64,
    /// Pause before resubmitting after the device reports busy.
    pub busy_wait_ms: u64,
    /// `None` retries a busy device forever.
    pub max_busy_retries: Option<u32>,
    /// Surface width/height granularity required by the hardware.
    pub surface_alignment: u32,
    /// Surfaces allocated on top of the runtime's suggestion.
    pub extra_surfaces: u16,
    pub output_layout: PlanarLayout,
    pub output_capacity: CapacityPolicy,
    pub runtime: RuntimeBackend,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            codec: VideoCodec::H265,
            implementation: Implementation::Auto,
            io_pattern: IoPattern::SystemMemory,
            sync_timeout_ms: 60_000,
            busy_wait_ms: 1,
            max_busy_retries: None,
            surface_alignment: 32,
            extra_surfaces: 0,
            output_layout: PlanarLayout::Yv12,
            output_capacity: CapacityPolicy::Amortized,
            runtime: RuntimeBackend::default(),
        }
    }
}

impl DecoderConfig {
    pub fn new(codec: VideoCodec) -> Self {
        Self {
            codec,
            ..Self::default()
        }
    }

    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Load from the file named by `VDEC_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => Self::load(PathBuf::from(path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.surface_alignment == 0 || !self.surface_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "surface_alignment must be a power of two, got {}",
                self.surface_alignment
            )));
        }
        if self.sync_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync_timeout_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
