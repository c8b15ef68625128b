//! Orchestrator configuration.
//!
//! Values come from defaults, a TOML document, or `EDGEGEN_*` environment
//! variables. Invalid environment values fall back to defaults without
//! crashing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `EDGEGEN_TEXT_CACHE_ENTRIES` | 2 | Resident text models |
//! | `EDGEGEN_TEXT_CACHE_MB` | 4096 | Text cache budget (MB) |
//! | `EDGEGEN_DIFFUSION_CACHE_ENTRIES` | 1 | Resident diffusion models |
//! | `EDGEGEN_DIFFUSION_CACHE_MB` | 6144 | Diffusion cache budget (MB) |
//! | `EDGEGEN_TTS_CACHE_ENTRIES` | 1 | Resident speech synthesis models |
//! | `EDGEGEN_TTS_CACHE_MB` | 2048 | Speech synthesis cache budget (MB) |
//! | `EDGEGEN_STT_CACHE_ENTRIES` | 2 | Resident speech recognition models |
//! | `EDGEGEN_STT_CACHE_MB` | 1024 | Speech recognition cache budget (MB) |
//! | `EDGEGEN_CACHE_PRESSURE_MB` | 1024 | Evict while available RAM is below this |
//! | `EDGEGEN_SEQUENTIAL_LOAD` | auto | `auto`, `always` or `never` |
//! | `EDGEGEN_PIPELINE_MIN_AVAILABLE_MB` | 6000 | Sequential pipeline memory guard (MB) |
//! | `EDGEGEN_EVICT_COMPETING` | true | Unload competing families before a load |
//! | `EDGEGEN_N_THREADS` | 0 | Native threads (0 = all cores) |
//! | `EDGEGEN_SHUTDOWN_TIMEOUT` | 30 | Graceful shutdown timeout (secs) |
//! | `EDGEGEN_LOG_FORMAT` | json | `json` or `pretty` |
//! | `EDGEGEN_LOG_LEVEL` | info | Log filter directive |

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::memory::thresholds::{
    CACHE_PRESSURE_MARGIN_MB, LOW_RAM_DEVICE_TOTAL_MB, SEQUENTIAL_LOAD_MIN_AVAILABLE_MB,
    VIDEO_FULL_LOAD_MIN_AVAILABLE_MB,
};
use crate::memory::{MemoryOracle, ModelCacheConfig};
use crate::pipeline::PipelineConfig;
use crate::telemetry::{LogConfig, LogFormat};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Whether diffusion video requests use the sequential pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequentialLoadMode {
    /// Decide per request from current device memory.
    #[default]
    Auto,
    Always,
    Never,
}

impl SequentialLoadMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "always" => Some(Self::Always),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Resolve against current memory. Called once per request.
    pub fn resolve(&self, oracle: &dyn MemoryOracle) -> bool {
        match self {
            Self::Always => true,
            Self::Never => false,
            Self::Auto => {
                oracle.total_mb() < LOW_RAM_DEVICE_TOTAL_MB
                    || oracle.available_mb() < VIDEO_FULL_LOAD_MIN_AVAILABLE_MB
            }
        }
    }
}

/// Full orchestrator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub text_cache: ModelCacheConfig,
    pub diffusion_cache: ModelCacheConfig,
    pub speech_synthesis_cache: ModelCacheConfig,
    pub speech_recognition_cache: ModelCacheConfig,
    pub sequential_load: SequentialLoadMode,
    pub pipeline: PipelineConfig,
    /// Unload memory-heavy models of other families before a request runs.
    pub evict_competing_families: bool,
    /// Native thread count. 0 uses every logical core.
    pub n_threads: u32,
    pub shutdown_timeout_secs: u64,
    pub log: LogConfig,
}

fn cache_config(max_entries: usize, max_memory_mb: u64) -> ModelCacheConfig {
    ModelCacheConfig {
        max_entries,
        max_memory_mb,
        pressure_margin_mb: Some(CACHE_PRESSURE_MARGIN_MB),
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            text_cache: cache_config(2, 4096),
            diffusion_cache: cache_config(1, 6144),
            speech_synthesis_cache: cache_config(1, 2048),
            speech_recognition_cache: cache_config(2, 1024),
            sequential_load: SequentialLoadMode::Auto,
            pipeline: PipelineConfig::default(),
            evict_competing_families: true,
            n_threads: 0,
            shutdown_timeout_secs: 30,
            log: LogConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn resolved_n_threads(&self) -> u32 {
        match self.n_threads {
            0 => num_cpus::get() as u32,
            n => n,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            text_cache_entries: self.text_cache.max_entries,
            text_cache_mb: self.text_cache.max_memory_mb,
            diffusion_cache_entries: self.diffusion_cache.max_entries,
            diffusion_cache_mb: self.diffusion_cache.max_memory_mb,
            speech_synthesis_cache_entries: self.speech_synthesis_cache.max_entries,
            speech_synthesis_cache_mb: self.speech_synthesis_cache.max_memory_mb,
            speech_recognition_cache_entries: self.speech_recognition_cache.max_entries,
            speech_recognition_cache_mb: self.speech_recognition_cache.max_memory_mb,
            sequential_load: self.sequential_load,
            pipeline_min_available_mb: self.pipeline.min_available_mb,
            evict_competing_families: self.evict_competing_families,
            n_threads: self.resolved_n_threads(),
            shutdown_timeout_secs: self.shutdown_timeout_secs,
            log_format: self.log.format,
            log_level: self.log.level.clone(),
        }
    }
}

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub text_cache_entries: usize,
    pub text_cache_mb: u64,
    pub diffusion_cache_entries: usize,
    pub diffusion_cache_mb: u64,
    pub speech_synthesis_cache_entries: usize,
    pub speech_synthesis_cache_mb: u64,
    pub speech_recognition_cache_entries: usize,
    pub speech_recognition_cache_mb: u64,
    pub sequential_load: SequentialLoadMode,
    pub pipeline_min_available_mb: u64,
    pub evict_competing_families: bool,
    pub n_threads: u32,
    pub shutdown_timeout_secs: u64,
    pub log_format: LogFormat,
    pub log_level: String,
}

impl EffectiveConfig {
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

/// Load one family's cache budget. Floors: 1 entry, 64 MB.
fn load_cache_config(prefix: &str, defaults: &ModelCacheConfig, margin: u64) -> ModelCacheConfig {
    let max_entries = parse_usize(&format!("EDGEGEN_{prefix}_CACHE_ENTRIES"), defaults.max_entries);
    let max_memory_mb = parse_u64(&format!("EDGEGEN_{prefix}_CACHE_MB"), defaults.max_memory_mb);
    ModelCacheConfig {
        max_entries: max_entries.max(1),
        max_memory_mb: max_memory_mb.max(64),
        pressure_margin_mb: Some(margin),
    }
}

fn load_log_config(defaults: &LogConfig) -> LogConfig {
    let format = match std::env::var("EDGEGEN_LOG_FORMAT").as_deref() {
        Ok("json") => LogFormat::Json,
        Ok("pretty") => LogFormat::Pretty,
        _ => defaults.format,
    };
    let level = std::env::var("EDGEGEN_LOG_LEVEL")
        .ok()
        .filter(|l| !l.trim().is_empty())
        .unwrap_or_else(|| defaults.level.clone());
    LogConfig { format, level, output_path: defaults.output_path.clone() }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> OrchestratorConfig {
    let defaults = OrchestratorConfig::default();
    let margin = parse_u64("EDGEGEN_CACHE_PRESSURE_MB", CACHE_PRESSURE_MARGIN_MB);

    let sequential_load = std::env::var("EDGEGEN_SEQUENTIAL_LOAD")
        .ok()
        .and_then(|v| SequentialLoadMode::parse(&v))
        .unwrap_or(defaults.sequential_load);
    let min_available_mb =
        parse_u64("EDGEGEN_PIPELINE_MIN_AVAILABLE_MB", SEQUENTIAL_LOAD_MIN_AVAILABLE_MB);
    let shutdown_secs = parse_u64("EDGEGEN_SHUTDOWN_TIMEOUT", defaults.shutdown_timeout_secs);

    OrchestratorConfig {
        text_cache: load_cache_config("TEXT", &defaults.text_cache, margin),
        diffusion_cache: load_cache_config("DIFFUSION", &defaults.diffusion_cache, margin),
        speech_synthesis_cache: load_cache_config("TTS", &defaults.speech_synthesis_cache, margin),
        speech_recognition_cache: load_cache_config(
            "STT",
            &defaults.speech_recognition_cache,
            margin,
        ),
        sequential_load,
        pipeline: PipelineConfig { min_available_mb },
        evict_competing_families: parse_bool(
            "EDGEGEN_EVICT_COMPETING",
            defaults.evict_competing_families,
        ),
        n_threads: parse_u32("EDGEGEN_N_THREADS", defaults.n_threads),
        shutdown_timeout_secs: shutdown_secs.max(1),
        log: load_log_config(&defaults.log),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::FixedMemoryOracle;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        "EDGEGEN_TEXT_CACHE_ENTRIES",
        "EDGEGEN_TEXT_CACHE_MB",
        "EDGEGEN_DIFFUSION_CACHE_ENTRIES",
        "EDGEGEN_DIFFUSION_CACHE_MB",
        "EDGEGEN_TTS_CACHE_ENTRIES",
        "EDGEGEN_TTS_CACHE_MB",
        "EDGEGEN_STT_CACHE_ENTRIES",
        "EDGEGEN_STT_CACHE_MB",
        "EDGEGEN_CACHE_PRESSURE_MB",
        "EDGEGEN_SEQUENTIAL_LOAD",
        "EDGEGEN_PIPELINE_MIN_AVAILABLE_MB",
        "EDGEGEN_EVICT_COMPETING",
        "EDGEGEN_N_THREADS",
        "EDGEGEN_SHUTDOWN_TIMEOUT",
        "EDGEGEN_LOG_FORMAT",
        "EDGEGEN_LOG_LEVEL",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load();
        assert_eq!(cfg, OrchestratorConfig::default());
        assert_eq!(cfg.text_cache.max_entries, 2);
        assert_eq!(cfg.diffusion_cache.max_memory_mb, 6144);
        assert_eq!(cfg.pipeline.min_available_mb, 6000);
        assert_eq!(cfg.sequential_load, SequentialLoadMode::Auto);
        assert!(cfg.evict_competing_families);
        assert_eq!(cfg.shutdown_timeout().as_secs(), 30);
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EDGEGEN_TEXT_CACHE_ENTRIES", "4");
        std::env::set_var("EDGEGEN_DIFFUSION_CACHE_MB", "8192");
        std::env::set_var("EDGEGEN_SEQUENTIAL_LOAD", "Always");
        std::env::set_var("EDGEGEN_EVICT_COMPETING", "false");
        std::env::set_var("EDGEGEN_N_THREADS", "6");
        std::env::set_var("EDGEGEN_LOG_FORMAT", "pretty");
        let cfg = load();
        assert_eq!(cfg.text_cache.max_entries, 4);
        assert_eq!(cfg.diffusion_cache.max_memory_mb, 8192);
        assert_eq!(cfg.sequential_load, SequentialLoadMode::Always);
        assert!(!cfg.evict_competing_families);
        assert_eq!(cfg.resolved_n_threads(), 6);
        assert_eq!(cfg.log.format, LogFormat::Pretty);
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EDGEGEN_TEXT_CACHE_MB", "lots");
        std::env::set_var("EDGEGEN_SEQUENTIAL_LOAD", "sometimes");
        std::env::set_var("EDGEGEN_EVICT_COMPETING", "maybe");
        let cfg = load();
        assert_eq!(cfg.text_cache.max_memory_mb, 4096);
        assert_eq!(cfg.sequential_load, SequentialLoadMode::Auto);
        assert!(cfg.evict_competing_families);
        clear_env_vars();
    }

    #[test]
    fn test_floors_are_applied() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("EDGEGEN_STT_CACHE_ENTRIES", "0");
        std::env::set_var("EDGEGEN_STT_CACHE_MB", "1");
        std::env::set_var("EDGEGEN_SHUTDOWN_TIMEOUT", "0");
        let cfg = load();
        assert_eq!(cfg.speech_recognition_cache.max_entries, 1);
        assert_eq!(cfg.speech_recognition_cache.max_memory_mb, 64);
        assert_eq!(cfg.shutdown_timeout_secs, 1);
        clear_env_vars();
    }

    #[test]
    fn test_toml_overrides_partial_fields() {
        let cfg = OrchestratorConfig::from_toml_str(
            r#"
            sequential_load = "never"
            n_threads = 2

            [diffusion_cache]
            max_entries = 2
            max_memory_mb = 10240

            [pipeline]
            min_available_mb = 7000
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sequential_load, SequentialLoadMode::Never);
        assert_eq!(cfg.diffusion_cache.max_entries, 2);
        assert_eq!(cfg.pipeline.min_available_mb, 7000);
        assert_eq!(cfg.text_cache, OrchestratorConfig::default().text_cache);
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let err = OrchestratorConfig::from_toml_str("sequential_load = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_auto_mode_follows_memory() {
        let roomy = FixedMemoryOracle::new(12_000, 16_000);
        let low_total = FixedMemoryOracle::new(12_000, 6_000);
        let busy = FixedMemoryOracle::new(9_000, 16_000);
        assert!(!SequentialLoadMode::Auto.resolve(&roomy));
        assert!(SequentialLoadMode::Auto.resolve(&low_total));
        assert!(SequentialLoadMode::Auto.resolve(&busy));
        assert!(SequentialLoadMode::Always.resolve(&roomy));
        assert!(!SequentialLoadMode::Never.resolve(&busy));
    }

    #[test]
    fn test_effective_config_serializes() {
        let cfg = OrchestratorConfig { n_threads: 3, ..Default::default() };
        let json = cfg.effective_config().to_json().unwrap();
        assert!(json.contains("\"n_threads\": 3"));
        assert!(json.contains("\"sequential_load\": \"auto\""));
    }
}
