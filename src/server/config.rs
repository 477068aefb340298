//! Embedding Server Configuration
//!
//! Built from defaults, an optional TOML file and environment overrides,
//! in that order. The resulting struct is handed to the service
//! explicitly; nothing reads the environment after startup.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::models::{EmbeddingError, EmbeddingResult};

/// Environment variable naming an optional TOML config file
pub const CONFIG_PATH_ENV: &str = "EMBED_CONFIG";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub network: NetworkConfig,
    pub embedding: EmbeddingConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model identifier, echoed when a request carries no label
    pub model_id: String,
    /// Local directory produced by the model provisioner
    pub model_dir: PathBuf,
    /// Hub cache directory, created at startup
    pub cache_dir: PathBuf,
    /// Maximum texts per engine call
    pub batch_size: usize,
    /// `auto`, `cpu`, `cuda`, `cuda:N`, `coreml` or `mps`
    pub device: String,
    pub max_sequence_length: usize,
    /// `mean` or `cls`
    pub pooling: String,
    /// Open the listener before the model finishes loading
    pub background_load: bool,
    pub num_threads: usize,
    /// Path to the ONNX Runtime shared library, if not on the default search path
    pub onnx_runtime_path: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "BAAI/bge-m3".to_string(),
            model_dir: PathBuf::from("models/bge-m3"),
            cache_dir: PathBuf::from("hf_cache"),
            batch_size: 32,
            device: "auto".to_string(),
            max_sequence_length: 512,
            pooling: "mean".to_string(),
            background_load: true,
            num_threads: 4,
            onnx_runtime_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Compute device selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Try an accelerator, fall back to CPU
    Auto,
    Cpu,
    Cuda(i32),
    CoreMl,
}

impl FromStr for Device {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        match lowered.as_str() {
            "auto" | "" => Ok(Device::Auto),
            "cpu" => Ok(Device::Cpu),
            "cuda" | "gpu" => Ok(Device::Cuda(0)),
            "coreml" | "mps" => Ok(Device::CoreMl),
            other => match other.strip_prefix("cuda:").map(str::parse::<i32>) {
                Some(Ok(id)) if id >= 0 => Ok(Device::Cuda(id)),
                _ => Err(EmbeddingError::ConfigError {
                    message: format!("unknown device '{}'", s),
                }),
            },
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Auto => write!(f, "auto"),
            Device::Cpu => write!(f, "cpu"),
            Device::Cuda(id) => write!(f, "cuda:{}", id),
            Device::CoreMl => write!(f, "coreml"),
        }
    }
}

/// Reduction of per-token states to one vector per text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    /// Average over non-padding positions
    Mean,
    /// First token
    Cls,
}

impl FromStr for PoolingMode {
    type Err = EmbeddingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mean" => Ok(PoolingMode::Mean),
            "cls" => Ok(PoolingMode::Cls),
            _ => Err(EmbeddingError::ConfigError {
                message: format!("unknown pooling mode '{}'", s),
            }),
        }
    }
}

impl ServerConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> EmbeddingResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> EmbeddingResult<Self> {
        let config: ServerConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Defaults, then the file named by `EMBED_CONFIG`, then the environment
    pub fn load() -> EmbeddingResult<Self> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay environment-style settings read through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> EmbeddingResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("MODEL_ID") {
            self.embedding.model_id = v;
        }
        if let Some(v) = get("BGE_M3_DIR").or_else(|| get("MODEL_DIR")) {
            self.embedding.model_dir = PathBuf::from(v);
        }
        if let Some(v) = get("HF_HOME") {
            self.embedding.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = get("EMBED_HOST") {
            self.network.host = v;
        }
        if let Some(v) = get("EMBED_PORT") {
            self.network.port = parse_number("EMBED_PORT", &v)?;
        }
        if let Some(v) = get("EMBED_BATCH_SIZE") {
            self.embedding.batch_size = parse_number("EMBED_BATCH_SIZE", &v)?;
        }
        if let Some(v) = get("EMBED_DEVICE") {
            self.embedding.device = v;
        }
        if let Some(v) = get("EMBED_MAX_SEQ_LEN") {
            self.embedding.max_sequence_length = parse_number("EMBED_MAX_SEQ_LEN", &v)?;
        }
        if let Some(v) = get("EMBED_POOLING") {
            self.embedding.pooling = v;
        }
        if let Some(v) = get("EMBED_BACKGROUND_LOAD") {
            self.embedding.background_load = parse_bool("EMBED_BACKGROUND_LOAD", &v)?;
        }
        if let Some(v) = get("EMBED_NUM_THREADS") {
            self.embedding.num_threads = parse_number("EMBED_NUM_THREADS", &v)?;
        }
        if let Some(v) = get("ORT_DYLIB_PATH") {
            self.embedding.onnx_runtime_path = Some(v);
        }
        if let Some(v) = get("LOG_LEVEL") {
            self.monitoring.log_level = v;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> EmbeddingResult<()> {
        if self.embedding.batch_size == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "batch_size must be at least 1".to_string(),
            });
        }
        if self.embedding.num_threads == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "num_threads must be at least 1".to_string(),
            });
        }
        if self.embedding.max_sequence_length == 0 {
            return Err(EmbeddingError::ConfigError {
                message: "max_sequence_length must be at least 1".to_string(),
            });
        }
        self.device()?;
        self.pooling()?;
        self.bind_address()?;
        Ok(())
    }

    pub fn device(&self) -> EmbeddingResult<Device> {
        self.embedding.device.parse()
    }

    pub fn pooling(&self) -> EmbeddingResult<PoolingMode> {
        self.embedding.pooling.parse()
    }

    /// Listen address. Host names such as `localhost` are resolved and the
    /// first address wins.
    pub fn bind_address(&self) -> EmbeddingResult<SocketAddr> {
        let invalid = || EmbeddingError::ConfigError {
            message: format!("invalid bind host '{}'", self.network.host),
        };
        (self.network.host.as_str(), self.network.port)
            .to_socket_addrs()
            .map_err(|_| invalid())?
            .next()
            .ok_or_else(invalid)
    }

    /// `RUST_LOG`-style filter derived from the configured level
    pub fn log_filter(&self) -> String {
        match self.monitoring.log_level.to_lowercase().as_str() {
            "trace" => "embedding_service=trace,info".to_string(),
            "debug" => "embedding_service=debug,info".to_string(),
            "warn" => "embedding_service=warn,warn".to_string(),
            "error" => "embedding_service=error,error".to_string(),
            _ => "embedding_service=info,info".to_string(),
        }
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> EmbeddingResult<T> {
    value.trim().parse().map_err(|_| EmbeddingError::ConfigError {
        message: format!("{} must be a non-negative integer, got '{}'", key, value),
    })
}

fn parse_bool(key: &str, value: &str) -> EmbeddingResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(EmbeddingError::ConfigError {
            message: format!("{} must be a boolean, got '{}'", key, value),
        }),
    }
}
