//! Configuration for the runtime manager.

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;

/// Main configuration structure for the runtime manager.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub engines: EnginesConfig,
    #[serde(default)]
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub settings: SettingsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct EnginesConfig {
    pub ollama: Option<OllamaEngineConfig>,
    pub llama_cpp: Option<LlamaCppEngineConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OllamaEngineConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_ollama_url")]
    pub base_url: String,
    /// Keep-alive sent with load requests ("-1" keeps the model resident).
    #[serde(default = "default_keep_alive")]
    pub keep_alive: String,
}

/// llama.cpp engine configuration.
///
/// The engine runs one supervised llama-server process at a time.
#[derive(Debug, Clone, Deserialize)]
pub struct LlamaCppEngineConfig {
    /// Whether this engine is enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Directory containing .gguf model files.
    pub model_dir: String,
    /// Directory containing the server binary.
    pub binary_dir: String,
    /// Binary name without platform suffix.
    #[serde(default = "default_binary_name")]
    pub binary_name: String,
    /// Engine JSON config file rewritten before every start.
    pub config_path: String,
    /// Flag that passes `config_path` to the binary, for wrappers that read
    /// it. Stock llama-server takes no config file, so this defaults to none.
    #[serde(default)]
    pub config_arg: Option<String>,
    /// Extra arguments inserted BEFORE the standard flags.
    /// Use this for wrapper commands like toolbox.
    #[serde(default)]
    pub server_args: Vec<String>,
    /// Extra arguments appended AFTER the standard flags.
    /// Use this for flags like `["--flash-attn", "on", "--no-mmap"]`
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_engine_host")]
    pub host: String,
    /// Fixed server port. If not set, the OS assigns one.
    #[serde(default)]
    pub port: Option<u16>,
    /// Server startup timeout in seconds (default: 180).
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,
    /// Server graceful shutdown timeout in seconds (default: 5).
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
    /// Forward server output at info level instead of debug.
    #[serde(default)]
    pub log_server_output: bool,
    /// Output lines that mark the server as ready. Empty = ready on spawn.
    #[serde(default = "default_readiness_markers")]
    pub readiness_markers: Vec<String>,
}

/// How much of the machine a model may claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryMode {
    High,
    #[default]
    Medium,
    Low,
}

impl MemoryMode {
    /// Fraction of VRAM and RAM usable for model placement.
    pub fn usable_fraction(&self) -> f64 {
        match self {
            MemoryMode::High => 0.7,
            MemoryMode::Medium => 0.5,
            MemoryMode::Low => 0.4,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct HardwareConfig {
    /// VRAM per GPU in GB. Empty = no GPU.
    #[serde(default)]
    pub gpu_vram_gb: Vec<f64>,
    /// System RAM override in GB. If not set, it is probed.
    #[serde(default)]
    pub ram_gb: Option<f64>,
    #[serde(default)]
    pub memory_mode: MemoryMode,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ToolsConfig {
    /// Base URL of the tool server. If not set, tool calls report "not available".
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SettingsConfig {
    /// Extra generic -> engine-specific setting key mappings.
    /// Example: { "threads" = "cpu_threads" }
    #[serde(default)]
    pub key_map: HashMap<String, String>,
}

// Default values
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    1337
}
fn default_engine_host() -> String {
    "127.0.0.1".to_string()
}
fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_keep_alive() -> String {
    "-1".to_string()
}
fn default_true() -> bool {
    true
}
fn default_binary_name() -> String {
    "llama-server".to_string()
}
fn default_startup_timeout() -> u64 {
    180
}
fn default_shutdown_timeout() -> u64 {
    5
}
pub(crate) fn default_readiness_markers() -> Vec<String> {
    vec![
        "server is listening on".to_string(),
        "server listening on".to_string(),
        "starting the main loop".to_string(),
    ]
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (RUNTIME__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("api.host", default_host())?
            .set_default("api.port", default_port() as i64)?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("RUNTIME")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
