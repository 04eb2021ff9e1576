use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub interpreter: InterpreterConfig,

    #[serde(default)]
    pub explainer: ExplainerConfig,

    #[serde(default)]
    pub events_out: EventsOutConfig,

    #[serde(default)]
    pub http_server: HttpServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Wall-clock budget of a single job.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Delay before rebuilding a discarded interpreter.
    #[serde(default = "default_reinit_delay_ms")]
    pub reinit_delay_ms: u64,

    /// Cap for the doubling retry delay after repeated boot failures.
    #[serde(default = "default_max_reinit_delay_ms")]
    pub max_reinit_delay_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_reinit_delay_ms() -> u64 {
    100
}

fn default_max_reinit_delay_ms() -> u64 {
    5_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            reinit_delay_ms: default_reinit_delay_ms(),
            max_reinit_delay_ms: default_max_reinit_delay_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Delay before the `failures`-th consecutive rebuild attempt (0-based).
    pub fn reinit_delay(&self, failures: u32) -> Duration {
        let factor = 1u64 << failures.min(16);
        let ms = self
            .reinit_delay_ms
            .saturating_mul(factor)
            .min(self.max_reinit_delay_ms.max(self.reinit_delay_ms));
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpreterConfig {
    #[serde(default = "default_python_bin")]
    pub python_bin: String,

    /// Run with `-I` and a cleared environment.
    #[serde(default = "default_isolated")]
    pub isolated: bool,

    #[serde(default = "default_init_timeout_ms")]
    pub init_timeout_ms: u64,

    /// Working directory of the interpreter process; a temp dir when unset.
    #[serde(default)]
    pub workdir: Option<String>,

    /// Extra environment passed to the interpreter.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_python_bin() -> String {
    "python3".to_string()
}

fn default_isolated() -> bool {
    true
}

fn default_init_timeout_ms() -> u64 {
    15_000
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            python_bin: default_python_bin(),
            isolated: default_isolated(),
            init_timeout_ms: default_init_timeout_ms(),
            workdir: None,
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_explainer_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_explainer_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_explainer_endpoint() -> String {
    "http://127.0.0.1:3000/api/debug".to_string()
}

fn default_explainer_timeout_ms() -> u64 {
    20_000
}

impl Default for ExplainerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_explainer_endpoint(),
            api_key: String::new(),
            timeout_ms: default_explainer_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsOutConfig {
    #[serde(default)]
    pub enabled: bool,

    /// File path, or `stdout:`.
    #[serde(default)]
    pub path: String,

    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub drop_when_full: bool,
}

fn default_channel_capacity() -> usize {
    2048
}

impl Default for EventsOutConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: String::new(),
            channel_capacity: default_channel_capacity(),
            drop_when_full: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpServerConfig {
    #[serde(default = "default_http_host")]
    pub host: String,

    #[serde(default = "default_http_port")]
    pub port: u16,

    /// Finished jobs kept around for `GET /api/v1/jobs/{id}`.
    #[serde(default = "default_retained_jobs")]
    pub retained_jobs: usize,
}

fn default_http_host() -> String {
    "127.0.0.1".to_string()
}

fn default_http_port() -> u16 {
    8080
}

fn default_retained_jobs() -> usize {
    1_000
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_http_host(),
            port: default_http_port(),
            retained_jobs: default_retained_jobs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Also write logs to a daily rolling file in `directory`.
    #[serde(default)]
    pub file: bool,

    #[serde(default = "default_log_directory")]
    pub directory: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "~/.codebox/logs".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
            directory: default_log_directory(),
        }
    }
}
