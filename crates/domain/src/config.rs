//! Configuration tree, loaded from an optional `config.toml` at startup.
//! Every section is `#[serde(default)]` so a missing or partial file still
//! produces a usable config — the same pattern as the rest of this
//! codebase's config sections.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

// ── Server ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: d_port(), host: d_host(), cors: CorsConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    /// Flat allow-list of web origins this service serves. Not
    /// security-critical; for LAN dev use only.
    #[serde(default = "d_cors_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self { allowed_origins: d_cors_origins() }
    }
}

fn d_port() -> u16 {
    8000
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_cors_origins() -> Vec<String> {
    vec!["http://localhost:5173".into(), "http://127.0.0.1:5173".into()]
}

// ── Storage ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory `.pageindex-web/` (jobs/chats/uploads) is created under.
    #[serde(default = "d_dot")]
    pub root: PathBuf,
    /// Directory the external indexer is invoked in; also where its
    /// `logs/` and `results/` directories live.
    #[serde(default = "d_dot")]
    pub repo_root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: d_dot(), repo_root: d_dot() }
    }
}

fn d_dot() -> PathBuf {
    PathBuf::from(".")
}

// ── Indexer (external executable) ────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Program + leading args, e.g. `["python3", "run_pageindex.py"]`.
    /// A native indexer may be substituted by changing this list; the
    /// supervisor only cares about the stdout/stderr/log-file/exit-code
    /// contract described above.
    #[serde(default = "d_command")]
    pub command: Vec<String>,
    #[serde(default = "d_log_poll_interval_ms")]
    pub log_poll_interval_ms: u64,
    #[serde(default = "d_log_detect_timeout_ms")]
    pub log_detect_timeout_ms: u64,
    #[serde(default = "d_log_detect_post_exit_polls")]
    pub log_detect_post_exit_polls: u32,
    #[serde(default = "d_log_detect_post_exit_interval_ms")]
    pub log_detect_post_exit_interval_ms: u64,
    #[serde(default = "d_log_consumer_post_exit_polls")]
    pub log_consumer_post_exit_polls: u32,
    #[serde(default = "d_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            command: d_command(),
            log_poll_interval_ms: d_log_poll_interval_ms(),
            log_detect_timeout_ms: d_log_detect_timeout_ms(),
            log_detect_post_exit_polls: d_log_detect_post_exit_polls(),
            log_detect_post_exit_interval_ms: d_log_detect_post_exit_interval_ms(),
            log_consumer_post_exit_polls: d_log_consumer_post_exit_polls(),
            cancel_grace_ms: d_cancel_grace_ms(),
        }
    }
}

fn d_command() -> Vec<String> {
    vec!["python3".into(), "run_pageindex.py".into()]
}
fn d_log_poll_interval_ms() -> u64 {
    500
}
fn d_log_detect_timeout_ms() -> u64 {
    20_000
}
fn d_log_detect_post_exit_polls() -> u32 {
    2
}
fn d_log_detect_post_exit_interval_ms() -> u64 {
    400
}
fn d_log_consumer_post_exit_polls() -> u32 {
    4
}
fn d_cancel_grace_ms() -> u64 {
    6_000
}

// ── Chat retrieval ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "d_default_model")]
    pub default_model: String,
    #[serde(default = "d_max_context_nodes")]
    pub max_context_nodes: usize,
    #[serde(default = "d_max_node_chars")]
    pub max_node_chars: usize,
    #[serde(default = "d_max_total_context_chars")]
    pub max_total_context_chars: usize,
    #[serde(default = "d_history_window")]
    pub history_window: usize,
    #[serde(default = "d_max_selected_nodes")]
    pub max_selected_nodes: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            default_model: d_default_model(),
            max_context_nodes: d_max_context_nodes(),
            max_node_chars: d_max_node_chars(),
            max_total_context_chars: d_max_total_context_chars(),
            history_window: d_history_window(),
            max_selected_nodes: d_max_selected_nodes(),
        }
    }
}

fn d_default_model() -> String {
    "gpt-4.1".into()
}
fn d_max_context_nodes() -> usize {
    6
}
fn d_max_node_chars() -> usize {
    6000
}
fn d_max_total_context_chars() -> usize {
    24_000
}
fn d_history_window() -> usize {
    8
}
fn d_max_selected_nodes() -> usize {
    6
}

// ── Event broker ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "d_job_queue_capacity")]
    pub job_queue_capacity: usize,
    #[serde(default = "d_chat_queue_capacity")]
    pub chat_queue_capacity: usize,
    #[serde(default = "d_sse_keepalive_secs")]
    pub sse_keepalive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            job_queue_capacity: d_job_queue_capacity(),
            chat_queue_capacity: d_chat_queue_capacity(),
            sse_keepalive_secs: d_sse_keepalive_secs(),
        }
    }
}

fn d_job_queue_capacity() -> usize {
    200
}
fn d_chat_queue_capacity() -> usize {
    500
}
fn d_sse_keepalive_secs() -> u64 {
    10
}

// ── LLM provider ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    /// Name of the environment variable holding the API key; the key
    /// itself is never stored in config.
    #[serde(default = "d_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "d_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            api_key_env: d_llm_api_key_env(),
            timeout_secs: d_llm_timeout_secs(),
        }
    }
}

fn d_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_llm_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn d_llm_timeout_secs() -> u64 {
    120
}

// ── Validation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl Config {
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "server.port must be nonzero".into(),
            });
        }
        if self.server.cors.allowed_origins.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "server.cors.allowed_origins is empty; no browser client will be able to call this service".into(),
            });
        }
        if self.indexer.command.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "indexer.command must name at least a program".into(),
            });
        }
        if self.chat.max_selected_nodes == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "chat.max_selected_nodes must be at least 1".into(),
            });
        }
        if std::env::var(&self.llm.api_key_env).is_err() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: format!(
                    "environment variable {} is not set; chat retrieval will fail until it is",
                    self.llm.api_key_env
                ),
            });
        }

        issues
    }
}
