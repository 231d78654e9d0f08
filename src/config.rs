use serde::Deserialize;
use std::path::PathBuf;
use tracing::{info, warn};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PhishermanConfig {
    pub gateway: GatewayConfig,
    pub quiz: QuizConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_cors_origin")]
    pub cors_origin: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
            cors_origin: default_cors_origin(),
        }
    }
}

impl GatewayConfig {
    pub fn is_loopback(&self) -> bool {
        matches!(self.bind.as_str(), "127.0.0.1" | "::1" | "localhost")
    }
}

fn default_port() -> u16 {
    7300
}
fn default_bind() -> String {
    "127.0.0.1".into()
}
fn default_cors_origin() -> Option<String> {
    Some("http://localhost:3000".into())
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuizConfig {
    #[serde(default = "default_max_questions")]
    pub max_questions: usize,
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,
    #[serde(default = "default_topic")]
    pub default_topic: String,
    /// Delay between lesson bullets pushed by `quiz:lesson`.
    #[serde(default = "default_lesson_pace_ms")]
    pub lesson_pace_ms: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            max_questions: default_max_questions(),
            session_ttl_secs: default_session_ttl_secs(),
            default_topic: default_topic(),
            lesson_pace_ms: default_lesson_pace_ms(),
        }
    }
}

fn default_max_questions() -> usize {
    10
}
fn default_session_ttl_secs() -> u64 {
    2 * 60 * 60
}
fn default_topic() -> String {
    "suspicious_link".into()
}
fn default_lesson_pace_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_audit_enabled")]
    pub enabled: bool,
    #[serde(default = "default_audit_path")]
    pub path: PathBuf,
    #[serde(default = "default_audit_max_bytes")]
    pub max_bytes: u64,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: default_audit_enabled(),
            path: default_audit_path(),
            max_bytes: default_audit_max_bytes(),
        }
    }
}

fn default_audit_enabled() -> bool {
    true
}
fn default_audit_path() -> PathBuf {
    PathBuf::from("diagnostics").join("quiz_sessions.log")
}
fn default_audit_max_bytes() -> u64 {
    10 * 1024 * 1024
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `PHISHERMAN_CONFIG` env var
/// 2. `~/.phisherman/config.toml`
/// 3. Zero-config defaults (no file needed)
///
/// `QUIZ_MAX_QUESTIONS` and `QUIZ_SESSION_TTL_SECS` override the file.
pub fn load() -> anyhow::Result<PhishermanConfig> {
    let path = config_path();

    let mut config = if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let config: PhishermanConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;
        info!("loaded config from {}", path.display());
        config
    } else {
        info!("no config file found, using zero-config defaults");
        PhishermanConfig::default()
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate(&config)?;
    Ok(config)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("PHISHERMAN_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".phisherman").join("config.toml")
}

/// Apply quiz overrides from the environment. Unparseable values are skipped.
pub fn apply_env_overrides(config: &mut PhishermanConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(raw) = lookup("QUIZ_MAX_QUESTIONS") {
        match raw.trim().parse::<usize>() {
            Ok(n) => config.quiz.max_questions = n,
            Err(e) => warn!(value = %raw, "ignoring QUIZ_MAX_QUESTIONS: {e}"),
        }
    }
    if let Some(raw) = lookup("QUIZ_SESSION_TTL_SECS") {
        match raw.trim().parse::<u64>() {
            Ok(n) => config.quiz.session_ttl_secs = n,
            Err(e) => warn!(value = %raw, "ignoring QUIZ_SESSION_TTL_SECS: {e}"),
        }
    }
}

/// Validate the config and return clear error messages.
pub fn validate(config: &PhishermanConfig) -> anyhow::Result<()> {
    if config.quiz.max_questions == 0 {
        anyhow::bail!("quiz.max_questions must be > 0");
    }
    if config.quiz.session_ttl_secs == 0 {
        anyhow::bail!("quiz.session_ttl_secs must be > 0");
    }
    if config.quiz.default_topic.trim().is_empty() {
        anyhow::bail!("quiz.default_topic must not be empty");
    }
    if config.audit.max_bytes == 0 {
        anyhow::bail!("audit.max_bytes must be > 0");
    }
    Ok(())
}
