use std::env;
use std::time::Duration;

use crate::error::ConfigError;

/// AI synthesis backend; `None` disables LLM synthesis and the baseline
/// compose synthesizer is used for every environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiProvider {
    Anthropic,
    OpenAi,
    Gemini,
    None,
}

impl AiProvider {
    fn parse(s: &str) -> Result<Self, ConfigError> {
        Ok(match s {
            "anthropic" => AiProvider::Anthropic,
            "openai" => AiProvider::OpenAi,
            "gemini" => AiProvider::Gemini,
            "none" => AiProvider::None,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "AI_PROVIDER".into(),
                    message: format!("unrecognized provider '{other}', expected anthropic|openai|gemini|none"),
                })
            }
        })
    }
}

/// Per-provider API key and model override, read only for the configured
/// `ai_provider`.
#[derive(Debug, Clone, Default)]
pub struct AiProviderCredentials {
    pub api_key: Option<String>,
    pub model: Option<String>,
}

/// Process configuration, loaded once at startup from environment variables —
/// the deployment-first style the original settings module uses.
#[derive(Debug, Clone)]
pub struct EphemeraConfig {
    pub database_url: String,
    pub broker_queue_poll_interval_ms: u64,

    pub github_app_id: Option<String>,
    pub github_private_key_path: Option<String>,
    pub github_webhook_secret: Option<String>,

    pub cluster_kubeconfig_path: Option<String>,
    pub base_domain: String,

    pub ai_provider: AiProvider,
    pub ai_credentials: AiProviderCredentials,
    pub ai_cache_ttl_secs: u64,

    pub credential_encryption_key: Option<String>,

    pub http_bind_addr: String,
    pub worker_concurrency: usize,
    pub reconcile_interval_secs: u64,

    pub stale_provisioning_threshold_mins: i64,
    pub stale_destroying_threshold_mins: i64,
    pub destroyed_retention_days: Option<i64>,
    pub failed_retry_window_hours: Option<i64>,
}

impl EphemeraConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = require("DATABASE_URL")?;
        let base_domain = require("BASE_DOMAIN")?;

        let ai_provider = optional("AI_PROVIDER")?.map(|s| AiProvider::parse(&s)).transpose()?.unwrap_or(AiProvider::None);
        let ai_credentials = match ai_provider {
            AiProvider::Anthropic => AiProviderCredentials { api_key: optional("ANTHROPIC_API_KEY")?, model: optional("ANTHROPIC_MODEL")? },
            AiProvider::OpenAi => AiProviderCredentials { api_key: optional("OPENAI_API_KEY")?, model: optional("OPENAI_MODEL")? },
            AiProvider::Gemini => AiProviderCredentials { api_key: optional("GEMINI_API_KEY")?, model: optional("GEMINI_MODEL")? },
            AiProvider::None => AiProviderCredentials::default(),
        };

        Ok(EphemeraConfig {
            database_url,
            broker_queue_poll_interval_ms: parse_or("BROKER_QUEUE_POLL_INTERVAL_MS", 500)?,

            github_app_id: optional("GITHUB_APP_ID")?,
            github_private_key_path: optional("GITHUB_PRIVATE_KEY_PATH")?,
            github_webhook_secret: optional("GITHUB_WEBHOOK_SECRET")?,

            cluster_kubeconfig_path: optional("CLUSTER_KUBECONFIG_PATH")?,
            base_domain,

            ai_provider,
            ai_credentials,
            ai_cache_ttl_secs: parse_or("AI_CACHE_TTL_SECS", 3600)?,

            credential_encryption_key: optional("CREDENTIAL_ENCRYPTION_KEY")?,

            http_bind_addr: optional("HTTP_BIND_ADDR")?.unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            worker_concurrency: parse_or("WORKER_CONCURRENCY", 4)?,
            reconcile_interval_secs: parse_or("RECONCILE_INTERVAL_SECS", 3600)?,

            stale_provisioning_threshold_mins: parse_or("STALE_PROVISIONING_THRESHOLD_MINS", 30)?,
            stale_destroying_threshold_mins: parse_or("STALE_DESTROYING_THRESHOLD_MINS", 30)?,
            destroyed_retention_days: optional("DESTROYED_RETENTION_DAYS")?.map(|s| parse_value("DESTROYED_RETENTION_DAYS", &s)).transpose()?,
            failed_retry_window_hours: optional("FAILED_RETRY_WINDOW_HOURS")?.map(|s| parse_value("FAILED_RETRY_WINDOW_HOURS", &s)).transpose()?,
        })
    }

    /// Whether the webhook surface and GitHub App driver can be enabled.
    pub fn github_app_configured(&self) -> bool {
        self.github_app_id.is_some() && self.github_private_key_path.is_some() && self.github_webhook_secret.is_some()
    }

    pub fn broker_queue_poll_interval(&self) -> Duration {
        Duration::from_millis(self.broker_queue_poll_interval_ms)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs)
    }
}

fn require(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional(name: &str) -> Result<Option<String>, ConfigError> {
    match env::var(name) {
        Ok(v) if !v.is_empty() => Ok(Some(v)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue { name: name.to_string(), message: "not valid UTF-8".into() }),
    }
}

fn parse_value<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T, ConfigError> {
    raw.parse().map_err(|_| ConfigError::InvalidValue { name: name.to_string(), message: format!("could not parse '{raw}'") })
}

fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match optional(name)? {
        Some(raw) => parse_value(name, &raw),
        None => Ok(default),
    }
}
