use crate::core::errors::ConfigError;
use crate::middleware::key_pool::RotationPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// Default prompt sent alongside every batch; the batching instruction and
/// not-found marker are appended by the client.
pub const DEFAULT_PROMPT: &str =
    "Extract phone number from this image, give me only the number without any explanation";

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
}

/// Remote API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub prompt: String,
    pub rotation_policy: RotationPolicy,
}

/// Batch processing configuration
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Images per remote call.
    pub batch_size: usize,
    /// Pause between consecutive batches, skipped after the last one.
    pub inter_batch_delay: Duration,
    /// Full re-processing passes over the failed set.
    pub retry_rounds: u32,
    /// Pause before each retry round starts.
    pub retry_round_cooldown: Duration,
}

/// Per-call retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub attempt_timeout: Duration,
    /// Pause after rotating to a fresh key.
    pub rotate_cooldown: Duration,
    /// Pause before resetting a fully limited pool.
    pub exhausted_cooldown: Duration,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub api: ApiConfig,
    pub batch: BatchConfig,
    pub retry: RetryConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        // Comma-separated key list; empty entries are dropped
        let api_keys: Vec<String> = env::var("GEMINI_API_KEYS")
            .ok()
            .map(|keys| {
                keys.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let rotation_policy = match env::var("ROTATION_POLICY") {
            Ok(raw) => RotationPolicy::parse(&raw)
                .ok_or_else(|| ConfigError::InvalidRotationPolicy(raw))?,
            Err(_) => RotationPolicy::RoundRobin,
        };

        Ok(Self {
            server: ServerConfig {
                port: env_or("SERVER_PORT", 8080),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
            },
            api: ApiConfig {
                api_keys,
                model: env::var("SCAN_MODEL").unwrap_or_else(|_| "gemma-3-27b-it".to_string()),
                prompt: env::var("SCAN_PROMPT").unwrap_or_else(|_| DEFAULT_PROMPT.to_string()),
                rotation_policy,
            },
            batch: BatchConfig {
                batch_size: env_or("BATCH_SIZE", 5),
                inter_batch_delay: Duration::from_millis(env_or("INTER_BATCH_DELAY_MS", 3000)),
                retry_rounds: env_or("RETRY_ROUNDS", 3),
                retry_round_cooldown: Duration::from_millis(env_or(
                    "RETRY_ROUND_COOLDOWN_MS",
                    5000,
                )),
            },
            retry: RetryConfig {
                max_retries: env_or("MAX_RETRIES", 3),
                base_delay: Duration::from_millis(env_or("BASE_DELAY_MS", 3000)),
                attempt_timeout: Duration::from_millis(env_or("ATTEMPT_TIMEOUT_MS", 60_000)),
                rotate_cooldown: Duration::from_millis(env_or("ROTATE_COOLDOWN_MS", 2000)),
                exhausted_cooldown: Duration::from_millis(env_or("EXHAUSTED_COOLDOWN_MS", 30_000)),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        // Without keys no call can ever succeed; refuse to start
        if self.api.api_keys.is_empty() {
            return Err(ConfigError::NoApiKeys);
        }

        if self.batch.batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(self.batch.batch_size));
        }

        if self.retry.max_retries == 0 {
            return Err(ConfigError::InvalidRetryConfig(
                "max_retries must be > 0".to_string(),
            ));
        }

        if self.retry.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidRetryConfig(
                "attempt_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}
