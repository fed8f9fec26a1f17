use std::env;
use std::fs;

use anyhow::{anyhow, Context, Result};

use crate::prompt::DEFAULT_INSTRUCTIONS;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4.1-mini";
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 900;
pub const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub window_secs: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: 60,
            max_requests: 20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    /// Upstream credential. `None` surfaces per request as a misconfiguration.
    pub openai_api_key: Option<String>,
    /// Shared secret expected in `X-APP-KEY`. `None` rejects every analyze call.
    pub app_key: Option<String>,
    pub openai_base_url: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub upstream_timeout_ms: u64,
    pub max_body_bytes: usize,
    pub rate_limit: RateLimitConfig,
    pub instructions: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            openai_api_key: None,
            app_key: None,
            openai_base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            upstream_timeout_ms: DEFAULT_UPSTREAM_TIMEOUT_MS,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            rate_limit: RateLimitConfig::default(),
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let instructions = if let Some(path) = parse_optional_string("CLARIFIA_INSTRUCTIONS_FILE") {
            let content = fs::read_to_string(&path).with_context(|| {
                format!(
                    "Failed to read CLARIFIA_INSTRUCTIONS_FILE '{}': file unreadable",
                    path
                )
            })?;
            if content.trim().is_empty() {
                return Err(anyhow!(
                    "CLARIFIA_INSTRUCTIONS_FILE '{}' is empty",
                    path
                ));
            }
            content
        } else {
            defaults.instructions
        };

        let port = match parse_optional_u64("PORT")? {
            Some(p) => u16::try_from(p).map_err(|_| anyhow!("PORT must be a valid port number"))?,
            None => defaults.port,
        };

        let max_output_tokens = match parse_optional_u64("OPENAI_MAX_OUTPUT_TOKENS")? {
            Some(n) => u32::try_from(n)
                .map_err(|_| anyhow!("OPENAI_MAX_OUTPUT_TOKENS is out of range"))?,
            None => defaults.max_output_tokens,
        };

        let max_requests = match parse_optional_u64("RATE_LIMIT_MAX")? {
            Some(n) => u32::try_from(n).map_err(|_| anyhow!("RATE_LIMIT_MAX is out of range"))?,
            None => defaults.rate_limit.max_requests,
        };

        let max_body_bytes = match parse_optional_u64("MAX_BODY_BYTES")? {
            Some(n) => usize::try_from(n).map_err(|_| anyhow!("MAX_BODY_BYTES is out of range"))?,
            None => defaults.max_body_bytes,
        };

        let rate_limit = RateLimitConfig {
            window_secs: parse_optional_u64("RATE_LIMIT_WINDOW_SECS")?
                .unwrap_or(defaults.rate_limit.window_secs),
            max_requests,
        };

        Ok(Self {
            port,
            openai_api_key: parse_optional_string("OPENAI_API_KEY"),
            app_key: parse_optional_string("APP_KEY"),
            openai_base_url: parse_optional_string("OPENAI_BASE_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or(defaults.openai_base_url),
            model: parse_optional_string("OPENAI_MODEL").unwrap_or(defaults.model),
            max_output_tokens,
            upstream_timeout_ms: parse_optional_u64("OPENAI_TIMEOUT_MS")?
                .unwrap_or(defaults.upstream_timeout_ms),
            max_body_bytes,
            rate_limit,
            instructions,
        })
    }
}

/// Blank values count as unset so an empty `APP_KEY=` never becomes a valid secret.
fn parse_optional_string(var: &str) -> Option<String> {
    env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a positive integer", var)),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err.into()),
    }
}
