use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};

pub const DEFAULT_INFERENCE_URL: &str = "http://127.0.0.1:11434/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "dolphin3.0-llama3.1-8b";
pub const DEFAULT_API_TOKEN: &str = "sk-local-key";
pub const DEFAULT_TEMPERATURE: f32 = 0.25;
const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_OUTPUT_DIR: &str = "outputs";

/// Settings for the outbound chat-completion call.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub url: String,
    pub model: String,
    /// Sent as a bearer token to the inference endpoint when present.
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_INFERENCE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            temperature: DEFAULT_TEMPERATURE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub inference: InferenceConfig,
    /// Static token expected as `Authorization: Bearer <token>`.
    pub api_token: String,
    pub output_dir: PathBuf,
    pub max_request_bytes: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            inference: InferenceConfig::default(),
            api_token: DEFAULT_API_TOKEN.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            max_request_bytes: None,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let url = parse_optional_string("INFERENCE_URL")?
            .unwrap_or_else(|| DEFAULT_INFERENCE_URL.to_string());
        let model =
            parse_optional_string("INFERENCE_MODEL")?.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_key = parse_optional_string("INFERENCE_API_KEY")?;

        let timeout_secs = parse_optional_u64("INFERENCE_TIMEOUT_SECS")?.unwrap_or(DEFAULT_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(anyhow!("INFERENCE_TIMEOUT_SECS must be greater than zero"));
        }

        let temperature = parse_optional_f32("INFERENCE_TEMPERATURE")?.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=1.0).contains(&temperature) {
            return Err(anyhow!(
                "INFERENCE_TEMPERATURE must be between 0 and 1 (got {})",
                temperature
            ));
        }

        let api_token = match parse_optional_string("API_TOKEN")? {
            Some(token) => token,
            None => {
                tracing::warn!("API_TOKEN not set; falling back to the built-in development token");
                DEFAULT_API_TOKEN.to_string()
            }
        };

        let output_dir = parse_optional_string("OUTPUT_DIR")?
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
        let max_request_bytes = parse_optional_u64("MAX_REQUEST_BYTES")?.map(|v| v as usize);

        Ok(Self {
            inference: InferenceConfig {
                url,
                model,
                api_key,
                timeout: Duration::from_secs(timeout_secs),
                temperature,
            },
            api_token,
            output_dir,
            max_request_bytes,
        })
    }
}

fn parse_optional_string(var: &str) -> Result<Option<String>> {
    match env::var(var) {
        Ok(value) if !value.trim().is_empty() => Ok(Some(value.trim().to_string())),
        Ok(_) => Ok(None),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("{} is not valid unicode: {}", var, err)),
    }
}

fn parse_optional_u64(var: &str) -> Result<Option<u64>> {
    match parse_optional_string(var)? {
        Some(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a positive integer", var)),
        None => Ok(None),
    }
}

fn parse_optional_f32(var: &str) -> Result<Option<f32>> {
    match parse_optional_string(var)? {
        Some(value) => value
            .parse::<f32>()
            .ok()
            .filter(|v| v.is_finite())
            .map(Some)
            .ok_or_else(|| anyhow!("{} must be a number", var)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::Mutex;

    static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const VARS: [&str; 8] = [
        "INFERENCE_URL",
        "INFERENCE_MODEL",
        "INFERENCE_API_KEY",
        "INFERENCE_TIMEOUT_SECS",
        "INFERENCE_TEMPERATURE",
        "API_TOKEN",
        "OUTPUT_DIR",
        "MAX_REQUEST_BYTES",
    ];

    fn clear_env() {
        for var in VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn parses_environment_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.inference.url, DEFAULT_INFERENCE_URL);
        assert_eq!(cfg.inference.model, DEFAULT_MODEL);
        assert!(cfg.inference.api_key.is_none());
        assert_eq!(cfg.inference.timeout, Duration::from_secs(300));
        assert_eq!(cfg.inference.temperature, 0.25);
        assert_eq!(cfg.api_token, DEFAULT_API_TOKEN);
        assert_eq!(cfg.output_dir, PathBuf::from("outputs"));
        assert!(cfg.max_request_bytes.is_none());
    }

    #[test]
    fn parses_full_configuration() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        std::env::set_var("INFERENCE_URL", "http://llm.internal:8000/v1/chat/completions");
        std::env::set_var("INFERENCE_MODEL", "llama3");
        std::env::set_var("INFERENCE_API_KEY", "upstream-key");
        std::env::set_var("INFERENCE_TIMEOUT_SECS", "45");
        std::env::set_var("INFERENCE_TEMPERATURE", "0.7");
        std::env::set_var("API_TOKEN", "  secret  ");
        std::env::set_var("OUTPUT_DIR", "/tmp/reports");
        std::env::set_var("MAX_REQUEST_BYTES", "2048");

        let cfg = AppConfig::from_env().unwrap();
        assert_eq!(cfg.inference.url, "http://llm.internal:8000/v1/chat/completions");
        assert_eq!(cfg.inference.model, "llama3");
        assert_eq!(cfg.inference.api_key.as_deref(), Some("upstream-key"));
        assert_eq!(cfg.inference.timeout, Duration::from_secs(45));
        assert!((cfg.inference.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.api_token, "secret");
        assert_eq!(cfg.output_dir, PathBuf::from("/tmp/reports"));
        assert_eq!(cfg.max_request_bytes, Some(2048));

        clear_env();
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("INFERENCE_TEMPERATURE", "1.5");
        let err = AppConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("INFERENCE_TEMPERATURE"));
        clear_env();
    }

    #[test]
    fn rejects_malformed_numbers() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        std::env::set_var("MAX_REQUEST_BYTES", "lots");
        assert!(AppConfig::from_env().is_err());
        std::env::remove_var("MAX_REQUEST_BYTES");

        std::env::set_var("INFERENCE_TIMEOUT_SECS", "0");
        assert!(AppConfig::from_env().is_err());
        clear_env();
    }
}
