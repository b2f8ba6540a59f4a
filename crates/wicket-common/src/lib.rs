use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

/// Immutable snapshot of the process environment, taken once at startup.
///
/// Boolean variables follow the historical contract: a variable is true only
/// when its value is the literal string `true`; anything else is false. An
/// unset variable falls back to the per-field default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Token gating the generic pass-through (and presets when
    /// `preset_auth_enabled`). `None` means no token ever matches.
    pub auth_token: Option<String>,
    pub debug_mode: bool,
    pub preset_auth_enabled: bool,
    pub gemini_special_handling_enabled: bool,
    /// Upstream base URL for the `default` preset route.
    pub default_dst_url: Option<String>,
    /// When true, routes prefer the high-level client transport unless they
    /// say otherwise.
    pub force_fetch_default: bool,
    /// When true, every transport error is eligible for client fallback, not
    /// only the network-shaped ones.
    pub aggressive_fallback: bool,
    pub gemini_retry_prompt_cn: Option<String>,
    pub gemini_retry_prompt_en: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_string("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: env_port("PORT")?,
            auth_token: env_string("AUTH_TOKEN"),
            debug_mode: env_bool("DEBUG_MODE", false),
            preset_auth_enabled: env_bool("PRESET_AUTH_ENABLED", false),
            gemini_special_handling_enabled: env_bool("GEMINI_SPECIAL_HANDLING_ENABLED", true),
            default_dst_url: env_string("DEFAULT_DST_URL"),
            force_fetch_default: env_bool("FORCE_FETCH_DEFAULT", false),
            aggressive_fallback: env_bool("AGGRESSIVE_FALLBACK", false),
            gemini_retry_prompt_cn: env_string("GEMINI_RETRY_PROMPT_CN"),
            gemini_retry_prompt_en: env_string("GEMINI_RETRY_PROMPT_EN"),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            auth_token: None,
            debug_mode: false,
            preset_auth_enabled: false,
            gemini_special_handling_enabled: true,
            default_dst_url: None,
            force_fetch_default: false,
            aggressive_fallback: false,
            gemini_retry_prompt_cn: None,
            gemini_retry_prompt_en: None,
        }
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(value) => value.trim() == "true",
        Err(_) => default,
    }
}

fn env_port(name: &'static str) -> Result<u16, ConfigError> {
    match env_string(name) {
        Some(value) => value.parse::<u16>().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
        }),
        None => Ok(8787),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_parsing_is_literal() {
        // Only the exact string "true" enables a flag.
        unsafe {
            std::env::set_var("WICKET_TEST_FLAG_A", "true");
            std::env::set_var("WICKET_TEST_FLAG_B", "True");
            std::env::set_var("WICKET_TEST_FLAG_C", "1");
        }
        assert!(env_bool("WICKET_TEST_FLAG_A", false));
        assert!(!env_bool("WICKET_TEST_FLAG_B", false));
        assert!(!env_bool("WICKET_TEST_FLAG_C", true));
        assert!(env_bool("WICKET_TEST_FLAG_UNSET", true));
    }
}
