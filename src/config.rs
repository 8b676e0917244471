use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HermetoError, Result};

/// Runtime tunables that are not part of the package-manager semantics
/// proper: subprocess timeouts, fetch concurrency and retry policy, and TLS
/// verification. Layered default -> config file -> environment, narrowest
/// wins, the same precedence the CLI surface documents in `--help`.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConfig {
    pub subprocess_timeout_secs: u64,
    pub fetch_concurrency: usize,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub insecure_skip_tls_verify: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            subprocess_timeout_secs: 3600,
            fetch_concurrency: 5,
            retry_max_attempts: 5,
            retry_base_delay_ms: 500,
            insecure_skip_tls_verify: false,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct PartialConfig {
    subprocess_timeout_secs: Option<u64>,
    fetch_concurrency: Option<usize>,
    retry_max_attempts: Option<u32>,
    retry_base_delay_ms: Option<u64>,
    insecure_skip_tls_verify: Option<bool>,
}

/// Load the layered configuration: built-in defaults, then
/// `$XDG_CONFIG_HOME/hermeto/config.toml` (or `~/.config/hermeto/config.toml`),
/// then `HERMETO_*` environment variables.
pub fn load() -> Result<RuntimeConfig> {
    let global_path = global_config_path();
    let global = load_partial_if_exists(global_path.as_deref())?;
    let env = partial_from_env()?;
    merge_config(global, env)
}

fn global_config_path() -> Option<PathBuf> {
    config_root_dir().map(|root| root.join("hermeto").join("config.toml"))
}

fn config_root_dir() -> Option<PathBuf> {
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg));
    }
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config"))
}

fn load_partial_if_exists(path: Option<&Path>) -> Result<PartialConfig> {
    let Some(path) = path else {
        return Ok(PartialConfig::default());
    };
    if !path.exists() {
        return Ok(PartialConfig::default());
    }

    let raw = std::fs::read_to_string(path).map_err(|source| {
        HermetoError::invalid_input(format!("failed to read {}: {source}", path.display()))
    })?;

    toml::from_str(&raw).map_err(|source| {
        HermetoError::invalid_input(format!("failed to parse {}: {source}", path.display()))
    })
}

fn partial_from_env() -> Result<PartialConfig> {
    let subprocess_timeout_secs = parse_env_u64("HERMETO_SUBPROCESS_TIMEOUT_SECS")?;
    let fetch_concurrency = parse_env_usize("HERMETO_FETCH_CONCURRENCY")?;
    let retry_max_attempts = parse_env_u32("HERMETO_RETRY_MAX_ATTEMPTS")?;
    let retry_base_delay_ms = parse_env_u64("HERMETO_RETRY_BASE_DELAY_MS")?;
    let insecure_skip_tls_verify = match std::env::var("HERMETO_INSECURE_SKIP_TLS_VERIFY") {
        Ok(value) => Some(parse_bool(&value)?),
        Err(_) => None,
    };

    Ok(PartialConfig {
        subprocess_timeout_secs,
        fetch_concurrency,
        retry_max_attempts,
        retry_base_delay_ms,
        insecure_skip_tls_verify,
    })
}

fn parse_env_u64(name: &str) -> Result<Option<u64>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u64>()
            .map(Some)
            .map_err(|_| HermetoError::invalid_input(format!("{name} is not a valid integer: '{value}'"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_u32(name: &str) -> Result<Option<u32>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| HermetoError::invalid_input(format!("{name} is not a valid integer: '{value}'"))),
        Err(_) => Ok(None),
    }
}

fn parse_env_usize(name: &str) -> Result<Option<usize>> {
    match std::env::var(name) {
        Ok(value) => value
            .parse::<usize>()
            .map(Some)
            .map_err(|_| HermetoError::invalid_input(format!("{name} is not a valid integer: '{value}'"))),
        Err(_) => Ok(None),
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value {
        "1" | "true" | "True" | "TRUE" => Ok(true),
        "0" | "false" | "False" | "FALSE" => Ok(false),
        other => Err(HermetoError::invalid_input(format!(
            "not a valid boolean: '{other}'"
        ))),
    }
}

fn merge_config(global: PartialConfig, env: PartialConfig) -> Result<RuntimeConfig> {
    let defaults = RuntimeConfig::default();

    let fetch_concurrency = env
        .fetch_concurrency
        .or(global.fetch_concurrency)
        .unwrap_or(defaults.fetch_concurrency);
    if fetch_concurrency == 0 {
        return Err(HermetoError::invalid_input("fetch_concurrency must be >= 1"));
    }

    let retry_max_attempts = env
        .retry_max_attempts
        .or(global.retry_max_attempts)
        .unwrap_or(defaults.retry_max_attempts);
    if retry_max_attempts == 0 {
        return Err(HermetoError::invalid_input("retry_max_attempts must be >= 1"));
    }

    Ok(RuntimeConfig {
        subprocess_timeout_secs: env
            .subprocess_timeout_secs
            .or(global.subprocess_timeout_secs)
            .unwrap_or(defaults.subprocess_timeout_secs),
        fetch_concurrency,
        retry_max_attempts,
        retry_base_delay_ms: env
            .retry_base_delay_ms
            .or(global.retry_base_delay_ms)
            .unwrap_or(defaults.retry_base_delay_ms),
        insecure_skip_tls_verify: env
            .insecure_skip_tls_verify
            .or(global.insecure_skip_tls_verify)
            .unwrap_or(defaults.insecure_skip_tls_verify),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_overrides_global() {
        let global = PartialConfig {
            fetch_concurrency: Some(3),
            ..PartialConfig::default()
        };
        let env = PartialConfig {
            fetch_concurrency: Some(8),
            ..PartialConfig::default()
        };
        let cfg = merge_config(global, env).unwrap();
        assert_eq!(cfg.fetch_concurrency, 8);
    }

    #[test]
    fn defaults_apply_when_nothing_set() {
        let cfg = merge_config(PartialConfig::default(), PartialConfig::default()).unwrap();
        assert_eq!(cfg, RuntimeConfig::default());
    }

    #[test]
    fn rejects_zero_fetch_concurrency() {
        let env = PartialConfig {
            fetch_concurrency: Some(0),
            ..PartialConfig::default()
        };
        let err = merge_config(PartialConfig::default(), env).unwrap_err();
        assert!(matches!(err, HermetoError::InvalidInput { .. }));
    }

    #[test]
    fn parse_bool_accepts_common_spellings() {
        assert!(parse_bool("true").unwrap());
        assert!(!parse_bool("0").unwrap());
        assert!(parse_bool("not-a-bool").is_err());
    }
}
