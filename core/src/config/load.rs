use std::path::{Path, PathBuf};

use super::types::AppConfig;
use crate::error::ConfigError;

const LOCAL_CONFIG: &str = "codebox.toml";

/// Loads the config from `explicit`, else `./codebox.toml`, else
/// `~/.codebox/config.toml`, else defaults. Environment overrides are applied
/// last and the result is validated.
pub fn load(explicit: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => discover(),
    };

    let mut cfg = match path {
        Some(p) => {
            tracing::debug!(target: "codebox.config", path = %p.display(), "loading config file");
            from_file(&p)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut cfg, |k| std::env::var(k).ok())?;
    validate(&cfg)?;
    Ok(cfg)
}

pub fn load_default() -> Result<AppConfig, ConfigError> {
    load(None)
}

fn discover() -> Option<PathBuf> {
    let local = PathBuf::from(LOCAL_CONFIG);
    if local.exists() {
        return Some(local);
    }
    let home = dirs::home_dir()?.join(".codebox").join("config.toml");
    home.exists().then_some(home)
}

pub fn from_file(path: &Path) -> Result<AppConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    Ok(toml::from_str::<AppConfig>(&s)?)
}

fn apply_env_overrides<F>(cfg: &mut AppConfig, get: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |k: &str| get(k).filter(|v| !v.trim().is_empty());

    if let Some(v) = non_empty("CODEBOX_TIMEOUT_MS") {
        cfg.dispatcher.timeout_ms = v
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("CODEBOX_TIMEOUT_MS is not a number: {v}")))?;
    }
    if let Some(v) = non_empty("CODEBOX_PYTHON") {
        cfg.interpreter.python_bin = v;
    }
    if let Some(v) = non_empty("CODEBOX_EXPLAINER_URL") {
        cfg.explainer.endpoint = v;
        cfg.explainer.enabled = true;
    }
    if let Some(v) = non_empty("CODEBOX_EXPLAINER_API_KEY") {
        cfg.explainer.api_key = v;
    }
    Ok(())
}

pub fn validate(cfg: &AppConfig) -> Result<(), ConfigError> {
    if cfg.dispatcher.timeout_ms == 0 {
        return Err(ConfigError::Invalid(
            "dispatcher.timeout_ms must be greater than zero".into(),
        ));
    }
    if cfg.interpreter.python_bin.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "interpreter.python_bin must not be empty".into(),
        ));
    }
    if cfg.events_out.enabled && cfg.events_out.channel_capacity == 0 {
        return Err(ConfigError::Invalid(
            "events_out.channel_capacity must be greater than zero".into(),
        ));
    }
    Ok(())
}
