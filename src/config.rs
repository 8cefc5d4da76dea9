use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::errors::{Result, TxnError};

pub const CONFIG_ENV: &str = "RAVEN_TXN_CONFIG";

const DEFAULT_LOG_FILTER: &str = "raven_txn=debug";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxnConfig {
    pub frame_hint_on_mismatch: bool,
    pub maximize_when_fully_tiled: bool,
    pub log_filter: String,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            frame_hint_on_mismatch: true,
            maximize_when_fully_tiled: true,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoadedConfig {
    pub path: Option<PathBuf>,
    pub config: TxnConfig,
}

/// Load from `$RAVEN_TXN_CONFIG` or `$XDG_CONFIG_HOME/raven/txn.conf`.
/// A missing file is not an error.
pub fn load() -> Result<LoadedConfig> {
    let Some(path) = config_path() else {
        return Ok(LoadedConfig {
            path: None,
            config: TxnConfig::default(),
        });
    };
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no transaction config, using defaults");
        return Ok(LoadedConfig {
            path: None,
            config: TxnConfig::default(),
        });
    }

    let config = load_from_path(&path)?;
    Ok(LoadedConfig {
        path: Some(path),
        config,
    })
}

pub fn load_from_path(path: &Path) -> Result<TxnConfig> {
    let content = fs::read_to_string(path).map_err(|source| TxnError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse(&content)?;
    tracing::info!(path = %path.display(), "loaded transaction config");
    Ok(config)
}

pub fn parse(content: &str) -> Result<TxnConfig> {
    let values = parse_key_values(content)?;
    let mut config = TxnConfig::default();

    config.frame_hint_on_mismatch = parse_bool_flexible(
        &values,
        "frame_hint_on_mismatch",
        config.frame_hint_on_mismatch,
    )?;
    config.maximize_when_fully_tiled = parse_bool_flexible(
        &values,
        "maximize_when_fully_tiled",
        config.maximize_when_fully_tiled,
    )?;
    if let Some(filter) = values.get("log_filter") {
        if filter.is_empty() {
            return Err(config_error("log_filter", "must not be empty"));
        }
        config.log_filter = filter.clone();
    }

    for key in values.keys() {
        if !matches!(
            key.as_str(),
            "frame_hint_on_mismatch" | "maximize_when_fully_tiled" | "log_filter"
        ) {
            tracing::warn!(key = %key, "ignoring unknown transaction config key");
        }
    }

    Ok(config)
}

fn config_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(base.join("raven").join("txn.conf"))
}

fn parse_key_values(content: &str) -> Result<HashMap<String, String>> {
    let mut values = HashMap::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(config_error(
                &format!("line {}", index + 1),
                "expected `key = value`",
            ));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(config_error(&format!("line {}", index + 1), "missing key"));
        }
        values.insert(key.to_owned(), unquote(value.trim()).to_owned());
    }
    Ok(values)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(value)
}

fn parse_bool_flexible(
    values: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool> {
    let Some(raw) = values.get(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(config_error(key, &format!("expected a boolean, got `{other}`"))),
    }
}

fn config_error(key: &str, message: &str) -> TxnError {
    TxnError::Config {
        key: key.to_owned(),
        message: message.to_owned(),
    }
}
