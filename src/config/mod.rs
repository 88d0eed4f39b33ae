//! Configuration loading
//!
//! Reads a JSON5 file into typed settings, substitutes `${VAR}` references
//! from the environment and applies env-var overrides. A missing file is
//! created with defaults on first run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::env;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use thiserror::Error;
use tracing::info;

use crate::logging::targets;

/// Config path used when neither the env var nor `--config` is set
pub const DEFAULT_CONFIG_PATH: &str = "config/config.json";

/// Env var naming the config file
pub const CONFIG_PATH_ENV: &str = "WEBHOOK_FORGE_CONFIG_PATH";

/// Older name for [`CONFIG_PATH_ENV`], still honored
pub const LEGACY_CONFIG_PATH_ENV: &str = "CONFIG_PATH";

/// Env var overriding `server.admin_token`
pub const ADMIN_TOKEN_ENV: &str = "WEBHOOK_FORGE_ADMIN_TOKEN";

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error", "fatal"];
const LOG_FORMATS: &[&str] = &["json", "text"];

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse JSON5 at {path}: {message}")]
    ParseError { path: String, message: String },

    #[error("Failed to read config file {path}: {message}")]
    ReadError { path: String, message: String },

    #[error("Failed to write config file {path}: {message}")]
    WriteError { path: String, message: String },

    #[error("Missing environment variable: {var}")]
    MissingEnvVar { var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// A single problem found by [`Config::validate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub hooks: HooksSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub base_path: String,
    pub admin_token: String,
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            base_path: String::new(),
            admin_token: String::new(),
            max_body_bytes: 256 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HooksSettings {
    pub storage_path: PathBuf,
    pub flags_dir: PathBuf,
}

impl Default for HooksSettings {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("data/hooks.json"),
            flags_dir: PathBuf::from("data/flags"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub format: String,
    /// Empty means stdout
    pub file_path: String,
    /// Megabytes before the log file is rotated
    pub max_size: u64,
    pub max_backups: usize,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
            file_path: String::new(),
            max_size: 100,
            max_backups: 5,
        }
    }
}

impl Config {
    /// Check the settings the server cannot run without.
    /// Returns every issue found (empty if valid).
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        if self.server.admin_token.trim().is_empty() {
            issues.push(ValidationIssue {
                path: "server.admin_token".to_string(),
                message: format!(
                    "admin token is required (run `webhook-forge admin-token` or set {})",
                    ADMIN_TOKEN_ENV
                ),
            });
        }

        if self.server.port == 0 {
            issues.push(ValidationIssue {
                path: "server.port".to_string(),
                message: "port must be between 1 and 65535".to_string(),
            });
        }

        if self.server.host.trim().is_empty() {
            issues.push(ValidationIssue {
                path: "server.host".to_string(),
                message: "host must not be empty".to_string(),
            });
        }

        if self.hooks.storage_path.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                path: "hooks.storage_path".to_string(),
                message: "storage path must not be empty".to_string(),
            });
        }

        if self.hooks.flags_dir.as_os_str().is_empty() {
            issues.push(ValidationIssue {
                path: "hooks.flags_dir".to_string(),
                message: "flags directory must not be empty".to_string(),
            });
        }

        let level = self.log.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            issues.push(ValidationIssue {
                path: "log.level".to_string(),
                message: format!(
                    "unknown log level '{}' (expected one of {})",
                    self.log.level,
                    LOG_LEVELS.join(", ")
                ),
            });
        }

        let format = self.log.format.to_ascii_lowercase();
        if !LOG_FORMATS.contains(&format.as_str()) {
            issues.push(ValidationIssue {
                path: "log.format".to_string(),
                message: format!(
                    "unknown log format '{}' (expected json or text)",
                    self.log.format
                ),
            });
        }

        issues
    }

    /// Apply environment overrides on top of the file settings.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(token) = env::var(ADMIN_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.server.admin_token = token.trim().to_string();
            }
        }
    }

    /// Write the config as pretty JSON, atomically.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content =
            serde_json::to_string_pretty(self).map_err(|e| ConfigError::WriteError {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        write_atomic(path, &content)
    }

    /// Copy with secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.server.admin_token.is_empty() {
            copy.server.admin_token = "[REDACTED]".to_string();
        }
        copy
    }
}

/// Resolve the config file path.
/// Priority: WEBHOOK_FORGE_CONFIG_PATH > --config > CONFIG_PATH > config/config.json
pub fn resolve_config_path(cli_path: Option<&Path>) -> PathBuf {
    if let Some(path) = non_empty_env(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    if let Some(path) = cli_path {
        return path.to_path_buf();
    }
    if let Some(path) = non_empty_env(LEGACY_CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    PathBuf::from(DEFAULT_CONFIG_PATH)
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Load the config file, creating it with defaults if it does not exist.
///
/// Env overrides are not applied here so the result can be saved back
/// without leaking them into the file.
pub fn load_or_create(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        let config = Config::default();
        config.save(path)?;
        info!(target: targets::CONFIG, path = %path.display(), "created default configuration file");
        return Ok(config);
    }
    load_config(path)
}

/// Load and parse an existing config file.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let mut value = read_document(path)?;
    substitute_env_vars(&mut value)?;

    serde_json::from_value(value).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// Store a new admin token in the config file.
///
/// Only `server.admin_token` is rewritten; every other value, including
/// `${VAR}` references, is kept as written.
pub fn set_admin_token(path: &Path, token: &str) -> Result<(), ConfigError> {
    let mut value = if path.exists() {
        read_document(path)?
    } else {
        serde_json::to_value(Config::default()).map_err(|e| ConfigError::WriteError {
            path: path.display().to_string(),
            message: e.to_string(),
        })?
    };

    let root = value
        .as_object_mut()
        .ok_or_else(|| ConfigError::Invalid("config root must be an object".to_string()))?;
    let server = root
        .entry("server")
        .or_insert_with(|| Value::Object(serde_json::Map::new()));
    let server = server
        .as_object_mut()
        .ok_or_else(|| ConfigError::Invalid("`server` must be an object".to_string()))?;
    server.insert("admin_token".to_string(), Value::String(token.to_string()));

    let content = serde_json::to_string_pretty(&value).map_err(|e| ConfigError::WriteError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    write_atomic(path, &content)?;

    info!(target: targets::CONFIG, path = %path.display(), "admin token updated");
    Ok(())
}

fn read_document(path: &Path) -> Result<Value, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;
    parse_json5(&content, path)
}

/// Parse JSON5 content
fn parse_json5(content: &str, path: &Path) -> Result<Value, ConfigError> {
    json5::from_str(content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

fn substitute_env_vars(value: &mut Value) -> Result<(), ConfigError> {
    match value {
        Value::String(s) => {
            *s = substitute_env_in_string(s)?;
        }
        Value::Object(obj) => {
            for (_, v) in obj.iter_mut() {
                substitute_env_vars(v)?;
            }
        }
        Value::Array(arr) => {
            for item in arr.iter_mut() {
                substitute_env_vars(item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Replace `${VAR}` with the env value; `$${VAR}` stays a literal `${VAR}`.
fn substitute_env_in_string(s: &str) -> Result<String, ConfigError> {
    static ENV_VAR_PATTERN: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\$\$?\{([A-Z_][A-Z0-9_]*)\}").unwrap());

    let mut result = String::with_capacity(s.len());
    let mut last_end = 0;

    for caps in ENV_VAR_PATTERN.captures_iter(s) {
        let (Some(full_match), Some(var)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let var_name = var.as_str();

        result.push_str(&s[last_end..full_match.start()]);

        if full_match.as_str().starts_with("$$") {
            result.push_str(&format!("${{{}}}", var_name));
        } else {
            let value = env::var(var_name).map_err(|_| ConfigError::MissingEnvVar {
                var: var_name.to_string(),
            })?;
            result.push_str(&value);
        }

        last_end = full_match.end();
    }

    result.push_str(&s[last_end..]);
    Ok(result)
}

fn write_atomic(path: &Path, content: &str) -> Result<(), ConfigError> {
    let write_err = |e: std::io::Error| ConfigError::WriteError {
        path: path.display().to_string(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(content.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(write_err(e));
    }
    Ok(())
}
