//! Hook service
//!
//! Business rules above the registry: field validation, token checks, token
//! generation and the trigger side effect (writing the flag file).

use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{error, info, warn};

use crate::logging::targets;
use super::auth::validate_token;
use super::error::HookError;
use super::model::Hook;
use super::registry::HookRegistry;
use super::token::generate_token;

/// Maximum length of a hook id
pub const MAX_HOOK_ID_LEN: usize = 128;

/// Outcome of a successful trigger
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagWrite {
    /// Absolute or flags-root-relative path of the file written
    pub path: PathBuf,
    /// Timestamp written into the file
    pub triggered_at: DateTime<Utc>,
}

/// Hook business logic
pub struct HookService {
    registry: Arc<HookRegistry>,
    flags_dir: PathBuf,
}

impl HookService {
    pub fn new(registry: Arc<HookRegistry>, flags_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            flags_dir: flags_dir.into(),
        }
    }

    pub fn registry(&self) -> &Arc<HookRegistry> {
        &self.registry
    }

    pub fn flags_dir(&self) -> &Path {
        &self.flags_dir
    }

    pub fn get_hook(&self, id: &str) -> Result<Hook, HookError> {
        self.registry.get_by_id(id).inspect_err(|e| {
            error!(target: targets::HOOKS, id = %id, error = %e, "failed to get hook");
        })
    }

    pub fn get_all_hooks(&self) -> Vec<Hook> {
        self.registry.get_all()
    }

    pub fn create_hook(&self, hook: Hook) -> Result<Hook, HookError> {
        if let Err(e) = validate_hook(&hook) {
            error!(target: targets::HOOKS, id = %hook.id, error = %e, "failed to validate hook");
            return Err(e);
        }

        let id = hook.id.clone();
        let created = self.registry.create(hook).inspect_err(|e| {
            error!(target: targets::HOOKS, id = %id, error = %e, "failed to create hook");
        })?;

        info!(target: targets::HOOKS, id = %created.id, "hook created");
        Ok(created)
    }

    pub fn update_hook(&self, hook: Hook) -> Result<Hook, HookError> {
        if let Err(e) = validate_hook(&hook) {
            error!(target: targets::HOOKS, id = %hook.id, error = %e, "failed to validate hook");
            return Err(e);
        }

        let id = hook.id.clone();
        let updated = self.registry.update(hook).inspect_err(|e| {
            error!(target: targets::HOOKS, id = %id, error = %e, "failed to update hook");
        })?;

        info!(target: targets::HOOKS, id = %updated.id, enabled = updated.enabled, "hook updated");
        Ok(updated)
    }

    pub fn delete_hook(&self, id: &str) -> Result<(), HookError> {
        self.registry.delete(id).inspect_err(|e| {
            error!(target: targets::HOOKS, id = %id, error = %e, "failed to delete hook");
        })?;

        info!(target: targets::HOOKS, id = %id, "hook deleted");
        Ok(())
    }

    pub fn generate_token(&self) -> String {
        generate_token()
    }

    /// Check that `token` authorizes triggering hook `id`.
    ///
    /// Returns the hook on success. Disabled hooks fail before the token is
    /// compared.
    pub fn validate_hook_token(&self, id: &str, token: &str) -> Result<Hook, HookError> {
        let hook = self.registry.get_by_id(id).inspect_err(|e| {
            error!(target: targets::HOOKS, id = %id, error = %e, "failed to get hook for token validation");
        })?;

        if !hook.enabled {
            warn!(target: targets::HOOKS, id = %id, "hook is disabled");
            return Err(HookError::Disabled(id.to_string()));
        }

        if !validate_token(token, &hook.token) {
            warn!(target: targets::AUTH, id = %id, "invalid hook token");
            return Err(HookError::InvalidToken(id.to_string()));
        }

        Ok(hook)
    }

    /// Validate the token and write the hook's flag file.
    pub fn trigger_hook(&self, id: &str, token: &str) -> Result<FlagWrite, HookError> {
        let hook = self.validate_hook_token(id, token)?;

        let written = self.create_flag_file(&hook).inspect_err(|e| {
            error!(
                target: targets::HOOKS,
                id = %id,
                flag_file = %hook.flag_file,
                error = %e,
                "failed to create flag file"
            );
        })?;

        info!(target: targets::HOOKS, id = %id, flag_file = %hook.flag_file, "hook triggered");
        Ok(written)
    }

    fn create_flag_file(&self, hook: &Hook) -> Result<FlagWrite, HookError> {
        // The store may have been edited by hand since the hook was saved
        let relative = validate_flag_path(&hook.flag_file)?;

        let path = self.flags_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                HookError::io(
                    format!("failed to create directory {}", parent.display()),
                    e,
                )
            })?;
        }

        let triggered_at = Utc::now();
        let line = format!(
            "Hook triggered at {}\n",
            triggered_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );

        let mut file = File::create(&path).map_err(|e| {
            HookError::io(
                format!("failed to create flag file {}", path.display()),
                e,
            )
        })?;
        file.write_all(line.as_bytes()).map_err(|e| {
            HookError::io(
                format!("failed to write flag file {}", path.display()),
                e,
            )
        })?;

        Ok(FlagWrite { path, triggered_at })
    }
}

/// Validate the fields of a hook before it is saved.
pub fn validate_hook(hook: &Hook) -> Result<(), HookError> {
    if hook.id.is_empty() {
        return Err(HookError::validation("hook ID is required"));
    }
    if hook.id.len() > MAX_HOOK_ID_LEN {
        return Err(HookError::validation(format!(
            "hook ID must not exceed {} characters",
            MAX_HOOK_ID_LEN
        )));
    }
    if !hook
        .id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(HookError::validation(
            "hook ID may only contain letters, digits, '-' and '_'",
        ));
    }
    if hook.name.trim().is_empty() {
        return Err(HookError::validation("hook name is required"));
    }
    // Token presence is enforced when triggering, not when saving
    validate_flag_path(&hook.flag_file)?;
    Ok(())
}

/// Check that a flag file path stays inside the flags root.
///
/// Rejects empty, absolute and traversing paths, paths with control
/// characters, and paths that name no file (such as `.`). Returns the path to join onto the flags root.
pub fn validate_flag_path(flag_file: &str) -> Result<&Path, HookError> {
    if flag_file.is_empty() {
        return Err(HookError::validation("hook flag file is required"));
    }
    if flag_file.chars().any(char::is_control) {
        return Err(HookError::validation(format!(
            "flag file path must not contain control characters: {:?}",
            flag_file
        )));
    }

    let path = Path::new(flag_file);
    if path.is_absolute() || flag_file.starts_with(['/', '\\']) || path.has_root() {
        return Err(HookError::validation(format!(
            "flag file path must be relative: {}",
            flag_file
        )));
    }

    // Split on both separators so `a\..\b` is caught on every platform
    if flag_file.split(['/', '\\']).any(|segment| segment == "..") {
        return Err(HookError::validation(format!(
            "flag file path must not contain '..': {}",
            flag_file
        )));
    }

    let mut names_file = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => names_file = true,
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(HookError::validation(format!(
                    "flag file path must stay inside the flags directory: {}",
                    flag_file
                )));
            }
        }
    }
    if !names_file || flag_file.ends_with(['/', '\\']) {
        return Err(HookError::validation(format!(
            "flag file path must name a file: {}",
            flag_file
        )));
    }

    Ok(path)
}
