//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `start` (default) -- start the webhook server
//! - `admin-token` -- generate a new admin token and optionally save it
//! - `config show|path` -- inspect configuration
//! - `version` -- print version info

use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use crate::config::{self, ADMIN_TOKEN_ENV};
use crate::hooks::generate_token;

/// Webhook receiver that turns authenticated HTTP calls into flag files.
#[derive(Parser, Debug)]
#[command(
    name = "webhook-forge",
    version = env!("CARGO_PKG_VERSION"),
    about = "Webhook receiver that writes flag files for authenticated triggers"
)]
pub struct Cli {
    /// Path to the configuration file (WEBHOOK_FORGE_CONFIG_PATH takes precedence).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

impl Cli {
    /// The config file this invocation uses.
    pub fn config_path(&self) -> PathBuf {
        config::resolve_config_path(self.config.as_deref())
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the webhook server (default when no subcommand is given).
    Start,

    /// Generate a new admin token and offer to save it to the configuration.
    AdminToken {
        /// Save without asking for confirmation.
        #[arg(short, long)]
        yes: bool,
    },

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Print version information.
    Version,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ConfigCommand {
    /// Print the effective configuration (admin token redacted) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

/// Run the `admin-token` subcommand against stdin/stdout.
pub fn handle_admin_token(config_path: &Path, yes: bool) -> Result<(), Box<dyn std::error::Error>> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    run_admin_token(config_path, yes, &mut input, &mut output)?;
    Ok(())
}

/// Outcome of the admin-token flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminTokenOutcome {
    pub token: String,
    pub saved: bool,
}

/// Generate a token, show it next to the current one, and save it if the
/// user agrees (or `yes` is set).
pub fn run_admin_token<R: BufRead, W: Write>(
    config_path: &Path,
    yes: bool,
    input: &mut R,
    output: &mut W,
) -> Result<AdminTokenOutcome, Box<dyn std::error::Error>> {
    let token = generate_token();
    writeln!(output, "Generated new admin token: {}", token)?;

    // An unreadable file still gets a fresh token; saving rewrites only the token
    let current = if config_path.exists() {
        match config::load_config(config_path) {
            Ok(cfg) => Some(cfg.server.admin_token).filter(|t| !t.is_empty()),
            Err(e) => {
                writeln!(output, "Warning: could not read current configuration: {}", e)?;
                None
            }
        }
    } else {
        None
    };

    match &current {
        Some(current) => writeln!(output, "Current admin token: {}", current)?,
        None => writeln!(output, "No admin token is currently configured.")?,
    }

    let save = yes
        || confirm(
            input,
            output,
            "Do you want to save this new token to the configuration? (y/N): ",
        )?;

    if !save {
        writeln!(output, "Token not saved. The configuration is unchanged.")?;
        return Ok(AdminTokenOutcome {
            token,
            saved: false,
        });
    }

    config::set_admin_token(config_path, &token)?;
    writeln!(output, "Admin token saved to {}", config_path.display())?;

    if std::env::var(ADMIN_TOKEN_ENV).is_ok_and(|v| !v.trim().is_empty()) {
        writeln!(
            output,
            "Note: {} is set and overrides the saved token at startup.",
            ADMIN_TOKEN_ENV
        )?;
    }

    Ok(AdminTokenOutcome { token, saved: true })
}

/// Ask a yes/no question; only `y` and `yes` (any case) count as yes.
fn confirm<R: BufRead, W: Write>(input: &mut R, output: &mut W, question: &str) -> io::Result<bool> {
    write!(output, "{}", question)?;
    output.flush()?;

    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

/// Run the `config show` subcommand.
pub fn handle_config_show(config_path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = if config_path.exists() {
        config::load_config(config_path)?
    } else {
        config::Config::default()
    };
    cfg.apply_env_overrides();

    let pretty = serde_json::to_string_pretty(&cfg.redacted())?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(config_path: &Path) {
    println!("{}", config_path.display());
}

/// Run the `version` subcommand.
pub fn handle_version() {
    println!("webhook-forge {}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Platform: {} ({})",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn run(path: &Path, yes: bool, answer: &str) -> (AdminTokenOutcome, String) {
        let mut input = Cursor::new(answer.as_bytes().to_vec());
        let mut output = Vec::new();
        let outcome = run_admin_token(path, yes, &mut input, &mut output).unwrap();
        (outcome, String::from_utf8(output).unwrap())
    }

    #[test]
    fn test_parse_default_is_start() {
        let cli = Cli::try_parse_from(["webhook-forge"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.config, None);
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::try_parse_from(["webhook-forge", "admin-token", "--yes"]).unwrap();
        assert_eq!(cli.command, Some(Command::AdminToken { yes: true }));

        let cli = Cli::try_parse_from(["webhook-forge", "config", "show"]).unwrap();
        assert_eq!(cli.command, Some(Command::Config(ConfigCommand::Show)));

        let cli =
            Cli::try_parse_from(["webhook-forge", "start", "--config", "/etc/forge.json"]).unwrap();
        assert_eq!(cli.command, Some(Command::Start));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/forge.json")));
    }

    #[test]
    fn test_parse_unknown_subcommand_fails() {
        assert!(Cli::try_parse_from(["webhook-forge", "explode"]).is_err());
    }

    #[test]
    fn test_admin_token_declined() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"admin_token": "old-token"}}"#).unwrap();

        let (outcome, out) = run(&path, false, "n\n");
        assert!(!outcome.saved);
        assert!(out.contains("Current admin token: old-token"));
        assert!(out.contains("(y/N)"));
        assert!(out.contains("unchanged"));
        assert_eq!(
            config::load_config(&path).unwrap().server.admin_token,
            "old-token"
        );
    }

    #[test]
    fn test_admin_token_empty_answer_declines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");

        let (outcome, _) = run(&path, false, "");
        assert!(!outcome.saved);
        assert!(!path.exists());
    }

    #[test]
    fn test_admin_token_accepted() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"server": {"port": 9001}}"#).unwrap();

        let (outcome, out) = run(&path, false, "YES\n");
        assert!(outcome.saved);
        assert!(out.contains("No admin token is currently configured."));
        assert!(out.contains(&outcome.token));

        let cfg = config::load_config(&path).unwrap();
        assert_eq!(cfg.server.admin_token, outcome.token);
        assert_eq!(cfg.server.port, 9001);
    }

    #[test]
    fn test_admin_token_yes_flag_skips_prompt() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config/config.json");

        let (outcome, out) = run(&path, true, "");
        assert!(outcome.saved);
        assert!(!out.contains("(y/N)"));
        assert_eq!(
            config::load_config(&path).unwrap().server.admin_token,
            outcome.token
        );
    }

    #[test]
    fn test_confirm_answers() {
        for (answer, expected) in [("y\n", true), ("Yes\n", true), ("no\n", false), ("yep\n", false)] {
            let mut input = Cursor::new(answer.as_bytes().to_vec());
            let mut output = Vec::new();
            assert_eq!(confirm(&mut input, &mut output, "? ").unwrap(), expected, "{}", answer);
        }
    }
}
