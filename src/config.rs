//! `devrack.toml` loading.
//!
//! Every field is optional. `Settings::from_config` fills the gaps with
//! defaults; command-line flags are applied on top by `main`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::terminal::default_shell;

pub const CONFIG_FILE: &str = "devrack.toml";

/// Top-level configuration structure corresponding to `devrack.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Port offered to a dev server when the caller does not ask for one.
    pub default_port: Option<u16>,
    /// Seconds between background ghost reconciliations.
    pub reconcile_interval_secs: Option<u64>,
    /// Grace period between graceful and forced termination (ms).
    pub stop_grace_ms: Option<u64>,
    /// Maximum number of output lines kept per project.
    pub max_lines: Option<usize>,
    /// Path of the JSON project store.
    pub store: Option<PathBuf>,
    /// Program used for the persistent terminal shell.
    pub shell: Option<String>,
    /// AI backend settings.
    #[serde(default)]
    pub ai: AiConfig,
}

/// The `[ai]` table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AiConfig {
    /// Executable of the AI CLI.
    pub command: Option<String>,
    /// Arguments placed before the prompt.
    pub args: Option<Vec<String>>,
    /// Cadence of the typing effect (ms).
    pub drain_interval_ms: Option<u64>,
    /// Delay before an auto-run command executes (ms).
    pub execute_delay_ms: Option<u64>,
    /// Delay before statuses are re-checked after an auto-run (ms).
    pub status_recheck_ms: Option<u64>,
}

/// Loads and parses the configuration from a file path.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Finds the config file: an explicit path, `./devrack.toml`, then the
/// user config directory.
pub fn find_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let local = PathBuf::from(CONFIG_FILE);
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir()
        .map(|dir| dir.join("devrack").join(CONFIG_FILE))
        .filter(|path| path.exists())
}

/// `<data dir>/devrack`, or `./.devrack` when there is no data directory.
pub fn data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|dir| dir.join("devrack"))
        .unwrap_or_else(|| PathBuf::from(".devrack"))
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub default_port: u16,
    pub reconcile_interval: Duration,
    pub stop_grace: Duration,
    pub max_lines: usize,
    pub store: PathBuf,
    pub shell: String,
    pub ai_command: String,
    pub ai_args: Vec<String>,
    pub drain_interval: Duration,
    pub execute_delay: Duration,
    pub status_recheck: Duration,
}

impl Settings {
    pub fn from_config(config: Config) -> Self {
        const DEFAULT_PORT: u16 = 3000;
        const DEFAULT_RECONCILE_SECS: u64 = 10;
        const DEFAULT_STOP_GRACE_MS: u64 = 2000;
        const DEFAULT_MAX_LINES: usize = 10_000;
        const DEFAULT_DRAIN_MS: u64 = 30;
        const DEFAULT_EXECUTE_DELAY_MS: u64 = 800;
        const DEFAULT_RECHECK_MS: u64 = 3000;

        let ai = config.ai;
        Self {
            default_port: config.default_port.unwrap_or(DEFAULT_PORT),
            reconcile_interval: Duration::from_secs(
                config
                    .reconcile_interval_secs
                    .unwrap_or(DEFAULT_RECONCILE_SECS)
                    .max(1),
            ),
            stop_grace: Duration::from_millis(
                config.stop_grace_ms.unwrap_or(DEFAULT_STOP_GRACE_MS),
            ),
            max_lines: config.max_lines.unwrap_or(DEFAULT_MAX_LINES),
            store: config
                .store
                .unwrap_or_else(|| data_dir().join("projects.json")),
            shell: config.shell.unwrap_or_else(default_shell),
            ai_command: ai.command.unwrap_or_else(|| "gemini".to_string()),
            ai_args: ai.args.unwrap_or_default(),
            drain_interval: Duration::from_millis(
                ai.drain_interval_ms.unwrap_or(DEFAULT_DRAIN_MS).max(1),
            ),
            execute_delay: Duration::from_millis(
                ai.execute_delay_ms.unwrap_or(DEFAULT_EXECUTE_DELAY_MS),
            ),
            status_recheck: Duration::from_millis(
                ai.status_recheck_ms.unwrap_or(DEFAULT_RECHECK_MS),
            ),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_config(Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_optional_fields() {
        let raw = r#"
default_port = 4000
reconcile_interval_secs = 5
stop_grace_ms = 500
max_lines = 200
store = "/tmp/projects.json"
shell = "/bin/zsh"

[ai]
command = "llm"
args = ["--model", "fast"]
drain_interval_ms = 10
execute_delay_ms = 100
status_recheck_ms = 1000
"#;
        let config: Config = toml::from_str(raw).unwrap();
        assert_eq!(config.default_port, Some(4000));
        assert_eq!(config.ai.args.as_deref().map(|a| a.len()), Some(2));

        let settings = Settings::from_config(config);
        assert_eq!(settings.default_port, 4000);
        assert_eq!(settings.reconcile_interval, Duration::from_secs(5));
        assert_eq!(settings.stop_grace, Duration::from_millis(500));
        assert_eq!(settings.max_lines, 200);
        assert_eq!(settings.store, PathBuf::from("/tmp/projects.json"));
        assert_eq!(settings.shell, "/bin/zsh");
        assert_eq!(settings.ai_command, "llm");
        assert_eq!(settings.drain_interval, Duration::from_millis(10));
        assert_eq!(settings.execute_delay, Duration::from_millis(100));
        assert_eq!(settings.status_recheck, Duration::from_secs(1));
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        let settings = Settings::from_config(config);
        assert_eq!(settings.default_port, 3000);
        assert_eq!(settings.reconcile_interval, Duration::from_secs(10));
        assert_eq!(settings.stop_grace, Duration::from_secs(2));
        assert_eq!(settings.max_lines, 10_000);
        assert_eq!(settings.ai_command, "gemini");
        assert_eq!(settings.drain_interval, Duration::from_millis(30));
        assert_eq!(settings.execute_delay, Duration::from_millis(800));
        assert!(settings.store.ends_with("projects.json"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(toml::from_str::<Config>("default_prot = 1").is_err());
    }

    #[test]
    fn load_config_reports_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "default_port = \"x\"").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{:#}", err).contains(CONFIG_FILE));
    }
}
