//! Layered configuration.
//!
//! Precedence, lowest first: built-in defaults, `.sprintlog/config.toml` in
//! the project root, the user file `<config_dir>/sprintlog/config.toml`,
//! environment variables, command-line flags.

use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::sync::queue::{DEFAULT_BATCH_SIZE, DEFAULT_RETENTION_DAYS};

/// Directory holding the store and project config, relative to the root.
pub const STATE_DIR: &str = ".sprintlog";

/// Overrides `[database] path`.
pub const DB_PATH_ENV: &str = "SPRINTLOG_DB_PATH";

/// Overrides the user `output` setting.
pub const FORMAT_ENV: &str = "SPRINTLOG_FORMAT";

/// Contents of `.sprintlog/config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectSettings {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub github: GithubConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Relative paths resolve against the project root.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GithubConfig {
    /// `owner/repo`.
    #[serde(default)]
    pub repo: Option<String>,
    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            repo: None,
            token_env: default_token_env(),
            api_url: default_api_url(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            retention_days: default_retention_days(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Completed sprints averaged by `velocity`.
    #[serde(default = "default_velocity_window")]
    pub velocity_window: u32,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            velocity_window: default_velocity_window(),
        }
    }
}

/// Contents of the per-user config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub github: UserGithubConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGithubConfig {
    #[serde(default)]
    pub token: Option<String>,
}

/// How the CLI renders results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    Pretty,
    Text,
    Json,
}

impl OutputMode {
    fn normalize(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some(Self::Pretty),
            "text" | "plain" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Everything a command needs, after layering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub project: ProjectSettings,
    pub user: UserConfig,
    pub db_path: PathBuf,
    pub output: OutputMode,
}

impl EffectiveConfig {
    /// Token from the configured environment variable, else the user file.
    #[must_use]
    pub fn github_token(&self) -> Option<String> {
        env::var(&self.project.github.token_env)
            .ok()
            .filter(|token| !token.trim().is_empty())
            .or_else(|| self.user.github.token.clone())
    }
}

/// Read `.sprintlog/config.toml` under `project_root`. A missing file yields
/// defaults.
///
/// # Errors
///
/// [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_project_config(project_root: &Path) -> Result<ProjectSettings> {
    read_toml(&project_root.join(STATE_DIR).join("config.toml"))
}

/// Read the per-user config file. A missing file or an unknown config
/// directory yields defaults.
///
/// # Errors
///
/// [`Error::Config`] if the file exists but cannot be read or parsed.
pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };
    read_toml(&config_dir.join("sprintlog").join("config.toml"))
}

/// Layer files, environment and the `--json` flag.
///
/// # Errors
///
/// [`Error::Config`] if either config file is unreadable or malformed.
pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;
    let db_path = resolve_db_path(project_root, &project, env::var(DB_PATH_ENV).ok());
    let output = resolve_output(cli_json, user.output.as_deref(), env::var(FORMAT_ENV).ok());
    Ok(EffectiveConfig {
        project,
        user,
        db_path,
        output,
    })
}

fn resolve_db_path(root: &Path, project: &ProjectSettings, env_path: Option<String>) -> PathBuf {
    let path = env_path
        .filter(|p| !p.trim().is_empty())
        .map_or_else(|| project.database.path.clone(), PathBuf::from);
    if path.is_absolute() {
        path
    } else {
        root.join(path)
    }
}

fn resolve_output(cli_json: bool, user_output: Option<&str>, env_format: Option<String>) -> OutputMode {
    if cli_json {
        return OutputMode::Json;
    }
    if let Some(mode) = env_format.as_deref().and_then(OutputMode::normalize) {
        return mode;
    }
    if let Some(mode) = user_output.and_then(OutputMode::normalize) {
        return mode;
    }
    if std::io::stdout().is_terminal() {
        OutputMode::Pretty
    } else {
        OutputMode::Text
    }
}

fn read_toml<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|err| Error::Config(format!("failed to read {}: {err}", path.display())))?;
    toml::from_str(&content)
        .map_err(|err| Error::Config(format!("failed to parse {}: {err}", path.display())))
}

fn default_db_path() -> PathBuf {
    Path::new(STATE_DIR).join("pm.db")
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

const fn default_batch_size() -> u32 {
    DEFAULT_BATCH_SIZE
}

const fn default_retention_days() -> u32 {
    DEFAULT_RETENTION_DAYS
}

const fn default_velocity_window() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg.database.path, PathBuf::from(".sprintlog/pm.db"));
        assert_eq!(cfg.github.token_env, "GITHUB_TOKEN");
        assert_eq!(cfg.github.api_url, "https://api.github.com");
        assert_eq!(cfg.sync.batch_size, 10);
        assert_eq!(cfg.sync.retention_days, 7);
        assert_eq!(cfg.analytics.velocity_window, 3);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(STATE_DIR)).expect("state dir");
        std::fs::write(
            root.path().join(STATE_DIR).join("config.toml"),
            "[github]\nrepo = \"acme/widgets\"\n\n[sync]\nbatch_size = 25\n",
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("load");
        assert_eq!(cfg.github.repo.as_deref(), Some("acme/widgets"));
        assert_eq!(cfg.github.token_env, "GITHUB_TOKEN");
        assert_eq!(cfg.sync.batch_size, 25);
        assert_eq!(cfg.sync.retention_days, 7);
    }

    #[test]
    fn malformed_config_is_a_config_error() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(STATE_DIR)).expect("state dir");
        std::fs::write(root.path().join(STATE_DIR).join("config.toml"), "[sync\n")
            .expect("write config");

        let err = load_project_config(root.path()).expect_err("parse must fail");
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(err.code(), crate::error::ErrorCode::ConfigParseError);
    }

    #[test]
    fn env_db_path_wins_and_relative_paths_resolve_against_root() {
        let root = Path::new("/work/app");
        let cfg = ProjectSettings::default();
        assert_eq!(
            resolve_db_path(root, &cfg, None),
            PathBuf::from("/work/app/.sprintlog/pm.db")
        );
        assert_eq!(
            resolve_db_path(root, &cfg, Some("/tmp/other.db".into())),
            PathBuf::from("/tmp/other.db")
        );
        assert_eq!(
            resolve_db_path(root, &cfg, Some("  ".into())),
            PathBuf::from("/work/app/.sprintlog/pm.db")
        );
    }

    #[test]
    fn cli_json_overrides_env_and_user_config() {
        assert_eq!(resolve_output(true, Some("pretty"), Some("text".into())), OutputMode::Json);
        assert_eq!(resolve_output(false, Some("pretty"), Some("TEXT".into())), OutputMode::Text);
        assert_eq!(resolve_output(false, Some("human"), Some("bogus".into())), OutputMode::Pretty);
    }

    #[test]
    fn user_config_parses_token() {
        let cfg: UserConfig =
            toml::from_str("output = \"json\"\n\n[github]\ntoken = \"ghp_x\"\n").expect("parse");
        assert_eq!(cfg.output.as_deref(), Some("json"));
        assert_eq!(cfg.github.token.as_deref(), Some("ghp_x"));
    }
}
