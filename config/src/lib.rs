//! Typed TOML configuration for Weft agents.
//!
//! One `weft.toml` (working directory) or `~/.config/weft/config.toml` (XDG)
//! holds the `[git]`, `[llm]`, `[budgets]` and `[workspace]` tables. Lookup
//! order is working directory first, then XDG; a missing file yields
//! [`WeftConfig::default`].
//!
//! Credentials reach the agent through the process environment. The `[env]`
//! table and a project `.env` file seed variables that are not already set,
//! so the effective precedence is **existing env > `.env` > config file**;
//! [`load_and_apply`] performs that overlay.

mod dotenv;
mod substitute;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

pub use substitute::{substitute_agent_id, substitute_story_id};

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Git repository and branch settings for one project.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    /// Remote repository URL; becomes `origin` in every agent clone.
    pub repo_url: String,
    /// Branch PRs merge into and clones start from.
    pub target_branch: String,
    /// Directory (under the project work dir) holding the shared bare mirror.
    pub mirror_dir: String,
    /// Story branch name pattern; `{STORY_ID}` is substituted.
    pub branch_pattern: String,
    /// Commit identity; `{AGENT_ID}` is substituted.
    pub git_user_name: String,
    pub git_user_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            repo_url: String::new(),
            target_branch: "main".to_string(),
            mirror_dir: ".mirrors".to_string(),
            branch_pattern: "story-{STORY_ID}".to_string(),
            git_user_name: "weft-{AGENT_ID}".to_string(),
            git_user_email: "weft-{AGENT_ID}@localhost".to_string(),
        }
    }
}

/// Context-window accounting for the LLM client.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Maximum context size in tokens.
    pub max_context_tokens: u32,
    /// Tokens reserved for the reply.
    pub reply_reserve_tokens: u32,
    /// Safety margin subtracted before compaction triggers.
    pub compaction_buffer_tokens: u32,
    /// Per-completion reply token cap passed to the vendor client.
    pub max_reply_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 128_000,
            reply_reserve_tokens: 4096,
            compaction_buffer_tokens: 8192,
            max_reply_tokens: 4096,
        }
    }
}

/// Iteration budgets per phase; exceeding one triggers a budget review.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub planning_max_loops: u32,
    pub coding_max_loops: u32,
    /// Tool-loop iterations inside one planning entry.
    pub planning_max_iterations: u32,
    /// Tool-loop iterations inside one coding entry.
    pub coding_max_iterations: u32,
    pub todo_max_iterations: u32,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            planning_max_loops: 8,
            coding_max_loops: 8,
            planning_max_iterations: 30,
            coding_max_iterations: 50,
            todo_max_iterations: 2,
        }
    }
}

/// Forge (pull-request API) selection.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ForgeConfig {
    /// `github` or `gitea`.
    pub kind: String,
    /// REST base URL; only meaningful for gitea (e.g. `https://gitea.local`).
    pub base_url: String,
    pub owner: String,
    pub repo: String,
}

impl Default for ForgeConfig {
    fn default() -> Self {
        Self {
            kind: "github".to_string(),
            base_url: String::new(),
            owner: String::new(),
            repo: String::new(),
        }
    }
}

/// Per-process workspace roots.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// Root under which mirrors and per-agent work dirs live.
    pub project_work_dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            project_work_dir: ".weft".to_string(),
        }
    }
}

/// Full agent configuration: `[git]`, `[llm]`, `[budgets]`, `[workspace]`.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct WeftConfig {
    pub git: GitConfig,
    pub llm: LlmConfig,
    pub budgets: BudgetConfig,
    pub workspace: WorkspaceConfig,
    pub forge: ForgeConfig,
    /// Environment variables to seed when absent from the process
    /// environment (e.g. `GITEA_TOKEN` for on-prem setups).
    pub env: HashMap<String, String>,
}

impl WeftConfig {
    /// Parses a config from a TOML file. Absent tables take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Ok(toml::from_str(&content)?)
    }

    /// Loads config from `weft.toml` in `dir` (if given, else the current
    /// directory), falling back to `$XDG_CONFIG_HOME/weft/config.toml`, then
    /// to defaults when neither exists.
    pub fn discover(dir: Option<&Path>) -> Result<Self, LoadError> {
        if let Some(local) = local_config_path(dir) {
            return Self::from_file(local);
        }
        if let Some(xdg) = xdg_config_path() {
            return Self::from_file(xdg);
        }
        Ok(Self::default())
    }
}

/// Discovers the config, then seeds process environment variables from the
/// project `.env` and the config's `[env]` table.
///
/// A variable is only set when it is **not** already present in the process
/// environment, so existing env always wins; when a key appears in both
/// sources, `.env` takes priority over the config file.
pub fn load_and_apply(dir: Option<&Path>) -> Result<WeftConfig, LoadError> {
    let config = WeftConfig::discover(dir)?;
    let dotenv_dir = dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok());
    let dotenv_map = match &dotenv_dir {
        Some(d) => dotenv::load(d).map_err(LoadError::Read)?,
        None => HashMap::new(),
    };

    let mut keys: std::collections::HashSet<&String> = config.env.keys().collect();
    keys.extend(dotenv_map.keys());
    for key in keys {
        if std::env::var(key).is_ok() {
            continue; // existing env wins
        }
        let value = dotenv_map.get(key).or_else(|| config.env.get(key));
        if let Some(v) = value {
            std::env::set_var(key, v);
        }
    }

    Ok(config)
}

fn local_config_path(dir: Option<&Path>) -> Option<PathBuf> {
    let dir = dir
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join("weft.toml");
    path.is_file().then_some(path)
}

fn xdg_config_path() -> Option<PathBuf> {
    let path = dirs::config_dir()?.join("weft").join("config.toml");
    path.is_file().then_some(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn defaults_cover_all_tables() {
        let c = WeftConfig::default();
        assert_eq!(c.git.target_branch, "main");
        assert_eq!(c.git.branch_pattern, "story-{STORY_ID}");
        assert_eq!(c.budgets.planning_max_loops, 8);
        assert_eq!(c.budgets.todo_max_iterations, 2);
        assert_eq!(c.llm.max_context_tokens, 128_000);
    }

    #[test]
    fn from_file_reads_partial_tables() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(
            &path,
            r#"
[git]
repo_url = "https://example.com/acme/api.git"
target_branch = "develop"

[budgets]
coding_max_loops = 12
"#,
        )
        .unwrap();

        let c = WeftConfig::from_file(&path).unwrap();
        assert_eq!(c.git.repo_url, "https://example.com/acme/api.git");
        assert_eq!(c.git.target_branch, "develop");
        // Untouched keys keep defaults.
        assert_eq!(c.git.mirror_dir, ".mirrors");
        assert_eq!(c.budgets.coding_max_loops, 12);
        assert_eq!(c.budgets.planning_max_loops, 8);
    }

    #[test]
    fn from_file_rejects_bad_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weft.toml");
        std::fs::write(&path, "[git\nrepo_url = ").unwrap();
        assert!(matches!(
            WeftConfig::from_file(&path),
            Err(LoadError::Parse(_))
        ));
    }

    #[test]
    fn discover_prefers_local_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weft.toml"),
            "[git]\ntarget_branch = \"trunk\"\n",
        )
        .unwrap();
        let c = WeftConfig::discover(Some(dir.path())).unwrap();
        assert_eq!(c.git.target_branch, "trunk");
    }

    #[test]
    fn discover_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = WeftConfig::discover(Some(dir.path())).unwrap();
        assert_eq!(c.git.target_branch, "main");
    }

    #[test]
    fn existing_env_wins_over_both_sources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weft.toml"),
            "[env]\nWEFT_TEST_EXISTING = \"from_config\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(".env"), "WEFT_TEST_EXISTING=from_dotenv\n").unwrap();

        env::set_var("WEFT_TEST_EXISTING", "from_env");
        let _ = load_and_apply(Some(dir.path())).unwrap();
        let val = env::var("WEFT_TEST_EXISTING");
        env::remove_var("WEFT_TEST_EXISTING");
        assert_eq!(val.as_deref(), Ok("from_env"));
    }

    #[test]
    fn dotenv_overrides_config_env_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weft.toml"),
            "[env]\nWEFT_TEST_PRIORITY = \"from_config\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join(".env"), "WEFT_TEST_PRIORITY=from_dotenv\n").unwrap();

        env::remove_var("WEFT_TEST_PRIORITY");
        let _ = load_and_apply(Some(dir.path())).unwrap();
        let val = env::var("WEFT_TEST_PRIORITY");
        env::remove_var("WEFT_TEST_PRIORITY");
        assert_eq!(val.as_deref(), Ok("from_dotenv"));
    }

    #[test]
    fn config_env_applied_when_no_dotenv() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("weft.toml"),
            "[env]\nWEFT_TEST_CONFIG_ONLY = \"from_config\"\n",
        )
        .unwrap();

        env::remove_var("WEFT_TEST_CONFIG_ONLY");
        let config = load_and_apply(Some(dir.path())).unwrap();
        let val = env::var("WEFT_TEST_CONFIG_ONLY");
        env::remove_var("WEFT_TEST_CONFIG_ONLY");
        assert_eq!(val.as_deref(), Ok("from_config"));
        assert_eq!(
            config.env.get("WEFT_TEST_CONFIG_ONLY").map(String::as_str),
            Some("from_config")
        );
    }
}
