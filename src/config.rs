//! Configuration loading and defaults for toolbelt.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::mcp::McpConfig;
use crate::tools::ProcessToolConfig;

const CONFIG_PATH_ENV: &str = "TOOLBELT_CONFIG";
const WORKSPACE_ENV: &str = "TOOLBELT_WORKSPACE";

// === Types ===

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Root directory that relative tool and server directories resolve against.
    pub workspace: Option<PathBuf>,
    #[serde(default)]
    pub tools: HashMap<String, ProcessToolConfig>,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl Config {
    /// Load configuration from disk and merge with environment overrides.
    ///
    /// An explicit `path` must exist; the default location may be absent, in
    /// which case an empty config is used.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let explicit = path.is_some() || env_value(CONFIG_PATH_ENV).is_some();
        let path = resolve_config_path(path, env_value(CONFIG_PATH_ENV));

        let mut config = match path.as_deref() {
            Some(path) if path.exists() => Self::from_file(path)?,
            Some(path) if explicit => {
                bail!("Config file not found: {}", path.display());
            }
            _ => Config::default(),
        };

        apply_env_overrides(&mut config, env_value);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        tracing::debug!(path = %path.display(), tools = config.tools.len(), mcp_servers = config.mcp.servers.len(), "loaded config");
        Ok(config)
    }

    /// The workspace to run in: `override_dir` if given, else the configured
    /// one. It must be an existing directory.
    pub fn resolve_workspace(&self, override_dir: Option<PathBuf>) -> Result<PathBuf> {
        let Some(workspace) = override_dir.or_else(|| self.workspace.clone()) else {
            bail!(
                "No workspace configured; set `workspace` in the config, {WORKSPACE_ENV}, or pass --workspace"
            );
        };
        let workspace = expand_pathbuf(workspace);
        if !workspace.is_dir() {
            bail!("Workspace is not a directory: {}", workspace.display());
        }
        Ok(workspace)
    }
}

// === Defaults ===

pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".toolbelt").join("config.toml"))
}

fn resolve_config_path(explicit: Option<PathBuf>, from_env: Option<String>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(expand_pathbuf(path));
    }
    if let Some(path) = from_env {
        return Some(expand_path(&path));
    }
    default_config_path()
}

fn expand_path(path: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path);
    PathBuf::from(expanded.as_ref())
}

fn expand_pathbuf(path: PathBuf) -> PathBuf {
    if let Some(raw) = path.to_str() {
        return expand_path(raw);
    }
    path
}

// === Environment Overrides ===

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn apply_env_overrides(config: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(value) = lookup(WORKSPACE_ENV) {
        config.workspace = Some(PathBuf::from(value));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ProcessToolKind;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    const SAMPLE: &str = r#"
        workspace = "/srv/project"

        [tools.git]
        command = "git"
        args = ["--no-pager"]
        working_dir = "repo"
        default_timeout = 60

        [tools.sh]
        kind = "bash"

        [mcp.timeouts]
        call_timeout = 7

        [mcp.servers.search]
        command = "node"
        args = ["server.js"]
        tools = ["web_search"]
    "#;

    #[test]
    fn parses_full_config() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("config.toml");
        fs::write(&path, SAMPLE).expect("write config");

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.workspace, Some(PathBuf::from("/srv/project")));

        let git = &config.tools["git"];
        assert_eq!(git.kind, ProcessToolKind::Process);
        assert_eq!(git.command.as_deref(), Some("git"));
        assert_eq!(git.args, vec!["--no-pager"]);
        assert_eq!(git.working_dir, Some(PathBuf::from("repo")));
        assert_eq!(git.default_timeout, Some(60));

        assert_eq!(config.tools["sh"].kind, ProcessToolKind::Bash);
        assert_eq!(config.mcp.timeouts.call_timeout, 7);
        assert_eq!(config.mcp.servers["search"].tools, vec!["web_search"]);
    }

    #[test]
    fn parse_errors_name_the_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("broken.toml");
        fs::write(&path, "tools = 3").expect("write config");

        let err = Config::from_file(&path).unwrap_err();
        assert!(format!("{err:#}").contains("broken.toml"));
    }

    #[test]
    fn empty_config_has_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.workspace.is_none());
        assert!(config.tools.is_empty());
        assert_eq!(config.mcp.timeouts.call_timeout, 5);
    }

    #[test]
    fn explicit_path_wins_over_env() {
        assert_eq!(
            resolve_config_path(Some(PathBuf::from("/a.toml")), Some("/b.toml".to_string())),
            Some(PathBuf::from("/a.toml"))
        );
        assert_eq!(
            resolve_config_path(None, Some("/b.toml".to_string())),
            Some(PathBuf::from("/b.toml"))
        );
    }

    #[test]
    fn workspace_env_override() {
        let mut config = Config {
            workspace: Some(PathBuf::from("/from/file")),
            ..Config::default()
        };
        apply_env_overrides(&mut config, |key| {
            (key == WORKSPACE_ENV).then(|| "/from/env".to_string())
        });
        assert_eq!(config.workspace, Some(PathBuf::from("/from/env")));

        apply_env_overrides(&mut config, |_| None);
        assert_eq!(config.workspace, Some(PathBuf::from("/from/env")));
    }

    #[test]
    fn workspace_must_exist() {
        let tmp = tempdir().expect("tempdir");
        let config = Config {
            workspace: Some(tmp.path().join("missing")),
            ..Config::default()
        };
        assert!(config.resolve_workspace(None).is_err());
        assert_eq!(
            config
                .resolve_workspace(Some(tmp.path().to_path_buf()))
                .unwrap(),
            tmp.path()
        );
        assert!(Config::default().resolve_workspace(None).is_err());
    }
}
