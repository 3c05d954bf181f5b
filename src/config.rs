use crate::error::{GistError, Result};
use dirs::home_dir;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "CMSGIST_CONFIG";
pub const CONFIG_DIR_ENV: &str = "CMSGIST_CONFIG_DIR";
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

/// Optional on-disk settings. Every field has a default, so a missing file is
/// equivalent to an empty one.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub version: u32,
    pub environment: EnvironmentSettings,
    pub github: GithubSettings,
    pub shell: ShellSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EnvironmentSettings {
    pub bootstrap_script: String,
    pub project_command: String,
    /// Parent of `--temporary` work areas. Empty means the system temp dir.
    pub scratch_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct GithubSettings {
    pub api_url: String,
    pub token: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct ShellSettings {
    pub program: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: 1,
            environment: EnvironmentSettings::default(),
            github: GithubSettings::default(),
            shell: ShellSettings::default(),
        }
    }
}

impl Default for EnvironmentSettings {
    fn default() -> Self {
        Self {
            bootstrap_script: "/cvmfs/cms.cern.ch/cmsset_default.sh".to_string(),
            project_command: "scram".to_string(),
            scratch_dir: "".to_string(),
        }
    }
}

impl Default for GithubSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            token: "".to_string(),
        }
    }
}

impl Default for ShellSettings {
    fn default() -> Self {
        Self {
            program: "bash".to_string(),
        }
    }
}

impl Settings {
    pub fn bootstrap_script(&self) -> PathBuf {
        PathBuf::from(expand_path(&self.environment.bootstrap_script))
    }

    pub fn scratch_root(&self) -> PathBuf {
        let configured = self.environment.scratch_dir.trim();
        if configured.is_empty() {
            env::temp_dir()
        } else {
            PathBuf::from(expand_path(configured))
        }
    }

    /// Token from the settings file, falling back to `GITHUB_TOKEN`.
    pub fn github_token(&self) -> Option<String> {
        let configured = self.github.token.trim();
        if !configured.is_empty() {
            return Some(configured.to_string());
        }
        env::var(GITHUB_TOKEN_ENV)
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut base = default_config_dir();
    base.push("config.yaml");
    base
}

fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_DIR_ENV) {
        return PathBuf::from(path);
    }
    let mut base = home_dir().unwrap_or_else(|| PathBuf::from("."));
    base.push(".config");
    base.push("cmsgist");
    base
}

pub fn read_settings_from_str(content: &str) -> Result<Settings> {
    let settings: Settings = serde_yaml::from_str(content)?;
    if settings.version != 1 {
        return Err(GistError::Config(format!(
            "unsupported config version {}",
            settings.version
        )));
    }
    if settings.environment.project_command.trim().is_empty() {
        return Err(GistError::Config(
            "environment.project_command must not be empty".to_string(),
        ));
    }
    if settings.shell.program.trim().is_empty() {
        return Err(GistError::Config("shell.program must not be empty".to_string()));
    }
    Ok(settings)
}

/// Loads settings from `path`; a file that does not exist yields defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(Settings::default());
    }
    let content = fs::read_to_string(path)?;
    read_settings_from_str(&content).map_err(|err| {
        GistError::Config(format!(
            "config at {} is invalid: {}",
            path.display(),
            err
        ))
    })
}

pub fn expand_path(input: &str) -> String {
    if input == "~" {
        if let Some(home) = home_dir() {
            return home.to_string_lossy().to_string();
        }
    }
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

/// Expands `$NAME` and `${NAME}` using `lookup`. Unknown variables are left
/// untouched.
pub fn expand_vars<F>(input: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(idx) = rest.find('$') {
        out.push_str(&rest[..idx]);
        let after = &rest[idx + 1..];
        if let Some(braced) = after.strip_prefix('{') {
            if let Some(end) = braced.find('}') {
                let name = &braced[..end];
                match lookup(name) {
                    Some(value) if !name.is_empty() => out.push_str(&value),
                    _ => out.push_str(&rest[idx..idx + end + 3]),
                }
                rest = &braced[end + 1..];
                continue;
            }
            out.push('$');
            rest = after;
            continue;
        }
        let len = after
            .char_indices()
            .find(|(_, ch)| !(ch.is_ascii_alphanumeric() || *ch == '_'))
            .map_or(after.len(), |(pos, _)| pos);
        let name = &after[..len];
        match lookup(name) {
            Some(value) if !name.is_empty() => out.push_str(&value),
            _ => {
                out.push('$');
                out.push_str(name);
            }
        }
        rest = &after[len..];
    }
    out.push_str(rest);
    out
}
