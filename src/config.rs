//! Process-wide deploy configuration.
//!
//! Values come from an optional TOML file (path in `HOOK_CONFIG`) and are
//! overridden by environment variables. The result is validated once at
//! startup and never mutated afterwards.

use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DeployError, Result};

pub const CONFIG_PATH_VAR: &str = "HOOK_CONFIG";

const DEFAULT_REPO_PATH: &str = "/root/bot";
const DEFAULT_SERVICE_NAME: &str = "my_telegram_bot.service";
const DEFAULT_BRANCH: &str = "main";
const DEFAULT_REMOTE: &str = "origin";
const DEFAULT_VENV_DIR: &str = "venv";
const DEFAULT_REQUIREMENTS_FILE: &str = "requirements.txt";
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 300;
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5000";
const DEFAULT_HISTORY_SIZE: usize = 24;
pub const MAX_HISTORY_SIZE: usize = 10_000;

/// Secrets shipped in sample files. Running with one of these is refused.
pub const PLACEHOLDER_SECRETS: &[&str] = &[
    "ВАШ_ОЧЕНЬ_СЛОЖНЫЙ_СЕКРЕТ_ЗДЕСЬ",
    "YOUR_VERY_COMPLEX_SECRET_HERE",
];

/// What to do when the dependency install step fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallFailurePolicy {
    /// Log a warning and restart the service anyway.
    #[default]
    Continue,
    /// Stop the deploy with a server error.
    Abort,
}

impl FromStr for InstallFailurePolicy {
    type Err = DeployError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "continue" => Ok(Self::Continue),
            "abort" => Ok(Self::Abort),
            other => Err(DeployError::ConfigError(format!(
                "Unknown install failure policy '{}', expected 'continue' or 'abort'",
                other
            ))),
        }
    }
}

/// Raw settings as read from the TOML file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSettings {
    pub webhook_secret: Option<String>,
    pub repo_path: Option<PathBuf>,
    pub service_name: Option<String>,
    pub branch: Option<String>,
    pub remote: Option<String>,
    pub venv_dir: Option<PathBuf>,
    pub requirements_file: Option<PathBuf>,
    pub restart_with_sudo: Option<bool>,
    pub install_failure: Option<InstallFailurePolicy>,
    pub command_timeout_secs: Option<u64>,
    pub bind_address: Option<String>,
    pub history_size: Option<usize>,
}

impl FileSettings {
    /// Load and parse the configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            DeployError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[derive(Clone)]
pub struct DeployConfig {
    pub secret: String,
    pub repo_path: PathBuf,
    pub service_name: String,
    pub branch: String,
    pub remote: String,
    pub venv_dir: PathBuf,
    pub requirements_file: PathBuf,
    pub restart_with_sudo: bool,
    pub install_failure: InstallFailurePolicy,
    pub command_timeout: Duration,
    pub bind_address: String,
    pub history_size: usize,
}

impl fmt::Debug for DeployConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployConfig")
            .field("secret", &"<redacted>")
            .field("repo_path", &self.repo_path)
            .field("service_name", &self.service_name)
            .field("branch", &self.branch)
            .field("remote", &self.remote)
            .field("venv_dir", &self.venv_dir)
            .field("requirements_file", &self.requirements_file)
            .field("restart_with_sudo", &self.restart_with_sudo)
            .field("install_failure", &self.install_failure)
            .field("command_timeout", &self.command_timeout)
            .field("bind_address", &self.bind_address)
            .field("history_size", &self.history_size)
            .finish()
    }
}

impl DeployConfig {
    /// Build the configuration from the process environment, reading the
    /// TOML file named by `HOOK_CONFIG` first when it is set.
    pub fn from_env() -> Result<Self> {
        let file = match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) if !path.is_empty() => FileSettings::load(path)?,
            _ => FileSettings::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file settings with values from `lookup` (environment wins),
    /// apply defaults and validate.
    pub fn resolve<F>(file: FileSettings, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Empty variables count as unset
        let var = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let secret = var("WEBHOOK_SECRET")
            .or(file.webhook_secret)
            .unwrap_or_default();

        let restart_with_sudo = match var("RESTART_WITH_SUDO") {
            Some(raw) => parse_bool("RESTART_WITH_SUDO", &raw)?,
            None => file.restart_with_sudo.unwrap_or(true),
        };

        let install_failure = match var("INSTALL_FAILURE_POLICY") {
            Some(raw) => raw.parse()?,
            None => file.install_failure.unwrap_or_default(),
        };

        let command_timeout_secs = match var("COMMAND_TIMEOUT_SECS") {
            Some(raw) => parse_number("COMMAND_TIMEOUT_SECS", &raw)?,
            None => file
                .command_timeout_secs
                .unwrap_or(DEFAULT_COMMAND_TIMEOUT_SECS),
        };

        let history_size = match var("DEPLOY_HISTORY_SIZE") {
            Some(raw) => parse_number("DEPLOY_HISTORY_SIZE", &raw)?,
            None => file.history_size.unwrap_or(DEFAULT_HISTORY_SIZE),
        };

        let config = Self {
            secret,
            repo_path: var("REPO_PATH")
                .map(PathBuf::from)
                .or(file.repo_path)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPO_PATH)),
            service_name: var("SERVICE_NAME")
                .or(file.service_name)
                .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string()),
            branch: var("GIT_BRANCH")
                .or(file.branch)
                .unwrap_or_else(|| DEFAULT_BRANCH.to_string()),
            remote: var("GIT_REMOTE")
                .or(file.remote)
                .unwrap_or_else(|| DEFAULT_REMOTE.to_string()),
            venv_dir: var("VENV_DIR")
                .map(PathBuf::from)
                .or(file.venv_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VENV_DIR)),
            requirements_file: var("REQUIREMENTS_FILE")
                .map(PathBuf::from)
                .or(file.requirements_file)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REQUIREMENTS_FILE)),
            restart_with_sudo,
            install_failure,
            command_timeout: Duration::from_secs(command_timeout_secs),
            bind_address: var("BIND_ADDRESS")
                .or(file.bind_address)
                .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string()),
            history_size,
        };

        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations the handler must never see.
    pub fn validate(&self) -> Result<()> {
        if self.secret.is_empty() {
            return Err(DeployError::ConfigError(
                "WEBHOOK_SECRET is not set".to_string(),
            ));
        }
        if PLACEHOLDER_SECRETS.contains(&self.secret.as_str()) {
            return Err(DeployError::ConfigError(
                "WEBHOOK_SECRET still holds the placeholder value, set a strong secret"
                    .to_string(),
            ));
        }
        if self.branch.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "Tracked branch must not be empty".to_string(),
            ));
        }
        if self.service_name.trim().is_empty() {
            return Err(DeployError::ConfigError(
                "Service name must not be empty".to_string(),
            ));
        }
        if self.history_size > MAX_HISTORY_SIZE {
            return Err(DeployError::ConfigError(format!(
                "DEPLOY_HISTORY_SIZE must be at most {}, got {}",
                MAX_HISTORY_SIZE, self.history_size
            )));
        }
        if self.command_timeout.is_zero() {
            return Err(DeployError::ConfigError(
                "COMMAND_TIMEOUT_SECS must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Full ref that a push must target, e.g. `refs/heads/main`.
    pub fn tracked_ref(&self) -> String {
        format!("refs/heads/{}", self.branch)
    }

    pub fn pip_executable(&self) -> PathBuf {
        self.repo_path.join(&self.venv_dir).join("bin").join("pip")
    }

    pub fn requirements_path(&self) -> PathBuf {
        self.repo_path.join(&self.requirements_file)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(DeployError::ConfigError(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        DeployError::ConfigError(format!("{} must be a non-negative integer, got '{}'", key, raw))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_secret_is_set() {
        let config =
            DeployConfig::resolve(FileSettings::default(), lookup_from(&[("WEBHOOK_SECRET", "s3cret")]))
                .unwrap();

        assert_eq!(config.repo_path, PathBuf::from("/root/bot"));
        assert_eq!(config.service_name, "my_telegram_bot.service");
        assert_eq!(config.branch, "main");
        assert_eq!(config.remote, "origin");
        assert!(config.restart_with_sudo);
        assert_eq!(config.install_failure, InstallFailurePolicy::Continue);
        assert_eq!(config.command_timeout, Duration::from_secs(300));
        assert_eq!(config.tracked_ref(), "refs/heads/main");
        assert_eq!(config.pip_executable(), PathBuf::from("/root/bot/venv/bin/pip"));
        assert_eq!(
            config.requirements_path(),
            PathBuf::from("/root/bot/requirements.txt")
        );
    }

    #[test]
    fn missing_secret_is_rejected() {
        let err = DeployConfig::resolve(FileSettings::default(), lookup_from(&[])).unwrap_err();
        assert!(matches!(err, DeployError::ConfigError(_)));
    }

    #[test]
    fn empty_secret_is_rejected() {
        let result =
            DeployConfig::resolve(FileSettings::default(), lookup_from(&[("WEBHOOK_SECRET", "")]));
        assert!(result.is_err());
    }

    #[test]
    fn placeholder_secret_is_rejected() {
        for placeholder in PLACEHOLDER_SECRETS {
            let result = DeployConfig::resolve(
                FileSettings::default(),
                lookup_from(&[("WEBHOOK_SECRET", *placeholder)]),
            );
            assert!(result.is_err(), "placeholder {placeholder} was accepted");
        }
    }

    #[test]
    fn environment_overrides_file() {
        let file = FileSettings::parse(
            r#"
            webhook_secret = "from-file"
            branch = "release"
            service_name = "file.service"
            install_failure = "abort"
            "#,
        )
        .unwrap();

        let config = DeployConfig::resolve(
            file,
            lookup_from(&[("GIT_BRANCH", "main"), ("RESTART_WITH_SUDO", "false")]),
        )
        .unwrap();

        assert_eq!(config.secret, "from-file");
        assert_eq!(config.branch, "main");
        assert_eq!(config.service_name, "file.service");
        assert_eq!(config.install_failure, InstallFailurePolicy::Abort);
        assert!(!config.restart_with_sudo);
    }

    #[test]
    fn loads_example_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deploy_hook.toml");
        std::fs::write(&path, include_str!("../deploy_hook.example.toml")).unwrap();

        let file = FileSettings::load(&path).unwrap();
        let config =
            DeployConfig::resolve(file, lookup_from(&[("WEBHOOK_SECRET", "s3cret")])).unwrap();
        assert_eq!(config.history_size, 24);
        assert_eq!(config.bind_address, "127.0.0.1:5000");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let result = FileSettings::load("/nonexistent/deploy_hook.toml");
        assert!(matches!(result, Err(DeployError::ConfigError(_))));
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let result = FileSettings::parse("secret_typo = \"x\"");
        assert!(matches!(result, Err(DeployError::TomlParseError(_))));
    }

    #[test]
    fn invalid_values_are_reported() {
        let bad_policy = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[("WEBHOOK_SECRET", "s"), ("INSTALL_FAILURE_POLICY", "retry")]),
        );
        assert!(bad_policy.is_err());

        let bad_timeout = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[("WEBHOOK_SECRET", "s"), ("COMMAND_TIMEOUT_SECS", "soon")]),
        );
        assert!(bad_timeout.is_err());

        let zero_timeout = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[("WEBHOOK_SECRET", "s"), ("COMMAND_TIMEOUT_SECS", "0")]),
        );
        assert!(zero_timeout.is_err());
    }

    #[test]
    fn oversized_history_is_rejected() {
        let result = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[
                ("WEBHOOK_SECRET", "s"),
                ("DEPLOY_HISTORY_SIZE", "18446744073709551615"),
            ]),
        );
        assert!(matches!(result, Err(DeployError::ConfigError(_))));

        let at_cap = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[("WEBHOOK_SECRET", "s"), ("DEPLOY_HISTORY_SIZE", "10000")]),
        )
        .unwrap();
        assert_eq!(at_cap.history_size, MAX_HISTORY_SIZE);
    }

    #[test]
    fn debug_output_hides_secret() {
        let config = DeployConfig::resolve(
            FileSettings::default(),
            lookup_from(&[("WEBHOOK_SECRET", "very-private-value")]),
        )
        .unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-private-value"));
        assert!(rendered.contains("<redacted>"));
    }
}
