//! Startup orchestration.
//!
//! # Responsibilities
//! - Work out where the configuration lives for the current environment
//! - Load and validate it, failing fast on any error
//!
//! # Design Decisions
//! - Local runs read `config.toml` from the working directory
//! - Serverless deployments (`AWS_EXECUTION_ENV` starting with `AWS_Lambda`)
//!   read the file bundled with the function under `/var/task`
//! - The environment is detected once and passed in; an explicit path always
//!   wins over it

use std::path::{Path, PathBuf};

use crate::config::{load_config, ConfigError, ProxyConfig};

const EXECUTION_ENV: &str = "AWS_EXECUTION_ENV";
const LAMBDA_PREFIX: &str = "AWS_Lambda";
const LOCAL_CONFIG: &str = "config.toml";
const LAMBDA_CONFIG: &str = "/var/task/config.toml";

/// Where the process is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeEnvironment {
    Local,
    Lambda,
}

impl RuntimeEnvironment {
    pub fn detect() -> Self {
        Self::from_execution_env(std::env::var(EXECUTION_ENV).ok().as_deref())
    }

    fn from_execution_env(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.starts_with(LAMBDA_PREFIX) => RuntimeEnvironment::Lambda,
            _ => RuntimeEnvironment::Local,
        }
    }

    pub fn default_config_path(self) -> &'static Path {
        match self {
            RuntimeEnvironment::Local => Path::new(LOCAL_CONFIG),
            RuntimeEnvironment::Lambda => Path::new(LAMBDA_CONFIG),
        }
    }
}

/// Resolve the configuration path and load it.
pub fn load(
    environment: RuntimeEnvironment,
    explicit: Option<&Path>,
) -> Result<(PathBuf, ProxyConfig), ConfigError> {
    let path = explicit
        .unwrap_or_else(|| environment.default_config_path())
        .to_path_buf();
    let config = load_config(&path)?;
    Ok((path, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_env_selects_environment() {
        use RuntimeEnvironment::*;
        assert_eq!(RuntimeEnvironment::from_execution_env(None), Local);
        assert_eq!(RuntimeEnvironment::from_execution_env(Some("")), Local);
        assert_eq!(RuntimeEnvironment::from_execution_env(Some("AWS_ECS_FARGATE")), Local);
        assert_eq!(RuntimeEnvironment::from_execution_env(Some("AWS_Lambda_provided.al2023")), Lambda);
    }

    #[test]
    fn default_paths() {
        assert_eq!(RuntimeEnvironment::Local.default_config_path(), Path::new("config.toml"));
        assert_eq!(
            RuntimeEnvironment::Lambda.default_config_path(),
            Path::new("/var/task/config.toml")
        );
    }

    #[test]
    fn explicit_path_is_used() {
        let path = std::env::temp_dir().join(format!("rproxy-startup-{}.toml", std::process::id()));
        std::fs::write(&path, "[general]\nsharedKeySalt = \"pepper\"\n").unwrap();

        let (used, config) = load(RuntimeEnvironment::Lambda, Some(&path)).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.general.shared_key_salt, "pepper");
        std::fs::remove_file(&path).unwrap();
    }
}
