//! Precedence resolution for the data directory, serve settings and daemon URL.
//!
//! ## Data directory (highest to lowest)
//!
//! 1. `--data-dir`
//! 2. `AGENTMESH_DATA_DIR`
//! 3. `~/.agentmesh`
//!
//! ## Serve settings
//!
//! 1. CLI flags
//! 2. `config.kdl` in the data directory
//! 3. Built-in defaults
//!
//! ## Daemon URL
//!
//! 1. `--daemon-url`
//! 2. `AGENTMESH_DAEMON_URL`
//! 3. `http://127.0.0.1:8321`

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};

use super::schema::AgentMeshConfig;
use crate::client::DEFAULT_DAEMON_URL;
use crate::daemon::{DEFAULT_HOST, DEFAULT_PORT};
use crate::{Error, Result};

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV: &str = "AGENTMESH_DATA_DIR";

/// Environment variable overriding the daemon URL used by clients.
pub const DAEMON_URL_ENV: &str = "AGENTMESH_DAEMON_URL";

/// Data directory name under the home directory.
pub const DEFAULT_DATA_DIR_NAME: &str = ".agentmesh";

/// Tracks where a resolved value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueSource {
    /// Value from CLI flag
    CliFlag,
    /// Value from environment variable
    EnvVar(String),
    /// Value from config.kdl
    ConfigFile,
    /// Built-in default value
    Default,
}

impl fmt::Display for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueSource::CliFlag => write!(f, "cli"),
            ValueSource::EnvVar(name) => write!(f, "env:{}", name),
            ValueSource::ConfigFile => write!(f, "config"),
            ValueSource::Default => write!(f, "default"),
        }
    }
}

/// A resolved value with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    /// The resolved value
    pub value: T,
    /// Where the value came from
    pub source: ValueSource,
}

impl<T> Resolved<T> {
    pub fn new(value: T, source: ValueSource) -> Self {
        Self { value, source }
    }
}

/// CLI overrides for serve settings.
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub bootstrap: Option<PathBuf>,
}

/// Fully resolved serve settings with source tracking.
#[derive(Debug, Clone)]
pub struct ResolvedServe {
    pub host: Resolved<String>,
    pub port: Resolved<u16>,
    /// Bootstrap file for static discovery; no default
    pub bootstrap: Option<Resolved<PathBuf>>,
}

impl ResolvedServe {
    pub fn host(&self) -> &str {
        &self.host.value
    }

    pub fn port(&self) -> u16 {
        self.port.value
    }

    pub fn bootstrap(&self) -> Option<&Path> {
        self.bootstrap.as_ref().map(|r| r.value.as_path())
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

/// Resolve the data directory from the flag and the process environment.
pub fn resolve_data_dir(flag: Option<&Path>) -> Result<Resolved<PathBuf>> {
    resolve_data_dir_from(flag, std::env::var_os(DATA_DIR_ENV))
}

/// Resolve the data directory from explicit inputs.
///
/// The result is absolute so it can be handed to a detached child process.
pub fn resolve_data_dir_from(
    flag: Option<&Path>,
    env: Option<OsString>,
) -> Result<Resolved<PathBuf>> {
    let resolved = if let Some(path) = flag {
        Resolved::new(expand_tilde(path), ValueSource::CliFlag)
    } else if let Some(path) = env.filter(|value| !value.is_empty()) {
        Resolved::new(
            expand_tilde(Path::new(&path)),
            ValueSource::EnvVar(DATA_DIR_ENV.to_string()),
        )
    } else {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Other("Cannot determine home directory".to_string()))?;
        Resolved::new(home.join(DEFAULT_DATA_DIR_NAME), ValueSource::Default)
    };

    let value = std::path::absolute(&resolved.value)?;
    Ok(Resolved::new(value, resolved.source))
}

/// Resolve serve settings against `config.kdl` in `data_dir`.
pub fn resolve_serve(data_dir: &Path, overrides: &ServeOverrides) -> Result<ResolvedServe> {
    let config = AgentMeshConfig::load_from_data_dir(data_dir)?;
    Ok(resolve_serve_with(&config, overrides))
}

/// Resolve serve settings against an already loaded config.
pub fn resolve_serve_with(config: &AgentMeshConfig, overrides: &ServeOverrides) -> ResolvedServe {
    let host = if let Some(ref host) = overrides.host {
        Resolved::new(host.clone(), ValueSource::CliFlag)
    } else if let Some(ref host) = config.host {
        Resolved::new(host.clone(), ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_HOST.to_string(), ValueSource::Default)
    };

    let port = if let Some(port) = overrides.port {
        Resolved::new(port, ValueSource::CliFlag)
    } else if let Some(port) = config.port {
        Resolved::new(port, ValueSource::ConfigFile)
    } else {
        Resolved::new(DEFAULT_PORT, ValueSource::Default)
    };

    let bootstrap = if let Some(ref path) = overrides.bootstrap {
        Some(Resolved::new(expand_tilde(path), ValueSource::CliFlag))
    } else {
        config
            .bootstrap
            .as_ref()
            .map(|path| Resolved::new(expand_tilde(path), ValueSource::ConfigFile))
    };

    ResolvedServe {
        host,
        port,
        bootstrap,
    }
}

/// Resolve the daemon URL from the flag and the process environment.
pub fn resolve_daemon_url(flag: Option<&str>) -> Resolved<String> {
    resolve_daemon_url_from(flag, std::env::var(DAEMON_URL_ENV).ok())
}

/// Resolve the daemon URL from explicit inputs.
pub fn resolve_daemon_url_from(flag: Option<&str>, env: Option<String>) -> Resolved<String> {
    if let Some(url) = flag.filter(|url| !url.is_empty()) {
        Resolved::new(url.to_string(), ValueSource::CliFlag)
    } else if let Some(url) = env.filter(|url| !url.is_empty()) {
        Resolved::new(url, ValueSource::EnvVar(DAEMON_URL_ENV.to_string()))
    } else {
        Resolved::new(DEFAULT_DAEMON_URL.to_string(), ValueSource::Default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_value_source_display() {
        assert_eq!(ValueSource::CliFlag.to_string(), "cli");
        assert_eq!(
            ValueSource::EnvVar(DATA_DIR_ENV.into()).to_string(),
            "env:AGENTMESH_DATA_DIR"
        );
        assert_eq!(ValueSource::ConfigFile.to_string(), "config");
        assert_eq!(ValueSource::Default.to_string(), "default");
    }

    #[test]
    fn test_data_dir_flag_wins() {
        let resolved = resolve_data_dir_from(
            Some(Path::new("/tmp/flag")),
            Some(OsString::from("/tmp/env")),
        )
        .unwrap();
        assert_eq!(resolved.value, PathBuf::from("/tmp/flag"));
        assert_eq!(resolved.source, ValueSource::CliFlag);
    }

    #[test]
    fn test_data_dir_env_over_default() {
        let resolved = resolve_data_dir_from(None, Some(OsString::from("/tmp/env"))).unwrap();
        assert_eq!(resolved.value, PathBuf::from("/tmp/env"));
        assert_eq!(resolved.source, ValueSource::EnvVar(DATA_DIR_ENV.into()));
    }

    #[test]
    fn test_data_dir_default() {
        let resolved = resolve_data_dir_from(None, Some(OsString::new())).unwrap();
        assert!(resolved.value.ends_with(DEFAULT_DATA_DIR_NAME));
        assert_eq!(resolved.source, ValueSource::Default);
    }

    #[test]
    fn test_data_dir_relative_flag_is_made_absolute() {
        let resolved = resolve_data_dir_from(Some(Path::new("relative/dir")), None).unwrap();
        assert!(resolved.value.is_absolute());
        assert!(resolved.value.ends_with("relative/dir"));
    }

    #[test]
    fn test_expand_tilde() {
        let home = dirs::home_dir().unwrap();
        assert_eq!(expand_tilde(Path::new("~/.agentmesh")), home.join(".agentmesh"));
        assert_eq!(expand_tilde(Path::new("~")), home);
        assert_eq!(expand_tilde(Path::new("/abs/~x")), PathBuf::from("/abs/~x"));
    }

    #[test]
    #[serial]
    fn test_resolve_data_dir_reads_environment() {
        let temp = TempDir::new().unwrap();
        // SAFETY: serialized with every other test touching the environment
        unsafe { std::env::set_var(DATA_DIR_ENV, temp.path()) };
        let resolved = resolve_data_dir(None).unwrap();
        unsafe { std::env::remove_var(DATA_DIR_ENV) };

        assert_eq!(resolved.value, temp.path());
        assert_eq!(resolved.source, ValueSource::EnvVar(DATA_DIR_ENV.into()));
    }

    #[test]
    fn test_serve_precedence() {
        let config = AgentMeshConfig {
            host: Some("0.0.0.0".into()),
            port: Some(9000),
            bootstrap: Some(PathBuf::from("/etc/bootstrap.json")),
        };

        let resolved = resolve_serve_with(&config, &ServeOverrides::default());
        assert_eq!(resolved.host(), "0.0.0.0");
        assert_eq!(resolved.host.source, ValueSource::ConfigFile);
        assert_eq!(resolved.port(), 9000);
        assert_eq!(resolved.bootstrap(), Some(Path::new("/etc/bootstrap.json")));

        let overrides = ServeOverrides {
            host: None,
            port: Some(18321),
            bootstrap: None,
        };
        let resolved = resolve_serve_with(&config, &overrides);
        assert_eq!(resolved.port(), 18321);
        assert_eq!(resolved.port.source, ValueSource::CliFlag);
        assert_eq!(resolved.host.source, ValueSource::ConfigFile);
    }

    #[test]
    fn test_serve_defaults() {
        let resolved = resolve_serve_with(&AgentMeshConfig::default(), &ServeOverrides::default());
        assert_eq!(resolved.host(), DEFAULT_HOST);
        assert_eq!(resolved.port(), DEFAULT_PORT);
        assert_eq!(resolved.port.source, ValueSource::Default);
        assert!(resolved.bootstrap().is_none());
    }

    #[test]
    fn test_resolve_serve_reads_config_file() {
        let temp = TempDir::new().unwrap();
        AgentMeshConfig {
            host: None,
            port: Some(18400),
            bootstrap: None,
        }
        .save(&temp.path().join(crate::config::CONFIG_FILE_NAME))
        .unwrap();

        let resolved = resolve_serve(temp.path(), &ServeOverrides::default()).unwrap();
        assert_eq!(resolved.port(), 18400);
        assert_eq!(resolved.host(), DEFAULT_HOST);
    }

    #[test]
    fn test_daemon_url_precedence() {
        let flag = resolve_daemon_url_from(Some("http://flag:1"), Some("http://env:2".into()));
        assert_eq!(flag.value, "http://flag:1");
        assert_eq!(flag.source, ValueSource::CliFlag);

        let env = resolve_daemon_url_from(None, Some("http://env:2".into()));
        assert_eq!(env.value, "http://env:2");
        assert_eq!(env.source, ValueSource::EnvVar(DAEMON_URL_ENV.into()));

        let default = resolve_daemon_url_from(None, None);
        assert_eq!(default.value, DEFAULT_DAEMON_URL);
        assert_eq!(default.source, ValueSource::Default);
    }
}
