//! Engine configuration.
//!
//! Values come from built-in defaults, optionally overridden by a TOML file and
//! then by `CODE_EXEC_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Wall-clock budget used when a caller supplies no `time_ms`.
pub const DEFAULT_TIME_MS: u64 = 5000;

pub mod env_vars {
    pub const DEFAULT_TIME_MS: &str = "CODE_EXEC_DEFAULT_TIME_MS";
    pub const MAX_TIME_MS: &str = "CODE_EXEC_MAX_TIME_MS";
    pub const DEFAULT_MEMORY_BYTES: &str = "CODE_EXEC_DEFAULT_MEMORY_BYTES";
    pub const MAX_MEMORY_BYTES: &str = "CODE_EXEC_MAX_MEMORY_BYTES";
    pub const MAX_FILE_SIZE_BYTES: &str = "CODE_EXEC_MAX_FILE_SIZE_BYTES";
    pub const MAX_OUTPUT_BYTES: &str = "CODE_EXEC_MAX_OUTPUT_BYTES";
    pub const MAX_CONCURRENT: &str = "CODE_EXEC_MAX_CONCURRENT";
    pub const SANDBOX_ROOT: &str = "CODE_EXEC_SANDBOX_ROOT";
    pub const SESSION_TTL_SECS: &str = "CODE_EXEC_SESSION_TTL_SECS";
    pub const MAX_SESSIONS: &str = "CODE_EXEC_MAX_SESSIONS";
    pub const PYTHON: &str = "CODE_EXEC_PYTHON";
    pub const NODE: &str = "CODE_EXEC_NODE";
    pub const RUSTC: &str = "CODE_EXEC_RUSTC";
}

/// Executables used by the language backends. Bare names are resolved on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    pub python: String,
    pub node: String,
    pub rustc: String,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            node: "node".to_string(),
            rustc: "rustc".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    pub default_time_ms: u64,
    pub max_time_ms: u64,
    /// Memory ceiling reported when the caller gives none.
    pub default_memory_bytes: Option<u64>,
    pub max_memory_bytes: u64,
    pub max_file_size_bytes: usize,
    /// Per-stream capture ceiling; the rest of the stream is discarded.
    pub max_output_bytes: usize,
    pub max_concurrent_executions: usize,
    /// Directory under which per-call sandboxes are created.
    pub sandbox_root: PathBuf,
    pub session_ttl_secs: u64,
    pub max_sessions: usize,
    pub toolchains: ToolchainConfig,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            default_time_ms: DEFAULT_TIME_MS,
            max_time_ms: 300_000,
            default_memory_bytes: None,
            max_memory_bytes: 2 * 1024 * 1024 * 1024,
            max_file_size_bytes: 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            max_concurrent_executions: 10,
            sandbox_root: std::env::temp_dir(),
            session_ttl_secs: 30 * 60,
            max_sessions: 1024,
            toolchains: ToolchainConfig::default(),
        }
    }
}

impl ExecConfig {
    /// Loads the configuration: defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, Error> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, Error> {
        toml::from_str(raw).map_err(|e| Error::Configuration(format!("Invalid TOML: {}", e)))
    }

    pub fn apply_env(&mut self) -> Result<(), Error> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Applies overrides from `lookup`, keyed by the names in [`env_vars`].
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_var(&lookup, env_vars::DEFAULT_TIME_MS)? {
            self.default_time_ms = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_TIME_MS)? {
            self.max_time_ms = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::DEFAULT_MEMORY_BYTES)? {
            self.default_memory_bytes = Some(v);
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_MEMORY_BYTES)? {
            self.max_memory_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_FILE_SIZE_BYTES)? {
            self.max_file_size_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_OUTPUT_BYTES)? {
            self.max_output_bytes = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_CONCURRENT)? {
            self.max_concurrent_executions = v;
        }
        if let Some(v) = lookup(env_vars::SANDBOX_ROOT) {
            self.sandbox_root = PathBuf::from(v);
        }
        if let Some(v) = parse_var(&lookup, env_vars::SESSION_TTL_SECS)? {
            self.session_ttl_secs = v;
        }
        if let Some(v) = parse_var(&lookup, env_vars::MAX_SESSIONS)? {
            self.max_sessions = v;
        }
        if let Some(v) = lookup(env_vars::PYTHON) {
            self.toolchains.python = v;
        }
        if let Some(v) = lookup(env_vars::NODE) {
            self.toolchains.node = v;
        }
        if let Some(v) = lookup(env_vars::RUSTC) {
            self.toolchains.rustc = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.default_time_ms == 0 {
            return Err(Error::Configuration(
                "default_time_ms must be greater than 0".to_string(),
            ));
        }
        if self.default_time_ms > self.max_time_ms {
            return Err(Error::Configuration(format!(
                "default_time_ms ({}) exceeds max_time_ms ({})",
                self.default_time_ms, self.max_time_ms
            )));
        }
        if self.max_memory_bytes == 0 {
            return Err(Error::Configuration(
                "max_memory_bytes must be greater than 0".to_string(),
            ));
        }
        if let Some(memory) = self.default_memory_bytes {
            if memory == 0 || memory > self.max_memory_bytes {
                return Err(Error::Configuration(format!(
                    "default_memory_bytes must be in 1..={}",
                    self.max_memory_bytes
                )));
            }
        }
        if self.max_file_size_bytes == 0 {
            return Err(Error::Configuration(
                "max_file_size_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_output_bytes == 0 {
            return Err(Error::Configuration(
                "max_output_bytes must be greater than 0".to_string(),
            ));
        }
        if self.max_concurrent_executions == 0 {
            return Err(Error::Configuration(
                "max_concurrent_executions must be greater than 0".to_string(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(Error::Configuration(
                "max_sessions must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> Result<Option<T>, Error>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Configuration(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}
