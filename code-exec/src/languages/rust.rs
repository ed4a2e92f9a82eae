use std::path::{Path, PathBuf};

use crate::{
    error::Error,
    executor::{LanguageExecutor, StageCommand},
    languages::resolve_tool,
    sandbox::Sandbox,
    types::Language,
};

/// Binary produced by the compile stage, relative to the sandbox root and
/// outside the caller's files.
const OUTPUT_BINARY: &str = "build-main";

pub struct RustExecutor {
    rustc: PathBuf,
    /// Host rustup settings, needed when `rustc` is a rustup proxy.
    rustup_env: Vec<(String, String)>,
}

impl RustExecutor {
    pub fn new(rustc: &str) -> Result<Self, Error> {
        Ok(Self {
            rustc: resolve_tool(rustc)?,
            rustup_env: host_rustup_env(),
        })
    }

    pub fn output_binary(sandbox: &Sandbox) -> PathBuf {
        sandbox.root_dir.join(OUTPUT_BINARY)
    }
}

fn host_rustup_env() -> Vec<(String, String)> {
    let home = std::env::var("HOME").ok().map(PathBuf::from);
    let mut env = Vec::new();

    for (var, default_dir) in [("RUSTUP_HOME", ".rustup"), ("CARGO_HOME", ".cargo")] {
        let value = std::env::var(var).ok().or_else(|| {
            home.as_ref()
                .map(|home| home.join(default_dir))
                .filter(|dir| dir.is_dir())
                .map(|dir| dir.display().to_string())
        });
        if let Some(value) = value {
            env.push((var.to_string(), value));
        }
    }
    if let Ok(toolchain) = std::env::var("RUSTUP_TOOLCHAIN") {
        env.push(("RUSTUP_TOOLCHAIN".to_string(), toolchain));
    }
    env
}

impl LanguageExecutor for RustExecutor {
    fn language(&self) -> Language {
        Language::Rust
    }

    fn file_extension(&self) -> &str {
        "rs"
    }

    fn tool(&self) -> &Path {
        &self.rustc
    }

    fn compile_command(&self, sandbox: &Sandbox, entry: &Path) -> Option<StageCommand> {
        Some(StageCommand {
            program: self.rustc.clone(),
            args: vec![
                "--edition".to_string(),
                "2021".to_string(),
                "--crate-name".to_string(),
                "main".to_string(),
                "--color".to_string(),
                "never".to_string(),
                "-o".to_string(),
                Self::output_binary(sandbox).display().to_string(),
                entry.display().to_string(),
            ],
        })
    }

    fn run_command(&self, sandbox: &Sandbox, _entry: &Path) -> StageCommand {
        StageCommand {
            program: Self::output_binary(sandbox),
            args: Vec::new(),
        }
    }

    fn compile_env(&self) -> Vec<(String, String)> {
        self.rustup_env.clone()
    }
}
