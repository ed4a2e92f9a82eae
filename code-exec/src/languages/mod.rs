//! Language-specific executor implementations

mod javascript;
mod python;
pub mod rust;

pub use javascript::JavaScriptExecutor;
pub use python::PythonExecutor;
pub use rust::RustExecutor;

use std::path::{Path, PathBuf};
use which::which;

use crate::error::Error;

/// Resolves a configured toolchain to an executable path.
///
/// Names containing a path separator are used as given; bare names are looked
/// up on `PATH`.
pub(crate) fn resolve_tool(tool: &str) -> Result<PathBuf, Error> {
    if tool.contains('/') {
        let path = Path::new(tool);
        if path.is_file() {
            return Ok(path.to_path_buf());
        }
        return Err(Error::HostInternal(format!("Toolchain not found: {}", tool)));
    }
    which(tool).map_err(|e| Error::HostInternal(format!("Toolchain {} not available: {}", tool, e)))
}

pub(crate) fn check_command(cmd: &str) -> bool {
    which(cmd).is_ok()
}

#[cfg(test)]
pub(crate) fn skip_if_not_available(tools: &[&str]) -> bool {
    let missing: Vec<_> = tools
        .iter()
        .filter(|tool| !check_command(tool))
        .map(|s| (*s).to_string())
        .collect();

    if !missing.is_empty() {
        eprintln!("Skipping test: {} not available", missing.join(", "));
        return true;
    }
    false
}
