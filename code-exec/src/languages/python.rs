use std::path::{Path, PathBuf};

use crate::{
    error::Error,
    executor::{LanguageExecutor, StageCommand},
    languages::resolve_tool,
    sandbox::Sandbox,
    types::Language,
};

pub struct PythonExecutor {
    python: PathBuf,
}

impl PythonExecutor {
    pub fn new(python: &str) -> Result<Self, Error> {
        Ok(Self {
            python: resolve_tool(python)?,
        })
    }
}

impl LanguageExecutor for PythonExecutor {
    fn language(&self) -> Language {
        Language::Python
    }

    fn file_extension(&self) -> &str {
        "py"
    }

    fn tool(&self) -> &Path {
        &self.python
    }

    fn run_command(&self, _sandbox: &Sandbox, entry: &Path) -> StageCommand {
        StageCommand {
            program: self.python.clone(),
            args: vec![entry.display().to_string()],
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        // Unbuffered so output written before a kill is still captured.
        vec![
            ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
            ("PYTHONDONTWRITEBYTECODE".to_string(), "1".to_string()),
            ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
        ]
    }
}
