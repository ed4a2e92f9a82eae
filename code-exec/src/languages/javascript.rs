use std::path::{Path, PathBuf};

use crate::{
    error::Error,
    executor::{LanguageExecutor, StageCommand},
    languages::resolve_tool,
    sandbox::Sandbox,
    types::Language,
};

pub struct JavaScriptExecutor {
    node: PathBuf,
}

impl JavaScriptExecutor {
    pub fn new(node: &str) -> Result<Self, Error> {
        Ok(Self {
            node: resolve_tool(node)?,
        })
    }
}

impl LanguageExecutor for JavaScriptExecutor {
    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn file_extension(&self) -> &str {
        "js"
    }

    fn tool(&self) -> &Path {
        &self.node
    }

    fn run_command(&self, _sandbox: &Sandbox, entry: &Path) -> StageCommand {
        StageCommand {
            program: self.node.clone(),
            args: vec![entry.display().to_string()],
        }
    }

    fn env(&self) -> Vec<(String, String)> {
        vec![("NODE_DISABLE_COLORS".to_string(), "1".to_string())]
    }
}
