pub mod defaults {
    use crate::{CodeExecutionService, ExecConfig, Limits};
    use tokio::time::Duration;

    pub fn test_config() -> ExecConfig {
        ExecConfig {
            max_output_bytes: 64 * 1024,
            ..ExecConfig::default()
        }
    }

    pub fn test_service() -> CodeExecutionService {
        CodeExecutionService::new(test_config()).expect("default test config is valid")
    }

    pub fn default_limits() -> Limits {
        Limits::time(5_000)
    }

    /// Rust compilation is slow on loaded CI machines.
    pub fn extended_limits() -> Limits {
        Limits::time(60_000)
    }

    /// Upper bound on how long a timed out run may take past its budget.
    pub fn timeout_overhead() -> Duration {
        Duration::from_secs(2)
    }
}

pub mod requests {
    use crate::{File, Language, Limits, RunRequest};

    pub fn single_file(language: Language, code: &str) -> RunRequest {
        let name = match language {
            Language::Python => "main.py",
            Language::JavaScript => "main.js",
            Language::Rust => "main.rs",
        };
        RunRequest::new(language, File::new(name, code))
    }

    pub fn with_time(language: Language, code: &str, time_ms: u64) -> RunRequest {
        single_file(language, code).with_limits(Limits::time(time_ms))
    }
}
