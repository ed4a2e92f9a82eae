use std::time::{Duration, Instant};

use crate::config::ExecConfig;
use crate::error::Error;
use crate::types::Limits;

/// Time budget and declared memory ceiling for one invocation.
///
/// Only the wall clock is enforced. The memory ceiling is carried through to
/// the result so the host can apply it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceLimiter {
    time_budget: Duration,
    memory_bytes: Option<u64>,
}

impl ResourceLimiter {
    pub fn new(time_budget: Duration, memory_bytes: Option<u64>) -> Self {
        Self {
            time_budget,
            memory_bytes,
        }
    }

    /// Default budget, no memory ceiling.
    pub fn with_time_ms(time_ms: u64) -> Self {
        Self::new(Duration::from_millis(time_ms), None)
    }

    /// Validates caller limits against `config` and fills in the defaults.
    pub fn from_limits(limits: Option<&Limits>, config: &ExecConfig) -> Result<Self, Error> {
        let limits = limits.copied().unwrap_or_default();

        let time_ms = match limits.time_ms {
            Some(0) => {
                return Err(Error::Configuration(
                    "time_ms must be greater than 0".to_string(),
                ))
            }
            Some(ms) if ms > config.max_time_ms => {
                return Err(Error::Configuration(format!(
                    "time_ms {} exceeds the maximum of {}",
                    ms, config.max_time_ms
                )))
            }
            Some(ms) => ms,
            None => config.default_time_ms,
        };

        let memory_bytes = match limits.memory_bytes {
            Some(0) => {
                return Err(Error::Configuration(
                    "memory_bytes must be greater than 0".to_string(),
                ))
            }
            Some(bytes) if bytes > config.max_memory_bytes => {
                return Err(Error::Configuration(format!(
                    "memory_bytes {} exceeds the maximum of {}",
                    bytes, config.max_memory_bytes
                )))
            }
            Some(bytes) => Some(bytes),
            None => config.default_memory_bytes,
        };

        Ok(Self::new(Duration::from_millis(time_ms), memory_bytes))
    }

    pub fn time_budget(&self) -> Duration {
        self.time_budget
    }

    pub fn time_budget_ms(&self) -> u64 {
        self.time_budget.as_millis() as u64
    }

    pub fn memory_bytes(&self) -> Option<u64> {
        self.memory_bytes
    }

    pub fn deadline(&self, start: Instant) -> Instant {
        start + self.time_budget
    }

    /// Budget left since `start`; zero once exhausted.
    pub fn remaining(&self, start: Instant) -> Duration {
        self.time_budget.saturating_sub(start.elapsed())
    }

    pub fn check_timeout(&self, start: Instant) -> Result<(), Error> {
        if start.elapsed() >= self.time_budget {
            Err(Error::Timeout(self.time_budget_ms()))
        } else {
            Ok(())
        }
    }

    /// Whole seconds of CPU the child may use, as a kernel backstop to the wall clock.
    pub(crate) fn cpu_seconds(&self) -> u64 {
        let budget = self.time_budget;
        let secs = budget.as_secs() + u64::from(budget.subsec_nanos() > 0);
        secs + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply() {
        let config = ExecConfig::default();
        let limiter = ResourceLimiter::from_limits(None, &config).unwrap();
        assert_eq!(limiter.time_budget(), Duration::from_millis(5000));
        assert_eq!(limiter.memory_bytes(), None);

        let config = ExecConfig {
            default_memory_bytes: Some(64 * 1024 * 1024),
            ..ExecConfig::default()
        };
        let limits = Limits::time(50);
        let limiter = ResourceLimiter::from_limits(Some(&limits), &config).unwrap();
        assert_eq!(limiter.time_budget_ms(), 50);
        assert_eq!(limiter.memory_bytes(), Some(64 * 1024 * 1024));
    }

    #[test]
    fn test_invalid_limits() {
        let config = ExecConfig::default();
        for limits in [
            Limits::time(0),
            Limits::time(300_001),
            Limits {
                time_ms: None,
                memory_bytes: Some(0),
            },
            Limits {
                time_ms: None,
                memory_bytes: Some(3 * 1024 * 1024 * 1024),
            },
        ] {
            assert!(matches!(
                ResourceLimiter::from_limits(Some(&limits), &config),
                Err(Error::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_check_timeout() {
        let limiter = ResourceLimiter::with_time_ms(20);
        let start = Instant::now();
        assert!(limiter.check_timeout(start).is_ok());
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(limiter.check_timeout(start), Err(Error::Timeout(20))));
        assert_eq!(limiter.remaining(start), Duration::ZERO);
    }

    #[test]
    fn test_cpu_seconds_rounds_up() {
        assert_eq!(ResourceLimiter::with_time_ms(50).cpu_seconds(), 2);
        assert_eq!(ResourceLimiter::with_time_ms(5000).cpu_seconds(), 6);
    }
}
