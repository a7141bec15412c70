//! Scheduler configuration
//!
//! Defines the configurable parameters for the scheduler: where jobs are
//! persisted, which container CLI runs them, deadlines for runtime calls and
//! the resource defaults applied to new jobs.

use std::time::Duration;

/// Container CLIs the runtime knows how to drive
pub const SUPPORTED_RUNTIMES: &[&str] = &["podman", "docker"];

const DEFAULT_DATABASE_URL: &str = "sqlite://minihpc.db";
const DEFAULT_RUNTIME: &str = "podman";
const DEFAULT_MEMORY: u64 = 1024 * 1024 * 1024;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database URL (e.g., "sqlite://minihpc.db")
    pub database_url: String,

    /// Container CLI binary used by the runtime ("podman" or "docker")
    pub runtime: String,

    /// Deadline for each pull/create/start/logs/remove call
    pub call_timeout: Duration,

    /// Deadline for a container to exit once started
    pub job_timeout: Duration,

    /// CPU cores assigned to jobs that do not ask for a specific amount
    pub default_cpu: u32,

    /// Memory ceiling in bytes for jobs that do not ask for a specific amount
    pub default_memory: u64,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(database_url: String, runtime: String) -> Self {
        Self {
            database_url,
            runtime,
            call_timeout: Duration::from_secs(600),
            job_timeout: Duration::from_secs(3600),
            default_cpu: 1,
            default_memory: DEFAULT_MEMORY,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - MINIHPC_DATABASE_URL (default: sqlite://minihpc.db)
    /// - MINIHPC_RUNTIME (default: podman)
    /// - MINIHPC_CALL_TIMEOUT (seconds, default: 600)
    /// - MINIHPC_JOB_TIMEOUT (seconds, default: 3600)
    /// - MINIHPC_DEFAULT_CPU (cores, default: 1)
    /// - MINIHPC_DEFAULT_MEMORY (bytes, default: 1 GiB)
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("MINIHPC_DATABASE_URL")
            .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string());

        let runtime =
            std::env::var("MINIHPC_RUNTIME").unwrap_or_else(|_| DEFAULT_RUNTIME.to_string());

        let mut config = Self::new(database_url, runtime);

        if let Some(secs) = parse_var::<u64>("MINIHPC_CALL_TIMEOUT")? {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>("MINIHPC_JOB_TIMEOUT")? {
            config.job_timeout = Duration::from_secs(secs);
        }
        if let Some(cpu) = parse_var::<u32>("MINIHPC_DEFAULT_CPU")? {
            config.default_cpu = cpu;
        }
        if let Some(memory) = parse_var::<u64>("MINIHPC_DEFAULT_MEMORY")? {
            config.default_memory = memory;
        }

        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.database_url.is_empty() {
            anyhow::bail!("database_url cannot be empty");
        }

        if !self.database_url.starts_with("sqlite:") {
            anyhow::bail!("database_url must start with sqlite:");
        }

        if !SUPPORTED_RUNTIMES.contains(&self.runtime.as_str()) {
            anyhow::bail!(
                "runtime must be one of {}, got '{}'",
                SUPPORTED_RUNTIMES.join(", "),
                self.runtime
            );
        }

        if self.call_timeout.is_zero() {
            anyhow::bail!("call_timeout must be greater than 0");
        }

        if self.job_timeout.is_zero() {
            anyhow::bail!("job_timeout must be greater than 0");
        }

        if self.default_cpu == 0 {
            anyhow::bail!("default_cpu must be greater than 0");
        }

        if self.default_memory == 0 {
            anyhow::bail!("default_memory must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(DEFAULT_DATABASE_URL.to_string(), DEFAULT_RUNTIME.to_string())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}
