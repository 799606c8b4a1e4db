use anyhow::Context;

/// Worker process configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    /// PostgreSQL URL. Without it the worker keeps state in memory.
    pub database_url: Option<String>,
    /// Pool size (default: `20`).
    pub max_connections: u32,
    /// Emit JSON log lines instead of the human-readable format.
    pub json_logs: bool,
    /// Read newline-delimited JSON events from stdin (default: `true`).
    pub stdin_intake: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default |
    /// |----------------------------|---------|
    /// | `DATABASE_URL`             | unset   |
    /// | `DATABASE_MAX_CONNECTIONS` | `20`    |
    /// | `LOG_FORMAT`               | `text`  |
    /// | `EVENT_STDIN`              | `true`  |
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .ok()
            .filter(|url| !url.trim().is_empty());

        let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "20".into())
            .parse()
            .context("DATABASE_MAX_CONNECTIONS must be a valid u32")?;

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|format| format.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let stdin_intake: bool = std::env::var("EVENT_STDIN")
            .unwrap_or_else(|_| "true".into())
            .parse()
            .context("EVENT_STDIN must be true or false")?;

        Ok(Self {
            database_url,
            max_connections,
            json_logs,
            stdin_intake,
        })
    }
}
