use std::time::Duration;

/// Environment variable naming the cursor-agent executable.
pub const EXECUTABLE_ENV: &str = "CURSOR_AGENT_EXECUTABLE";
/// Environment variable with extra arguments, split with shell quoting rules.
pub const EXTRA_ARGS_ENV: &str = "CURSOR_AGENT_ARGS";

const DEFAULT_EXECUTABLE: &str = "cursor-agent";

/// How long a turn waits for buffered stdout after the process exited.
pub const DRAIN_GRACE: Duration = Duration::from_millis(500);
/// How long a cancelled process gets between SIGTERM and a forced kill.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// How the `cursor-agent` process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Path or bare command name, resolved through `PATH` when bare.
    pub executable: String,
    /// Appended after the streaming flags and before the prompt.
    pub extra_args: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            executable: DEFAULT_EXECUTABLE.to_string(),
            extra_args: Vec::new(),
        }
    }
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let executable = lookup(EXECUTABLE_ENV)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_EXECUTABLE.to_string());
        let extra_args = lookup(EXTRA_ARGS_ENV)
            .and_then(|s| shlex::split(&s))
            .unwrap_or_default();
        Self {
            executable,
            extra_args,
        }
    }

    /// Command-line values win over the environment.
    pub fn with_executable(mut self, executable: Option<String>) -> Self {
        if let Some(executable) = executable.filter(|e| !e.trim().is_empty()) {
            self.executable = executable;
        }
        self
    }
}
