use std::time::Duration;

use crate::launch::{ArtifactRule, LaunchProfile};

const DEFAULT_STOP_GRACE_MS: u64 = 5000;
const DEFAULT_STOP_POLL_MS: u64 = 200;
const DEFAULT_STOP_COMMAND: &str = "stop";
const DEFAULT_OUTPUT_CAPACITY: usize = 1024;
const DEFAULT_LOG_MAX_LINES: usize = 1000;

pub const DEFAULT_SERVER_JAR: &str = "paper-1.21.8-60.jar";
pub const DEFAULT_SERVER_JAR_URL: &str = "https://fill-data.papermc.io/v1/objects/8de7c52c3b02403503d16fac58003f1efef7dd7a0256786843927fa92ee57f1e/paper-1.21.8-60.jar";

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Knobs for the supervisor itself. Per-launch settings live in [`LaunchProfile`].
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// How long a stopping process gets after the graceful command before it is killed.
    pub grace_period: Duration,
    pub poll_interval: Duration,
    /// Console command written to stdin to request a clean shutdown.
    pub stop_command: String,
    /// Capacity of each instance's live output channel.
    pub output_capacity: usize,
    /// Lines kept per instance for `tail_logs`.
    pub log_max_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_millis(DEFAULT_STOP_GRACE_MS),
            poll_interval: Duration::from_millis(DEFAULT_STOP_POLL_MS),
            stop_command: DEFAULT_STOP_COMMAND.to_string(),
            output_capacity: DEFAULT_OUTPUT_CAPACITY,
            log_max_lines: DEFAULT_LOG_MAX_LINES,
        }
    }
}

impl SupervisorConfig {
    pub fn from_env() -> Self {
        let grace_ms = env_u64("MCSM_STOP_GRACE_MS")
            .map(|v| v.clamp(200, 10 * 60 * 1000))
            .unwrap_or(DEFAULT_STOP_GRACE_MS);
        let poll_ms = env_u64("MCSM_STOP_POLL_MS")
            .map(|v| v.clamp(10, 5000))
            .unwrap_or(DEFAULT_STOP_POLL_MS);

        Self {
            grace_period: Duration::from_millis(grace_ms),
            poll_interval: Duration::from_millis(poll_ms),
            stop_command: env_string("MCSM_STOP_COMMAND")
                .unwrap_or_else(|| DEFAULT_STOP_COMMAND.to_string()),
            output_capacity: env_usize("MCSM_OUTPUT_CAPACITY")
                .map(|v| v.clamp(16, 65_536))
                .unwrap_or(DEFAULT_OUTPUT_CAPACITY),
            log_max_lines: env_usize("MCSM_LOG_MAX_LINES")
                .map(|v| v.clamp(100, 50_000))
                .unwrap_or(DEFAULT_LOG_MAX_LINES),
        }
    }
}

/// Paper server launched as `java -Xmx1G -Xms1G -jar <jar> nogui`.
pub fn paper_profile_from_env() -> LaunchProfile {
    let mut runtime_args: Vec<String> = env_string("MCSM_JAVA_ARGS")
        .map(|v| v.split_whitespace().map(str::to_string).collect())
        .unwrap_or_else(|| vec!["-Xmx1G".to_string(), "-Xms1G".to_string()]);
    runtime_args.push("-jar".to_string());

    LaunchProfile {
        runtime: env_string("MCSM_JAVA").unwrap_or_else(|| "java".to_string()),
        runtime_args,
        artifact_args: vec!["nogui".to_string()],
        artifact: ArtifactRule {
            expected_name: env_string("MCSM_SERVER_JAR")
                .unwrap_or_else(|| DEFAULT_SERVER_JAR.to_string()),
            prefix: "paper".to_string(),
            extension: "jar".to_string(),
        },
    }
}

pub fn server_jar_url() -> String {
    env_string("MCSM_SERVER_JAR_URL").unwrap_or_else(|| DEFAULT_SERVER_JAR_URL.to_string())
}
