use thiserror::Error;

/// Start refused before anything was spawned. The user can fix all of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Precondition {
    #[error("acceptance not granted")]
    AcceptanceNotGranted,
    #[error("no runnable artifact")]
    NoRunnableArtifact,
    #[error("runtime not installed")]
    RuntimeNotInstalled,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Precondition(#[from] Precondition),

    #[error("already running")]
    Conflict,

    #[error("launch failed: {0}")]
    Launch(String),

    #[error("not running")]
    NotRunning,

    #[error("empty input")]
    EmptyInput,

    /// Writing an interactive command to the process failed.
    #[error("write to process stdin failed: {0}")]
    Input(String),
}

impl SupervisorError {
    /// Short machine-readable code, used by the console front-end.
    pub fn code(&self) -> &'static str {
        match self {
            SupervisorError::Precondition(_) => "precondition",
            SupervisorError::Conflict => "conflict",
            SupervisorError::Launch(_) => "launch_failed",
            SupervisorError::NotRunning => "not_running",
            SupervisorError::EmptyInput => "empty_input",
            SupervisorError::Input(_) => "input_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

pub(crate) fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_messages_match_reasons() {
        let err: SupervisorError = Precondition::AcceptanceNotGranted.into();
        assert_eq!(err.to_string(), "acceptance not granted");
        assert_eq!(
            SupervisorError::from(Precondition::NoRunnableArtifact).to_string(),
            "no runnable artifact"
        );
        assert_eq!(
            SupervisorError::from(Precondition::RuntimeNotInstalled).to_string(),
            "runtime not installed"
        );
        assert_eq!(err.code(), "precondition");
    }

    #[test]
    fn launch_error_keeps_detail() {
        let err = SupervisorError::Launch("spawn java: permission denied".to_string());
        assert!(err.to_string().contains("permission denied"));
        assert_eq!(err.code(), "launch_failed");
    }

    #[test]
    fn error_chain_is_flattened_and_deduplicated() {
        let err = anyhow::anyhow!("permission denied")
            .context("spawn process")
            .context("spawn process");
        assert_eq!(format_error_chain(&err), "spawn process: permission denied");
    }
}
