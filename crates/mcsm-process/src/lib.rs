use std::fmt;

/// Name of a server directory under the data root.
///
/// NOTE: The id doubles as the directory name, so it stays stable for the
/// directory's lifetime and is never generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstanceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum InstanceState {
    Starting,
    Running,
    Stopping,
    Exited,
}

impl InstanceState {
    pub fn is_live(self) -> bool {
        !matches!(self, InstanceState::Exited)
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct InstanceStatus {
    pub id: InstanceId,
    pub state: InstanceState,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub message: Option<String>,
}

/// One sanitized line of console output.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogLine {
    pub instance: InstanceId,
    pub text: String,
}

impl LogLine {
    pub fn new(instance: InstanceId, text: impl Into<String>) -> Self {
        Self {
            instance,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_id_displays_raw_name() {
        let id = InstanceId::from("server1");
        assert_eq!(id.to_string(), "server1");
        assert_eq!(id.as_str(), "server1");
    }

    #[test]
    fn exited_is_not_live() {
        assert!(InstanceState::Starting.is_live());
        assert!(InstanceState::Running.is_live());
        assert!(InstanceState::Stopping.is_live());
        assert!(!InstanceState::Exited.is_live());
    }

    #[test]
    fn status_serializes_state_by_name() {
        let st = InstanceStatus {
            id: InstanceId::from("server2"),
            state: InstanceState::Running,
            pid: Some(42),
            exit_code: None,
            message: None,
        };
        let v = serde_json::to_value(&st).unwrap();
        assert_eq!(v["id"], "server2");
        assert_eq!(v["state"], "Running");
        assert_eq!(v["pid"], 42);
    }
}
