//! Supervisor for locally running game server processes.
//!
//! [`ProcessManager`] starts a server in its instance directory, streams its
//! sanitized console output to an observer, forwards console commands and
//! stops it with a graceful command before falling back to a kill.

pub mod config;
pub mod console;
pub mod download;
pub mod error;
pub mod launch;
pub mod layout;
pub mod output;
pub mod process_manager;
mod registry;
pub mod sanitize;

pub use config::SupervisorConfig;
pub use error::{Precondition, SupervisorError};
pub use launch::{ArtifactRule, LaunchProfile};
pub use output::{LogObserver, NoopObserver};
pub use process_manager::{ProcessManager, StopPhase, StopReport};
pub use registry::{ExitInfo, ExitSignal};
