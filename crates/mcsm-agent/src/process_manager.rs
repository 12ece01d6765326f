use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use mcsm_process::{InstanceId, InstanceStatus, LogLine};
use tokio::{
    process::{Child, Command},
    sync::{Notify, broadcast, watch},
};

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError, format_error_chain};
use crate::launch::{LaunchProfile, LaunchSpec};
use crate::output::{LogObserver, LogSink, OutputReader, output_pipe, spawn_output_reader};
use crate::registry::{ExitInfo, ExitSignal, InstanceHandle, InstanceRegistry};

/// Where the two-phase stop protocol is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopPhase {
    Running,
    /// Graceful command sent; waiting for the process to exit by itself.
    GracePeriod,
    /// Grace period ran out; the process is being killed.
    Terminating,
    Exited,
}

#[derive(Debug, Clone)]
pub struct StopReport {
    pub reason: &'static str,
    /// `Exited` when the process left during the grace period, `Terminating` when it was killed.
    pub phase: StopPhase,
    pub forced: bool,
    /// Stop returns at the decision point; await this to confirm the exit.
    pub exit: ExitSignal,
}

#[cfg(target_os = "linux")]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    // If the supervisor dies, the server gets SIGTERM instead of lingering.
    let rc = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(all(unix, not(target_os = "linux")))]
unsafe fn set_parent_death_signal() -> std::io::Result<()> {
    Ok(())
}

fn describe_exit(status: &std::io::Result<std::process::ExitStatus>, killed: bool) -> ExitInfo {
    match status {
        Ok(st) => {
            let message = match (killed, st.code()) {
                (true, _) => "killed after grace period".to_string(),
                (false, Some(0)) => "exited".to_string(),
                (false, Some(code)) => format!("exited with code {code}"),
                (false, None) => "terminated by signal".to_string(),
            };
            ExitInfo {
                exit_code: st.code(),
                killed,
                message,
            }
        }
        Err(err) => ExitInfo {
            exit_code: None,
            killed,
            message: format!("wait failed: {err}"),
        },
    }
}

/// Spawns the server with stdout and stderr sharing one pipe.
fn spawn_child(spec: &LaunchSpec, instance_dir: &Path) -> anyhow::Result<(Child, OutputReader)> {
    let (output, stdout) = output_pipe().context("create output pipe")?;
    let stderr = stdout.try_clone().context("clone output pipe")?;

    let mut cmd = Command::new(&spec.exec);
    cmd.args(&spec.args)
        .current_dir(instance_dir)
        .stdin(std::process::Stdio::piped())
        .stdout(stdout)
        .stderr(stderr);

    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                // Own session: the terminal's Ctrl-C stays with the supervisor,
                // and a kill can target the whole process group.
                set_parent_death_signal()?;
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
    }

    let child = cmd.spawn().with_context(|| {
        format!(
            "spawn process: exec={} (cwd {})",
            spec.exec.display(),
            instance_dir.display()
        )
    })?;
    // `cmd` still owns the parent's write ends; the reader gets EOF only once they close.
    drop(cmd);
    Ok((child, output))
}

#[derive(Clone, Default)]
pub struct ProcessManager {
    registry: InstanceRegistry,
    config: Arc<SupervisorConfig>,
}

impl ProcessManager {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            registry: InstanceRegistry::default(),
            config: Arc::new(config),
        }
    }

    /// Launches the server in `instance_dir` and starts draining its output.
    ///
    /// Checks, in order: acceptance marker, runnable artifact, runtime on
    /// `PATH`, no live entry for `id`. Every output line is handed to
    /// `observer` on the instance's reader task.
    pub async fn start(
        &self,
        id: &InstanceId,
        instance_dir: &Path,
        profile: &LaunchProfile,
        observer: Arc<dyn LogObserver>,
    ) -> Result<InstanceStatus> {
        let spec = profile.resolve(instance_dir)?;
        self.registry.reserve(id).await?;

        let sink = LogSink::new(
            id.clone(),
            self.config.log_max_lines,
            self.config.output_capacity,
        );
        sink.notice(format!(
            "[mcsm] exec: {} {} (cwd {})",
            spec.exec.display(),
            spec.args.join(" "),
            instance_dir.display()
        ))
        .await;

        let (mut child, output) = match spawn_child(&spec, instance_dir) {
            Ok(v) => v,
            Err(err) => {
                self.registry.release(id).await;
                let detail = format_error_chain(&err);
                tracing::warn!(instance = %id, error = %detail, "start failed");
                sink.notice(format!("[mcsm] start failed: {detail}")).await;
                return Err(SupervisorError::Launch(detail));
            }
        };

        let pid = child.id();
        let stdin = child.stdin.take();
        let output_task = spawn_output_reader(output, sink.clone(), observer);

        let (exit_tx, exit_rx) = watch::channel(None::<ExitInfo>);
        let kill = Arc::new(Notify::new());
        let handle = Arc::new(InstanceHandle::new(
            id.clone(),
            pid,
            stdin,
            exit_rx,
            kill.clone(),
            output_task,
            sink.clone(),
        ));

        // The waiter owns the child: it reaps the exit status and performs kills.
        tokio::spawn({
            let handle = handle.clone();
            let started = tokio::time::Instant::now();
            async move {
                let mut killed = false;
                let res = tokio::select! {
                    r = child.wait() => r,
                    _ = kill.notified() => {
                        killed = true;
                        #[cfg(unix)]
                        if let Some(pid) = pid {
                            unsafe {
                                libc::kill(-(pid as i32), libc::SIGKILL);
                            }
                        }
                        if let Err(e) = child.start_kill() {
                            tracing::debug!(instance = %handle.id, error = %e, "kill after exit");
                        }
                        child.wait().await
                    }
                };

                let info = describe_exit(&res, killed);
                handle.close_stdin().await;
                tracing::info!(
                    instance = %handle.id,
                    exit_code = ?info.exit_code,
                    killed,
                    "server process exited"
                );
                handle
                    .sink
                    .notice(format!(
                        "[mcsm] process exited: {} (exit_code={:?} runtime_ms={})",
                        info.message,
                        info.exit_code,
                        started.elapsed().as_millis()
                    ))
                    .await;
                let _ = exit_tx.send(Some(info));
            }
        });

        self.registry.publish(handle.clone()).await;
        tracing::info!(instance = %id, pid = ?pid, exec = %spec.exec.display(), "server started");

        let mut status = handle.status();
        status.message = Some("started".to_string());
        Ok(status)
    }

    async fn live_handle(&self, id: &InstanceId) -> Result<Arc<InstanceHandle>> {
        self.registry
            .get(id)
            .await
            .filter(|h| h.is_alive())
            .ok_or(SupervisorError::NotRunning)
    }

    /// Writes `text` as one console command. Surrounding whitespace is trimmed;
    /// blank input is rejected with [`SupervisorError::EmptyInput`].
    pub async fn send_input(&self, id: &InstanceId, text: &str) -> Result<()> {
        let handle = self.live_handle(id).await?;
        let cmd = text.trim();
        if cmd.is_empty() {
            return Err(SupervisorError::EmptyInput);
        }
        handle.write_line(cmd).await.map_err(|e| {
            tracing::warn!(instance = %id, error = %e, "send_input failed");
            SupervisorError::Input(e.to_string())
        })
    }

    /// Graceful command, bounded wait, then kill.
    ///
    /// Returns as soon as the outcome is decided. The process may still be
    /// going down after a kill; use [`StopReport::exit`] to wait for it.
    pub async fn stop(&self, id: &InstanceId) -> Result<StopReport> {
        let handle = self.live_handle(id).await?;
        handle.mark_stopping();

        let grace = self.config.grace_period;
        let poll = self.config.poll_interval.max(Duration::from_millis(1));
        handle
            .sink
            .notice(format!(
                "[mcsm] stop requested (grace_ms={})",
                grace.as_millis()
            ))
            .await;
        tracing::info!(instance = %id, grace_ms = grace.as_millis() as u64, "stopping server");

        let mut exit = handle.exit_signal();
        let started = tokio::time::Instant::now();
        let mut phase = StopPhase::Running;
        let mut forced = false;

        loop {
            phase = match phase {
                StopPhase::Running => {
                    // The process may already be gone, or no longer reading stdin
                    // while a blocked send_input holds the lock. Either way the
                    // attempt is bounded by the grace period it eats into.
                    match tokio::time::timeout(grace, handle.write_line(&self.config.stop_command))
                        .await
                    {
                        Ok(Ok(())) => {
                            handle
                                .sink
                                .notice("[mcsm] stop: sent graceful command")
                                .await;
                        }
                        Ok(Err(e)) => {
                            tracing::debug!(instance = %id, error = %e, "stop command not delivered");
                        }
                        Err(_) => {
                            tracing::debug!(instance = %id, "stop command write timed out");
                        }
                    }
                    StopPhase::GracePeriod
                }
                StopPhase::GracePeriod => {
                    let remaining = grace.saturating_sub(started.elapsed());
                    if exit.has_exited() {
                        StopPhase::Exited
                    } else if remaining.is_zero() {
                        StopPhase::Terminating
                    } else if tokio::time::timeout(remaining.min(poll), exit.wait())
                        .await
                        .is_ok()
                    {
                        StopPhase::Exited
                    } else {
                        StopPhase::GracePeriod
                    }
                }
                StopPhase::Terminating => {
                    handle.force_kill();
                    forced = true;
                    handle
                        .sink
                        .notice("[mcsm] stop: killed after grace period")
                        .await;
                    tracing::warn!(instance = %id, "grace period elapsed, killing server");
                    break;
                }
                StopPhase::Exited => break,
            };
        }

        self.registry.remove(&handle).await;
        Ok(StopReport {
            reason: "stopping",
            phase,
            forced,
            exit,
        })
    }

    /// Stops every live instance concurrently.
    pub async fn stop_all(&self) -> Vec<(InstanceId, Result<StopReport>)> {
        let ids: Vec<InstanceId> = self
            .registry
            .handles()
            .await
            .into_iter()
            .filter(|h| h.is_alive())
            .map(|h| h.id.clone())
            .collect();
        let stops = ids.into_iter().map(|id| async move {
            let res = self.stop(&id).await;
            (id, res)
        });
        futures_util::future::join_all(stops).await
    }

    pub async fn status(&self, id: &InstanceId) -> Option<InstanceStatus> {
        self.registry.get(id).await.map(|h| h.status())
    }

    pub async fn list(&self) -> Vec<InstanceStatus> {
        let mut out: Vec<InstanceStatus> = self
            .registry
            .handles()
            .await
            .iter()
            .map(|h| h.status())
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn is_running(&self, id: &InstanceId) -> bool {
        self.status(id)
            .await
            .is_some_and(|s| s.state.is_live())
    }

    pub async fn exit_signal(&self, id: &InstanceId) -> Option<ExitSignal> {
        self.registry.get(id).await.map(|h| h.exit_signal())
    }

    /// Live output of `id`. Subscribers that fall behind skip the oldest lines.
    pub async fn subscribe(&self, id: &InstanceId) -> Result<broadcast::Receiver<LogLine>> {
        self.registry
            .get(id)
            .await
            .map(|h| h.subscribe())
            .ok_or(SupervisorError::NotRunning)
    }

    pub async fn tail_logs(
        &self,
        id: &InstanceId,
        cursor: u64,
        limit: usize,
    ) -> Result<(Vec<String>, u64)> {
        let handle = self
            .registry
            .get(id)
            .await
            .ok_or(SupervisorError::NotRunning)?;
        Ok(handle.sink.tail(cursor, limit).await)
    }

    /// Drops entries whose process exited and whose output is fully drained.
    pub async fn reap(&self) -> Vec<InstanceId> {
        let reaped = self.registry.reap().await;
        for id in &reaped {
            tracing::debug!(instance = %id, "reaped exited instance");
        }
        reaped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn exit_description_prefers_kill() {
        let killed = describe_exit(&Err(std::io::Error::from(ErrorKind::Other)), true);
        assert!(killed.killed);
        assert!(killed.message.starts_with("wait failed"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_description_reports_code() {
        use std::os::unix::process::ExitStatusExt;

        let ok = describe_exit(&Ok(std::process::ExitStatus::from_raw(0)), false);
        assert_eq!(ok.exit_code, Some(0));
        assert_eq!(ok.message, "exited");

        // Raw wait status: exit code lives in the high byte.
        let failed = describe_exit(&Ok(std::process::ExitStatus::from_raw(3 << 8)), false);
        assert_eq!(failed.exit_code, Some(3));
        assert_eq!(failed.message, "exited with code 3");

        let signalled = describe_exit(&Ok(std::process::ExitStatus::from_raw(9)), false);
        assert_eq!(signalled.exit_code, None);
        assert_eq!(signalled.message, "terminated by signal");

        let killed = describe_exit(&Ok(std::process::ExitStatus::from_raw(9)), true);
        assert_eq!(killed.message, "killed after grace period");
    }

    #[tokio::test]
    async fn operations_on_unknown_instance_are_not_running() {
        let pm = ProcessManager::default();
        let id = InstanceId::from("server404");
        assert!(matches!(
            pm.send_input(&id, "say hi").await,
            Err(SupervisorError::NotRunning)
        ));
        assert!(matches!(pm.stop(&id).await, Err(SupervisorError::NotRunning)));
        assert!(pm.status(&id).await.is_none());
        assert!(pm.list().await.is_empty());
        assert!(pm.stop_all().await.is_empty());
    }
}
