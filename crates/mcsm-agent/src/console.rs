use std::{path::PathBuf, sync::Arc};

use mcsm_process::{InstanceId, LogLine};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::download::download_server_jar;
use crate::error::SupervisorError;
use crate::launch::LaunchProfile;
use crate::layout;
use crate::output::LogObserver;
use crate::process_manager::{ProcessManager, StopPhase};

const DEFAULT_TAIL_LINES: usize = 50;

const HELP: &str = "\
commands:
  list                    list server directories and their state
  create                  create the next serverN directory and download the server jar
  eula <id>               accept the EULA for a server
  start <id>              start a server
  stop <id>               send `stop`, kill after the grace period
  send <id> <command..>   write a console command to a running server
  status <id>             show process state
  tail <id> [n]           show the last n buffered output lines
  help                    show this help
  quit                    stop all servers and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Help,
    List,
    Create,
    Eula(InstanceId),
    Start(InstanceId),
    Stop(InstanceId),
    Send(InstanceId, String),
    Status(InstanceId),
    Tail(InstanceId, usize),
    Quit,
}

/// Parses one console line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> anyhow::Result<Option<ConsoleCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((v, r)) => (v, r.trim()),
        None => (line, ""),
    };

    let id = |rest: &str| -> anyhow::Result<InstanceId> {
        let name = rest.split_whitespace().next().unwrap_or_default();
        if name.is_empty() {
            anyhow::bail!("`{verb}` needs a server id");
        }
        let id = InstanceId::from(name);
        layout::validate_id(&id)?;
        Ok(id)
    };

    let cmd = match verb.to_ascii_lowercase().as_str() {
        "help" | "?" => ConsoleCommand::Help,
        "list" | "ls" => ConsoleCommand::List,
        "create" => ConsoleCommand::Create,
        "eula" => ConsoleCommand::Eula(id(rest)?),
        "start" => ConsoleCommand::Start(id(rest)?),
        "stop" => ConsoleCommand::Stop(id(rest)?),
        "status" => ConsoleCommand::Status(id(rest)?),
        "send" => {
            let target = id(rest)?;
            let text = rest
                .split_once(char::is_whitespace)
                .map(|(_, t)| t.trim().to_string())
                .unwrap_or_default();
            ConsoleCommand::Send(target, text)
        }
        "tail" => {
            let target = id(rest)?;
            let n = match rest.split_whitespace().nth(1) {
                None => DEFAULT_TAIL_LINES,
                Some(raw) => raw
                    .parse::<usize>()
                    .map_err(|_| anyhow::anyhow!("invalid line count: {raw}"))?,
            };
            ConsoleCommand::Tail(target, n.clamp(1, 10_000))
        }
        "quit" | "exit" => ConsoleCommand::Quit,
        other => anyhow::bail!("unknown command: {other} (try `help`)"),
    };
    Ok(Some(cmd))
}

fn print_observer() -> Arc<dyn LogObserver> {
    Arc::new(|line: &LogLine| println!("[{}] {}", line.instance, line.text))
}

/// Line-oriented front-end over [`ProcessManager`].
pub struct Console {
    manager: ProcessManager,
    root: PathBuf,
    profile: LaunchProfile,
    jar_url: String,
}

impl Console {
    pub fn new(manager: ProcessManager, root: PathBuf, profile: LaunchProfile, jar_url: String) -> Self {
        Self {
            manager,
            root,
            profile,
            jar_url,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        println!("mcsm {} (data root {})", env!("CARGO_PKG_VERSION"), self.root.display());
        println!("type `help` for commands");

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        loop {
            let line = tokio::select! {
                l = lines.next_line() => l?,
                _ = &mut ctrl_c => {
                    println!();
                    break;
                }
            };
            let Some(line) = line else {
                break;
            };

            match parse_command(&line) {
                Ok(None) => {}
                Ok(Some(ConsoleCommand::Quit)) => break,
                Ok(Some(cmd)) => self.dispatch(cmd).await,
                Err(e) => println!("error: {e}"),
            }
        }

        self.shutdown().await;
        Ok(())
    }

    async fn shutdown(&self) {
        for (id, res) in self.manager.stop_all().await {
            match res {
                Ok(report) => {
                    let mut exit = report.exit;
                    exit.wait().await;
                    println!("{id}: stopped");
                }
                Err(e) => println!("{id}: {e}"),
            }
        }
    }

    async fn dispatch(&self, cmd: ConsoleCommand) {
        match cmd {
            ConsoleCommand::Help => println!("{HELP}"),
            ConsoleCommand::List => self.list().await,
            ConsoleCommand::Create => self.create(),
            ConsoleCommand::Eula(id) => {
                let res = layout::instance_dir(&self.root, &id).and_then(|d| layout::accept_eula(&d));
                match res {
                    Ok(()) => println!("{id}: EULA accepted"),
                    Err(e) => println!("error: {e:#}"),
                }
            }
            ConsoleCommand::Start(id) => self.start(id).await,
            ConsoleCommand::Stop(id) => self.stop(id),
            ConsoleCommand::Send(id, text) => match self.manager.send_input(&id, &text).await {
                Ok(()) => println!("[{id}] > {}", text.trim()),
                Err(SupervisorError::EmptyInput) => {}
                Err(e) => println!("error[{}]: {id}: {e}", e.code()),
            },
            ConsoleCommand::Status(id) => match self.manager.status(&id).await {
                Some(st) => match serde_json::to_string(&st) {
                    Ok(json) => println!("{json}"),
                    Err(e) => println!("error: {e}"),
                },
                None => println!("{id}: not running"),
            },
            ConsoleCommand::Tail(id, n) => match self.manager.tail_logs(&id, 0, n).await {
                Ok((lines, _)) => {
                    for l in lines {
                        println!("[{id}] {l}");
                    }
                }
                Err(e) => println!("error[{}]: {id}: {e}", e.code()),
            },
            ConsoleCommand::Quit => {}
        }
    }

    async fn list(&self) {
        self.manager.reap().await;
        let ids = match layout::list_instances(&self.root) {
            Ok(v) => v,
            Err(e) => {
                println!("error: {e:#}");
                return;
            }
        };
        if ids.is_empty() {
            println!("no servers (use `create`)");
        }
        for id in ids {
            match self.manager.status(&id).await {
                Some(st) => println!(
                    "{id}\t{:?}\tpid={}",
                    st.state,
                    st.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
                ),
                None => println!("{id}\tStopped"),
            }
        }
    }

    fn create(&self) {
        let root = self.root.clone();
        let url = self.jar_url.clone();
        let jar = self.profile.artifact.expected_name.clone();
        // Downloads take a while; keep the prompt usable meanwhile.
        tokio::spawn(async move {
            let (id, dir) = match layout::create_instance(&root) {
                Ok(v) => v,
                Err(e) => {
                    println!("error: {e:#}");
                    return;
                }
            };
            println!("{id}: created, downloading {jar}...");
            match download_server_jar(&dir, &url, &jar).await {
                Ok(_) => println!("{id}: ready (accept the EULA with `eula {id}`)"),
                Err(e) => println!("error: {id}: download failed: {e:#}"),
            }
        });
    }

    async fn start(&self, id: InstanceId) {
        let dir = match layout::instance_dir(&self.root, &id) {
            Ok(d) => d,
            Err(e) => {
                println!("error: {e:#}");
                return;
            }
        };
        match self
            .manager
            .start(&id, &dir, &self.profile, print_observer())
            .await
        {
            Ok(st) => println!(
                "{id}: {} (pid {})",
                st.message.as_deref().unwrap_or("started"),
                st.pid.map(|p| p.to_string()).unwrap_or_else(|| "?".to_string())
            ),
            Err(e) => println!("error[{}]: {id}: {e}", e.code()),
        }
    }

    fn stop(&self, id: InstanceId) {
        let manager = self.manager.clone();
        // The grace period can take seconds; report back when it resolves.
        tokio::spawn(async move {
            match manager.stop(&id).await {
                Ok(report) => {
                    let how = match report.phase {
                        StopPhase::Terminating => "killed after grace period",
                        _ => "stopped",
                    };
                    println!("{id}: {} ({how})", report.reason);
                }
                Err(e) => println!("error[{}]: {id}: {e}", e.code()),
            }
        });
    }
}
