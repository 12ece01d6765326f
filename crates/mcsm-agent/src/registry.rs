use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use mcsm_process::{InstanceId, InstanceState, InstanceStatus, LogLine};
use tokio::{
    io::AsyncWriteExt,
    process::ChildStdin,
    sync::{Mutex, Notify, broadcast, watch},
    task::JoinHandle,
};

use crate::error::SupervisorError;
use crate::output::LogSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    /// The supervisor killed the process after the grace period.
    pub killed: bool,
    pub message: String,
}

/// Observable process-exit event of one instance.
#[derive(Debug, Clone)]
pub struct ExitSignal(watch::Receiver<Option<ExitInfo>>);

impl ExitSignal {
    pub fn current(&self) -> Option<ExitInfo> {
        self.0.borrow().clone()
    }

    pub fn has_exited(&self) -> bool {
        self.0.borrow().is_some()
    }

    /// Resolves once the process has exited.
    pub async fn wait(&mut self) -> Option<ExitInfo> {
        let res = self
            .0
            .wait_for(|v| v.is_some())
            .await
            .map(|v| (*v).clone());
        match res {
            Ok(v) => v,
            // Sender gone: the waiter task ended, whatever it published last stands.
            Err(_) => self.current(),
        }
    }
}

/// Registry entry for one launched process.
pub(crate) struct InstanceHandle {
    pub(crate) id: InstanceId,
    pub(crate) pid: Option<u32>,
    stdin: Mutex<Option<ChildStdin>>,
    exit: watch::Receiver<Option<ExitInfo>>,
    kill: Arc<Notify>,
    output_task: JoinHandle<()>,
    pub(crate) sink: LogSink,
    stopping: AtomicBool,
}

impl InstanceHandle {
    pub(crate) fn new(
        id: InstanceId,
        pid: Option<u32>,
        stdin: Option<ChildStdin>,
        exit: watch::Receiver<Option<ExitInfo>>,
        kill: Arc<Notify>,
        output_task: JoinHandle<()>,
        sink: LogSink,
    ) -> Self {
        Self {
            id,
            pid,
            stdin: Mutex::new(stdin),
            exit,
            kill,
            output_task,
            sink,
            stopping: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.exit.borrow().is_none()
    }

    pub(crate) fn output_closed(&self) -> bool {
        self.output_task.is_finished()
    }

    /// Exit alone is not enough: the reader may still be draining buffered output.
    pub(crate) fn is_reapable(&self) -> bool {
        !self.is_alive() && self.output_closed()
    }

    pub(crate) fn exit_signal(&self) -> ExitSignal {
        ExitSignal(self.exit.clone())
    }

    pub(crate) fn mark_stopping(&self) {
        self.stopping.store(true, Ordering::SeqCst);
    }

    pub(crate) fn force_kill(&self) {
        self.kill.notify_one();
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.sink.subscribe()
    }

    /// Writes one newline-terminated line and flushes. Holding the stdin lock
    /// for the whole write keeps concurrent lines from interleaving.
    pub(crate) async fn write_line(&self, line: &str) -> std::io::Result<()> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "stdin is closed")
        })?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        stdin.write_all(buf.as_bytes()).await?;
        stdin.flush().await
    }

    pub(crate) async fn close_stdin(&self) {
        self.stdin.lock().await.take();
    }

    pub(crate) fn status(&self) -> InstanceStatus {
        let exit = self.exit.borrow().clone();
        let state = match &exit {
            Some(_) => InstanceState::Exited,
            None if self.stopping.load(Ordering::SeqCst) => InstanceState::Stopping,
            None => InstanceState::Running,
        };
        InstanceStatus {
            id: self.id.clone(),
            state,
            pid: self.pid,
            exit_code: exit.as_ref().and_then(|e| e.exit_code),
            message: exit.map(|e| e.message),
        }
    }
}

enum Slot {
    /// Id reserved by an in-flight start; the process is not spawned yet.
    Starting,
    Live(Arc<InstanceHandle>),
}

/// Instance id to handle mapping. The lock is held for map operations only,
/// never across process I/O, so instances never wait on each other.
#[derive(Clone, Default)]
pub(crate) struct InstanceRegistry {
    inner: Arc<Mutex<HashMap<InstanceId, Slot>>>,
}

impl InstanceRegistry {
    /// Claims `id` for a start. An entry whose process already exited is
    /// replaced even if something still holds its output open; its reader
    /// keeps draining into the old sink until that pipe closes.
    pub(crate) async fn reserve(&self, id: &InstanceId) -> Result<(), SupervisorError> {
        let mut map = self.inner.lock().await;
        match map.get(id) {
            Some(Slot::Starting) => return Err(SupervisorError::Conflict),
            Some(Slot::Live(h)) if h.is_alive() => return Err(SupervisorError::Conflict),
            _ => {}
        }
        map.insert(id.clone(), Slot::Starting);
        Ok(())
    }

    pub(crate) async fn release(&self, id: &InstanceId) {
        let mut map = self.inner.lock().await;
        if matches!(map.get(id), Some(Slot::Starting)) {
            map.remove(id);
        }
    }

    pub(crate) async fn publish(&self, handle: Arc<InstanceHandle>) {
        let mut map = self.inner.lock().await;
        map.insert(handle.id.clone(), Slot::Live(handle));
    }

    pub(crate) async fn get(&self, id: &InstanceId) -> Option<Arc<InstanceHandle>> {
        let map = self.inner.lock().await;
        match map.get(id) {
            Some(Slot::Live(h)) => Some(h.clone()),
            _ => None,
        }
    }

    /// Removes the entry only if it still holds `handle`, so a newer start of
    /// the same id is left alone.
    pub(crate) async fn remove(&self, handle: &Arc<InstanceHandle>) {
        let mut map = self.inner.lock().await;
        if let Some(Slot::Live(h)) = map.get(&handle.id)
            && Arc::ptr_eq(h, handle)
        {
            map.remove(&handle.id);
        }
    }

    pub(crate) async fn handles(&self) -> Vec<Arc<InstanceHandle>> {
        let map = self.inner.lock().await;
        map.values()
            .filter_map(|s| match s {
                Slot::Live(h) => Some(h.clone()),
                Slot::Starting => None,
            })
            .collect()
    }

    pub(crate) async fn reap(&self) -> Vec<InstanceId> {
        let mut map = self.inner.lock().await;
        let dead: Vec<InstanceId> = map
            .iter()
            .filter_map(|(id, s)| match s {
                Slot::Live(h) if h.is_reapable() => Some(id.clone()),
                _ => None,
            })
            .collect();
        for id in &dead {
            map.remove(id);
        }
        dead
    }
}
