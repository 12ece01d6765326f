use std::{collections::VecDeque, sync::Arc};

use mcsm_process::{InstanceId, LogLine};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    sync::{Mutex, broadcast},
    task::JoinHandle,
};

use crate::sanitize::sanitize;

/// Receives every sanitized output line of one instance.
///
/// Called on that instance's output reader task, never on the caller's task.
/// A slow observer delays only its own instance's output.
pub trait LogObserver: Send + Sync + 'static {
    fn on_line(&self, line: &LogLine);
}

impl<F> LogObserver for F
where
    F: Fn(&LogLine) + Send + Sync + 'static,
{
    fn on_line(&self, line: &LogLine) {
        self(line)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl LogObserver for NoopObserver {
    fn on_line(&self, _line: &LogLine) {}
}

#[derive(Debug)]
pub(crate) struct LogBuffer {
    next_seq: u64,
    max_lines: usize,
    lines: VecDeque<(u64, String)>,
}

impl LogBuffer {
    pub(crate) fn new(max_lines: usize) -> Self {
        Self {
            next_seq: 1,
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    pub(crate) fn push_line(&mut self, line: String) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back((seq, line));
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub(crate) fn tail_after(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        // cursor 0 means "the most recent lines".
        if cursor == 0 {
            let start = self.lines.len().saturating_sub(limit);
            let mut out = Vec::new();
            let mut last = 0;
            for (seq, line) in self.lines.iter().skip(start) {
                out.push(line.clone());
                last = *seq;
            }
            return (out, last);
        }

        let mut out = Vec::new();
        let mut last = cursor;
        for (seq, line) in self.lines.iter() {
            if *seq > cursor {
                out.push(line.clone());
                last = *seq;
                if out.len() >= limit {
                    break;
                }
            }
        }
        (out, last)
    }
}

/// Fan-out point for one instance: tail buffer plus live subscribers.
#[derive(Clone)]
pub(crate) struct LogSink {
    instance: InstanceId,
    buffer: Arc<Mutex<LogBuffer>>,
    live: broadcast::Sender<LogLine>,
}

impl LogSink {
    pub(crate) fn new(instance: InstanceId, max_lines: usize, capacity: usize) -> Self {
        let (live, _) = broadcast::channel(capacity.max(1));
        Self {
            instance,
            buffer: Arc::new(Mutex::new(LogBuffer::new(max_lines))),
            live,
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LogLine> {
        self.live.subscribe()
    }

    pub(crate) async fn tail(&self, cursor: u64, limit: usize) -> (Vec<String>, u64) {
        self.buffer.lock().await.tail_after(cursor, limit)
    }

    /// Supervisor notices go to the tail only; subscribers see process output.
    pub(crate) async fn notice(&self, line: impl Into<String>) {
        self.buffer.lock().await.push_line(line.into());
    }

    async fn publish(&self, text: String, observer: &dyn LogObserver) {
        let line = LogLine::new(self.instance.clone(), text);
        observer.on_line(&line);
        self.buffer.lock().await.push_line(line.text.clone());
        // No subscribers is fine; lagging ones lose their oldest lines.
        let _ = self.live.send(line);
    }
}

struct LineStream<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
}

impl<R: AsyncRead + Unpin> LineStream<R> {
    fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            buf: Vec::new(),
        }
    }

    /// A partial line stays in `buf` until its newline arrives.
    async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        let n = self.reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 && self.buf.is_empty() {
            return Ok(None);
        }
        let mut raw = std::mem::take(&mut self.buf);
        if raw.last() == Some(&b'\n') {
            raw.pop();
        }
        if raw.last() == Some(&b'\r') {
            raw.pop();
        }
        Ok(Some(String::from_utf8_lossy(&raw).into_owned()))
    }
}

/// Read half of the pipe a child writes both stdout and stderr into.
#[cfg(unix)]
pub(crate) type OutputReader = tokio::net::unix::pipe::Receiver;
#[cfg(windows)]
pub(crate) type OutputReader = tokio::fs::File;

/// One pipe for stdout and stderr, so lines keep the order the process wrote them.
///
/// Hand a `try_clone` of the writer to each of the child's output handles and
/// drop every parent-side copy after spawn, or the reader never sees EOF.
pub(crate) fn output_pipe() -> std::io::Result<(OutputReader, std::io::PipeWriter)> {
    let (reader, writer) = std::io::pipe()?;
    #[cfg(unix)]
    let reader = tokio::net::unix::pipe::Receiver::from_owned_fd(reader.into())?;
    #[cfg(windows)]
    let reader = tokio::fs::File::from_std(std::fs::File::from(
        std::os::windows::io::OwnedHandle::from(reader),
    ));
    Ok((reader, writer))
}

/// Drains the combined output stream until EOF or a read error.
///
/// The task ending is the "output closed" event for the instance.
pub(crate) fn spawn_output_reader<R>(
    output: R,
    sink: LogSink,
    observer: Arc<dyn LogObserver>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = LineStream::new(output);
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => sink.publish(sanitize(&line), observer.as_ref()).await,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(instance = %sink.instance, error = %e, "output reader failed");
                    sink.publish(
                        format!("[mcsm] output reader error: {e}"),
                        observer.as_ref(),
                    )
                    .await;
                    break;
                }
            }
        }

        tracing::debug!(instance = %sink.instance, "output stream closed");
    })
}
