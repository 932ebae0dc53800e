//! Standard stream plumbing of tasks and exec'd processes.
//!
//! An [`Io`] handle owns the local side of a process's streams and moves
//! through three phases:
//!
//! - `cancel` aborts opening the streams if it has not completed yet;
//!   streams that are already flowing keep flowing.
//! - `wait` returns once every stream has been drained.
//! - `close` releases whatever is still held.
//!
//! Each phase is safe to invoke more than once.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use ctk_common::error::Result;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Notify;
use tokio::task::{AbortHandle, JoinHandle, JoinSet};

use crate::services::ProcessState;

/// Stream endpoints announced to the runtime.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoConfig {
    /// Whether the process runs on a terminal.
    pub terminal: bool,
    /// Stdin endpoint, empty for none.
    pub stdin: String,
    /// Stdout endpoint, empty for none.
    pub stdout: String,
    /// Stderr endpoint, empty for none.
    pub stderr: String,
}

impl From<&ProcessState> for IoConfig {
    fn from(state: &ProcessState) -> Self {
        Self {
            terminal: state.terminal,
            stdin: state.stdin.clone(),
            stdout: state.stdout.clone(),
            stderr: state.stderr.clone(),
        }
    }
}

/// Local side of a process's standard streams.
#[async_trait]
pub trait Io: Send + Sync {
    /// Endpoints handed to the runtime.
    fn config(&self) -> IoConfig;

    /// Aborts opening the streams. Does not interrupt flowing streams.
    fn cancel(&self);

    /// Resolves once every stream has been drained.
    async fn wait(&self);

    /// Releases the streams.
    ///
    /// # Errors
    ///
    /// Returns an error if a stream cannot be released.
    fn close(&self) -> Result<()>;
}

/// Creates the streams of a new process, given its id.
pub trait Creator: Send + Sync {
    /// Creates the streams for process `id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the streams cannot be set up.
    fn create(&self, id: &str) -> Result<Box<dyn Io>>;
}

impl<F> Creator for F
where
    F: Fn(&str) -> Result<Box<dyn Io>> + Send + Sync,
{
    fn create(&self, id: &str) -> Result<Box<dyn Io>> {
        self(id)
    }
}

/// Re-attaches to the streams of an existing process.
pub trait Attach: Send + Sync {
    /// Attaches to the endpoints the runtime reports for the process.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoints cannot be opened.
    fn attach(&self, config: &IoConfig) -> Result<Box<dyn Io>>;
}

impl<F> Attach for F
where
    F: Fn(&IoConfig) -> Result<Box<dyn Io>> + Send + Sync,
{
    fn attach(&self, config: &IoConfig) -> Result<Box<dyn Io>> {
        self(config)
    }
}

/// Process without any streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIo;

#[async_trait]
impl Io for NullIo {
    fn config(&self) -> IoConfig {
        IoConfig::default()
    }

    fn cancel(&self) {}

    async fn wait(&self) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creator of [`NullIo`] handles.
#[must_use]
pub fn null_io() -> impl Creator {
    |_: &str| -> Result<Box<dyn Io>> { Ok(Box::new(NullIo)) }
}

/// Streams forwarded by the runtime to a log destination; nothing is held
/// locally.
#[derive(Debug, Clone)]
pub struct LogUriIo {
    uri: String,
}

impl LogUriIo {
    /// Sends stdout and stderr to `uri`.
    #[must_use]
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

#[async_trait]
impl Io for LogUriIo {
    fn config(&self) -> IoConfig {
        IoConfig {
            terminal: false,
            stdin: String::new(),
            stdout: self.uri.clone(),
            stderr: self.uri.clone(),
        }
    }

    fn cancel(&self) {}

    async fn wait(&self) {}

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Creator sending the output of every process to `uri`.
#[must_use]
pub fn log_uri(uri: impl Into<String>) -> impl Creator {
    let uri = uri.into();
    move |_: &str| -> Result<Box<dyn Io>> { Ok(Box::new(LogUriIo::new(uri.clone()))) }
}

/// One forwarded stream.
pub struct Pipe {
    name: &'static str,
    reader: Box<dyn AsyncRead + Send + Unpin>,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
}

impl Pipe {
    /// Forwards everything read from `reader` into `writer`.
    pub fn new(
        name: &'static str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            name,
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    async fn forward(mut self) {
        match tokio::io::copy(&mut self.reader, &mut self.writer).await {
            Ok(bytes) => tracing::trace!(stream = self.name, bytes, "stream drained"),
            Err(e) => tracing::warn!(stream = self.name, error = %e, "stream copy failed"),
        }
        if let Err(e) = self.writer.shutdown().await {
            tracing::debug!(stream = self.name, error = %e, "stream shutdown failed");
        }
    }
}

/// Streams copied by a background worker once an opener resolves.
///
/// The opener typically waits for the runtime to connect to the stream
/// endpoints; cancelling abandons that wait.
pub struct StreamIo {
    config: IoConfig,
    cancel: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
    abort: AbortHandle,
    closed: AtomicBool,
}

impl StreamIo {
    /// Spawns the worker on the current tokio runtime.
    pub fn spawn<F>(config: IoConfig, opener: F) -> Self
    where
        F: Future<Output = std::io::Result<Vec<Pipe>>> + Send + 'static,
    {
        let cancel = Arc::new(Notify::new());
        let worker = tokio::spawn(run_streams(opener, Arc::clone(&cancel)));
        Self {
            config,
            cancel,
            abort: worker.abort_handle(),
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
        }
    }
}

async fn run_streams<F>(opener: F, cancel: Arc<Notify>)
where
    F: Future<Output = std::io::Result<Vec<Pipe>>>,
{
    let pipes = tokio::select! {
        biased;
        () = cancel.notified() => {
            tracing::debug!("stream opening cancelled");
            return;
        }
        opened = opener => match opened {
            Ok(pipes) => pipes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to open streams");
                return;
            }
        },
    };

    let mut copies = JoinSet::new();
    for pipe in pipes {
        let _ = copies.spawn(pipe.forward());
    }
    while copies.join_next().await.is_some() {}
}

#[async_trait]
impl Io for StreamIo {
    fn config(&self) -> IoConfig {
        self.config.clone()
    }

    fn cancel(&self) {
        self.cancel.notify_one();
    }

    async fn wait(&self) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(worker) = worker else {
            return;
        };
        match worker.await {
            Err(e) if !e.is_cancelled() => tracing::warn!(error = %e, "stream worker failed"),
            _ => {}
        }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.abort.abort();
            tracing::debug!("streams closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn wait_returns_after_streams_drain() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("stdout");
        let file = tokio::fs::File::create(&out).await.unwrap();

        let io = StreamIo::spawn(IoConfig::default(), async move {
            Ok(vec![Pipe::new("stdout", &b"hello"[..], file)])
        });
        io.wait().await;
        io.close().unwrap();

        assert_eq!(tokio::fs::read_to_string(&out).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn cancel_abandons_a_pending_open() {
        let io = StreamIo::spawn(IoConfig::default(), std::future::pending());
        io.cancel();
        tokio::time::timeout(Duration::from_secs(5), io.wait())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn close_before_wait_releases_the_worker() {
        let io = StreamIo::spawn(IoConfig::default(), std::future::pending());
        io.close().unwrap();
        io.close().unwrap();
        tokio::time::timeout(Duration::from_secs(5), io.wait())
            .await
            .unwrap();
        io.wait().await;
    }

    #[test]
    fn log_uri_points_both_outputs_at_the_destination() {
        let io = log_uri("file:///var/log/t1.log").create("t1").unwrap();
        let config = io.config();
        assert_eq!(config.stdout, "file:///var/log/t1.log");
        assert_eq!(config.stderr, config.stdout);
        assert!(config.stdin.is_empty());
    }
}
