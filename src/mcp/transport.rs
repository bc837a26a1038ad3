//! Line-delimited transport
//!
//! One JSON message per line over any async byte stream. A single background
//! task reads lines into an unbounded queue, so a slow consumer never stalls
//! the reader and the peer never blocks on a full pipe because we stopped
//! draining it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, Stdin, Stdout};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::TransportError;

/// How long `stop` waits for an in-progress send before abandoning the writer
const WRITER_RELEASE_TIMEOUT: Duration = Duration::from_secs(1);

/// Byte-stream transport carrying one encoded message per line.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Acquire the underlying stream and begin background reading.
    async fn start(&self) -> Result<(), TransportError>;

    /// Stop reading and release the stream. Idempotent.
    async fn stop(&self);

    /// Write one message followed by the line delimiter.
    async fn send(&self, message: &str) -> Result<(), TransportError>;

    /// Next inbound line, or `None` once the stream has closed.
    async fn receive(&self) -> Option<String>;
}

/// Standard-I/O style transport over an arbitrary reader/writer pair.
///
/// Defaults to the process's own stdin/stdout; see [`ChildTransport`] for the
/// pipes of a spawned subprocess.
pub struct StdioTransport<R = Stdin, W = Stdout> {
    label: String,
    reader: Mutex<Option<R>>,
    writer: Mutex<Option<W>>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    stopped: AtomicBool,
    shutdown: watch::Sender<bool>,
}

/// Transport wired to a child process: reads its stdout, writes its stdin.
pub type ChildTransport = StdioTransport<ChildStdout, ChildStdin>;

impl<R, W> StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(label: impl Into<String>, reader: R, writer: W) -> Self {
        Self {
            label: label.into(),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            inbox: Mutex::new(None),
            read_task: Mutex::new(None),
            stopped: AtomicBool::new(false),
            shutdown: watch::channel(false).0,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn closed(&self) -> TransportError {
        TransportError::Closed {
            label: self.label.clone(),
        }
    }
}

impl StdioTransport<Stdin, Stdout> {
    /// Transport over this process's stdin/stdout.
    pub fn stdio() -> Self {
        Self::new("stdio", tokio::io::stdin(), tokio::io::stdout())
    }
}

impl StdioTransport<ChildStdout, ChildStdin> {
    /// Transport over a spawned child's pipes.
    pub fn child(label: impl Into<String>, stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::new(label, stdout, stdin)
    }
}

#[async_trait]
impl<R, W> Transport for StdioTransport<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn start(&self) -> Result<(), TransportError> {
        if self.is_stopped() {
            return Err(self.closed());
        }

        let reader = self
            .reader
            .lock()
            .await
            .take()
            .ok_or_else(|| TransportError::AlreadyStarted {
                label: self.label.clone(),
            })?;

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inbox.lock().await = Some(rx);

        let task = tokio::spawn(read_lines(self.label.clone(), reader, tx));
        *self.read_task.lock().await = Some(task);

        tracing::debug!(transport = %self.label, "transport started");
        Ok(())
    }

    async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        // Wakes any send blocked on a full pipe so it drops the writer lock.
        self.shutdown.send_replace(true);

        // Aborting the reader drops the queue sender, which ends `receive`.
        if let Some(task) = self.read_task.lock().await.take() {
            task.abort();
        }
        self.reader.lock().await.take();
        // Lines still queued are discarded; a receive in progress owns the
        // lock and ends on the shutdown signal instead.
        if let Ok(mut inbox) = self.inbox.try_lock() {
            inbox.take();
        }

        match tokio::time::timeout(WRITER_RELEASE_TIMEOUT, self.writer.lock()).await {
            Ok(mut writer) => {
                if let Some(mut writer) = writer.take() {
                    if let Err(e) = writer.shutdown().await {
                        tracing::debug!(transport = %self.label, error = %e, "writer shutdown failed");
                    }
                }
            }
            Err(_) => {
                tracing::warn!(transport = %self.label, "send still in progress, abandoning writer");
            }
        }

        tracing::debug!(transport = %self.label, "transport stopped");
    }

    async fn send(&self, message: &str) -> Result<(), TransportError> {
        if message.contains('\n') {
            return Err(TransportError::EmbeddedNewline);
        }
        if self.is_stopped() {
            return Err(self.closed());
        }

        let mut frame = Vec::with_capacity(message.len() + 1);
        frame.extend_from_slice(message.as_bytes());
        frame.push(b'\n');

        let io_err = |source: std::io::Error| TransportError::Io {
            label: self.label.clone(),
            source,
        };
        let write = async {
            let mut guard = self.writer.lock().await;
            let writer = guard.as_mut().ok_or_else(|| self.closed())?;
            writer.write_all(&frame).await.map_err(io_err)?;
            writer.flush().await.map_err(io_err)
        };

        let mut shutdown = self.shutdown.subscribe();
        tokio::select! {
            result = write => result?,
            _ = shutdown.wait_for(|stopped| *stopped) => return Err(self.closed()),
        }

        tracing::trace!(transport = %self.label, %message, "sent");
        Ok(())
    }

    async fn receive(&self) -> Option<String> {
        if self.is_stopped() {
            return None;
        }

        let mut shutdown = self.shutdown.subscribe();
        let mut inbox = self.inbox.lock().await;
        let inbox = inbox.as_mut()?;
        tokio::select! {
            line = inbox.recv() => line.filter(|_| !self.is_stopped()),
            _ = shutdown.wait_for(|stopped| *stopped) => None,
        }
    }
}

impl<R, W> Drop for StdioTransport<R, W> {
    fn drop(&mut self) {
        if let Some(task) = self.read_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Background reader: one queue entry per non-blank line until EOF or error.
async fn read_lines<R>(label: String, reader: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => {
                tracing::debug!(transport = %label, "end of stream");
                break;
            }
            Ok(_) => {
                // Invalid UTF-8 is kept lossy so the decoder rejects just this line.
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if line.trim().is_empty() {
                    continue;
                }
                tracing::trace!(transport = %label, %line, "received");
                if tx.send(line.to_string()).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(transport = %label, error = %e, "read failed, closing stream");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    type DuplexTransport =
        StdioTransport<tokio::io::ReadHalf<tokio::io::DuplexStream>, tokio::io::WriteHalf<tokio::io::DuplexStream>>;

    fn duplex_transport() -> (DuplexTransport, tokio::io::DuplexStream) {
        duplex_transport_with_buffer(4096)
    }

    fn duplex_transport_with_buffer(size: usize) -> (DuplexTransport, tokio::io::DuplexStream) {
        let (ours, theirs) = tokio::io::duplex(size);
        let (reader, writer) = tokio::io::split(ours);
        (StdioTransport::new("test", reader, writer), theirs)
    }

    #[tokio::test]
    async fn test_receive_skips_blank_lines_and_ends_at_eof() {
        let (transport, mut peer) = duplex_transport();
        transport.start().await.unwrap();

        peer.write_all(b"first\n\n   \r\nsecond\r\n").await.unwrap();
        drop(peer);

        assert_eq!(transport.receive().await.as_deref(), Some("first"));
        assert_eq!(transport.receive().await.as_deref(), Some("second"));
        assert_eq!(transport.receive().await, None);
        assert_eq!(transport.receive().await, None);
    }

    #[tokio::test]
    async fn test_send_appends_delimiter() {
        let (transport, peer) = duplex_transport();
        transport.start().await.unwrap();

        transport.send(r#"{"jsonrpc":"2.0","method":"ping"}"#).await.unwrap();

        let mut lines = BufReader::new(peer).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, r#"{"jsonrpc":"2.0","method":"ping"}"#);
    }

    #[tokio::test]
    async fn test_send_rejects_embedded_newline() {
        let (transport, _peer) = duplex_transport();
        transport.start().await.unwrap();

        let err = transport.send("a\nb").await.unwrap_err();
        assert!(matches!(err, TransportError::EmbeddedNewline));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_fails_sends_fast() {
        let (transport, _peer) = duplex_transport();
        transport.start().await.unwrap();

        transport.stop().await;
        transport.stop().await;

        assert!(transport.is_stopped());
        assert!(matches!(transport.send("x").await, Err(TransportError::Closed { .. })));
        assert_eq!(transport.receive().await, None);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_lines() {
        let (transport, mut peer) = duplex_transport();
        transport.start().await.unwrap();

        peer.write_all(b"first\nsecond\n").await.unwrap();
        assert_eq!(transport.receive().await.as_deref(), Some("first"));

        // Let the reader queue the second line before stopping.
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.stop().await;

        assert_eq!(transport.receive().await, None);
    }

    #[tokio::test]
    async fn test_stop_wakes_pending_receive() {
        let (transport, _peer) = duplex_transport();
        let transport = std::sync::Arc::new(transport);
        transport.start().await.unwrap();

        let receiver = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        transport.stop().await;

        let line = tokio::time::timeout(Duration::from_secs(2), receiver)
            .await
            .expect("receive did not end after stop")
            .unwrap();
        assert_eq!(line, None);
    }

    #[tokio::test]
    async fn test_stop_wakes_send_blocked_on_full_pipe() {
        // The peer never reads, so a frame larger than the pipe buffer blocks.
        let (transport, _peer) = duplex_transport_with_buffer(64);
        let transport = std::sync::Arc::new(transport);
        transport.start().await.unwrap();

        let sender = {
            let transport = transport.clone();
            tokio::spawn(async move { transport.send(&"x".repeat(4096)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!sender.is_finished());

        let started = std::time::Instant::now();
        transport.stop().await;
        assert!(started.elapsed() < WRITER_RELEASE_TIMEOUT);

        let result = tokio::time::timeout(Duration::from_secs(2), sender)
            .await
            .expect("send did not end after stop")
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_stop_before_start_releases_stream() {
        let (transport, _peer) = duplex_transport();
        transport.stop().await;

        assert!(matches!(transport.start().await, Err(TransportError::Closed { .. })));
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (transport, _peer) = duplex_transport();
        transport.start().await.unwrap();

        let err = transport.start().await.unwrap_err();
        assert!(matches!(err, TransportError::AlreadyStarted { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_sends_do_not_interleave() {
        let (transport, peer) = duplex_transport();
        let transport = std::sync::Arc::new(transport);
        transport.start().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..20 {
            let transport = transport.clone();
            handles.push(tokio::spawn(async move {
                let body = format!("message-{i}-{}", "x".repeat(300));
                transport.send(&body).await.unwrap();
            }));
        }

        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(peer).lines();
            let mut seen = Vec::new();
            while seen.len() < 20 {
                seen.push(lines.next_line().await.unwrap().unwrap());
            }
            seen
        });

        for handle in handles {
            handle.await.unwrap();
        }
        let seen = reader.await.unwrap();
        for line in seen {
            assert!(line.starts_with("message-"));
            assert!(line.ends_with(&"x".repeat(300)));
        }
    }

    #[tokio::test]
    async fn test_mock_stream_round() {
        let reader = tokio_test::io::Builder::new()
            .read(b"{\"id\":1}\n")
            .read(b"{\"id\":2}\n")
            .build();
        let writer = tokio_test::io::Builder::new().write(b"hello\n").build();

        let transport = StdioTransport::new("mock", reader, writer);
        transport.start().await.unwrap();

        assert_eq!(transport.receive().await.as_deref(), Some("{\"id\":1}"));
        assert_eq!(transport.receive().await.as_deref(), Some("{\"id\":2}"));
        assert_eq!(transport.receive().await, None);

        transport.send("hello").await.unwrap();
        transport.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let (transport, mut peer) = duplex_transport();
        transport.start().await.unwrap();

        peer.write_all(b"\xff\xfe\n").await.unwrap();
        peer.write_all(b"valid\n").await.unwrap();
        drop(peer);

        let first = transport.receive().await.unwrap();
        assert!(first.contains('\u{FFFD}'));
        assert_eq!(transport.receive().await.as_deref(), Some("valid"));
        assert_eq!(transport.receive().await, None);
    }
}
