//! Following the model server's log file.

use std::fs::Metadata;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};

use super::ReadinessMonitor;

/// Tails a log file and feeds every complete line to a [`ReadinessMonitor`].
///
/// The file may not exist yet when the worker starts; the tailer keeps
/// retrying until it appears. When the path stops naming the file being read
/// (rotation by rename, deletion, truncation or an in-place rewrite) the new
/// file is opened and read from the beginning.
#[derive(Debug, Clone)]
pub struct LogTail {
    path: PathBuf,
    poll_interval: Duration,
}

impl LogTail {
    pub fn new(path: impl Into<PathBuf>, poll_interval: Duration) -> Self {
        Self {
            path: path.into(),
            poll_interval,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run until the task is aborted.
    pub async fn run(self, monitor: Arc<ReadinessMonitor>) {
        let mut waiting_logged = false;

        loop {
            let file = match File::open(&self.path).await {
                Ok(file) => file,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    if !waiting_logged {
                        tracing::info!("Waiting for model log file {}", self.path.display());
                        waiting_logged = true;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
                Err(e) => {
                    tracing::error!("Cannot open model log {}: {}", self.path.display(), e);
                    monitor.mark_stream_lost(&e.to_string());
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            tracing::debug!("Tailing model log {}", self.path.display());
            monitor.mark_stream_recovered();
            waiting_logged = false;

            match self.follow(file, &monitor).await {
                Ok(()) => {
                    tracing::info!("Model log {} was rotated or truncated, reopening", self.path.display());
                }
                Err(e) => {
                    tracing::error!("Lost model log {}: {}", self.path.display(), e);
                    monitor.mark_stream_lost(&e.to_string());
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    /// Read lines until the file is replaced (`Ok`) or reading fails (`Err`).
    async fn follow(&self, file: File, monitor: &ReadinessMonitor) -> io::Result<()> {
        let opened = file.metadata().await?;
        let mut reader = BufReader::new(file);
        let mut position: u64 = 0;
        let mut head = Vec::with_capacity(HEAD_LEN);
        let mut buf = Vec::new();

        loop {
            let read = reader.read_until(b'\n', &mut buf).await?;
            if read == 0 {
                tokio::time::sleep(self.poll_interval).await;
                if self.replaced(&opened, position, &head).await? {
                    return Ok(());
                }
                continue;
            }

            if head.len() < HEAD_LEN {
                let fresh = &buf[buf.len() - read..];
                let take = fresh.len().min(HEAD_LEN - head.len());
                head.extend_from_slice(&fresh[..take]);
            }
            position += read as u64;
            // A partial line stays buffered until the writer finishes it.
            if buf.ends_with(b"\n") {
                observe_bytes(monitor, &buf);
                buf.clear();
            }
        }
    }

    /// Whether the path no longer names the file we have been reading:
    /// it was renamed away, deleted, truncated, or rewritten from the start.
    async fn replaced(&self, opened: &Metadata, position: u64, head: &[u8]) -> io::Result<bool> {
        let current = match tokio::fs::metadata(&self.path).await {
            Ok(current) => current,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        };
        if !same_file(opened, &current) || current.len() < position {
            return Ok(true);
        }
        if head.is_empty() {
            return Ok(false);
        }

        // Same inode and no shorter: a truncate followed by a longer write
        // only shows up in the leading bytes.
        let file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
            Err(e) => return Err(e),
        };
        let mut now = Vec::with_capacity(head.len());
        file.take(head.len() as u64).read_to_end(&mut now).await?;
        Ok(now != head)
    }
}

/// Bytes kept from the start of the file to recognize an in-place rewrite.
const HEAD_LEN: usize = 256;

#[cfg(unix)]
fn same_file(a: &Metadata, b: &Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &Metadata, _b: &Metadata) -> bool {
    true
}

/// Classify every line of `reader` until EOF.
///
/// A read error marks the stream as lost and is returned to the caller.
pub async fn observe_stream<R>(reader: R, monitor: &ReadinessMonitor) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut reader = reader;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        let read = match reader.read_until(b'\n', &mut buf).await {
            Ok(read) => read,
            Err(e) => {
                monitor.mark_stream_lost(&e.to_string());
                return Err(e);
            }
        };
        if read == 0 {
            return Ok(());
        }
        observe_bytes(monitor, &buf);
    }
}

/// Non-UTF-8 output is decoded lossily rather than treated as a broken stream.
fn observe_bytes(monitor: &ReadinessMonitor, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    monitor.observe(text.trim_end_matches(&['\r', '\n'][..]));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogActionConfig;
    use crate::observability::NoopSink;
    use crate::readiness::LogRules;
    use std::io::Write;
    use worker_common::Readiness;

    fn monitor() -> Arc<ReadinessMonitor> {
        Arc::new(ReadinessMonitor::new(
            LogRules::from_config(&LogActionConfig::default()),
            Arc::new(NoopSink),
        ))
    }

    async fn wait_for_status(monitor: &ReadinessMonitor, status: Readiness) {
        let mut rx = monitor.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.status == status))
            .await
            .expect("timed out waiting for status")
            .unwrap();
    }

    #[tokio::test]
    async fn test_observe_stream() {
        let monitor = monitor();
        let log = b"starting vllm\nINFO:     Started server process\nINFO:     Application startup complete.\n";

        observe_stream(&log[..], &monitor).await.unwrap();
        assert_eq!(monitor.status(), Readiness::Ready);
    }

    #[tokio::test]
    async fn test_observe_stream_lossy_utf8() {
        let monitor = monitor();
        let log = b"\xff\xfe garbage\r\nTraceback (most recent call last):\r\n";

        observe_stream(&log[..], &monitor).await.unwrap();
        let state = monitor.current();
        assert_eq!(state.status, Readiness::Errored);
        assert_eq!(
            state.last_line.as_deref(),
            Some("Traceback (most recent call last):")
        );
    }

    #[tokio::test]
    async fn test_tail_follows_appended_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "loading model\n").unwrap();

        let monitor = monitor();
        let tail = LogTail::new(&path, Duration::from_millis(10));
        let handle = tokio::spawn(tail.run(monitor.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.status(), Readiness::Starting);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "Model loaded successfully").unwrap();
        file.flush().unwrap();

        wait_for_status(&monitor, Readiness::Ready).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_tail_waits_for_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late.log");

        let monitor = monitor();
        let handle = tokio::spawn(LogTail::new(&path, Duration::from_millis(10)).run(monitor.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        // A missing file is not a lost stream
        assert_eq!(monitor.status(), Readiness::Starting);

        std::fs::write(&path, "ERROR: engine failed to start\n").unwrap();
        wait_for_status(&monitor, Readiness::Errored).await;
        assert!(!monitor.current().monitor_lost);
        handle.abort();
    }

    #[tokio::test]
    async fn test_tail_partial_line_waits_for_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "Application startup").unwrap();

        let monitor = monitor();
        let handle = tokio::spawn(LogTail::new(&path, Duration::from_millis(10)).run(monitor.clone()));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.status(), Readiness::Starting);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, " complete.").unwrap();
        file.flush().unwrap();

        wait_for_status(&monitor, Readiness::Ready).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_tail_follows_rename_rotation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "loading\n").unwrap();

        let monitor = monitor();
        let handle = tokio::spawn(LogTail::new(&path, Duration::from_millis(20)).run(monitor.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        std::fs::rename(&path, dir.path().join("server.log.1")).unwrap();
        // Longer than the old file, so a size check alone would not notice
        std::fs::write(
            &path,
            "starting engine\nINFO:     Application startup complete.\n",
        )
        .unwrap();

        wait_for_status(&monitor, Readiness::Ready).await;
        handle.abort();
    }

    #[tokio::test]
    async fn test_tail_rereads_truncated_and_rewritten_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "loading\n").unwrap();

        let monitor = monitor();
        let handle = tokio::spawn(LogTail::new(&path, Duration::from_millis(20)).run(monitor.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Truncates in place and writes past the old offset
        std::fs::write(&path, "Application startup complete.\n").unwrap();

        wait_for_status(&monitor, Readiness::Ready).await;
        assert_eq!(
            monitor.current().last_line.as_deref(),
            Some("Application startup complete.")
        );
        handle.abort();
    }

    #[tokio::test]
    async fn test_tail_reopens_after_shrink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, "loading weights shard 1 of 4\nloading weights shard 2 of 4\n").unwrap();

        let monitor = monitor();
        let handle = tokio::spawn(LogTail::new(&path, Duration::from_millis(20)).run(monitor.clone()));
        tokio::time::sleep(Duration::from_millis(60)).await;

        std::fs::write(&path, "Model loaded successfully\n").unwrap();

        wait_for_status(&monitor, Readiness::Ready).await;
        handle.abort();
    }

    struct FailingReader;

    impl tokio::io::AsyncRead for FailingReader {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<io::Result<()>> {
            std::task::Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe closed")))
        }
    }

    #[tokio::test]
    async fn test_observe_stream_read_error_marks_lost() {
        let monitor = monitor();
        let reader = BufReader::new((&b"Application startup complete.\n"[..]).chain(FailingReader));

        let result = observe_stream(reader, &monitor).await;

        assert_eq!(result.unwrap_err().kind(), io::ErrorKind::BrokenPipe);
        let state = monitor.current();
        assert_eq!(state.status, Readiness::Errored);
        assert!(state.monitor_lost);

        // Reopening the stream starts over
        monitor.mark_stream_recovered();
        assert_eq!(monitor.status(), Readiness::Starting);
    }
}
