//! Byte-level progress tracking for dump and restore streams.
//!
//! Progress is reported as an integer percentage and only on increase, so
//! callers never observe a regression within one job.

use super::reporter::ProgressCallback;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};

/// Monotonic percentage tracker for one job
pub struct ProgressTracker {
    last: AtomicU8,
    callback: Option<ProgressCallback>,
}

impl ProgressTracker {
    pub fn new(callback: Option<ProgressCallback>) -> Self {
        Self {
            last: AtomicU8::new(0),
            callback,
        }
    }

    /// Forward `percent` if it is higher than anything reported so far.
    pub fn report(&self, percent: u8) -> bool {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        if percent <= previous {
            return false;
        }
        if let Some(callback) = &self.callback {
            callback(percent);
        }
        true
    }
}

/// Reader wrapper computing `bytes read / total size` as it is consumed
pub struct ProgressReader<R> {
    inner: R,
    bytes_read: u64,
    total_bytes: u64,
    last_percent: u8,
    callback: ProgressCallback,
}

impl<R> ProgressReader<R> {
    pub fn new(inner: R, total_bytes: u64, callback: ProgressCallback) -> Self {
        Self {
            inner,
            bytes_read: 0,
            total_bytes,
            last_percent: 0,
            callback,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    fn update(&mut self, chunk: usize) {
        self.bytes_read += chunk as u64;
        if self.total_bytes == 0 {
            return;
        }
        let percent = ((self.bytes_read.saturating_mul(100)) / self.total_bytes).min(100) as u8;
        if percent > self.last_percent {
            self.last_percent = percent;
            (self.callback)(percent);
        }
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for ProgressReader<R> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                let read = buf.filled().len() - before;
                this.update(read);
                Poll::Ready(Ok(()))
            }
            other => other,
        }
    }
}

/// Wrap a callback so it can be shared with a [`ProgressReader`].
pub fn callback(f: impl Fn(u8) + Send + Sync + 'static) -> ProgressCallback {
    Arc::new(f)
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;

    #[test]
    fn test_tracker_never_regresses() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(Some(callback(move |p| sink.lock().unwrap().push(p))));

        assert!(tracker.report(10));
        assert!(!tracker.report(5));
        assert!(!tracker.report(10));
        assert!(tracker.report(150));

        assert_eq!(*seen.lock().unwrap(), vec![10, 100]);
        assert_eq!(tracker.last.load(Ordering::SeqCst), 100);
    }

    #[tokio::test]
    async fn test_progress_reader_reports_percent_steps() {
        let data = vec![7u8; 1000];
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        let mut reader = ProgressReader::new(
            &data[..],
            data.len() as u64,
            callback(move |p| sink.lock().unwrap().push(p)),
        );

        let mut chunk = [0u8; 250];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(out.len(), 1000);
        assert_eq!(reader.bytes_read(), 1000);
        let seen = seen.lock().unwrap();
        assert_eq!(*seen.last().unwrap(), 100);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1_572_864), "1.50 MB");
    }
}
