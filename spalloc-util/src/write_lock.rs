//! A cheaply-clonable handle serialising writes to a shared async sink.
//!
//! The session task and every notifier subtask for a connection hold a
//! clone of the same `SharedWriter`; spec §5 requires that a client never
//! observe a partially-written JSON line, so all writers share one
//! `tokio::sync::Mutex` guarding the underlying `AsyncWrite`.

use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use spalloc_error::{Error, ResultExt};

pub struct SharedWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for SharedWriter<W> {
    fn clone(&self) -> Self {
        SharedWriter {
            inner: self.inner.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> SharedWriter<W> {
    pub fn new(writer: W) -> Self {
        SharedWriter {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write `line` (without a trailing newline) followed by `\n`,
    /// flushing before releasing the lock so concurrent writers never
    /// interleave partial lines.
    pub async fn write_line(&self, line: &str) -> Result<(), Error> {
        let mut guard = self.inner.lock().await;
        guard
            .write_all(line.as_bytes())
            .await
            .err_tip(|| "writing response line")?;
        guard.write_all(b"\n").await.err_tip(|| "writing newline")?;
        guard.flush().await.err_tip(|| "flushing response line")?;
        Ok(())
    }
}
