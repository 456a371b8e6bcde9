//! Bounded in-memory pipe from a blocking producer to an async consumer.
//!
//! The producer side implements [`std::io::Write`] and runs on a blocking
//! worker thread; the consumer side implements [`tokio::io::AsyncRead`] and
//! feeds the ingestion process. Backpressure comes from the bounded channel.
//!
//! Two properties matter for shutdown:
//! - a pending write returns as soon as the cancellation token fires, even if
//!   the consumer has stopped reading;
//! - the producer can poison the pipe with an error, which the consumer sees
//!   on its next read instead of a clean end of stream.

use crate::error::DbRestoreError;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Chunks in flight between producer and consumer.
pub const PIPE_CAPACITY: usize = 8;

type PoisonSlot = Arc<Mutex<Option<String>>>;

fn lock_poison(slot: &PoisonSlot) -> std::sync::MutexGuard<'_, Option<String>> {
    slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Creates a pipe whose writes abort when `cancel` fires.
///
/// Must be called from within a Tokio runtime; the writer uses the current
/// runtime handle to wait on the channel from a blocking thread.
pub fn restore_pipe(cancel: CancellationToken) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(PIPE_CAPACITY);
    let poison: PoisonSlot = Arc::new(Mutex::new(None));
    let writer = PipeWriter {
        tx: Some(tx),
        cancel,
        handle: Handle::current(),
        poison: Arc::clone(&poison),
    };
    let reader = PipeReader {
        rx,
        poison,
        current: Vec::new(),
        offset: 0,
    };
    (writer, reader)
}

/// Producer end of the restore pipe.
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Vec<u8>>>,
    cancel: CancellationToken,
    handle: Handle,
    poison: PoisonSlot,
}

impl PipeWriter {
    /// Closes the pipe; the consumer reads the remaining chunks, then EOF.
    pub fn close(mut self) {
        self.tx.take();
    }

    /// Closes the pipe so the consumer's next read fails with `error`.
    pub fn close_with_error(mut self, error: &DbRestoreError) {
        *lock_poison(&self.poison) = Some(error.to_string());
        self.tx.take();
    }
}

impl io::Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(tx) = self.tx.as_ref() else {
            return Err(DbRestoreError::PipeClosed {
                context: "write after close".to_string(),
            }
            .into_io());
        };
        if self.cancel.is_cancelled() {
            return Err(DbRestoreError::cancelled("restore streaming").into_io());
        }

        let chunk = buf.to_vec();
        let cancel = &self.cancel;
        let sent = self.handle.block_on(async {
            tokio::select! {
                biased;
                () = cancel.cancelled() => Err(DbRestoreError::cancelled("restore streaming")),
                result = tx.send(chunk) => result.map_err(|_| DbRestoreError::PipeClosed {
                    context: "ingestion stopped reading".to_string(),
                }),
            }
        });
        sent.map(|()| buf.len()).map_err(DbRestoreError::into_io)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Consumer end of the restore pipe.
pub struct PipeReader {
    rx: mpsc::Receiver<Vec<u8>>,
    poison: PoisonSlot,
    current: Vec<u8>,
    offset: usize,
}

impl PipeReader {
    fn poisoned(&self) -> Option<io::Error> {
        lock_poison(&self.poison).as_ref().map(|message| {
            DbRestoreError::PipeClosed {
                context: format!("producer failed: {}", message),
            }
            .into_io()
        })
    }
}

impl AsyncRead for PipeReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if self.offset < self.current.len() {
                let this = &mut *self;
                let remaining = &this.current[this.offset..];
                let n = remaining.len().min(buf.remaining());
                buf.put_slice(&remaining[..n]);
                this.offset += n;
                return Poll::Ready(Ok(()));
            }

            if let Some(error) = self.poisoned() {
                return Poll::Ready(Err(error));
            }

            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(chunk)) => {
                    self.current = chunk;
                    self.offset = 0;
                }
                Poll::Ready(None) => {
                    // The producer may have poisoned the pipe just before closing.
                    return match self.poisoned() {
                        Some(error) => Poll::Ready(Err(error)),
                        None => Poll::Ready(Ok(())),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pipe_transfers_bytes_and_closes() {
        let (mut writer, mut reader) = restore_pipe(CancellationToken::new());
        let producer = tokio::task::spawn_blocking(move || {
            for i in 0..100 {
                writeln!(writer, "INSERT INTO t VALUES ({});", i).unwrap();
            }
            writer.close();
        });

        let mut text = String::new();
        reader.read_to_string(&mut text).await.unwrap();
        producer.await.unwrap();

        assert_eq!(text.lines().count(), 100);
        assert!(text.ends_with("VALUES (99);\n"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_poisoned_pipe_fails_consumer() {
        let (mut writer, mut reader) = restore_pipe(CancellationToken::new());
        let producer = tokio::task::spawn_blocking(move || {
            writer.write_all(b"partial").unwrap();
            writer.close_with_error(&DbRestoreError::LineTooLong {
                line_number: 3,
                limit: 10,
            });
        });
        producer.await.unwrap();

        let mut sink = Vec::new();
        let err = reader.read_to_end(&mut sink).await.unwrap_err();
        assert!(err.to_string().contains("Line 3 exceeds"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_unblocks_pending_write() {
        let cancel = CancellationToken::new();
        let (mut writer, _reader) = restore_pipe(cancel.clone());

        // Nobody reads: the producer fills the channel and then blocks.
        let producer = tokio::task::spawn_blocking(move || {
            let chunk = vec![b'x'; 1024];
            loop {
                if let Err(e) = writer.write_all(&chunk) {
                    return e;
                }
            }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();

        let err = tokio::time::timeout(Duration::from_secs(5), producer)
            .await
            .expect("producer write did not fail after cancellation")
            .unwrap();
        let typed = DbRestoreError::from_stream_error("write", err);
        assert!(typed.is_cancelled());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_dropped_reader_fails_writes() {
        let (mut writer, reader) = restore_pipe(CancellationToken::new());
        drop(reader);
        let result = tokio::task::spawn_blocking(move || writer.write_all(b"data"))
            .await
            .unwrap();
        let typed = DbRestoreError::from_stream_error("write", result.unwrap_err());
        assert!(matches!(typed, DbRestoreError::PipeClosed { .. }));
    }
}
