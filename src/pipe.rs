//! In-memory pipe used to feed a [`Store`](crate::Store) from a writer.
//!
//! The pipe is a bounded channel of chunks with one chunk in flight, so the
//! producer waits for the consumer. The consumer side is a
//! [`StreamReader`], which turns an error sent down the pipe into a read error
//! instead of end-of-stream. A chunk written through [`AsyncWrite`] holds at
//! most [`COPY_CHUNK_SIZE`] bytes.

use crate::copy::COPY_CHUNK_SIZE;
use bytes::Bytes;
use futures::SinkExt;
use futures::channel::mpsc;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};
use tokio::io::AsyncWrite;
use tokio_util::io::StreamReader;

type Chunk = io::Result<Bytes>;

/// Consumer end of a [`pipe`].
pub type PipeReader = StreamReader<mpsc::Receiver<Chunk>, Bytes>;

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(0);
    (PipeWriter { tx: Some(tx) }, StreamReader::new(rx))
}

/// Producer end of a [`pipe`].
///
/// Dropping or [closing](PipeWriter::close) the writer is end-of-stream for the
/// reader. Once the reader is gone, writes fail with [`io::ErrorKind::BrokenPipe`].
#[derive(Debug)]
pub struct PipeWriter {
    tx: Option<mpsc::Sender<Chunk>>,
}

impl PipeWriter {
    /// Send one chunk, waiting until the reader has room for it.
    pub async fn send(&mut self, chunk: Bytes) -> io::Result<()> {
        let tx = self.tx.as_mut().ok_or_else(closed)?;
        tx.send(Ok(chunk)).await.map_err(|_| broken_pipe())
    }

    /// Fail the reader with `err` and close the pipe.
    ///
    /// The reader sees `err` in place of end-of-stream, so a consumer that
    /// commits on EOF never commits a truncated stream.
    pub async fn abort(&mut self, err: io::Error) {
        if let Some(mut tx) = self.tx.take() {
            // The reader may already be gone; nothing left to tell it then.
            let _ = tx.send(Err(err)).await;
        }
    }

    /// Close the pipe. The reader sees end-of-stream once buffered chunks are read.
    pub fn close(&mut self) {
        self.tx = None;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().is_none_or(|tx| tx.is_closed())
    }
}

impl AsyncWrite for PipeWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let Some(tx) = this.tx.as_mut() else {
            return Poll::Ready(Err(closed()));
        };
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        ready!(tx.poll_ready(cx)).map_err(|_| broken_pipe())?;
        let n = buf.len().min(COPY_CHUNK_SIZE);
        tx.start_send(Ok(Bytes::copy_from_slice(&buf[..n])))
            .map_err(|_| broken_pipe())?;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().close();
        Poll::Ready(Ok(()))
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "pipe writer already closed")
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader dropped")
}
