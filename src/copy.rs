//! Chunked stream copy that stops when its [`CancellationToken`] fires.

use crate::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Size of one copy chunk.
pub const COPY_CHUNK_SIZE: usize = 32 * 1024;

/// Copy `reader` into `writer` one chunk at a time, returning the number of bytes copied.
///
/// The token is checked before every chunk, and a read that is still pending
/// when the token fires is abandoned, so a stalled source cannot hold the copy
/// open. Cancellation returns [`Error::Canceled`] with the count copied so far.
/// End of stream is success; the writer is flushed before returning.
pub async fn copy_cancelable<R, W>(
    cancel: &CancellationToken,
    reader: &mut R,
    writer: &mut W,
) -> Result<u64>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(Error::Canceled { copied });
        }

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Canceled { copied }),
            read = reader.read(&mut buf) => read?,
        };

        if n == 0 {
            writer.flush().await?;
            return Ok(copied);
        }

        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
    }
}
