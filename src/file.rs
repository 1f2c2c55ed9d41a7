use std::io;
use std::mem;
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use pin_project::pin_project;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, ReadBuf};

use crate::RangeBody;

const IO_BUFFER_SIZE: usize = 64 * 1024;

/// Implements [`RangeBody`] for any [`AsyncRead`], constructed with a fixed
/// byte size. Bytes are streamed in 64 KiB chunks from wherever the reader
/// currently points.
#[pin_project]
pub struct KnownSize<B: AsyncRead> {
    byte_size: u64,
    content_type: Option<String>,
    buffer: BytesMut,
    #[pin]
    body: B,
}

impl std::fmt::Debug for KnownSize<File> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KnownSize")
            .field("byte_size", &self.byte_size)
            .field("content_type", &self.content_type)
            .finish()
    }
}

impl KnownSize<File> {
    /// Opens the file at `path`, determining its size via
    /// [`tokio::fs::File::metadata`] and guessing a content type from the
    /// path extension.
    pub async fn path(path: impl AsRef<Path>) -> io::Result<KnownSize<File>> {
        let content_type = mime_guess::from_path(&path).first().map(|mime| mime.to_string());
        let file = File::open(path).await?;
        let byte_size = file.metadata().await?.len();
        Ok(KnownSize { byte_size, content_type, buffer: allocate_buffer(), body: file })
    }

    /// Calls [`tokio::fs::File::metadata`] to determine file size.
    pub async fn file(file: File) -> io::Result<KnownSize<File>> {
        let byte_size = file.metadata().await?.len();
        Ok(KnownSize { byte_size, content_type: None, buffer: allocate_buffer(), body: file })
    }
}

impl<B: AsyncRead> KnownSize<B> {
    /// Construct a [`KnownSize`] instance with a byte size supplied manually.
    pub fn sized(body: B, byte_size: u64) -> Self {
        KnownSize { byte_size, content_type: None, buffer: allocate_buffer(), body }
    }

    /// The content type guessed for this body, if any.
    pub fn content_type(&self) -> Option<String> {
        self.content_type.clone()
    }
}

impl<B: AsyncRead + AsyncSeek + Unpin> KnownSize<B> {
    /// Uses `seek` to determine size by seeking to the end and getting the
    /// stream position.
    pub async fn seek(mut body: B) -> io::Result<KnownSize<B>> {
        let byte_size = body.seek(io::SeekFrom::End(0)).await?;

        // streaming starts from the current position, so wind back
        body.seek(io::SeekFrom::Start(0)).await?;

        Ok(KnownSize { byte_size, content_type: None, buffer: allocate_buffer(), body })
    }
}

impl<B: AsyncRead> Stream for KnownSize<B> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<Bytes>>> {
        let this = self.project();

        let uninit = this.buffer.spare_capacity_mut();
        let mut read_buf = ReadBuf::uninit(uninit);

        match this.body.poll_read(cx, &mut read_buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Err(e)) => Poll::Ready(Some(Err(e))),
            Poll::Ready(Ok(())) => match read_buf.filled().len() {
                0 => Poll::Ready(None),
                n => {
                    // SAFETY: poll_read has filled the buffer with `n`
                    // additional bytes. `buffer.len` should always be
                    // 0 here, but include it for rigorous correctness
                    unsafe { this.buffer.set_len(this.buffer.len() + n); }

                    // replace state buffer and take this one to return
                    let chunk = mem::replace(this.buffer, allocate_buffer());

                    Poll::Ready(Some(Ok(chunk.freeze())))
                }
            },
        }
    }
}

impl<B: AsyncRead> RangeBody for KnownSize<B> {
    fn byte_size(&self) -> u64 {
        self.byte_size
    }
}

fn allocate_buffer() -> BytesMut {
    BytesMut::with_capacity(IO_BUFFER_SIZE)
}
