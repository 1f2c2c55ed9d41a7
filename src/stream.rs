use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::Stream;
use http_body::{Body, Frame, SizeHint};
use pin_project::pin_project;
use thiserror::Error;

use crate::ByteRange;

/// Error returned by [`Clip::new`] for a range with inverted bounds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid byte range: {from}-{to}")]
pub struct InvalidRange {
    pub from: u64,
    pub to: u64,
}

/// Cursor tracking how far into the upstream byte positions the clip has
/// advanced. `next` is the absolute offset of the first unseen byte.
#[derive(Debug)]
struct ClipState {
    range: ByteRange,
    next: u64,
}

impl ClipState {
    /// Advance past `chunk`, returning the part of it that lies inside the
    /// range.
    fn process_chunk(&mut self, chunk: &Bytes) -> Option<Bytes> {
        if chunk.is_empty() {
            return None;
        }

        let pos = self.next;
        self.next = pos.saturating_add(chunk.len() as u64);

        // chunk lies entirely before or after the range
        if self.next <= self.range.from || pos > self.range.to {
            return None;
        }

        // bounds of the covered part of this chunk
        let from = self.range.from.saturating_sub(pos) as usize;
        let to = std::cmp::min(
            chunk.len() as u64,
            (self.range.to - pos).saturating_add(1),
        ) as usize;

        Some(chunk.slice(from..to))
    }

    fn is_satisfied(&self) -> bool {
        self.next > self.range.to
    }
}

/// Byte stream clipped to a single range, emitted in one pass over the
/// upstream. Implements [`Stream`], [`Body`], and [`IntoResponse`].
#[pin_project]
pub struct Clip<S> {
    state: ClipState,
    done: bool,
    #[pin]
    upstream: S,
}

impl<S> Clip<S> {
    /// Clip `upstream` to `range`. With no range the clip serves exactly the
    /// first byte of the stream.
    pub fn new(upstream: S, range: Option<ByteRange>) -> Result<Self, InvalidRange> {
        let range = range.unwrap_or(ByteRange::new(0, 0));

        if range.from > range.to {
            return Err(InvalidRange { from: range.from, to: range.to });
        }

        Ok(Clip {
            state: ClipState { range, next: 0 },
            done: false,
            upstream,
        })
    }
}

impl<S> fmt::Debug for Clip<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Clip")
            .field("range", &self.state.range)
            .field("next", &self.state.next)
            .field("done", &self.done)
            .finish()
    }
}

impl<S: Stream<Item = io::Result<Bytes>> + Send + 'static> IntoResponse for Clip<S> {
    fn into_response(self) -> Response {
        Response::new(axum::body::Body::new(self))
    }
}

impl<S: Stream<Item = io::Result<Bytes>>> Body for Clip<S> {
    type Data = Bytes;
    type Error = io::Error;

    fn size_hint(&self) -> SizeHint {
        SizeHint::with_exact(self.state.range.len())
    }

    fn poll_frame(self: Pin<&mut Self>, cx: &mut Context<'_>)
        -> Poll<Option<io::Result<Frame<Bytes>>>>
    {
        self.poll_next(cx).map(|item| item.map(|result| result.map(Frame::data)))
    }
}

impl<S: Stream<Item = io::Result<Bytes>>> Stream for Clip<S> {
    type Item = io::Result<Bytes>;

    fn poll_next(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<Bytes>>> {
        let mut this = self.project();

        while !*this.done {
            let chunk = match this.upstream.as_mut().poll_next(cx) {
                Poll::Pending => { return Poll::Pending; }
                Poll::Ready(Some(Ok(chunk))) => chunk,
                Poll::Ready(Some(Err(e))) => {
                    *this.done = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => break,
            };

            let slice = this.state.process_chunk(&chunk);

            // once the range is fully covered the stream is over. the
            // upstream is never polled again, so errors it produces past
            // this point are not surfaced
            if this.state.is_satisfied() {
                *this.done = true;
            }

            if let Some(slice) = slice {
                return Poll::Ready(Some(Ok(slice)));
            }
        }

        *this.done = true;
        Poll::Ready(None)
    }
}
