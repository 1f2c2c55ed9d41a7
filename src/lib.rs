//! # axum-clip
//!
//! HTTP Range requests for [`axum`][1].
//!
//! [`parse_range_header`] turns a raw `Range` header value into validated,
//! consolidated byte ranges. [`Clip`] cuts one of those ranges out of any
//! chunked byte stream in a single pass, without seeking. [`Ranged`] wires
//! the two into an axum responder answering 200, 206, or 416 as
//! appropriate.
//!
//! Fully generic, supports any body implementing the [`RangeBody`] trait.
//! Any type implementing [`AsyncRead`] can be served through the
//! [`KnownSize`] adapter struct. There is also special cased support for
//! [`tokio::fs::File`], see the [`KnownSize::path`] method.
//!
//! ```
//! use axum::Router;
//! use axum::http::{header, HeaderMap};
//! use axum::routing::get;
//!
//! use axum_clip::{KnownSize, Ranged};
//!
//! async fn file(headers: HeaderMap) -> Ranged<KnownSize<tokio::fs::File>> {
//!     let body = KnownSize::path("test/fixture.txt").await.unwrap();
//!     let content_type = body.content_type();
//!     let range = headers.get(header::RANGE)
//!         .and_then(|value| value.to_str().ok())
//!         .map(str::to_owned);
//!     Ranged::new(range, body, content_type)
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     // build our application with a single route
//!     let _app = Router::<()>::new().route("/", get(file));
//! }
//! ```
//!
//! [1]: https://docs.rs/axum
//! [`AsyncRead`]: tokio::io::AsyncRead

mod file;
mod header;
mod stream;

use std::io;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum_extra::TypedHeader;
use axum_extra::headers::{AcceptRanges, ContentLength, ContentRange};
use bytes::Bytes;
use futures::Stream;
use tracing::debug;

pub use file::KnownSize;
pub use header::parse_range_header;
pub use stream::{Clip, InvalidRange};

/// A chunked byte stream with a fixed known byte size.
pub trait RangeBody: Stream<Item = io::Result<Bytes>> {
    /// The total size of the underlying resource in bytes.
    ///
    /// This should not change for the lifetime of the object once queried.
    /// Behaviour is not guaranteed if it does change.
    fn byte_size(&self) -> u64;
}

/// A single byte range, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub from: u64,
    pub to: u64,
}

impl ByteRange {
    /// Create a new byte range with inclusive `from` and `to` positions.
    pub fn new(from: u64, to: u64) -> Self {
        ByteRange { from, to }
    }

    /// The number of bytes the range covers. Saturates for a range spanning
    /// the whole `u64` domain.
    pub fn len(&self) -> u64 {
        (self.to - self.from).saturating_add(1)
    }
}

/// The main responder type. Implements [`IntoResponse`].
pub struct Ranged<B: RangeBody + Send + 'static> {
    range: Option<String>,
    body: B,
    content_type: Option<String>,
}

impl<B: RangeBody + Send + 'static> Ranged<B> {
    /// Construct a ranged response over any type implementing [`RangeBody`],
    /// the raw value of the request's `Range` header if there was one, and
    /// an optional content type.
    pub fn new(range: Option<String>, body: B, content_type: Option<String>) -> Self {
        Ranged { range, body, content_type }
    }

    /// Responds to the request, returning headers and body as
    /// [`RangedResponse`]. Returns [`RangeNotSatisfiable`] error if the
    /// requested range was invalid or unsatisfiable.
    pub fn try_respond(self) -> Result<RangedResponse<B>, RangeNotSatisfiable> {
        let Ranged { range, body, content_type } = self;

        let total_bytes = body.byte_size();

        let Some(header) = range else {
            debug!(total_bytes, "serving full body");

            return Ok(RangedResponse::Full {
                content_length: ContentLength(total_bytes),
                content_type,
                stream: body,
            });
        };

        let Some(ranges) = parse_range_header(&header, total_bytes) else {
            debug!(header = %header, total_bytes, "range not satisfiable");

            let content_range = ContentRange::unsatisfied_bytes(total_bytes);
            return Err(RangeNotSatisfiable(content_range));
        };

        // we don't serve multiple byte ranges, only none or one.
        // fortunately, responding with one of the requested ranges and no
        // more seems to be compliant with the HTTP spec
        let range = ranges[0];

        debug!(from = range.from, to = range.to, total_bytes, "serving partial body");

        let content_range = ContentRange::bytes(range.from..range.to + 1, total_bytes)
            .expect("ContentRange::bytes cannot panic in this usage");

        let content_length = ContentLength(range.len());

        let stream = Clip::new(body, Some(range))
            .expect("parsed ranges are never inverted");

        Ok(RangedResponse::Single {
            content_range,
            content_length,
            content_type,
            stream,
        })
    }
}

impl<B: RangeBody + Send + 'static> IntoResponse for Ranged<B> {
    fn into_response(self) -> Response {
        self.try_respond().into_response()
    }
}

/// Error type indicating that the requested range was not satisfiable. Implements [`IntoResponse`].
#[derive(Debug, Clone)]
pub struct RangeNotSatisfiable(pub ContentRange);

impl IntoResponse for RangeNotSatisfiable {
    fn into_response(self) -> Response {
        let status = StatusCode::RANGE_NOT_SATISFIABLE;
        let header = TypedHeader(self.0);
        (status, header, ()).into_response()
    }
}

/// Data type containing computed headers and body for a range response. Implements [`IntoResponse`].
pub enum RangedResponse<B> {
    /// Full content response, no range requested.
    Full {
        content_length: ContentLength,
        content_type: Option<String>,
        stream: B,
    },
    /// Partial content response for a single satisfiable range.
    Single {
        content_range: ContentRange,
        content_length: ContentLength,
        content_type: Option<String>,
        stream: Clip<B>,
    },
}

impl<B: RangeBody + Send + 'static> IntoResponse for RangedResponse<B> {
    fn into_response(self) -> Response {
        match self {
            RangedResponse::Full { content_length, content_type, stream } => {
                let content_length = TypedHeader(content_length);
                let accept_ranges = TypedHeader(AcceptRanges::bytes());
                let content_type = content_type_header(content_type);
                let body = axum::body::Body::from_stream(stream);

                (StatusCode::OK, content_length, accept_ranges, content_type, body)
                    .into_response()
            }
            RangedResponse::Single { content_range, content_length, content_type, stream } => {
                let content_range = TypedHeader(content_range);
                let content_length = TypedHeader(content_length);
                let accept_ranges = TypedHeader(AcceptRanges::bytes());
                let content_type = content_type_header(content_type);

                (StatusCode::PARTIAL_CONTENT, content_range, content_length, accept_ranges, content_type, stream)
                    .into_response()
            }
        }
    }
}

/// A content type string only carries into the response if it is a valid
/// header value.
fn content_type_header(content_type: Option<String>) -> Option<[(HeaderName, HeaderValue); 1]> {
    let content_type = content_type?;
    let value = HeaderValue::from_str(&content_type).ok()?;
    Some([(CONTENT_TYPE, value)])
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::io::Cursor;

    use axum::http::{HeaderValue, StatusCode};
    use axum::response::IntoResponse;
    use axum_extra::headers::{ContentLength, ContentRange};
    use bytes::Bytes;
    use futures::{pin_mut, Stream, StreamExt};
    use tokio::fs::File;

    use crate::{ByteRange, KnownSize, Ranged, RangedResponse};

    const FIXTURE: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\n";

    async fn collect_stream(stream: impl Stream<Item = io::Result<Bytes>>) -> String {
        let mut string = String::new();
        pin_mut!(stream);
        while let Some(chunk) = stream.next().await.transpose().unwrap() {
            string += std::str::from_utf8(&chunk).unwrap();
        }
        string
    }

    async fn collect_body_stream(body: impl Stream<Item = Result<Bytes, axum::Error>>) -> String {
        let mut string = String::new();
        pin_mut!(body);
        while let Some(chunk) = body.next().await.transpose().unwrap() {
            string += std::str::from_utf8(&chunk).unwrap();
        }
        string
    }

    fn range(header: &str) -> Option<String> {
        Some(header.to_owned())
    }

    async fn body() -> KnownSize<File> {
        KnownSize::path("test/fixture.txt").await.unwrap()
    }

    #[test]
    fn test_byte_range_len() {
        assert_eq!(1, ByteRange::new(0, 0).len());
        assert_eq!(10, ByteRange::new(5, 14).len());
        assert_eq!(u64::MAX, ByteRange::new(0, u64::MAX).len());
    }

    #[tokio::test]
    async fn test_full_response() {
        let ranged = Ranged::new(None, body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");
        let body = {
            let response = response.into_response();
            assert_eq!(StatusCode::OK, response.status());

            let head = response.headers();
            assert_eq!(Some(HeaderValue::from_static("bytes")).as_ref(), head.get("Accept-Ranges"));
            assert_eq!(Some(HeaderValue::from_static("63")).as_ref(), head.get("Content-Length"));
            assert_eq!(None, head.get("Content-Range"));

            response.into_body().into_data_stream()
        };

        assert_eq!(FIXTURE, &collect_body_stream(body).await);
    }

    #[tokio::test]
    async fn test_content_type_header() {
        let ranged = Ranged::new(None, body().await, Some("text/plain".to_owned()));

        let response = ranged.into_response();
        let head = response.headers();
        assert_eq!(Some(HeaderValue::from_static("text/plain")).as_ref(), head.get("Content-Type"));
    }

    #[tokio::test]
    async fn test_partial_response_status_and_headers() {
        let ranged = Ranged::new(range("bytes=0-9"), body().await, None);

        let response = ranged.into_response();
        assert_eq!(StatusCode::PARTIAL_CONTENT, response.status());

        let head = response.headers();
        assert_eq!(Some(HeaderValue::from_static("bytes")).as_ref(), head.get("Accept-Ranges"));
        assert_eq!(Some(HeaderValue::from_static("bytes 0-9/63")).as_ref(), head.get("Content-Range"));
        assert_eq!(Some(HeaderValue::from_static("10")).as_ref(), head.get("Content-Length"));
    }

    #[tokio::test]
    async fn test_partial_response_1() {
        let ranged = Ranged::new(range("bytes=0-29"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(30), content_length);
                assert_eq!(ContentRange::bytes(0..30, 63).unwrap(), content_range);
                assert_eq!("0123456789abcdefghijklmnopqrst", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_partial_response_2() {
        let ranged = Ranged::new(range("bytes=30-62"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(33), content_length);
                assert_eq!(ContentRange::bytes(30..63, 63).unwrap(), content_range);
                assert_eq!("uvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\n", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_suffix_response() {
        // unbounded start ranges in HTTP are actually a suffix

        let ranged = Ranged::new(range("bytes=-10"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(10), content_length);
                assert_eq!(ContentRange::bytes(53..63, 63).unwrap(), content_range);
                assert_eq!("RSTUVWXYZ\n", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_open_ended_response() {
        let ranged = Ranged::new(range("bytes=55-"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(8), content_length);
                assert_eq!(ContentRange::bytes(55..63, 63).unwrap(), content_range);
                assert_eq!("TUVWXYZ\n", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_one_byte_response() {
        let ranged = Ranged::new(range("bytes=30-30"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(1), content_length);
                assert_eq!(ContentRange::bytes(30..31, 63).unwrap(), content_range);
                assert_eq!("u", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_inverted_range() {
        let ranged = Ranged::new(range("bytes=30-29"), body().await, None);

        let err = ranged.try_respond().err().expect("try_respond should return Err");

        let expected_content_range = ContentRange::unsatisfied_bytes(63);
        assert_eq!(expected_content_range, err.0)
    }

    #[tokio::test]
    async fn test_range_end_exceed_length() {
        let ranged = Ranged::new(range("bytes=30-99"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(33), content_length);
                assert_eq!(ContentRange::bytes(30..63, 63).unwrap(), content_range);
                assert_eq!("uvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\n", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_range_start_exceed_length() {
        let ranged = Ranged::new(range("bytes=99-"), body().await, None);

        let err = ranged.try_respond().err().expect("try_respond should return Err");

        let expected_content_range = ContentRange::unsatisfied_bytes(63);
        assert_eq!(expected_content_range, err.0)
    }

    #[tokio::test]
    async fn test_suffix_exceed_length() {
        let ranged = Ranged::new(range("bytes=-100"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(63), content_length);
                assert_eq!(ContentRange::bytes(0..63, 63).unwrap(), content_range);
                assert_eq!(FIXTURE, &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_multiple_ranges_serves_first() {
        let ranged = Ranged::new(range("bytes=10-14,30-34"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(5), content_length);
                assert_eq!(ContentRange::bytes(10..15, 63).unwrap(), content_range);
                assert_eq!("abcde", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_adjacent_ranges_merge() {
        let ranged = Ranged::new(range("bytes=0-4,5-9"), body().await, None);

        let response = ranged.try_respond().expect("try_respond should return Ok");

        match response {
            RangedResponse::Single { content_range, content_length, stream, .. } => {
                assert_eq!(ContentLength(10), content_length);
                assert_eq!(ContentRange::bytes(0..10, 63).unwrap(), content_range);
                assert_eq!("0123456789", &collect_stream(stream).await);
            }
            _ => panic!("expected a single range response"),
        }
    }

    #[tokio::test]
    async fn test_malformed_header() {
        let ranged = Ranged::new(range("bytes=oops"), body().await, None);

        let err = ranged.try_respond().err().expect("try_respond should return Err");

        let expected_content_range = ContentRange::unsatisfied_bytes(63);
        assert_eq!(expected_content_range, err.0)
    }

    #[tokio::test]
    async fn test_range_into_empty_body() {
        let body = KnownSize::sized(Cursor::new(Vec::<u8>::new()), 0);
        let ranged = Ranged::new(range("bytes=0-"), body, None);

        let err = ranged.try_respond().err().expect("try_respond should return Err");

        let expected_content_range = ContentRange::unsatisfied_bytes(0);
        assert_eq!(expected_content_range, err.0)
    }
}
