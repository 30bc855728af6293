//! Plain request/response value types shared between the hedging engine and
//! transports.
//!
//! Requests are cheap to clone so the engine can hand an identical copy to
//! every attempt. Response bodies may stream; losing attempts drain them so
//! the underlying connection can be reused.

use std::{fmt, io, pin::Pin};

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode, Version};
use url::Url;

/// Boxed byte stream used for streaming response bodies.
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// An HTTP request as seen by the hedging engine.
///
/// The engine clones one request per attempt, so header and body buffers are
/// never shared mutably between attempts.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute request URL; resources match against its full string form.
    pub url: Url,
    /// Request headers.
    pub headers: HeaderMap,
    /// Request body. Buffered so every attempt can replay it.
    pub body: Bytes,
    /// HTTP version hint for the transport.
    pub version: Version,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            version: Version::HTTP_11,
        }
    }

    /// Convenience constructor for a GET request.
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url)
    }

    /// Replaces the request body.
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Replaces the request headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// An HTTP response as produced by a transport.
#[derive(Debug)]
pub struct Response {
    /// Response status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
    /// HTTP version the exchange was performed over.
    pub version: Version,
    body: Body,
}

impl Response {
    /// Creates a response with an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            version: Version::HTTP_11,
            body: Body::empty(),
        }
    }

    /// Replaces the response body.
    pub fn with_body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    /// Replaces the response headers.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Consumes the response, returning its body.
    pub fn into_body(self) -> Body {
        self.body
    }
}

/// A response body: empty, fully buffered, or streaming from the wire.
pub enum Body {
    /// No body.
    Empty,
    /// Fully buffered body.
    Full(Bytes),
    /// Body still streaming from the transport.
    Streaming(BodyStream),
}

impl Body {
    /// An empty body.
    pub fn empty() -> Self {
        Body::Empty
    }

    /// A fully buffered body.
    pub fn full(bytes: impl Into<Bytes>) -> Self {
        Body::Full(bytes.into())
    }

    /// A body backed by a stream of chunks.
    pub fn streaming(stream: BodyStream) -> Self {
        Body::Streaming(stream)
    }

    /// Collects the whole body into contiguous bytes.
    pub async fn bytes(self) -> Result<Bytes, io::Error> {
        match self {
            Body::Empty => Ok(Bytes::new()),
            Body::Full(bytes) => Ok(bytes),
            Body::Streaming(mut stream) => {
                let mut buf = BytesMut::new();
                while let Some(chunk) = stream.next().await {
                    buf.extend_from_slice(&chunk?);
                }
                Ok(buf.freeze())
            }
        }
    }

    /// Consumes the body to completion and discards it.
    ///
    /// Losing attempts must drain their bodies so the transport can return
    /// the connection to its pool. Read errors are ignored; the body is
    /// being thrown away.
    pub async fn drain(self) {
        if let Body::Streaming(mut stream) = self {
            while let Some(chunk) = stream.next().await {
                if chunk.is_err() {
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Body::Empty => f.write_str("Body::Empty"),
            Body::Full(bytes) => write!(f, "Body::Full({} bytes)", bytes.len()),
            Body::Streaming(_) => f.write_str("Body::Streaming"),
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::Full(bytes)
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::Full(Bytes::from_static(s.as_bytes()))
    }
}
