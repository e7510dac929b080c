//! The response body type the dispatcher hands back to its host.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body::Body;

/// Either a single buffered chunk -- the common case, since every response
/// this core writes (an `OPEN` payload, a polling payload, an error body)
/// fits in memory -- or an arbitrary inner body the host handed us for a
/// request this service declines to handle (see
/// [`crate::service::EngineIoService`]).
#[pin_project::pin_project(project = ResponseBodyProj)]
pub enum ResponseBody<B> {
    Full(Option<Bytes>),
    Inner(#[pin] B),
}

impl<B> ResponseBody<B> {
    pub fn new(data: impl Into<Bytes>) -> Self {
        ResponseBody::Full(Some(data.into()))
    }

    pub fn empty() -> Self {
        ResponseBody::Full(None)
    }
}

impl<B> Body for ResponseBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_data(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Self::Data, Self::Error>>> {
        match self.project() {
            ResponseBodyProj::Full(data) => Poll::Ready(data.take().map(Ok)),
            ResponseBodyProj::Inner(inner) => inner.poll_data(cx),
        }
    }

    fn poll_trailers(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<http::HeaderMap>, Self::Error>> {
        match self.project() {
            ResponseBodyProj::Full(_) => Poll::Ready(Ok(None)),
            ResponseBodyProj::Inner(inner) => inner.poll_trailers(cx),
        }
    }
}
