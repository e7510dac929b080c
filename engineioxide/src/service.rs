//! The HTTP dispatcher: routes every request under the mounted path to the
//! polling or upgrade handler, and falls back to an inner service for
//! everything else.

use std::sync::Arc;
use std::task::{Context, Poll};

use http::{Method, Request, Response};
use http_body::Body;
use tower::Service;

use crate::body::ResponseBody;
use crate::engine::EngineIo;
use crate::errors::Error;
use crate::futures::error_response;
use crate::handler::EngineIoHandler;
use crate::packet::TransportType;
use crate::sid::Sid;
use crate::transport::{polling, ws};

/// Default mount point, matching the path Engine.IO clients expect. This
/// core does not itself bind a listener; the host is expected to mount the
/// service at this path (or a custom one via [`EngineIoService::with_path`]).
const DEFAULT_PATH: &str = "/engine.io";

/// Wraps an [`EngineIo`] instance as a [`tower::Service`], with a fallback
/// `inner` service for any request outside `path` (e.g. the rest of the
/// host's routes).
pub struct EngineIoService<H: EngineIoHandler, S> {
    engine: Arc<EngineIo<H>>,
    path: Arc<str>,
    inner: S,
}

// Manual `Clone` impl: deriving would add a spurious `H: Clone` bound even
// though `H` only ever appears behind an `Arc` (the handler itself is never
// cloned).
impl<H: EngineIoHandler, S: Clone> Clone for EngineIoService<H, S> {
    fn clone(&self) -> Self {
        EngineIoService {
            engine: self.engine.clone(),
            path: self.path.clone(),
            inner: self.inner.clone(),
        }
    }
}

impl<H: EngineIoHandler, S> EngineIoService<H, S> {
    pub fn new(engine: Arc<EngineIo<H>>, inner: S) -> Self {
        Self::with_path(engine, DEFAULT_PATH, inner)
    }

    pub fn with_path(engine: Arc<EngineIo<H>>, path: impl Into<Arc<str>>, inner: S) -> Self {
        EngineIoService {
            engine,
            path: path.into(),
            inner,
        }
    }

    pub fn engine(&self) -> &Arc<EngineIo<H>> {
        &self.engine
    }

    fn matches(&self, uri: &http::Uri) -> bool {
        uri.path().trim_end_matches('/') == self.path.trim_end_matches('/')
    }
}

impl<H, S, ReqBody, ResBody> Service<Request<ReqBody>> for EngineIoService<H, S>
where
    H: EngineIoHandler,
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Into<bytes::Bytes>,
    ResBody: Send + 'static,
{
    type Response = Response<ResponseBody<ResBody>>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        if !self.matches(req.uri()) {
            let mut inner = self.inner.clone();
            return Box::pin(async move { inner.call(req).await.map(|r| r.map(ResponseBody::Inner)) });
        }

        let engine = self.engine.clone();
        Box::pin(async move { Ok(dispatch(engine, req).await) })
    }
}

/// Dispatches a request to the right handler; query parsing never
/// short-circuits to a panic, only to an [`Error`] mapped by
/// [`error_response`].
async fn dispatch<H, ReqBody, ResBody>(
    engine: Arc<EngineIo<H>>,
    req: Request<ReqBody>,
) -> Response<ResponseBody<ResBody>>
where
    H: EngineIoHandler,
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Into<bytes::Bytes>,
    ResBody: Send + 'static,
{
    match route(&engine, req).await {
        Ok(resp) => resp,
        Err(e) => error_response(&e),
    }
}

async fn route<H, ReqBody, ResBody>(
    engine: &Arc<EngineIo<H>>,
    req: Request<ReqBody>,
) -> Result<Response<ResponseBody<ResBody>>, Error>
where
    H: EngineIoHandler,
    ReqBody: Body + Send + Unpin + 'static,
    ReqBody::Data: Into<bytes::Bytes>,
    ResBody: Send + 'static,
{
    let query = req.uri().query().unwrap_or("");
    let params = QueryParams::parse(query);

    // Step 1: transport.
    let transport = match params.singleton("transport") {
        Some(name) => TransportType::parse(name).ok_or(Error::TransportUnknown)?,
        None => return Err(Error::TransportUnknown),
    };

    // Step 2: sid.
    let sid = match params.singleton_values("sid") {
        None => return new_session(engine, transport, req),
        Some(values) if values.len() != 1 => {
            return Err(Error::UnknownSessionId("".parse().expect("Sid::from_str is infallible")))
        }
        Some(values) => values[0].parse::<Sid>().expect("Sid::from_str is infallible"),
    };

    let socket = engine
        .get_socket(&sid)
        .ok_or_else(|| Error::UnknownSessionId(sid.clone()))?;

    // Steps 3-4: an existing session only ever accepts a request on its
    // current transport, or an upgrade request from polling to websocket.
    match (socket.is_polling(), transport) {
        (true, TransportType::Polling) => match *req.method() {
            Method::GET => polling::polling_req(engine.clone(), sid).await,
            Method::POST => polling::post_req(engine.clone(), sid, req).await,
            _ => Err(Error::BadRequest),
        },
        (true, TransportType::Websocket) => ws::new_req(engine.clone(), sid, req),
        _ => Err(Error::BadRequest),
    }
}

fn new_session<H, ReqBody, ResBody>(
    engine: &Arc<EngineIo<H>>,
    transport: TransportType,
    req: Request<ReqBody>,
) -> Result<Response<ResponseBody<ResBody>>, Error>
where
    H: EngineIoHandler,
    ResBody: Send + 'static,
{
    // A session is always born on polling; a websocket request with no
    // `sid` has nothing to upgrade from.
    if transport != TransportType::Polling {
        return Err(Error::BadRequest);
    }
    polling::open_req(engine, req)
}

/// Thin wrapper over `form_urlencoded` for the handful of query-parameter
/// lookups the dispatcher needs.
struct QueryParams(Vec<(String, String)>);

impl QueryParams {
    fn parse(query: &str) -> Self {
        QueryParams(
            form_urlencoded::parse(query.as_bytes())
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
        )
    }

    fn singleton_values(&self, name: &str) -> Option<Vec<&str>> {
        let values: Vec<&str> = self
            .0
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(values)
        }
    }

    fn singleton(&self, name: &str) -> Option<&str> {
        match self.singleton_values(name) {
            Some(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineIoConfig;
    use crate::errors::ErrorBody;
    use crate::socket::Socket;
    use std::convert::Infallible;

    struct NoopHandler;

    #[async_trait::async_trait]
    impl EngineIoHandler for NoopHandler {
        type Data = ();
        async fn handle(&self, _socket: Arc<Socket<()>>) {}
    }

    type Fallback = tower::util::BoxCloneService<Request<hyper::Body>, Response<hyper::Body>, Infallible>;

    fn test_service() -> EngineIoService<NoopHandler, Fallback> {
        let engine = EngineIo::new(NoopHandler, EngineIoConfig::default());
        let fallback = tower::service_fn(|_req: Request<hyper::Body>| async {
            Ok::<_, Infallible>(Response::new(hyper::Body::from("fallback")))
        });
        EngineIoService::new(engine, tower::util::BoxCloneService::new(fallback))
    }

    fn error_json(resp: Response<ResponseBody<hyper::Body>>) -> (http::StatusCode, ErrorBody) {
        let status = resp.status();
        let body = match resp.into_body() {
            ResponseBody::Full(Some(b)) => b,
            _ => panic!("expected a buffered error body"),
        };
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn missing_transport_yields_transport_unknown() {
        let mut svc = test_service();
        let req = Request::builder()
            .uri("/engine.io")
            .body(hyper::Body::empty())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        let (status, body) = error_json(resp);
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body.code, 0);
    }

    #[tokio::test]
    async fn unknown_sid_yields_session_id_unknown() {
        let mut svc = test_service();
        let req = Request::builder()
            .uri("/engine.io?transport=polling&sid=does-not-exist")
            .body(hyper::Body::empty())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        let (status, body) = error_json(resp);
        assert_eq!(status, http::StatusCode::BAD_REQUEST);
        assert_eq!(body.code, 1);
    }

    #[tokio::test]
    async fn unmatched_path_falls_back_to_inner_service() {
        let mut svc = test_service();
        let req = Request::builder()
            .uri("/other")
            .body(hyper::Body::empty())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }

    #[tokio::test]
    async fn get_without_sid_opens_a_new_session() {
        let mut svc = test_service();
        let req = Request::builder()
            .uri("/engine.io?transport=polling")
            .body(hyper::Body::empty())
            .unwrap();
        let resp = svc.call(req).await.unwrap();
        assert_eq!(resp.status(), http::StatusCode::OK);
    }
}
