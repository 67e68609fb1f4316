//! axum front-end for the node's configuration portal
//!
//! Requests are decoded into [`PortalRequest`]s and queued for the runtime
//! thread. The runtime answers through a [`ChannelSink`]; its chunks are
//! streamed back as the HTTP body.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, DefaultBodyLimit, FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Form, Router,
};
use fieldnode_core::platform::PortalServer;
use fieldnode_core::portal::{Method, PendingRequest, PortalRequest, ResponseSink, Upload};
use std::cell::RefCell;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::rc::Rc;
use tokio::sync::mpsc;

/// Largest accepted request body (firmware uploads)
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// One piece of a streamed portal response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    Begin {
        status: u16,
        content_type: String,
        headers: Vec<(String, String)>,
    },
    Chunk(String),
    End,
}

/// A decoded request on its way to the runtime thread
#[derive(Debug)]
pub struct BridgedRequest {
    pub request: PortalRequest,
    pub reply: mpsc::UnboundedSender<ResponseEvent>,
}

/// HTTP side of the bridge, shared by all handlers
#[derive(Clone)]
pub struct PortalBridge {
    requests: mpsc::UnboundedSender<BridgedRequest>,
}

/// Create both ends of the bridge
pub fn channel() -> (PortalBridge, mpsc::UnboundedReceiver<BridgedRequest>) {
    let (requests, incoming) = mpsc::unbounded_channel();
    (PortalBridge { requests }, incoming)
}

pub fn router(bridge: PortalBridge) -> Router {
    Router::new()
        .fallback(forward)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(bridge)
}

async fn forward(State(bridge): State<PortalBridge>, request: Request) -> Response {
    let request = match decode(request).await {
        Ok(request) => request,
        Err(reason) => {
            tracing::debug!("rejecting portal request: {}", reason);
            return (StatusCode::BAD_REQUEST, reason).into_response();
        }
    };

    let (reply, mut events) = mpsc::unbounded_channel();
    if bridge.requests.send(BridgedRequest { request, reply }).is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "node is not running").into_response();
    }

    let Some(ResponseEvent::Begin {
        status,
        content_type,
        headers,
    }) = events.recv().await
    else {
        return (StatusCode::SERVICE_UNAVAILABLE, "node dropped the request").into_response();
    };

    let body = futures::stream::unfold(events, |mut events| async move {
        loop {
            match events.recv().await {
                Some(ResponseEvent::Chunk(chunk)) if chunk.is_empty() => continue,
                Some(ResponseEvent::Chunk(chunk)) => {
                    return Some((Ok::<_, Infallible>(Bytes::from(chunk)), events))
                }
                Some(ResponseEvent::Begin { .. }) => continue,
                Some(ResponseEvent::End) | None => return None,
            }
        }
    });

    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() =
        StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let Ok(value) = HeaderValue::from_str(&content_type) {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }
    for (name, value) in headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => tracing::warn!("dropping invalid response header '{}'", name),
        }
    }
    response
}

/// Flatten an HTTP request: query and form fields become args, a multipart
/// file part becomes the upload
async fn decode(request: Request) -> Result<PortalRequest, String> {
    let uri = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let mut decoded = PortalRequest::new(Method::parse(request.method().as_str()), uri);
    decoded.authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);
    decoded.remote_addr = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    if let Ok(Query(args)) = Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
        decoded.args.extend(args);
    }

    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| e.body_text())?;

        while let Some(field) = multipart.next_field().await.map_err(|e| e.body_text())? {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(filename) => {
                    let data = field.bytes().await.map_err(|e| e.body_text())?;
                    decoded.upload = Some(Upload {
                        field: name,
                        filename,
                        data: data.to_vec(),
                    });
                }
                None => {
                    let value = field.text().await.map_err(|e| e.body_text())?;
                    decoded.args.push((name, value));
                }
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let Form(args) = Form::<Vec<(String, String)>>::from_request(request, &())
            .await
            .map_err(|e| e.body_text())?;
        decoded.args.extend(args);
    }

    Ok(decoded)
}

/// Response writer that forwards to the waiting HTTP handler
pub struct ChannelSink {
    reply: mpsc::UnboundedSender<ResponseEvent>,
}

impl ChannelSink {
    fn emit(&self, event: ResponseEvent) {
        // the client may have hung up
        let _ = self.reply.send(event);
    }
}

impl ResponseSink for ChannelSink {
    fn begin(&mut self, status: u16, content_type: &str, headers: &[(String, String)]) {
        self.emit(ResponseEvent::Begin {
            status,
            content_type: content_type.to_string(),
            headers: headers.to_vec(),
        });
    }

    fn chunk(&mut self, content: &str) {
        self.emit(ResponseEvent::Chunk(content.to_string()));
    }

    fn end(&mut self) {
        self.emit(ResponseEvent::End);
    }
}

/// Runtime side of the bridge
///
/// The receiver is shared so it survives the runtime being rebuilt after a
/// restart.
pub struct BridgeServer {
    incoming: Rc<RefCell<mpsc::UnboundedReceiver<BridgedRequest>>>,
}

impl BridgeServer {
    pub fn new(incoming: Rc<RefCell<mpsc::UnboundedReceiver<BridgedRequest>>>) -> Self {
        Self { incoming }
    }
}

impl PortalServer for BridgeServer {
    fn accept(&mut self) -> Option<PendingRequest> {
        let BridgedRequest { request, reply } = self.incoming.borrow_mut().try_recv().ok()?;
        Some(PendingRequest::new(request, Box::new(ChannelSink { reply })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    /// Answer the next request on the runtime side with a fixed page
    async fn answer_once(
        mut incoming: mpsc::UnboundedReceiver<BridgedRequest>,
    ) -> PortalRequest {
        let BridgedRequest { request, reply } = incoming.recv().await.unwrap();
        let mut sink = ChannelSink { reply };
        sink.begin(200, "text/html", &[("X-Node".to_string(), "relay".to_string())]);
        sink.chunk("<p>");
        sink.chunk("hello");
        sink.chunk("");
        sink.chunk("</p>");
        sink.end();
        request
    }

    #[tokio::test]
    async fn test_query_and_auth_are_forwarded() {
        let (bridge, incoming) = channel();
        let runtime = tokio::spawn(answer_once(incoming));

        let response = router(bridge)
            .oneshot(
                Request::builder()
                    .uri("/relay?state=on")
                    .header(header::AUTHORIZATION, "Basic YWRtaW46c2VjcmV0")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-node"], "relay");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"<p>hello</p>");

        let request = runtime.await.unwrap();
        assert_eq!(request.path(), "/relay");
        assert_eq!(request.get_arg("state"), Some("on"));
        assert_eq!(
            request.authorization.as_deref(),
            Some("Basic YWRtaW46c2VjcmV0")
        );
    }

    #[tokio::test]
    async fn test_form_body_becomes_args() {
        let (bridge, incoming) = channel();
        let runtime = tokio::spawn(answer_once(incoming));

        router(bridge)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/saveSettings")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("mqttServer=10.0.0.9&mqttPort=1884"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let request = runtime.await.unwrap();
        assert_eq!(request.method, Method::Post);
        assert_eq!(request.get_arg("mqttServer"), Some("10.0.0.9"));
        assert_eq!(request.get_arg("mqttPort"), Some("1884"));
    }

    #[tokio::test]
    async fn test_multipart_file_becomes_upload() {
        let (bridge, incoming) = channel();
        let runtime = tokio::spawn(answer_once(incoming));

        let body = "--XYZ\r\n\
            Content-Disposition: form-data; name=\"firmware\"; filename=\"fw.bin\"\r\n\
            Content-Type: application/octet-stream\r\n\r\n\
            IMAGE\r\n\
            --XYZ--\r\n";
        router(bridge)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/updateFw")
                    .header(header::CONTENT_TYPE, "multipart/form-data; boundary=XYZ")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();

        let request = runtime.await.unwrap();
        let upload = request.upload.unwrap();
        assert_eq!(upload.field, "firmware");
        assert_eq!(upload.filename, "fw.bin");
        assert_eq!(upload.data, b"IMAGE");
    }

    #[tokio::test]
    async fn test_stopped_node_is_unavailable() {
        let (bridge, incoming) = channel();
        drop(incoming);

        let response = router(bridge)
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_server_wraps_queued_requests() {
        let (bridge, incoming) = channel();
        let mut server = BridgeServer::new(Rc::new(RefCell::new(incoming)));
        assert!(server.accept().is_none());

        let (reply, mut events) = mpsc::unbounded_channel();
        bridge
            .requests
            .send(BridgedRequest {
                request: PortalRequest::get("/status"),
                reply,
            })
            .unwrap();

        let mut pending = server.accept().unwrap();
        assert_eq!(pending.request.path(), "/status");
        pending.sink.begin(404, "text/plain", &[]);
        pending.sink.end();
        assert_eq!(
            events.try_recv().unwrap(),
            ResponseEvent::Begin {
                status: 404,
                content_type: "text/plain".to_string(),
                headers: Vec::new(),
            }
        );
        assert_eq!(events.try_recv().unwrap(), ResponseEvent::End);
    }
}
