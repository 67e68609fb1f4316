//! Request and chunked-response types shared by the portal and its listeners

use std::net::IpAddr;

/// HTTP method of a portal request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Other => "OTHER",
        }
    }

    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

/// File part of a multipart form post
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub field: String,
    pub filename: String,
    pub data: Vec<u8>,
}

/// One decoded portal request: query and form arguments are merged into `args`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalRequest {
    pub method: Method,
    pub uri: String,
    pub args: Vec<(String, String)>,
    pub authorization: Option<String>,
    pub remote_addr: Option<IpAddr>,
    pub upload: Option<Upload>,
}

impl PortalRequest {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            args: Vec::new(),
            authorization: None,
            remote_addr: None,
            upload: None,
        }
    }

    pub fn get(uri: impl Into<String>) -> Self {
        Self::new(Method::Get, uri)
    }

    pub fn post(uri: impl Into<String>) -> Self {
        Self::new(Method::Post, uri)
    }

    /// Builder: append an argument
    pub fn arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// Builder: set the raw `Authorization` header
    pub fn authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    /// Builder: attach an uploaded file
    pub fn upload(mut self, upload: Upload) -> Self {
        self.upload = Some(upload);
        self
    }

    /// Path component of the URI, without the query string
    pub fn path(&self) -> &str {
        self.uri.split('?').next().unwrap_or("")
    }

    /// First value of the named argument
    pub fn get_arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn has_arg(&self, name: &str) -> bool {
        self.get_arg(name).is_some()
    }
}

/// Streaming response writer supplied by the listener for one request
///
/// A response is `begin`, any number of `chunk`s, then `end`. The body length
/// is never declared up front.
pub trait ResponseSink {
    fn begin(&mut self, status: u16, content_type: &str, headers: &[(String, String)]);

    fn chunk(&mut self, content: &str);

    fn end(&mut self);
}

/// A request paired with the sink its response must be written to
pub struct PendingRequest {
    pub request: PortalRequest,
    pub sink: Box<dyn ResponseSink>,
}

impl PendingRequest {
    pub fn new(request: PortalRequest, sink: Box<dyn ResponseSink>) -> Self {
        Self { request, sink }
    }
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}
