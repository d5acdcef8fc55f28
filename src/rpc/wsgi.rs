use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Read},
};

use http::{Method, StatusCode};
use tracing::error;

use crate::rpc::{
    HandlerError, RpcError, RpcHandler, RpcRequest, APPLICATION_JSON_CONTENT_TYPE,
    FORM_URLENCODED_MIME_TYPE, TEXT_PLAIN_CONTENT_TYPE,
};

/// A CGI-like request environment: a string map plus the request body
/// stream.
///
/// The recognized keys are `REQUEST_METHOD`, `PATH_INFO`, `QUERY_STRING`,
/// `CONTENT_TYPE` and `CONTENT_LENGTH`. The body stream is read only for
/// form-urlencoded requests with a positive content length, and never
/// beyond `CONTENT_LENGTH` bytes.
pub struct Environ<R = io::Empty> {
    vars: HashMap<String, String>,
    input: R,
}

impl Environ<io::Empty> {
    pub fn new(vars: HashMap<String, String>) -> Self {
        Environ {
            vars,
            input: io::empty(),
        }
    }
}

impl<R: Read> Environ<R> {
    pub fn with_input(vars: HashMap<String, String>, input: R) -> Self {
        Environ { vars, input }
    }

    fn var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }
}

/// The response triple handed back to the hosting web server.
#[derive(Debug)]
pub struct WsgiResponse {
    pub status: StatusCode,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl WsgiResponse {
    fn new(status: StatusCode, content_type: &str, body: Vec<u8>) -> Self {
        WsgiResponse {
            status,
            headers: vec![
                ("Content-Type".to_owned(), content_type.to_owned()),
                ("Content-Length".to_owned(), body.len().to_string()),
            ],
            body,
        }
    }

    fn plain_text(status: StatusCode, content: &str) -> Self {
        WsgiResponse::new(status, TEXT_PLAIN_CONTENT_TYPE, content.as_bytes().to_vec())
    }
}

/// A WSGI-style RPC gateway.
///
/// Translates a request environment into an [`RpcRequest`], calls the
/// handler and renders the outcome: `200 OK` with a JSON envelope on
/// success, `422` with a JSON envelope for application exceptions, and a
/// plain-text status page for transport and internal errors. The gateway is
/// stateless apart from the handler and safe to call concurrently from the
/// host server pool.
pub struct WsgiApp {
    handler: RpcHandler,
}

impl WsgiApp {
    pub fn new(handler: RpcHandler) -> Self {
        WsgiApp { handler }
    }

    pub fn handle<R: Read>(&self, environ: Environ<R>) -> WsgiResponse {
        let request = match parse_request(environ) {
            Ok(request) => request,
            Err(e) => return WsgiResponse::plain_text(e.status, &e.message),
        };

        match self.handler.handle(&request) {
            Ok((success, result)) => {
                let status = if success {
                    StatusCode::OK
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                };
                match result.to_json_pretty() {
                    Ok(content) => WsgiResponse::new(
                        status,
                        APPLICATION_JSON_CONTENT_TYPE,
                        content.into_bytes(),
                    ),
                    Err(e) => {
                        error!(error = %e, "failed to serialize an rpc result");
                        WsgiResponse::plain_text(
                            StatusCode::INTERNAL_SERVER_ERROR,
                            "Internal server error",
                        )
                    }
                }
            }
            Err(HandlerError::Rpc(e)) => WsgiResponse::plain_text(e.status, &e.message),
            Err(HandlerError::Internal(e)) => {
                error!(error = %e, "unhandled service error");
                WsgiResponse::plain_text(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

fn parse_request<R: Read>(mut environ: Environ<R>) -> Result<RpcRequest, RpcError> {
    let method = environ.var("REQUEST_METHOD").unwrap_or("GET");
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|_| RpcError::new(StatusCode::BAD_REQUEST, "Invalid request method"))?;

    let path = environ.var("PATH_INFO").unwrap_or("").to_owned();
    let query = parse_urlencoded(environ.var("QUERY_STRING").unwrap_or("").as_bytes());
    let post = read_post(&mut environ)?;

    let mut request = RpcRequest::new(method, path);
    request.query = query;
    request.post = post;
    Ok(request)
}

fn read_post<R: Read>(environ: &mut Environ<R>) -> Result<BTreeMap<String, String>, RpcError> {
    let content_type = environ
        .var("CONTENT_TYPE")
        .unwrap_or("")
        .to_ascii_lowercase();
    let content_length: u64 = environ
        .var("CONTENT_LENGTH")
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    if content_length == 0 || !content_type.starts_with(FORM_URLENCODED_MIME_TYPE) {
        return Ok(BTreeMap::new());
    }

    let mut body = Vec::new();
    (&mut environ.input)
        .take(content_length)
        .read_to_end(&mut body)
        .map_err(|e| {
            RpcError::new(
                StatusCode::BAD_REQUEST,
                format!("failed to read the request body: {e}"),
            )
        })?;

    Ok(parse_urlencoded(&body))
}

// Urlencoded pairs, UTF-8 decoded, first value per key.
fn parse_urlencoded(bytes: &[u8]) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for (key, value) in form_urlencoded::parse(bytes) {
        map.entry(key.into_owned()).or_insert_with(|| value.into_owned());
    }
    map
}
