//! The invocation-based HTTP RPC protocol.
//!
//! An invocation chain maps onto the HTTP surface as
//! `/method1/{arg}/{arg}/method2/{arg}`, with query arguments in the query
//! string and post arguments in a form-urlencoded body. Responses carry a
//! `{"data": ..., "error": ...}` envelope: `200 OK` with `data` on success,
//! `422 Unprocessable Entity` with `error` for application exceptions, and
//! plain-text bodies for transport errors.

mod client;
mod handler;
mod protocol;
mod wsgi;

pub use self::{
    client::{HttpRequest, HttpResponse, HttpSession, ReqwestSession, RpcClient},
    handler::{HandlerError, RpcHandler},
    protocol::RpcProtocol,
    wsgi::{Environ, WsgiApp, WsgiResponse},
};

use std::{collections::BTreeMap, fmt};

use http::{Method, StatusCode};
use thiserror::Error;

use crate::descriptor::{DataDescriptor, FieldDescriptor, MessageDescriptor};

pub const APPLICATION_JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";
pub const FORM_URLENCODED_MIME_TYPE: &str = "application/x-www-form-urlencoded";
pub const TEXT_PLAIN_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// A wire-level RPC request: the intermediate between an invocation chain
/// and the HTTP transport.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: Method,
    pub path: String,
    pub query: BTreeMap<String, String>,
    pub post: BTreeMap<String, String>,
}

impl RpcRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        RpcRequest {
            method,
            path: path.into(),
            query: BTreeMap::new(),
            post: BTreeMap::new(),
        }
    }

    /// A GET request with a path, the common case in tests.
    pub fn get(path: impl Into<String>) -> Self {
        RpcRequest::new(Method::GET, path)
    }

    pub fn is_post(&self) -> bool {
        self.method == Method::POST
    }
}

impl Default for RpcRequest {
    fn default() -> Self {
        RpcRequest::new(Method::GET, "")
    }
}

impl fmt::Display for RpcRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// A transport-level RPC failure: an HTTP status and a message.
///
/// Raised for every client-facing rejection: unknown methods, wrong HTTP
/// verbs, malformed paths and bodies, unparsable responses and non-2xx/422
/// statuses.
#[derive(Debug, Clone, Error)]
#[error("rpc error {status}: {message}")]
pub struct RpcError {
    pub status: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        RpcError {
            status,
            message: message.into(),
        }
    }
}

/// Builds the `RpcResult` envelope descriptor for a `(data, error)`
/// descriptor pair. The error field type defaults to string when the
/// interface declares no exception.
pub fn rpc_result(
    data: &DataDescriptor,
    error: Option<&MessageDescriptor>,
) -> MessageDescriptor {
    let error = match error {
        Some(error) => DataDescriptor::Message(error.clone()),
        None => DataDescriptor::String,
    };

    MessageDescriptor::builder("RpcResult")
        .field(FieldDescriptor::new("data", data.clone()))
        .field(FieldDescriptor::new("error", error))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{message::DynamicMessage, value::Value};

    #[test]
    fn rpc_request_defaults_to_get() {
        let request = RpcRequest::default();
        assert_eq!(request.method, Method::GET);
        assert!(!request.is_post());
        assert_eq!(RpcRequest::new(Method::POST, "/x").to_string(), "POST /x");
    }

    #[test]
    fn rpc_result_envelope_roundtrips() {
        let descriptor = rpc_result(&DataDescriptor::Int32, None);

        let mut result = descriptor.new_instance();
        result.set("data", 123);
        assert_eq!(result.to_json().unwrap(), r#"{"data":123}"#);

        let parsed = DynamicMessage::from_json(&descriptor, r#"{"data": 123}"#).unwrap();
        assert_eq!(parsed.get("data"), Some(&Value::I32(123)));
        assert_eq!(parsed.get("error"), None);
    }
}
