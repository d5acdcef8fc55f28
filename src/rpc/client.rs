use std::sync::Arc;

use http::{Method, StatusCode};
use tracing::debug;

use crate::{
    descriptor::{DataDescriptor, InterfaceDescriptor, MessageDescriptor, MethodResult},
    invoke::{CallError, Invocation, InvocationHandler, InvocationProxy, InvokeError},
    message::DynamicMessage,
    rpc::{rpc_result, RpcError, RpcProtocol},
    value::Value,
};

/// A built HTTP request: the contract with the transport is request build
/// plus one synchronous send.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub query: Vec<(String, String)>,
    /// Sent as an `application/x-www-form-urlencoded` body.
    pub form: Vec<(String, String)>,
}

/// An HTTP response reduced to what the protocol needs.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

/// A synchronous HTTP transport. Implemented by [`ReqwestSession`] by
/// default; tests inject in-memory sessions.
pub trait HttpSession: Send + Sync {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, RpcError>;
}

/// The default blocking transport.
pub struct ReqwestSession {
    client: reqwest::blocking::Client,
}

impl ReqwestSession {
    pub fn new() -> Self {
        ReqwestSession {
            client: reqwest::blocking::Client::new(),
        }
    }
}

impl Default for ReqwestSession {
    fn default() -> Self {
        ReqwestSession::new()
    }
}

impl HttpSession for ReqwestSession {
    fn send(&self, request: HttpRequest) -> Result<HttpResponse, RpcError> {
        let mut builder = self.client.request(request.method, &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if !request.form.is_empty() {
            builder = builder.form(&request.form);
        }

        let response = builder.send().map_err(transport_error)?;
        let status = response.status();
        let body = response.text().map_err(transport_error)?;
        Ok(HttpResponse { status, body })
    }
}

fn transport_error(e: reqwest::Error) -> RpcError {
    RpcError::new(
        StatusCode::INTERNAL_SERVER_ERROR,
        format!("transport error: {e}"),
    )
}

/// An RPC client for an interface.
///
/// The client is an [`InvocationHandler`]: its proxy encodes invocation
/// chains into HTTP requests at `url + path`, sends them synchronously and
/// interprets the response envelope. `200 OK` yields the result data, `422
/// Unprocessable Entity` raises the application exception, anything else
/// raises an [`RpcError`] with the response text (truncated to 255 chars).
#[derive(Clone)]
pub struct RpcClient {
    interface: InterfaceDescriptor,
    url: String,
    session: Arc<dyn HttpSession>,
    protocol: RpcProtocol,
}

impl RpcClient {
    pub fn new(interface: &InterfaceDescriptor, url: impl Into<String>) -> Self {
        RpcClient::with_session(interface, url, Arc::new(ReqwestSession::new()))
    }

    pub fn with_session(
        interface: &InterfaceDescriptor,
        url: impl Into<String>,
        session: Arc<dyn HttpSession>,
    ) -> Self {
        RpcClient {
            interface: interface.clone(),
            url: url.into(),
            session,
            protocol: RpcProtocol,
        }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Returns an invocation proxy bound to this client.
    pub fn proxy(&self) -> InvocationProxy {
        InvocationProxy::new(&self.interface, Arc::new(self.clone()))
    }

    fn build_request(&self, request: &crate::rpc::RpcRequest) -> HttpRequest {
        HttpRequest {
            method: request.method.clone(),
            url: format!("{}{}", self.url, request.path),
            query: request
                .query
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            form: request
                .post
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        }
    }

    fn parse_response(
        &self,
        response: HttpResponse,
        result: &DataDescriptor,
        exc: Option<&MessageDescriptor>,
    ) -> Result<Value, CallError> {
        let status = response.status;
        if status != StatusCode::OK && status != StatusCode::UNPROCESSABLE_ENTITY {
            // An HTTP error; keep the description short.
            let text: String = response.body.chars().take(255).collect();
            return Err(RpcError::new(status, text).into());
        }

        let descriptor = rpc_result(result, exc);
        let envelope = DynamicMessage::from_json(&descriptor, &response.body).map_err(|e| {
            RpcError::new(status, format!("failed to parse an rpc response: {e}"))
        })?;

        if status == StatusCode::OK {
            return Ok(envelope.get("data").cloned().unwrap_or(Value::Null));
        }

        match envelope.get("error") {
            Some(Value::Message(error)) => Err(CallError::Application(error.clone())),
            _ => Err(RpcError::new(status, "Unsupported application exception").into()),
        }
    }
}

impl InvocationHandler for RpcClient {
    fn handle(&self, invocation: Invocation) -> Result<Value, CallError> {
        let request = self.protocol.request(&invocation)?;

        let result = match invocation.method().result() {
            MethodResult::Data(data) => data.clone(),
            MethodResult::Interface(_) => {
                return Err(
                    InvokeError::NonTerminal(invocation.method().name().to_owned()).into(),
                )
            }
        };
        let exc = self.interface.exc().cloned();

        debug!(method = %request.method, path = %request.path, "sending rpc request");
        let response = self.session.send(self.build_request(&request))?;
        debug!(status = %response.status, "received rpc response");

        self.parse_response(response, &result, exc.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::descriptor::{ArgDescriptor, FieldDescriptor, MethodDescriptor};

    fn test_exception() -> MessageDescriptor {
        MessageDescriptor::builder("TestException")
            .field(FieldDescriptor::new("text", DataDescriptor::String))
            .build()
    }

    fn test_interface(exc: &MessageDescriptor) -> InterfaceDescriptor {
        InterfaceDescriptor::builder("TestInterface")
            .exc(exc.clone())
            .method(
                MethodDescriptor::builder("method")
                    .result(MethodResult::Data(DataDescriptor::Int32))
                    .arg(ArgDescriptor::path("arg0", DataDescriptor::Int32))
                    .arg(ArgDescriptor::path("arg1", DataDescriptor::Int32))
                    .build(),
            )
            .build()
    }

    /// Records the request and plays back a canned response.
    struct MockSession {
        response: HttpResponse,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl MockSession {
        fn with_response(status: StatusCode, body: &str) -> Arc<Self> {
            Arc::new(MockSession {
                response: HttpResponse {
                    status,
                    body: body.to_owned(),
                },
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl HttpSession for MockSession {
        fn send(&self, request: HttpRequest) -> Result<HttpResponse, RpcError> {
            self.requests.lock().unwrap().push(request);
            Ok(self.response.clone())
        }
    }

    #[test]
    fn builds_requests_against_the_base_url() {
        let exc = test_exception();
        let interface = test_interface(&exc);
        let session = MockSession::with_response(StatusCode::OK, r#"{"data": 3}"#);
        let client =
            RpcClient::with_session(&interface, "http://localhost:8080", session.clone());

        let result = client
            .proxy()
            .call("method", vec![1.into(), 2.into()])
            .unwrap();
        assert_eq!(result.data(), Some(Value::I32(3)));

        let requests = session.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].method, Method::GET);
        assert_eq!(requests[0].url, "http://localhost:8080/method/1/2");
    }

    #[test]
    fn parses_ok_responses() {
        let exc = test_exception();
        let interface = test_interface(&exc);
        let session = MockSession::with_response(StatusCode::OK, r#"{"data": 123}"#);
        let client = RpcClient::with_session(&interface, "http://localhost", session);

        let result = client
            .proxy()
            .call("method", vec![1.into(), 2.into()])
            .unwrap();
        assert_eq!(result.data(), Some(Value::I32(123)));
    }

    #[test]
    fn raises_application_exceptions() {
        let exc = test_exception();
        let interface = test_interface(&exc);
        let session = MockSession::with_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"error": {"text": "Test exception"}}"#,
        );
        let client = RpcClient::with_session(&interface, "http://localhost", session);

        let err = client
            .proxy()
            .call("method", vec![1.into(), 2.into()])
            .unwrap_err();
        match err {
            CallError::Application(error) => {
                assert_eq!(error.descriptor(), &exc);
                assert_eq!(
                    error.get("text"),
                    Some(&Value::String("Test exception".into()))
                );
            }
            other => panic!("expected an application exception, got {other:?}"),
        }
    }

    #[test]
    fn raises_transport_errors_for_other_statuses() {
        let exc = test_exception();
        let interface = test_interface(&exc);
        let session = MockSession::with_response(StatusCode::NOT_FOUND, "Method not found");
        let client = RpcClient::with_session(&interface, "http://localhost", session);

        let err = client
            .proxy()
            .call("method", vec![1.into(), 2.into()])
            .unwrap_err();
        match err {
            CallError::Rpc(error) => {
                assert_eq!(error.status, StatusCode::NOT_FOUND);
                assert_eq!(error.message, "Method not found");
            }
            other => panic!("expected a transport error, got {other:?}"),
        }
    }

    #[test]
    fn truncates_long_error_texts() {
        let exc = test_exception();
        let interface = test_interface(&exc);
        let session =
            MockSession::with_response(StatusCode::INTERNAL_SERVER_ERROR, &"x".repeat(1000));
        let client = RpcClient::with_session(&interface, "http://localhost", session);

        let err = client
            .proxy()
            .call("method", vec![1.into(), 2.into()])
            .unwrap_err();
        match err {
            CallError::Rpc(error) => assert_eq!(error.message.len(), 255),
            other => panic!("expected a transport error, got {other:?}"),
        }
    }
}
