use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::{
    descriptor::{InterfaceDescriptor, MethodResult},
    invoke::{Service, ServiceError},
    message::DynamicMessage,
    rpc::{rpc_result, RpcError, RpcProtocol, RpcRequest},
};

/// A fatal server-side failure.
///
/// Routing rejections carry their HTTP status; everything else is an
/// unexpected service error which the gateway converts into a `500`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// The server-side dispatcher: parses RPC requests into invocation chains
/// and invokes them on a service.
pub struct RpcHandler {
    interface: InterfaceDescriptor,
    service: Arc<dyn Service>,
    protocol: RpcProtocol,
}

impl RpcHandler {
    pub fn new(interface: &InterfaceDescriptor, service: Arc<dyn Service>) -> Self {
        RpcHandler {
            interface: interface.clone(),
            service,
            protocol: RpcProtocol,
        }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Handles an RPC request, returning `(success, RpcResult envelope)`.
    ///
    /// A declared application exception raised by the service produces
    /// `(false, envelope with error)`; any other service failure is
    /// [`HandlerError::Internal`].
    pub fn handle(&self, request: &RpcRequest) -> Result<(bool, DynamicMessage), HandlerError> {
        let invocation = self.protocol.invocation(request, &self.interface)?;
        debug!(method = invocation.method().name(), "invoking rpc request");

        let data = match invocation.method().result() {
            MethodResult::Data(data) => data.clone(),
            MethodResult::Interface(_) => unreachable!("a parsed chain ends in a terminal method"),
        };
        let exc = self.interface.exc().cloned();
        let descriptor = rpc_result(&data, exc.as_ref());

        match invocation.invoke(self.service.as_ref()) {
            Ok(value) => {
                let mut result = descriptor.new_instance();
                result.set("data", value);
                Ok((true, result))
            }
            Err(ServiceError::Application(error))
                if exc
                    .as_ref()
                    .is_some_and(|exc| error.descriptor().extends(exc)) =>
            {
                // The declared application exception; convey it in the
                // envelope.
                let mut result = descriptor.new_instance();
                result.set("error", error);
                Ok((false, result))
            }
            Err(ServiceError::Application(error)) => Err(anyhow::anyhow!(
                "undeclared application exception {}",
                error.descriptor().name()
            )
            .into()),
            Err(ServiceError::Internal(e)) => Err(HandlerError::Internal(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;
    use crate::{
        descriptor::{ArgDescriptor, DataDescriptor, FieldDescriptor, MessageDescriptor,
                     MethodDescriptor},
        invoke::{Kwargs, ServiceOutput},
        value::Value,
    };

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

    enum Behaviour {
        Add,
        RaiseApp(MessageDescriptor),
        Fail,
    }

    struct TestService {
        behaviour: Behaviour,
    }

    impl Service for TestService {
        fn call(
            &self,
            _method: &MethodDescriptor,
            kwargs: &Kwargs,
        ) -> Result<ServiceOutput, ServiceError> {
            match &self.behaviour {
                Behaviour::Add => {
                    let a = kwargs.get("arg0").and_then(Value::as_i32).unwrap_or(0);
                    let b = kwargs.get("arg1").and_then(Value::as_i32).unwrap_or(0);
                    Ok(ServiceOutput::Data(Value::I32(a + b)))
                }
                Behaviour::RaiseApp(exc) => Err(ServiceError::Application(
                    exc.new_instance().with("text", "Hello, world"),
                )),
                Behaviour::Fail => Err(ServiceError::Internal(anyhow::anyhow!("boom"))),
            }
        }
    }

    fn handler(exc: &MessageDescriptor, behaviour: Behaviour) -> RpcHandler {
        RpcHandler::new(
            &test_interface(exc),
            Arc::new(TestService { behaviour }),
        )
    }

    #[test]
    fn handle_ok() {
        let exc = test_exception();
        let handler = handler(&exc, Behaviour::Add);

        let (success, result) = handler.handle(&RpcRequest::get("/method/1/2")).unwrap();
        assert!(success);
        assert_eq!(result.get("data"), Some(&Value::I32(3)));
        assert_eq!(result.get("error"), None);
    }

    #[test]
    fn handle_routing_error() {
        let exc = test_exception();
        let handler = handler(&exc, Behaviour::Add);

        let err = handler
            .handle(&RpcRequest::get("/wrong/method"))
            .unwrap_err();
        match err {
            HandlerError::Rpc(e) => assert_eq!(e.status, StatusCode::NOT_FOUND),
            other => panic!("expected a routing error, got {other:?}"),
        }
    }

    #[test]
    fn handle_application_exception() {
        let exc = test_exception();
        let handler = handler(&exc, Behaviour::RaiseApp(exc.clone()));

        let (success, result) = handler.handle(&RpcRequest::get("/method/1/2")).unwrap();
        assert!(!success);
        assert_eq!(result.get("data"), None);
        let error = result.get("error").and_then(Value::as_message).unwrap();
        assert_eq!(error.descriptor(), &exc);
    }

    #[test]
    fn handle_undeclared_exception_is_fatal() {
        let exc = test_exception();
        let undeclared = MessageDescriptor::builder("OtherException")
            .field(FieldDescriptor::new("text", DataDescriptor::String))
            .build();
        let handler = handler(&exc, Behaviour::RaiseApp(undeclared));

        let err = handler.handle(&RpcRequest::get("/method/1/2")).unwrap_err();
        assert!(matches!(err, HandlerError::Internal(_)));
    }

    #[test]
    fn handle_unexpected_error_propagates() {
        let exc = test_exception();
        let handler = handler(&exc, Behaviour::Fail);

        let err = handler.handle(&RpcRequest::get("/method/1/2")).unwrap_err();
        assert!(matches!(err, HandlerError::Internal(_)));
    }
}
