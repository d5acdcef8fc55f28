//! Invocations: immutable chains of method calls.
//!
//! A client call like `client.interface0(1, 2).method(3, 4)` is modelled as
//! a singly linked chain of `(method, kwargs)` nodes. The proxy builds
//! chains against an interface descriptor and hands the terminal invocation
//! to a generic handler; the server walks a parsed chain against a
//! [`Service`] implementation.

use std::{collections::BTreeMap, fmt, sync::Arc};

use thiserror::Error;

use crate::{
    descriptor::{InterfaceDescriptor, MethodDescriptor, MethodResult},
    format::FormatError,
    message::DynamicMessage,
    rpc::RpcError,
    value::Value,
};

/// Bound keyword arguments of an invocation, keyed by argument name.
pub type Kwargs = BTreeMap<String, Value>;

/// An invalid invocation: arity mismatches, unknown methods or arguments,
/// malformed chains. These are programming errors signalled locally, never
/// sent over the wire.
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("{method} takes at most {expected} arguments, {given} given")]
    TooManyArgs {
        method: String,
        expected: usize,
        given: usize,
    },
    #[error("argument {0:?} passed both positionally and by name")]
    DuplicateArg(String),
    #[error("unknown argument {0:?}")]
    UnknownArg(String),
    #[error("unknown method {0:?}")]
    UnknownMethod(String),
    #[error("cannot chain off terminal method {0:?}")]
    ChainedOffTerminal(String),
    #[error("last invocation method must be terminal, {0:?} is not")]
    NonTerminal(String),
    #[error("path argument {0:?} must not be null")]
    NullPathArg(String),
    /// An argument value does not fit its descriptor.
    #[error(transparent)]
    Format(#[from] FormatError),
}

/// Binds positional and named call arguments to a method's argument names.
///
/// More positional arguments than declared, a positional/named overlap or an
/// unknown name is an error; arguments missing from both are bound to null.
/// Values are owned, so a bound invocation is isolated from later mutation
/// of the caller's data by construction.
pub fn bind_kwargs(
    method: &MethodDescriptor,
    positional: Vec<Value>,
    named: Kwargs,
) -> Result<Kwargs, InvokeError> {
    let args = method.args();
    if positional.len() > args.len() {
        return Err(InvokeError::TooManyArgs {
            method: method.name().to_owned(),
            expected: args.len(),
            given: positional.len(),
        });
    }

    let mut kwargs = Kwargs::new();
    for (arg, value) in args.iter().zip(positional) {
        kwargs.insert(arg.name().to_owned(), value);
    }

    for (name, value) in named {
        if kwargs.contains_key(&name) {
            return Err(InvokeError::DuplicateArg(name));
        }
        if method.find_arg(&name).is_none() {
            return Err(InvokeError::UnknownArg(name));
        }
        kwargs.insert(name, value);
    }

    for arg in args {
        kwargs.entry(arg.name().to_owned()).or_insert(Value::Null);
    }

    Ok(kwargs)
}

/// A single link of an invocation chain: a method, its bound arguments and
/// an optional parent link. Invocations are immutable and cheap to clone.
#[derive(Clone)]
pub struct Invocation {
    inner: Arc<InvocationInner>,
}

struct InvocationInner {
    method: MethodDescriptor,
    kwargs: Kwargs,
    parent: Option<Invocation>,
}

impl Invocation {
    /// Creates a root invocation from pre-bound kwargs; arguments missing
    /// from the map are bound to null.
    pub fn new(method: &MethodDescriptor, kwargs: Kwargs) -> Self {
        Invocation {
            inner: Arc::new(InvocationInner {
                kwargs: normalize(method, kwargs),
                method: method.clone(),
                parent: None,
            }),
        }
    }

    /// Creates a root invocation, binding positional arguments.
    pub fn bind(method: &MethodDescriptor, positional: Vec<Value>) -> Result<Self, InvokeError> {
        let kwargs = bind_kwargs(method, positional, Kwargs::new())?;
        Ok(Invocation::new(method, kwargs))
    }

    /// Creates a child invocation with this one as its parent. Only
    /// non-terminal invocations (interface results) can be chained off.
    pub fn next(&self, method: &MethodDescriptor, kwargs: Kwargs) -> Result<Self, InvokeError> {
        if self.method().is_terminal() {
            return Err(InvokeError::ChainedOffTerminal(self.method().name().to_owned()));
        }

        Ok(Invocation {
            inner: Arc::new(InvocationInner {
                kwargs: normalize(method, kwargs),
                method: method.clone(),
                parent: Some(self.clone()),
            }),
        })
    }

    pub fn method(&self) -> &MethodDescriptor {
        &self.inner.method
    }

    pub fn kwargs(&self) -> &Kwargs {
        &self.inner.kwargs
    }

    pub fn parent(&self) -> Option<&Invocation> {
        self.inner.parent.as_ref()
    }

    /// Materializes the chain in root-to-leaf order.
    pub fn to_chain(&self) -> Vec<Invocation> {
        let mut chain = match self.parent() {
            Some(parent) => parent.to_chain(),
            None => Vec::new(),
        };
        chain.push(self.clone());
        chain
    }

    /// Walks the chain against a service: each non-terminal link must yield
    /// a sub-service, the terminal link yields the result value.
    pub fn invoke(&self, service: &dyn Service) -> Result<Value, ServiceError> {
        let chain = self.to_chain();
        let mut owned: Option<Arc<dyn Service>> = None;

        for invocation in &chain[..chain.len() - 1] {
            let target = owned.as_deref().unwrap_or(service);
            match target.call(invocation.method(), invocation.kwargs())? {
                ServiceOutput::Service(next) => owned = Some(next),
                ServiceOutput::Data(_) => {
                    return Err(ServiceError::Internal(anyhow::anyhow!(
                        "service returned data for non-terminal method {:?}",
                        invocation.method().name()
                    )))
                }
            }
        }

        let target = owned.as_deref().unwrap_or(service);
        match target.call(self.method(), self.kwargs())? {
            ServiceOutput::Data(value) => Ok(value),
            ServiceOutput::Service(_) => Err(ServiceError::Internal(anyhow::anyhow!(
                "service returned a sub-service for terminal method {:?}",
                self.method().name()
            ))),
        }
    }
}

fn normalize(method: &MethodDescriptor, mut kwargs: Kwargs) -> Kwargs {
    for arg in method.args() {
        kwargs.entry(arg.name().to_owned()).or_insert(Value::Null);
    }
    kwargs
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.inner.method.name())
            .field("kwargs", &self.inner.kwargs)
            .field("parent", &self.inner.parent)
            .finish()
    }
}

/// A service implementation methods are dispatched to.
///
/// Generated server stubs implement this by matching on the method
/// descriptor and calling into the user's typed implementation.
pub trait Service: Send + Sync {
    fn call(&self, method: &MethodDescriptor, kwargs: &Kwargs) -> Result<ServiceOutput, ServiceError>;
}

/// The outcome of a single service call.
pub enum ServiceOutput {
    /// The result of a terminal method.
    Data(Value),
    /// The sub-service returned by a non-terminal (interface) method.
    Service(Arc<dyn Service>),
}

/// An error raised by a service call.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// An application exception declared on the interface; conveyed to the
    /// client in the response envelope.
    #[error("application exception: {0:?}")]
    Application(DynamicMessage),
    /// Anything else; fatal at the handler layer, the gateway converts it
    /// into a 500.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// A client-side invocation failure.
#[derive(Debug, Error)]
pub enum CallError {
    /// The remote service raised its declared application exception.
    #[error("application exception: {0:?}")]
    Application(DynamicMessage),
    /// A transport-level failure.
    #[error(transparent)]
    Rpc(#[from] RpcError),
    /// An invalid invocation, signalled before anything is sent.
    #[error(transparent)]
    Invalid(#[from] InvokeError),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Handles a complete invocation chain, e.g. by sending it over HTTP.
pub trait InvocationHandler: Send + Sync {
    fn handle(&self, invocation: Invocation) -> Result<Value, CallError>;
}

impl<F> InvocationHandler for F
where
    F: Fn(Invocation) -> Result<Value, CallError> + Send + Sync,
{
    fn handle(&self, invocation: Invocation) -> Result<Value, CallError> {
        self(invocation)
    }
}

/// Builds invocations by method lookup on an interface descriptor.
///
/// Calling a terminal method packages the chain and passes it to the
/// handler; calling a non-terminal method returns a new proxy bound to the
/// chained invocation, so calls compose fluently across sub-interfaces.
#[derive(Clone)]
pub struct InvocationProxy {
    interface: InterfaceDescriptor,
    handler: Arc<dyn InvocationHandler>,
    invocation: Option<Invocation>,
}

impl InvocationProxy {
    pub fn new(interface: &InterfaceDescriptor, handler: Arc<dyn InvocationHandler>) -> Self {
        InvocationProxy {
            interface: interface.clone(),
            handler,
            invocation: None,
        }
    }

    pub fn interface(&self) -> &InterfaceDescriptor {
        &self.interface
    }

    /// Resolves a method by name, returning a bound [`ProxyMethod`].
    pub fn method(&self, name: &str) -> Result<ProxyMethod, InvokeError> {
        let method = self
            .interface
            .find_method(name)
            .ok_or_else(|| InvokeError::UnknownMethod(name.to_owned()))?;

        Ok(ProxyMethod {
            method: method.clone(),
            handler: Arc::clone(&self.handler),
            invocation: self.invocation.clone(),
        })
    }

    /// Shorthand for `self.method(name)?.call(positional)`.
    pub fn call(&self, name: &str, positional: Vec<Value>) -> Result<ProxyOutput, CallError> {
        self.method(name)?.call(positional)
    }
}

impl fmt::Debug for InvocationProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvocationProxy")
            .field("interface", &self.interface.name())
            .field("invocation", &self.invocation)
            .finish_non_exhaustive()
    }
}

/// A method bound to a proxy, carrying the method descriptor, the handler
/// and the parent invocation for introspection.
pub struct ProxyMethod {
    method: MethodDescriptor,
    handler: Arc<dyn InvocationHandler>,
    invocation: Option<Invocation>,
}

impl ProxyMethod {
    pub fn method(&self) -> &MethodDescriptor {
        &self.method
    }

    pub fn handler(&self) -> &Arc<dyn InvocationHandler> {
        &self.handler
    }

    pub fn invocation(&self) -> Option<&Invocation> {
        self.invocation.as_ref()
    }

    pub fn call(&self, positional: Vec<Value>) -> Result<ProxyOutput, CallError> {
        self.call_named(positional, Kwargs::new())
    }

    /// Calls the method with positional and named arguments.
    ///
    /// A null result of a terminal method is substituted with the result
    /// type's default; an application exception raised by the handler
    /// propagates unchanged.
    pub fn call_named(
        &self,
        positional: Vec<Value>,
        named: Kwargs,
    ) -> Result<ProxyOutput, CallError> {
        let kwargs = bind_kwargs(&self.method, positional, named)?;
        let invocation = match &self.invocation {
            Some(parent) => parent.next(&self.method, kwargs)?,
            None => Invocation::new(&self.method, kwargs),
        };

        match self.method.result() {
            MethodResult::Data(data) => {
                let result = self.handler.handle(invocation)?;
                let result = if result.is_null() {
                    Value::default_of(data)
                } else {
                    result
                };
                Ok(ProxyOutput::Data(result))
            }
            MethodResult::Interface(interface) => Ok(ProxyOutput::Interface(InvocationProxy {
                interface: interface.clone(),
                handler: Arc::clone(&self.handler),
                invocation: Some(invocation),
            })),
        }
    }
}

/// The outcome of a proxy call: a terminal result or a chained sub-proxy.
#[derive(Debug)]
pub enum ProxyOutput {
    Data(Value),
    Interface(InvocationProxy),
}

impl ProxyOutput {
    pub fn data(self) -> Option<Value> {
        match self {
            ProxyOutput::Data(value) => Some(value),
            ProxyOutput::Interface(_) => None,
        }
    }

    pub fn interface(self) -> Option<InvocationProxy> {
        match self {
            ProxyOutput::Data(_) => None,
            ProxyOutput::Interface(proxy) => Some(proxy),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ArgDescriptor, DataDescriptor, Thunk};

    fn int32_method(name: &str) -> MethodDescriptor {
        MethodDescriptor::builder(name)
            .result(MethodResult::Data(DataDescriptor::Int32))
            .arg(ArgDescriptor::path("a", DataDescriptor::Int32))
            .arg(ArgDescriptor::path("b", DataDescriptor::Int32))
            .build()
    }

    fn kwargs(pairs: &[(&str, Value)]) -> Kwargs {
        pairs
            .iter()
            .map(|(name, value)| ((*name).to_owned(), value.clone()))
            .collect()
    }

    #[test]
    fn bind_rules() {
        let method = int32_method("method");
        let expected = kwargs(&[("a", Value::I32(1)), ("b", Value::I32(2))]);

        let bound = bind_kwargs(&method, vec![1.into(), 2.into()], Kwargs::new()).unwrap();
        assert_eq!(bound, expected);

        let bound = bind_kwargs(
            &method,
            vec![],
            kwargs(&[("a", Value::I32(1)), ("b", Value::I32(2))]),
        )
        .unwrap();
        assert_eq!(bound, expected);

        let bound =
            bind_kwargs(&method, vec![1.into()], kwargs(&[("b", Value::I32(2))])).unwrap();
        assert_eq!(bound, expected);

        let bound = bind_kwargs(&method, vec![], Kwargs::new()).unwrap();
        assert_eq!(bound, kwargs(&[("a", Value::Null), ("b", Value::Null)]));

        assert!(matches!(
            bind_kwargs(&method, vec![1.into(), 2.into(), 3.into()], Kwargs::new()),
            Err(InvokeError::TooManyArgs { .. })
        ));
        assert!(matches!(
            bind_kwargs(
                &method,
                vec![1.into(), 2.into()],
                kwargs(&[("a", Value::I32(1))])
            ),
            Err(InvokeError::DuplicateArg(_))
        ));
        assert!(matches!(
            bind_kwargs(&method, vec![], kwargs(&[("c", Value::I32(3))])),
            Err(InvokeError::UnknownArg(_))
        ));
    }

    #[test]
    fn chain_shape() {
        let interface = InterfaceDescriptor::builder("Sub").build();
        let method0 = MethodDescriptor::builder("method0")
            .result(MethodResult::Interface(interface.clone()))
            .build();
        let method1 = MethodDescriptor::builder("method1")
            .result(MethodResult::Interface(interface))
            .build();
        let method2 = MethodDescriptor::builder("method2").build();

        let invocation0 = Invocation::new(&method0, Kwargs::new());
        let invocation1 = invocation0.next(&method1, Kwargs::new()).unwrap();
        let invocation2 = invocation1.next(&method2, Kwargs::new()).unwrap();

        let chain = invocation2.to_chain();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].parent().is_none());
        assert_eq!(chain[0].method(), &method0);
        assert_eq!(chain[1].method(), &method1);
        assert_eq!(chain[2].method(), &method2);

        // Chaining off a terminal invocation is rejected.
        assert!(matches!(
            invocation2.next(&method2, Kwargs::new()),
            Err(InvokeError::ChainedOffTerminal(_))
        ));
    }

    struct Adder;

    impl Service for Adder {
        fn call(
            &self,
            method: &MethodDescriptor,
            kwargs: &Kwargs,
        ) -> Result<ServiceOutput, ServiceError> {
            match method.name() {
                "method" => {
                    let a = kwargs.get("a").and_then(Value::as_i32).unwrap_or(0);
                    let b = kwargs.get("b").and_then(Value::as_i32).unwrap_or(0);
                    Ok(ServiceOutput::Data(Value::I32(a + b)))
                }
                "child" => Ok(ServiceOutput::Service(Arc::new(Adder))),
                name => Err(ServiceError::Internal(anyhow::anyhow!(
                    "unexpected method {name:?}"
                ))),
            }
        }
    }

    #[test]
    fn invoke_calls_the_service() {
        let method = int32_method("method");
        let invocation = Invocation::bind(&method, vec![1.into(), 2.into()]).unwrap();

        assert_eq!(invocation.invoke(&Adder).unwrap(), Value::I32(3));
    }

    #[test]
    fn invoke_walks_the_chain() {
        let interface = InterfaceDescriptor::builder("Sub").build();
        let child = MethodDescriptor::builder("child")
            .result(MethodResult::Interface(interface))
            .build();
        let method = int32_method("method");

        let invocation = Invocation::new(&child, Kwargs::new())
            .next(&method, kwargs(&[("a", Value::I32(3)), ("b", Value::I32(4))]))
            .unwrap();

        assert_eq!(invocation.invoke(&Adder).unwrap(), Value::I32(7));
    }

    fn proxy_interface() -> InterfaceDescriptor {
        InterfaceDescriptor::builder("TestInterface")
            .method(int32_method("method"))
            .method(
                MethodDescriptor::builder("string0")
                    .result(MethodResult::Data(DataDescriptor::String))
                    .arg(ArgDescriptor::path("text", DataDescriptor::String))
                    .build(),
            )
            .method(
                MethodDescriptor::builder("interface0")
                    .result(Thunk::new({
                        let interface = proxy_sub_interface();
                        move || MethodResult::Interface(interface.clone())
                    }))
                    .arg(ArgDescriptor::path("arg0", DataDescriptor::Int32))
                    .build(),
            )
            .build()
    }

    fn proxy_sub_interface() -> InterfaceDescriptor {
        InterfaceDescriptor::builder("TestSub")
            .method(int32_method("method"))
            .build()
    }

    #[test]
    fn proxy_calls_the_handler() {
        let interface = proxy_interface();
        let handler: Arc<dyn InvocationHandler> =
            Arc::new(|_: Invocation| -> Result<Value, CallError> { Ok(Value::I32(3)) });
        let proxy = InvocationProxy::new(&interface, handler);

        let result = proxy.call("method", vec![1.into(), 2.into()]).unwrap();
        assert_eq!(result.data(), Some(Value::I32(3)));
    }

    #[test]
    fn proxy_substitutes_defaults_for_null_results() {
        let interface = proxy_interface();
        let handler: Arc<dyn InvocationHandler> =
            Arc::new(|_: Invocation| -> Result<Value, CallError> { Ok(Value::Null) });
        let proxy = InvocationProxy::new(&interface, handler);

        let result = proxy.call("string0", vec!["hello".into()]).unwrap();
        assert_eq!(result.data(), Some(Value::String(String::new())));
    }

    #[test]
    fn proxy_method_introspection() {
        let interface = proxy_interface();
        let handler: Arc<dyn InvocationHandler> =
            Arc::new(|_: Invocation| -> Result<Value, CallError> { Ok(Value::Null) });
        let proxy = InvocationProxy::new(&interface, handler);

        let bound = proxy.method("method").unwrap();
        assert_eq!(bound.method(), interface.find_method("method").unwrap());
        assert!(bound.invocation().is_none());

        assert!(matches!(
            proxy.method("unknown"),
            Err(InvokeError::UnknownMethod(_))
        ));
    }

    #[test]
    fn proxy_chains_sub_interfaces() {
        let interface = proxy_interface();
        let handler: Arc<dyn InvocationHandler> =
            Arc::new(|invocation: Invocation| -> Result<Value, CallError> {
                let chain = invocation.to_chain();
                assert_eq!(chain.len(), 2);
                assert_eq!(chain[0].method().name(), "interface0");
                assert_eq!(chain[0].kwargs().get("arg0"), Some(&Value::I32(1)));
                assert_eq!(chain[1].method().name(), "method");
                Ok(Value::I32(9))
            });
        let proxy = InvocationProxy::new(&interface, handler);

        let sub = proxy.call("interface0", vec![1.into()]).unwrap();
        let sub = sub.interface().unwrap();
        let result = sub.call("method", vec![3.into(), 4.into()]).unwrap();
        assert_eq!(result.data(), Some(Value::I32(9)));
    }
}
