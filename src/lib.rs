//! Runtime support for code generated by the pdef compiler.
//!
//! The runtime has three tightly coupled parts:
//!
//! - a reflective **descriptor** model for user-defined messages, enums and
//!   interfaces ([`descriptor`]);
//! - a polymorphic **data codec** which maps dynamic values to and from a
//!   JSON-compatible object tree ([`format`]);
//! - an invocation-based **RPC protocol** which encodes chained method calls
//!   as HTTP requests and decodes HTTP responses into typed results or
//!   application exceptions ([`rpc`]).
//!
//! Descriptors are created once by generated code and live for the process.
//! They are cheap to clone and immutable after their lazy initialization, so
//! all runtime entry points are safe to call from multiple threads.

mod message;
mod value;

pub mod descriptor;
pub mod format;
pub mod invoke;
pub mod rpc;

pub use crate::{
    descriptor::{
        ArgDescriptor, DataDescriptor, EnumDescriptor, FieldDescriptor, InterfaceDescriptor,
        ListDescriptor, MapDescriptor, MessageDescriptor, MethodDescriptor, MethodResult,
        SetDescriptor, Thunk,
    },
    format::{json_format, object_format, FormatError, JsonFormat, ObjectFormat},
    invoke::{
        bind_kwargs, CallError, Invocation, InvocationHandler, InvocationProxy, InvokeError,
        Kwargs, ProxyMethod, ProxyOutput, Service, ServiceError, ServiceOutput,
    },
    message::DynamicMessage,
    rpc::{
        rpc_result, Environ, HttpSession, RpcClient, RpcError, RpcHandler, RpcProtocol,
        RpcRequest, WsgiApp, WsgiResponse,
    },
    value::Value,
};

use std::fmt;

/// The closed set of pdef type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Type {
    Bool,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    Datetime,
    Void,
    List,
    Map,
    Set,
    Enum,
    Message,
    Interface,
}

impl Type {
    /// Returns `true` for `bool`, the integer types, the floating point types
    /// and `string`.
    pub fn is_primitive(self) -> bool {
        matches!(
            self,
            Type::Bool
                | Type::Int16
                | Type::Int32
                | Type::Int64
                | Type::Float
                | Type::Double
                | Type::String
        )
    }

    /// Returns `true` for every type which can appear in a data tree, i.e.
    /// everything except `interface`.
    pub fn is_data_type(self) -> bool {
        self != Type::Interface
    }

    /// Returns `true` for types with interior mutability: containers and
    /// messages.
    pub fn is_mutable(self) -> bool {
        matches!(self, Type::List | Type::Map | Type::Set | Type::Message)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Type::Bool => "bool",
            Type::Int16 => "int16",
            Type::Int32 => "int32",
            Type::Int64 => "int64",
            Type::Float => "float",
            Type::Double => "double",
            Type::String => "string",
            Type::Datetime => "datetime",
            Type::Void => "void",
            Type::List => "list",
            Type::Map => "map",
            Type::Set => "set",
            Type::Enum => "enum",
            Type::Message => "message",
            Type::Interface => "interface",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
