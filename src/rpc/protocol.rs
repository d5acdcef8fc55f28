use std::collections::VecDeque;

use http::{Method, StatusCode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::{
    descriptor::{DataDescriptor, InterfaceDescriptor, MethodDescriptor, MethodResult},
    format::json_format,
    invoke::{Invocation, InvokeError, Kwargs},
    rpc::{RpcError, RpcRequest},
    value::Value,
    Type,
};

// Path arguments percent-encode everything except ASCII alphanumerics and
// `[]{},.-"`; spaces travel as `+`.
const PATH_ARG_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'[')
    .remove(b']')
    .remove(b'{')
    .remove(b'}')
    .remove(b',')
    .remove(b'.')
    .remove(b'-')
    .remove(b'"');

/// Translates invocation chains to and from [`RpcRequest`]s.
///
/// Arguments are JSON-encoded individually. String-typed values have their
/// outer JSON quotes stripped on the wire and re-quoted before parsing;
/// every other type travels in its literal JSON form (the `"` character is
/// reserved from percent-encoding precisely so quoted enum, datetime and
/// message tokens survive the path).
#[derive(Clone, Copy, Debug, Default)]
pub struct RpcProtocol;

impl RpcProtocol {
    /// Encodes an invocation chain into an RPC request.
    ///
    /// The HTTP method is POST when the terminal method is a post method,
    /// GET otherwise. Null path arguments are rejected; null query and post
    /// arguments are skipped, which decodes back to null on the other side.
    pub fn request(&self, invocation: &Invocation) -> Result<RpcRequest, InvokeError> {
        let method = invocation.method();
        if !method.is_terminal() {
            return Err(InvokeError::NonTerminal(method.name().to_owned()));
        }

        let http_method = if method.is_post() {
            Method::POST
        } else {
            Method::GET
        };

        let mut request = RpcRequest::new(http_method, "");
        for link in invocation.to_chain() {
            self.write_invocation(&mut request, &link)?;
        }
        Ok(request)
    }

    fn write_invocation(
        &self,
        request: &mut RpcRequest,
        invocation: &Invocation,
    ) -> Result<(), InvokeError> {
        let method = invocation.method();
        let kwargs = invocation.kwargs();

        request.path.push('/');
        request.path.push_str(method.name());

        for arg in method.args() {
            let serialized = match kwargs.get(arg.name()) {
                Some(value) => self.write_arg(value, arg.ty())?,
                None => None,
            };

            if arg.is_post() {
                if let Some(serialized) = serialized {
                    request.post.insert(arg.name().to_owned(), serialized);
                }
            } else if arg.is_query() {
                if let Some(serialized) = serialized {
                    request.query.insert(arg.name().to_owned(), serialized);
                }
            } else {
                let serialized = serialized
                    .ok_or_else(|| InvokeError::NullPathArg(arg.name().to_owned()))?;
                request.path.push('/');
                request.path.push_str(&quote(&serialized));
            }
        }

        Ok(())
    }

    // JSON-encodes an argument, stripping the outer quotes of string-typed
    // values.
    fn write_arg(
        &self,
        value: &Value,
        descriptor: &DataDescriptor,
    ) -> Result<Option<String>, InvokeError> {
        if value.is_null() {
            return Ok(None);
        }

        let json = json_format().write(value, descriptor)?;
        if descriptor.ty() != Type::String {
            return Ok(Some(json));
        }

        let stripped = json
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .unwrap_or(&json);
        Ok(Some(stripped.to_owned()))
    }

    /// Parses an invocation chain from an RPC request against an interface
    /// descriptor.
    ///
    /// Every client-facing rejection is an [`RpcError`]: unknown method and
    /// missing path arguments are `404`, a post method reached without POST
    /// is `405`, and a chain which does not end in a terminal method is
    /// `400`.
    pub fn invocation(
        &self,
        request: &RpcRequest,
        interface: &InterfaceDescriptor,
    ) -> Result<Invocation, RpcError> {
        let trimmed = request.path.trim_matches('/');
        let mut parts: VecDeque<&str> = if trimmed.is_empty() {
            VecDeque::new()
        } else {
            trimmed.split('/').collect()
        };

        let mut interface = interface.clone();
        let mut invocation: Option<Invocation> = None;

        while let Some(part) = parts.pop_front() {
            let method = interface
                .find_method(part)
                .ok_or_else(|| RpcError::new(StatusCode::NOT_FOUND, "Method not found"))?
                .clone();

            if method.is_post() && !request.is_post() {
                return Err(RpcError::new(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Method not allowed, POST required",
                ));
            }

            let kwargs = self.read_kwargs(&method, &mut parts, request)?;
            invocation = Some(match invocation {
                Some(parent) => parent.next(&method, kwargs).map_err(server_error)?,
                None => Invocation::new(&method, kwargs),
            });

            if method.is_terminal() {
                break;
            }

            // An interface method: descend and keep parsing the parts.
            interface = match method.result() {
                MethodResult::Interface(interface) => interface.clone(),
                MethodResult::Data(_) => unreachable!("non-terminal result is an interface"),
            };
        }

        if !parts.is_empty() {
            // Parts remain but the chain has already terminated.
            return Err(RpcError::new(
                StatusCode::NOT_FOUND,
                "Failed to parse an invocation chain",
            ));
        }

        let invocation =
            invocation.ok_or_else(|| RpcError::new(StatusCode::NOT_FOUND, "Methods required"))?;

        if !invocation.method().is_terminal() {
            return Err(RpcError::new(
                StatusCode::BAD_REQUEST,
                "The last method must be a terminal one. \
                 It must return a data type or be void.",
            ));
        }

        Ok(invocation)
    }

    fn read_kwargs(
        &self,
        method: &MethodDescriptor,
        parts: &mut VecDeque<&str>,
        request: &RpcRequest,
    ) -> Result<Kwargs, RpcError> {
        let mut kwargs = Kwargs::new();

        for arg in method.args() {
            let serialized = if arg.is_post() {
                request.post.get(arg.name()).cloned()
            } else if arg.is_query() {
                request.query.get(arg.name()).cloned()
            } else {
                let part = parts.pop_front().ok_or_else(|| {
                    RpcError::new(
                        StatusCode::NOT_FOUND,
                        format!("Wrong number of method args: {:?}", method.name()),
                    )
                })?;
                Some(unquote(part)?)
            };

            let value = self.read_arg(serialized.as_deref(), arg.ty())?;
            kwargs.insert(arg.name().to_owned(), value);
        }

        Ok(kwargs)
    }

    fn read_arg(
        &self,
        serialized: Option<&str>,
        descriptor: &DataDescriptor,
    ) -> Result<Value, RpcError> {
        let serialized = match serialized {
            Some(serialized) => serialized,
            None => return Ok(Value::Null),
        };

        // Strings were unquoted by the encoder; return the quotes to parse
        // them as valid JSON.
        let json = if descriptor.ty() == Type::String {
            format!("\"{serialized}\"")
        } else {
            serialized.to_owned()
        };

        json_format().read(&json, descriptor).map_err(|e| {
            RpcError::new(
                StatusCode::BAD_REQUEST,
                format!("failed to parse an argument: {e}"),
            )
        })
    }
}

fn quote(s: &str) -> String {
    // A literal `%` encodes to `%25` first, so the replace only ever
    // rewrites encoded spaces.
    utf8_percent_encode(s, PATH_ARG_SET)
        .to_string()
        .replace("%20", "+")
}

fn unquote(s: &str) -> Result<String, RpcError> {
    let s = s.replace('+', " ");
    percent_decode_str(&s)
        .decode_utf8()
        .map(|decoded| decoded.into_owned())
        .map_err(|_| RpcError::new(StatusCode::BAD_REQUEST, "Invalid percent-encoded path"))
}

fn server_error(e: InvokeError) -> RpcError {
    RpcError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
