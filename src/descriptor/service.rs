use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{
    descriptor::{DataDescriptor, MessageDescriptor, Thunk},
    Type,
};

/// An interface descriptor.
///
/// Interfaces may inherit from a base interface, in which case the derived
/// interface exposes the union of methods, base methods first. An interface
/// optionally declares an application exception type; methods raising it are
/// conveyed over RPC as `422 Unprocessable Entity` envelopes.
#[derive(Clone)]
pub struct InterfaceDescriptor {
    inner: Arc<InterfaceInner>,
}

struct InterfaceInner {
    name: String,
    base: Option<Thunk<InterfaceDescriptor>>,
    exc: Option<Thunk<MessageDescriptor>>,
    declared_methods: Vec<MethodDescriptor>,

    methods: OnceCell<Vec<MethodDescriptor>>,
}

impl InterfaceDescriptor {
    pub fn builder(name: impl Into<String>) -> InterfaceDescriptorBuilder {
        InterfaceDescriptorBuilder {
            name: name.into(),
            base: None,
            exc: None,
            methods: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn base(&self) -> Option<&InterfaceDescriptor> {
        self.inner.base.as_ref().map(Thunk::get)
    }

    /// The declared application exception descriptor, inherited from the
    /// base interface when not declared locally.
    pub fn exc(&self) -> Option<&MessageDescriptor> {
        match &self.inner.exc {
            Some(exc) => Some(exc.get()),
            None => self.base().and_then(InterfaceDescriptor::exc),
        }
    }

    pub fn declared_methods(&self) -> &[MethodDescriptor] {
        &self.inner.declared_methods
    }

    /// All methods, inherited first, in declaration order.
    pub fn methods(&self) -> &[MethodDescriptor] {
        self.inner.methods.get_or_init(|| {
            let mut methods = match self.base() {
                Some(base) => base.methods().to_vec(),
                None => Vec::new(),
            };
            methods.extend(self.inner.declared_methods.iter().cloned());
            methods
        })
    }

    /// Returns a method by its name or `None`. Lookup is exact-match.
    pub fn find_method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods().iter().find(|method| method.name() == name)
    }
}

impl PartialEq for InterfaceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for InterfaceDescriptor {}

impl fmt::Debug for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDescriptor")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`InterfaceDescriptor`].
pub struct InterfaceDescriptorBuilder {
    name: String,
    base: Option<Thunk<InterfaceDescriptor>>,
    exc: Option<Thunk<MessageDescriptor>>,
    methods: Vec<MethodDescriptor>,
}

impl InterfaceDescriptorBuilder {
    pub fn base(mut self, base: impl Into<Thunk<InterfaceDescriptor>>) -> Self {
        self.base = Some(base.into());
        self
    }

    pub fn exc(mut self, exc: impl Into<Thunk<MessageDescriptor>>) -> Self {
        self.exc = Some(exc.into());
        self
    }

    pub fn method(mut self, method: MethodDescriptor) -> Self {
        self.methods.push(method);
        self
    }

    pub fn build(self) -> InterfaceDescriptor {
        InterfaceDescriptor {
            inner: Arc::new(InterfaceInner {
                name: self.name,
                base: self.base,
                exc: self.exc,
                declared_methods: self.methods,
                methods: OnceCell::new(),
            }),
        }
    }
}

/// The result of a method: either a data type or a sub-interface.
#[derive(Clone, Debug)]
pub enum MethodResult {
    Data(DataDescriptor),
    Interface(InterfaceDescriptor),
}

impl MethodResult {
    pub fn ty(&self) -> Type {
        match self {
            MethodResult::Data(data) => data.ty(),
            MethodResult::Interface(_) => Type::Interface,
        }
    }

    pub fn as_data(&self) -> Option<&DataDescriptor> {
        match self {
            MethodResult::Data(data) => Some(data),
            MethodResult::Interface(_) => None,
        }
    }

    pub fn as_interface(&self) -> Option<&InterfaceDescriptor> {
        match self {
            MethodResult::Data(_) => None,
            MethodResult::Interface(interface) => Some(interface),
        }
    }
}

impl From<DataDescriptor> for MethodResult {
    fn from(data: DataDescriptor) -> Self {
        MethodResult::Data(data)
    }
}

impl From<InterfaceDescriptor> for MethodResult {
    fn from(interface: InterfaceDescriptor) -> Self {
        MethodResult::Interface(interface)
    }
}

impl fmt::Display for MethodResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodResult::Data(data) => data.fmt(f),
            MethodResult::Interface(interface) => f.write_str(interface.name()),
        }
    }
}

/// An interface method descriptor.
#[derive(Clone)]
pub struct MethodDescriptor {
    inner: Arc<MethodInner>,
}

struct MethodInner {
    name: String,
    result: Thunk<MethodResult>,
    args: Vec<ArgDescriptor>,
    is_post: bool,
}

impl MethodDescriptor {
    pub fn builder(name: impl Into<String>) -> MethodDescriptorBuilder {
        MethodDescriptorBuilder {
            name: name.into(),
            result: None,
            args: Vec::new(),
            is_post: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn result(&self) -> &MethodResult {
        self.inner.result.get()
    }

    pub fn args(&self) -> &[ArgDescriptor] {
        &self.inner.args
    }

    pub fn find_arg(&self, name: &str) -> Option<&ArgDescriptor> {
        self.inner.args.iter().find(|arg| arg.name() == name)
    }

    /// POST methods require an HTTP POST request; everything else is GET.
    pub fn is_post(&self) -> bool {
        self.inner.is_post
    }

    /// A method is terminal when its result is a data type or void. Terminal
    /// methods end an invocation chain.
    pub fn is_terminal(&self) -> bool {
        self.result().ty() != Type::Interface
    }
}

impl PartialEq for MethodDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for MethodDescriptor {}

impl fmt::Display for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.inner.name)?;
        let mut separator = "";
        for arg in &self.inner.args {
            write!(f, "{separator}{} {}", arg.name(), arg.ty())?;
            separator = ", ";
        }
        write!(f, ")={}", self.result())
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("name", &self.inner.name)
            .field("is_post", &self.inner.is_post)
            .finish_non_exhaustive()
    }
}

/// Builder for [`MethodDescriptor`].
pub struct MethodDescriptorBuilder {
    name: String,
    result: Option<Thunk<MethodResult>>,
    args: Vec<ArgDescriptor>,
    is_post: bool,
}

impl MethodDescriptorBuilder {
    pub fn result(mut self, result: impl Into<Thunk<MethodResult>>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn arg(mut self, arg: ArgDescriptor) -> Self {
        self.args.push(arg);
        self
    }

    pub fn post(mut self) -> Self {
        self.is_post = true;
        self
    }

    pub fn build(self) -> MethodDescriptor {
        MethodDescriptor {
            inner: Arc::new(MethodInner {
                name: self.name,
                result: self
                    .result
                    .unwrap_or_else(|| Thunk::from(MethodResult::Data(DataDescriptor::Void))),
                args: self.args,
                is_post: self.is_post,
            }),
        }
    }
}

/// A method argument descriptor.
///
/// Arguments are placed on the HTTP surface according to their flags: query
/// arguments go to the query string, post arguments to the form body, and
/// everything else to the path.
#[derive(Clone)]
pub struct ArgDescriptor {
    inner: Arc<ArgInner>,
}

struct ArgInner {
    name: String,
    ty: Thunk<DataDescriptor>,
    is_query: bool,
    is_post: bool,
}

impl ArgDescriptor {
    /// Creates a path argument.
    pub fn path(name: impl Into<String>, ty: impl Into<Thunk<DataDescriptor>>) -> Self {
        Self::build(name, ty, false, false)
    }

    /// Creates a query-string argument.
    pub fn query(name: impl Into<String>, ty: impl Into<Thunk<DataDescriptor>>) -> Self {
        Self::build(name, ty, true, false)
    }

    /// Creates a form-body argument.
    pub fn post(name: impl Into<String>, ty: impl Into<Thunk<DataDescriptor>>) -> Self {
        Self::build(name, ty, false, true)
    }

    fn build(
        name: impl Into<String>,
        ty: impl Into<Thunk<DataDescriptor>>,
        is_query: bool,
        is_post: bool,
    ) -> Self {
        ArgDescriptor {
            inner: Arc::new(ArgInner {
                name: name.into(),
                ty: ty.into(),
                is_query,
                is_post,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ty(&self) -> &DataDescriptor {
        self.inner.ty.get()
    }

    pub fn is_query(&self) -> bool {
        self.inner.is_query
    }

    pub fn is_post(&self) -> bool {
        self.inner.is_post
    }
}

impl fmt::Debug for ArgDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArgDescriptor")
            .field("name", &self.inner.name)
            .field("is_query", &self.inner.is_query)
            .field("is_post", &self.inner.is_post)
            .finish_non_exhaustive()
    }
}
