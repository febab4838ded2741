//! Type objects and method tables.
//!
//! Every value exposes a type tag (`Value::type_of`). A type carries its name,
//! a single base, the depth of that base chain, and a table of named methods.
//! Operators never hard-code behavior: they look up a dunder name on the
//! operand's type and invoke whatever is registered there.
//!
//! ```text
//!   object (depth 0)
//!     ├── int (1) ── bool (2)
//!     ├── BaseException (1) ── Exception (2) ── TypeError (3)
//!     └── Animal (1) ── Dog (2)        <- created at runtime
//! ```

use super::{Callable, KeywordArgs};
use crate::exception::{Exception, PyResult};
use crate::value::Value;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;

/// Shared handle to a type object.
pub type TypeRef = Arc<TypeObject>;

// =============================================================================
// Type ID
// =============================================================================

/// Process-unique type identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct TypeId(pub u32);

static NEXT_TYPE_ID: AtomicU32 = AtomicU32::new(1);

impl TypeId {
    fn fresh() -> Self {
        Self(NEXT_TYPE_ID.fetch_add(1, AtomicOrdering::Relaxed))
    }

    /// Raw numeric id.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u32 {
        self.0
    }
}

// =============================================================================
// Type Flags
// =============================================================================

bitflags::bitflags! {
    /// Flags describing type capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Type is defined by the runtime itself.
        const BUILTIN = 1 << 0;
        /// Type was created at runtime (user-defined class).
        const HEAPTYPE = 1 << 1;
        /// Instances are exceptions.
        const EXCEPTION = 1 << 2;
        /// Instances are immutable and hashable.
        const IMMUTABLE = 1 << 3;
        /// Instances are iterators.
        const ITERATOR = 1 << 4;
        /// Instances can be called.
        const CALLABLE = 1 << 5;
        /// Type cannot be subclassed.
        const FINAL = 1 << 6;
        /// Placeholder for a generic parameter in a signature.
        const TYPE_PARAMETER = 1 << 7;
    }
}

// =============================================================================
// Methods
// =============================================================================

/// Native method: receives `self` as the first argument.
pub type NativeMethod = fn(&[Value]) -> PyResult<Value>;

/// Native constructor: receives the type being constructed.
pub type Constructor = fn(&TypeRef, &[Value], &KeywordArgs) -> PyResult<Value>;

/// Entry in a type's method table.
#[derive(Clone)]
pub enum Method {
    /// A Rust function.
    Native(NativeMethod),
    /// Any callable, invoked with the receiver passed separately.
    Callable(Arc<dyn Callable>),
}

impl Method {
    /// Invoke with `args[0]` as the receiver.
    pub fn call(&self, args: &[Value]) -> PyResult<Value> {
        match self {
            Method::Native(f) => f(args),
            Method::Callable(c) => match args.split_first() {
                Some((receiver, rest)) => c.invoke(rest, &KeywordArgs::default(), Some(receiver)),
                None => c.invoke(&[], &KeywordArgs::default(), None),
            },
        }
    }

    /// Invoke with a receiver, positional arguments and keywords.
    pub fn call_with_keywords(
        &self,
        receiver: &Value,
        args: &[Value],
        keywords: &KeywordArgs,
    ) -> PyResult<Value> {
        match self {
            Method::Native(f) => {
                if !keywords.is_empty() {
                    return Err(Exception::type_error(
                        "native method takes no keyword arguments",
                    ));
                }
                let mut full = Vec::with_capacity(args.len() + 1);
                full.push(receiver.clone());
                full.extend_from_slice(args);
                f(&full)
            }
            Method::Callable(c) => c.invoke(args, keywords, Some(receiver)),
        }
    }

    /// Identity comparison, used by inline guards.
    #[must_use]
    pub fn same_as(&self, other: &Method) -> bool {
        match (self, other) {
            (Method::Native(a), Method::Native(b)) => *a as usize == *b as usize,
            (Method::Callable(a), Method::Callable(b)) => {
                Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Native(_) => f.write_str("Method::Native(..)"),
            Method::Callable(c) => write!(f, "Method::Callable({})", c.name()),
        }
    }
}

// =============================================================================
// Type Object
// =============================================================================

/// A runtime type.
pub struct TypeObject {
    id: TypeId,
    name: Arc<str>,
    base: Option<TypeRef>,
    depth: u32,
    flags: TypeFlags,
    methods: RwLock<FxHashMap<Arc<str>, Method>>,
    constructor: RwLock<Option<Constructor>>,
}

impl TypeObject {
    /// Create the root `object` type.
    #[must_use]
    pub fn root(name: &str) -> TypeRef {
        Arc::new(Self {
            id: TypeId::fresh(),
            name: Arc::from(name),
            base: None,
            depth: 0,
            flags: TypeFlags::BUILTIN,
            methods: RwLock::new(FxHashMap::default()),
            constructor: RwLock::new(None),
        })
    }

    /// Create a builtin type deriving from `base`.
    #[must_use]
    pub fn builtin(name: &str, base: &TypeRef, flags: TypeFlags) -> TypeRef {
        let inherited = base.flags & TypeFlags::EXCEPTION;
        Arc::new(Self {
            id: TypeId::fresh(),
            name: Arc::from(name),
            base: Some(Arc::clone(base)),
            depth: base.depth + 1,
            flags: flags | inherited | TypeFlags::BUILTIN,
            methods: RwLock::new(FxHashMap::default()),
            constructor: RwLock::new(None),
        })
    }

    /// Create a user-defined subtype of `base`.
    pub fn subclass(name: &str, base: &TypeRef) -> PyResult<TypeRef> {
        if base.flags.contains(TypeFlags::FINAL) {
            return Err(Exception::type_error(format!(
                "type '{}' is not an acceptable base type",
                base.name
            )));
        }
        let inherited = base.flags & (TypeFlags::EXCEPTION | TypeFlags::ITERATOR);
        Ok(Arc::new(Self {
            id: TypeId::fresh(),
            name: Arc::from(name),
            base: Some(Arc::clone(base)),
            depth: base.depth + 1,
            flags: TypeFlags::HEAPTYPE | inherited,
            methods: RwLock::new(FxHashMap::default()),
            constructor: RwLock::new(None),
        }))
    }

    /// Create a generic type parameter, bounded by `bound` when given.
    #[must_use]
    pub fn type_parameter(name: &str, bound: Option<&TypeRef>) -> TypeRef {
        Arc::new(Self {
            id: TypeId::fresh(),
            name: Arc::from(name),
            base: bound.map(Arc::clone),
            depth: bound.map_or(0, |b| b.depth + 1),
            flags: TypeFlags::TYPE_PARAMETER | TypeFlags::FINAL,
            methods: RwLock::new(FxHashMap::default()),
            constructor: RwLock::new(None),
        })
    }

    /// Type identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Type name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base type, `None` for the root.
    #[inline]
    #[must_use]
    pub fn base(&self) -> Option<&TypeRef> {
        self.base.as_ref()
    }

    /// Length of the base chain.
    #[inline]
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Capability flags.
    #[inline]
    #[must_use]
    pub fn flags(&self) -> TypeFlags {
        self.flags
    }

    /// Whether instances of this type are exceptions.
    #[inline]
    #[must_use]
    pub fn is_exception_type(&self) -> bool {
        self.flags.contains(TypeFlags::EXCEPTION)
    }

    /// Whether this is a generic parameter rather than a concrete type.
    #[inline]
    #[must_use]
    pub fn is_type_parameter(&self) -> bool {
        self.flags.contains(TypeFlags::TYPE_PARAMETER)
    }

    /// `issubclass(self, other)`.
    #[must_use]
    pub fn is_subtype_of(&self, other: &TypeObject) -> bool {
        if self.depth < other.depth {
            return false;
        }
        let mut current = self;
        while current.depth > other.depth {
            match &current.base {
                Some(base) => current = base,
                None => return false,
            }
        }
        current.id == other.id
    }

    /// Most derived type that both `a` and `b` derive from.
    #[must_use]
    pub fn common_supertype(a: &TypeRef, b: &TypeRef) -> TypeRef {
        let mut left = Arc::clone(a);
        let mut right = Arc::clone(b);
        while left.depth > right.depth {
            left = left.base.clone().unwrap_or(left);
        }
        while right.depth > left.depth {
            right = right.base.clone().unwrap_or(right);
        }
        while left.id != right.id {
            match (left.base.clone(), right.base.clone()) {
                (Some(l), Some(r)) => {
                    left = l;
                    right = r;
                }
                _ => break,
            }
        }
        left
    }

    /// Specificity order: deeper types first, then by name, then by id.
    #[must_use]
    pub fn specificity_cmp(a: &TypeObject, b: &TypeObject) -> Ordering {
        b.depth
            .cmp(&a.depth)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    }

    /// Register or replace a method.
    pub fn define(&self, name: &str, method: Method) {
        self.methods.write().insert(Arc::from(name), method);
    }

    /// Register a native method.
    pub fn define_native(&self, name: &str, f: NativeMethod) {
        self.define(name, Method::Native(f));
    }

    /// Method defined directly on this type.
    #[must_use]
    pub fn lookup_own(&self, name: &str) -> Option<Method> {
        self.methods.read().get(name).cloned()
    }

    /// Method lookup along the base chain.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Method> {
        let mut current = Some(self);
        while let Some(ty) = current {
            if let Some(method) = ty.lookup_own(name) {
                return Some(method);
            }
            current = ty.base.as_deref();
        }
        None
    }

    /// Install the native constructor.
    pub fn set_constructor(&self, ctor: Constructor) {
        *self.constructor.write() = Some(ctor);
    }

    /// Constructor along the base chain.
    #[must_use]
    pub fn constructor(&self) -> Option<Constructor> {
        let mut current = Some(self);
        while let Some(ty) = current {
            if let Some(ctor) = *ty.constructor.read() {
                return Some(ctor);
            }
            current = ty.base.as_deref();
        }
        None
    }

    /// Call the type: construct an instance.
    pub fn construct(self: &Arc<Self>, args: &[Value], keywords: &KeywordArgs) -> PyResult<Value> {
        match self.constructor() {
            Some(ctor) => ctor(self, args, keywords),
            None => Err(Exception::type_error(format!(
                "cannot create '{}' instances",
                self.name
            ))),
        }
    }
}

impl PartialEq for TypeObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeObject {}

impl fmt::Debug for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class '{}'>", self.name)
    }
}

impl fmt::Display for TypeObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}
