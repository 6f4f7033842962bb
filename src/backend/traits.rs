//! Core traits for the managed-runtime abstraction
//!
//! `ManagedRuntime` is the official, access-checked API of the runtime;
//! `RawMemory` is the unchecked primitive that reads and writes runtime
//! memory directly. Everything above this module is written against these
//! two traits only.

use std::fmt;
use std::num::NonZeroUsize;

use thiserror::Error;

use crate::art::fixtures::FixtureClass;
use crate::common::Modifiers;

/// Reference to a managed object: its address in runtime memory.
///
/// `null` is expressed as `Option<ObjRef>::None` and stored as zero.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjRef(NonZeroUsize);

impl ObjRef {
    pub fn from_addr(addr: usize) -> Option<ObjRef> {
        NonZeroUsize::new(addr).map(ObjRef)
    }

    pub fn addr(self) -> usize {
        self.0.get()
    }

    /// Raw slot encoding of a nullable reference.
    pub fn to_raw(obj: Option<ObjRef>) -> u64 {
        obj.map_or(0, |o| o.addr() as u64)
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjRef({:#x})", self.addr())
    }
}

/// A boxed managed value as passed to and returned from reflective calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// Result of a `void` method.
    Void,
    Null,
    Boolean(bool),
    Byte(i8),
    Char(u16),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Object(ObjRef),
}

impl Value {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjRef> {
        match self {
            Value::Object(obj) => Some(*obj),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<ObjRef> for Value {
    fn from(obj: ObjRef) -> Self {
        Value::Object(obj)
    }
}

impl From<Option<ObjRef>> for Value {
    fn from(obj: Option<ObjRef>) -> Self {
        obj.map_or(Value::Null, Value::Object)
    }
}

/// What a reflective member object represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Field,
    Method,
    Constructor,
}

/// Exceptions raised by the runtime's official API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuntimeError {
    #[error("class not found: {0}")]
    ClassNotFound(String),
    #[error("no such field: {0}")]
    NoSuchField(String),
    #[error("no such method: {0}")]
    NoSuchMethod(String),
    #[error("illegal access: {0}")]
    IllegalAccess(String),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("null pointer: {0}")]
    NullPointer(String),
    #[error("unsupported on API {sdk}: {what}")]
    Unsupported { sdk: u32, what: String },
    /// An exception thrown by managed code.
    #[error("{class}: {message}")]
    Thrown { class: String, message: String },
    /// The runtime aborted the process (e.g. a double close caught by fdsan).
    #[error("runtime aborted: {0}")]
    Fatal(String),
}

/// Unchecked access to runtime memory.
///
/// Absolute reads of unmapped addresses return zero and writes to them are
/// dropped; implementations must never fault.
pub trait RawMemory: Send + Sync {
    fn read_u32(&self, addr: usize) -> u32;

    fn read_u64(&self, addr: usize) -> u64;

    fn write_u32(&self, addr: usize, value: u32);

    fn write_u64(&self, addr: usize, value: u64);

    /// Offset of an instance field within its holder (`Unsafe.objectFieldOffset`).
    fn object_field_offset(&self, field: ObjRef) -> Result<usize, RuntimeError>;

    /// Allocate an instance without running any constructor.
    fn allocate_instance(&self, class: ObjRef) -> Result<ObjRef, RuntimeError>;

    fn read_i32(&self, addr: usize) -> i32 {
        self.read_u32(addr) as i32
    }

    fn read_i64(&self, addr: usize) -> i64 {
        self.read_u64(addr) as i64
    }

    fn read_ptr(&self, addr: usize) -> usize {
        self.read_u64(addr) as usize
    }

    fn get_int(&self, obj: ObjRef, offset: usize) -> i32 {
        self.read_i32(obj.addr() + offset)
    }

    fn put_int(&self, obj: ObjRef, offset: usize, value: i32) {
        self.write_u32(obj.addr() + offset, value as u32)
    }

    fn get_long(&self, obj: ObjRef, offset: usize) -> i64 {
        self.read_i64(obj.addr() + offset)
    }

    fn put_long(&self, obj: ObjRef, offset: usize, value: i64) {
        self.write_u64(obj.addr() + offset, value as u64)
    }

    fn get_object(&self, obj: ObjRef, offset: usize) -> Option<ObjRef> {
        ObjRef::from_addr(self.read_ptr(obj.addr() + offset))
    }

    fn put_object(&self, obj: ObjRef, offset: usize, value: Option<ObjRef>) {
        self.write_u64(obj.addr() + offset, ObjRef::to_raw(value))
    }
}

/// The official API of a managed runtime.
pub trait ManagedRuntime: Send + Sync {
    type Memory: RawMemory;

    /// Runtime version (`Build.VERSION.SDK_INT`).
    fn sdk_int(&self) -> u32;

    /// The access-restricted factory for the raw memory primitive.
    fn raw_memory(&self) -> Result<Self::Memory, RuntimeError>;

    fn find_class(&self, name: &str) -> Result<ObjRef, RuntimeError>;

    /// Load one of this crate's fixture classes; loading twice returns the same class.
    fn load_fixture(&self, fixture: &FixtureClass) -> Result<ObjRef, RuntimeError>;

    fn class_name(&self, class: ObjRef) -> Result<String, RuntimeError>;

    fn superclass(&self, class: ObjRef) -> Option<ObjRef>;

    fn is_instance(&self, obj: ObjRef, class: ObjRef) -> bool;

    // Reflection

    fn declared_field(&self, class: ObjRef, name: &str) -> Result<ObjRef, RuntimeError>;

    fn declared_fields(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError>;

    fn declared_method(&self, class: ObjRef, name: &str, params: &[ObjRef]) -> Result<ObjRef, RuntimeError>;

    fn declared_methods(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError>;

    fn declared_constructor(&self, class: ObjRef, params: &[ObjRef]) -> Result<ObjRef, RuntimeError>;

    fn declared_constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError>;

    fn set_accessible(&self, member: ObjRef, flag: bool) -> Result<(), RuntimeError>;

    fn member_name(&self, member: ObjRef) -> Result<String, RuntimeError>;

    fn member_kind(&self, member: ObjRef) -> Result<MemberKind, RuntimeError>;

    fn member_modifiers(&self, member: ObjRef) -> Result<Modifiers, RuntimeError>;

    fn declaring_class(&self, member: ObjRef) -> Result<ObjRef, RuntimeError>;

    fn parameter_types(&self, executable: ObjRef) -> Result<Vec<ObjRef>, RuntimeError>;

    fn field_type(&self, field: ObjRef) -> Result<ObjRef, RuntimeError>;

    fn field_get(&self, field: ObjRef, instance: Option<ObjRef>) -> Result<Value, RuntimeError>;

    fn field_set(&self, field: ObjRef, instance: Option<ObjRef>, value: Value) -> Result<(), RuntimeError>;

    fn method_invoke(&self, method: ObjRef, receiver: Option<ObjRef>, args: &[Value]) -> Result<Value, RuntimeError>;

    fn constructor_new_instance(&self, constructor: ObjRef, args: &[Value]) -> Result<ObjRef, RuntimeError>;

    // Method handles

    /// `MethodHandles.Lookup.unreflectGetter`.
    fn unreflect_getter(&self, field: ObjRef) -> Result<ObjRef, RuntimeError>;

    /// `MethodHandles.Lookup.unreflect`.
    fn unreflect(&self, method: ObjRef) -> Result<ObjRef, RuntimeError>;

    /// `lookup.revealDirect(handle)`: returns the handle's info object,
    /// rebuilding it from the descriptor pointer when the handle has none.
    fn reveal_direct(&self, lookup: ObjRef, handle: ObjRef) -> Result<ObjRef, RuntimeError>;

    /// `MethodHandleInfo.getName()`.
    fn handle_info_name(&self, info: ObjRef) -> Result<String, RuntimeError>;

    /// `MethodHandles.privateLookupIn(class, lookup())`.
    fn private_lookup_in(&self, class: ObjRef) -> Result<ObjRef, RuntimeError>;

    // Strings

    fn new_string(&self, value: &str) -> Result<ObjRef, RuntimeError>;

    fn string_value(&self, obj: ObjRef) -> Option<String>;
}
