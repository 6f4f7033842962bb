//! Embeddable managed runtime with ART-shaped metadata
//!
//! Objects, class mirrors and `ArtField` / `ArtMethod` records live in one
//! arena of real process memory and are laid out the way ART lays them out,
//! so the raw-memory techniques in [`crate::art`] run against it unchanged.
//! Method bodies are Rust closures. Version-dependent policy follows the
//! configured API level: method handles from O, hidden-API enforcement from
//! P, `privateLookupIn` from T.

pub mod bootstrap;
pub mod class_linker;
pub mod heap;
pub mod memory;
#[cfg(unix)]
pub mod platform;
pub mod reflection;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use log::{debug, error, warn};
use parking_lot::Mutex;

use crate::backend::{ObjRef, RuntimeError, Value};
use crate::common::TypeKind;
use crate::sdk_version::codes;

pub use class_linker::{art_method_size, ClassBuilder, NativeMethod, ART_FIELD_SIZE, MEMBER_ARRAY_HEADER};
pub use heap::DEFAULT_HEAP_CAPACITY;
pub use memory::VmMemory;

use class_linker::{ClassInfo, MemberArray, MirrorLayout, Proto};
use heap::Heap;

/// Construction options for a [`Vm`].
#[derive(Debug, Clone)]
pub struct VmOptions {
    pub sdk: u32,
    pub heap_capacity: usize,
    /// Whether `raw_memory()` hands out the unchecked primitive.
    pub allow_raw_memory: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            sdk: codes::TIRAMISU,
            heap_capacity: DEFAULT_HEAP_CAPACITY,
            allow_raw_memory: true,
        }
    }
}

impl VmOptions {
    pub fn with_sdk(mut self, sdk: u32) -> Self {
        self.sdk = sdk;
        self
    }

    pub fn with_heap_capacity(mut self, capacity: usize) -> Self {
        self.heap_capacity = capacity;
        self
    }

    pub fn with_raw_memory(mut self, allow: bool) -> Self {
        self.allow_raw_memory = allow;
        self
    }
}

/// Mutable runtime tables.
#[derive(Default)]
pub(crate) struct VmState {
    pub classes: HashMap<String, ObjRef>,
    pub infos: HashMap<ObjRef, Arc<ClassInfo>>,
    pub strings: Vec<String>,
    pub string_ids: HashMap<String, u32>,
    pub types: Vec<ObjRef>,
    pub type_ids: HashMap<ObjRef, u32>,
    pub protos: Vec<Proto>,
    pub bodies: Vec<NativeMethod>,
    pub class_class: Option<ObjRef>,
    pub finalizable: Vec<ObjRef>,
    /// Reflective member object per `ArtField`/`ArtMethod` record.
    pub members: HashMap<usize, ObjRef>,
    /// `HandleInfo` per (handle, record) pair.
    pub handle_infos: HashMap<(usize, usize), ObjRef>,
    /// Open native documents by handle, with their page counts.
    pub documents: HashMap<i64, i32>,
    pub next_document: i64,
    pub aborted: Option<String>,
}

/// Core classes and the field offsets the runtime itself reads.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WellKnown {
    pub class: ObjRef,
    pub string: ObjRef,
    pub accessible_object: ObjRef,
    pub field: ObjRef,
    pub method: ObjRef,
    pub constructor: ObjRef,
    pub method_handle_impl: ObjRef,
    pub handle_info: ObjRef,
    pub lookup: ObjRef,
    pub override_flag: usize,
    pub field_declaring_class: usize,
    pub field_type: usize,
    pub field_art_field: usize,
    pub field_access_flags: usize,
    pub executable_declaring_class: usize,
    pub executable_art_method: usize,
    pub executable_access_flags: usize,
    pub handle_kind: usize,
    pub handle_art_field_or_method: usize,
    pub handle_info_ref: usize,
    pub info_member: usize,
    pub info_handle: usize,
    pub lookup_class: usize,
    pub lookup_allowed_modes: usize,
    pub string_count: usize,
}

pub(crate) struct VmInner {
    pub options: VmOptions,
    pub heap: Heap,
    pub mirror: MirrorLayout,
    pub state: Mutex<VmState>,
    pub well_known: OnceLock<WellKnown>,
}

/// Handle to a runtime instance; clones share the runtime.
#[derive(Clone)]
pub struct Vm {
    pub(crate) inner: Arc<VmInner>,
}

impl std::fmt::Debug for Vm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("sdk", &self.inner.options.sdk)
            .field("heap_used", &self.inner.heap.used())
            .finish()
    }
}

impl Vm {
    /// A runtime at the given API level with default options.
    pub fn new(sdk: u32) -> Result<Vm, RuntimeError> {
        Vm::with_options(VmOptions::default().with_sdk(sdk))
    }

    pub fn with_options(options: VmOptions) -> Result<Vm, RuntimeError> {
        let core = bootstrap::core_classes();
        let mirror = MirrorLayout::compute(&core[0], &core[1])?;
        let heap = Heap::new(options.heap_capacity)?;
        let vm = Vm {
            inner: Arc::new(VmInner {
                options,
                heap,
                mirror,
                state: Mutex::new(VmState {
                    next_document: 1,
                    ..VmState::default()
                }),
                well_known: OnceLock::new(),
            }),
        };
        bootstrap::boot(&vm, &core)?;
        #[cfg(unix)]
        platform::install(&vm)?;
        debug!("runtime up at API {} ({} heap bytes used)", vm.sdk(), vm.inner.heap.used());
        Ok(vm)
    }

    pub fn sdk(&self) -> u32 {
        self.inner.options.sdk
    }

    pub fn heap_used(&self) -> usize {
        self.inner.heap.used()
    }

    pub(crate) fn mirror(&self) -> MirrorLayout {
        self.inner.mirror
    }

    pub(crate) fn wk(&self) -> &WellKnown {
        self.inner
            .well_known
            .get()
            .expect("runtime used before bootstrap completed")
    }

    /// Define a class; fails on duplicates and unknown superclasses.
    pub fn define_class(&self, builder: ClassBuilder) -> Result<ObjRef, RuntimeError> {
        let mut st = self.inner.state.lock();
        let class = self.declare(&mut st, &builder)?;
        self.link(&mut st, class, &builder)?;
        debug!("defined {} at {:?}", builder.name, class);
        Ok(class)
    }

    /// The class object of a primitive kind (`int.class`).
    pub fn primitive_class(&self, kind: TypeKind) -> Option<ObjRef> {
        let name = kind.primitive_name()?;
        self.inner.state.lock().classes.get(name).copied()
    }

    pub(crate) fn class_info(&self, class: ObjRef) -> Option<Arc<ClassInfo>> {
        self.inner.state.lock().infos.get(&class).cloned()
    }

    pub(crate) fn is_class(&self, obj: ObjRef) -> bool {
        self.inner.state.lock().infos.contains_key(&obj)
    }

    /// Class of an object, read from its header.
    pub(crate) fn class_of(&self, obj: ObjRef) -> Option<ObjRef> {
        let klass = ObjRef::from_addr(self.inner.heap.read::<u64>(obj.addr()) as usize)?;
        self.is_class(klass).then_some(klass)
    }

    pub(crate) fn is_subclass(&self, class: ObjRef, ancestor: ObjRef) -> bool {
        let st = self.inner.state.lock();
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = st.infos.get(&c).and_then(|info| info.superclass);
        }
        false
    }

    pub(crate) fn instance_of(&self, obj: ObjRef, class: ObjRef) -> bool {
        self.class_of(obj).is_some_and(|c| self.is_subclass(c, class))
    }

    pub(crate) fn alloc_raw(&self, size: usize) -> Result<ObjRef, RuntimeError> {
        let addr = self.inner.heap.alloc(size)?;
        ObjRef::from_addr(addr).ok_or_else(|| RuntimeError::Fatal("allocation returned null".to_string()))
    }

    /// Allocate a zeroed instance without running a constructor.
    pub fn alloc_object(&self, class: ObjRef) -> Result<ObjRef, RuntimeError> {
        let mut st = self.inner.state.lock();
        self.alloc_object_locked(&mut st, class)
    }

    pub(crate) fn alloc_object_locked(&self, st: &mut VmState, class: ObjRef) -> Result<ObjRef, RuntimeError> {
        let info = st
            .infos
            .get(&class)
            .cloned()
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not a class", class)))?;
        if !info.instantiable() || Some(class) == st.class_class {
            return Err(RuntimeError::Thrown {
                class: "java.lang.InstantiationException".to_string(),
                message: info.name.clone(),
            });
        }
        let obj = self.alloc_raw(info.object_size)?;
        self.inner.heap.write::<u64>(obj.addr(), class.addr() as u64);
        if info.finalizable {
            st.finalizable.push(obj);
        }
        Ok(obj)
    }

    pub(crate) fn new_string_locked(&self, st: &mut VmState, value: &str) -> Result<ObjRef, RuntimeError> {
        let class = *st
            .classes
            .get("java.lang.String")
            .ok_or_else(|| RuntimeError::ClassNotFound("java.lang.String".to_string()))?;
        let info = st
            .infos
            .get(&class)
            .cloned()
            .ok_or_else(|| RuntimeError::ClassNotFound("java.lang.String".to_string()))?;
        let count = info
            .instance_slots
            .iter()
            .find(|s| s.name == "count")
            .map(|s| s.offset)
            .ok_or_else(|| RuntimeError::NoSuchField("java.lang.String.count".to_string()))?;
        let bytes = value.as_bytes();
        let obj = self.alloc_raw(info.object_size + bytes.len())?;
        let heap = &self.inner.heap;
        heap.write::<u64>(obj.addr(), class.addr() as u64);
        heap.write::<i32>(obj.addr() + count, bytes.len() as i32);
        heap.write_bytes(obj.addr() + info.object_size, bytes);
        Ok(obj)
    }

    pub(crate) fn read_string(&self, obj: ObjRef) -> Option<String> {
        let wk = self.wk();
        if self.class_of(obj)? != wk.string {
            return None;
        }
        let info = self.class_info(wk.string)?;
        let len = self.inner.heap.read::<i32>(obj.addr() + wk.string_count);
        let bytes = self.inner.heap.read_bytes(obj.addr() + info.object_size, usize::try_from(len).ok()?)?;
        String::from_utf8(bytes).ok()
    }

    pub(crate) fn load(&self, addr: usize, kind: TypeKind) -> Value {
        let heap = &self.inner.heap;
        match kind {
            TypeKind::Boolean => Value::Boolean(heap.read::<u8>(addr) != 0),
            TypeKind::Byte => Value::Byte(heap.read::<i8>(addr)),
            TypeKind::Char => Value::Char(heap.read::<u16>(addr)),
            TypeKind::Short => Value::Short(heap.read::<i16>(addr)),
            TypeKind::Int => Value::Int(heap.read::<i32>(addr)),
            TypeKind::Long => Value::Long(heap.read::<i64>(addr)),
            TypeKind::Float => Value::Float(heap.read::<f32>(addr)),
            TypeKind::Double => Value::Double(heap.read::<f64>(addr)),
            TypeKind::Reference => ObjRef::from_addr(heap.read::<u64>(addr) as usize).into(),
            TypeKind::Void => Value::Void,
        }
    }

    /// Store an already coerced value.
    pub(crate) fn store(&self, addr: usize, value: Value) {
        let heap = &self.inner.heap;
        let written = match value {
            Value::Boolean(v) => heap.write::<u8>(addr, v as u8),
            Value::Byte(v) => heap.write::<i8>(addr, v),
            Value::Char(v) => heap.write::<u16>(addr, v),
            Value::Short(v) => heap.write::<i16>(addr, v),
            Value::Int(v) => heap.write::<i32>(addr, v),
            Value::Long(v) => heap.write::<i64>(addr, v),
            Value::Float(v) => heap.write::<f32>(addr, v),
            Value::Double(v) => heap.write::<f64>(addr, v),
            Value::Null => heap.write::<u64>(addr, 0),
            Value::Object(obj) => heap.write::<u64>(addr, obj.addr() as u64),
            Value::Void => true,
        };
        if !written {
            warn!("dropped store to unmapped address {:#x}", addr);
        }
    }

    /// Convert a value for a slot of `kind`, applying widening primitive conversions.
    pub(crate) fn coerce(&self, kind: TypeKind, declared: Option<ObjRef>, value: Value) -> Result<Value, RuntimeError> {
        let mut st = self.inner.state.lock();
        self.coerce_locked(&mut st, kind, declared, value)
    }

    pub(crate) fn coerce_locked(
        &self,
        st: &mut VmState,
        kind: TypeKind,
        declared: Option<ObjRef>,
        value: Value,
    ) -> Result<Value, RuntimeError> {
        let mismatch = || RuntimeError::IllegalArgument(format!("cannot convert {:?} to {}", value, kind));
        let converted = match (kind, value) {
            (TypeKind::Boolean, Value::Boolean(_)) => value,
            (TypeKind::Byte, Value::Byte(_)) => value,
            (TypeKind::Char, Value::Char(_)) => value,
            (TypeKind::Short, Value::Short(_)) => value,
            (TypeKind::Short, Value::Byte(v)) => Value::Short(v as i16),
            (TypeKind::Int, Value::Int(_)) => value,
            (TypeKind::Int, Value::Short(v)) => Value::Int(v as i32),
            (TypeKind::Int, Value::Byte(v)) => Value::Int(v as i32),
            (TypeKind::Int, Value::Char(v)) => Value::Int(v as i32),
            (TypeKind::Long, Value::Long(_)) => value,
            (TypeKind::Long, Value::Int(v)) => Value::Long(v as i64),
            (TypeKind::Float, Value::Float(_)) => value,
            (TypeKind::Float, Value::Int(v)) => Value::Float(v as f32),
            (TypeKind::Double, Value::Double(_)) => value,
            (TypeKind::Double, Value::Float(v)) => Value::Double(v as f64),
            (TypeKind::Double, Value::Int(v)) => Value::Double(v as f64),
            (TypeKind::Double, Value::Long(v)) => Value::Double(v as f64),
            (TypeKind::Reference, Value::Null) => value,
            (TypeKind::Reference, Value::Object(obj)) => {
                if let Some(declared) = declared {
                    if !assignable_locked(st, self, obj, declared) {
                        return Err(mismatch());
                    }
                }
                value
            }
            _ => return Err(mismatch()),
        };
        Ok(converted)
    }

    /// Aborts are sticky: the process would be gone.
    pub(crate) fn abort(&self, message: String) -> RuntimeError {
        error!("runtime abort: {}", message);
        let mut st = self.inner.state.lock();
        st.aborted.get_or_insert_with(|| message.clone());
        RuntimeError::Fatal(message)
    }

    /// Message of the fatal abort, if the runtime has aborted.
    pub fn aborted(&self) -> Option<String> {
        self.inner.state.lock().aborted.clone()
    }

    pub(crate) fn check_alive(&self) -> Result<(), RuntimeError> {
        match self.aborted() {
            Some(message) => Err(RuntimeError::Fatal(message)),
            None => Ok(()),
        }
    }

    fn instance_slot(&self, class: ObjRef, name: &str) -> Option<class_linker::Slot> {
        let st = self.inner.state.lock();
        let mut current = Some(class);
        while let Some(c) = current {
            let info = st.infos.get(&c)?;
            if let Some(slot) = info.instance_slots.iter().find(|s| s.name == name) {
                return Some(slot.clone());
            }
            current = info.superclass;
        }
        None
    }

    /// Read an instance field by name, without access checks.
    pub fn read_field(&self, obj: ObjRef, name: &str) -> Result<Value, RuntimeError> {
        let class = self
            .class_of(obj)
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not an object", obj)))?;
        let slot = self
            .instance_slot(class, name)
            .ok_or_else(|| RuntimeError::NoSuchField(name.to_string()))?;
        Ok(self.load(obj.addr() + slot.offset, slot.kind))
    }

    /// Write an instance field by name, without access checks.
    pub fn write_field(&self, obj: ObjRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        let class = self
            .class_of(obj)
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not an object", obj)))?;
        let slot = self
            .instance_slot(class, name)
            .ok_or_else(|| RuntimeError::NoSuchField(name.to_string()))?;
        let value = self.coerce(slot.kind, None, value)?;
        self.store(obj.addr() + slot.offset, value);
        Ok(())
    }

    fn static_slot(&self, class: ObjRef, name: &str) -> Result<class_linker::Slot, RuntimeError> {
        let info = self
            .class_info(class)
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not a class", class)))?;
        info.static_slots
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .ok_or_else(|| RuntimeError::NoSuchField(format!("{}.{}", info.name, name)))
    }

    /// Read a static field by name, without access checks.
    pub fn read_static(&self, class: ObjRef, name: &str) -> Result<Value, RuntimeError> {
        let slot = self.static_slot(class, name)?;
        Ok(self.load(class.addr() + slot.offset, slot.kind))
    }

    /// Write a static field by name, without access checks.
    pub fn write_static(&self, class: ObjRef, name: &str, value: Value) -> Result<(), RuntimeError> {
        let slot = self.static_slot(class, name)?;
        let value = self.coerce(slot.kind, None, value)?;
        self.store(class.addr() + slot.offset, value);
        Ok(())
    }

    /// Find a method by name and arity along the superclass chain.
    pub(crate) fn find_method(&self, class: ObjRef, name: &str, arity: usize) -> Option<class_linker::MethodRecord> {
        let mut current = Some(class);
        while let Some(c) = current {
            for addr in self.member_records(c, MemberArray::Methods) {
                let record = self.method_record(addr);
                let st = self.inner.state.lock();
                let matches = st.string(record.name_idx) == name
                    && st
                        .protos
                        .get(record.proto_idx as usize)
                        .is_some_and(|proto| proto.params.len() == arity);
                drop(st);
                if matches {
                    return Some(record);
                }
            }
            current = self.class_info(c).and_then(|info| info.superclass);
        }
        None
    }

    /// Call a method by name without access checks.
    pub fn call(&self, class: ObjRef, receiver: Option<ObjRef>, name: &str, args: &[Value]) -> Result<Value, RuntimeError> {
        let record = self
            .find_method(class, name, args.len())
            .ok_or_else(|| RuntimeError::NoSuchMethod(name.to_string()))?;
        self.invoke_record(&record, receiver, args)
    }

    /// Run every pending finalizer once; returns how many ran.
    pub fn run_finalization(&self) -> usize {
        let pending = std::mem::take(&mut self.inner.state.lock().finalizable);
        let mut ran = 0;
        for obj in pending {
            let Some(class) = self.class_of(obj) else { continue };
            if let Some(record) = self.find_method(class, "finalize", 0) {
                ran += 1;
                if let Err(e) = self.invoke_record(&record, Some(obj), &[]) {
                    warn!("finalizer of {:?} failed: {}", obj, e);
                }
            }
        }
        ran
    }
}

fn assignable_locked(st: &VmState, vm: &Vm, obj: ObjRef, declared: ObjRef) -> bool {
    let Some(declared_info) = st.infos.get(&declared) else {
        return false;
    };
    // Interfaces and arrays are not modelled; any object fits a stub type.
    if declared_info.stub {
        return true;
    }
    let heap_klass = vm.inner.heap.read::<u64>(obj.addr()) as usize;
    let mut current = ObjRef::from_addr(heap_klass).filter(|k| st.infos.contains_key(k));
    while let Some(c) = current {
        if c == declared {
            return true;
        }
        current = st.infos.get(&c).and_then(|info| info.superclass);
    }
    false
}
