//! Class definition and linking.
//!
//! A class is declared in two steps. `declare` computes the field layout and
//! allocates the class mirror, `link` builds the `ArtField` / `ArtMethod`
//! arrays and resolves member types. Bootstrap declares every core class
//! before linking any of them so core classes may refer to each other.
//!
//! Instance fields are placed after the superclass's fields: references
//! first, then primitives by descending size, each group ordered by name and
//! every slot aligned to its own size. Static fields use the same order and
//! live in the class mirror after the `java.lang.Class` fields. Member arrays
//! are ordered by name; direct methods (constructors, static and private
//! methods) precede virtual ones.

use std::sync::Arc;

use crate::art::fixtures::FixtureClass;
use crate::backend::{ObjRef, RuntimeError, Value};
use crate::common::{class_name_for, Modifiers, TypeKind};

use super::heap::align_up;
use super::{Vm, VmState};

/// Body of a runtime method: `(vm, receiver, arguments) -> return value`.
pub type NativeMethod = Arc<dyn Fn(&Vm, Option<ObjRef>, &[Value]) -> Result<Value, RuntimeError> + Send + Sync>;

/// Size of an `ArtField` record.
pub const ART_FIELD_SIZE: usize = 24;
/// Length word plus padding before the first record of a member array.
pub const MEMBER_ARRAY_HEADER: usize = 8;

/// `ArtField` record layout.
pub(crate) mod art_field {
    pub const DECLARING_CLASS: usize = 0;
    pub const ACCESS_FLAGS: usize = 8;
    pub const NAME_INDEX: usize = 12;
    pub const TYPE_INDEX: usize = 16;
    pub const OFFSET: usize = 20;
}

/// `ArtMethod` record layout; releases before S append an 8-byte word.
pub(crate) mod art_method {
    pub const DECLARING_CLASS: usize = 0;
    pub const ACCESS_FLAGS: usize = 8;
    pub const NAME_INDEX: usize = 12;
    pub const PROTO_INDEX: usize = 16;
    pub const BODY_INDEX: usize = 20;
}

/// Size of an `ArtMethod` record on a given release.
pub fn art_method_size(sdk: u32) -> usize {
    if sdk >= crate::sdk_version::codes::SNOW_CONE {
        24
    } else {
        32
    }
}

/// `ClassStatus::kInitialized`
const STATUS_INITIALIZED: i32 = 14;

#[derive(Clone)]
pub(crate) struct FieldDecl {
    pub name: String,
    pub descriptor: String,
    pub modifiers: Modifiers,
}

#[derive(Clone)]
pub(crate) struct MethodDecl {
    pub name: String,
    pub params: Vec<String>,
    pub returns: String,
    pub modifiers: Modifiers,
    pub body: NativeMethod,
}

impl MethodDecl {
    fn is_direct(&self) -> bool {
        self.modifiers
            .intersects(Modifiers::STATIC | Modifiers::PRIVATE | Modifiers::CONSTRUCTOR)
    }
}

/// Declaration of a class to be defined in a [`Vm`].
///
/// ```ignore
/// let widget = vm.define_class(
///     ClassBuilder::new("demo.Widget")
///         .field("count", "I", Modifiers::PRIVATE | Modifiers::STATIC)
///         .initial("count", Value::Int(3)),
/// )?;
/// ```
#[derive(Clone)]
pub struct ClassBuilder {
    pub(crate) name: String,
    pub(crate) superclass: Option<String>,
    pub(crate) modifiers: Modifiers,
    pub(crate) primitive: Option<TypeKind>,
    pub(crate) stub: bool,
    pub(crate) fields: Vec<FieldDecl>,
    pub(crate) methods: Vec<MethodDecl>,
    pub(crate) initial: Vec<(String, Value)>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            superclass: Some("java.lang.Object".to_string()),
            modifiers: Modifiers::PUBLIC,
            primitive: None,
            stub: false,
            fields: Vec::new(),
            methods: Vec::new(),
            initial: Vec::new(),
        }
    }

    pub fn extends(mut self, superclass: &str) -> Self {
        self.superclass = Some(superclass.to_string());
        self
    }

    pub fn modifiers(mut self, modifiers: Modifiers) -> Self {
        self.modifiers = modifiers;
        self
    }

    pub fn field(mut self, name: &str, descriptor: &str, modifiers: Modifiers) -> Self {
        self.fields.push(FieldDecl {
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            modifiers,
        });
        self
    }

    pub fn method<F>(mut self, name: &str, params: &[&str], returns: &str, modifiers: Modifiers, body: F) -> Self
    where
        F: Fn(&Vm, Option<ObjRef>, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        let modifiers = if name.starts_with('<') {
            modifiers | Modifiers::CONSTRUCTOR
        } else {
            modifiers
        };
        self.methods.push(MethodDecl {
            name: name.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
            returns: returns.to_string(),
            modifiers,
            body: Arc::new(body),
        });
        self
    }

    pub fn constructor<F>(self, params: &[&str], modifiers: Modifiers, body: F) -> Self
    where
        F: Fn(&Vm, Option<ObjRef>, &[Value]) -> Result<Value, RuntimeError> + Send + Sync + 'static,
    {
        self.method("<init>", params, "V", modifiers, body)
    }

    /// Initial value of a static field.
    pub fn initial(mut self, field: &str, value: Value) -> Self {
        self.initial.push((field.to_string(), value));
        self
    }

    pub(crate) fn root(name: &str) -> Self {
        ClassBuilder {
            superclass: None,
            ..ClassBuilder::new(name)
        }
    }

    pub(crate) fn primitive(kind: TypeKind, name: &str) -> Self {
        ClassBuilder {
            primitive: Some(kind),
            modifiers: Modifiers::PUBLIC | Modifiers::FINAL | Modifiers::ABSTRACT,
            ..ClassBuilder::root(name)
        }
    }

    /// Placeholder for a referenced type nobody defined (interfaces, arrays).
    pub(crate) fn stub(name: &str) -> Self {
        ClassBuilder {
            stub: true,
            modifiers: Modifiers::PUBLIC | Modifiers::ABSTRACT,
            ..ClassBuilder::new(name)
        }
    }

    pub(crate) fn from_fixture(fixture: &FixtureClass) -> Self {
        let mut builder = ClassBuilder::new(fixture.name).extends(fixture.superclass);
        for field in fixture.fields {
            builder = builder.field(field.name, field.descriptor, field.modifiers);
        }
        for method in fixture.methods {
            builder = builder.method(method.name, method.params, method.returns, method.modifiers, |_, _, _| {
                Ok(Value::Void)
            });
        }
        builder
    }

    fn has_constructor(&self) -> bool {
        self.methods.iter().any(|m| m.name == "<init>")
    }

    fn needs_default_constructor(&self) -> bool {
        !self.stub
            && self.primitive.is_none()
            && !self.modifiers.contains(Modifiers::INTERFACE)
            && !self.has_constructor()
    }
}

/// A laid-out field slot.
#[derive(Debug, Clone)]
pub(crate) struct Slot {
    pub name: String,
    pub kind: TypeKind,
    pub offset: usize,
}

/// Runtime-side bookkeeping for a class mirror.
#[derive(Debug)]
pub(crate) struct ClassInfo {
    pub name: String,
    pub superclass: Option<ObjRef>,
    pub modifiers: Modifiers,
    pub primitive: Option<TypeKind>,
    pub stub: bool,
    pub object_size: usize,
    pub instance_slots: Vec<Slot>,
    pub static_slots: Vec<Slot>,
    pub finalizable: bool,
}

impl ClassInfo {
    pub fn kind(&self) -> TypeKind {
        self.primitive.unwrap_or(TypeKind::Reference)
    }

    pub fn instantiable(&self) -> bool {
        !self.stub
            && self.primitive.is_none()
            && !self.modifiers.intersects(Modifiers::ABSTRACT | Modifiers::INTERFACE)
    }
}

/// Offsets of the `java.lang.Class` fields the runtime itself maintains.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MirrorLayout {
    /// Size of a mirror without statics.
    pub size: usize,
    pub name: usize,
    pub super_class: usize,
    pub ifields: usize,
    pub sfields: usize,
    pub methods: usize,
    pub access_flags: usize,
    pub object_size: usize,
    pub class_size: usize,
    pub status: usize,
    pub primitive_type: usize,
    pub num_reference_instance_fields: usize,
    pub num_reference_static_fields: usize,
    pub virtual_methods_offset: usize,
    pub copied_methods_offset: usize,
}

impl MirrorLayout {
    /// Layout of `java.lang.Class` given the declarations of `Object` and `Class`.
    pub fn compute(object: &ClassBuilder, class: &ClassBuilder) -> Result<MirrorLayout, RuntimeError> {
        let (_, object_end) = layout_fields(0, &instance_kinds(object)?);
        let (slots, class_end) = layout_fields(align_up(object_end, 8), &instance_kinds(class)?);
        let find = |name: &str| {
            slots
                .iter()
                .find(|s| s.name == name)
                .map(|s| s.offset)
                .ok_or_else(|| RuntimeError::NoSuchField(format!("java.lang.Class.{}", name)))
        };
        Ok(MirrorLayout {
            size: align_up(class_end, 8),
            name: find("name")?,
            super_class: find("superClass")?,
            ifields: find("iFields")?,
            sfields: find("sFields")?,
            methods: find("methods")?,
            access_flags: find("accessFlags")?,
            object_size: find("objectSize")?,
            class_size: find("classSize")?,
            status: find("status")?,
            primitive_type: find("primitiveType")?,
            num_reference_instance_fields: find("numReferenceInstanceFields")?,
            num_reference_static_fields: find("numReferenceStaticFields")?,
            virtual_methods_offset: find("virtualMethodsOffset")?,
            copied_methods_offset: find("copiedMethodsOffset")?,
        })
    }
}

/// Which member array of a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MemberArray {
    StaticFields,
    InstanceFields,
    Methods,
}

/// Prototype of a method: resolved parameter and return types.
#[derive(Debug, Clone)]
pub(crate) struct Proto {
    pub params: Vec<ObjRef>,
    pub param_kinds: Vec<TypeKind>,
    pub return_kind: TypeKind,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldRecord {
    pub addr: usize,
    pub declaring: Option<ObjRef>,
    pub flags: Modifiers,
    pub name_idx: u32,
    pub type_idx: u32,
    pub offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct MethodRecord {
    pub addr: usize,
    pub declaring: Option<ObjRef>,
    pub flags: Modifiers,
    pub name_idx: u32,
    pub proto_idx: u32,
    pub body_idx: u32,
}

fn descriptor_kind(descriptor: &str) -> Result<TypeKind, RuntimeError> {
    TypeKind::from_descriptor(descriptor)
        .ok_or_else(|| RuntimeError::IllegalArgument(format!("malformed descriptor {:?}", descriptor)))
}

fn instance_kinds(decl: &ClassBuilder) -> Result<Vec<(String, TypeKind)>, RuntimeError> {
    decl.fields
        .iter()
        .filter(|f| !f.modifiers.is_static())
        .map(|f| Ok((f.name.clone(), descriptor_kind(&f.descriptor)?)))
        .collect()
}

fn static_kinds(decl: &ClassBuilder) -> Result<Vec<(String, TypeKind)>, RuntimeError> {
    decl.fields
        .iter()
        .filter(|f| f.modifiers.is_static())
        .map(|f| Ok((f.name.clone(), descriptor_kind(&f.descriptor)?)))
        .collect()
}

fn layout_group(kind: TypeKind) -> usize {
    match kind {
        TypeKind::Reference => 0,
        other => 16 - other.size(),
    }
}

/// Place fields starting at `start`; returns the slots and the end offset.
pub(crate) fn layout_fields(start: usize, fields: &[(String, TypeKind)]) -> (Vec<Slot>, usize) {
    let mut ordered: Vec<&(String, TypeKind)> = fields.iter().collect();
    ordered.sort_by(|a, b| (layout_group(a.1), &a.0).cmp(&(layout_group(b.1), &b.0)));

    let mut offset = start;
    let mut slots = Vec::with_capacity(ordered.len());
    for (name, kind) in ordered {
        let size = kind.size().max(1);
        offset = align_up(offset, size);
        slots.push(Slot {
            name: name.clone(),
            kind: *kind,
            offset,
        });
        offset += size;
    }
    (slots, offset)
}

fn primitive_type_code(kind: Option<TypeKind>) -> i32 {
    match kind {
        None | Some(TypeKind::Reference) => 0,
        Some(TypeKind::Boolean) => 1,
        Some(TypeKind::Byte) => 2,
        Some(TypeKind::Char) => 3,
        Some(TypeKind::Short) => 4,
        Some(TypeKind::Int) => 5,
        Some(TypeKind::Long) => 6,
        Some(TypeKind::Float) => 7,
        Some(TypeKind::Double) => 8,
        Some(TypeKind::Void) => 9,
    }
}

impl Vm {
    /// Lay out a class and allocate its mirror.
    pub(crate) fn declare(&self, st: &mut VmState, decl: &ClassBuilder) -> Result<ObjRef, RuntimeError> {
        if st.classes.contains_key(&decl.name) {
            return Err(RuntimeError::Thrown {
                class: "java.lang.LinkageError".to_string(),
                message: format!("duplicate class definition: {}", decl.name),
            });
        }
        let superclass = match &decl.superclass {
            Some(name) => Some(
                *st.classes
                    .get(name)
                    .ok_or_else(|| RuntimeError::ClassNotFound(name.clone()))?,
            ),
            None => None,
        };
        let super_info = superclass.and_then(|s| st.infos.get(&s).cloned());

        let start = super_info.as_ref().map_or(0, |info| info.object_size);
        let (instance_slots, instance_end) = layout_fields(start, &instance_kinds(decl)?);
        let (static_slots, static_end) = layout_fields(self.mirror().size, &static_kinds(decl)?);
        let object_size = align_up(instance_end, 8);
        let class_size = align_up(static_end, 8);

        let mirror = self.mirror();
        let class = self.alloc_raw(class_size)?;
        let heap = &self.inner.heap;
        heap.write::<u64>(class.addr(), ObjRef::to_raw(st.class_class));
        heap.write::<u64>(class.addr() + mirror.super_class, ObjRef::to_raw(superclass));
        heap.write::<u32>(class.addr() + mirror.access_flags, decl.modifiers.bits());
        heap.write::<i32>(class.addr() + mirror.object_size, object_size as i32);
        heap.write::<i32>(class.addr() + mirror.class_size, class_size as i32);
        heap.write::<i32>(class.addr() + mirror.status, STATUS_INITIALIZED);
        heap.write::<i32>(class.addr() + mirror.primitive_type, primitive_type_code(decl.primitive));
        let count_refs = |slots: &[Slot]| slots.iter().filter(|s| s.kind == TypeKind::Reference).count() as i32;
        heap.write::<i32>(class.addr() + mirror.num_reference_instance_fields, count_refs(&instance_slots));
        heap.write::<i32>(class.addr() + mirror.num_reference_static_fields, count_refs(&static_slots));

        let declares_finalize = decl
            .methods
            .iter()
            .any(|m| m.name == "finalize" && m.params.is_empty() && !m.modifiers.is_static());
        let info = ClassInfo {
            name: decl.name.clone(),
            superclass,
            modifiers: decl.modifiers,
            primitive: decl.primitive,
            stub: decl.stub,
            object_size,
            instance_slots,
            static_slots,
            finalizable: declares_finalize || super_info.is_some_and(|info| info.finalizable),
        };
        st.classes.insert(decl.name.clone(), class);
        st.infos.insert(class, Arc::new(info));
        Ok(class)
    }

    /// Build the member arrays of a declared class and run its static initializers.
    pub(crate) fn link(&self, st: &mut VmState, class: ObjRef, decl: &ClassBuilder) -> Result<(), RuntimeError> {
        let info = st
            .infos
            .get(&class)
            .cloned()
            .ok_or_else(|| RuntimeError::ClassNotFound(decl.name.clone()))?;
        let mirror = self.mirror();

        let mut statics: Vec<&FieldDecl> = decl.fields.iter().filter(|f| f.modifiers.is_static()).collect();
        let mut instance: Vec<&FieldDecl> = decl.fields.iter().filter(|f| !f.modifiers.is_static()).collect();
        statics.sort_by(|a, b| a.name.cmp(&b.name));
        instance.sort_by(|a, b| a.name.cmp(&b.name));

        let sfields = self.build_field_array(st, class, &statics, &info.static_slots)?;
        let ifields = self.build_field_array(st, class, &instance, &info.instance_slots)?;

        let mut methods: Vec<MethodDecl> = decl.methods.clone();
        if decl.needs_default_constructor() {
            methods.push(MethodDecl {
                name: "<init>".to_string(),
                params: Vec::new(),
                returns: "V".to_string(),
                modifiers: Modifiers::PUBLIC | Modifiers::CONSTRUCTOR,
                body: Arc::new(|_, _, _| Ok(Value::Void)),
            });
        }
        let (mut direct, mut virtuals): (Vec<MethodDecl>, Vec<MethodDecl>) =
            methods.into_iter().partition(MethodDecl::is_direct);
        direct.sort_by(|a, b| a.name.cmp(&b.name));
        virtuals.sort_by(|a, b| a.name.cmp(&b.name));
        let direct_count = direct.len();
        direct.extend(virtuals);
        let method_array = self.build_method_array(st, class, &direct)?;

        let heap = &self.inner.heap;
        heap.write::<u64>(class.addr() + mirror.sfields, sfields as u64);
        heap.write::<u64>(class.addr() + mirror.ifields, ifields as u64);
        heap.write::<u64>(class.addr() + mirror.methods, method_array as u64);
        heap.write::<i16>(class.addr() + mirror.virtual_methods_offset, direct_count as i16);
        heap.write::<i16>(class.addr() + mirror.copied_methods_offset, direct.len() as i16);

        let name = self.new_string_locked(st, &decl.name)?;
        heap.write::<u64>(class.addr() + mirror.name, name.addr() as u64);

        for (field, value) in &decl.initial {
            let slot = info
                .static_slots
                .iter()
                .find(|s| &s.name == field)
                .ok_or_else(|| RuntimeError::NoSuchField(format!("{}.{}", decl.name, field)))?;
            let value = self.coerce_locked(st, slot.kind, None, *value)?;
            self.store(class.addr() + slot.offset, value);
        }
        Ok(())
    }

    fn build_field_array(
        &self,
        st: &mut VmState,
        class: ObjRef,
        fields: &[&FieldDecl],
        slots: &[Slot],
    ) -> Result<usize, RuntimeError> {
        if fields.is_empty() {
            return Ok(0);
        }
        let base = self.alloc_raw(MEMBER_ARRAY_HEADER + fields.len() * ART_FIELD_SIZE)?.addr();
        let heap = &self.inner.heap;
        heap.write::<u32>(base, fields.len() as u32);
        for (i, field) in fields.iter().enumerate() {
            let record = base + MEMBER_ARRAY_HEADER + i * ART_FIELD_SIZE;
            let offset = slots
                .iter()
                .find(|s| s.name == field.name)
                .map(|s| s.offset)
                .ok_or_else(|| RuntimeError::NoSuchField(field.name.clone()))?;
            let name_idx = st.intern(&field.name);
            let type_idx = self.resolve_type_locked(st, &field.descriptor)?;
            heap.write::<u64>(record + art_field::DECLARING_CLASS, class.addr() as u64);
            heap.write::<u32>(record + art_field::ACCESS_FLAGS, field.modifiers.bits());
            heap.write::<u32>(record + art_field::NAME_INDEX, name_idx);
            heap.write::<u32>(record + art_field::TYPE_INDEX, type_idx);
            heap.write::<u32>(record + art_field::OFFSET, offset as u32);
        }
        Ok(base)
    }

    fn build_method_array(&self, st: &mut VmState, class: ObjRef, methods: &[MethodDecl]) -> Result<usize, RuntimeError> {
        if methods.is_empty() {
            return Ok(0);
        }
        let stride = art_method_size(self.inner.options.sdk);
        let base = self.alloc_raw(MEMBER_ARRAY_HEADER + methods.len() * stride)?.addr();
        let heap = &self.inner.heap;
        heap.write::<u32>(base, methods.len() as u32);
        for (i, method) in methods.iter().enumerate() {
            let record = base + MEMBER_ARRAY_HEADER + i * stride;
            let mut params = Vec::with_capacity(method.params.len());
            let mut param_kinds = Vec::with_capacity(method.params.len());
            for param in &method.params {
                let idx = self.resolve_type_locked(st, param)?;
                params.push(st.types[idx as usize]);
                param_kinds.push(descriptor_kind(param)?);
            }
            let return_kind = descriptor_kind(&method.returns)?;
            self.resolve_type_locked(st, &method.returns)?;

            let name_idx = st.intern(&method.name);
            let proto_idx = st.protos.len() as u32;
            st.protos.push(Proto {
                params,
                param_kinds,
                return_kind,
            });
            let body_idx = st.bodies.len() as u32;
            st.bodies.push(method.body.clone());

            heap.write::<u64>(record + art_method::DECLARING_CLASS, class.addr() as u64);
            heap.write::<u32>(record + art_method::ACCESS_FLAGS, method.modifiers.bits());
            heap.write::<u32>(record + art_method::NAME_INDEX, name_idx);
            heap.write::<u32>(record + art_method::PROTO_INDEX, proto_idx);
            heap.write::<u32>(record + art_method::BODY_INDEX, body_idx);
        }
        Ok(base)
    }

    /// Resolve a descriptor to a type-table index, defining a stub for unknown classes.
    pub(crate) fn resolve_type_locked(&self, st: &mut VmState, descriptor: &str) -> Result<u32, RuntimeError> {
        let name = class_name_for(descriptor)
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("malformed descriptor {:?}", descriptor)))?;
        let class = match st.classes.get(&name) {
            Some(class) => *class,
            None => {
                let stub = ClassBuilder::stub(&name);
                let class = self.declare(st, &stub)?;
                self.link(st, class, &stub)?;
                class
            }
        };
        if let Some(idx) = st.type_ids.get(&class) {
            return Ok(*idx);
        }
        let idx = st.types.len() as u32;
        st.types.push(class);
        st.type_ids.insert(class, idx);
        Ok(idx)
    }

    /// Record addresses of one member array of `class`.
    pub(crate) fn member_records(&self, class: ObjRef, which: MemberArray) -> Vec<usize> {
        let mirror = self.mirror();
        let (offset, stride) = match which {
            MemberArray::StaticFields => (mirror.sfields, ART_FIELD_SIZE),
            MemberArray::InstanceFields => (mirror.ifields, ART_FIELD_SIZE),
            MemberArray::Methods => (mirror.methods, art_method_size(self.inner.options.sdk)),
        };
        let heap = &self.inner.heap;
        let base = heap.read::<u64>(class.addr() + offset) as usize;
        if base == 0 {
            return Vec::new();
        }
        let count = heap.read::<u32>(base) as usize;
        (0..count)
            .map(|i| base + MEMBER_ARRAY_HEADER + i * stride)
            .collect()
    }

    pub(crate) fn field_record(&self, addr: usize) -> FieldRecord {
        let heap = &self.inner.heap;
        FieldRecord {
            addr,
            declaring: ObjRef::from_addr(heap.read::<u64>(addr + art_field::DECLARING_CLASS) as usize),
            flags: Modifiers::from_bits_retain(heap.read::<u32>(addr + art_field::ACCESS_FLAGS)),
            name_idx: heap.read::<u32>(addr + art_field::NAME_INDEX),
            type_idx: heap.read::<u32>(addr + art_field::TYPE_INDEX),
            offset: heap.read::<u32>(addr + art_field::OFFSET),
        }
    }

    pub(crate) fn method_record(&self, addr: usize) -> MethodRecord {
        let heap = &self.inner.heap;
        MethodRecord {
            addr,
            declaring: ObjRef::from_addr(heap.read::<u64>(addr + art_method::DECLARING_CLASS) as usize),
            flags: Modifiers::from_bits_retain(heap.read::<u32>(addr + art_method::ACCESS_FLAGS)),
            name_idx: heap.read::<u32>(addr + art_method::NAME_INDEX),
            proto_idx: heap.read::<u32>(addr + art_method::PROTO_INDEX),
            body_idx: heap.read::<u32>(addr + art_method::BODY_INDEX),
        }
    }

    /// Class whose `which` array holds a record at exactly `addr`, if any.
    pub(crate) fn record_owner(&self, addr: usize, arrays: &[MemberArray]) -> Option<ObjRef> {
        let declaring = ObjRef::from_addr(self.inner.heap.read::<u64>(addr) as usize)?;
        if !self.is_class(declaring) {
            return None;
        }
        arrays
            .iter()
            .any(|which| self.member_records(declaring, *which).contains(&addr))
            .then_some(declaring)
    }
}

impl VmState {
    pub(crate) fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.string_ids.get(s) {
            return *idx;
        }
        let idx = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.string_ids.insert(s.to_string(), idx);
        idx
    }

    pub(crate) fn string(&self, idx: u32) -> String {
        self.strings.get(idx as usize).cloned().unwrap_or_default()
    }
}
