//! The runtime's official, access-checked API.

use log::debug;

use crate::art::fixtures::FixtureClass;
use crate::backend::{ManagedRuntime, MemberKind, ObjRef, RuntimeError, Value};
use crate::common::{package_of, LookupModes, Modifiers, TypeKind};
use crate::sdk_version::SdkVersion;

use super::class_linker::{ClassBuilder, FieldRecord, MemberArray, MethodRecord, Proto};
use super::{Vm, VmMemory};

/// `MethodHandle` kinds, as stored in `handleKind`.
pub mod handle_kind {
    pub const INVOKE_VIRTUAL: i32 = 0;
    pub const INVOKE_DIRECT: i32 = 2;
    pub const INVOKE_STATIC: i32 = 3;
    pub const IGET: i32 = 9;
    pub const IPUT: i32 = 10;
    pub const SGET: i32 = 11;
    pub const SPUT: i32 = 12;
}

/// Runtime record behind a reflective member object.
#[derive(Debug, Clone, Copy)]
pub(crate) enum MemberRecord {
    Field(FieldRecord),
    Executable(MethodRecord, MemberKind),
}

impl MemberRecord {
    fn declaring(&self) -> Option<ObjRef> {
        match self {
            MemberRecord::Field(r) => r.declaring,
            MemberRecord::Executable(r, _) => r.declaring,
        }
    }

    fn flags(&self) -> Modifiers {
        match self {
            MemberRecord::Field(r) => r.flags,
            MemberRecord::Executable(r, _) => r.flags,
        }
    }

    fn name_idx(&self) -> u32 {
        match self {
            MemberRecord::Field(r) => r.name_idx,
            MemberRecord::Executable(r, _) => r.name_idx,
        }
    }
}

impl Vm {
    fn version(&self) -> SdkVersion {
        SdkVersion::new(self.sdk())
    }

    fn require_method_handles(&self, what: &str) -> Result<(), RuntimeError> {
        if self.version().has_method_handles() {
            Ok(())
        } else {
            Err(RuntimeError::Unsupported {
                sdk: self.sdk(),
                what: what.to_string(),
            })
        }
    }

    fn hidden_from_reflection(&self, flags: Modifiers) -> bool {
        flags.is_hidden() && self.version().enforces_hidden_api()
    }

    fn name_at(&self, idx: u32) -> String {
        self.inner.state.lock().string(idx)
    }

    fn type_at(&self, idx: u32) -> Result<ObjRef, RuntimeError> {
        self.inner
            .state
            .lock()
            .types
            .get(idx as usize)
            .copied()
            .ok_or_else(|| RuntimeError::ClassNotFound(format!("type #{}", idx)))
    }

    fn proto_at(&self, idx: u32) -> Result<Proto, RuntimeError> {
        self.inner
            .state
            .lock()
            .protos
            .get(idx as usize)
            .cloned()
            .ok_or_else(|| RuntimeError::NoSuchMethod(format!("proto #{}", idx)))
    }

    fn kind_of_type(&self, class: ObjRef) -> TypeKind {
        self.class_info(class).map_or(TypeKind::Reference, |info| info.kind())
    }

    fn qualified(&self, declaring: Option<ObjRef>, name_idx: u32) -> String {
        let class = declaring
            .and_then(|c| self.class_info(c))
            .map_or_else(|| "?".to_string(), |info| info.name.clone());
        format!("{}.{}", class, self.name_at(name_idx))
    }

    pub(crate) fn member_record(&self, member: ObjRef) -> Result<MemberRecord, RuntimeError> {
        let wk = self.wk();
        let heap = &self.inner.heap;
        let class = self
            .class_of(member)
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not an object", member)))?;
        if class == wk.field {
            let addr = heap.read::<u64>(member.addr() + wk.field_art_field) as usize;
            Ok(MemberRecord::Field(self.field_record(addr)))
        } else if class == wk.method || class == wk.constructor {
            let addr = heap.read::<u64>(member.addr() + wk.executable_art_method) as usize;
            let kind = if class == wk.method {
                MemberKind::Method
            } else {
                MemberKind::Constructor
            };
            Ok(MemberRecord::Executable(self.method_record(addr), kind))
        } else {
            Err(RuntimeError::IllegalArgument(format!("{:?} is not a reflective member", member)))
        }
    }

    fn field_of(&self, member: ObjRef) -> Result<FieldRecord, RuntimeError> {
        match self.member_record(member)? {
            MemberRecord::Field(record) => Ok(record),
            MemberRecord::Executable(..) => Err(RuntimeError::IllegalArgument("not a field".to_string())),
        }
    }

    fn executable_of(&self, member: ObjRef) -> Result<(MethodRecord, MemberKind), RuntimeError> {
        match self.member_record(member)? {
            MemberRecord::Executable(record, kind) => Ok((record, kind)),
            MemberRecord::Field(_) => Err(RuntimeError::IllegalArgument("not a method or constructor".to_string())),
        }
    }

    fn is_overridden(&self, member: ObjRef) -> bool {
        self.inner.heap.read::<u8>(member.addr() + self.wk().override_flag) != 0
    }

    fn check_member_access(&self, member: ObjRef, record: &MemberRecord) -> Result<(), RuntimeError> {
        if record.flags().is_public() || self.is_overridden(member) {
            Ok(())
        } else {
            Err(RuntimeError::IllegalAccess(format!(
                "{} member {} is not accessible",
                record.flags().visibility_name(),
                self.qualified(record.declaring(), record.name_idx())
            )))
        }
    }

    /// The member object for a record, created on first request.
    ///
    /// Member objects are canonical per record, so an accessible flag set on
    /// one is seen by every later lookup of the same member.
    fn interned_member(
        &self,
        record: usize,
        class: ObjRef,
        init: impl FnOnce(ObjRef),
    ) -> Result<ObjRef, RuntimeError> {
        let mut st = self.inner.state.lock();
        if let Some(member) = st.members.get(&record) {
            return Ok(*member);
        }
        let obj = self.alloc_object_locked(&mut st, class)?;
        init(obj);
        st.members.insert(record, obj);
        Ok(obj)
    }

    pub(crate) fn new_field_object(&self, record: &FieldRecord) -> Result<ObjRef, RuntimeError> {
        let wk = self.wk();
        let heap = &self.inner.heap;
        let field_type = self.type_at(record.type_idx)?;
        self.interned_member(record.addr, wk.field, |obj| {
            heap.write::<u64>(obj.addr() + wk.field_declaring_class, ObjRef::to_raw(record.declaring));
            heap.write::<u64>(obj.addr() + wk.field_type, field_type.addr() as u64);
            heap.write::<u64>(obj.addr() + wk.field_art_field, record.addr as u64);
            heap.write::<u32>(obj.addr() + wk.field_access_flags, record.flags.java_visible().bits());
        })
    }

    pub(crate) fn new_executable_object(&self, record: &MethodRecord) -> Result<ObjRef, RuntimeError> {
        let wk = self.wk();
        let heap = &self.inner.heap;
        let class = if self.name_at(record.name_idx).starts_with('<') {
            wk.constructor
        } else {
            wk.method
        };
        self.interned_member(record.addr, class, |obj| {
            heap.write::<u64>(obj.addr() + wk.executable_declaring_class, ObjRef::to_raw(record.declaring));
            heap.write::<u64>(obj.addr() + wk.executable_art_method, record.addr as u64);
            heap.write::<u32>(obj.addr() + wk.executable_access_flags, record.flags.java_visible().bits());
        })
    }

    /// The `HandleInfo` describing `member` through `handle`, reused per pair.
    fn handle_info_for(&self, handle: ObjRef, target: usize, member: ObjRef) -> Result<ObjRef, RuntimeError> {
        let wk = self.wk();
        let heap = &self.inner.heap;
        let mut st = self.inner.state.lock();
        if let Some(info) = st.handle_infos.get(&(handle.addr(), target)) {
            return Ok(*info);
        }
        let info = self.alloc_object_locked(&mut st, wk.handle_info)?;
        heap.write::<u64>(info.addr() + wk.info_member, member.addr() as u64);
        heap.write::<u64>(info.addr() + wk.info_handle, handle.addr() as u64);
        st.handle_infos.insert((handle.addr(), target), info);
        Ok(info)
    }

    fn field_address(&self, record: &FieldRecord, instance: Option<ObjRef>) -> Result<usize, RuntimeError> {
        let declaring = record
            .declaring
            .ok_or_else(|| RuntimeError::IllegalArgument("field without declaring class".to_string()))?;
        if record.flags.is_static() {
            return Ok(declaring.addr() + record.offset as usize);
        }
        let obj = instance.ok_or_else(|| {
            RuntimeError::NullPointer(format!("instance field {} read on null", self.name_at(record.name_idx)))
        })?;
        if !self.instance_of(obj, declaring) {
            return Err(RuntimeError::IllegalArgument(format!(
                "{:?} does not hold field {}",
                obj,
                self.qualified(record.declaring, record.name_idx)
            )));
        }
        Ok(obj.addr() + record.offset as usize)
    }

    /// Run a method body with checked arguments.
    pub(crate) fn invoke_record(
        &self,
        record: &MethodRecord,
        receiver: Option<ObjRef>,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        self.check_alive()?;
        let (proto, body, name) = {
            let st = self.inner.state.lock();
            let proto = st.protos.get(record.proto_idx as usize).cloned();
            let body = st.bodies.get(record.body_idx as usize).cloned();
            (proto, body, st.string(record.name_idx))
        };
        let (Some(proto), Some(body)) = (proto, body) else {
            return Err(RuntimeError::NoSuchMethod(format!("{} has no body", name)));
        };
        if args.len() != proto.params.len() {
            return Err(RuntimeError::IllegalArgument(format!(
                "{} expects {} arguments, got {}",
                name,
                proto.params.len(),
                args.len()
            )));
        }
        let mut checked = Vec::with_capacity(args.len());
        for ((kind, declared), arg) in proto.param_kinds.iter().zip(&proto.params).zip(args) {
            checked.push(self.coerce(*kind, Some(*declared), *arg)?);
        }
        let receiver = if record.flags.is_static() {
            None
        } else {
            let obj = receiver.ok_or_else(|| RuntimeError::NullPointer(format!("{} called on null", name)))?;
            if let Some(declaring) = record.declaring {
                if !self.instance_of(obj, declaring) {
                    return Err(RuntimeError::IllegalArgument(format!(
                        "receiver {:?} is not an instance of the declaring class of {}",
                        obj, name
                    )));
                }
            }
            Some(obj)
        };
        let result = body(self, receiver, &checked)?;
        if proto.return_kind == TypeKind::Void {
            Ok(Value::Void)
        } else {
            Ok(result)
        }
    }

    /// Most specific override of a virtual method for `receiver`.
    fn dispatch(&self, record: MethodRecord, receiver: ObjRef) -> Result<MethodRecord, RuntimeError> {
        if record
            .flags
            .intersects(Modifiers::STATIC | Modifiers::PRIVATE | Modifiers::CONSTRUCTOR)
        {
            return Ok(record);
        }
        let name = self.name_at(record.name_idx);
        let params = self.proto_at(record.proto_idx)?.params;
        let mut current = self.class_of(receiver);
        while let Some(class) = current {
            if Some(class) == record.declaring {
                break;
            }
            for addr in self.member_records(class, MemberArray::Methods) {
                let candidate = self.method_record(addr);
                if candidate.flags.intersects(Modifiers::STATIC | Modifiers::PRIVATE)
                    || self.name_at(candidate.name_idx) != name
                {
                    continue;
                }
                if self.proto_at(candidate.proto_idx)?.params == params {
                    return Ok(candidate);
                }
            }
            current = self.superclass(class);
        }
        Ok(record)
    }

    fn find_method_record(
        &self,
        class: ObjRef,
        accept: impl Fn(&str, &MethodRecord) -> bool,
    ) -> Vec<MethodRecord> {
        self.member_records(class, MemberArray::Methods)
            .into_iter()
            .map(|addr| self.method_record(addr))
            .filter(|record| !self.hidden_from_reflection(record.flags))
            .filter(|record| accept(&self.name_at(record.name_idx), record))
            .collect()
    }

    fn params_equal(&self, record: &MethodRecord, params: &[ObjRef]) -> bool {
        self.proto_at(record.proto_idx)
            .is_ok_and(|proto| proto.params.as_slice() == params)
    }

    fn member_for_descriptor(&self, kind: i32, target: usize) -> Result<ObjRef, RuntimeError> {
        let invalid = || RuntimeError::IllegalArgument(format!("no member descriptor at {:#x}", target));
        if (handle_kind::IGET..=handle_kind::SPUT).contains(&kind) {
            self.record_owner(target, &[MemberArray::StaticFields, MemberArray::InstanceFields])
                .ok_or_else(invalid)?;
            self.new_field_object(&self.field_record(target))
        } else {
            self.record_owner(target, &[MemberArray::Methods]).ok_or_else(invalid)?;
            self.new_executable_object(&self.method_record(target))
        }
    }

    fn check_lookup_access(&self, lookup: ObjRef, record: &MemberRecord) -> Result<(), RuntimeError> {
        let wk = self.wk();
        let heap = &self.inner.heap;
        let lookup_class = ObjRef::from_addr(heap.read::<u64>(lookup.addr() + wk.lookup_class) as usize);
        let modes = LookupModes::from_bits_truncate(heap.read::<u32>(lookup.addr() + wk.lookup_allowed_modes));
        let declaring = record
            .declaring()
            .and_then(|c| self.class_info(c).map(|info| (c, info)));
        let Some((declaring, declaring_info)) = declaring else {
            return Err(RuntimeError::IllegalArgument("member without declaring class".to_string()));
        };
        let same_package = lookup_class
            .and_then(|c| self.class_info(c))
            .is_some_and(|info| package_of(&info.name) == package_of(&declaring_info.name));
        let flags = record.flags();
        let allowed = if flags.is_public() {
            (declaring_info.modifiers.is_public() && modes.contains(LookupModes::PUBLIC))
                || (same_package && modes.contains(LookupModes::PACKAGE))
        } else if flags.contains(Modifiers::PROTECTED) {
            same_package && modes.intersects(LookupModes::PROTECTED | LookupModes::PACKAGE)
        } else if flags.is_private() {
            lookup_class == Some(declaring) && modes.contains(LookupModes::PRIVATE)
        } else {
            same_package && modes.contains(LookupModes::PACKAGE)
        };
        if allowed {
            Ok(())
        } else {
            Err(RuntimeError::IllegalArgument(format!(
                "Unable to access member {}",
                self.qualified(Some(declaring), record.name_idx())
            )))
        }
    }

    fn new_handle(&self, kind: i32, descriptor: usize) -> Result<ObjRef, RuntimeError> {
        let wk = self.wk();
        let handle = self.alloc_object(wk.method_handle_impl)?;
        self.inner.heap.write::<i32>(handle.addr() + wk.handle_kind, kind);
        self.inner
            .heap
            .write::<u64>(handle.addr() + wk.handle_art_field_or_method, descriptor as u64);
        Ok(handle)
    }
}

impl ManagedRuntime for Vm {
    type Memory = VmMemory;

    fn sdk_int(&self) -> u32 {
        self.sdk()
    }

    fn raw_memory(&self) -> Result<VmMemory, RuntimeError> {
        if self.inner.options.allow_raw_memory {
            Ok(VmMemory::new(self.clone()))
        } else {
            Err(RuntimeError::Thrown {
                class: "java.lang.SecurityException".to_string(),
                message: "Unsafe".to_string(),
            })
        }
    }

    fn find_class(&self, name: &str) -> Result<ObjRef, RuntimeError> {
        self.inner
            .state
            .lock()
            .classes
            .get(name)
            .copied()
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))
    }

    fn load_fixture(&self, fixture: &FixtureClass) -> Result<ObjRef, RuntimeError> {
        let mut st = self.inner.state.lock();
        if let Some(class) = st.classes.get(fixture.name) {
            return Ok(*class);
        }
        let builder = ClassBuilder::from_fixture(fixture);
        let class = self.declare(&mut st, &builder)?;
        self.link(&mut st, class, &builder)?;
        debug!("loaded fixture {}", fixture.name);
        Ok(class)
    }

    fn class_name(&self, class: ObjRef) -> Result<String, RuntimeError> {
        self.class_info(class)
            .map(|info| info.name.clone())
            .ok_or_else(|| RuntimeError::IllegalArgument(format!("{:?} is not a class", class)))
    }

    fn superclass(&self, class: ObjRef) -> Option<ObjRef> {
        self.class_info(class).and_then(|info| info.superclass)
    }

    fn is_instance(&self, obj: ObjRef, class: ObjRef) -> bool {
        self.instance_of(obj, class)
    }

    fn declared_field(&self, class: ObjRef, name: &str) -> Result<ObjRef, RuntimeError> {
        for which in [MemberArray::StaticFields, MemberArray::InstanceFields] {
            for addr in self.member_records(class, which) {
                let record = self.field_record(addr);
                if self.hidden_from_reflection(record.flags) || self.name_at(record.name_idx) != name {
                    continue;
                }
                return self.new_field_object(&record);
            }
        }
        Err(RuntimeError::NoSuchField(format!("{}.{}", self.class_name(class)?, name)))
    }

    fn declared_fields(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError> {
        let mut fields = Vec::new();
        for which in [MemberArray::StaticFields, MemberArray::InstanceFields] {
            for addr in self.member_records(class, which) {
                let record = self.field_record(addr);
                if !self.hidden_from_reflection(record.flags) {
                    fields.push(self.new_field_object(&record)?);
                }
            }
        }
        Ok(fields)
    }

    fn declared_method(&self, class: ObjRef, name: &str, params: &[ObjRef]) -> Result<ObjRef, RuntimeError> {
        let found = self.find_method_record(class, |n, record| n == name && self.params_equal(record, params));
        match found.first() {
            Some(record) if !name.starts_with('<') => self.new_executable_object(record),
            _ => Err(RuntimeError::NoSuchMethod(format!("{}.{}", self.class_name(class)?, name))),
        }
    }

    fn declared_methods(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError> {
        self.find_method_record(class, |n, _| !n.starts_with('<'))
            .iter()
            .map(|record| self.new_executable_object(record))
            .collect()
    }

    fn declared_constructor(&self, class: ObjRef, params: &[ObjRef]) -> Result<ObjRef, RuntimeError> {
        let found = self.find_method_record(class, |n, record| n == "<init>" && self.params_equal(record, params));
        match found.first() {
            Some(record) => self.new_executable_object(record),
            None => Err(RuntimeError::NoSuchMethod(format!("{}.<init>", self.class_name(class)?))),
        }
    }

    fn declared_constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, RuntimeError> {
        self.find_method_record(class, |n, _| n == "<init>")
            .iter()
            .map(|record| self.new_executable_object(record))
            .collect()
    }

    fn set_accessible(&self, member: ObjRef, flag: bool) -> Result<(), RuntimeError> {
        let wk = self.wk();
        if !self.instance_of(member, wk.accessible_object) {
            return Err(RuntimeError::IllegalArgument(format!("{:?} is not accessible-object", member)));
        }
        self.inner.heap.write::<u8>(member.addr() + wk.override_flag, flag as u8);
        Ok(())
    }

    fn member_name(&self, member: ObjRef) -> Result<String, RuntimeError> {
        Ok(self.name_at(self.member_record(member)?.name_idx()))
    }

    fn member_kind(&self, member: ObjRef) -> Result<MemberKind, RuntimeError> {
        Ok(match self.member_record(member)? {
            MemberRecord::Field(_) => MemberKind::Field,
            MemberRecord::Executable(_, kind) => kind,
        })
    }

    fn member_modifiers(&self, member: ObjRef) -> Result<Modifiers, RuntimeError> {
        Ok(self.member_record(member)?.flags().java_visible())
    }

    fn declaring_class(&self, member: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.member_record(member)?
            .declaring()
            .ok_or_else(|| RuntimeError::IllegalArgument("member without declaring class".to_string()))
    }

    fn parameter_types(&self, executable: ObjRef) -> Result<Vec<ObjRef>, RuntimeError> {
        let (record, _) = self.executable_of(executable)?;
        Ok(self.proto_at(record.proto_idx)?.params)
    }

    fn field_type(&self, field: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.type_at(self.field_of(field)?.type_idx)
    }

    fn field_get(&self, field: ObjRef, instance: Option<ObjRef>) -> Result<Value, RuntimeError> {
        let record = self.field_of(field)?;
        self.check_member_access(field, &MemberRecord::Field(record))?;
        let addr = self.field_address(&record, instance)?;
        Ok(self.load(addr, self.kind_of_type(self.type_at(record.type_idx)?)))
    }

    fn field_set(&self, field: ObjRef, instance: Option<ObjRef>, value: Value) -> Result<(), RuntimeError> {
        let record = self.field_of(field)?;
        self.check_member_access(field, &MemberRecord::Field(record))?;
        if record.flags.contains(Modifiers::FINAL) && (record.flags.is_static() || !self.is_overridden(field)) {
            return Err(RuntimeError::IllegalAccess(format!(
                "final field {} cannot be set",
                self.qualified(record.declaring, record.name_idx)
            )));
        }
        let addr = self.field_address(&record, instance)?;
        let declared = self.type_at(record.type_idx)?;
        let value = self.coerce(self.kind_of_type(declared), Some(declared), value)?;
        self.store(addr, value);
        Ok(())
    }

    fn method_invoke(&self, method: ObjRef, receiver: Option<ObjRef>, args: &[Value]) -> Result<Value, RuntimeError> {
        let (record, kind) = self.executable_of(method)?;
        if kind != MemberKind::Method {
            return Err(RuntimeError::IllegalArgument("constructors are invoked with new_instance".to_string()));
        }
        self.check_member_access(method, &MemberRecord::Executable(record, kind))?;
        let record = match receiver {
            Some(obj) if !record.flags.is_static() => self.dispatch(record, obj)?,
            _ => record,
        };
        self.invoke_record(&record, receiver, args)
    }

    fn constructor_new_instance(&self, constructor: ObjRef, args: &[Value]) -> Result<ObjRef, RuntimeError> {
        let (record, kind) = self.executable_of(constructor)?;
        if kind != MemberKind::Constructor {
            return Err(RuntimeError::IllegalArgument("not a constructor".to_string()));
        }
        self.check_member_access(constructor, &MemberRecord::Executable(record, kind))?;
        let class = record
            .declaring
            .ok_or_else(|| RuntimeError::IllegalArgument("constructor without declaring class".to_string()))?;
        let obj = self.alloc_object(class)?;
        self.invoke_record(&record, Some(obj), args)?;
        Ok(obj)
    }

    fn unreflect_getter(&self, field: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.require_method_handles("MethodHandles.Lookup.unreflectGetter")?;
        let record = self.field_of(field)?;
        self.check_member_access(field, &MemberRecord::Field(record))?;
        let kind = if record.flags.is_static() {
            handle_kind::SGET
        } else {
            handle_kind::IGET
        };
        self.new_handle(kind, record.addr)
    }

    fn unreflect(&self, method: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.require_method_handles("MethodHandles.Lookup.unreflect")?;
        let (record, kind) = self.executable_of(method)?;
        if kind != MemberKind::Method {
            return Err(RuntimeError::IllegalArgument("use unreflectConstructor for constructors".to_string()));
        }
        self.check_member_access(method, &MemberRecord::Executable(record, kind))?;
        let handle_kind = if record.flags.is_static() {
            handle_kind::INVOKE_STATIC
        } else if record.flags.is_private() {
            handle_kind::INVOKE_DIRECT
        } else {
            handle_kind::INVOKE_VIRTUAL
        };
        self.new_handle(handle_kind, record.addr)
    }

    fn reveal_direct(&self, lookup: ObjRef, handle: ObjRef) -> Result<ObjRef, RuntimeError> {
        self.require_method_handles("MethodHandles.Lookup.revealDirect")?;
        let wk = self.wk();
        let heap = &self.inner.heap;
        if !self.instance_of(handle, wk.method_handle_impl) {
            return Err(RuntimeError::IllegalArgument("not a direct method handle".to_string()));
        }
        if !self.instance_of(lookup, wk.lookup) {
            return Err(RuntimeError::IllegalArgument(format!("{:?} is not a lookup", lookup)));
        }
        let cached = ObjRef::from_addr(heap.read::<u64>(handle.addr() + wk.handle_info_ref) as usize);
        let info = match cached {
            Some(info) => info,
            None => {
                let kind = heap.read::<i32>(handle.addr() + wk.handle_kind);
                let target = heap.read::<u64>(handle.addr() + wk.handle_art_field_or_method) as usize;
                let member = self.member_for_descriptor(kind, target)?;
                let info = self.handle_info_for(handle, target, member)?;
                heap.write::<u64>(handle.addr() + wk.handle_info_ref, info.addr() as u64);
                info
            }
        };
        let member = ObjRef::from_addr(heap.read::<u64>(info.addr() + wk.info_member) as usize)
            .ok_or_else(|| RuntimeError::NullPointer("handle info without member".to_string()))?;
        self.check_lookup_access(lookup, &self.member_record(member)?)?;
        Ok(info)
    }

    fn handle_info_name(&self, info: ObjRef) -> Result<String, RuntimeError> {
        let wk = self.wk();
        if !self.instance_of(info, wk.handle_info) {
            return Err(RuntimeError::IllegalArgument(format!("{:?} is not a handle info", info)));
        }
        let member = ObjRef::from_addr(self.inner.heap.read::<u64>(info.addr() + wk.info_member) as usize)
            .ok_or_else(|| RuntimeError::NullPointer("handle info without member".to_string()))?;
        self.member_name(member)
    }

    fn private_lookup_in(&self, class: ObjRef) -> Result<ObjRef, RuntimeError> {
        if !self.version().has_private_lookup_in() {
            return Err(RuntimeError::Unsupported {
                sdk: self.sdk(),
                what: "MethodHandles.privateLookupIn".to_string(),
            });
        }
        if !self.is_class(class) {
            return Err(RuntimeError::IllegalArgument(format!("{:?} is not a class", class)));
        }
        let wk = self.wk();
        let lookup = self.alloc_object(wk.lookup)?;
        self.inner.heap.write::<u64>(lookup.addr() + wk.lookup_class, class.addr() as u64);
        self.inner
            .heap
            .write::<u32>(lookup.addr() + wk.lookup_allowed_modes, LookupModes::UNRESTRICTED.bits());
        Ok(lookup)
    }

    fn new_string(&self, value: &str) -> Result<ObjRef, RuntimeError> {
        let mut st = self.inner.state.lock();
        self.new_string_locked(&mut st, value)
    }

    fn string_value(&self, obj: ObjRef) -> Option<String> {
        self.read_string(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RawMemory;

    fn demo(vm: &Vm) -> ObjRef {
        vm.define_class(
            ClassBuilder::new("demo.Widget")
                .field("count", "I", Modifiers::PRIVATE | Modifiers::STATIC)
                .field("label", "Ljava/lang/String;", Modifiers::PUBLIC)
                .field("secret", "J", Modifiers::PRIVATE | Modifiers::HIDDEN)
                .field("LIMIT", "I", Modifiers::PUBLIC | Modifiers::STATIC | Modifiers::FINAL)
                .initial("count", Value::Int(3))
                .initial("LIMIT", Value::Int(10))
                .method("twice", &["I"], "I", Modifiers::PUBLIC | Modifiers::STATIC, |_, _, args| {
                    Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))
                }),
        )
        .expect("define demo.Widget")
    }

    fn record_named(vm: &Vm, class: ObjRef, name: &str) -> usize {
        vm.member_records(class, MemberArray::StaticFields)
            .into_iter()
            .find(|addr| vm.name_at(vm.field_record(*addr).name_idx) == name)
            .expect("static field record")
    }

    #[test]
    fn test_private_field_needs_set_accessible() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let count = vm.declared_field(widget, "count").expect("field");
        assert!(matches!(vm.field_get(count, None), Err(RuntimeError::IllegalAccess(_))));
        vm.set_accessible(count, true).expect("accessible");
        assert_eq!(vm.field_get(count, None).expect("get"), Value::Int(3));
        vm.field_set(count, None, Value::Int(4)).expect("set");
        assert_eq!(vm.read_static(widget, "count").expect("read"), Value::Int(4));
    }

    #[test]
    fn test_static_final_is_read_only() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let limit = vm.declared_field(widget, "LIMIT").expect("field");
        assert_eq!(vm.field_get(limit, None).expect("get"), Value::Int(10));
        vm.set_accessible(limit, true).expect("accessible");
        assert!(matches!(vm.field_set(limit, None, Value::Int(1)), Err(RuntimeError::IllegalAccess(_))));
    }

    #[test]
    fn test_hidden_members_by_release() {
        let before = Vm::new(27).expect("vm");
        let widget = demo(&before);
        assert!(before.declared_field(widget, "secret").is_ok());

        let after = Vm::new(28).expect("vm");
        let widget = demo(&after);
        assert!(matches!(after.declared_field(widget, "secret"), Err(RuntimeError::NoSuchField(_))));
        let names: Vec<String> = after
            .declared_fields(widget)
            .expect("fields")
            .into_iter()
            .map(|f| after.member_name(f).expect("name"))
            .collect();
        assert!(!names.contains(&"secret".to_string()));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_invoke_checks_arguments() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let int = vm.find_class("int").expect("int");
        let twice = vm.declared_method(widget, "twice", &[int]).expect("method");
        assert_eq!(vm.method_invoke(twice, None, &[Value::Int(21)]).expect("invoke"), Value::Int(42));
        assert!(matches!(
            vm.method_invoke(twice, None, &[Value::Long(1)]),
            Err(RuntimeError::IllegalArgument(_))
        ));
        assert!(matches!(vm.method_invoke(twice, None, &[]), Err(RuntimeError::IllegalArgument(_))));
    }

    #[test]
    fn test_handles_need_oreo() {
        let vm = Vm::new(25).expect("vm");
        let widget = demo(&vm);
        let label = vm.declared_field(widget, "label").expect("field");
        assert!(matches!(vm.unreflect_getter(label), Err(RuntimeError::Unsupported { sdk: 25, .. })));
    }

    #[test]
    fn test_reveal_direct_rebuilds_info_from_descriptor() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let label = vm.declared_field(widget, "label").expect("field");
        let handle = vm.unreflect_getter(label).expect("handle");
        let memory = vm.raw_memory().expect("memory");
        let wk = *vm.wk();

        let lookup = memory.allocate_instance(wk.lookup).expect("lookup");
        memory.put_object(lookup, wk.lookup_class, Some(widget));
        memory.put_int(lookup, wk.lookup_allowed_modes, LookupModes::UNRESTRICTED.bits() as i32);

        let count_record = record_named(&vm, widget, "count");
        memory.put_long(handle, wk.handle_art_field_or_method, count_record as i64);
        let info = vm.reveal_direct(lookup, handle).expect("reveal");
        assert_eq!(vm.handle_info_name(info).expect("name"), "count");
    }

    #[test]
    fn test_reveal_direct_enforces_lookup_modes() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let label = vm.declared_field(widget, "label").expect("field");
        let handle = vm.unreflect_getter(label).expect("handle");
        let memory = vm.raw_memory().expect("memory");
        let wk = *vm.wk();
        let object = vm.find_class("java.lang.Object").expect("Object");

        let lookup = memory.allocate_instance(wk.lookup).expect("lookup");
        memory.put_object(lookup, wk.lookup_class, Some(object));
        memory.put_int(lookup, wk.lookup_allowed_modes, LookupModes::PUBLIC.bits() as i32);
        assert!(vm.reveal_direct(lookup, handle).is_ok());

        let count_record = record_named(&vm, widget, "count");
        memory.put_long(handle, wk.handle_art_field_or_method, count_record as i64);
        memory.put_object(handle, wk.handle_info_ref, None);
        assert!(matches!(vm.reveal_direct(lookup, handle), Err(RuntimeError::IllegalArgument(_))));
    }

    #[test]
    fn test_reveal_direct_rejects_garbage_descriptor() {
        let vm = Vm::new(30).expect("vm");
        let widget = demo(&vm);
        let lookup = vm.private_lookup_in(widget);
        assert!(matches!(lookup, Err(RuntimeError::Unsupported { .. })));

        let label = vm.declared_field(widget, "label").expect("field");
        let handle = vm.unreflect_getter(label).expect("handle");
        let memory = vm.raw_memory().expect("memory");
        let wk = *vm.wk();
        let lookup = memory.allocate_instance(wk.lookup).expect("lookup");
        memory.put_object(lookup, wk.lookup_class, Some(widget));
        memory.put_int(lookup, wk.lookup_allowed_modes, 0xf);
        for bogus in [0x10usize, handle.addr(), usize::MAX - 7] {
            memory.put_long(handle, wk.handle_art_field_or_method, bogus as i64);
            assert!(vm.reveal_direct(lookup, handle).is_err());
        }
    }

    #[test]
    fn test_strings() {
        let vm = Vm::new(33).expect("vm");
        let s = vm.new_string("hello").expect("string");
        assert_eq!(vm.string_value(s).as_deref(), Some("hello"));
        let object = vm.find_class("java.lang.Object").expect("Object");
        assert_eq!(vm.string_value(object), None);
    }

    #[test]
    fn test_virtual_dispatch() {
        let vm = Vm::new(33).expect("vm");
        let base = vm
            .define_class(
                ClassBuilder::new("demo.Base").method("name", &[], "Ljava/lang/String;", Modifiers::PUBLIC, |vm, _, _| {
                    Ok(Value::Object(vm.new_string("base")?))
                }),
            )
            .expect("base");
        let derived = vm
            .define_class(
                ClassBuilder::new("demo.Derived")
                    .extends("demo.Base")
                    .method("name", &[], "Ljava/lang/String;", Modifiers::PUBLIC, |vm, _, _| {
                        Ok(Value::Object(vm.new_string("derived")?))
                    }),
            )
            .expect("derived");
        let method = vm.declared_method(base, "name", &[]).expect("method");
        let ctor = vm.declared_constructor(derived, &[]).expect("ctor");
        let obj = vm.constructor_new_instance(ctor, &[]).expect("instance");
        let result = vm.method_invoke(method, Some(obj), &[]).expect("invoke");
        let result = result.as_object().and_then(|s| vm.string_value(s));
        assert_eq!(result.as_deref(), Some("derived"));
    }
}
