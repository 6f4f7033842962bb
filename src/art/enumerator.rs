//! Metadata enumeration
//!
//! Walks a class's `ArtField` / `ArtMethod` array by retargeting a scratch
//! handle to each record in turn. Names are checked first; only records the
//! visitor wants are materialized as reflective members.

use std::collections::HashMap;

use log::debug;
use parking_lot::Mutex;

use crate::backend::{ManagedRuntime, ObjRef, RawMemory};
use crate::reflect::ReflectError;

use super::fixtures::NEVER_CALL;
use super::offsets::ArtOffsets;
use super::retarget::Retargeter;

/// One of the member arrays hanging off a class mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataArray {
    StaticFields,
    InstanceFields,
    Methods,
}

impl MetadataArray {
    fn geometry(self, offsets: &ArtOffsets) -> (usize, usize, usize) {
        match self {
            MetadataArray::StaticFields => (offsets.class_sfields, offsets.art_field_bias, offsets.art_field_size),
            MetadataArray::InstanceFields => (offsets.class_ifields, offsets.art_field_bias, offsets.art_field_size),
            MetadataArray::Methods => (offsets.class_methods, offsets.art_method_bias, offsets.art_method_size),
        }
    }
}

/// Whether a walk should go on after a visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    Continue,
    Done,
}

pub trait MemberVisitor {
    /// Cheap filter on the record's name.
    fn matches(&mut self, name: &str) -> bool;
    /// Called with the materialized member for every match.
    fn visit(&mut self, member: ObjRef) -> Visit;
}

/// A visitor made of two closures.
pub struct FnVisitor<M, V> {
    matches: M,
    visit: V,
}

pub fn visitor<M, V>(matches: M, visit: V) -> FnVisitor<M, V>
where
    M: FnMut(&str) -> bool,
    V: FnMut(ObjRef) -> Visit,
{
    FnVisitor { matches, visit }
}

impl<M, V> MemberVisitor for FnVisitor<M, V>
where
    M: FnMut(&str) -> bool,
    V: FnMut(ObjRef) -> Visit,
{
    fn matches(&mut self, name: &str) -> bool {
        (self.matches)(name)
    }

    fn visit(&mut self, member: ObjRef) -> Visit {
        (self.visit)(member)
    }
}

/// Scratch handles, one per array kind, and the unrestricted lookups built
/// for each walked class.
///
/// A handle is retargeted in place, so each lock is held for a whole walk.
#[derive(Default)]
pub struct ScratchPool {
    static_field: Mutex<Option<ObjRef>>,
    instance_field: Mutex<Option<ObjRef>>,
    method: Mutex<Option<ObjRef>>,
    lookups: Mutex<HashMap<ObjRef, ObjRef>>,
}

impl ScratchPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, array: MetadataArray) -> &Mutex<Option<ObjRef>> {
        match array {
            MetadataArray::StaticFields => &self.static_field,
            MetadataArray::InstanceFields => &self.instance_field,
            MetadataArray::Methods => &self.method,
        }
    }

    fn lookup<F>(&self, class: ObjRef, create: F) -> Result<ObjRef, ReflectError>
    where
        F: FnOnce() -> Result<ObjRef, ReflectError>,
    {
        let mut lookups = self.lookups.lock();
        if let Some(lookup) = lookups.get(&class) {
            return Ok(*lookup);
        }
        let lookup = create()?;
        lookups.insert(class, lookup);
        Ok(lookup)
    }
}

fn scratch_failure(e: impl std::fmt::Display) -> ReflectError {
    ReflectError::CalibrationUnavailable(format!("scratch handle: {}", e))
}

pub struct Enumerator<'a, R: ManagedRuntime> {
    runtime: &'a R,
    memory: &'a R::Memory,
    offsets: &'a ArtOffsets,
    retargeter: Retargeter<'a, R>,
    scratch: &'a ScratchPool,
}

impl<'a, R: ManagedRuntime> Enumerator<'a, R> {
    pub fn new(
        runtime: &'a R,
        memory: &'a R::Memory,
        offsets: &'a ArtOffsets,
        scratch: &'a ScratchPool,
        private_lookup_sdk: u32,
    ) -> Self {
        Enumerator {
            runtime,
            memory,
            offsets,
            retargeter: Retargeter::new(runtime, memory, offsets, private_lookup_sdk),
            scratch,
        }
    }

    /// Unreflect a permitted `NeverCall` member of the right kind.
    fn create_scratch(&self, array: MetadataArray) -> Result<ObjRef, ReflectError> {
        let never_call = self.runtime.load_fixture(&NEVER_CALL).map_err(scratch_failure)?;
        let handle = match array {
            MetadataArray::StaticFields | MetadataArray::InstanceFields => {
                let name = if array == MetadataArray::StaticFields { "a" } else { "i" };
                let field = self.runtime.declared_field(never_call, name).map_err(scratch_failure)?;
                self.runtime.set_accessible(field, true).map_err(scratch_failure)?;
                self.runtime.unreflect_getter(field)
            }
            MetadataArray::Methods => {
                let method = self
                    .runtime
                    .declared_method(never_call, "s", &[])
                    .map_err(scratch_failure)?;
                self.runtime.unreflect(method)
            }
        };
        handle.map_err(scratch_failure)
    }

    /// Visit the records of one array of `class` in physical order.
    ///
    /// Returns the number of visits. A missing or empty array yields zero.
    pub fn enumerate<V: MemberVisitor>(
        &self,
        class: ObjRef,
        array: MetadataArray,
        visitor: &mut V,
    ) -> Result<usize, ReflectError> {
        let (array_offset, bias, stride) = array.geometry(self.offsets);
        let base = self.memory.get_long(class, array_offset) as usize;
        if base == 0 {
            return Ok(0);
        }
        let count = self.memory.read_u32(base) as usize;
        if count == 0 {
            return Ok(0);
        }

        let mut slot = self.scratch.slot(array).lock();
        let handle = match *slot {
            Some(handle) => handle,
            None => {
                let handle = self.create_scratch(array)?;
                debug!("created {:?} scratch handle {:?}", array, handle);
                *slot = Some(handle);
                handle
            }
        };
        let lookup = self
            .scratch
            .lookup(class, || self.retargeter.unrestricted_lookup(class))?;

        let mut visits = 0;
        for index in 0..count {
            let descriptor = base + bias + index * stride;
            let info = self.retargeter.retarget(handle, descriptor, lookup)?;
            let denied = |source| ReflectError::RetargetDenied { descriptor, source };
            let name = self.runtime.handle_info_name(info).map_err(denied)?;
            if !visitor.matches(&name) {
                continue;
            }
            let member = self.retargeter.member(info).ok_or_else(|| {
                ReflectError::MemberNotFound(format!("record {} of {:?} has no member", index, array))
            })?;
            self.runtime.set_accessible(member, true).map_err(denied)?;
            if self.runtime.declaring_class(member).map_err(denied)? != class {
                return Err(ReflectError::MemberNotFound(format!(
                    "record {} of {:?} does not belong to {:?}",
                    index, array, class
                )));
            }
            visits += 1;
            if visitor.visit(member) == Visit::Done {
                break;
            }
        }
        Ok(visits)
    }
}
