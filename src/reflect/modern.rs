//! Handle retargeting over the calibrated metadata layout.

use std::sync::{Arc, OnceLock};

use log::{info, warn};

use crate::art::{visitor, ArtOffsets, Calibrator, Enumerator, MemberVisitor, MetadataArray, ScratchPool, Visit};
use crate::backend::{ManagedRuntime, MemberKind, ObjRef, RawMemory, StrategyKind};
use crate::config::{LayoutPolicy, ReflectConfig};
use crate::memory::MemoryHandle;

use super::{parameters_match, ReflectError, ReflectStrategy};

pub struct ModernStrategy<R: ManagedRuntime> {
    runtime: Arc<R>,
    config: ReflectConfig,
    memory: MemoryHandle<R::Memory>,
    offsets: OnceLock<Result<ArtOffsets, ReflectError>>,
    scratch: ScratchPool,
}

impl<R: ManagedRuntime> ModernStrategy<R> {
    pub fn new(runtime: Arc<R>, config: ReflectConfig) -> Self {
        ModernStrategy {
            runtime,
            config,
            memory: MemoryHandle::new(),
            offsets: OnceLock::new(),
            scratch: ScratchPool::new(),
        }
    }

    /// The layout in use; resolved on first call, failures included.
    pub fn offsets(&self) -> Result<&ArtOffsets, ReflectError> {
        self.offsets
            .get_or_init(|| self.resolve_offsets())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn resolve_offsets(&self) -> Result<ArtOffsets, ReflectError> {
        let memory = self.memory.get(&*self.runtime)?;
        let sdk = self.runtime.sdk_int();
        if self.config.layout_policy == LayoutPolicy::PreferTable {
            if let Some(table) = ArtOffsets::for_sdk(sdk) {
                info!("using the {} layout table on API {}", table.version_name, sdk);
                return Ok(table);
            }
        }
        Calibrator::new(&*self.runtime, memory).calibrate().map_err(|e| {
            warn!("calibration failed on API {}: {}", sdk, e);
            e
        })
    }

    fn walk<V: MemberVisitor>(&self, class: ObjRef, array: MetadataArray, visitor: &mut V) -> Result<usize, ReflectError> {
        let offsets = self.offsets()?;
        let memory = self.memory.get(&*self.runtime)?;
        Enumerator::new(
            &*self.runtime,
            memory,
            offsets,
            &self.scratch,
            self.config.private_lookup_sdk,
        )
        .enumerate(class, array, visitor)
    }

    fn is_static(&self, member: ObjRef) -> bool {
        self.runtime
            .member_modifiers(member)
            .is_ok_and(|flags| flags.is_static())
    }

    fn takes(&self, executable: ObjRef, params: Option<&[ObjRef]>) -> bool {
        self.runtime
            .parameter_types(executable)
            .is_ok_and(|declared| parameters_match(&declared, params))
    }

    fn is_constructor(&self, member: ObjRef) -> bool {
        self.runtime.member_kind(member) == Ok(MemberKind::Constructor)
    }

    fn find_method(
        &self,
        class: ObjRef,
        name: &str,
        accept: impl Fn(ObjRef) -> bool,
    ) -> Result<ObjRef, ReflectError> {
        let mut found = None;
        self.walk(
            class,
            MetadataArray::Methods,
            &mut visitor(
                |n| n == name,
                |m| {
                    if accept(m) {
                        found = Some(m);
                        Visit::Done
                    } else {
                        Visit::Continue
                    }
                },
            ),
        )?;
        found.ok_or_else(|| ReflectError::MemberNotFound(name.to_string()))
    }
}

impl<R: ManagedRuntime> ReflectStrategy<R> for ModernStrategy<R> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Modern
    }

    fn constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        let mut constructors = Vec::new();
        self.walk(
            class,
            MetadataArray::Methods,
            &mut visitor(
                |n| n == "<init>",
                |m| {
                    if self.is_constructor(m) && !self.is_static(m) {
                        constructors.push(m);
                    }
                    Visit::Continue
                },
            ),
        )?;
        Ok(constructors)
    }

    fn constructor(&self, class: ObjRef, params: Option<&[ObjRef]>) -> Result<ObjRef, ReflectError> {
        self.find_method(class, "<init>", |m| self.is_constructor(m) && self.takes(m, params))
    }

    fn methods(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError> {
        let mut methods = Vec::new();
        self.walk(
            class,
            MetadataArray::Methods,
            &mut visitor(
                |n| !n.starts_with('<'),
                |m| {
                    if self.is_static(m) == is_static {
                        methods.push(m);
                    }
                    Visit::Continue
                },
            ),
        )?;
        Ok(methods)
    }

    fn method(
        &self,
        class: ObjRef,
        name: &str,
        params: Option<&[ObjRef]>,
        is_static: bool,
    ) -> Result<ObjRef, ReflectError> {
        self.find_method(class, name, |m| {
            !self.is_constructor(m) && self.is_static(m) == is_static && self.takes(m, params)
        })
    }

    fn fields(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError> {
        let array = if is_static {
            MetadataArray::StaticFields
        } else {
            MetadataArray::InstanceFields
        };
        let mut fields = Vec::new();
        self.walk(
            class,
            array,
            &mut visitor(
                |_| true,
                |f| {
                    fields.push(f);
                    Visit::Continue
                },
            ),
        )?;
        Ok(fields)
    }

    fn field(&self, class: ObjRef, name: &str, is_static: bool) -> Result<ObjRef, ReflectError> {
        let array = if is_static {
            MetadataArray::StaticFields
        } else {
            MetadataArray::InstanceFields
        };
        let mut found = None;
        self.walk(
            class,
            array,
            &mut visitor(
                |n| n == name,
                |f| {
                    found = Some(f);
                    Visit::Done
                },
            ),
        )?;
        found.ok_or_else(|| ReflectError::MemberNotFound(name.to_string()))
    }

    fn allocate_instance(&self, class: ObjRef) -> Result<ObjRef, ReflectError> {
        let memory = self.memory.get(&*self.runtime)?;
        memory
            .allocate_instance(class)
            .map_err(ReflectError::InvocationFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Vm, VmOptions};

    #[test]
    fn test_table_hit_skips_calibration() {
        let vm = Vm::new(31).expect("vm");
        let strategy = ModernStrategy::new(Arc::new(vm), ReflectConfig::default());
        assert_eq!(strategy.offsets().expect("offsets").version_name, "S-U");
    }

    #[test]
    fn test_always_calibrate() {
        let vm = Vm::new(31).expect("vm");
        let config = ReflectConfig::default().with_layout_policy(LayoutPolicy::AlwaysCalibrate);
        let strategy = ModernStrategy::new(Arc::new(vm), config);
        let offsets = strategy.offsets().expect("offsets");
        assert!(offsets.version_name.starts_with("measured"));
        assert_eq!(offsets.art_method_size, 0x18);
    }

    #[test]
    fn test_unknown_release_calibrates() {
        let vm = Vm::new(35).expect("vm");
        let strategy = ModernStrategy::new(Arc::new(vm), ReflectConfig::default());
        assert!(strategy.offsets().expect("offsets").version_name.starts_with("measured"));
    }

    #[test]
    fn test_failure_is_remembered() {
        let vm = Vm::with_options(VmOptions::default().with_sdk(30).with_raw_memory(false)).expect("vm");
        let strategy = ModernStrategy::new(Arc::new(vm), ReflectConfig::default());
        let first = strategy.offsets().cloned();
        assert!(matches!(first, Err(ReflectError::CalibrationUnavailable(_))));
        assert_eq!(strategy.offsets().cloned(), first);
    }
}
