//! Layout calibration
//!
//! Measures [`ArtOffsets`] on a live runtime. Reflection-object offsets come
//! from shadow classes whose field layout matches the platform classes; the
//! member-array geometry comes from the addresses of `NeverCall`'s adjacent
//! members.

use log::{debug, info};

use crate::backend::{ManagedRuntime, ObjRef, RawMemory, RuntimeError};
use crate::reflect::ReflectError;

use super::fixtures::{
    FixtureClass, CLASS_MIRROR, EXECUTABLE, HANDLE_INFO, LOOKUP, METHOD_HANDLE, METHOD_HANDLE_IMPL,
    NEVER_CALL, SHADOWS,
};
use super::offsets::ArtOffsets;

fn unavailable(step: &'static str) -> impl Fn(RuntimeError) -> ReflectError {
    move |e| ReflectError::CalibrationUnavailable(format!("{}: {}", step, e))
}

/// An offset whose measured value disagrees with a layout table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetMismatch {
    pub name: &'static str,
    pub expected: usize,
    pub measured: usize,
}

pub struct Calibrator<'a, R: ManagedRuntime> {
    runtime: &'a R,
    memory: &'a R::Memory,
}

impl<'a, R: ManagedRuntime> Calibrator<'a, R> {
    pub fn new(runtime: &'a R, memory: &'a R::Memory) -> Self {
        Calibrator { runtime, memory }
    }

    fn shadow_offset(&self, shadow: &FixtureClass, field: &str) -> Result<usize, ReflectError> {
        let class = self.runtime.load_fixture(shadow).map_err(unavailable("load shadow"))?;
        let field = self
            .runtime
            .declared_field(class, field)
            .map_err(unavailable("shadow field"))?;
        self.memory
            .object_field_offset(field)
            .map_err(unavailable("objectFieldOffset"))
    }

    fn static_field_handle(&self, class: ObjRef, name: &str) -> Result<ObjRef, ReflectError> {
        let field = self
            .runtime
            .declared_field(class, name)
            .map_err(unavailable("fixture field"))?;
        self.runtime
            .set_accessible(field, true)
            .map_err(unavailable("setAccessible"))?;
        self.runtime
            .unreflect_getter(field)
            .map_err(unavailable("unreflectGetter"))
    }

    fn art_method_of(&self, executable: ObjRef, offsets: &ArtOffsets) -> usize {
        self.memory.get_long(executable, offsets.executable_art_method) as usize
    }

    /// Measure every offset, then check the result is usable.
    pub fn calibrate(&self) -> Result<ArtOffsets, ReflectError> {
        for shadow in SHADOWS {
            self.runtime.load_fixture(shadow).map_err(unavailable("load shadow"))?;
        }
        let mut offsets = ArtOffsets {
            version_name: format!("measured on API {}", self.runtime.sdk_int()),
            handle_art_field_or_method: self.shadow_offset(&METHOD_HANDLE, "artFieldOrMethod")?,
            handle_info: self.shadow_offset(&METHOD_HANDLE_IMPL, "info")?,
            info_member: self.shadow_offset(&HANDLE_INFO, "member")?,
            lookup_class: self.shadow_offset(&LOOKUP, "lookupClass")?,
            lookup_allowed_modes: self.shadow_offset(&LOOKUP, "allowedModes")?,
            executable_art_method: self.shadow_offset(&EXECUTABLE, "artMethod")?,
            class_ifields: self.shadow_offset(&CLASS_MIRROR, "iFields")?,
            class_sfields: self.shadow_offset(&CLASS_MIRROR, "sFields")?,
            class_methods: self.shadow_offset(&CLASS_MIRROR, "methods")?,
            art_field_size: 0,
            art_method_size: 0,
            art_field_bias: 0,
            art_method_bias: 0,
        };
        debug!("shadow offsets measured: {:?}", &offsets.entries()[..9]);

        let never_call = self.runtime.load_fixture(&NEVER_CALL).map_err(unavailable("load NeverCall"))?;

        let a = self.static_field_handle(never_call, "a")?;
        let b = self.static_field_handle(never_call, "b")?;
        let field_a = self.memory.get_long(a, offsets.handle_art_field_or_method) as usize;
        let field_b = self.memory.get_long(b, offsets.handle_art_field_or_method) as usize;
        let sfields = self.memory.get_long(never_call, offsets.class_sfields) as usize;
        if sfields == 0 {
            return Err(ReflectError::CalibrationUnavailable("NeverCall has no static field array".to_string()));
        }
        offsets.art_field_size = field_b
            .checked_sub(field_a)
            .ok_or_else(|| ReflectError::CalibrationUnavailable("field a is not before field b".to_string()))?;
        offsets.art_field_bias = field_a
            .checked_sub(sfields)
            .ok_or_else(|| ReflectError::CalibrationUnavailable("field a is before its array".to_string()))?;

        let s = self
            .runtime
            .declared_method(never_call, "s", &[])
            .map_err(unavailable("fixture method s"))?;
        let t = self
            .runtime
            .declared_method(never_call, "t", &[])
            .map_err(unavailable("fixture method t"))?;
        let init = self
            .runtime
            .declared_constructor(never_call, &[])
            .map_err(unavailable("fixture constructor"))?;
        let methods = self.memory.get_long(never_call, offsets.class_methods) as usize;
        if methods == 0 {
            return Err(ReflectError::CalibrationUnavailable("NeverCall has no method array".to_string()));
        }
        offsets.art_method_size = self
            .art_method_of(t, &offsets)
            .checked_sub(self.art_method_of(s, &offsets))
            .ok_or_else(|| ReflectError::CalibrationUnavailable("method s is not before method t".to_string()))?;
        offsets.art_method_bias = self
            .art_method_of(init, &offsets)
            .checked_sub(methods)
            .ok_or_else(|| ReflectError::CalibrationUnavailable("constructor is before its array".to_string()))?;

        offsets.validate().map_err(ReflectError::CalibrationUnavailable)?;
        info!(
            "calibrated API {}: field stride {:#x} bias {:#x}, method stride {:#x} bias {:#x}",
            self.runtime.sdk_int(),
            offsets.art_field_size,
            offsets.art_field_bias,
            offsets.art_method_size,
            offsets.art_method_bias
        );
        Ok(offsets)
    }

    /// Offsets where a measurement disagrees with `table`.
    pub fn verify(&self, table: &ArtOffsets) -> Result<Vec<OffsetMismatch>, ReflectError> {
        let measured = self.calibrate()?;
        Ok(table
            .entries()
            .iter()
            .zip(measured.entries().iter())
            .filter(|(expected, measured)| expected.1 != measured.1)
            .map(|(expected, measured)| OffsetMismatch {
                name: expected.0,
                expected: expected.1,
                measured: measured.1,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{Vm, VmOptions};

    #[test]
    fn test_matches_table_before_snow_cone() {
        let vm = Vm::new(30).expect("vm");
        let memory = vm.raw_memory().expect("memory");
        let calibrator = Calibrator::new(&vm, &memory);
        let measured = calibrator.calibrate().expect("calibrate");
        assert_eq!(measured.art_method_size, 0x20);
        let table = ArtOffsets::for_sdk(30).expect("table");
        assert_eq!(calibrator.verify(&table).expect("verify"), Vec::new());
    }

    #[test]
    fn test_matches_table_from_snow_cone() {
        let vm = Vm::new(31).expect("vm");
        let memory = vm.raw_memory().expect("memory");
        let calibrator = Calibrator::new(&vm, &memory);
        let table = ArtOffsets::for_sdk(31).expect("table");
        assert!(calibrator.verify(&table).expect("verify").is_empty());
    }

    #[test]
    fn test_reports_mismatch() {
        let vm = Vm::new(33).expect("vm");
        let memory = vm.raw_memory().expect("memory");
        let stale = ArtOffsets::oreo_to_r();
        let mismatches = Calibrator::new(&vm, &memory).verify(&stale).expect("verify");
        assert_eq!(
            mismatches,
            vec![OffsetMismatch {
                name: "art_method_size",
                expected: 0x20,
                measured: 0x18
            }]
        );
    }

    #[test]
    fn test_fails_without_method_handles() {
        let vm = Vm::with_options(VmOptions::default().with_sdk(24)).expect("vm");
        let memory = vm.raw_memory().expect("memory");
        let result = Calibrator::new(&vm, &memory).calibrate();
        assert!(matches!(result, Err(ReflectError::CalibrationUnavailable(_))));
    }
}
