//! Official reflection with `setAccessible(true)`, for runtimes whose
//! metadata layout is not handled.

use std::sync::Arc;

use crate::backend::{ManagedRuntime, ObjRef, RawMemory, StrategyKind};
use crate::memory::MemoryHandle;

use super::{parameters_match, ReflectError, ReflectStrategy};

pub struct LegacyStrategy<R: ManagedRuntime> {
    runtime: Arc<R>,
    memory: MemoryHandle<R::Memory>,
}

impl<R: ManagedRuntime> LegacyStrategy<R> {
    pub fn new(runtime: Arc<R>) -> Self {
        LegacyStrategy {
            runtime,
            memory: MemoryHandle::new(),
        }
    }

    fn accessible(&self, member: ObjRef) -> Result<ObjRef, ReflectError> {
        self.runtime.set_accessible(member, true)?;
        Ok(member)
    }

    fn is_static(&self, member: ObjRef) -> bool {
        self.runtime
            .member_modifiers(member)
            .is_ok_and(|flags| flags.is_static())
    }

    fn named(&self, member: ObjRef, name: &str) -> bool {
        self.runtime.member_name(member).is_ok_and(|n| n == name)
    }

    fn takes(&self, executable: ObjRef, params: Option<&[ObjRef]>) -> bool {
        self.runtime
            .parameter_types(executable)
            .is_ok_and(|declared| parameters_match(&declared, params))
    }
}

impl<R: ManagedRuntime> ReflectStrategy<R> for LegacyStrategy<R> {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Legacy
    }

    fn constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.runtime
            .declared_constructors(class)?
            .into_iter()
            .map(|c| self.accessible(c))
            .collect()
    }

    fn constructor(&self, class: ObjRef, params: Option<&[ObjRef]>) -> Result<ObjRef, ReflectError> {
        let found = self
            .runtime
            .declared_constructors(class)?
            .into_iter()
            .find(|c| self.takes(*c, params));
        match found {
            Some(constructor) => self.accessible(constructor),
            None => Err(ReflectError::MemberNotFound(format!("{:?}.<init>", class))),
        }
    }

    fn methods(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError> {
        self.runtime
            .declared_methods(class)?
            .into_iter()
            .filter(|m| self.is_static(*m) == is_static)
            .map(|m| self.accessible(m))
            .collect()
    }

    fn method(
        &self,
        class: ObjRef,
        name: &str,
        params: Option<&[ObjRef]>,
        is_static: bool,
    ) -> Result<ObjRef, ReflectError> {
        let found = self
            .runtime
            .declared_methods(class)?
            .into_iter()
            .find(|m| self.named(*m, name) && self.is_static(*m) == is_static && self.takes(*m, params));
        match found {
            Some(method) => self.accessible(method),
            None => Err(ReflectError::MemberNotFound(name.to_string())),
        }
    }

    fn fields(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError> {
        self.runtime
            .declared_fields(class)?
            .into_iter()
            .filter(|f| self.is_static(*f) == is_static)
            .map(|f| self.accessible(f))
            .collect()
    }

    fn field(&self, class: ObjRef, name: &str, is_static: bool) -> Result<ObjRef, ReflectError> {
        let field = self.runtime.declared_field(class, name)?;
        if self.is_static(field) != is_static {
            return Err(ReflectError::MemberNotFound(format!(
                "{} is not {} field",
                name,
                if is_static { "a static" } else { "an instance" }
            )));
        }
        self.accessible(field)
    }

    fn allocate_instance(&self, class: ObjRef) -> Result<ObjRef, ReflectError> {
        let memory = self.memory.get(&*self.runtime)?;
        memory
            .allocate_instance(class)
            .map_err(ReflectError::InvocationFailure)
    }
}
