//! Reflection facade
//!
//! [`UnsafeReflect`] reads and writes any field, calls any method or
//! constructor and allocates instances without running a constructor,
//! regardless of visibility or hidden-API policy. The strategy serving a
//! runtime is chosen once, from its version.
//!
//! Every operation is total: failures are logged at `debug` and collapse to
//! `None`, `false` or an empty list. The `try_` twins keep the cause.

mod legacy;
mod modern;
mod strategy;

use std::sync::Arc;

use log::{debug, info};
use thiserror::Error;

use crate::backend::{detect_strategy, ManagedRuntime, ObjRef, RuntimeError, StrategyKind, Value};
use crate::config::ReflectConfig;

pub use legacy::LegacyStrategy;
pub use modern::ModernStrategy;
pub use strategy::{parameters_match, ReflectStrategy};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReflectError {
    /// A metadata offset could not be derived, or raw memory was refused.
    #[error("calibration unavailable: {0}")]
    CalibrationUnavailable(String),
    /// The runtime refused to describe a retargeted handle.
    #[error("retarget to {descriptor:#x} denied: {source}")]
    RetargetDenied { descriptor: usize, source: RuntimeError },
    #[error("member not found: {0}")]
    MemberNotFound(String),
    /// The member was found but the call itself failed.
    #[error("invocation failed: {0}")]
    InvocationFailure(#[source] RuntimeError),
    /// The renderer's native document could not be created; the input was closed.
    #[error("native create failed: {0}")]
    NativeCreateFailure(String),
}

impl From<RuntimeError> for ReflectError {
    fn from(e: RuntimeError) -> Self {
        match e {
            RuntimeError::NoSuchField(name) | RuntimeError::NoSuchMethod(name) => ReflectError::MemberNotFound(name),
            other => ReflectError::InvocationFailure(other),
        }
    }
}

pub struct UnsafeReflect<R: ManagedRuntime + 'static> {
    runtime: Arc<R>,
    config: ReflectConfig,
    strategy: Box<dyn ReflectStrategy<R>>,
}

impl<R: ManagedRuntime + 'static> UnsafeReflect<R> {
    pub fn new(runtime: R) -> Self {
        Self::with_config(runtime, ReflectConfig::default())
    }

    pub fn with_config(runtime: R, config: ReflectConfig) -> Self {
        let runtime = Arc::new(runtime);
        let sdk = runtime.sdk_int();
        let kind = detect_strategy(sdk, &config);
        let strategy: Box<dyn ReflectStrategy<R>> = match kind {
            StrategyKind::Legacy => Box::new(LegacyStrategy::new(runtime.clone())),
            StrategyKind::Modern => Box::new(ModernStrategy::new(runtime.clone(), config.clone())),
        };
        info!("{} reflection on API {}", kind, sdk);
        UnsafeReflect {
            runtime,
            config,
            strategy,
        }
    }

    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    pub fn config(&self) -> &ReflectConfig {
        &self.config
    }

    pub fn strategy_kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    fn settle<T>(&self, op: &str, result: Result<T, ReflectError>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{} failed: {}", op, e);
                None
            }
        }
    }

    // Fields

    pub fn try_get_field(&self, class: ObjRef, instance: Option<ObjRef>, name: &str) -> Result<Value, ReflectError> {
        let field = self.strategy.field(class, name, instance.is_none())?;
        self.runtime
            .field_get(field, instance)
            .map_err(ReflectError::InvocationFailure)
    }

    /// Static field when `instance` is `None`, instance field otherwise.
    pub fn get_field(&self, class: ObjRef, instance: Option<ObjRef>, name: &str) -> Option<Value> {
        self.settle("get_field", self.try_get_field(class, instance, name))
    }

    pub fn try_set_field(
        &self,
        class: ObjRef,
        instance: Option<ObjRef>,
        name: &str,
        value: Value,
    ) -> Result<(), ReflectError> {
        let field = self.strategy.field(class, name, instance.is_none())?;
        self.runtime
            .field_set(field, instance, value)
            .map_err(ReflectError::InvocationFailure)
    }

    pub fn set_field(&self, class: ObjRef, instance: Option<ObjRef>, name: &str, value: Value) -> bool {
        self.settle("set_field", self.try_set_field(class, instance, name, value))
            .is_some()
    }

    // Methods and constructors

    pub fn try_invoke(
        &self,
        class: ObjRef,
        instance: Option<ObjRef>,
        name: &str,
        params: Option<&[ObjRef]>,
        args: &[Value],
    ) -> Result<Value, ReflectError> {
        let method = self.strategy.method(class, name, params, instance.is_none())?;
        self.runtime
            .method_invoke(method, instance, args)
            .map_err(ReflectError::InvocationFailure)
    }

    /// Call a method; `params: None` matches only the no-argument overload.
    ///
    /// A `void` method yields `Some(Value::Void)`.
    pub fn invoke(
        &self,
        class: ObjRef,
        instance: Option<ObjRef>,
        name: &str,
        params: Option<&[ObjRef]>,
        args: &[Value],
    ) -> Option<Value> {
        self.settle("invoke", self.try_invoke(class, instance, name, params, args))
    }

    pub fn try_new_instance(
        &self,
        class: ObjRef,
        params: Option<&[ObjRef]>,
        args: &[Value],
    ) -> Result<ObjRef, ReflectError> {
        let constructor = self.strategy.constructor(class, params)?;
        self.runtime
            .constructor_new_instance(constructor, args)
            .map_err(ReflectError::InvocationFailure)
    }

    pub fn new_instance(&self, class: ObjRef, params: Option<&[ObjRef]>, args: &[Value]) -> Option<ObjRef> {
        self.settle("new_instance", self.try_new_instance(class, params, args))
    }

    pub fn try_allocate_instance(&self, class: ObjRef) -> Result<ObjRef, ReflectError> {
        self.strategy.allocate_instance(class)
    }

    /// An instance with every field zeroed; no constructor runs.
    pub fn allocate_instance(&self, class: ObjRef) -> Option<ObjRef> {
        self.settle("allocate_instance", self.try_allocate_instance(class))
    }

    // Member listing and lookup

    pub fn try_get_constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.strategy.constructors(class)
    }

    pub fn get_constructors(&self, class: ObjRef) -> Vec<ObjRef> {
        self.settle("get_constructors", self.try_get_constructors(class))
            .unwrap_or_default()
    }

    pub fn try_get_constructor(&self, class: ObjRef, params: Option<&[ObjRef]>) -> Result<ObjRef, ReflectError> {
        self.strategy.constructor(class, params)
    }

    pub fn get_constructor(&self, class: ObjRef, params: Option<&[ObjRef]>) -> Option<ObjRef> {
        self.settle("get_constructor", self.try_get_constructor(class, params))
    }

    pub fn try_get_static_fields(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.strategy.fields(class, true)
    }

    pub fn get_static_fields(&self, class: ObjRef) -> Vec<ObjRef> {
        self.settle("get_static_fields", self.try_get_static_fields(class))
            .unwrap_or_default()
    }

    pub fn try_get_instance_fields(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.strategy.fields(class, false)
    }

    pub fn get_instance_fields(&self, class: ObjRef) -> Vec<ObjRef> {
        self.settle("get_instance_fields", self.try_get_instance_fields(class))
            .unwrap_or_default()
    }

    pub fn try_get_static_methods(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.strategy.methods(class, true)
    }

    pub fn get_static_methods(&self, class: ObjRef) -> Vec<ObjRef> {
        self.settle("get_static_methods", self.try_get_static_methods(class))
            .unwrap_or_default()
    }

    pub fn try_get_instance_methods(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError> {
        self.strategy.methods(class, false)
    }

    pub fn get_instance_methods(&self, class: ObjRef) -> Vec<ObjRef> {
        self.settle("get_instance_methods", self.try_get_instance_methods(class))
            .unwrap_or_default()
    }

    pub fn try_get_static_field(&self, class: ObjRef, name: &str) -> Result<ObjRef, ReflectError> {
        self.strategy.field(class, name, true)
    }

    pub fn get_static_field(&self, class: ObjRef, name: &str) -> Option<ObjRef> {
        self.settle("get_static_field", self.try_get_static_field(class, name))
    }

    pub fn try_get_instance_field(&self, class: ObjRef, name: &str) -> Result<ObjRef, ReflectError> {
        self.strategy.field(class, name, false)
    }

    pub fn get_instance_field(&self, class: ObjRef, name: &str) -> Option<ObjRef> {
        self.settle("get_instance_field", self.try_get_instance_field(class, name))
    }

    pub fn try_get_static_method(
        &self,
        class: ObjRef,
        name: &str,
        params: Option<&[ObjRef]>,
    ) -> Result<ObjRef, ReflectError> {
        self.strategy.method(class, name, params, true)
    }

    pub fn get_static_method(&self, class: ObjRef, name: &str, params: Option<&[ObjRef]>) -> Option<ObjRef> {
        self.settle("get_static_method", self.try_get_static_method(class, name, params))
    }

    pub fn try_get_instance_method(
        &self,
        class: ObjRef,
        name: &str,
        params: Option<&[ObjRef]>,
    ) -> Result<ObjRef, ReflectError> {
        self.strategy.method(class, name, params, false)
    }

    pub fn get_instance_method(&self, class: ObjRef, name: &str, params: Option<&[ObjRef]>) -> Option<ObjRef> {
        self.settle("get_instance_method", self.try_get_instance_method(class, name, params))
    }
}
