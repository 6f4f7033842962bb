// Runtime abstraction and shared types
pub mod backend;
pub mod common;
pub mod config;
pub mod sdk_version;

// Raw memory, metadata layout and the bypass itself
pub mod art;
pub mod memory;
pub mod reflect;

// Embeddable runtime with ART-shaped metadata
pub mod vm;

#[cfg(unix)]
pub mod workaround;

pub use art::ArtOffsets;
pub use backend::{ManagedRuntime, MemberKind, ObjRef, RawMemory, RuntimeError, StrategyKind, Value};
pub use common::{LookupModes, Modifiers, TypeKind};
pub use config::{LayoutPolicy, ReflectConfig};
pub use reflect::{ReflectError, UnsafeReflect};
pub use sdk_version::SdkVersion;
pub use vm::{ClassBuilder, Vm, VmOptions};
