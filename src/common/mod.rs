//! Common types shared between the reflection layer and the runtime

pub mod descriptor;
pub mod modifiers;

pub use descriptor::{class_name_for, package_of, TypeKind};
pub use modifiers::{LookupModes, Modifiers};
