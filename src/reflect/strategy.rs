use crate::backend::{ManagedRuntime, ObjRef, StrategyKind};

use super::ReflectError;

/// How members of a class are found and materialized.
///
/// Returned members are already accessible.
pub trait ReflectStrategy<R: ManagedRuntime>: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn constructors(&self, class: ObjRef) -> Result<Vec<ObjRef>, ReflectError>;

    fn constructor(&self, class: ObjRef, params: Option<&[ObjRef]>) -> Result<ObjRef, ReflectError>;

    fn methods(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError>;

    fn method(
        &self,
        class: ObjRef,
        name: &str,
        params: Option<&[ObjRef]>,
        is_static: bool,
    ) -> Result<ObjRef, ReflectError>;

    fn fields(&self, class: ObjRef, is_static: bool) -> Result<Vec<ObjRef>, ReflectError>;

    fn field(&self, class: ObjRef, name: &str, is_static: bool) -> Result<ObjRef, ReflectError>;

    fn allocate_instance(&self, class: ObjRef) -> Result<ObjRef, ReflectError>;
}

/// Positional, exact match of declared parameter types.
///
/// `None` stands for "no parameter types given" and matches only an empty list.
pub fn parameters_match(declared: &[ObjRef], wanted: Option<&[ObjRef]>) -> bool {
    match wanted {
        None => declared.is_empty(),
        Some(wanted) => declared == wanted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refs(addrs: &[usize]) -> Vec<ObjRef> {
        addrs.iter().filter_map(|a| ObjRef::from_addr(*a)).collect()
    }

    #[test]
    fn test_parameters_match() {
        let int_long = refs(&[0x10, 0x20]);
        assert!(parameters_match(&[], None));
        assert!(parameters_match(&[], Some(&[])));
        assert!(!parameters_match(&int_long, None));
        assert!(!parameters_match(&int_long, Some(&[])));
        assert!(parameters_match(&int_long, Some(&int_long)));
        assert!(!parameters_match(&int_long, Some(&refs(&[0x20, 0x10]))));
    }
}
