use std::{
    any::{Any, TypeId},
    sync::Arc,
};

use serde::Serialize;

/// All errors returned by user code must be Send + Sync
pub type DynError = Box<dyn std::error::Error + Send + Sync>;

/// A resolved instance with its concrete type erased
pub type AnyInstance = Arc<dyn Any + Send + Sync + 'static>;

/// Construction arguments with their concrete type erased
pub type ErasedArgs = Arc<dyn Any + Send + Sync + 'static>;

/// We assume that we are using a multithreaded async runtime
/// So anything injectable needs to be Send + Sync + 'static
pub trait Service: Send + Sync + 'static {}
impl<T: Send + Sync + 'static> Service for T {}

/// Arguments a parameterized token can be resolved with.
///
/// Arguments are serialized to build the instance name, so two calls with equal
/// arguments share one instance. Use ordered collections (`BTreeMap`) inside
/// arguments, a `HashMap` does not serialize deterministically.
pub trait InjectionArgs: Serialize + Send + Sync + 'static {}
impl<T: Serialize + Send + Sync + 'static> InjectionArgs for T {}

/// Type Name and Type Id
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct TypeInfo {
    pub type_name: &'static str,
    pub type_id: TypeId,
}
impl std::fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.type_name)
    }
}
impl TypeInfo {
    pub fn of<T: 'static + ?Sized>() -> TypeInfo {
        TypeInfo {
            type_name: std::any::type_name::<T>(),
            type_id: TypeId::of::<T>(),
        }
    }
}

/// Downcasts an erased instance, reporting the expected type on failure
pub(crate) fn downcast_instance<T: Service>(instance: AnyInstance) -> Result<Arc<T>, TypeInfo> {
    Arc::downcast::<T>(instance).map_err(|_| TypeInfo::of::<T>())
}
