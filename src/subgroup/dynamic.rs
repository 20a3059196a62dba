// src/subgroup/dynamic.rs

//! Type-erased subgroup keys.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::exec::OperationQueue;
use crate::subgroup::SubGroupQueue;

/// A subgroup queue whose keys may be of any hashable type.
pub type DynamicSubGroupQueue<E = OperationQueue> = SubGroupQueue<AnyKey, E>;

/// A hashable key of any type.
///
/// Two keys are equal only when they hold the same type and equal values, so
/// `AnyKey::from(1u64)` and `AnyKey::from(1i64)` are different subgroups.
/// String slices are stored as `String`.
#[derive(Clone)]
pub struct AnyKey(Arc<dyn DynKey>);

trait DynKey: Any + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn dyn_eq(&self, other: &dyn DynKey) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
}

impl<T> DynKey for T
where
    T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn dyn_eq(&self, other: &dyn DynKey) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        TypeId::of::<T>().hash(&mut state);
        self.hash(&mut state);
    }
}

impl AnyKey {
    pub fn new<T>(value: T) -> Self
    where
        T: Eq + Hash + fmt::Debug + Send + Sync + 'static,
    {
        if let Some(key) = (&value as &dyn Any).downcast_ref::<AnyKey>() {
            return key.clone();
        }
        AnyKey(Arc::new(value))
    }

    /// The wrapped value, if it is a `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.0).as_any().downcast_ref::<T>()
    }
}

impl PartialEq for AnyKey {
    fn eq(&self, other: &Self) -> bool {
        (*self.0).dyn_eq(&*other.0)
    }
}

impl Eq for AnyKey {}

impl Hash for AnyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        (*self.0).dyn_hash(state);
    }
}

impl fmt::Debug for AnyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for AnyKey {
    fn from(value: &str) -> Self {
        AnyKey::new(value.to_owned())
    }
}

macro_rules! any_key_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for AnyKey {
                fn from(value: $ty) -> Self {
                    AnyKey::new(value)
                }
            }
        )*
    };
}

any_key_from!(String, u32, u64, usize, i32, i64);

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn equality_needs_same_type_and_value() {
        assert_eq!(AnyKey::from("a"), AnyKey::from(String::from("a")));
        assert_ne!(AnyKey::from(1u64), AnyKey::from(1i64));
        assert_ne!(AnyKey::from(1u64), AnyKey::from(2u64));
    }

    #[test]
    fn keys_hash_consistently() {
        let mut set = HashSet::new();
        set.insert(AnyKey::from("a"));
        set.insert(AnyKey::from("a"));
        set.insert(AnyKey::from(7usize));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&AnyKey::from(7usize)));
    }

    #[test]
    fn wrapping_a_key_does_not_nest() {
        let key = AnyKey::from(3i32);
        let rewrapped = AnyKey::new(key.clone());
        assert_eq!(rewrapped, key);
        assert_eq!(rewrapped.downcast_ref::<i32>(), Some(&3));
    }

    #[test]
    fn custom_key_types_work() {
        #[derive(Debug, PartialEq, Eq, Hash)]
        enum Lane {
            Uploads,
        }
        let key = AnyKey::new(Lane::Uploads);
        assert_eq!(key, AnyKey::new(Lane::Uploads));
        assert_eq!(format!("{key:?}"), "Uploads");
    }
}
