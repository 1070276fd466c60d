use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type Erased = dyn Any + Send + Sync;

/// Compares two erased values of the same concrete type.
type EqFn = fn(&Erased, &Erased) -> bool;

/// A type-erased, reference-counted state value.
///
/// Wraps `Arc<dyn Any + Send + Sync>` so readers share one allocation.
/// Clone is cheap, just an atomic increment.
///
/// Equality is strict rather than structural:
/// - values built with [`StateValue::new`] compare with the type's own
///   `PartialEq` when both sides hold the same type;
/// - values built with [`StateValue::opaque`] only equal another handle to
///   the very same allocation.
///
/// Values of different types are never equal.
#[derive(Clone)]
pub struct StateValue {
    inner: Arc<Erased>,
    eq: Option<EqFn>,
}

fn eq_by_value<T: Any + PartialEq>(a: &Erased, b: &Erased) -> bool {
    match (a.downcast_ref::<T>(), b.downcast_ref::<T>()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl StateValue {
    /// Create a value compared by `T`'s `PartialEq`.
    pub fn new<T: Any + PartialEq + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            eq: Some(eq_by_value::<T>),
        }
    }

    /// Create a value compared by identity only.
    ///
    /// Use this for types without `PartialEq`, or when every write should
    /// count as a change unless the exact same handle is written back.
    pub fn opaque<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(value),
            eq: None,
        }
    }

    /// Try to downcast to a concrete type reference.
    ///
    /// Returns `None` if the stored type doesn't match `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }

    /// Check if the stored value is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.inner.is::<T>()
    }

    /// Get the `TypeId` of the stored value.
    pub fn type_id(&self) -> TypeId {
        (*self.inner).type_id()
    }

    /// Whether both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &StateValue) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Strict equality as used for change detection.
    pub fn strict_eq(&self, other: &StateValue) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.eq, other.eq) {
            (Some(eq), Some(_)) if self.type_id() == other.type_id() => {
                eq(&*self.inner, &*other.inner)
            }
            _ => false,
        }
    }

    /// Boolean coercion used by `toggle`.
    ///
    /// `bool` is itself, numbers are truthy when non-zero (NaN is falsy),
    /// strings when non-empty, `()` is falsy, anything else is truthy.
    pub fn is_truthy(&self) -> bool {
        let v = &*self.inner;
        if let Some(b) = v.downcast_ref::<bool>() {
            return *b;
        }
        if let Some(s) = v.downcast_ref::<String>() {
            return !s.is_empty();
        }
        if let Some(s) = v.downcast_ref::<&'static str>() {
            return !s.is_empty();
        }
        if v.is::<()>() {
            return false;
        }
        macro_rules! nonzero {
            ($($t:ty),*) => {
                $(
                    if let Some(n) = v.downcast_ref::<$t>() {
                        return *n != 0;
                    }
                )*
            };
        }
        nonzero!(u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize);
        if let Some(f) = v.downcast_ref::<f64>() {
            return *f != 0.0 && !f.is_nan();
        }
        if let Some(f) = v.downcast_ref::<f32>() {
            return *f != 0.0 && !f.is_nan();
        }
        true
    }

    /// Get the number of strong references to the underlying value.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl PartialEq for StateValue {
    fn eq(&self, other: &Self) -> bool {
        self.strict_eq(other)
    }
}

impl fmt::Debug for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateValue")
            .field("type_id", &(*self.inner).type_id())
            .field("by_value", &self.eq.is_some())
            .finish()
    }
}

/// Unique handle for a subscription, returned by `on()` / `subscribe()`.
///
/// Ids start at 1 and increase monotonically per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub(crate) u64);

impl SubscriptionId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}
