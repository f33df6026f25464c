//! The counter embedded into reference-counted objects.

use core::cmp::Ordering as CmpOrdering;
use core::fmt;
use core::hash::{Hash, Hasher};

use crate::sync::{AtomicUsize, Ordering};

/// An increment observing a count above this aborts.
const MAX_REFCOUNT: usize = isize::MAX as usize;

/// An atomic reference count to embed as a field of a type that wants to be
/// managed by [`SharedHandle`](crate::SharedHandle).
///
/// The counter is ownership metadata rather than part of the containing
/// value, so it never travels with copies: cloning produces a fresh counter
/// at zero, [`Clone::clone_from`] leaves the destination's count alone, all
/// counters compare equal and hashing one has no effect. That allows the
/// containing type to derive those traits without its ownership accounting
/// leaking into them.
pub struct RefCounter {
    count: AtomicUsize,
}

impl RefCounter {
    /// Creates a counter with no references.
    #[inline(always)]
    pub fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Gets the number of references currently held on the containing object.
    ///
    /// This is a snapshot: other threads holding handles to the same object
    /// may change it immediately afterwards.
    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn increment(&self) {
        let old = self.count.fetch_add(1, Ordering::AcqRel);
        if old > MAX_REFCOUNT {
            crate::abort();
        }
    }

    /// Returns true if this decrement released the last reference.
    #[inline]
    pub(crate) fn decrement(&self) -> bool {
        let old = self.count.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(old != 0, "reference count underflow");
        old == 1
    }
}

impl Default for RefCounter {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for RefCounter {
    /// Returns a new counter with no references, regardless of the count of `self`.
    #[inline(always)]
    fn clone(&self) -> Self {
        Self::new()
    }

    /// Keeps the destination's own count.
    #[inline(always)]
    fn clone_from(&mut self, _source: &Self) {}
}

impl PartialEq for RefCounter {
    #[inline(always)]
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl Eq for RefCounter {}

impl PartialOrd for RefCounter {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for RefCounter {
    #[inline(always)]
    fn cmp(&self, _other: &Self) -> CmpOrdering {
        CmpOrdering::Equal
    }
}

impl Hash for RefCounter {
    #[inline(always)]
    fn hash<H: Hasher>(&self, _state: &mut H) {}
}

impl fmt::Debug for RefCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefCounter").field(&self.count()).finish()
    }
}

/// Types that carry an embedded [`RefCounter`].
///
/// Every `RefCounted` type (and every trait object whose trait has
/// `RefCounted` as a supertrait) implements [`RefCount`](crate::RefCount)
/// and so can be managed by [`SharedHandle`](crate::SharedHandle).
///
/// # Safety
///
/// [`RefCounted::ref_counter`] must return the same counter, stored inside
/// `self`, every time it is called for the whole life of the object. Handles
/// increment and decrement whatever counter this returns and free the object
/// when it reaches zero.
///
/// [`impl_ref_counted!`](crate::impl_ref_counted) implements this trait
/// from a field without any `unsafe` at the use site.
pub unsafe trait RefCounted {
    /// Returns the counter embedded in `self`.
    fn ref_counter(&self) -> &RefCounter;

    /// Gets the number of references currently held on `self`.
    #[inline(always)]
    fn ref_count(&self) -> usize {
        self.ref_counter().count()
    }
}

/// Implements [`RefCounted`] for a type using one of its [`RefCounter`] fields.
///
/// Generic types list their type parameters in an `impl<...>` prefix, with
/// any bounds in a trailing `where` clause. Lifetime parameters are not
/// accepted.
///
/// ```
/// use intrc::{impl_ref_counted, RefCounter};
///
/// struct Node {
///     refs: RefCounter,
///     value: u32,
/// }
///
/// impl_ref_counted!(Node => refs);
///
/// struct Labeled<L> {
///     refs: RefCounter,
///     label: L,
/// }
///
/// impl_ref_counted!(impl<L> Labeled<L> => refs where L: Send);
/// ```
#[macro_export]
macro_rules! impl_ref_counted {
    (impl<$($param:ident),+ $(,)?> $ty:ty => $field:ident $(where $($bound:tt)+)?) => {
        unsafe impl<$($param),+> $crate::RefCounted for $ty $(where $($bound)+)? {
            #[inline(always)]
            fn ref_counter(&self) -> &$crate::RefCounter {
                // Rejects fields that only deref to a counter stored elsewhere.
                let $crate::RefCounter { .. } = self.$field;
                &self.$field
            }
        }
    };
    ($ty:ty => $field:ident) => {
        unsafe impl $crate::RefCounted for $ty {
            #[inline(always)]
            fn ref_counter(&self) -> &$crate::RefCounter {
                // Rejects fields that only deref to a counter stored elsewhere.
                let $crate::RefCounter { .. } = self.$field;
                &self.$field
            }
        }
    };
}

#[cfg(all(test, not(loom)))]
mod tests {
    extern crate alloc;
    use super::*;

    #[derive(Clone, PartialEq, Eq, Hash, Debug)]
    struct Named {
        refs: RefCounter,
        name: &'static str,
    }

    crate::impl_ref_counted!(Named => refs);

    struct Pair<A, B> {
        refs: RefCounter,
        first: A,
        second: B,
    }

    crate::impl_ref_counted!(impl<A, B> Pair<A, B> => refs where A: Clone, B: Clone);

    #[test]
    pub fn generic_ref_counted() {
        let p = Pair {
            refs: RefCounter::new(),
            first: 1_u8,
            second: "two",
        };
        p.ref_counter().increment();
        assert_eq!(p.ref_count(), 1, "generic impl used the wrong counter");
        assert_eq!((p.first, p.second), (1, "two"));

        let h = crate::SharedHandle::new(Pair {
            refs: RefCounter::new(),
            first: 3_u32,
            second: 4_u64,
        });
        assert_eq!(crate::SharedHandle::count(&h), 1);
        assert_eq!(h.first + h.second as u32, 7);
    }

    #[test]
    pub fn starts_at_zero() {
        let c = RefCounter::new();
        assert_eq!(c.count(), 0, "new counter has references");
        assert_eq!(RefCounter::default().count(), 0, "default counter has references");
    }

    #[test]
    pub fn increment_decrement() {
        let c = RefCounter::new();
        c.increment();
        c.increment();
        assert_eq!(c.count(), 2);
        assert!(!c.decrement(), "decrement to 1 reported as last");
        assert!(c.decrement(), "decrement to 0 not reported as last");
        assert_eq!(c.count(), 0);
    }

    #[test]
    pub fn clone_does_not_copy_count() {
        let a = Named {
            refs: RefCounter::new(),
            name: "a",
        };
        a.refs.increment();
        a.refs.increment();

        let b = a.clone();
        assert_eq!(b.ref_count(), 0, "clone inherited the source count");
        assert_eq!(a.ref_count(), 2, "clone disturbed the source count");
        assert_eq!(a, b, "counter took part in equality");
    }

    #[test]
    pub fn clone_from_keeps_own_count() {
        let source = RefCounter::new();
        let mut dest = RefCounter::new();
        dest.increment();

        dest.clone_from(&source);
        assert_eq!(dest.count(), 1, "clone_from replaced the destination count");
        assert_eq!(source.count(), 0);
    }

    #[test]
    pub fn hash_ignores_count() {
        use core::hash::BuildHasher;
        use std::collections::hash_map::RandomState;

        let state = RandomState::new();
        let a = RefCounter::new();
        let b = RefCounter::new();
        b.increment();
        assert_eq!(state.hash_one(&a), state.hash_one(&b));
        assert_eq!(a.cmp(&b), CmpOrdering::Equal);
    }

    #[test]
    pub fn debug_shows_count() {
        let c = RefCounter::new();
        c.increment();
        assert_eq!(alloc::format!("{:?}", c), "RefCounter(1)");
    }
}
