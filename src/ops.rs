//! The acquire and release operations a [`SharedHandle`](crate::SharedHandle)
//! performs on its target.

use alloc::boxed::Box;
use core::ptr::NonNull;

use crate::RefCounted;

/// Acquiring and releasing references on an object that keeps its own count.
///
/// This is implemented for every [`RefCounted`] type, and for trait objects
/// whose trait has `RefCounted` as a supertrait, by updating the embedded
/// [`RefCounter`](crate::RefCounter). Types whose count lives somewhere else
/// can implement it directly.
///
/// # Safety
///
/// Implementations must behave as an atomic reference count: `release`
/// destroys the object exactly when it drops the last reference acquired by
/// `add_ref` (or adopted by a handle), and never earlier. The decrement and the
/// check for the last reference must be a single atomic read-modify-write.
pub unsafe trait RefCount {
    /// Acquires one reference on the object at `this`.
    ///
    /// # Safety
    ///
    /// `this` must point to a live object on which the caller holds, or is
    /// creating, a reference.
    unsafe fn add_ref(this: NonNull<Self>);

    /// Releases one reference on the object at `this`, destroying it if that
    /// was the last reference.
    ///
    /// # Safety
    ///
    /// The caller must own one reference on the object and must not use
    /// `this` afterwards.
    unsafe fn release(this: NonNull<Self>);
}

unsafe impl<T: ?Sized + RefCounted> RefCount for T {
    #[inline]
    unsafe fn add_ref(this: NonNull<Self>) {
        this.as_ref().ref_counter().increment();
    }

    #[inline]
    unsafe fn release(this: NonNull<Self>) {
        if this.as_ref().ref_counter().decrement() {
            // The object was boxed as its concrete type, and for trait objects
            // the vtable carries that type's drop glue and layout.
            drop(Box::from_raw(this.as_ptr()));
        }
    }
}

/// Acquires one reference on the object at `p`.
///
/// # Safety
///
/// See [`RefCount::add_ref`].
#[inline(always)]
pub unsafe fn add_ref<T: ?Sized + RefCount>(p: NonNull<T>) {
    T::add_ref(p)
}

/// Releases one reference on the object at `p`, destroying it if that was the
/// last reference.
///
/// # Safety
///
/// See [`RefCount::release`].
#[inline(always)]
pub unsafe fn release<T: ?Sized + RefCount>(p: NonNull<T>) {
    T::release(p)
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::{RefCounter, SharedHandle};
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicUsize, Ordering};

    struct Tracked {
        refs: RefCounter,
        drops: Arc<AtomicUsize>,
    }

    crate::impl_ref_counted!(Tracked => refs);

    impl Drop for Tracked {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracked() -> (NonNull<Tracked>, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        let b = Box::new(Tracked {
            refs: RefCounter::new(),
            drops: drops.clone(),
        });
        (NonNull::from(Box::leak(b)), drops)
    }

    #[test]
    pub fn release_destroys_on_last() {
        let (p, drops) = tracked();
        unsafe {
            add_ref(p);
            add_ref(p);
            assert_eq!(p.as_ref().ref_count(), 2);
            release(p);
            assert_eq!(p.as_ref().ref_count(), 1);
            assert_eq!(drops.load(Ordering::SeqCst), 0, "destroyed too early");
            release(p);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1, "not destroyed exactly once");
    }

    trait Shape: RefCounted {
        fn sides(&self) -> u32;
    }

    struct Square {
        refs: RefCounter,
        drops: Arc<AtomicUsize>,
    }

    crate::impl_ref_counted!(Square => refs);

    impl Shape for Square {
        fn sides(&self) -> u32 {
            4
        }
    }

    impl Drop for Square {
        fn drop(&mut self) {
            self.drops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    pub fn release_through_trait_object() {
        let drops = Arc::new(AtomicUsize::new(0));
        let b: Box<dyn Shape> = Box::new(Square {
            refs: RefCounter::new(),
            drops: drops.clone(),
        });
        let p = NonNull::from(Box::leak(b));
        unsafe {
            add_ref(p);
            assert_eq!(p.as_ref().sides(), 4);
            release(p);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 1, "concrete drop did not run");
    }

    /// An object whose count lives in a shared table rather than in itself.
    struct External {
        slot: usize,
    }

    static EXTERNAL_COUNTS: [AtomicUsize; 2] = [AtomicUsize::new(0), AtomicUsize::new(0)];
    static EXTERNAL_DROPS: AtomicUsize = AtomicUsize::new(0);

    unsafe impl RefCount for External {
        unsafe fn add_ref(this: NonNull<Self>) {
            EXTERNAL_COUNTS[this.as_ref().slot].fetch_add(1, Ordering::AcqRel);
        }

        unsafe fn release(this: NonNull<Self>) {
            let slot = this.as_ref().slot;
            if EXTERNAL_COUNTS[slot].fetch_sub(1, Ordering::AcqRel) == 1 {
                drop(Box::from_raw(this.as_ptr()));
                EXTERNAL_DROPS.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    #[test]
    pub fn custom_count_participates() {
        let a = SharedHandle::new(External { slot: 1 });
        let b = a.clone();
        assert_eq!(EXTERNAL_COUNTS[1].load(Ordering::SeqCst), 2);
        drop(a);
        assert_eq!(EXTERNAL_DROPS.load(Ordering::SeqCst), 0, "destroyed too early");
        drop(b);
        assert_eq!(EXTERNAL_COUNTS[1].load(Ordering::SeqCst), 0);
        assert_eq!(EXTERNAL_DROPS.load(Ordering::SeqCst), 1, "not destroyed exactly once");
    }
}
