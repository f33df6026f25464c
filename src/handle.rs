//! The shared-ownership handle.

use alloc::boxed::Box;
use core::cmp::Ordering;
use core::fmt;
use core::hash::{Hash, Hasher};
#[cfg(feature = "unsize")]
use core::marker::Unsize;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::Deref;
use core::ptr::{self, NonNull};

use crate::{RefCount, RefCounted};

/// Smart pointer sharing ownership of an object that carries its own
/// reference count.
///
/// Unlike [`alloc::sync::Arc`] there is no separate allocation for the count:
/// the target is a plain heap object whose type implements [`RefCount`],
/// usually by embedding a [`RefCounter`](crate::RefCounter). A handle can
/// therefore be rebuilt from nothing more than a raw pointer to the target,
/// and handles to the same object can be viewed through different trait
/// object types while still sharing one count.
///
/// A handle may also be null. Dereferencing a null handle panics; use
/// [`SharedHandle::as_ref`] for checked access.
///
/// Operations on the handle itself are associated functions, such as
/// `SharedHandle::reset(&mut h)`, so that they never shadow methods of the
/// target.
pub struct SharedHandle<T: ?Sized + RefCount> {
    ptr: Option<NonNull<T>>,
    _marker: PhantomData<T>,
}

unsafe impl<T: ?Sized + RefCount + Sync + Send> Send for SharedHandle<T> {}
unsafe impl<T: ?Sized + RefCount + Sync + Send> Sync for SharedHandle<T> {}

impl<T: RefCount> SharedHandle<T> {
    /// Moves the value into a heap allocation and returns the first handle to it.
    #[inline]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T: ?Sized + RefCount> SharedHandle<T> {
    /// Returns a handle that refers to nothing.
    #[inline(always)]
    pub const fn null() -> Self {
        Self {
            ptr: None,
            _marker: PhantomData,
        }
    }

    /// Takes ownership of a boxed object and acquires the first reference on it.
    ///
    /// The box may hold a trait object, in which case the object will later be
    /// destroyed through that trait object's drop glue.
    #[inline]
    pub fn from_box(b: Box<T>) -> Self {
        let ptr = NonNull::from(Box::leak(b));
        // SAFETY: the box gave us a live, uniquely owned heap object.
        unsafe { Self::from_raw(ptr, true) }
    }

    /// Wraps a raw pointer to a reference-counted object.
    ///
    /// With `acquire` set this acquires a new reference for the handle.
    /// Otherwise the handle adopts a reference the caller already owns, such
    /// as one returned by [`SharedHandle::detach`] or [`SharedHandle::into_raw`].
    ///
    /// # Safety
    ///
    /// `ptr` must point to a live object that [`RefCount::release`] is able to
    /// destroy, which for [`RefCounted`] types means one allocated by `Box`.
    /// When `acquire` is false the caller must own one reference on the
    /// object, and gives it up to the handle.
    #[inline]
    pub unsafe fn from_raw(ptr: NonNull<T>, acquire: bool) -> Self {
        if acquire {
            T::add_ref(ptr);
        }
        Self {
            ptr: Some(ptr),
            _marker: PhantomData,
        }
    }

    /// Gets a raw pointer to the target, or `None` for a null handle.
    ///
    /// The count is not affected and the pointer remains valid for as long as
    /// some reference on the object remains.
    #[inline(always)]
    pub const fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    /// Returns a reference to the target, or `None` for a null handle.
    #[inline(always)]
    pub fn as_ref(this: &Self) -> Option<&T> {
        // SAFETY: a non-null handle holds a reference, keeping the target alive.
        this.ptr.map(|p| unsafe { p.as_ref() })
    }

    /// Returns true if the handle refers to nothing.
    #[inline(always)]
    pub const fn is_null(this: &Self) -> bool {
        this.ptr.is_none()
    }

    /// Returns true if both handles refer to the same object, or are both null.
    #[inline(always)]
    pub fn ptr_eq<U: ?Sized + RefCount>(this: &Self, other: &SharedHandle<U>) -> bool {
        Self::addr(this) == SharedHandle::addr(other)
    }

    /// Releases the held reference, if any, leaving the handle null.
    #[inline]
    pub fn reset(this: &mut Self) {
        drop(mem::take(this));
    }

    /// Replaces the target with the object at `ptr`, acquiring a reference on
    /// it or adopting one as for [`SharedHandle::from_raw`], then releases the
    /// reference previously held.
    ///
    /// Resetting an acquiring handle to the object it already holds does nothing.
    ///
    /// # Safety
    ///
    /// The requirements of [`SharedHandle::from_raw`] apply to `ptr`.
    pub unsafe fn reset_raw(this: &mut Self, ptr: NonNull<T>, acquire: bool) {
        if acquire && Self::addr(this) == ptr.cast::<()>().as_ptr() as *const () {
            return;
        }
        let mut replacement = Self::from_raw(ptr, acquire);
        Self::swap(this, &mut replacement);
    }

    /// Moves the held reference out into a new handle, leaving this one null.
    #[inline(always)]
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// Clears the handle without releasing its reference and returns the raw
    /// pointer it held.
    ///
    /// The caller becomes the owner of that reference and must eventually
    /// release it, typically by passing the pointer back to
    /// [`SharedHandle::from_raw`] with `acquire` unset.
    #[inline(always)]
    #[must_use = "dropping the detached pointer leaks the reference"]
    pub fn detach(this: &mut Self) -> Option<NonNull<T>> {
        this.ptr.take()
    }

    /// Consumes the handle without releasing its reference and returns the raw
    /// pointer it held. See [`SharedHandle::detach`].
    #[inline(always)]
    #[must_use = "dropping the returned pointer leaks the reference"]
    pub fn into_raw(this: Self) -> Option<NonNull<T>> {
        let this = ManuallyDrop::new(this);
        this.ptr
    }

    /// Exchanges the targets of two handles without touching either count.
    #[inline(always)]
    pub fn swap(a: &mut Self, b: &mut Self) {
        mem::swap(&mut a.ptr, &mut b.ptr);
    }

    /// Converts the handle into a handle of another target type, passing the
    /// held reference along.
    ///
    /// Prefer [`upcast!`](crate::upcast), which calls this with a conversion
    /// the compiler can check.
    ///
    /// # Safety
    ///
    /// `f` must return a pointer to the very same object, viewed as `U`, so
    /// that `U`'s [`RefCount`] operations act on the count the handle holds a
    /// reference on. If `f` panics the reference is leaked.
    #[inline]
    pub unsafe fn cast_unchecked<U: ?Sized + RefCount>(
        this: Self,
        f: impl FnOnce(NonNull<T>) -> NonNull<U>,
    ) -> SharedHandle<U> {
        match Self::into_raw(this) {
            Some(ptr) => SharedHandle::from_raw(f(ptr), false),
            None => SharedHandle::null(),
        }
    }

    /// Converts a handle to a concrete type into a handle to one of the
    /// unsized types it coerces to, such as a trait object it implements.
    #[cfg(feature = "unsize")]
    #[cfg_attr(docsrs, doc(cfg(feature = "unsize")))]
    #[inline]
    pub fn upcast<U: ?Sized + RefCount>(this: Self) -> SharedHandle<U>
    where
        T: Unsize<U>,
    {
        // SAFETY: unsizing keeps the address and the object.
        unsafe { Self::cast_unchecked(this, |ptr| -> NonNull<U> { ptr }) }
    }

    #[inline(always)]
    fn addr(this: &Self) -> *const () {
        match this.ptr {
            Some(p) => p.cast::<()>().as_ptr() as *const (),
            None => ptr::null(),
        }
    }
}

impl<T: ?Sized + RefCounted> SharedHandle<T> {
    /// Gets the number of references on the target, or zero for a null handle.
    #[inline]
    pub fn count(this: &Self) -> usize {
        Self::as_ref(this).map_or(0, |target| target.ref_count())
    }

    /// Returns true if this handle holds the only reference on its target.
    #[inline]
    pub fn is_unique(this: &Self) -> bool {
        Self::count(this) == 1
    }

    /// Returns a mutable reference to the target if this handle holds the
    /// only reference on it.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        if !Self::is_unique(this) {
            return None;
        }
        // SAFETY: no other reference exists through which the target could
        // be reached, and `this` is borrowed mutably for the result's lifetime.
        this.ptr.as_mut().map(|p| unsafe { p.as_mut() })
    }
}

/// Converts a handle into a handle to an unsized type its target coerces to,
/// such as a trait object the target implements, keeping the same object and
/// count.
///
/// ```
/// use intrc::{impl_ref_counted, upcast, RefCounted, RefCounter, SharedHandle};
///
/// trait Shape: RefCounted {
///     fn sides(&self) -> u32;
/// }
///
/// struct Square {
///     refs: RefCounter,
/// }
///
/// impl_ref_counted!(Square => refs);
///
/// impl Shape for Square {
///     fn sides(&self) -> u32 {
///         4
///     }
/// }
///
/// let square = SharedHandle::new(Square { refs: RefCounter::new() });
/// let shape: SharedHandle<dyn Shape> = upcast!(square.clone() => dyn Shape);
/// assert_eq!(shape.sides(), 4);
/// assert_eq!(SharedHandle::count(&square), 2);
/// ```
#[macro_export]
macro_rules! upcast {
    ($handle:expr => $target:ty) => {
        match $handle {
            handle => {
                // SAFETY: the closure only type-checks through an unsizing
                // coercion, which keeps the address and the object.
                unsafe {
                    $crate::SharedHandle::cast_unchecked(
                        handle,
                        |ptr| -> ::core::ptr::NonNull<$target> { ptr },
                    )
                }
            }
        }
    };
}

/// Exchanges the targets of two handles without touching either count.
#[inline(always)]
pub fn swap<T: ?Sized + RefCount>(a: &mut SharedHandle<T>, b: &mut SharedHandle<T>) {
    SharedHandle::swap(a, b);
}

impl<T: ?Sized + RefCount> Clone for SharedHandle<T> {
    /// Creates a new handle to the same object, acquiring a reference on it.
    #[inline]
    fn clone(&self) -> Self {
        match self.ptr {
            // SAFETY: our own reference keeps the target alive.
            Some(ptr) => unsafe { Self::from_raw(ptr, true) },
            None => Self::null(),
        }
    }

    /// Points this handle at `source`'s target. The new reference is acquired
    /// before the old one is released.
    #[inline]
    fn clone_from(&mut self, source: &Self) {
        if !Self::ptr_eq(self, source) {
            let mut replacement = source.clone();
            Self::swap(self, &mut replacement);
        }
    }
}

impl<T: ?Sized + RefCount> Drop for SharedHandle<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            // SAFETY: a non-null handle owns one reference.
            unsafe { T::release(ptr) }
        }
    }
}

impl<T: ?Sized + RefCount> Default for SharedHandle<T> {
    #[inline(always)]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + RefCount> Deref for SharedHandle<T> {
    type Target = T;

    /// Returns a reference to the target.
    ///
    /// # Panics
    ///
    /// Panics if the handle is null.
    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.ptr {
            // SAFETY: a non-null handle holds a reference, keeping the target alive.
            Some(ptr) => unsafe { ptr.as_ref() },
            None => null_deref(),
        }
    }
}

#[cold]
#[track_caller]
fn null_deref() -> ! {
    panic!("dereferenced a null SharedHandle")
}

impl<T: ?Sized + RefCount> From<Box<T>> for SharedHandle<T> {
    /// Equivalent to [`SharedHandle::from_box`].
    #[inline(always)]
    fn from(value: Box<T>) -> Self {
        Self::from_box(value)
    }
}

impl<T: ?Sized + RefCount, U: ?Sized + RefCount> PartialEq<SharedHandle<U>> for SharedHandle<T> {
    #[inline(always)]
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        Self::ptr_eq(self, other)
    }
}

impl<T: ?Sized + RefCount> Eq for SharedHandle<T> {}

impl<T: ?Sized + RefCount, U: ?Sized> PartialEq<*const U> for SharedHandle<T> {
    #[inline(always)]
    fn eq(&self, other: &*const U) -> bool {
        Self::addr(self) == other.cast::<()>()
    }
}

impl<T: ?Sized + RefCount, U: ?Sized> PartialEq<*mut U> for SharedHandle<T> {
    #[inline(always)]
    fn eq(&self, other: &*mut U) -> bool {
        Self::addr(self) == other.cast::<()>() as *const ()
    }
}

impl<T: ?Sized + RefCount, U: ?Sized> PartialEq<NonNull<U>> for SharedHandle<T> {
    #[inline(always)]
    fn eq(&self, other: &NonNull<U>) -> bool {
        Self::addr(self) == other.cast::<()>().as_ptr() as *const ()
    }
}

impl<T: ?Sized, U: ?Sized + RefCount> PartialEq<SharedHandle<U>> for *const T {
    #[inline(always)]
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        other == self
    }
}

impl<T: ?Sized, U: ?Sized + RefCount> PartialEq<SharedHandle<U>> for *mut T {
    #[inline(always)]
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        other == self
    }
}

impl<T: ?Sized, U: ?Sized + RefCount> PartialEq<SharedHandle<U>> for NonNull<T> {
    #[inline(always)]
    fn eq(&self, other: &SharedHandle<U>) -> bool {
        other == self
    }
}

impl<T: ?Sized + RefCount> PartialOrd for SharedHandle<T> {
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders handles by target address, with null handles first.
impl<T: ?Sized + RefCount> Ord for SharedHandle<T> {
    #[inline(always)]
    fn cmp(&self, other: &Self) -> Ordering {
        Self::addr(self).cmp(&Self::addr(other))
    }
}

impl<T: ?Sized + RefCount> Hash for SharedHandle<T> {
    #[inline(always)]
    fn hash<H: Hasher>(&self, state: &mut H) {
        Self::addr(self).hash(state)
    }
}

impl<T: ?Sized + RefCount + fmt::Debug> fmt::Debug for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Self::as_ref(self) {
            Some(target) => fmt::Debug::fmt(target, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: ?Sized + RefCount> fmt::Pointer for SharedHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&Self::addr(self), f)
    }
}
