//! Intrusive atomically reference-counted smart pointers.
//!
//! Instead of allocating a control block next to the value, as
//! [`alloc::sync::Arc`] does, the reference count lives inside the object
//! itself as a [`RefCounter`] field. A [`SharedHandle`] to such an object is a
//! single (possibly null) pointer that acquires a reference when cloned and
//! releases it when dropped, destroying the object through its concrete type
//! once the last reference is released. Because the count travels with the
//! object, a handle can be rebuilt from a raw pointer, and handles viewing the
//! same object through different trait objects still share one count.
//!
//! Only the count is synchronized. Anything else inside the target that is
//! mutated through shared references needs its own synchronization.
//!
//! ```
//! use intrc::{impl_ref_counted, RefCounter, SharedHandle};
//!
//! struct Node {
//!     refs: RefCounter,
//!     value: u32,
//! }
//!
//! impl_ref_counted!(Node => refs);
//!
//! let a = SharedHandle::new(Node { refs: RefCounter::new(), value: 3 });
//! let b = a.clone();
//! assert_eq!(b.value, 3);
//! assert_eq!(SharedHandle::count(&a), 2);
//!
//! let mut c = b;
//! let raw = SharedHandle::detach(&mut c).unwrap();
//! assert!(SharedHandle::is_null(&c));
//! assert_eq!(SharedHandle::count(&a), 2);
//!
//! // Hand the detached reference back to a handle without acquiring another.
//! let c = unsafe { SharedHandle::from_raw(raw, false) };
//! assert!(SharedHandle::ptr_eq(&c, &a));
//! ```
#![no_std]
#![cfg_attr(feature = "unsize", feature(unsize))]
#![cfg_attr(docsrs, feature(doc_cfg))]

extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

mod counter;
mod handle;
mod ops;
mod sync;

pub use counter::{RefCounted, RefCounter};
pub use handle::{swap, SharedHandle};
pub use ops::{add_ref, release, RefCount};


#[cfg(feature = "std")]
#[cold]
fn abort() -> ! {
    std::process::abort()
}

// A panic while already panicking aborts, which is the best `no_std` can do.
#[cfg(not(feature = "std"))]
#[cold]
fn abort() -> ! {
    struct PanicOnDrop;
    impl Drop for PanicOnDrop {
        fn drop(&mut self) {
            panic!("reference count overflow")
        }
    }
    let _double_panicer = PanicOnDrop;
    panic!("reference count overflow");
}
