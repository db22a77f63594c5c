//! Destruction strategies for adopted allocations.
//!
//! A `Deleter` tears down the object a block manages separately from the block's own storage. The default strategy
//! reclaims a `Box`; other strategies return objects to a pool, or leave storage owned elsewhere untouched.

use core::ptr::NonNull;

use alloc::boxed::Box;

/// A strategy to release the object a separately-allocated block manages.
pub trait Deleter<T>
where
    T: ?Sized,
{
    /// Releases the target's resources.
    ///
    /// #   Safety
    ///
    /// -   Target: `target` is the address the block was constructed with, and has not been released yet.
    /// -   EndOfLife: `target` SHALL never be accessed again after this call.
    unsafe fn delete(&self, target: NonNull<T>);
}

/// The default strategy: reclaims an allocation created by `Box`.
#[derive(Clone, Copy, Debug, Default)]
pub struct BoxDeleter;

impl<T> Deleter<T> for BoxDeleter
where
    T: ?Sized,
{
    unsafe fn delete(&self, target: NonNull<T>) {
        //  Safety:
        //  -   BoxOrigin: the handle constructors using this strategy require `target` to originate from
        //      `Box::into_raw`.
        //  -   EndOfLife: as per pre-condition.
        drop(unsafe { Box::from_raw(target.as_ptr()) });
    }
}

/// A strategy which leaves the target untouched, for objects whose storage is owned elsewhere.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopDeleter;

impl<T> Deleter<T> for NoopDeleter
where
    T: ?Sized,
{
    unsafe fn delete(&self, _target: NonNull<T>) {}
}

impl<T, F> Deleter<T> for F
where
    T: ?Sized,
    F: Fn(NonNull<T>),
{
    unsafe fn delete(&self, target: NonNull<T>) {
        self(target);
    }
}
