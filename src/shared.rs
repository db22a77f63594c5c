//! The owning handle.
//!
//! A `Shared<T>` keeps its target alive: the payload is destroyed when the last owning handle is released, and the
//! control block is freed once no observing handle remains either.

use core::{cmp, fmt, hash, marker::PhantomData, ops, ptr::NonNull};

use alloc::boxed::Box;

use crate::{
    block::{self, BlockHeader},
    deleter::{BoxDeleter, Deleter},
    error::HandleError,
    weak::Weak,
};

/// A counted, owning handle to a heap-allocated object.
///
/// Cloning shares ownership; the target lives for as long as any owning handle does. A handle may also be empty,
/// owning nothing at all.
///
/// A handle constructed by [`Shared::map`] or [`Shared::alias`] may observe a different address than the one its
/// block manages, typically a field of the owned object; liveness and counting keep tracking the owning block.
pub struct Shared<T>
where
    T: ?Sized,
{
    observed: Option<NonNull<T>>,
    block: Option<NonNull<BlockHeader>>,
    _marker: PhantomData<T>,
}

//
//  Construction
//

impl<T> Shared<T>
where
    T: ?Sized,
{
    /// Constructs an empty handle, owning nothing.
    pub const fn empty() -> Self {
        Self {
            observed: None,
            block: None,
            _marker: PhantomData,
        }
    }

    //  Safety:
    //  -   Accounting: the strong count of `block` was already incremented for this handle.
    //  -   Observed: `observed` is the address an owning handle on `block` held, and the payload is alive.
    pub(crate) unsafe fn from_observation(observed: Option<NonNull<T>>, block: NonNull<BlockHeader>) -> Self {
        Self {
            observed,
            block: Some(block),
            _marker: PhantomData,
        }
    }
}

impl<T> Shared<T> {
    /// Allocates a single memory block holding both the bookkeeping and `value`, and places `value` into it.
    ///
    /// This is the co-located construction path: one allocation, instead of the two an adopting constructor implies.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_new` to handle failures gracefully.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap()
    }

    /// Attempts to allocate a single memory block holding both the bookkeeping and `value`.
    ///
    /// Returns an error if the allocation fails, dropping `value`. Use `new` for a panicking version instead.
    pub fn try_new(value: T) -> Result<Self, HandleError> {
        let (block, observed) = block::new_in_place(value)?;

        Ok(Self {
            observed: Some(observed),
            block: Some(block),
            _marker: PhantomData,
        })
    }
}

impl<T> Shared<T>
where
    T: ?Sized,
{
    /// Adopts a boxed object, to be released through [`BoxDeleter`].
    ///
    /// #   Panics
    ///
    /// If there is not enough memory for the control block. Use `try_from_box` to handle failures gracefully.
    #[inline(always)]
    pub fn from_box(value: Box<T>) -> Self {
        Self::try_from_box(value).unwrap()
    }

    /// Attempts to adopt a boxed object, to be released through [`BoxDeleter`].
    ///
    /// Returns an error if the control block cannot be allocated, releasing `value`. Use `from_box` for a panicking
    /// version instead.
    pub fn try_from_box(value: Box<T>) -> Result<Self, HandleError> {
        //  Safety:
        //  -   NonNull: `Box::into_raw` never returns null.
        let target = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };

        //  Safety:
        //  -   BoxOrigin: `target` was just obtained from `Box::into_raw`.
        //  -   Unowned: ownership was released by `Box::into_raw`, and is reclaimed below on failure.
        match unsafe { Self::try_from_raw(target) } {
            Ok(this) => Ok(this),
            Err(error) => {
                //  Safety:
                //  -   BoxOrigin: as above; no block was created, so ownership is still ours to reclaim.
                drop(unsafe { Box::from_raw(target.as_ptr()) });

                Err(error)
            }
        }
    }

    /// Adopts a raw allocation, to be released through [`BoxDeleter`].
    ///
    /// #   Panics
    ///
    /// If there is not enough memory for the control block. Use `try_from_raw` to handle failures gracefully.
    ///
    /// #   Safety
    ///
    /// -   BoxOrigin: `target` was obtained from `Box::into_raw`.
    /// -   Unowned: nothing else owns or releases `target`; the handles assume sole ownership.
    #[inline(always)]
    pub unsafe fn from_raw(target: NonNull<T>) -> Self {
        //  Safety:
        //  -   BoxOrigin, Unowned: as per pre-condition.
        unsafe { Self::try_from_raw(target) }.unwrap()
    }

    /// Attempts to adopt a raw allocation, to be released through [`BoxDeleter`].
    ///
    /// Returns an error if the control block cannot be allocated; `target` is then untouched, and still the
    /// caller's to release.
    ///
    /// #   Safety
    ///
    /// -   BoxOrigin: `target` was obtained from `Box::into_raw`.
    /// -   Unowned: nothing else owns or releases `target`; the handles assume sole ownership.
    #[inline(always)]
    pub unsafe fn try_from_raw(target: NonNull<T>) -> Result<Self, HandleError> {
        //  Safety:
        //  -   Valid: as per BoxOrigin and Unowned; `BoxDeleter` releases exactly what `Box::into_raw` produced.
        unsafe { Self::try_from_raw_with(target, BoxDeleter) }
    }

    /// Adopts a raw object, to be released through `deleter`.
    ///
    /// The deleter enables non-default cleanup: returning the object to a pool, or [`NoopDeleter`] for storage
    /// owned elsewhere.
    ///
    /// [`NoopDeleter`]: crate::NoopDeleter
    ///
    /// #   Panics
    ///
    /// If there is not enough memory for the control block. Use `try_from_raw_with` to handle failures gracefully.
    ///
    /// #   Safety
    ///
    /// -   Valid: `target` is valid for reads until `deleter` releases it, and `deleter` is a correct way to release
    ///     it.
    /// -   Unowned: nothing else releases `target` while any handle remains.
    /// -   DeleterLifetime: `deleter`, and anything it borrows, outlives the last handle on the block, strong or
    ///     weak.
    #[inline(always)]
    pub unsafe fn from_raw_with<D>(target: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T>,
    {
        //  Safety:
        //  -   Valid, Unowned, DeleterLifetime: as per pre-condition.
        unsafe { Self::try_from_raw_with(target, deleter) }.unwrap()
    }

    /// Attempts to adopt a raw object, to be released through `deleter`.
    ///
    /// Returns an error if the control block cannot be allocated; `target` is then untouched, and still the
    /// caller's to release.
    ///
    /// #   Safety
    ///
    /// -   Valid: `target` is valid for reads until `deleter` releases it, and `deleter` is a correct way to release
    ///     it.
    /// -   Unowned: nothing else releases `target` while any handle remains.
    /// -   DeleterLifetime: `deleter`, and anything it borrows, outlives the last handle on the block, strong or
    ///     weak.
    pub unsafe fn try_from_raw_with<D>(target: NonNull<T>, deleter: D) -> Result<Self, HandleError>
    where
        D: Deleter<T>,
    {
        let block = block::new_separate(target, deleter)?;

        Ok(Self {
            observed: Some(target),
            block: Some(block),
            _marker: PhantomData,
        })
    }
}

//
//  Aliasing
//

impl<T> Shared<T>
where
    T: ?Sized,
{
    /// Constructs a handle observing a projection of this handle's target, typically a field.
    ///
    /// The new handle shares this handle's block: it keeps the whole owned object alive, while `get` and
    /// dereferencing see the projected part only. Unsizing projections, such as `|v| v as &dyn Trait`, turn a handle
    /// to a concrete type into a handle to a trait object.
    ///
    /// #   Panics
    ///
    /// If `this` is empty: there is nothing to project through.
    pub fn map<U, F>(this: &Self, project: F) -> Shared<U>
    where
        U: ?Sized,
        F: FnOnce(&T) -> &U,
    {
        let (Some(value), Some(block)) = (Self::as_ref(this), this.block) else {
            panic!("cannot project through an empty handle");
        };

        let observed = NonNull::from(project(value));

        //  Safety:
        //  -   Lifetime: `this` keeps the block alive.
        let count = unsafe { block.as_ref() }.count();

        //  Safety:
        //  -   Accounting: the handle constructed below is one more strong handle.
        unsafe { count.increment_strong() };

        Shared {
            observed: Some(observed),
            block: Some(block),
            _marker: PhantomData,
        }
    }

    /// Constructs a handle observing `observed` while sharing `other`'s block.
    ///
    /// This is the raw-address form of [`Shared::map`], for addresses that cannot be expressed as a borrow
    /// projection.
    ///
    /// #   Safety
    ///
    /// -   NonEmpty: `other` is not empty.
    /// -   Reachable: `observed` stays valid for reads for as long as `other`'s target is alive.
    pub unsafe fn alias<U>(other: &Shared<U>, observed: NonNull<T>) -> Self
    where
        U: ?Sized,
    {
        debug_assert!(other.block.is_some());

        let block = other.block;

        if let Some(block) = block {
            //  Safety:
            //  -   Lifetime: `other` keeps the block alive.
            let count = unsafe { block.as_ref() }.count();

            //  Safety:
            //  -   Accounting: the handle constructed below is one more strong handle.
            unsafe { count.increment_strong() };
        }

        Self {
            observed: Some(observed),
            block,
            _marker: PhantomData,
        }
    }
}

//
//  Observers
//

impl<T> Shared<T>
where
    T: ?Sized,
{
    /// Returns the observed address, or `None` for an empty handle.
    #[inline(always)]
    pub fn get(this: &Self) -> Option<NonNull<T>> {
        this.observed
    }

    /// Returns a reference to the observed object, or `None` for an empty handle.
    #[inline(always)]
    pub fn as_ref(this: &Self) -> Option<&T> {
        //  Safety:
        //  -   Convertible: a live strong handle keeps the payload alive, and the observed address points either at
        //      the managed payload or at an address its constructor vouched for.
        this.observed.map(|observed| unsafe { &*observed.as_ptr() })
    }

    /// Returns whether the handle is empty, observing nothing.
    #[inline(always)]
    pub fn is_empty(this: &Self) -> bool {
        this.observed.is_none()
    }

    /// Returns the number of strong handles on the block, or 0 for an empty handle.
    #[inline(always)]
    pub fn strong_count(this: &Self) -> usize {
        //  Safety:
        //  -   Lifetime: `this` keeps the block alive.
        this.block.map_or(0, |block| unsafe { block.as_ref() }.count().strong())
    }

    /// Returns the number of weak handles on the block, or 0 for an empty handle.
    #[inline(always)]
    pub fn weak_count(this: &Self) -> usize {
        //  Safety:
        //  -   Lifetime: `this` keeps the block alive.
        this.block.map_or(0, |block| unsafe { block.as_ref() }.count().weak())
    }

    /// Returns whether two handles observe the same address.
    ///
    /// Two empty handles observe the same (absent) address. Handles sharing a block but observing different
    /// projections are not equal by this measure.
    pub fn ptr_eq<U>(this: &Self, other: &Shared<U>) -> bool
    where
        U: ?Sized,
    {
        let this = this.observed.map(|observed| observed.cast::<()>());
        let other = other.observed.map(|observed| observed.cast::<()>());

        this == other
    }
}

//
//  Modifiers
//

impl<T> Shared<T>
where
    T: ?Sized,
{
    /// Releases the handle's share of ownership, leaving it empty.
    ///
    /// Adopting a new resource is plain reassignment.
    #[inline(always)]
    pub fn reset(this: &mut Self) {
        *this = Self::empty();
    }

    /// Constructs a weak, observing handle on this handle's block.
    pub fn downgrade(this: &Self) -> Weak<T> {
        if let Some(block) = this.block {
            //  Safety:
            //  -   Lifetime: `this` keeps the block alive.
            let count = unsafe { block.as_ref() }.count();

            //  Safety:
            //  -   Accounting: the handle constructed below is one more weak handle.
            unsafe { count.increment_weak() };
        }

        //  Safety:
        //  -   Accounting: the weak count was incremented above, unless the handle is empty.
        unsafe { Weak::from_parts(this.observed, this.block) }
    }
}

//
//  Clone
//

impl<T> Clone for Shared<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            //  Safety:
            //  -   Lifetime: `self` keeps the block alive.
            let count = unsafe { block.as_ref() }.count();

            //  Safety:
            //  -   Accounting: the handle constructed below is one more strong handle.
            unsafe { count.increment_strong() };
        }

        Self {
            observed: self.observed,
            block: self.block,
            _marker: PhantomData,
        }
    }
}

//
//  Destruction
//

impl<T> Drop for Shared<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        let Some(block) = self.block else { return };

        //  Safety:
        //  -   Lifetime: the resulting reference is not used after `decrement_strong`.
        let count = unsafe { block.as_ref() }.count();

        debug_assert!(count.strong() > 0);

        self.observed = None;

        //  Safety:
        //  -   Accounting: only invoked by `decrement_strong`, when the strong count reaches 0.
        //  -   Liveness: the block outlives its last handle.
        let destroy = move || unsafe { BlockHeader::destroy(block) };

        //  Safety:
        //  -   Accounting: only invoked by `decrement_strong`, when both counts reach 0.
        //  -   EndOfLife: this was the last handle of either kind, nothing accesses the block afterwards.
        let deallocate = move || unsafe { BlockHeader::deallocate(block) };

        //  Safety:
        //  -   Accounting: one less strong handle exists after this.
        //  -   Lifetime: `count` is not used after this call.
        unsafe { count.decrement_strong(destroy, deallocate) };
    }
}

//
//  Value Access
//

impl<T> ops::Deref for Shared<T>
where
    T: ?Sized,
{
    type Target = T;

    /// #   Panics
    ///
    /// If the handle is empty; dereferencing nothing is a precondition violation.
    fn deref(&self) -> &T {
        let Some(value) = Shared::as_ref(self) else {
            panic!("dereferenced an empty handle");
        };

        value
    }
}

//
//  Formatting
//

impl<T> fmt::Debug for Shared<T>
where
    T: ?Sized + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Shared::as_ref(self) {
            Some(value) => f.debug_tuple("Shared").field(&value).finish(),
            None => f.write_str("Shared(<empty>)"),
        }
    }
}

//
//  Identity
//

impl<T> Default for Shared<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Eq for Shared<T> where T: ?Sized + Eq {}

impl<T> PartialEq for Shared<T>
where
    T: ?Sized + PartialEq,
{
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        Shared::as_ref(self) == Shared::as_ref(other)
    }
}

impl<T> hash::Hash for Shared<T>
where
    T: ?Sized + hash::Hash,
{
    #[inline(always)]
    fn hash<HS>(&self, hasher: &mut HS)
    where
        HS: hash::Hasher,
    {
        Shared::as_ref(self).hash(hasher);
    }
}

//
//  Ordering
//

impl<T> Ord for Shared<T>
where
    T: ?Sized + Ord,
{
    #[inline(always)]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Shared::as_ref(self).cmp(&Shared::as_ref(other))
    }
}

impl<T> PartialOrd for Shared<T>
where
    T: ?Sized + PartialOrd,
{
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Shared::as_ref(self).partial_cmp(&Shared::as_ref(other))
    }
}

// mod tests
