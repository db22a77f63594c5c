//! The observing handle.
//!
//! A `Weak<T>` never keeps its target alive: it observes a block without owning the payload, detects the payload's
//! destruction, and can attempt to re-acquire ownership while the payload still lives. The block itself stays
//! allocated for as long as any handle of either kind remains.

use core::{fmt, ptr::NonNull};

use crate::{block::BlockHeader, shared::Shared};

/// A counted, observing handle to a heap-allocated object.
///
/// The target may be destroyed while the handle exists; [`Weak::upgrade`] re-acquires ownership if it has not been.
pub struct Weak<T>
where
    T: ?Sized,
{
    observed: Option<NonNull<T>>,
    block: Option<NonNull<BlockHeader>>,
}

//
//  Construction
//

impl<T> Weak<T>
where
    T: ?Sized,
{
    /// Constructs an empty handle, observing nothing.
    ///
    /// An empty handle is expired from the start, and never upgrades.
    pub const fn empty() -> Self {
        Self {
            observed: None,
            block: None,
        }
    }

    //  Safety:
    //  -   Accounting: the weak count of `block`, if any, was already incremented for this handle.
    pub(crate) unsafe fn from_parts(observed: Option<NonNull<T>>, block: Option<NonNull<BlockHeader>>) -> Self {
        Self { observed, block }
    }
}

//
//  Promotion
//

impl<T> Weak<T>
where
    T: ?Sized,
{
    /// Attempts to re-acquire ownership of the target.
    ///
    /// Returns `None` if the target has already been destroyed; a destroyed target is never resurrected. Otherwise
    /// the returned handle owns a fresh share: the strong count is one higher than before.
    pub fn upgrade(this: &Self) -> Option<Shared<T>> {
        let block = this.block?;

        //  Safety:
        //  -   Lifetime: `this` keeps the block alive.
        let count = unsafe { block.as_ref() }.count();

        //  Safety:
        //  -   Accounting: on success, the handle constructed below is one more strong handle. The zero-check and
        //      the increment are a single step; an expired block is left untouched.
        let promoted = unsafe { count.try_increment_strong() };

        //  Safety:
        //  -   Accounting: the strong count was incremented above.
        //  -   Observed: the payload is alive, the observed address is the one the originating strong handle held.
        promoted.then(|| unsafe { Shared::from_observation(this.observed, block) })
    }
}

//
//  Observers
//

impl<T> Weak<T>
where
    T: ?Sized,
{
    /// Returns whether the handle is empty, observing nothing.
    ///
    /// An empty handle is distinct from an expired one: an expired handle still observes a block whose payload is
    /// gone.
    #[inline(always)]
    pub fn is_empty(this: &Self) -> bool {
        this.block.is_none()
    }

    /// Returns the number of strong handles on the block, or 0 for an empty handle.
    ///
    /// This reflects the owning side; the handle itself contributes nothing to it.
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

    /// Returns whether the target is gone: destroyed, or never observed at all.
    #[inline(always)]
    pub fn expired(this: &Self) -> bool {
        Self::strong_count(this) == 0
    }

    /// Returns whether two handles observe the same address.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        let this = this.observed.map(|observed| observed.cast::<()>());
        let other = other.observed.map(|observed| observed.cast::<()>());

        this == other
    }
}

//
//  Modifiers
//

impl<T> Weak<T>
where
    T: ?Sized,
{
    /// Releases the handle's observation, leaving it empty.
    #[inline(always)]
    pub fn reset(this: &mut Self) {
        *this = Self::empty();
    }
}

//
//  Clone
//

impl<T> Clone for Weak<T>
where
    T: ?Sized,
{
    fn clone(&self) -> Self {
        if let Some(block) = self.block {
            //  Safety:
            //  -   Lifetime: `self` keeps the block alive.
            let count = unsafe { block.as_ref() }.count();

            //  Safety:
            //  -   Accounting: the handle constructed below is one more weak handle.
            unsafe { count.increment_weak() };
        }

        Self {
            observed: self.observed,
            block: self.block,
        }
    }
}

//
//  Destruction
//

impl<T> Drop for Weak<T>
where
    T: ?Sized,
{
    fn drop(&mut self) {
        let Some(block) = self.block else { return };

        //  Safety:
        //  -   Lifetime: the resulting reference is not used after `decrement_weak`.
        let count = unsafe { block.as_ref() }.count();

        debug_assert!(count.weak() > 0);

        //  Safety:
        //  -   Accounting: only invoked by `decrement_weak`, when both counts reach 0.
        //  -   EndOfLife: this was the last handle of either kind, nothing accesses the block afterwards.
        let deallocate = move || unsafe { BlockHeader::deallocate(block) };

        //  Safety:
        //  -   Accounting: one less weak handle exists after this.
        //  -   Lifetime: `count` is not used after this call.
        unsafe { count.decrement_weak(deallocate) };
    }
}

//
//  Formatting
//

impl<T> fmt::Debug for Weak<T>
where
    T: ?Sized,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str("(Weak)")
    }
}

//
//  Identity
//

impl<T> Default for Weak<T>
where
    T: ?Sized,
{
    fn default() -> Self {
        Self::empty()
    }
}

// mod tests
