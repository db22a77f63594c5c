//! Handles the actual memory finnicky details of the control blocks.
//!
//! A control block is a single heap allocation fronted by a `BlockHeader`: the strong/weak count, plus the destroy
//! and deallocate operations selected at construction time for the block's concrete shape. Handles only ever hold a
//! thin `NonNull<BlockHeader>` and dispatch through the header, so the shape (and any deleter type) stays erased.
//!
//! Two shapes exist:
//!
//! -   `SeparateBlock<T, D>`: adopts an independently-allocated object, released through a deleter `D`.
//! -   `InPlaceBlock<T>`: stores the object inline, in the same allocation as the header.
//!
//! Destroying releases the payload only; the block's own storage is freed separately, once no handle of either kind
//! remains.

use core::{
    alloc::Layout,
    cell::{Cell, UnsafeCell},
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use alloc::alloc::{alloc, dealloc};

use crate::{count::HandleCount, deleter::Deleter, error::HandleError};

/// The header fronting every control block.
pub(crate) struct BlockHeader {
    count: HandleCount,
    destroy: unsafe fn(NonNull<BlockHeader>),
    deallocate: unsafe fn(NonNull<BlockHeader>),
}

impl BlockHeader {
    /// Returns the block's count.
    #[inline(always)]
    pub(crate) fn count(&self) -> &HandleCount {
        &self.count
    }

    /// Destroys the block's payload, leaving the block's own storage untouched.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the strong count of `block` has reached 0, and for an in-place block this is the first call.
    /// -   Liveness: `block` has not been deallocated.
    pub(crate) unsafe fn destroy(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Liveness: as per pre-condition.
        let destroy = unsafe { block.as_ref() }.destroy;

        //  Safety:
        //  -   Accounting: as per pre-condition.
        //  -   Shape: `destroy` was selected at construction for this very block.
        unsafe { destroy(block) }
    }

    /// Frees the block's storage.
    ///
    /// #   Safety
    ///
    /// -   Accounting: both counts of `block` have reached 0, and the payload has been destroyed.
    /// -   EndOfLife: `block`, and any copy of it, SHALL never be accessed again after this call.
    pub(crate) unsafe fn deallocate(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Liveness: not deallocated yet, as per EndOfLife.
        let deallocate = unsafe { block.as_ref() }.deallocate;

        //  Safety:
        //  -   Accounting & EndOfLife: as per pre-condition.
        //  -   Shape: `deallocate` was selected at construction for this very block.
        unsafe { deallocate(block) }
    }
}

/// A block adopting an independently-allocated object.
///
/// The header comes first so that a pointer to the block is a pointer to its header.
#[repr(C)]
pub(crate) struct SeparateBlock<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    header: BlockHeader,
    target: Cell<Option<NonNull<T>>>,
    deleter: D,
}

impl<T, D> SeparateBlock<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    //  Safety:
    //  -   Shape: `block` fronts a `SeparateBlock<T, D>`.
    //  -   Accounting: the strong count reached 0.
    unsafe fn destroy(block: NonNull<BlockHeader>) {
        let block = block.cast::<SeparateBlock<T, D>>();

        //  Safety:
        //  -   Shape: as per pre-condition.
        let block = unsafe { block.as_ref() };

        //  Taking the target first makes a second destroy a no-op.
        if let Some(target) = block.target.take() {
            //  Safety:
            //  -   Target: the address the block was constructed with, not yet released since the cell was still set.
            //  -   EndOfLife: the cell is cleared, nothing dereferences the target anymore.
            unsafe { block.deleter.delete(target) };
        }
    }

    //  Safety:
    //  -   Shape: `block` fronts a `SeparateBlock<T, D>`.
    //  -   Accounting & EndOfLife: as per `BlockHeader::deallocate`.
    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Shape, Accounting, EndOfLife: as per pre-condition.
        unsafe { deallocate_block(block.cast::<SeparateBlock<T, D>>()) }
    }
}

/// A block storing its object inline, next to the header.
#[repr(C)]
pub(crate) struct InPlaceBlock<T> {
    header: BlockHeader,
    slot: UnsafeCell<MaybeUninit<T>>,
}

impl<T> InPlaceBlock<T> {
    //  Safety:
    //  -   Shape: `block` fronts an `InPlaceBlock<T>`.
    //  -   Accounting: the strong count reached 0, and this is the first call; the counting protocol never destroys
    //      an in-place payload twice.
    unsafe fn destroy(block: NonNull<BlockHeader>) {
        let block = block.cast::<InPlaceBlock<T>>();

        //  Safety:
        //  -   Shape: as per pre-condition.
        let slot = unsafe { block.as_ref() }.slot.get();

        //  Safety:
        //  -   Initialized: the slot was filled at construction, and per Accounting was not dropped yet.
        unsafe { ptr::drop_in_place(slot.cast::<T>()) };
    }

    //  Safety:
    //  -   Shape: `block` fronts an `InPlaceBlock<T>`.
    //  -   Accounting & EndOfLife: as per `BlockHeader::deallocate`.
    unsafe fn deallocate(block: NonNull<BlockHeader>) {
        //  Safety:
        //  -   Shape, Accounting, EndOfLife: as per pre-condition.
        unsafe { deallocate_block(block.cast::<InPlaceBlock<T>>()) }
    }
}

/// Allocates a block adopting `target`, to be released through `deleter`.
///
/// The fresh block counts one strong handle and no weak handle.
pub(crate) fn new_separate<T, D>(target: NonNull<T>, deleter: D) -> Result<NonNull<BlockHeader>, HandleError>
where
    T: ?Sized,
    D: Deleter<T>,
{
    let header = BlockHeader {
        count: HandleCount::new(),
        destroy: SeparateBlock::<T, D>::destroy,
        deallocate: SeparateBlock::<T, D>::deallocate,
    };

    let block = SeparateBlock {
        header,
        target: Cell::new(Some(target)),
        deleter,
    };

    //  On failure the deleter is dropped without running; the target stays with the caller.
    allocate(block).map(|block| block.cast()).map_err(|(error, _block)| error)
}

/// Allocates a block holding `value` inline, in one allocation.
///
/// Returns the block and the address of the embedded value. The fresh block counts one strong handle and no weak
/// handle; the value is complete before the block becomes reachable.
pub(crate) fn new_in_place<T>(value: T) -> Result<(NonNull<BlockHeader>, NonNull<T>), HandleError> {
    let header = BlockHeader {
        count: HandleCount::new(),
        destroy: InPlaceBlock::<T>::destroy,
        deallocate: InPlaceBlock::<T>::deallocate,
    };

    let block = InPlaceBlock {
        header,
        slot: UnsafeCell::new(MaybeUninit::new(value)),
    };

    let block = match allocate(block) {
        Ok(block) => block,
        Err((error, block)) => {
            //  The slot would otherwise swallow the value's destructor.
            //  Safety:
            //  -   Initialized: the slot was just filled above.
            drop(unsafe { block.slot.into_inner().assume_init() });

            return Err(error);
        }
    };

    //  Safety:
    //  -   Liveness: freshly allocated.
    let slot = unsafe { block.as_ref() }.slot.get();

    //  Safety:
    //  -   NonNull: derived from `block`, which is non-null.
    let value = unsafe { NonNull::new_unchecked(slot.cast::<T>()) };

    Ok((block.cast(), value))
}

//
//  Implementation
//

//  Safety:
//  -   Suitable: on success, the returned pointer fronts a properly initialized, properly aligned `B`.
//
//  On failure, returns `block` so the caller may salvage its contents.
fn allocate<B>(block: B) -> Result<NonNull<B>, (HandleError, B)> {
    let layout = Layout::new::<B>();

    //  Safety:
    //  -   NonZero: a block always carries its header, its layout is never zero-sized.
    let ptr = unsafe { alloc(layout) };

    let Some(ptr) = NonNull::new(ptr.cast::<B>()) else {
        return Err((HandleError::MemoryExhausted, block));
    };

    //  Safety:
    //  -   Suitable: freshly allocated with the layout of `B`.
    unsafe { ptr.as_ptr().write(block) };

    Ok(ptr)
}

//  Safety:
//  -   Suitable: `block` was returned by `allocate::<B>`.
//  -   EndOfLife: `block`, and any copy of it, SHALL never be accessed again after this call.
unsafe fn deallocate_block<B>(block: NonNull<B>) {
    let layout = Layout::new::<B>();

    //  Safety:
    //  -   Valid: per Suitable, and dropped only here per EndOfLife. For blocks, this drops the deleter, if any;
    //      the payload was destroyed beforehand.
    unsafe { ptr::drop_in_place(block.as_ptr()) };

    //  Safety:
    //  -   SameAllocator & FitLayout: allocated by `allocate` with this very layout.
    unsafe { dealloc(block.as_ptr().cast(), layout) };
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    #[test]
    fn separate_destroy_is_idempotent() {
        let deletions = Cell::new(0);
        let target = Box::into_raw(Box::new(42u32));

        //  Safety: `target` is a fresh allocation.
        let target = unsafe { NonNull::new_unchecked(target) };

        let deleter = |target: NonNull<u32>| {
            deletions.set(deletions.get() + 1);

            //  Safety: `target` originates from `Box::into_raw`, and the deleter runs at most once.
            drop(unsafe { Box::from_raw(target.as_ptr()) });
        };

        let block = new_separate(target, &deleter).expect("allocation");

        //  Safety: the block is live; a second destroy on a separate block is a structural no-op.
        unsafe {
            BlockHeader::destroy(block);
            BlockHeader::destroy(block);
        }

        assert_eq!(1, deletions.get());

        //  Safety: counts are not consulted here; the payload is destroyed and the block is never used again.
        unsafe { BlockHeader::deallocate(block) };
    }

    #[test]
    fn in_place_destroy_then_deallocate() {
        //  A String payload: Miri errors out with a leak if the destructor is skipped, and with a use-after-free if
        //  it runs twice.
        let (block, value) = new_in_place(String::from("Hello, World!")).expect("allocation");

        //  Safety: the block is live, freshly created.
        assert_eq!("Hello, World!", unsafe { value.as_ref() });

        //  Safety: first and only destroy; the block is never used again after deallocation.
        unsafe {
            BlockHeader::destroy(block);
            BlockHeader::deallocate(block);
        }
    }

    #[test]
    fn deallocate_drops_deleter() {
        struct Probe<'a>(&'a Cell<bool>);

        impl Drop for Probe<'_> {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        impl<'a> Deleter<u32> for Probe<'a> {
            unsafe fn delete(&self, _target: NonNull<u32>) {}
        }

        let dropped = Cell::new(false);
        let mut payload = 7u32;

        let block = new_separate(NonNull::from(&mut payload), Probe(&dropped)).expect("allocation");

        //  Safety: single destroy, then the block is never used again.
        unsafe {
            BlockHeader::destroy(block);
            BlockHeader::deallocate(block);
        }

        assert!(dropped.get());
    }
} // mod tests
