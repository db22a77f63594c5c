//! Manually counted shared and weak ownership handles.
//!
//! Two handle types share a heap-allocated object through a control block:
//!
//! -   `Shared<T>`: an owning handle. The object lives for as long as any owning handle does.
//! -   `Weak<T>`: an observing handle. It never keeps the object alive, detects its destruction, and can attempt to
//!     re-acquire ownership while the object still lives.
//!
//! #   How to use?
//!
//! `Shared::new` places the value and the bookkeeping in a single allocation; cloning shares ownership, dropping
//! releases it:
//!
//! ```
//! use counted::{Shared, Weak};
//!
//! let first = Shared::new(String::from("Hello, World!"));
//! let second = Shared::clone(&first);
//!
//! assert_eq!(2, Shared::strong_count(&first));
//!
//! let observer = Shared::downgrade(&second);
//!
//! drop(first);
//! drop(second);
//!
//! assert!(Weak::expired(&observer));
//! assert!(Weak::upgrade(&observer).is_none());
//! ```
//!
//! Pre-existing allocations are adopted instead, through `Shared::from_box` or the raw constructors, with a
//! pluggable [`Deleter`] deciding how the object is eventually released.
//!
//! #   Counting protocol
//!
//! Each block carries two counters:
//!
//! -   The strong count is the number of live `Shared` handles. The object is destroyed, exactly once, when it
//!     reaches 0 — outstanding `Weak` handles notwithstanding.
//! -   The weak count is the number of live `Weak` handles. The block itself is freed at the moment both counts are
//!     0, by whichever handle's release observes the second zero.
//!
//! #   Aliasing
//!
//! `Shared::map` (and its raw-address sibling `Shared::alias`) builds a handle observing a part of the owned
//! object — a field, or the object seen as a trait object — while ownership keeps tracking the whole. The observed
//! address and the owning block are deliberately distinct concepts, and distinct fields.
//!
//! #   Thread safety
//!
//! None, by design: the counters are plain `Cell`s, without atomicity, ordering, or locks. Both handle types are
//! `!Send` and `!Sync`, so cross-thread sharing is rejected at compile time rather than documented away.

//  Use only core and alloc, guaranteeing no I/O nor threads.
#![cfg_attr(not(test), no_std)]
//  Ensure unsafe operations are duly checked.
#![deny(unsafe_op_in_unsafe_fn)]
//  Ensure proper documentation.
#![deny(missing_docs)]

//  Non-core must be explicitly depended on in no_std.
extern crate alloc;

mod block;
mod count;
mod deleter;
mod error;
mod shared;
mod weak;

pub use deleter::{BoxDeleter, Deleter, NoopDeleter};
pub use error::HandleError;
pub use shared::Shared;
pub use weak::Weak;
