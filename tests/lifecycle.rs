//! End-to-end ownership scenarios.
//!
//! Each scenario drives the full handle lifecycle: construction, sharing, observation, destruction, and the final
//! release of the block. Payload destructors are tracked so that a missed or doubled destruction fails the test,
//! and Miri flags any leak or use-after-free of the block itself.

use std::cell::{Cell, RefCell};

use counted::{Shared, Weak};

struct DropProbe<'a>(&'a Cell<u32>);

impl Drop for DropProbe<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get() + 1);
    }
}

#[test]
fn shared_copy_then_staggered_release() {
    //  Construct from a heap object, copy, then release one side at a time: the payload must survive until the very
    //  last owner goes, and be destroyed exactly once.

    let destructions = Cell::new(0);

    let first = Shared::from_box(Box::new(DropProbe(&destructions)));

    assert_eq!(1, Shared::strong_count(&first));

    let second = Shared::clone(&first);

    assert_eq!(2, Shared::strong_count(&first));
    assert_eq!(2, Shared::strong_count(&second));

    drop(first);

    assert_eq!(1, Shared::strong_count(&second));
    assert_eq!(0, destructions.get());

    drop(second);

    assert_eq!(1, destructions.get());
}

#[test]
fn observer_expires_with_the_last_owner() {
    //  An observer on a single-owner block: destroying the owner destroys the payload despite the observer, expires
    //  it, and promotion then yields nothing.

    let destructions = Cell::new(0);

    let owner = Shared::new(DropProbe(&destructions));
    let observer = Shared::downgrade(&owner);

    assert!(!Weak::expired(&observer));

    drop(owner);

    assert_eq!(1, destructions.get());
    assert!(Weak::expired(&observer));
    assert!(Weak::upgrade(&observer).is_none());
}

#[test]
fn observer_never_affects_the_strong_count() {
    let owner = Shared::new(42u32);
    let observer = Shared::downgrade(&owner);
    let another = Weak::clone(&observer);

    assert_eq!(1, Shared::strong_count(&owner));
    assert_eq!(2, Shared::weak_count(&owner));

    drop(observer);
    drop(another);

    assert_eq!(1, Shared::strong_count(&owner));
    assert_eq!(0, Shared::weak_count(&owner));
}

#[test]
fn factory_builds_a_complete_payload() {
    //  Co-located construction: the payload is fully initialized from its inputs, and a single release tears down
    //  payload and block together. Miri flags a leak if either half of the allocation survives.

    struct Payload {
        name: String,
        capacity: usize,
    }

    impl Payload {
        fn new(name: &str, capacity: usize) -> Self {
            Self {
                name: String::from(name),
                capacity,
            }
        }
    }

    let handle = Shared::new(Payload::new("reactor", 128));

    assert_eq!(1, Shared::strong_count(&handle));
    assert_eq!("reactor", handle.name);
    assert_eq!(128, handle.capacity);

    drop(handle);
}

#[test]
fn projection_outlives_its_owner_handle() {
    //  A handle projected onto a field keeps the whole object alive after every handle to the whole is gone.

    let destructions = Cell::new(0);

    struct Composite<'a> {
        _probe: DropProbe<'a>,
        label: &'static str,
    }

    let label = {
        let whole = Shared::new(Composite {
            _probe: DropProbe(&destructions),
            label: "part",
        });

        let part = Shared::map(&whole, |composite| &composite.label);

        drop(whole);

        assert_eq!(0, destructions.get());
        assert_eq!(1, Shared::strong_count(&part));

        *part
    };

    assert_eq!("part", label);
    assert_eq!(1, destructions.get());
}

#[test]
fn promotion_window_closes_exactly_at_zero() {
    let owner = Shared::new(String::from("alive"));
    let observer = Shared::downgrade(&owner);

    //  While an owner lives, promotion succeeds and counts.
    let promoted = Weak::upgrade(&observer).expect("still alive");

    assert_eq!(2, Shared::strong_count(&owner));

    drop(owner);

    //  The promoted handle is an owner of its own right.
    assert!(!Weak::expired(&observer));
    assert_eq!("alive", *promoted);

    drop(promoted);

    assert!(Weak::expired(&observer));
}

#[test]
fn payload_observing_its_own_block() {
    //  A payload holding a weak handle onto itself: destroying the last owner runs the payload's destructor, which
    //  in turn releases the last weak handle, handing the block's release to the weak side mid-destruction. The
    //  payload's own promotion attempt must find the block expired.

    struct Node<'a> {
        this: RefCell<Weak<Node<'a>>>,
        probe: &'a Cell<u32>,
    }

    impl Drop for Node<'_> {
        fn drop(&mut self) {
            assert!(Weak::upgrade(&self.this.borrow()).is_none());

            self.probe.set(self.probe.get() + 1);
        }
    }

    let destructions = Cell::new(0);

    let node = Shared::new(Node {
        this: RefCell::new(Weak::empty()),
        probe: &destructions,
    });

    *node.this.borrow_mut() = Shared::downgrade(&node);

    assert_eq!(1, Shared::weak_count(&node));

    drop(node);

    assert_eq!(1, destructions.get());
}
