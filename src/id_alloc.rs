//! Dense, builder-scoped ID allocation.
//!
//! Every `Operator` factory owns one `IdAllocator` for the lifetime of its
//! local build; nothing here is process-wide. The Composer rebases a whole
//! finished sub-graph at once via [`IdAllocator::rebase`] rather than
//! threading a global counter through every factory.

/// Monotonic counter, local to one builder.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: i32,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    /// Hand out the next id and advance the counter.
    pub fn next_id(&mut self) -> i32 {
        let id = self.next;
        self.next += 1;
        id
    }

    /// The next id that would be handed out — equivalently, the number of
    /// ids allocated so far.
    pub fn current(&self) -> i32 {
        self.next
    }
}

/// Returns a function that adds `delta` to an id or dependency value.
/// Rebasing twice (by `d1` then `d2`) is equivalent to rebasing once by
/// `d1 + d2`, since this is just integer addition.
pub fn rebase(delta: i32) -> impl Fn(i32) -> i32 {
    move |id| id + delta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hands_out_dense_sequential_ids() {
        let mut alloc = IdAllocator::new();
        assert_eq!(alloc.next_id(), 0);
        assert_eq!(alloc.next_id(), 1);
        assert_eq!(alloc.next_id(), 2);
        assert_eq!(alloc.current(), 3);
    }

    #[test]
    fn rebasing_twice_equals_rebasing_by_the_sum() {
        let twice = |id: i32| rebase(5)(rebase(7)(id));
        let once = rebase(12);
        for id in 0..10 {
            assert_eq!(twice(id), once(id));
        }
    }
}
