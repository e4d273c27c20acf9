//! Circular lists of buffers that have reusable element slots.
//!
//! Each buffer type owns a [`FreeListAnchor`]. Active buffers with a
//! non-empty local free list are linked into a circular, doubly-linked
//! ring hanging off the anchor, so a writer looking for a reusable slot
//! can find one in O(1). Links are buffer ids stored in each buffer's
//! [`FreeListLinks`]; the ring never holds references.
//!
//! The anchor always points at the most recently linked buffer. Unlinking
//! the head moves the anchor to its successor; unlinking the last member
//! empties the anchor.

use clusterstore_core::BufferId;
use tracing::trace;

/// Ring links of one buffer. Both set iff the buffer is a ring member.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FreeListLinks {
    prev: Option<BufferId>,
    next: Option<BufferId>,
}

impl FreeListLinks {
    /// Whether the owning buffer is linked into a ring.
    pub fn is_linked(&self) -> bool {
        self.next.is_some()
    }

    /// Predecessor in the ring.
    pub fn prev(&self) -> Option<BufferId> {
        self.prev
    }

    /// Successor in the ring.
    pub fn next(&self) -> Option<BufferId> {
        self.next
    }
}

/// Mutable access to the links of every buffer that may join a ring.
pub trait LinkTable {
    /// Links of `buffer`.
    fn links(&self, buffer: BufferId) -> &FreeListLinks;

    /// Mutable links of `buffer`.
    fn links_mut(&mut self, buffer: BufferId) -> &mut FreeListLinks;
}

impl LinkTable for [FreeListLinks] {
    fn links(&self, buffer: BufferId) -> &FreeListLinks {
        &self[buffer.index()]
    }

    fn links_mut(&mut self, buffer: BufferId) -> &mut FreeListLinks {
        &mut self[buffer.index()]
    }
}

/// Head of one type's ring of buffers with free slots.
#[derive(Debug, Default)]
pub struct FreeListAnchor {
    head: Option<BufferId>,
}

impl FreeListAnchor {
    /// An empty anchor.
    pub fn new() -> Self {
        Self { head: None }
    }

    /// The most recently linked member.
    pub fn head(&self) -> Option<BufferId> {
        self.head
    }

    /// Whether no buffer is linked.
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Link `buffer` into the ring and make it the head.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is already linked.
    pub fn link<T: LinkTable + ?Sized>(&mut self, buffer: BufferId, table: &mut T) {
        assert!(self.head != Some(buffer), "buffer {buffer} already heads the free list");
        assert!(
            !table.links(buffer).is_linked(),
            "buffer {buffer} already linked into a free list"
        );
        let links = match self.head {
            Some(next) => {
                let prev = table.links(next).prev;
                let Some(prev) = prev else {
                    panic!("free list head {next} has no predecessor");
                };
                table.links_mut(next).prev = Some(buffer);
                table.links_mut(prev).next = Some(buffer);
                FreeListLinks {
                    prev: Some(prev),
                    next: Some(next),
                }
            }
            None => FreeListLinks {
                prev: Some(buffer),
                next: Some(buffer),
            },
        };
        *table.links_mut(buffer) = links;
        self.head = Some(buffer);
        trace!(%buffer, "linked into free list");
    }

    /// Unlink `buffer` from the ring.
    ///
    /// # Panics
    ///
    /// Panics if `buffer` is not linked.
    pub fn unlink<T: LinkTable + ?Sized>(&mut self, buffer: BufferId, table: &mut T) {
        let FreeListLinks {
            prev: Some(prev),
            next: Some(next),
        } = *table.links(buffer)
        else {
            panic!("buffer {buffer} is not linked into a free list");
        };
        if next == buffer {
            assert_eq!(prev, buffer, "single-member ring must be self-linked");
            assert_eq!(self.head, Some(buffer), "single-member ring not anchored here");
            self.head = None;
        } else {
            assert_ne!(prev, buffer, "ring predecessor points at itself");
            self.head = Some(next);
            table.links_mut(next).prev = Some(prev);
            table.links_mut(prev).next = Some(next);
        }
        *table.links_mut(buffer) = FreeListLinks::default();
        trace!(%buffer, "unlinked from free list");
    }

    /// Ring members in order, starting at the head.
    pub fn members<T: LinkTable + ?Sized>(&self, table: &T) -> Vec<BufferId> {
        let mut out = Vec::new();
        let Some(head) = self.head else {
            return out;
        };
        let mut cursor = head;
        loop {
            out.push(cursor);
            match table.links(cursor).next {
                Some(next) if next != head => cursor = next,
                _ => break,
            }
        }
        out
    }
}

impl Drop for FreeListAnchor {
    fn drop(&mut self) {
        if !std::thread::panicking() {
            assert!(
                self.head.is_none(),
                "free list anchor dropped while buffers are still linked"
            );
        }
    }
}
