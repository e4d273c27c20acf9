//! Lifecycle state and element bookkeeping of one buffer slot.
//!
//! A [`BufferState`] is pure data plus the invariants that only involve
//! the buffer itself. Transitions that also touch a type entry or a
//! free-list anchor are driven by [`crate::BufferArena`], which owns every
//! slot and can borrow them alongside the type registry.

use std::fmt;
use std::sync::Arc;

use clusterstore_core::{BufferId, MemoryUsage, TypeId};
use smallvec::SmallVec;

use crate::free_list::{FreeListLinks, LinkTable};
use crate::raw::ElemBuffer;
use crate::view::{BufferReader, PublishedView};

/// Lifecycle state of a buffer.
///
/// A buffer cycles `Free → Active → Hold → Free`; no state is skipped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    /// No memory, no type bound.
    Free,
    /// Memory allocated; accepts appends and slot reuse.
    Active,
    /// Read-only; waiting for readers to drain before release.
    Hold,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => f.write_str("free"),
            Self::Active => f.write_str("active"),
            Self::Hold => f.write_str("hold"),
        }
    }
}

/// Local stack of reusable cluster offsets.
pub(crate) type FreeList = SmallVec<[usize; 4]>;

/// One buffer slot: memory, element counts, lifecycle and free-list
/// membership.
///
/// `used_elems` is the initialised length of the element memory and
/// `alloc_elems` its capacity, so `used_elems <= alloc_elems` holds by
/// construction. `dead_elems <= used_elems` is asserted on every change.
pub struct BufferState<E> {
    pub(crate) state: State,
    pub(crate) buffer: ElemBuffer<E>,
    pub(crate) dead_elems: usize,
    pub(crate) hold_elems: usize,
    pub(crate) free_list: FreeList,
    pub(crate) free_list_anchor: Option<TypeId>,
    pub(crate) links: FreeListLinks,
    pub(crate) type_id: Option<TypeId>,
    pub(crate) cluster_size: usize,
    pub(crate) compacting: bool,
    pub(crate) disable_elem_hold_list: bool,
    view: Arc<PublishedView<E>>,
}

impl<E> BufferState<E> {
    pub(crate) fn new() -> Self {
        Self {
            state: State::Free,
            buffer: ElemBuffer::empty(),
            dead_elems: 0,
            hold_elems: 0,
            free_list: FreeList::new(),
            free_list_anchor: None,
            links: FreeListLinks::default(),
            type_id: None,
            cluster_size: 0,
            compacting: false,
            disable_elem_hold_list: false,
            view: Arc::new(PublishedView::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> State {
        self.state
    }

    /// Whether the buffer is active.
    pub fn is_active(&self) -> bool {
        self.state == State::Active
    }

    /// Whether the buffer is on hold.
    pub fn is_on_hold(&self) -> bool {
        self.state == State::Hold
    }

    /// Whether the buffer is free.
    pub fn is_free(&self) -> bool {
        self.state == State::Free
    }

    /// Elements written so far, reserved ones included.
    pub fn used_elems(&self) -> usize {
        self.buffer.len()
    }

    /// Element capacity of the current allocation.
    pub fn alloc_elems(&self) -> usize {
        self.buffer.capacity()
    }

    /// Elements freed (or reserved) and no longer live.
    pub fn dead_elems(&self) -> usize {
        self.dead_elems
    }

    /// Elements waiting for readers to drain.
    pub fn hold_elems(&self) -> usize {
        self.hold_elems
    }

    /// Capacity left for appends.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    /// Reusable cluster offsets, most recently freed last.
    pub fn free_list(&self) -> &[usize] {
        &self.free_list
    }

    /// The type whose free-list ring this buffer participates in.
    pub fn free_list_anchor(&self) -> Option<TypeId> {
        self.free_list_anchor
    }

    /// Whether the buffer is currently linked into a free-list ring.
    pub fn is_on_free_list(&self) -> bool {
        self.links.is_linked()
    }

    /// Ring links.
    pub fn links(&self) -> FreeListLinks {
        self.links
    }

    /// Bound type while active or on hold.
    pub fn type_id(&self) -> Option<TypeId> {
        self.type_id
    }

    /// Elements per cluster of the bound type (0 while free).
    pub fn cluster_size(&self) -> usize {
        self.cluster_size
    }

    /// Whether a compaction pass is running against this buffer.
    pub fn is_compacting(&self) -> bool {
        self.compacting
    }

    /// Whether element frees bypass the element hold list.
    pub fn elem_hold_list_disabled(&self) -> bool {
        self.disable_elem_hold_list
    }

    /// The written elements, for the mutator.
    pub fn elements(&self) -> &[E] {
        self.buffer.as_slice()
    }

    /// A reader handle for this slot.
    pub fn reader(&self) -> BufferReader<E> {
        BufferReader::new(Arc::clone(&self.view))
    }

    /// Memory accounting for this buffer with `elem_size`-byte elements.
    pub fn memory_usage(&self, elem_size: usize) -> MemoryUsage {
        let allocated = self.alloc_elems() * elem_size;
        let used = self.used_elems() * elem_size;
        let dead = self.dead_elems * elem_size;
        match self.state {
            State::Free => MemoryUsage::default(),
            State::Active => MemoryUsage::new(allocated, used, dead, self.hold_elems * elem_size),
            State::Hold => MemoryUsage::new(allocated, used, dead, allocated),
        }
    }

    pub(crate) fn install(&mut self, buffer: ElemBuffer<E>) {
        self.buffer = buffer;
        self.view.publish_alloc(&self.buffer);
    }

    /// Swap in a grown allocation, returning the old one.
    pub(crate) fn replace_allocation(&mut self, buffer: ElemBuffer<E>) -> ElemBuffer<E> {
        assert_eq!(
            buffer.len(),
            self.buffer.len(),
            "grown allocation must carry every used element"
        );
        let old = std::mem::replace(&mut self.buffer, buffer);
        self.view.publish_resized(&self.buffer);
        old
    }

    pub(crate) fn publish_len(&self) {
        self.view.publish_len(self.buffer.len());
    }

    /// Stop publishing and hand back the allocation for destruction.
    pub(crate) fn take_allocation(&mut self) -> ElemBuffer<E> {
        self.view.clear();
        std::mem::take(&mut self.buffer)
    }

    pub(crate) fn add_dead(&mut self, count: usize) {
        let dead = self.dead_elems + count;
        assert!(
            dead <= self.used_elems(),
            "dead elements {dead} exceed used elements {}",
            self.used_elems()
        );
        self.dead_elems = dead;
    }

    pub(crate) fn sub_dead(&mut self, count: usize) {
        assert!(
            self.dead_elems >= count,
            "dead elements underflow: {} < {count}",
            self.dead_elems
        );
        self.dead_elems -= count;
    }

    pub(crate) fn add_hold(&mut self, count: usize) {
        let hold = self.hold_elems + count;
        assert!(
            hold <= self.used_elems() - self.dead_elems,
            "held elements {hold} exceed live elements {}",
            self.used_elems() - self.dead_elems
        );
        self.hold_elems = hold;
    }

    pub(crate) fn sub_hold(&mut self, count: usize) {
        assert!(
            self.hold_elems >= count,
            "held elements underflow: {} < {count}",
            self.hold_elems
        );
        self.hold_elems -= count;
    }

    pub(crate) fn check_range(&self, buffer_id: BufferId, offset: usize, len: usize) {
        assert!(
            offset.checked_add(len).is_some_and(|end| end <= self.used_elems()),
            "range {offset}+{len} outside the {} used elements of buffer {buffer_id}",
            self.used_elems()
        );
    }
}

impl<E> LinkTable for [BufferState<E>] {
    fn links(&self, buffer: BufferId) -> &FreeListLinks {
        &self[buffer.index()].links
    }

    fn links_mut(&mut self, buffer: BufferId) -> &mut FreeListLinks {
        &mut self[buffer.index()].links
    }
}

impl<E> Drop for BufferState<E> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        assert_eq!(self.state, State::Free, "buffer dropped while {}", self.state);
        assert!(!self.links.is_linked(), "buffer dropped while on a free list");
        assert_eq!(self.hold_elems, 0, "buffer dropped with held elements");
        assert!(self.free_list.is_empty(), "buffer dropped with a free list");
    }
}

impl<E> fmt::Debug for BufferState<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferState")
            .field("state", &self.state)
            .field("type_id", &self.type_id)
            .field("used_elems", &self.used_elems())
            .field("alloc_elems", &self.alloc_elems())
            .field("dead_elems", &self.dead_elems)
            .field("hold_elems", &self.hold_elems)
            .field("free_list", &self.free_list.len())
            .field("free_list_anchor", &self.free_list_anchor)
            .field("compacting", &self.compacting)
            .finish()
    }
}
