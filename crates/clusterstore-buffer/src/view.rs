//! Lock-free reader publication of a buffer's element array.
//!
//! Every buffer slot owns one [`PublishedView`], shared with readers via
//! [`BufferReader`]. The mutator publishes `(ptr, capacity)` whenever the
//! backing allocation changes and `len` after every append. Readers take a
//! [`BufferView`] snapshot without locking.
//!
//! # Ordering
//!
//! ```text
//! mutator                               reader
//! ───────                               ──────
//! write elements / copy on grow
//! fence(Release)
//! ptr.store(new, Release)               len = len.load(Acquire)
//! capacity.store(new, Release)          ptr = ptr.load(Acquire)
//! fence(Release)
//! len.store(used, Release)
//! ```
//!
//! The reader loads `len` before `ptr`, so the pointer it sees is never
//! older than the length: any allocation published after `len` was stored
//! already holds a copy of the first `len` elements.
//!
//! Snapshots do not keep memory alive. Keeping a retired or held
//! allocation alive until no reader can observe it is the job of the
//! external generation tracker.

#![allow(unsafe_code)]

use std::fmt;
use std::marker::PhantomData;
use std::ptr;
use std::slice;
use std::sync::atomic::{fence, AtomicPtr, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::raw::ElemBuffer;

/// Atomically published `(ptr, len, capacity)` triple for one buffer slot.
pub struct PublishedView<E> {
    ptr: AtomicPtr<E>,
    len: AtomicUsize,
    capacity: AtomicUsize,
}

// Compile-time assertion: PublishedView must be Send + Sync for any E
// that readers may share.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<PublishedView<u64>>();
};

impl<E> PublishedView<E> {
    /// A view publishing no memory.
    pub(crate) fn new() -> Self {
        Self {
            ptr: AtomicPtr::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
            capacity: AtomicUsize::new(0),
        }
    }

    /// Publish a freshly activated allocation and its initial length.
    pub(crate) fn publish_alloc(&self, buffer: &ElemBuffer<E>) {
        self.publish_ptr(buffer);
        self.len.store(buffer.len(), Ordering::Release);
    }

    /// Republish after a fallback resize.
    ///
    /// The new allocation must already hold a copy of every element the
    /// current `len` covers.
    pub(crate) fn publish_resized(&self, buffer: &ElemBuffer<E>) {
        self.publish_ptr(buffer);
    }

    fn publish_ptr(&self, buffer: &ElemBuffer<E>) {
        fence(Ordering::Release);
        self.ptr
            .store(buffer.as_ptr().cast_mut(), Ordering::Release);
        self.capacity.store(buffer.capacity(), Ordering::Release);
        fence(Ordering::Release);
    }

    /// Publish a new element count after appending.
    pub(crate) fn publish_len(&self, len: usize) {
        self.len.store(len, Ordering::Release);
    }

    /// Stop publishing memory (buffer is being freed).
    pub(crate) fn clear(&self) {
        self.len.store(0, Ordering::Release);
        self.capacity.store(0, Ordering::Release);
        self.ptr.store(ptr::null_mut(), Ordering::Release);
    }

    /// Take a consistent `(ptr, len)` snapshot.
    pub fn snapshot(&self) -> BufferView<E> {
        let len = self.len.load(Ordering::Acquire);
        let ptr = self.ptr.load(Ordering::Acquire);
        BufferView {
            ptr,
            len,
            _elem: PhantomData,
        }
    }

    /// Currently published capacity, in elements.
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }
}

/// Cloneable, thread-safe reader handle for one buffer slot.
///
/// Obtained from [`crate::BufferArena::reader`]. The handle stays valid
/// across the buffer's whole lifecycle; each [`BufferReader::snapshot`]
/// reflects whatever allocation is published at that moment.
pub struct BufferReader<E> {
    view: Arc<PublishedView<E>>,
}

impl<E> BufferReader<E> {
    pub(crate) fn new(view: Arc<PublishedView<E>>) -> Self {
        Self { view }
    }

    /// Take a snapshot of the published array.
    pub fn snapshot(&self) -> BufferView<E> {
        self.view.snapshot()
    }

    /// Currently published capacity, in elements.
    pub fn capacity(&self) -> usize {
        self.view.capacity()
    }
}

impl<E> Clone for BufferReader<E> {
    fn clone(&self) -> Self {
        Self {
            view: Arc::clone(&self.view),
        }
    }
}

impl<E> fmt::Debug for BufferReader<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferReader")
            .field("view", &self.view.snapshot())
            .finish()
    }
}

/// A `(pointer, length)` snapshot of a published element array.
pub struct BufferView<E> {
    ptr: *const E,
    len: usize,
    _elem: PhantomData<*const E>,
}

impl<E> Clone for BufferView<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for BufferView<E> {}

// SAFETY: a BufferView only ever yields &E, so it may cross threads
// whenever &E may.
unsafe impl<E: Sync> Send for BufferView<E> {}
// SAFETY: as above.
unsafe impl<E: Sync> Sync for BufferView<E> {}

impl<E> BufferView<E> {
    /// Number of published elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the view covers no elements (including "no memory").
    pub fn is_empty(&self) -> bool {
        self.len == 0 || self.ptr.is_null()
    }

    /// Raw pointer to the published array (null while the buffer is free).
    pub fn as_ptr(&self) -> *const E {
        self.ptr
    }

    /// Borrow the published elements.
    ///
    /// # Safety
    ///
    /// The allocation this snapshot was taken from must stay alive for the
    /// returned lifetime: the buffer must not be freed, and a retired
    /// allocation returned by `fallback_resize` must not be dropped, until
    /// the caller's generation guard is released. The snapshot must also
    /// not straddle a free/reactivate cycle of the slot.
    ///
    /// Slots inside `len` are not frozen: `free_elem` runs `clean_hold`
    /// over freed ranges and `alloc_from_free_list` overwrites reused
    /// clusters. The slice must not be held across a generation in which
    /// either may touch a range the caller reads.
    pub unsafe fn as_slice(&self) -> &[E] {
        if self.ptr.is_null() || self.len == 0 {
            return &[];
        }
        // SAFETY: the mutator publishes ptr only for allocations whose first
        // len elements are initialised (see module docs), and the caller
        // guarantees the allocation is still alive.
        unsafe { slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl<E> fmt::Debug for BufferView<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferView")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
