//! Owned, fixed-capacity element storage.
//!
//! [`ElemBuffer`] is the raw memory behind one buffer. It is allocated once
//! at its final capacity and never grows in place: growth allocates a new
//! `ElemBuffer`, copies, and hands the old one back to the caller to retire.
//! That keeps every pointer ever published to readers valid until its
//! owner drops it.
//!
//! This is one of the two modules in the crate allowed to contain `unsafe`
//! (the other is the reader slice accessor in `view`). Every block carries
//! a `// SAFETY:` comment.

#![allow(unsafe_code)]

use std::alloc::{self, Layout};
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ptr::{self, NonNull};
use std::slice;

/// A fixed-capacity allocation of `E` with an initialised prefix.
///
/// Elements `0..len()` are initialised; `len()..capacity()` are not.
/// Writes happen through raw pointers so that concurrent readers holding
/// a pointer into the initialised prefix never alias a `&mut`.
pub struct ElemBuffer<E> {
    ptr: NonNull<E>,
    capacity: usize,
    len: usize,
    _owns: PhantomData<E>,
}

// SAFETY: ElemBuffer owns its elements exactly like Vec<E>; sending it
// sends the elements.
unsafe impl<E: Send> Send for ElemBuffer<E> {}
// SAFETY: shared access only hands out &E.
unsafe impl<E: Sync> Sync for ElemBuffer<E> {}

impl<E> ElemBuffer<E> {
    /// Allocate storage for exactly `capacity` elements.
    ///
    /// # Panics
    ///
    /// Panics if the byte size overflows `isize`. Allocation failure is
    /// reported through [`std::alloc::handle_alloc_error`].
    pub fn with_capacity(capacity: usize) -> Self {
        let ptr = if capacity == 0 || mem::size_of::<E>() == 0 {
            NonNull::dangling()
        } else {
            let layout = match Layout::array::<E>(capacity) {
                Ok(layout) => layout,
                Err(_) => panic!("element buffer of {capacity} elements overflows isize"),
            };
            // SAFETY: layout has non-zero size (capacity > 0, E not zero-sized).
            let raw = unsafe { alloc::alloc(layout) }.cast::<E>();
            match NonNull::new(raw) {
                Some(ptr) => ptr,
                None => alloc::handle_alloc_error(layout),
            }
        };
        Self {
            ptr,
            capacity,
            len: 0,
            _owns: PhantomData,
        }
    }

    /// An empty buffer that owns no memory.
    pub fn empty() -> Self {
        Self::with_capacity(0)
    }

    /// Number of initialised elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no element has been written.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total element capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Uninitialised slots left.
    pub fn remaining(&self) -> usize {
        self.capacity - self.len
    }

    /// Append one element.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is full. Buffers never grow in place.
    pub fn push(&mut self, value: E) {
        assert!(
            self.len < self.capacity,
            "element buffer full (capacity {})",
            self.capacity
        );
        // SAFETY: len < capacity, so the slot is inside the allocation and
        // not yet initialised; writing does not drop anything.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Shared reference to an initialised element.
    pub fn get(&self, index: usize) -> Option<&E> {
        self.as_slice().get(index)
    }

    /// Overwrite an initialised element, returning the previous value.
    ///
    /// Only valid for slots no reader can still observe (dead or reserved
    /// elements whose hold period has passed).
    ///
    /// # Panics
    ///
    /// Panics if `index >= len()`.
    pub fn replace(&mut self, index: usize, value: E) -> E {
        assert!(
            index < self.len,
            "replace at {index} beyond initialised length {}",
            self.len
        );
        // SAFETY: index < len, so the slot is initialised; ptr::replace
        // moves the old value out without creating a reference.
        unsafe { ptr::replace(self.ptr.as_ptr().add(index), value) }
    }

    /// Drop every element at or beyond `new_len`.
    ///
    /// No-op if `new_len >= len()`.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len {
            return;
        }
        let tail = self.len - new_len;
        // Shrink first so a panicking destructor cannot cause a double drop.
        self.len = new_len;
        // SAFETY: elements new_len..new_len + tail were initialised and are
        // no longer reachable through self.len.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr().add(new_len),
                tail,
            ));
        }
    }

    /// The initialised prefix.
    pub fn as_slice(&self) -> &[E] {
        // SAFETY: ptr is non-null and aligned (dangling is fine for len 0 or
        // zero-sized E), and the first len elements are initialised.
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    /// Raw pointer to the first slot, for publication to readers.
    pub fn as_ptr(&self) -> *const E {
        self.ptr.as_ptr()
    }

    /// Bytes owned by this allocation.
    pub fn memory_bytes(&self) -> usize {
        self.capacity * mem::size_of::<E>()
    }
}

impl<E> Drop for ElemBuffer<E> {
    fn drop(&mut self) {
        self.truncate(0);
        if self.capacity != 0 && mem::size_of::<E>() != 0 {
            if let Ok(layout) = Layout::array::<E>(self.capacity) {
                // SAFETY: the same layout was used to allocate ptr in
                // with_capacity, and it has not been freed.
                unsafe { alloc::dealloc(self.ptr.as_ptr().cast::<u8>(), layout) };
            }
        }
    }
}

impl<E> Default for ElemBuffer<E> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<E> fmt::Debug for ElemBuffer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElemBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::rc::Rc;

    #[test]
    fn push_and_read_back() {
        let mut buf = ElemBuffer::with_capacity(4);
        buf.push(10u32);
        buf.push(20);
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.capacity(), 4);
        assert_eq!(buf.remaining(), 2);
        assert_eq!(buf.as_slice(), &[10, 20]);
        assert_eq!(buf.get(1), Some(&20));
        assert_eq!(buf.get(2), None);
    }

    #[test]
    #[should_panic(expected = "element buffer full")]
    fn push_past_capacity_panics() {
        let mut buf = ElemBuffer::with_capacity(1);
        buf.push(1u8);
        buf.push(2u8);
    }

    #[test]
    fn replace_returns_old_value() {
        let mut buf = ElemBuffer::with_capacity(2);
        buf.push(String::from("a"));
        let old = buf.replace(0, String::from("b"));
        assert_eq!(old, "a");
        assert_eq!(buf.as_slice(), &["b".to_string()]);
    }

    #[test]
    #[should_panic(expected = "beyond initialised length")]
    fn replace_uninitialised_slot_panics() {
        let mut buf = ElemBuffer::<u32>::with_capacity(2);
        buf.replace(0, 1);
    }

    #[test]
    fn truncate_and_drop_release_elements() {
        let tracker = Rc::new(());
        let mut buf = ElemBuffer::with_capacity(3);
        for _ in 0..3 {
            buf.push(Rc::clone(&tracker));
        }
        assert_eq!(Rc::strong_count(&tracker), 4);
        buf.truncate(1);
        assert_eq!(Rc::strong_count(&tracker), 2);
        drop(buf);
        assert_eq!(Rc::strong_count(&tracker), 1);
    }

    #[test]
    fn zero_capacity_owns_nothing() {
        let buf = ElemBuffer::<u64>::empty();
        assert!(buf.is_empty());
        assert_eq!(buf.memory_bytes(), 0);
        assert!(buf.as_slice().is_empty());
    }

    #[test]
    fn zero_sized_elements() {
        let mut buf = ElemBuffer::with_capacity(3);
        buf.push(());
        buf.push(());
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.memory_bytes(), 0);
    }

    #[test]
    fn memory_bytes_counts_capacity() {
        let buf = ElemBuffer::<u32>::with_capacity(8);
        assert_eq!(buf.memory_bytes(), 32);
    }
}
