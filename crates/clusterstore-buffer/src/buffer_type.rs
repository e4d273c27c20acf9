//! Element-type hooks consumed by buffers.
//!
//! A [`BufferType`] couples a [`BufferTypeBase`] (sizing + statistics) with
//! the operations that depend on the concrete element: what goes into
//! reserved and cleaned slots, how elements are destroyed, and how they
//! are copied when a buffer is regrown. Every hook has a default that is
//! correct for plain value types; [`PlainBufferType`] uses them all.

use std::fmt;
use std::marker::PhantomData;
use std::mem;

use clusterstore_core::BufferId;

use crate::config::BufferTypeConfig;
use crate::error::ArenaError;
use crate::raw::ElemBuffer;
use crate::type_base::BufferTypeBase;

/// Element-specific behaviour of one buffer type.
///
/// Implementations must keep `base()` and `base_mut()` pointing at the
/// same entry for their whole lifetime; the arena drives all statistics
/// through it.
pub trait BufferType: Send {
    /// The element stored in buffers of this type.
    type Entry: Clone + Send + Sync + 'static;

    /// Sizing policy and statistics.
    fn base(&self) -> &BufferTypeBase;

    /// Mutable sizing policy and statistics.
    fn base_mut(&mut self) -> &mut BufferTypeBase;

    /// Value written into reserved slots and into freed slots.
    fn empty_entry(&self) -> Self::Entry;

    /// Bytes per element.
    fn element_size(&self) -> usize {
        mem::size_of::<Self::Entry>()
    }

    /// Elements per cluster.
    fn cluster_size(&self) -> usize {
        self.base().cluster_size()
    }

    /// Fill the `count` reserved slots at the start of a fresh buffer.
    fn initialize_reserved(&self, buffer: &mut ElemBuffer<Self::Entry>, count: usize) {
        for _ in 0..count {
            buffer.push(self.empty_entry());
        }
    }

    /// Destroy the last `count` elements of a buffer being freed.
    fn destroy_elements(&self, buffer: &mut ElemBuffer<Self::Entry>, count: usize) {
        let keep = buffer.len().saturating_sub(count);
        buffer.truncate(keep);
    }

    /// Copy the first `count` elements of `src` into the empty `dst`.
    fn fallback_copy(
        &self,
        dst: &mut ElemBuffer<Self::Entry>,
        src: &ElemBuffer<Self::Entry>,
        count: usize,
    ) {
        for entry in &src.as_slice()[..count] {
            dst.push(entry.clone());
        }
    }

    /// Reset a freed element range so it no longer owns resources.
    fn clean_hold(&self, buffer: &mut ElemBuffer<Self::Entry>, offset: usize, len: usize) {
        for index in offset..offset + len {
            buffer.replace(index, self.empty_entry());
        }
    }

    /// Record activation of `buffer_id` and initialise its reserved slots.
    ///
    /// Returns the number of reserved elements, which the buffer counts as
    /// both used and dead.
    fn on_active(
        &mut self,
        buffer_id: BufferId,
        used_of: &dyn Fn(BufferId) -> usize,
        buffer: &mut ElemBuffer<Self::Entry>,
    ) -> usize {
        let reserved = self.base_mut().on_active(buffer_id, used_of);
        if reserved != 0 {
            self.initialize_reserved(buffer, reserved);
            assert_eq!(
                buffer.len(),
                reserved,
                "initialize_reserved must write exactly the reserved elements"
            );
        }
        reserved
    }
}

/// Buffer type for any `Clone + Default` element.
///
/// Reserved and cleaned slots hold `E::default()`.
pub struct PlainBufferType<E> {
    base: BufferTypeBase,
    _entry: PhantomData<fn() -> E>,
}

impl<E> PlainBufferType<E> {
    /// Create a type with the given sizing policy.
    pub fn new(config: BufferTypeConfig) -> Self {
        Self {
            base: BufferTypeBase::new(config),
            _entry: PhantomData,
        }
    }

    /// Create a type, rejecting an invalid policy instead of panicking.
    pub fn try_new(config: BufferTypeConfig) -> Result<Self, ArenaError> {
        Ok(Self {
            base: BufferTypeBase::try_new(config)?,
            _entry: PhantomData,
        })
    }

    /// Shorthand for `new(BufferTypeConfig::new(cluster_size).with_clusters(..))`.
    pub fn with_clusters(cluster_size: u32, min_clusters: u32, max_clusters: u32) -> Self {
        Self::new(BufferTypeConfig::new(cluster_size).with_clusters(min_clusters, max_clusters))
    }
}

impl<E> BufferType for PlainBufferType<E>
where
    E: Clone + Default + Send + Sync + 'static,
{
    type Entry = E;

    fn base(&self) -> &BufferTypeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BufferTypeBase {
        &mut self.base
    }

    fn empty_entry(&self) -> E {
        E::default()
    }
}

impl<E> fmt::Debug for PlainBufferType<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlainBufferType")
            .field("entry", &std::any::type_name::<E>())
            .field("base", &self.base)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_pending(_: BufferId) -> usize {
        0
    }

    #[test]
    fn activating_buffer_zero_initialises_reserved_cluster() {
        let mut t = PlainBufferType::<u32>::with_clusters(8, 1, 100);
        let mut buf = ElemBuffer::with_capacity(16);
        let reserved = t.on_active(BufferId(0), &no_pending, &mut buf);
        assert_eq!(reserved, 8);
        assert_eq!(buf.as_slice(), &[0; 8]);

        t.base_mut().on_hold(BufferId(0), 8);
        t.base_mut().on_free(8);
    }

    #[test]
    fn try_new_rejects_zero_cluster_size() {
        let err = PlainBufferType::<u32>::try_new(BufferTypeConfig::new(0)).err();
        assert!(matches!(err, Some(ArenaError::InvalidConfig { .. })));
        assert!(PlainBufferType::<u32>::try_new(BufferTypeConfig::new(2)).is_ok());
    }

    #[test]
    fn other_buffers_start_empty() {
        let mut t = PlainBufferType::<u32>::with_clusters(8, 1, 100);
        let mut buf = ElemBuffer::with_capacity(16);
        assert_eq!(t.on_active(BufferId(5), &no_pending, &mut buf), 0);
        assert!(buf.is_empty());

        t.base_mut().on_hold(BufferId(5), 0);
        t.base_mut().on_free(0);
    }

    #[test]
    fn fallback_copy_clones_prefix() {
        let t = PlainBufferType::<String>::with_clusters(1, 1, 100);
        let mut src = ElemBuffer::with_capacity(3);
        src.push("a".to_string());
        src.push("b".to_string());
        src.push("c".to_string());
        let mut dst = ElemBuffer::with_capacity(6);
        t.fallback_copy(&mut dst, &src, 2);
        assert_eq!(dst.as_slice(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn clean_hold_resets_range() {
        let t = PlainBufferType::<u64>::with_clusters(2, 1, 100);
        let mut buf = ElemBuffer::with_capacity(4);
        for v in 1..=4 {
            buf.push(v);
        }
        t.clean_hold(&mut buf, 2, 2);
        assert_eq!(buf.as_slice(), &[1, 2, 0, 0]);
    }

    #[test]
    fn destroy_elements_drops_tail() {
        let t = PlainBufferType::<u8>::with_clusters(1, 1, 100);
        let mut buf = ElemBuffer::with_capacity(4);
        buf.push(1);
        buf.push(2);
        t.destroy_elements(&mut buf, 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn element_size_matches_entry() {
        let t = PlainBufferType::<[u32; 3]>::with_clusters(1, 1, 10);
        assert_eq!(t.element_size(), 12);
        assert_eq!(t.cluster_size(), 1);
    }
}
