//! Reusable buffer-type and element fixtures.
//!
//! - [`CountingBufferType`]: plain hooks plus a shared tally of calls.
//! - [`Tracked`]: an element that counts its live copies.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use clusterstore_buffer::{BufferType, BufferTypeBase, BufferTypeConfig, ElemBuffer};
use clusterstore_core::BufferId;

/// Shared tally of hook invocations.
///
/// Element counts are summed across calls, so `destroyed` is the total
/// number of elements handed to `destroy_elements`.
#[derive(Debug, Default)]
pub struct HookCounts {
    pub reserved: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub copied: AtomicUsize,
    pub cleaned: AtomicUsize,
    pub activations: AtomicUsize,
}

impl HookCounts {
    pub fn reserved(&self) -> usize {
        self.reserved.load(Ordering::Relaxed)
    }

    pub fn destroyed(&self) -> usize {
        self.destroyed.load(Ordering::Relaxed)
    }

    pub fn copied(&self) -> usize {
        self.copied.load(Ordering::Relaxed)
    }

    pub fn cleaned(&self) -> usize {
        self.cleaned.load(Ordering::Relaxed)
    }

    pub fn activations(&self) -> usize {
        self.activations.load(Ordering::Relaxed)
    }
}

/// Buffer type with default hook behaviour that counts every call.
///
/// Keep a clone of [`counts`](CountingBufferType::counts) before handing
/// the type to an arena.
pub struct CountingBufferType<E> {
    base: BufferTypeBase,
    counts: Arc<HookCounts>,
    empty: E,
}

impl<E> CountingBufferType<E> {
    pub fn new(config: BufferTypeConfig, empty: E) -> Self {
        Self {
            base: BufferTypeBase::new(config),
            counts: Arc::new(HookCounts::default()),
            empty,
        }
    }

    pub fn counts(&self) -> Arc<HookCounts> {
        Arc::clone(&self.counts)
    }
}

impl<E> BufferType for CountingBufferType<E>
where
    E: Clone + Send + Sync + 'static,
{
    type Entry = E;

    fn base(&self) -> &BufferTypeBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut BufferTypeBase {
        &mut self.base
    }

    fn empty_entry(&self) -> E {
        self.empty.clone()
    }

    fn initialize_reserved(&self, buffer: &mut ElemBuffer<E>, count: usize) {
        self.counts.reserved.fetch_add(count, Ordering::Relaxed);
        for _ in 0..count {
            buffer.push(self.empty_entry());
        }
    }

    fn destroy_elements(&self, buffer: &mut ElemBuffer<E>, count: usize) {
        self.counts.destroyed.fetch_add(count, Ordering::Relaxed);
        buffer.truncate(buffer.len().saturating_sub(count));
    }

    fn fallback_copy(&self, dst: &mut ElemBuffer<E>, src: &ElemBuffer<E>, count: usize) {
        self.counts.copied.fetch_add(count, Ordering::Relaxed);
        for entry in &src.as_slice()[..count] {
            dst.push(entry.clone());
        }
    }

    fn clean_hold(&self, buffer: &mut ElemBuffer<E>, offset: usize, len: usize) {
        self.counts.cleaned.fetch_add(len, Ordering::Relaxed);
        for index in offset..offset + len {
            buffer.replace(index, self.empty_entry());
        }
    }

    fn on_active(
        &mut self,
        buffer_id: BufferId,
        used_of: &dyn Fn(BufferId) -> usize,
        buffer: &mut ElemBuffer<E>,
    ) -> usize {
        self.counts.activations.fetch_add(1, Ordering::Relaxed);
        let reserved = self.base.on_active(buffer_id, used_of);
        if reserved != 0 {
            self.initialize_reserved(buffer, reserved);
        }
        reserved
    }
}

/// An element whose clones share one live-instance counter.
#[derive(Debug)]
pub struct Tracked {
    pub value: u64,
    live: Arc<AtomicUsize>,
}

impl Tracked {
    /// A fresh counter to share between elements.
    pub fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    pub fn new(value: u64, live: &Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::Relaxed);
        Self {
            value,
            live: Arc::clone(live),
        }
    }
}

impl Clone for Tracked {
    fn clone(&self) -> Self {
        Self::new(self.value, &self.live)
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::Relaxed);
    }
}
