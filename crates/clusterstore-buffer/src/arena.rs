//! The buffer arena: buffer slots, type registry and free-list rings.
//!
//! [`BufferArena`] owns a fixed number of [`BufferState`] slots addressed
//! by [`BufferId`] and every registered [`BufferType`] with its
//! [`FreeListAnchor`]. All lifecycle transitions, element writes and
//! slot reuse go through it, so it can borrow a buffer, its type entry
//! and the ring links of its neighbours at the same time.
//!
//! # Lifecycle
//!
//! ```text
//!        on_active                on_hold                on_free
//!  Free ──────────────► Active ──────────────► Hold ──────────────► Free
//!                        │  ▲                    ▲
//!                        │  │ push_entries       │
//!                        │  │ free_elem          │
//!                        │  │ alloc_from_        │
//!                        │  │   free_list        │
//!                        └──┘ fallback_resize    │
//!                                                │
//!  drop_buffer: Active ──► Hold ──► Free in one call
//! ```
//!
//! Wrong-state calls and counter underflows are caller bugs and panic.
//! Only unknown ids and invalid configuration are reported as
//! [`ArenaError`].

use clusterstore_core::{BufferId, MemoryUsage, TypeId};
use tracing::{debug, trace};

use crate::buffer_type::BufferType;
use crate::config::ArenaConfig;
use crate::error::ArenaError;
use crate::free_list::FreeListAnchor;
use crate::raw::ElemBuffer;
use crate::state::{BufferState, State};
use crate::type_base::BufferTypeBase;
use crate::view::BufferReader;

struct TypeEntry<E> {
    handler: Box<dyn BufferType<Entry = E>>,
    anchor: FreeListAnchor,
}

/// Owner of every buffer slot and buffer type of one data store.
///
/// Single mutator: every method takes `&mut self` or `&self` and none of
/// them synchronise. Concurrent readers go through [`BufferReader`]
/// handles obtained from [`BufferArena::reader`].
pub struct BufferArena<E>
where
    E: Clone + Send + Sync + 'static,
{
    config: ArenaConfig,
    states: Vec<BufferState<E>>,
    types: Vec<TypeEntry<E>>,
    free_lists_enabled: bool,
}

impl<E> BufferArena<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Create an arena with `config.num_buffers` free slots and no types.
    pub fn new(config: ArenaConfig) -> Result<Self, ArenaError> {
        config.validate()?;
        let states = (0..config.num_buffers).map(|_| BufferState::new()).collect();
        debug!(
            num_buffers = config.num_buffers,
            offset_bits = config.offset_bits,
            "buffer arena created"
        );
        Ok(Self {
            config,
            states,
            types: Vec::new(),
            free_lists_enabled: false,
        })
    }

    /// Register a buffer type and return its id.
    ///
    /// The id also names the type's free-list anchor.
    pub fn add_type<T>(&mut self, handler: T) -> Result<TypeId, ArenaError>
    where
        T: BufferType<Entry = E> + 'static,
    {
        handler.base().policy().validate()?;
        let Ok(raw) = u32::try_from(self.types.len()) else {
            return Err(ArenaError::TooManyTypes);
        };
        let type_id = TypeId(raw);
        debug!(
            %type_id,
            cluster_size = handler.cluster_size(),
            element_size = handler.element_size(),
            "buffer type registered"
        );
        self.types.push(TypeEntry {
            handler: Box::new(handler),
            anchor: FreeListAnchor::new(),
        });
        Ok(type_id)
    }

    /// The validated configuration.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Number of buffer slots.
    pub fn num_buffers(&self) -> usize {
        self.states.len()
    }

    /// Number of registered types.
    pub fn num_types(&self) -> usize {
        self.types.len()
    }

    fn buffer_index(&self, buffer_id: BufferId) -> Result<usize, ArenaError> {
        if buffer_id.index() < self.states.len() {
            Ok(buffer_id.index())
        } else {
            Err(ArenaError::UnknownBuffer { buffer: buffer_id })
        }
    }

    fn type_index(&self, type_id: TypeId) -> Result<usize, ArenaError> {
        if type_id.index() < self.types.len() {
            Ok(type_id.index())
        } else {
            Err(ArenaError::UnknownType { type_id })
        }
    }

    // ── Lifecycle ──────────────────────────────────────────────

    /// Activate a free buffer for `type_id` with room for `size_needed`
    /// elements beyond any reserved ones.
    ///
    /// While free lists are enabled the buffer joins its type's ring
    /// as soon as it frees a cluster.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not free or no size within the type's
    /// policy can hold the request.
    pub fn on_active(
        &mut self,
        buffer_id: BufferId,
        type_id: TypeId,
        size_needed: usize,
    ) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let t = self.type_index(type_id)?;
        let Self {
            config,
            states,
            types,
            free_lists_enabled,
        } = self;

        let st = &states[b];
        assert_eq!(st.state, State::Free, "activating buffer {buffer_id} in state {}", st.state);
        assert!(st.type_id.is_none(), "free buffer {buffer_id} still bound to a type");
        assert_eq!(st.alloc_elems(), 0, "free buffer {buffer_id} still owns memory");
        assert_eq!(st.dead_elems, 0);
        assert_eq!(st.hold_elems, 0);
        assert!(st.free_list.is_empty());
        assert!(!st.links.is_linked());

        let entry = &mut types[t];
        let used_of = |id: BufferId| states[id.index()].used_elems();
        let base = entry.handler.base();
        let reserved = base.reserved_elements(buffer_id);
        let clusters =
            base.clusters_to_allocate(buffer_id, size_needed, config.cluster_ref_limit(), used_of);
        let cluster_size = entry.handler.cluster_size();
        let alloc_elems = clusters * cluster_size;
        assert!(
            alloc_elems >= reserved + size_needed,
            "allocation of {alloc_elems} elements cannot hold {reserved} reserved + {size_needed}"
        );

        let mut buffer = ElemBuffer::with_capacity(alloc_elems);
        let dead = entry.handler.on_active(buffer_id, &used_of, &mut buffer);

        let st = &mut states[b];
        st.install(buffer);
        st.state = State::Active;
        st.type_id = Some(type_id);
        st.cluster_size = cluster_size;
        st.dead_elems = dead;
        if *free_lists_enabled && !st.compacting {
            set_anchor(states, types, b, Some(type_id));
        }
        debug!(
            buffer = %buffer_id,
            %type_id,
            alloc_elems,
            reserved = dead,
            "buffer activated"
        );
        Ok(())
    }

    /// Retire an active buffer: it stays readable but accepts no writes.
    ///
    /// Everything not dead goes on hold, the local free list is dropped
    /// and the buffer leaves its free-list ring.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not active.
    pub fn on_hold(&mut self, buffer_id: BufferId) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let Self { states, types, .. } = self;

        let st = &mut states[b];
        assert_eq!(st.state, State::Active, "holding buffer {buffer_id} in state {}", st.state);
        let Some(type_id) = st.type_id else {
            panic!("active buffer {buffer_id} has no type");
        };
        st.state = State::Hold;
        st.compacting = false;
        let used = st.used_elems();
        assert!(st.dead_elems <= used);
        let live = used - st.dead_elems;
        assert!(
            st.hold_elems <= live,
            "buffer {buffer_id} holds {} elements but only {live} are live",
            st.hold_elems
        );
        st.hold_elems = live;
        types[type_id.index()]
            .handler
            .base_mut()
            .on_hold(buffer_id, used);

        if !states[b].free_list.is_empty() {
            let Some(anchor) = states[b].free_list_anchor else {
                panic!("buffer {buffer_id} has free entries but no anchor");
            };
            types[anchor.index()]
                .anchor
                .unlink(buffer_id, states.as_mut_slice());
            states[b].free_list.clear();
        }
        set_anchor(states, types, b, None);
        debug!(buffer = %buffer_id, %type_id, hold_elems = live, "buffer on hold");
        Ok(())
    }

    /// Release a held buffer's memory and unbind its type.
    ///
    /// Only call once no reader can observe the buffer any more.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not on hold.
    pub fn on_free(&mut self, buffer_id: BufferId) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let Self { states, types, .. } = self;

        let st = &mut states[b];
        assert_eq!(st.state, State::Hold, "freeing buffer {buffer_id} in state {}", st.state);
        let Some(type_id) = st.type_id else {
            panic!("held buffer {buffer_id} has no type");
        };
        let used = st.used_elems();
        assert!(st.dead_elems <= used);
        assert_eq!(
            st.hold_elems,
            used - st.dead_elems,
            "held buffer {buffer_id} lost track of its live elements"
        );

        let handler = &mut types[type_id.index()].handler;
        let mut buffer = st.take_allocation();
        handler.destroy_elements(&mut buffer, used);
        drop(buffer);
        handler.base_mut().on_free(used);

        st.dead_elems = 0;
        st.hold_elems = 0;
        st.state = State::Free;
        st.type_id = None;
        st.cluster_size = 0;
        assert!(st.free_list.is_empty());
        assert!(!st.links.is_linked());
        set_anchor(states, types, b, None);
        states[b].disable_elem_hold_list = false;
        debug!(buffer = %buffer_id, %type_id, used_elems = used, "buffer freed");
        Ok(())
    }

    /// Take a buffer from any state to free, passing through hold.
    pub fn drop_buffer(&mut self, buffer_id: BufferId) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        if self.states[b].state == State::Active {
            self.on_hold(buffer_id)?;
        }
        if self.states[b].state == State::Hold {
            self.on_free(buffer_id)?;
        }
        assert_eq!(self.states[b].state, State::Free);
        Ok(())
    }

    /// Drop every buffer, disabling free lists first.
    pub fn drop_buffers(&mut self) {
        self.disable_free_lists();
        for raw in 0..self.states.len() {
            let buffer_id = BufferId(raw as u32);
            if let Err(e) = self.drop_buffer(buffer_id) {
                unreachable!("dropping own slot {buffer_id}: {e}");
            }
        }
    }

    // ── Free-list membership ───────────────────────────────────

    /// Change which type's free-list ring the buffer participates in.
    ///
    /// A free buffer only accepts `None`. Setting `None` while the buffer
    /// has free entries discards them.
    pub fn set_free_list_anchor(
        &mut self,
        buffer_id: BufferId,
        anchor: Option<TypeId>,
    ) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        if let Some(type_id) = anchor {
            self.type_index(type_id)?;
        }
        set_anchor(&mut self.states, &mut self.types, b, anchor);
        Ok(())
    }

    /// Let every active, non-compacting buffer reuse slots through its
    /// own type's ring. Buffers activated later join as well.
    pub fn enable_free_lists(&mut self) {
        self.free_lists_enabled = true;
        for b in 0..self.states.len() {
            let st = &self.states[b];
            if st.state == State::Active && !st.compacting {
                let anchor = st.type_id;
                set_anchor(&mut self.states, &mut self.types, b, anchor);
            }
        }
        debug!("free lists enabled");
    }

    /// Whether newly activated buffers join their type's ring.
    pub fn free_lists_enabled(&self) -> bool {
        self.free_lists_enabled
    }

    /// Detach every buffer from its ring and discard local free lists.
    pub fn disable_free_lists(&mut self) {
        self.free_lists_enabled = false;
        for b in 0..self.states.len() {
            set_anchor(&mut self.states, &mut self.types, b, None);
        }
        debug!("free lists disabled");
    }

    /// Stop routing this buffer's element frees through the hold list.
    pub fn disable_elem_hold_list(&mut self, buffer_id: BufferId) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        self.states[b].disable_elem_hold_list = true;
        Ok(())
    }

    /// Mark the buffer as the source of a running compaction.
    ///
    /// Cleared when the buffer goes on hold.
    pub fn set_compacting(&mut self, buffer_id: BufferId) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        self.states[b].compacting = true;
        Ok(())
    }

    // ── Growth ─────────────────────────────────────────────────

    /// Grow an active buffer into a fresh allocation with room for
    /// `size_needed` more elements.
    ///
    /// Used elements are copied with the type's `fallback_copy` hook and
    /// the new memory is published to readers. The old allocation is
    /// returned; the caller keeps it alive until no reader can still be
    /// looking at it.
    ///
    /// The new size covers the whole buffer: used elements plus
    /// `size_needed`, with reserved elements counted once.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not active or the policy cannot produce a
    /// strictly larger allocation that fits the request.
    pub fn fallback_resize(
        &mut self,
        buffer_id: BufferId,
        size_needed: usize,
    ) -> Result<ElemBuffer<E>, ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let Self {
            config,
            states,
            types,
            ..
        } = self;

        let st = &states[b];
        assert_eq!(st.state, State::Active, "resizing buffer {buffer_id} in state {}", st.state);
        let Some(type_id) = st.type_id else {
            panic!("active buffer {buffer_id} has no type");
        };
        let used = st.used_elems();
        let old_alloc = st.alloc_elems();

        let handler = &types[type_id.index()].handler;
        // Size for the whole buffer; reserved elements are already in `used`.
        let request = used - handler.base().reserved_elements(buffer_id) + size_needed;
        let used_of = |id: BufferId| states[id.index()].used_elems();
        let clusters = handler.base().clusters_to_allocate(
            buffer_id,
            request,
            config.cluster_ref_limit(),
            used_of,
        );
        let alloc_elems = clusters * handler.cluster_size();
        assert!(
            alloc_elems >= used + size_needed,
            "resized buffer {buffer_id} of {alloc_elems} elements cannot hold {used} + {size_needed}"
        );
        assert!(
            alloc_elems > old_alloc,
            "resize of buffer {buffer_id} does not grow it ({alloc_elems} <= {old_alloc})"
        );

        let mut grown = ElemBuffer::with_capacity(alloc_elems);
        handler.fallback_copy(&mut grown, &states[b].buffer, used);
        let hold = states[b].replace_allocation(grown);
        debug!(
            buffer = %buffer_id,
            old_alloc,
            alloc_elems,
            used_elems = used,
            "buffer resized"
        );
        Ok(hold)
    }

    // ── Element writes ─────────────────────────────────────────

    /// Append whole clusters to an active buffer and return the offset of
    /// the first appended element.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not active, `entries` is not a whole number
    /// of clusters, or the buffer lacks room (call `fallback_resize`
    /// first).
    pub fn push_entries(&mut self, buffer_id: BufferId, entries: &[E]) -> Result<usize, ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let st = &mut self.states[b];
        assert_eq!(st.state, State::Active, "appending to buffer {buffer_id} in state {}", st.state);
        let Some(type_id) = st.type_id else {
            panic!("active buffer {buffer_id} has no type");
        };
        assert!(
            entries.len() % st.cluster_size == 0,
            "append of {} elements is not a whole number of {}-element clusters",
            entries.len(),
            st.cluster_size
        );
        assert!(
            entries.len() <= st.remaining(),
            "append of {} elements overflows buffer {buffer_id} ({} left)",
            entries.len(),
            st.remaining()
        );
        let offset = st.used_elems();
        for entry in entries {
            st.buffer.push(entry.clone());
        }
        st.publish_len();
        self.types[type_id.index()]
            .handler
            .base_mut()
            .record_append(buffer_id, entries.len());
        Ok(offset)
    }

    /// Put an element range on hold until readers drain.
    ///
    /// Returns `true` if the caller must later call
    /// [`trim_held_elem`](Self::trim_held_elem) for the range. Buffers on
    /// hold, or with their element hold list disabled, already cover the
    /// range and return `false`.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is free or the range is not written.
    pub fn hold_elem(
        &mut self,
        buffer_id: BufferId,
        offset: usize,
        len: usize,
    ) -> Result<bool, ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let st = &mut self.states[b];
        assert_ne!(st.state, State::Free, "holding elements of free buffer {buffer_id}");
        st.check_range(buffer_id, offset, len);
        if st.disable_elem_hold_list || st.state == State::Hold {
            return Ok(false);
        }
        st.add_hold(len);
        trace!(buffer = %buffer_id, offset, len, "element range on hold");
        Ok(true)
    }

    /// Release a range previously put on hold, once readers have drained.
    ///
    /// The range becomes dead. If the buffer went on hold since, the
    /// range moves out of the buffer-wide hold instead.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is free or fewer elements are on hold.
    pub fn trim_held_elem(
        &mut self,
        buffer_id: BufferId,
        offset: usize,
        len: usize,
    ) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let st = &mut self.states[b];
        match st.state {
            State::Free => panic!("trimming held elements of free buffer {buffer_id}"),
            State::Hold => self.free_elem(buffer_id, offset, len),
            State::Active => {
                st.sub_hold(len);
                self.free_elem(buffer_id, offset, len)
            }
        }
    }

    /// Mark an element range dead and, when possible, reusable.
    ///
    /// On an active buffer a range of exactly one cluster is pushed on the
    /// local free list if the buffer has an anchor; the first such entry
    /// links the buffer into the anchor's ring. On a held buffer the range
    /// moves from held to dead. The type's `clean_hold` hook runs over the
    /// range either way.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is free or the range is not written.
    pub fn free_elem(
        &mut self,
        buffer_id: BufferId,
        offset: usize,
        len: usize,
    ) -> Result<(), ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        let Self { states, types, .. } = self;

        let st = &mut states[b];
        let Some(type_id) = st.type_id else {
            panic!("freeing elements of free buffer {buffer_id}");
        };
        st.check_range(buffer_id, offset, len);
        st.add_dead(len);
        if st.state == State::Hold {
            st.sub_hold(len);
        }
        types[type_id.index()]
            .handler
            .clean_hold(&mut st.buffer, offset, len);
        trace!(buffer = %buffer_id, offset, len, "element range freed");

        if st.state != State::Active || len != st.cluster_size {
            return Ok(());
        }
        let Some(anchor) = st.free_list_anchor else {
            return Ok(());
        };
        assert!(
            offset % st.cluster_size == 0,
            "freed cluster at {offset} is not aligned to {}",
            st.cluster_size
        );
        let was_empty = st.free_list.is_empty();
        st.free_list.push(offset);
        if was_empty {
            types[anchor.index()]
                .anchor
                .link(buffer_id, states.as_mut_slice());
        }
        Ok(())
    }

    /// Reuse one freed cluster of `type_id` for `entries`.
    ///
    /// Pops the most recently freed offset of the ring's head buffer; the
    /// buffer leaves the ring when its free list empties. Returns `None`
    /// if the type has no reusable cluster.
    ///
    /// # Panics
    ///
    /// Panics if `entries` is not exactly one cluster.
    pub fn alloc_from_free_list(
        &mut self,
        type_id: TypeId,
        entries: &[E],
    ) -> Result<Option<(BufferId, usize)>, ArenaError> {
        let t = self.type_index(type_id)?;
        let Self { states, types, .. } = self;

        let Some(buffer_id) = types[t].anchor.head() else {
            return Ok(None);
        };
        let st = &mut states[buffer_id.index()];
        assert_eq!(
            entries.len(),
            st.cluster_size,
            "reuse requires exactly one {}-element cluster",
            st.cluster_size
        );
        let Some(offset) = st.free_list.pop() else {
            panic!("buffer {buffer_id} on free list ring with no free entries");
        };
        st.sub_dead(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            st.buffer.replace(offset + i, entry.clone());
        }
        if st.free_list.is_empty() {
            types[t].anchor.unlink(buffer_id, states.as_mut_slice());
        }
        trace!(buffer = %buffer_id, offset, "cluster reused");
        Ok(Some((buffer_id, offset)))
    }

    // ── Queries ────────────────────────────────────────────────

    /// Lifecycle state of a buffer.
    pub fn state(&self, buffer_id: BufferId) -> Result<State, ArenaError> {
        Ok(self.buffer(buffer_id)?.state())
    }

    /// Full bookkeeping of a buffer.
    pub fn buffer(&self, buffer_id: BufferId) -> Result<&BufferState<E>, ArenaError> {
        let b = self.buffer_index(buffer_id)?;
        Ok(&self.states[b])
    }

    /// Sizing policy and statistics of a type.
    pub fn type_base(&self, type_id: TypeId) -> Result<&BufferTypeBase, ArenaError> {
        let t = self.type_index(type_id)?;
        Ok(self.types[t].handler.base())
    }

    /// Hooks of a type.
    pub fn handler(&self, type_id: TypeId) -> Result<&dyn BufferType<Entry = E>, ArenaError> {
        let t = self.type_index(type_id)?;
        Ok(self.types[t].handler.as_ref())
    }

    /// Head of a type's free-list ring.
    pub fn free_list_head(&self, type_id: TypeId) -> Result<Option<BufferId>, ArenaError> {
        let t = self.type_index(type_id)?;
        Ok(self.types[t].anchor.head())
    }

    /// Members of a type's free-list ring, head first.
    pub fn free_list_members(&self, type_id: TypeId) -> Result<Vec<BufferId>, ArenaError> {
        let t = self.type_index(type_id)?;
        Ok(self.types[t].anchor.members(self.states.as_slice()))
    }

    /// A lock-free reader handle for a buffer slot.
    pub fn reader(&self, buffer_id: BufferId) -> Result<BufferReader<E>, ArenaError> {
        Ok(self.buffer(buffer_id)?.reader())
    }

    /// Memory used by every buffer.
    pub fn memory_usage(&self) -> MemoryUsage {
        let mut usage = MemoryUsage::default();
        for st in &self.states {
            if let Some(type_id) = st.type_id {
                let elem_size = self.types[type_id.index()].handler.element_size();
                usage.merge(&st.memory_usage(elem_size));
            }
        }
        usage
    }
}

/// Move buffer `index` to another ring (or none).
fn set_anchor<E>(
    states: &mut [BufferState<E>],
    types: &mut [TypeEntry<E>],
    index: usize,
    anchor: Option<TypeId>,
) {
    let st = &states[index];
    if st.state == State::Free && anchor.is_some() {
        return;
    }
    if st.free_list_anchor == anchor {
        return;
    }
    let buffer_id = BufferId(index as u32);
    let has_free = !st.free_list.is_empty();
    if let Some(old) = st.free_list_anchor {
        if has_free {
            types[old.index()].anchor.unlink(buffer_id, &mut *states);
        }
    }
    states[index].free_list_anchor = anchor;
    if has_free {
        match anchor {
            Some(new) => types[new.index()].anchor.link(buffer_id, &mut *states),
            None => {
                trace!(buffer = %buffer_id, dropped = states[index].free_list.len(), "free list discarded");
                states[index].free_list.clear();
            }
        }
    }
}

impl<E> Drop for BufferArena<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }
        self.drop_buffers();
    }
}

impl<E> std::fmt::Debug for BufferArena<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferArena")
            .field("config", &self.config)
            .field("num_buffers", &self.states.len())
            .field("num_types", &self.types.len())
            .field("free_lists_enabled", &self.free_lists_enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer_type::PlainBufferType;

    fn arena() -> BufferArena<u32> {
        BufferArena::new(ArenaConfig::new(8)).unwrap()
    }

    fn id(raw: u32) -> BufferId {
        BufferId(raw)
    }

    #[test]
    fn invalid_config_rejected() {
        let err = BufferArena::<u32>::new(ArenaConfig::new(0)).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    }

    #[test]
    fn unknown_ids_are_errors() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        assert_eq!(
            a.on_active(id(8), t, 1),
            Err(ArenaError::UnknownBuffer { buffer: id(8) })
        );
        assert_eq!(
            a.on_active(id(1), TypeId(5), 1),
            Err(ArenaError::UnknownType { type_id: TypeId(5) })
        );
        assert!(a.type_base(TypeId(1)).is_err());
    }

    #[test]
    fn zero_max_clusters_rejected_at_registration() {
        let mut a = arena();
        let err = a.add_type(PlainBufferType::with_clusters(1, 0, 0)).unwrap_err();
        assert!(matches!(err, ArenaError::InvalidConfig { .. }));
    }

    #[test]
    fn activation_sizes_from_policy() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 1000)).unwrap();
        a.on_active(id(1), t, 10).unwrap();
        let st = a.buffer(id(1)).unwrap();
        assert_eq!(st.state(), State::Active);
        assert!(st.alloc_elems() >= 10);
        assert_eq!(st.type_id(), Some(t));
        assert_eq!(a.type_base(t).unwrap().active_buffers(), 1);
        assert_eq!(a.type_base(t).unwrap().last_used(), Some(id(1)));
    }

    #[test]
    fn buffer_zero_reserves_a_cluster() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(8, 1, 100)).unwrap();
        a.on_active(id(0), t, 1).unwrap();
        let st = a.buffer(id(0)).unwrap();
        assert_eq!(st.used_elems(), 8);
        assert_eq!(st.dead_elems(), 8);
        assert_eq!(st.elements(), &[0; 8]);
    }

    #[test]
    #[should_panic(expected = "activating buffer 1 in state active")]
    fn double_activation_panics() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 1).unwrap();
        a.on_active(id(1), t, 1).unwrap();
    }

    #[test]
    #[should_panic(expected = "freeing buffer 1 in state active")]
    fn free_without_hold_panics() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 1).unwrap();
        a.on_free(id(1)).unwrap();
    }

    #[test]
    fn hold_freezes_live_elements() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.push_entries(id(1), &[1, 2, 3, 4]).unwrap();
        a.free_elem(id(1), 0, 1).unwrap();
        a.set_compacting(id(1)).unwrap();
        a.on_hold(id(1)).unwrap();

        let st = a.buffer(id(1)).unwrap();
        assert_eq!(st.state(), State::Hold);
        assert_eq!(st.hold_elems(), 3);
        assert!(!st.is_compacting());
        let base = a.type_base(t).unwrap();
        assert_eq!(base.hold_buffers(), 1);
        assert_eq!(base.hold_used_elems(), 4);
        assert_eq!(base.active_used_elems(), 0);
    }

    #[test]
    fn free_resets_slot() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(2, 2, 100)).unwrap();
        a.on_active(id(3), t, 2).unwrap();
        a.push_entries(id(3), &[5, 6]).unwrap();
        a.disable_elem_hold_list(id(3)).unwrap();
        a.drop_buffer(id(3)).unwrap();

        let st = a.buffer(id(3)).unwrap();
        assert!(st.is_free());
        assert_eq!(st.used_elems(), 0);
        assert_eq!(st.alloc_elems(), 0);
        assert_eq!(st.dead_elems(), 0);
        assert_eq!(st.hold_elems(), 0);
        assert!(st.type_id().is_none());
        assert!(!st.elem_hold_list_disabled());
        assert_eq!(a.type_base(t).unwrap().hold_buffers(), 0);
        assert_eq!(a.memory_usage(), MemoryUsage::default());
    }

    #[test]
    fn drop_buffer_on_free_slot_is_noop() {
        let mut a = arena();
        a.drop_buffer(id(2)).unwrap();
        assert_eq!(a.state(id(2)).unwrap(), State::Free);
    }

    #[test]
    fn freed_cluster_joins_ring_and_is_reused() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(2, 4, 100)).unwrap();
        a.on_active(id(1), t, 6).unwrap();
        a.enable_free_lists();
        a.push_entries(id(1), &[1, 1, 2, 2, 3, 3]).unwrap();

        a.free_elem(id(1), 2, 2).unwrap();
        assert_eq!(a.free_list_head(t).unwrap(), Some(id(1)));
        assert_eq!(a.buffer(id(1)).unwrap().elements(), &[1, 1, 0, 0, 3, 3]);
        assert_eq!(a.buffer(id(1)).unwrap().dead_elems(), 2);

        let reused = a.alloc_from_free_list(t, &[9, 9]).unwrap();
        assert_eq!(reused, Some((id(1), 2)));
        assert_eq!(a.buffer(id(1)).unwrap().elements(), &[1, 1, 9, 9, 3, 3]);
        assert_eq!(a.buffer(id(1)).unwrap().dead_elems(), 0);
        assert_eq!(a.free_list_head(t).unwrap(), None);
        assert_eq!(a.alloc_from_free_list(t, &[7, 7]).unwrap(), None);
    }

    #[test]
    fn partial_cluster_frees_are_not_reusable() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(2, 4, 100)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.enable_free_lists();
        a.push_entries(id(1), &[1, 2, 3, 4]).unwrap();
        a.free_elem(id(1), 0, 1).unwrap();
        assert_eq!(a.buffer(id(1)).unwrap().dead_elems(), 1);
        assert!(a.buffer(id(1)).unwrap().free_list().is_empty());
        assert_eq!(a.free_list_head(t).unwrap(), None);
    }

    #[test]
    fn frees_without_anchor_only_count_dead() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 3).unwrap();
        a.push_entries(id(1), &[1, 2, 3]).unwrap();
        for offset in 0..3 {
            a.free_elem(id(1), offset, 1).unwrap();
        }
        assert_eq!(a.buffer(id(1)).unwrap().dead_elems(), 3);
        assert!(!a.buffer(id(1)).unwrap().is_on_free_list());
    }

    #[test]
    fn hold_removes_buffer_from_ring() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 3).unwrap();
        a.enable_free_lists();
        a.push_entries(id(1), &[1, 2, 3]).unwrap();
        for offset in 0..3 {
            a.free_elem(id(1), offset, 1).unwrap();
        }
        assert!(a.buffer(id(1)).unwrap().is_on_free_list());
        assert_eq!(a.buffer(id(1)).unwrap().free_list(), &[0, 1, 2]);

        a.on_hold(id(1)).unwrap();
        let st = a.buffer(id(1)).unwrap();
        assert!(!st.is_on_free_list());
        assert!(st.free_list().is_empty());
        assert!(st.free_list_anchor().is_none());
        assert_eq!(st.hold_elems(), 0);
        assert_eq!(a.free_list_head(t).unwrap(), None);
    }

    #[test]
    fn anchor_changes_move_ring_membership() {
        let mut a = arena();
        let t0 = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        let t1 = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t0, 2).unwrap();
        a.set_free_list_anchor(id(1), Some(t0)).unwrap();
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.free_elem(id(1), 1, 1).unwrap();
        assert_eq!(a.free_list_head(t0).unwrap(), Some(id(1)));

        a.set_free_list_anchor(id(1), Some(t1)).unwrap();
        assert_eq!(a.free_list_head(t0).unwrap(), None);
        assert_eq!(a.free_list_head(t1).unwrap(), Some(id(1)));

        a.set_free_list_anchor(id(1), None).unwrap();
        assert_eq!(a.free_list_head(t1).unwrap(), None);
        assert!(a.buffer(id(1)).unwrap().free_list().is_empty());
    }

    #[test]
    fn free_slot_ignores_anchor() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.set_free_list_anchor(id(4), Some(t)).unwrap();
        assert!(a.buffer(id(4)).unwrap().free_list_anchor().is_none());
    }

    #[test]
    fn enable_skips_compacting_buffers() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 1).unwrap();
        a.on_active(id(2), t, 1).unwrap();
        a.set_compacting(id(2)).unwrap();
        a.enable_free_lists();
        assert_eq!(a.buffer(id(1)).unwrap().free_list_anchor(), Some(t));
        assert_eq!(a.buffer(id(2)).unwrap().free_list_anchor(), None);
        a.disable_free_lists();
        assert_eq!(a.buffer(id(1)).unwrap().free_list_anchor(), None);
    }

    #[test]
    fn buffers_activated_after_enable_join_ring() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.enable_free_lists();
        a.on_active(id(1), t, 2).unwrap();
        assert_eq!(a.buffer(id(1)).unwrap().free_list_anchor(), Some(t));
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.free_elem(id(1), 0, 1).unwrap();
        assert_eq!(a.free_list_head(t).unwrap(), Some(id(1)));

        a.disable_free_lists();
        assert!(!a.free_lists_enabled());
        a.on_active(id(2), t, 2).unwrap();
        assert_eq!(a.buffer(id(2)).unwrap().free_list_anchor(), None);
    }

    #[test]
    fn ring_head_is_most_recent_joiner() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 1, 100)).unwrap();
        for raw in 1..=3 {
            a.on_active(id(raw), t, 2).unwrap();
            a.push_entries(id(raw), &[raw, raw]).unwrap();
        }
        a.enable_free_lists();
        for raw in 1..=3 {
            a.free_elem(id(raw), 0, 1).unwrap();
        }
        assert_eq!(a.free_list_members(t).unwrap(), vec![id(3), id(2), id(1)]);
        let (reused, _) = a.alloc_from_free_list(t, &[0]).unwrap().unwrap();
        assert_eq!(reused, id(3));
        assert_eq!(a.free_list_head(t).unwrap(), Some(id(2)));
    }

    #[test]
    fn element_hold_then_trim_frees() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.enable_free_lists();
        a.push_entries(id(1), &[1, 2, 3, 4]).unwrap();
        assert!(a.hold_elem(id(1), 2, 1).unwrap());
        assert_eq!(a.buffer(id(1)).unwrap().hold_elems(), 1);
        assert_eq!(a.memory_usage().allocated_bytes_on_hold, 4);

        a.trim_held_elem(id(1), 2, 1).unwrap();
        let st = a.buffer(id(1)).unwrap();
        assert_eq!(st.hold_elems(), 0);
        assert_eq!(st.dead_elems(), 1);
        assert_eq!(st.free_list(), &[2]);
    }

    #[test]
    fn disabled_hold_list_skips_deferral() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 2).unwrap();
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.disable_elem_hold_list(id(1)).unwrap();
        assert!(!a.hold_elem(id(1), 0, 1).unwrap());
        assert_eq!(a.buffer(id(1)).unwrap().hold_elems(), 0);
    }

    #[test]
    fn held_buffer_frees_move_hold_to_dead() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 3).unwrap();
        a.push_entries(id(1), &[1, 2, 3]).unwrap();
        assert!(a.hold_elem(id(1), 0, 1).unwrap());
        a.on_hold(id(1)).unwrap();
        assert!(!a.hold_elem(id(1), 1, 1).unwrap());

        a.trim_held_elem(id(1), 0, 1).unwrap();
        let st = a.buffer(id(1)).unwrap();
        assert_eq!(st.hold_elems(), 2);
        assert_eq!(st.dead_elems(), 1);
        assert_eq!(st.elements(), &[0, 2, 3]);
        assert_eq!(a.memory_usage().dead_bytes, 4);

        a.free_elem(id(1), 1, 1).unwrap();
        let st = a.buffer(id(1)).unwrap();
        assert_eq!(st.hold_elems(), 1);
        assert_eq!(st.dead_elems(), 2);
        a.on_free(id(1)).unwrap();
    }

    #[test]
    #[should_panic(expected = "not a whole number")]
    fn partial_cluster_append_panics() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(4, 4, 100)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.push_entries(id(1), &[1, 2]).unwrap();
    }

    #[test]
    #[should_panic(expected = "overflows buffer")]
    fn append_beyond_capacity_panics() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 2, 2)).unwrap();
        a.on_active(id(1), t, 2).unwrap();
        a.push_entries(id(1), &[1, 2, 3]).unwrap();
    }

    #[test]
    fn fallback_resize_returns_old_allocation() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 1000)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        let data: Vec<u32> = (0..4).collect();
        a.push_entries(id(1), &data).unwrap();
        let before = a.buffer(id(1)).unwrap().alloc_elems();

        let hold = a.fallback_resize(id(1), 8).unwrap();
        assert_eq!(hold.capacity(), before);
        assert_eq!(hold.as_slice(), data.as_slice());
        let st = a.buffer(id(1)).unwrap();
        assert!(st.alloc_elems() >= 12);
        assert_eq!(st.elements(), data.as_slice());
        let snap = a.reader(id(1)).unwrap().snapshot();
        assert_eq!(snap.len(), 4);
        assert_ne!(snap.as_ptr(), hold.as_ptr());
    }

    #[test]
    #[should_panic(expected = "resizing buffer 1 in state hold")]
    fn resize_of_held_buffer_panics() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 1000)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.on_hold(id(1)).unwrap();
        let _ = a.fallback_resize(id(1), 8);
    }

    #[test]
    fn appends_to_older_buffer_keep_aggregates_consistent() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 1000)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.on_active(id(2), t, 4).unwrap();
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.push_entries(id(2), &[3]).unwrap();
        let base = a.type_base(t).unwrap();
        assert_eq!(base.total_active_used_elems(|b| a.buffer(b).unwrap().used_elems()), 3);
        a.drop_buffers();
        let base = a.type_base(t).unwrap();
        assert_eq!(base.active_used_elems(), 0);
        assert_eq!(base.hold_used_elems(), 0);
    }

    #[test]
    fn memory_usage_sums_buffers() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 4)).unwrap();
        a.on_active(id(1), t, 4).unwrap();
        a.on_active(id(2), t, 4).unwrap();
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.free_elem(id(1), 0, 1).unwrap();
        a.on_hold(id(2)).unwrap();

        let usage = a.memory_usage();
        assert_eq!(usage.allocated_bytes, 32);
        assert_eq!(usage.used_bytes, 8);
        assert_eq!(usage.dead_bytes, 4);
        assert_eq!(usage.allocated_bytes_on_hold, 16);
    }

    #[test]
    fn drop_tears_down_live_buffers() {
        let mut a = arena();
        let t = a.add_type(PlainBufferType::with_clusters(1, 4, 100)).unwrap();
        a.on_active(id(1), t, 2).unwrap();
        a.enable_free_lists();
        a.push_entries(id(1), &[1, 2]).unwrap();
        a.free_elem(id(1), 0, 1).unwrap();
        a.on_active(id(2), t, 2).unwrap();
        a.on_hold(id(2)).unwrap();
        drop(a);
    }
}
