use crate::frame_alloc::{FrameAllocError, FramePool, FrameStateMap};
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::PhysMapper;

/// Maximum number of simultaneously registered frame pools.
pub const MAX_FRAME_POOLS: usize = 8;

/// Handle of a pool registered in a [`FramePoolRegistry`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct FramePoolId(usize);

impl FramePoolId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// The set of all frame pools, searchable by frame number.
///
/// Every frame belongs to at most one registered pool, so a run of frames
/// can be released knowing only its first frame.
pub struct FramePoolRegistry<'m> {
    pools: [Option<FramePool<'m>>; MAX_FRAME_POOLS],
}

impl Default for FramePoolRegistry<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m> FramePoolRegistry<'m> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pools: [const { None }; MAX_FRAME_POOLS],
        }
    }

    /// Create and register a pool over `[base, base + count)`.
    ///
    /// The state map is placed at the start of `info_frame`, or at the start
    /// of the pool itself if `info_frame` is `None`. External info frames
    /// are not marked in any pool; callers take them from another pool first.
    ///
    /// # Safety
    /// The state map frames must be reachable through `mapper` for `'m` and
    /// must not be used for anything else while the pool is registered.
    ///
    /// ### Panics
    /// See [`FramePool::new`] and [`register`](Self::register).
    pub unsafe fn create<M: PhysMapper>(
        &mut self,
        mapper: &'m M,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
    ) -> FramePoolId {
        let storage_at = info_frame.unwrap_or(base).base();
        // SAFETY: upheld by the caller.
        let storage =
            unsafe { mapper.phys_to_bytes(storage_at, FrameStateMap::bytes_needed(count)) };
        self.register(FramePool::new(base, count, info_frame, storage))
    }

    /// Add an existing pool.
    ///
    /// ### Panics
    /// - If the pool overlaps a registered pool, or all slots are taken.
    pub fn register(&mut self, pool: FramePool<'m>) -> FramePoolId {
        let (base, count) = (pool.base_frame(), pool.frame_count());
        assert!(
            !self.iter().any(|(_, p)| p.overlaps(base, count)),
            "frame pool {base}..+{count} overlaps a registered pool"
        );

        let Some(index) = self.pools.iter().position(Option::is_none) else {
            panic!("no free frame pool slot (limit {MAX_FRAME_POOLS})");
        };
        self.pools[index] = Some(pool);
        log::debug!("frame pool {index} registered: frames {base}..+{count}");
        FramePoolId(index)
    }

    /// Remove a pool from the registry, handing it back.
    ///
    /// ### Panics
    /// - If `id` is not registered.
    pub fn unregister(&mut self, id: FramePoolId) -> FramePool<'m> {
        let Some(pool) = self.pools[id.0].take() else {
            panic!("frame pool {} is not registered", id.0);
        };
        log::debug!("frame pool {} unregistered", id.0);
        pool
    }

    /// ### Panics
    /// - If `id` is not registered.
    #[must_use]
    pub fn get(&self, id: FramePoolId) -> &FramePool<'m> {
        let Some(pool) = &self.pools[id.0] else {
            panic!("frame pool {} is not registered", id.0);
        };
        pool
    }

    /// ### Panics
    /// - If `id` is not registered.
    pub fn get_mut(&mut self, id: FramePoolId) -> &mut FramePool<'m> {
        let Some(pool) = &mut self.pools[id.0] else {
            panic!("frame pool {} is not registered", id.0);
        };
        pool
    }

    /// Shorthand for `get_mut(id).get_frames(n)`.
    ///
    /// # Errors
    /// See [`FramePool::get_frames`].
    #[inline]
    pub fn get_frames(&mut self, id: FramePoolId, n: u32) -> Result<FrameNumber, FrameAllocError> {
        self.get_mut(id).get_frames(n)
    }

    /// The pool owning `frame`.
    #[must_use]
    pub fn find(&self, frame: FrameNumber) -> Option<FramePoolId> {
        self.iter()
            .find(|(_, p)| p.contains(frame))
            .map(|(id, _)| id)
    }

    /// Release the run starting at `first` in whichever pool owns it.
    ///
    /// ### Panics
    /// - If no registered pool owns `first`, or see [`FramePool::release_frames`].
    pub fn release_frames(&mut self, first: FrameNumber) {
        let Some(id) = self.find(first) else {
            panic!("frame {first} is not owned by any frame pool");
        };
        self.get_mut(id).release_frames(first);
    }

    pub fn iter(&self) -> impl Iterator<Item = (FramePoolId, &FramePool<'m>)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.as_ref().map(|p| (FramePoolId(i), p)))
    }
}
