//! # Contiguous Physical Frame Pools
//!
//! A [`FramePool`] manages a contiguous range of physical frames and hands
//! out runs of consecutive frames. Every frame carries a two-bit
//! [`FrameState`], packed four to a byte in a [`FrameStateMap`]:
//!
//! ```text
//! byte k:  | 7 6 | 5 4 | 3 2 | 1 0 |
//!          | 4k+3| 4k+2| 4k+1| 4k  |   (relative frame numbers)
//! ```
//!
//! A run handed out by [`FramePool::get_frames`] starts with a
//! [`FrameState::HeadOfSequence`] frame followed by [`FrameState::Used`]
//! frames, so [`FramePool::release_frames`] needs only the first frame to
//! find the end of the run.
//!
//! The state map lives either inside the pool's own first frames (which are
//! then marked [`FrameState::Inaccessible`]) or in frames supplied by the
//! caller, typically taken from another pool. Pools are created and looked
//! up through the [`FramePoolRegistry`].

mod registry;

pub use crate::frame_alloc::registry::{FramePoolId, FramePoolRegistry, MAX_FRAME_POOLS};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE};

/// Frames described by one byte of a state map.
pub const FRAMES_PER_BYTE: u32 = 4;

/// Allocation state of one frame.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FrameState {
    /// Available for allocation.
    Free = 0b00,
    /// First frame of an allocated run.
    HeadOfSequence = 0b01,
    /// Non-first frame of an allocated run.
    Used = 0b10,
    /// Never handed out (state map storage, memory holes).
    Inaccessible = 0b11,
}

impl FrameState {
    #[inline]
    const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::Free,
            0b01 => Self::HeadOfSequence,
            0b10 => Self::Used,
            _ => Self::Inaccessible,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("no run of {requested} free frames in the pool starting at frame {pool_base}")]
    OutOfFrames {
        requested: u32,
        pool_base: FrameNumber,
    },
}

/// Frames needed to store the state map of a pool with `frames` frames
/// (two bits per frame, rounded up to whole frames).
///
/// ```rust
/// # use kernel_alloc::frame_alloc::needed_info_frames;
/// assert_eq!(needed_info_frames(1), 1);
/// assert_eq!(needed_info_frames(16384), 1);
/// assert_eq!(needed_info_frames(16385), 2);
/// ```
#[inline]
#[must_use]
pub const fn needed_info_frames(frames: u32) -> u32 {
    frames.div_ceil(PAGE_SIZE * FRAMES_PER_BYTE)
}

/// Two-bit-per-frame state storage.
pub struct FrameStateMap<'m> {
    bytes: &'m mut [u8],
    frames: u32,
}

impl<'m> FrameStateMap<'m> {
    /// Bytes needed to describe `frames` frames.
    #[inline]
    #[must_use]
    pub const fn bytes_needed(frames: u32) -> usize {
        frames.div_ceil(FRAMES_PER_BYTE) as usize
    }

    /// Take over `bytes` as the map for `frames` frames; all frames start out
    /// [`FrameState::Free`].
    ///
    /// ### Panics
    /// - If `bytes` is too small for `frames` frames.
    #[must_use]
    pub fn new(bytes: &'m mut [u8], frames: u32) -> Self {
        let needed = Self::bytes_needed(frames);
        assert!(
            bytes.len() >= needed,
            "state map needs {needed} bytes, got {}",
            bytes.len()
        );
        let bytes = &mut bytes[..needed];
        bytes.fill(0);
        Self { bytes, frames }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> u32 {
        self.frames
    }

    #[inline]
    const fn locate(&self, rel: u32) -> (usize, u32) {
        assert!(rel < self.frames, "relative frame outside the state map");
        ((rel / FRAMES_PER_BYTE) as usize, (rel % FRAMES_PER_BYTE) * 2)
    }

    /// State of the frame `rel` frames past the pool base.
    #[inline]
    #[must_use]
    pub fn get(&self, rel: u32) -> FrameState {
        let (index, shift) = self.locate(rel);
        FrameState::from_bits(self.bytes[index] >> shift)
    }

    #[inline]
    pub fn set(&mut self, rel: u32, state: FrameState) {
        let (index, shift) = self.locate(rel);
        let byte = &mut self.bytes[index];
        *byte = (*byte & !(0b11 << shift)) | ((state as u8) << shift);
    }
}

/// Where a pool keeps its state map.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum InfoFrames {
    /// In the pool's own first frames.
    SelfHosted,
    /// In frames owned by someone else, starting at this frame.
    External(FrameNumber),
}

/// A contiguous range of physical frames with run allocation.
pub struct FramePool<'m> {
    base: FrameNumber,
    count: u32,
    info: InfoFrames,
    states: FrameStateMap<'m>,
    free: u32,
}

impl<'m> FramePool<'m> {
    /// Manage frames `[base, base + count)`, keeping the state map in
    /// `storage`.
    ///
    /// With `info_frame == None` the state map is expected to live in the
    /// pool's own first [`needed_info_frames`] frames, which are marked
    /// [`FrameState::Inaccessible`].
    ///
    /// ### Panics
    /// - If `count == 0`, or the state map would consume the whole pool.
    #[must_use]
    pub fn new(
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
        storage: &'m mut [u8],
    ) -> Self {
        assert!(count > 0, "a frame pool must own at least one frame");
        let info_frames = needed_info_frames(count);
        assert!(
            info_frames < count,
            "state map of {info_frames} frames leaves nothing to allocate in a {count}-frame pool"
        );

        let mut pool = Self {
            base,
            count,
            info: info_frame.map_or(InfoFrames::SelfHosted, InfoFrames::External),
            states: FrameStateMap::new(storage, count),
            free: count,
        };
        if pool.info == InfoFrames::SelfHosted {
            pool.mark_inaccessible(base, info_frames);
        }
        pool
    }

    #[inline]
    #[must_use]
    pub const fn base_frame(&self) -> FrameNumber {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn frame_count(&self) -> u32 {
        self.count
    }

    #[inline]
    #[must_use]
    pub const fn info_frames(&self) -> InfoFrames {
        self.info
    }

    /// Number of frames currently [`FrameState::Free`].
    #[inline]
    #[must_use]
    pub const fn free_frames(&self) -> u32 {
        self.free
    }

    /// Whether `frame` belongs to this pool.
    #[inline]
    #[must_use]
    pub const fn contains(&self, frame: FrameNumber) -> bool {
        frame.as_u32() >= self.base.as_u32() && frame.as_u32() - self.base.as_u32() < self.count
    }

    /// Whether any frame of `[base, base + count)` belongs to this pool.
    #[inline]
    #[must_use]
    pub const fn overlaps(&self, base: FrameNumber, count: u32) -> bool {
        let end = self.base.as_u32().saturating_add(self.count);
        let other_end = base.as_u32().saturating_add(count);
        self.base.as_u32() < other_end && base.as_u32() < end
    }

    /// State of an owned frame.
    ///
    /// ### Panics
    /// - If `frame` is not owned by this pool.
    #[must_use]
    pub fn state(&self, frame: FrameNumber) -> FrameState {
        assert!(self.contains(frame), "frame {frame} is not owned by this pool");
        self.states.get(frame - self.base)
    }

    fn set_state(&mut self, rel: u32, state: FrameState) {
        let was_free = self.states.get(rel) == FrameState::Free;
        let is_free = state == FrameState::Free;
        self.states.set(rel, state);
        match (was_free, is_free) {
            (true, false) => self.free -= 1,
            (false, true) => self.free += 1,
            _ => {}
        }
    }

    /// Allocate `n` consecutive free frames, first fit.
    ///
    /// On success the first frame becomes [`FrameState::HeadOfSequence`], the
    /// rest [`FrameState::Used`], and the absolute number of the first frame
    /// is returned.
    ///
    /// ### Panics
    /// - If `n == 0`.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfFrames`] if no run of `n` free frames exists.
    pub fn get_frames(&mut self, n: u32) -> Result<FrameNumber, FrameAllocError> {
        assert!(n > 0, "cannot allocate zero frames");

        let mut i = 0;
        'seek: while n <= self.count && i <= self.count - n {
            for j in 0..n {
                if self.states.get(i + j) != FrameState::Free {
                    // Nothing before i + j + 1 can start a run of n free frames.
                    i += j + 1;
                    continue 'seek;
                }
            }

            self.set_state(i, FrameState::HeadOfSequence);
            for j in 1..n {
                self.set_state(i + j, FrameState::Used);
            }
            let first = self.base + i;
            log::trace!("frames {first}..+{n} allocated");
            return Ok(first);
        }

        log::warn!(
            "frame pool at {}: no run of {n} free frames ({} free)",
            self.base,
            self.free
        );
        Err(FrameAllocError::OutOfFrames {
            requested: n,
            pool_base: self.base,
        })
    }

    /// Mark `n` frames starting at `base` as never allocatable.
    ///
    /// ### Panics
    /// - If `n == 0` or the range is not entirely owned by this pool.
    pub fn mark_inaccessible(&mut self, base: FrameNumber, n: u32) {
        assert!(n > 0, "cannot mark zero frames");
        assert!(
            self.contains(base) && (base - self.base) + n <= self.count,
            "frames {base}..+{n} are not owned by the pool at {}",
            self.base
        );
        let start = base - self.base;
        for rel in start..start + n {
            self.set_state(rel, FrameState::Inaccessible);
        }
        log::debug!("frames {base}..+{n} marked inaccessible");
    }

    /// Free the run that starts at `first`.
    ///
    /// Frees `first` and every directly following [`FrameState::Used`] frame,
    /// stopping at the first frame in any other state or at the pool end.
    ///
    /// ### Panics
    /// - If `first` is not owned, or is not a [`FrameState::HeadOfSequence`].
    pub fn release_frames(&mut self, first: FrameNumber) {
        assert!(self.contains(first), "frame {first} is not owned by this pool");
        let start = first - self.base;
        assert_eq!(
            self.states.get(start),
            FrameState::HeadOfSequence,
            "frame {first} does not start an allocated run"
        );

        let mut rel = start;
        loop {
            self.set_state(rel, FrameState::Free);
            rel += 1;
            if rel >= self.count || self.states.get(rel) != FrameState::Used {
                break;
            }
        }
        log::trace!("frames {first}..+{} released", rel - start);
    }
}
