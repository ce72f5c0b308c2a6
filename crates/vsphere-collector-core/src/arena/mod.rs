//! Bump-pointer arena used to back the shared string pool and, via the
//! `DeepCopy` callback in [`crate::model`], the cached inventory graph.
//!
//! Offsets are used instead of references so that callers may hold a stable
//! handle across a [`Arena::realloc`], which replaces the backing buffer
//! entirely.

pub mod string_pool;

pub use string_pool::StringPool;

use crate::error::{CollectorError, Result};

/// A handle into an [`Arena`]'s backing buffer. Stable across `realloc`
/// only when the caller re-writes it via the rebuild callback; stable
/// across `compact` unconditionally, since compaction never moves live
/// bytes.
pub type Offset = u32;

/// Sentinel returned by `strdup_interned(None)` and friends.
pub const NULL_OFFSET: Offset = u32::MAX;

const ALIGNMENT: usize = 8;

fn align_up(n: usize) -> usize {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

/// Fixed-size, append-only byte arena. Allocation is bump-pointer; there is
/// no per-allocation free. The only ways space is reclaimed are whole-pool
/// string eviction (tracked by [`StringPool`], not the arena itself) and
/// [`Arena::compact`].
pub struct Arena {
    bytes: Vec<u8>,
    used: usize,
}

impl Arena {
    /// Reserves `size` bytes up front. `size` is rounded up to the nearest
    /// multiple of the allocation alignment.
    pub fn reserve(size: usize) -> Self {
        Arena { bytes: vec![0u8; align_up(size)], used: 0 }
    }

    /// Total reserved capacity in bytes.
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes consumed by live allocations.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bump-allocates `len` bytes, zero-initialized, and returns the
    /// offset of the first byte. Fails if the arena has no room; the
    /// caller is expected to `realloc` first, since allocation failure
    /// after a realloc attempt is unrecoverable for the process.
    pub fn alloc(&mut self, len: usize) -> Result<Offset> {
        let aligned = align_up(len);
        if self.used + aligned > self.bytes.len() {
            return Err(CollectorError::internal(format!(
                "arena exhausted: requested {aligned} bytes, {} available of {}",
                self.bytes.len() - self.used,
                self.bytes.len(),
            )));
        }
        let offset = self.used as Offset;
        self.used += aligned;
        Ok(offset)
    }

    /// Writes `data` at `offset`, which must have been returned by a prior
    /// `alloc` on this arena sized at least `data.len()`.
    pub fn write_at(&mut self, offset: Offset, data: &[u8]) {
        let start = offset as usize;
        self.bytes[start..start + data.len()].copy_from_slice(data);
    }

    /// Reads `len` bytes starting at `offset`.
    pub fn read_at(&self, offset: Offset, len: usize) -> &[u8] {
        let start = offset as usize;
        &self.bytes[start..start + len]
    }

    /// Grows (or otherwise replaces) the arena to `new_size`, invoking
    /// `rebuild` with the old arena and a fresh empty one so the caller can
    /// re-allocate and rewrite every offset it holds. This is the only
    /// supported way to move the backing buffer; existing `Offset` values
    /// captured before the call are invalidated unless the callback
    /// reproduces them identically (it generally will not, since the new
    /// arena starts empty).
    pub fn realloc<F>(&mut self, new_size: usize, rebuild: F) -> Result<()>
    where
        F: FnOnce(&Arena, &mut Arena) -> Result<()>,
    {
        if new_size < self.used {
            return Err(CollectorError::budget("arena realloc below current used size"));
        }
        let mut fresh = Arena::reserve(new_size);
        rebuild(self, &mut fresh)?;
        *self = fresh;
        Ok(())
    }

    /// Extends the backing buffer by `additional` bytes in place, without
    /// moving any existing byte. Every `Offset` handed out before this
    /// call continues to dereference to the same bytes afterward — unlike
    /// [`Arena::realloc`], which replaces the buffer wholesale and
    /// requires the caller's rebuild callback to reproduce every offset.
    /// [`StringPool`] uses this as its growth path precisely because its
    /// offsets are never expected to move once allocated.
    pub fn grow_in_place(&mut self, additional: usize) {
        let additional = align_up(additional);
        let new_len = self.bytes.len() + additional;
        self.bytes.resize(new_len, 0);
    }

    /// Shrinks the backing buffer to exactly `used` bytes if there is slack
    /// to reclaim. Safe without a rebuild callback: the bump allocator
    /// never moves bytes once written, so truncating past the high-water
    /// mark leaves every existing offset's contents untouched.
    ///
    /// Returns `true` if compaction actually shrank the buffer.
    pub fn compact(&mut self) -> bool {
        if self.used < self.bytes.len() {
            self.bytes.truncate(self.used);
            self.bytes.shrink_to_fit();
            true
        } else {
            false
        }
    }
}
