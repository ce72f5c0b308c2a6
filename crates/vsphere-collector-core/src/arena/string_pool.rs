//! Reference-counted string interning on top of an [`Arena`].
//!
//! Each interned string is stored as a 4-byte little-endian refcount prefix
//! followed by the raw UTF-8 bytes. `strdup_interned` increments an
//! existing entry's refcount in place; `strfree` decrements and, on
//! reaching zero, drops the hash-set entry (the bytes themselves are only
//! reclaimed by a later `compact` or `realloc`).

use std::collections::HashMap;

use super::{Arena, Offset, NULL_OFFSET};
use crate::error::{CollectorError, Result};

const REFCOUNT_FIELD_SIZE: usize = 4;

/// Hard ceiling on how large the backing arena is allowed to grow. Reaching
/// it turns an allocation failure into the fatal `Internal` error the
/// scheduler treats as unrecoverable, rather than growing without bound on
/// a runaway string leak.
const MAX_ARENA_BYTES: usize = 1 << 30;

#[derive(Debug, Clone, Copy)]
struct Entry {
    offset: Offset,
    len: u32,
}

/// A string pool backed by a single [`Arena`]. Holds the only live copy of
/// each distinct string; callers receive [`Offset`] handles, not owned
/// strings, matching the source's offset-based sharing.
pub struct StringPool {
    arena: Arena,
    by_content: HashMap<String, Entry>,
    by_offset: HashMap<Offset, String>,
}

impl StringPool {
    pub fn new(arena: Arena) -> Self {
        StringPool { arena, by_content: HashMap::new(), by_offset: HashMap::new() }
    }

    pub fn arena(&self) -> &Arena {
        &self.arena
    }

    pub fn arena_mut(&mut self) -> &mut Arena {
        &mut self.arena
    }

    /// Interns `value`, returning its offset. Passing `None` returns
    /// [`NULL_OFFSET`] without touching the pool, matching the source's
    /// "string-dup of null" sentinel.
    pub fn strdup_interned(&mut self, value: Option<&str>) -> Result<Offset> {
        let value = match value {
            Some(v) => v,
            None => return Ok(NULL_OFFSET),
        };

        if let Some(entry) = self.by_content.get(value).copied() {
            self.bump_refcount(entry.offset, 1);
            return Ok(entry.offset);
        }

        let bytes = value.as_bytes();
        let total = REFCOUNT_FIELD_SIZE + bytes.len();
        let offset = match self.arena.alloc(total) {
            Ok(offset) => offset,
            Err(_) => {
                self.grow_for(total)?;
                self.arena.alloc(total)?
            }
        };
        self.arena.write_at(offset, &1u32.to_le_bytes());
        self.arena.write_at(offset + REFCOUNT_FIELD_SIZE as Offset, bytes);

        let entry = Entry { offset, len: bytes.len() as u32 };
        self.by_content.insert(value.to_string(), entry);
        self.by_offset.insert(offset, value.to_string());
        Ok(offset)
    }

    /// Grows the backing arena in place until it has room for at least
    /// `needed` more bytes, doubling each step. Unlike [`Arena::realloc`],
    /// this never moves existing bytes, so every offset already handed out
    /// stays valid — the pool's own offsets never need rewriting on growth.
    /// Fails only once the arena would exceed [`MAX_ARENA_BYTES`], which per
    /// the scheduler's fold-back path is treated as fatal.
    fn grow_for(&mut self, needed: usize) -> Result<()> {
        let current_size = self.arena.size();
        let mut new_size = current_size.max(64) * 2;
        while new_size.saturating_sub(self.arena.used()) < needed {
            new_size *= 2;
        }
        if new_size > MAX_ARENA_BYTES {
            return Err(CollectorError::internal(format!(
                "string pool would exceed the {MAX_ARENA_BYTES}-byte arena ceiling growing to intern a {needed}-byte string"
            )));
        }
        self.arena.grow_in_place(new_size - current_size);
        Ok(())
    }

    /// Looks up the offset of an already-interned string by its content,
    /// without bumping its refcount. Used by callers that only have the
    /// owned `String` (not the `Offset`) at hand, such as freeing a
    /// previous-generation snapshot before it is dropped.
    pub fn offset_of(&self, content: &str) -> Option<Offset> {
        self.by_content.get(content).map(|entry| entry.offset)
    }

    /// Convenience combining [`StringPool::offset_of`] and
    /// [`StringPool::strfree`]; a no-op if `content` is not currently
    /// interned.
    pub fn strfree_by_content(&mut self, content: &str) {
        if let Some(offset) = self.offset_of(content) {
            self.strfree(offset);
        }
    }

    /// Decrements the refcount for the string at `offset`. Removing the
    /// hash-set entries when the count reaches zero; a no-op on
    /// [`NULL_OFFSET`].
    pub fn strfree(&mut self, offset: Offset) {
        if offset == NULL_OFFSET {
            return;
        }
        let remaining = self.bump_refcount(offset, -1);
        if remaining == 0 {
            if let Some(content) = self.by_offset.remove(&offset) {
                self.by_content.remove(&content);
            }
        }
    }

    /// Reads back the interned value at `offset`, or `None` for
    /// [`NULL_OFFSET`].
    pub fn read(&self, offset: Offset) -> Option<&str> {
        if offset == NULL_OFFSET {
            return None;
        }
        self.by_offset.get(&offset).map(String::as_str)
    }

    /// Current refcount for the string at `offset`, or `0` if it has been
    /// fully freed or never existed.
    pub fn refcount(&self, offset: Offset) -> u32 {
        if offset == NULL_OFFSET {
            return 0;
        }
        let bytes = self.arena.read_at(offset, REFCOUNT_FIELD_SIZE);
        u32::from_le_bytes(bytes.try_into().unwrap())
    }

    /// Number of distinct interned strings currently live.
    pub fn len(&self) -> usize {
        self.by_content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_content.is_empty()
    }

    fn bump_refcount(&mut self, offset: Offset, delta: i64) -> u32 {
        let current = self.refcount(offset) as i64;
        let updated = (current + delta).max(0) as u32;
        self.arena.write_at(offset, &updated.to_le_bytes());
        updated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_the_same_content_reuses_the_offset() {
        let mut pool = StringPool::new(Arena::reserve(256));
        let a = pool.strdup_interned(Some("esxi-01")).unwrap();
        let b = pool.strdup_interned(Some("esxi-01")).unwrap();
        assert_eq!(a, b);
        assert_eq!(pool.refcount(a), 2);
    }

    #[test]
    fn strfree_removes_entry_on_zero_refcount() {
        let mut pool = StringPool::new(Arena::reserve(256));
        let off = pool.strdup_interned(Some("datastore-1")).unwrap();
        pool.strdup_interned(Some("datastore-1")).unwrap();
        assert_eq!(pool.refcount(off), 2);

        pool.strfree(off);
        assert_eq!(pool.refcount(off), 1);
        assert!(pool.read(off).is_some());

        pool.strfree(off);
        assert_eq!(pool.refcount(off), 0);
        assert!(pool.read(off).is_none());
        assert!(pool.is_empty());
    }

    #[test]
    fn null_value_returns_sentinel_without_touching_pool() {
        let mut pool = StringPool::new(Arena::reserve(64));
        let off = pool.strdup_interned(None).unwrap();
        assert_eq!(off, NULL_OFFSET);
        assert_eq!(pool.refcount(off), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn strfree_on_null_offset_is_a_noop() {
        let mut pool = StringPool::new(Arena::reserve(64));
        pool.strfree(NULL_OFFSET);
        assert!(pool.is_empty());
    }

    #[test]
    fn distinct_content_gets_distinct_offsets() {
        let mut pool = StringPool::new(Arena::reserve(256));
        let a = pool.strdup_interned(Some("host-a")).unwrap();
        let b = pool.strdup_interned(Some("host-b")).unwrap();
        assert_ne!(a, b);
        assert_eq!(pool.read(a), Some("host-a"));
        assert_eq!(pool.read(b), Some("host-b"));
    }
}
