//! Index-based arena storage for build-phase bulk structures
//!
//! Every heavy object graph in this crate (blocks, region descriptors,
//! intervals, reference positions) lives in an [`Arena`] and refers to other
//! objects through `u32` handles rather than references. Handles stay valid
//! across pushes, the whole graph drops at once, and a [`ArenaMark`] checkpoint
//! lets a speculative sub-compilation throw away everything it allocated.
//!
//! [`ArenaPool`] recycles arenas across compilation units so steady-state
//! compilation stops hitting the system allocator for bulk storage.

use parking_lot::Mutex;
use std::ops::{Index, IndexMut};

/// Checkpoint into an [`Arena`], captured by [`Arena::mark`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaMark {
    len: u32,
}

/// Growable store handing out dense `u32` handles
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Create an arena with preallocated capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Arena {
            items: Vec::with_capacity(capacity),
        }
    }

    /// Store an item and return its handle
    pub fn alloc(&mut self, item: T) -> u32 {
        // Handles are u32; the address space runs out long before this does.
        assert!(self.items.len() < u32::MAX as usize, "arena exhausted");
        let handle = self.items.len() as u32;
        self.items.push(item);
        handle
    }

    /// Checked lookup; `None` when the handle is out of range
    pub fn get(&self, handle: u32) -> Option<&T> {
        self.items.get(handle as usize)
    }

    /// Checked mutable lookup
    pub fn get_mut(&mut self, handle: u32) -> Option<&mut T> {
        self.items.get_mut(handle as usize)
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True when nothing has been allocated (or everything released)
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Most recently allocated item
    pub fn last(&self) -> Option<&T> {
        self.items.last()
    }

    /// Most recently allocated item, mutably
    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.last_mut()
    }

    /// Capture the current allocation point
    pub fn mark(&self) -> ArenaMark {
        ArenaMark {
            len: self.items.len() as u32,
        }
    }

    /// Drop every item allocated after `mark`
    ///
    /// Handles handed out after the mark become dangling; callers own the
    /// discipline of not retaining them across a release.
    pub fn release(&mut self, mark: ArenaMark) {
        debug_assert!(mark.len as usize <= self.items.len());
        self.items.truncate(mark.len as usize);
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Iterate `(handle, item)` pairs in allocation order
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (i as u32, item))
    }

    /// Iterate `(handle, item)` pairs mutably
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.items
            .iter_mut()
            .enumerate()
            .map(|(i, item)| (i as u32, item))
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}

impl<T> Index<u32> for Arena<T> {
    type Output = T;

    fn index(&self, handle: u32) -> &T {
        &self.items[handle as usize]
    }
}

impl<T> IndexMut<u32> for Arena<T> {
    fn index_mut(&mut self, handle: u32) -> &mut T {
        &mut self.items[handle as usize]
    }
}

/// Reuse pool for arenas, shared between compilation units
///
/// A checked-out arena is exclusively owned by its unit; only the pool's free
/// list is synchronized.
pub struct ArenaPool<T> {
    free: Mutex<Vec<Arena<T>>>,
}

impl<T> ArenaPool<T> {
    /// Create an empty pool
    pub fn new() -> Self {
        ArenaPool {
            free: Mutex::new(Vec::new()),
        }
    }

    /// Take an arena from the pool, or create a fresh one
    pub fn checkout(&self) -> Arena<T> {
        self.free.lock().pop().unwrap_or_default()
    }

    /// Return an arena to the pool, discarding its contents
    pub fn checkin(&self, mut arena: Arena<T>) {
        arena.clear();
        self.free.lock().push(arena);
    }

    /// Number of idle arenas currently pooled
    pub fn idle(&self) -> usize {
        self.free.lock().len()
    }
}

impl<T> Default for ArenaPool<T> {
    fn default() -> Self {
        ArenaPool::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_index() {
        let mut arena = Arena::new();
        let a = arena.alloc("first");
        let b = arena.alloc("second");
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        assert_eq!(arena[a], "first");
        assert_eq!(arena[b], "second");
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn test_mark_release() {
        let mut arena = Arena::new();
        arena.alloc(10);
        let mark = arena.mark();
        arena.alloc(20);
        arena.alloc(30);
        assert_eq!(arena.len(), 3);
        arena.release(mark);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena[0], 10);
    }

    #[test]
    fn test_iter_pairs() {
        let mut arena = Arena::new();
        arena.alloc('x');
        arena.alloc('y');
        let pairs: Vec<_> = arena.iter().map(|(h, c)| (h, *c)).collect();
        assert_eq!(pairs, vec![(0, 'x'), (1, 'y')]);
    }

    #[test]
    fn test_pool_recycles() {
        let pool: ArenaPool<u64> = ArenaPool::new();
        let mut arena = pool.checkout();
        arena.alloc(7);
        pool.checkin(arena);
        assert_eq!(pool.idle(), 1);
        let reused = pool.checkout();
        assert!(reused.is_empty());
        assert_eq!(pool.idle(), 0);
    }
}
