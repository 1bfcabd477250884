//! Thread-local pool of reusable scratch arenas.
//!
//! Independent call sites grab short-lived scratch space through
//! [`Scratch::acquire`] without threading an arena parameter everywhere.
//! Each thread owns its own pool — there is no sharing and therefore no
//! synchronization — and entries are reused across calls, so steady-state
//! scratch allocation performs no syscalls at all.
//!
//! A scope is an arena plus the restore marker taken at acquisition; the
//! [`Scratch`] guard pops back to the marker on drop. Scopes must nest LIFO
//! within a thread. Two scopes may legally share one backing arena (that is
//! what makes the pool small); when a call site needs its allocations to
//! stay valid alongside other live scopes, it declares those scopes in the
//! collision set and the pool picks a different arena.
//!
//! # Example
//!
//! ```
//! use vmarena::scratch::Scratch;
//!
//! let outer = Scratch::acquire(4096, &[]);
//! let names = outer.push_str("transient");
//!
//! // The inner scope must not alias the outer one's arena.
//! let inner = Scratch::acquire(4096, &[&outer]);
//! let tmp = inner.push_bytes(1024, 16, true);
//!
//! drop(inner); // LIFO
//! let _ = (names, tmp);
//! drop(outer);
//! ```

use crate::arena::{Arena, ArenaConfig};
use crate::buffer::Buffer;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::marker::PhantomData;

/// Soft limit on pool entries; growing past it is logged as probable
/// misuse (leaked or excessively nested scopes), not failed.
const SOFT_LIMIT: usize = 5;

/// Smallest reservation handed to a new pool entry.
const MIN_RESERVE: usize = 64 * 1024;

thread_local! {
    static POOL: RefCell<ScratchPool> = RefCell::new(ScratchPool::new());
}

struct ScratchPool {
    entries: Vec<Arena>,
    live: usize,
}

impl ScratchPool {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
            live: 0,
        }
    }

    fn acquire(&mut self, min_size: usize, collisions: &[usize]) -> (usize, u64) {
        let found = (0..self.entries.len()).find(|i| {
            if collisions.contains(i) {
                return false;
            }
            let arena = &self.entries[*i];
            arena.is_empty() || arena.free_capacity() >= min_size
        });

        let index = match found {
            Some(index) => {
                let arena = &mut self.entries[index];
                if arena.is_empty() && arena.capacity() < min_size {
                    arena.vmem_resize(reservation_for(min_size));
                }
                index
            }
            None => {
                self.entries.push(Arena::from_vmem_unchecked(
                    reservation_for(min_size),
                    ArenaConfig::scratch(),
                ));
                if self.entries.len() > SOFT_LIMIT {
                    tracing::warn!(
                        count = self.entries.len(),
                        "scratch pool grew past its soft limit; check for leaked or overly nested scopes"
                    );
                }
                self.entries.len() - 1
            }
        };

        self.live += 1;
        (index, self.entries[index].scope())
    }
}

fn reservation_for(min_size: usize) -> usize {
    min_size.max(MIN_RESERVE).next_power_of_two()
}

/// A scratch scope: a pooled arena plus the restore marker captured at
/// acquisition. Popping back to the marker happens on drop and must nest
/// LIFO with every other scope on this thread.
///
/// Buffers pushed through a scope stay valid until the scope drops (or
/// until a colliding scope was omitted from the collision set — declaring
/// collisions correctly is the caller's contract).
pub struct Scratch {
    index: usize,
    marker: u64,
    // Scopes index a thread-local pool; they must not cross threads.
    _not_send: PhantomData<*const ()>,
}

impl Scratch {
    /// Acquire a scratch scope with at least `min_size` bytes free at its
    /// tip.
    ///
    /// `collisions` lists the live scopes whose allocations must remain
    /// valid independently of this one; the pool will not hand back any of
    /// their arenas. An empty set allows (intentional) nesting on a shared
    /// arena.
    pub fn acquire(min_size: usize, collisions: &[&Scratch]) -> Scratch {
        let indices: SmallVec<[usize; 4]> = collisions.iter().map(|scope| scope.index).collect();
        let (index, marker) = POOL.with(|pool| pool.borrow_mut().acquire(min_size, &indices));
        Scratch {
            index,
            marker,
            _not_send: PhantomData,
        }
    }

    /// Pre-create `count` pool entries of `size` bytes each, so later
    /// acquisitions find warm arenas instead of reserving lazily.
    pub fn preallocate(size: usize, count: usize) {
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            for _ in 0..count {
                pool.entries.push(Arena::from_vmem_unchecked(
                    reservation_for(size),
                    ArenaConfig::scratch(),
                ));
            }
        });
    }

    /// Release every pooled arena on this thread.
    ///
    /// Refused (with a warning) while scopes are live; their guards still
    /// index the pool.
    pub fn clear() {
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            if pool.live > 0 {
                tracing::warn!(
                    live = pool.live,
                    "refusing to clear the scratch pool while scopes are live"
                );
                return;
            }
            pool.entries.clear();
        });
    }

    /// Number of arenas currently held by this thread's pool.
    pub fn pool_size() -> usize {
        POOL.with(|pool| pool.borrow().entries.len())
    }

    /// Number of scopes currently live on this thread.
    pub fn live_scopes() -> usize {
        POOL.with(|pool| pool.borrow().live)
    }

    /// The restore marker captured when this scope was acquired.
    #[inline]
    pub fn marker(&self) -> u64 {
        self.marker
    }

    /// The backing arena's current cumulative extent.
    pub fn scope(&self) -> u64 {
        self.with(|arena| arena.scope())
    }

    /// Allocate `size` bytes aligned to `align` from the scope's arena.
    pub fn push_bytes(&self, size: usize, align: usize, zero: bool) -> Buffer {
        self.with(|arena| arena.push_bytes(size, align, zero))
    }

    /// Copy `items` into the scope's arena.
    pub fn push_array<T: Copy>(&self, items: &[T]) -> Buffer {
        self.with(|arena| arena.push_array(items))
    }

    /// Copy a string's bytes into the scope's arena.
    pub fn push_str(&self, s: &str) -> Buffer {
        self.with(|arena| arena.push_str(s))
    }

    /// Resize the scope's most recent allocation (see [`Arena::morph`]).
    pub fn morph(&self, buffer: Buffer, new_size: usize, align: usize) -> Buffer {
        self.with(|arena| arena.morph(buffer, new_size, align))
    }

    /// Run `f` against the backing arena.
    ///
    /// The pool is borrowed for the duration of `f`; acquiring or dropping
    /// another scope inside `f` panics on the re-entrant borrow rather than
    /// aliasing the arena.
    pub fn with<R>(&self, f: impl FnOnce(&mut Arena) -> R) -> R {
        POOL.with(|pool| f(&mut pool.borrow_mut().entries[self.index]))
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        POOL.with(|pool| {
            let mut pool = pool.borrow_mut();
            let arena = &mut pool.entries[self.index];
            debug_assert!(
                arena.scope() >= self.marker,
                "scratch scopes must be released in LIFO order"
            );
            arena.pop_to(self.marker);
            pool.live -= 1;
        });
    }
}

impl std::fmt::Debug for Scratch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scratch")
            .field("index", &self.index)
            .field("marker", &self.marker)
            .finish()
    }
}
