//! Bump-pointer arenas over reserved virtual memory.
//!
//! An [`Arena`] owns a contiguous byte range — either a virtual-memory
//! reservation or a caller-supplied buffer — and serves allocations by
//! advancing a single offset. Release is bulk and stack-disciplined:
//! callers capture a scope marker, allocate freely, then [`Arena::pop_to`]
//! the marker to retire everything pushed after it.
//!
//! # Growth
//!
//! An arena has at most one growth mode, fixed at creation:
//!
//! - **Chain growth** links a successor arena when the local range fills.
//!   Existing pointers stay valid; capacity extends going forward only.
//! - **Vmem growth** replaces the backing reservation with a larger one.
//!   This invalidates every pointer previously handed out by the arena;
//!   [`Arena::is_stable`] reports `false` for arenas configured this way.
//!
//! # Commit
//!
//! Reservations are committed lazily in fixed page-multiple chunks as the
//! tip advances (`commit_on_push`), or fully up front (`full_commit`).
//! Arenas that drain to empty can return their pages to the OS
//! (`decommit_on_empty`).

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::poison;
use crate::vmem;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;

/// Allocation policy for an [`Arena`], fixed at creation.
///
/// Validated by the constructors: an arena needs at least one of
/// `commit_on_push`/`full_commit` (one that never commits is a
/// configuration error), and the two growth modes are mutually exclusive
/// because they make incompatible pointer-stability promises.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Commit pages forward in chunks as the allocation tip advances.
    pub commit_on_push: bool,
    /// Return committed pages to the OS when the arena drains to empty.
    pub decommit_on_empty: bool,
    /// Commit the whole range at creation instead of lazily.
    pub full_commit: bool,
    /// On exhaustion, return the empty buffer instead of aborting.
    pub allow_failure: bool,
    /// Permit `morph` to relocate an allocation by copying.
    pub allow_move_morph: bool,
    /// Grow by linking a successor arena; existing pointers stay valid.
    pub chain_growth: bool,
    /// Grow by replacing the backing reservation; invalidates all
    /// previously returned pointers into the arena.
    pub vmem_growth: bool,
}

impl ArenaConfig {
    /// Lazily committed, no growth. The default policy for
    /// [`Arena::from_vmem`].
    pub fn lazy() -> Self {
        Self {
            commit_on_push: true,
            ..Self::default()
        }
    }

    /// Fully committed up front, no growth. The natural policy for
    /// fixed-buffer ("stack") arenas.
    pub fn fixed() -> Self {
        Self {
            full_commit: true,
            ..Self::default()
        }
    }

    /// The scratch-pool policy: lazy commit, pages returned when the arena
    /// drains, growth by chaining.
    pub fn scratch() -> Self {
        Self {
            commit_on_push: true,
            decommit_on_empty: true,
            chain_growth: true,
            ..Self::default()
        }
    }

    fn validate(self) -> Result<Self> {
        if !self.commit_on_push && !self.full_commit {
            return Err(Error::InvalidConfig(
                "an arena that never commits cannot serve pushes; set commit_on_push or full_commit",
            ));
        }
        if self.chain_growth && self.vmem_growth {
            return Err(Error::InvalidConfig(
                "chain_growth and vmem_growth are mutually exclusive; pick one growth mode per arena",
            ));
        }
        Ok(self)
    }
}

/// A bump allocator over a byte range sourced from virtual memory or from
/// an externally supplied buffer.
///
/// An arena belongs to exactly one execution context: it is `Send` (the
/// whole allocation context moves with it) but deliberately not `Sync`.
/// Buffers it returns are raw views whose validity ends at the matching
/// `pop_to`/`reset` or at the arena's release.
pub struct Arena {
    /// The full reserved range.
    bytes: Buffer,
    /// Offset of the allocation tip.
    current: usize,
    /// Offset up to which pages are physically committed.
    committed: usize,
    /// Owned successor for chain growth.
    next: Option<Box<Arena>>,
    config: ArenaConfig,
    /// Whether `bytes` is our own reservation (released on drop) or a
    /// wrapped caller buffer (commit/decommit become bookkeeping only).
    owns_vmem: bool,
}

// SAFETY: an Arena owns its byte range exclusively; moving it to another
// thread moves the whole allocation context with it. It is not Sync.
unsafe impl Send for Arena {}

impl Arena {
    /// Wrap externally supplied, already-accessible memory.
    ///
    /// The arena does not take ownership: the caller keeps the buffer's
    /// storage alive for the arena's lifetime and releases it afterward.
    /// Commit and decommit become pure bookkeeping for wrapped buffers.
    pub fn from_buffer(buffer: Buffer, config: ArenaConfig) -> Result<Self> {
        let config = config.validate()?;
        if buffer.is_empty() {
            return Err(Error::InvalidBuffer("cannot build an arena over an empty buffer"));
        }
        if config.vmem_growth {
            return Err(Error::InvalidConfig(
                "vmem_growth needs an owned reservation; use from_vmem",
            ));
        }
        let committed = if config.full_commit { buffer.len() } else { 0 };
        Ok(Self {
            bytes: buffer,
            current: 0,
            committed,
            next: None,
            config,
            owns_vmem: false,
        })
    }

    /// Reserve `size` bytes of virtual memory and build an arena over it.
    ///
    /// Commit is lazy unless `full_commit` is set. The reservation is
    /// released when the arena drops.
    pub fn from_vmem(size: usize, config: ArenaConfig) -> Result<Self> {
        let config = config.validate()?;
        if size == 0 {
            return Err(Error::InvalidBuffer("cannot reserve a zero-sized arena"));
        }
        Ok(Self::from_vmem_unchecked(size, config))
    }

    /// Internal constructor for configs already validated (chain
    /// successors, scratch-pool entries).
    pub(crate) fn from_vmem_unchecked(size: usize, config: ArenaConfig) -> Self {
        let bytes = vmem::reserve(size, config.full_commit);
        let committed = if config.full_commit { bytes.len() } else { 0 };
        Self {
            bytes,
            current: 0,
            committed,
            next: None,
            config,
            owns_vmem: true,
        }
    }

    /// The allocation policy this arena was created with.
    #[inline]
    pub fn config(&self) -> ArenaConfig {
        self.config
    }

    /// Local capacity in bytes (this arena only, not the chain).
    #[inline]
    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    /// Local allocation tip (this arena only, not the chain).
    #[inline]
    pub fn used(&self) -> usize {
        self.current
    }

    /// Bytes physically committed in this arena (bookkeeping value for
    /// wrapped buffers).
    #[inline]
    pub fn committed(&self) -> usize {
        self.committed
    }

    /// Whether nothing is allocated anywhere in the chain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.scope() == 0
    }

    /// Whether pointers returned by this arena survive growth.
    ///
    /// Only vmem growth relocates the backing range; chained arenas and
    /// fixed arenas are stable.
    #[inline]
    pub fn is_stable(&self) -> bool {
        !self.config.vmem_growth
    }

    /// The full reserved range of this arena (not the chain).
    #[inline]
    pub fn reserved(&self) -> Buffer {
        self.bytes
    }

    /// View over the locally allocated prefix `[0, used)`.
    #[inline]
    pub fn used_bytes(&self) -> Buffer {
        self.bytes.truncated(self.current)
    }

    /// Free bytes remaining at the tip of the chain.
    pub fn free_capacity(&self) -> usize {
        match self.next.as_ref() {
            Some(next) => next.free_capacity(),
            None => self.bytes.len() - self.current,
        }
    }

    /// Number of chained successors holding the overflow of this arena.
    pub fn chain_len(&self) -> usize {
        self.next.as_ref().map_or(0, |next| 1 + next.chain_len())
    }

    /// The cumulative allocated extent across the chain.
    ///
    /// This is the scope marker: capture it before a batch of pushes and
    /// hand it back to [`Arena::pop_to`] to restore the arena to exactly
    /// this state.
    pub fn scope(&self) -> u64 {
        self.current as u64 + self.next.as_ref().map_or(0, |next| next.scope())
    }

    /// Allocate `size` bytes aligned to `align`, optionally zero-filled.
    ///
    /// On exhaustion the configured growth mode is applied; without one,
    /// the arena aborts unless `allow_failure` is set, in which case the
    /// empty buffer comes back and the caller must check.
    pub fn push_bytes(&mut self, size: usize, align: usize, zero: bool) -> Buffer {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        if size == 0 {
            return Buffer::empty();
        }
        if let Some(next) = self.next.as_mut() {
            // The chain extends this arena logically; pushes land at the end.
            return next.push_bytes(size, align, zero);
        }

        let start = match self.try_fit(size, align) {
            Some(start) => start,
            None => {
                if self.config.vmem_growth {
                    self.vmem_grow(size.saturating_add(align));
                    match self.try_fit(size, align) {
                        Some(start) => start,
                        None => return self.alloc_failed(size),
                    }
                } else if self.config.chain_growth {
                    let successor = self.make_successor(size.saturating_add(align));
                    let next = self.next.insert(Box::new(successor));
                    return next.push_bytes(size, align, zero);
                } else {
                    return self.alloc_failed(size);
                }
            }
        };

        let end = start + size;
        self.current = end;
        if end > self.committed && self.config.commit_on_push {
            self.commit_to(end);
        }
        let buffer = self.bytes.slice(start, size);
        poison::unpoison(buffer.as_ptr(), size);
        if zero {
            // SAFETY: the range was just committed and is exclusively ours.
            unsafe { std::ptr::write_bytes(buffer.as_ptr(), 0, size) };
        }
        buffer
    }

    /// Copy `items` into the arena, aligned for `T`.
    pub fn push_array<T: Copy>(&mut self, items: &[T]) -> Buffer {
        let size = mem::size_of_val(items);
        let buffer = self.push_bytes(size, mem::align_of::<T>(), false);
        if !buffer.is_empty() {
            // SAFETY: a freshly pushed committed range of exactly `size`
            // bytes, disjoint from `items`.
            unsafe {
                std::ptr::copy_nonoverlapping(items.as_ptr().cast::<u8>(), buffer.as_ptr(), size)
            };
        }
        buffer
    }

    /// Copy a string's bytes into the arena.
    pub fn push_str(&mut self, s: &str) -> Buffer {
        self.push_array(s.as_bytes())
    }

    /// Restore the arena to a previously captured scope marker, retiring
    /// everything pushed after it.
    ///
    /// Successor bytes retire before local bytes (the chain extends the
    /// local arena logically); a drained successor is released and the
    /// chain link removed. Scopes must be restored in LIFO order.
    pub fn pop_to(&mut self, marker: u64) {
        let total = self.scope();
        debug_assert!(marker <= total, "pop_to marker exceeds the allocated extent");
        self.retire((total.saturating_sub(marker)) as usize);
    }

    /// Retire everything in the arena and its chain.
    pub fn reset(&mut self) {
        self.pop_to(0);
    }

    /// Resize the most recent allocation, in place when possible.
    ///
    /// Case analysis, first match wins:
    /// - empty `buffer`: plain allocation (`new_size == 0` stays empty);
    /// - `new_size == buffer.len()`: no-op;
    /// - `new_size == 0`: tip allocations are popped, anything else becomes
    ///   tip waste reclaimed by a later `pop_to`;
    /// - tip allocations grow or shrink in place, no copy;
    /// - non-tip shrinks truncate the view, no copy;
    /// - otherwise, with `allow_move_morph`, a fresh region is pushed and
    ///   the contents copied; without it, the exhaustion policy applies.
    pub fn morph(&mut self, buffer: Buffer, new_size: usize, align: usize) -> Buffer {
        if let Some(next) = self.next.as_mut() {
            // Tip operations belong to the arena currently receiving pushes.
            return next.morph(buffer, new_size, align);
        }
        if buffer.is_empty() {
            return self.push_bytes(new_size, align, false);
        }
        if new_size == buffer.len() {
            return buffer;
        }

        let is_tip = buffer.addr() >= self.bytes.addr()
            && buffer.addr() + buffer.len() == self.bytes.addr() + self.current;

        if new_size == 0 {
            if is_tip {
                self.retire_local(buffer.len());
            }
            return Buffer::empty();
        }

        if is_tip {
            if new_size < buffer.len() {
                self.retire_local(buffer.len() - new_size);
                return buffer.truncated(new_size);
            }
            let delta = new_size - buffer.len();
            if self
                .current
                .checked_add(delta)
                .is_some_and(|end| end <= self.bytes.len())
            {
                self.current += delta;
                if self.current > self.committed && self.config.commit_on_push {
                    self.commit_to(self.current);
                }
                poison::unpoison(buffer.end(), delta);
                return Buffer::new(buffer.as_ptr(), new_size);
            }
            // Tip grow past capacity: relocation or failure below.
        } else if new_size < buffer.len() {
            return buffer.truncated(new_size);
        }

        if self.config.allow_move_morph {
            let fresh = self.push_bytes(new_size, align, false);
            if !fresh.is_empty() {
                // SAFETY: disjoint committed regions; length bounded by both.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        buffer.as_ptr(),
                        fresh.as_ptr(),
                        buffer.len().min(new_size),
                    )
                };
            }
            return fresh;
        }
        self.alloc_failed(new_size)
    }

    /// Replace the backing reservation of an empty arena.
    ///
    /// Used by the scratch pool to right-size drained entries. Resizing a
    /// non-empty arena would discard live allocations, so this is a no-op
    /// (with a debug assertion) unless the arena is empty and owns its
    /// reservation.
    pub fn vmem_resize(&mut self, new_size: usize) {
        debug_assert!(self.is_empty(), "resizing a non-empty arena discards live allocations");
        debug_assert!(self.owns_vmem, "cannot resize a wrapped buffer");
        if !self.owns_vmem || !self.is_empty() || new_size == 0 {
            return;
        }
        self.next = None;
        let fresh = vmem::reserve(new_size, self.config.full_commit);
        let old = mem::replace(&mut self.bytes, fresh);
        // SAFETY: `old` is our own drained reservation; nothing references it.
        unsafe { vmem::release(old) };
        self.committed = if self.config.full_commit { self.bytes.len() } else { 0 };
        self.current = 0;
    }

    /// Move the arena's control block into memory allocated from itself.
    ///
    /// The arena (and everything downstream of it, chained successors
    /// included) then lives as a single opaque region owned by the returned
    /// handle. Fails for vmem-growth arenas — growth would relocate the
    /// range out from under the embedded control block — and for arenas too
    /// small to hold their own control block.
    pub fn into_self_contained(mut self) -> Result<SelfContainedArena> {
        if self.config.vmem_growth {
            return Err(Error::InvalidConfig(
                "a self-contained arena cannot use vmem_growth; its control block would be relocated",
            ));
        }
        let slot = self.push_bytes(mem::size_of::<Arena>(), mem::align_of::<Arena>(), false);
        if slot.is_empty() {
            return Err(Error::InvalidBuffer(
                "arena too small to embed its own control block",
            ));
        }
        let inner = slot.as_ptr().cast::<Arena>();
        // SAFETY: `slot` is committed, exclusive, and aligned for Arena;
        // writing moves the control block into the memory it manages.
        unsafe { inner.write(self) };
        // SAFETY: just written through a non-null pointer.
        Ok(SelfContainedArena {
            inner: unsafe { NonNull::new_unchecked(inner) },
        })
    }

    /// Start offset for a `(size, align)` request, if it fits locally.
    fn try_fit(&self, size: usize, align: usize) -> Option<usize> {
        let start = self.current.checked_add(self.padding_for(align))?;
        let end = start.checked_add(size)?;
        (end <= self.bytes.len()).then_some(start)
    }

    fn padding_for(&self, align: usize) -> usize {
        let tip = self.bytes.addr().wrapping_add(self.current);
        tip.wrapping_neg() & (align - 1)
    }

    /// Commit forward so that `[0, end)` is accessible, in chunk multiples
    /// to amortize syscalls across many small pushes.
    fn commit_to(&mut self, end: usize) {
        let chunk = vmem::commit_chunk();
        let goal = end
            .checked_add(chunk - 1)
            .map_or(self.bytes.len(), |v| v / chunk * chunk)
            .min(self.bytes.len());
        if goal <= self.committed {
            return;
        }
        if self.owns_vmem {
            let range = self.bytes.slice(self.committed, goal - self.committed);
            // SAFETY: `range` lies inside our own reservation.
            unsafe { vmem::commit(range) };
        }
        self.committed = goal;
    }

    /// Replace the backing reservation with one at least `needed` bytes
    /// larger, doubling to the next power of two that fits. Invalidates
    /// every pointer previously returned by this arena.
    fn vmem_grow(&mut self, needed: usize) {
        let required = self.current.saturating_add(needed);
        let new_cap = (self.bytes.len().max(1) * 2)
            .max(required)
            .next_power_of_two();
        tracing::trace!(old = self.bytes.len(), new = new_cap, "replacing arena reservation");
        // SAFETY: `bytes` is our own reservation with `current <= committed`
        // readable bytes.
        let fresh = unsafe { vmem::remake(self.bytes, new_cap, self.current, self.committed) };
        let old = mem::replace(&mut self.bytes, fresh);
        // SAFETY: pointer instability is the documented contract of vmem
        // growth; nothing may reference the old range past this point.
        unsafe { vmem::release(old) };
        if self.config.full_commit {
            let range = self.bytes.slice(self.committed, self.bytes.len() - self.committed);
            // SAFETY: tail of our fresh reservation.
            unsafe { vmem::commit(range) };
            self.committed = self.bytes.len();
        }
    }

    /// Build the chain successor: roughly double the local arena, at least
    /// enough for the request, rounded to a power of two.
    fn make_successor(&self, needed: usize) -> Arena {
        let cap = (self.bytes.len().saturating_mul(2))
            .max(needed)
            .next_power_of_two();
        tracing::trace!(local = self.bytes.len(), successor = cap, "chaining successor arena");
        Arena::from_vmem_unchecked(cap, self.config)
    }

    /// Retire `n` bytes, deepest chain link first.
    fn retire(&mut self, mut n: usize) {
        if let Some(next) = self.next.as_mut() {
            let held = next.scope() as usize;
            let take = n.min(held);
            next.retire(take);
            n -= take;
            if next.scope() == 0 {
                // Dropping the link releases the successor's reservation.
                self.next = None;
            }
        }
        self.retire_local(n);
    }

    fn retire_local(&mut self, n: usize) {
        debug_assert!(n <= self.current, "popping more than was pushed");
        let new_current = self.current.saturating_sub(n);
        let retired = self.current - new_current;
        if retired > 0 {
            // SAFETY: the retired range sits below `committed` and is
            // exclusively ours.
            poison::poison(unsafe { self.bytes.as_ptr().add(new_current) }, retired);
        }
        self.current = new_current;
        if self.current == 0
            && self.committed > 0
            && self.config.decommit_on_empty
            && !self.config.full_commit
        {
            if self.owns_vmem {
                // SAFETY: the committed prefix of our own reservation, with
                // no allocations left pointing into it.
                unsafe { vmem::decommit(self.bytes.truncated(self.committed)) };
            }
            self.committed = 0;
        }
    }

    #[cold]
    fn alloc_failed(&self, requested: usize) -> Buffer {
        if self.config.allow_failure {
            return Buffer::empty();
        }
        tracing::error!(
            requested,
            capacity = self.bytes.len(),
            used = self.current,
            "arena exhausted with growth disabled; aborting"
        );
        std::process::abort()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        // Successors release first.
        self.next = None;
        if self.owns_vmem && !self.bytes.is_empty() {
            // SAFETY: our own reservation; nothing references it past drop.
            unsafe { vmem::release(self.bytes) };
            self.bytes = Buffer::empty();
        }
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.bytes.len())
            .field("used", &self.current)
            .field("committed", &self.committed)
            .field("chain_len", &self.chain_len())
            .field("config", &self.config)
            .finish()
    }
}

/// An arena whose control block lives inside the memory it manages.
///
/// Produced by [`Arena::into_self_contained`]. The handle owns the whole
/// region; dropping it reads the control block back out and releases the
/// reservation (chain included). Popping below the embed point retires the
/// control block's own storage and is a misuse.
pub struct SelfContainedArena {
    inner: NonNull<Arena>,
}

// SAFETY: the handle is the sole owner of the embedded arena and its
// reservation; sending it moves the whole region's ownership.
unsafe impl Send for SelfContainedArena {}

impl Deref for SelfContainedArena {
    type Target = Arena;

    fn deref(&self) -> &Arena {
        // SAFETY: `inner` points at the control block embedded at
        // construction; the storage lives until drop.
        unsafe { self.inner.as_ref() }
    }
}

impl DerefMut for SelfContainedArena {
    fn deref_mut(&mut self) -> &mut Arena {
        // SAFETY: as above, plus `&mut self` guarantees exclusivity.
        unsafe { self.inner.as_mut() }
    }
}

impl Drop for SelfContainedArena {
    fn drop(&mut self) {
        // Read the control block out before its own storage is released.
        // SAFETY: `inner` is valid and this is the last use of the slot.
        let arena = unsafe { self.inner.as_ptr().read() };
        drop(arena);
    }
}
