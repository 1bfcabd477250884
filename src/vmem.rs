//! Raw virtual-memory primitives.
//!
//! A thin wrapper over the host's address-space and page-protection
//! primitives (via `rustix::mm`): reserve, commit, decommit, release, plus
//! [`remake`] for grow-by-replacement. No allocation policy lives here;
//! arenas layer their bookkeeping on top.
//!
//! # Failure model
//!
//! OS failures never propagate as values. A denied reservation or a failed
//! protection change leaves the address space in a state this crate cannot
//! reason about, so every failing syscall logs and aborts the process.
//! Recoverable handling of address-space exhaustion is out of scope.

use crate::buffer::Buffer;
use rustix::mm::{MapFlags, MprotectFlags, ProtFlags};

/// Number of pages committed at a time by arenas committing on push.
///
/// Committing in chunks amortizes the syscall cost across many small
/// pushes instead of paying it per allocation.
pub(crate) const COMMIT_CHUNK_PAGES: usize = 16;

/// Size of one physical page on this host.
#[inline]
pub fn page_size() -> usize {
    rustix::param::page_size()
}

/// Commit granularity used by `commit_on_push` arenas, in bytes.
#[inline]
pub(crate) fn commit_chunk() -> usize {
    page_size() * COMMIT_CHUNK_PAGES
}

#[inline]
fn align_down(value: usize, to: usize) -> usize {
    value & !(to - 1)
}

#[inline]
fn align_up(value: usize, to: usize) -> usize {
    align_down(value + (to - 1), to)
}

#[cold]
fn fatal(op: &'static str, size: usize, err: rustix::io::Errno) -> ! {
    tracing::error!(op, size, %err, "virtual memory operation failed; aborting");
    std::process::abort()
}

/// Reserve `size` bytes of address space, optionally committing it
/// immediately.
///
/// The returned buffer has exactly the requested length; the kernel rounds
/// the reservation itself up to whole pages. Aborts if the OS denies the
/// reservation.
pub fn reserve(size: usize, commit: bool) -> Buffer {
    let prot = if commit {
        ProtFlags::READ | ProtFlags::WRITE
    } else {
        ProtFlags::empty()
    };
    // SAFETY: requesting a fresh anonymous mapping at a kernel-chosen
    // address; nothing existing can be clobbered.
    let ptr = unsafe { rustix::mm::mmap_anonymous(std::ptr::null_mut(), size, prot, MapFlags::PRIVATE) };
    match ptr {
        Ok(ptr) => Buffer::new(ptr.cast(), size),
        Err(err) => fatal("reserve", size, err),
    }
}

/// Make a previously reserved sub-range read/write accessible.
///
/// No-op on an empty buffer. The protection change covers whole pages, so
/// the affected range is the page-aligned superset of `buffer`. Aborts on
/// OS failure.
///
/// # Safety
///
/// `buffer` must lie inside a live reservation produced by [`reserve`] or
/// [`remake`].
pub unsafe fn commit(buffer: Buffer) -> Buffer {
    if buffer.is_empty() {
        return buffer;
    }
    let page = page_size();
    let addr = align_down(buffer.addr(), page);
    let len = buffer.addr() + buffer.len() - addr;
    // SAFETY: the caller guarantees the range lies inside a live
    // reservation; mprotect only changes protections.
    match unsafe { rustix::mm::mprotect(addr as *mut _, len, MprotectFlags::READ | MprotectFlags::WRITE) } {
        Ok(()) => buffer,
        Err(err) => fatal("commit", buffer.len(), err),
    }
}

/// Return the pages backing `buffer` to the OS without releasing the
/// address range.
///
/// Granularity is whole pages: the decommitted range is the page-aligned
/// superset of `buffer`, so neighboring bytes sharing a page go with it.
/// That imprecision is accepted, not corrected; callers wanting exactness
/// must pass page-aligned ranges.
///
/// # Safety
///
/// `buffer` must lie inside a live reservation, and no live reference may
/// point into the affected pages.
pub unsafe fn decommit(buffer: Buffer) {
    if buffer.is_empty() {
        return;
    }
    let page = page_size();
    let addr = align_down(buffer.addr(), page);
    let len = align_up(buffer.addr() + buffer.len(), page) - addr;
    // SAFETY: a fixed anonymous PROT_NONE mapping over our own range
    // atomically discards its pages while keeping the address range
    // reserved and inaccessible.
    let remapped = unsafe {
        rustix::mm::mmap_anonymous(
            addr as *mut _,
            len,
            ProtFlags::empty(),
            MapFlags::PRIVATE | MapFlags::FIXED,
        )
    };
    if let Err(err) = remapped {
        fatal("decommit", len, err);
    }
}

/// Fully release the address range. `buffer` must not be used afterward.
///
/// # Safety
///
/// `buffer` must be exactly a reservation produced by [`reserve`] or
/// [`remake`], and nothing may reference its range past this call.
pub unsafe fn release(buffer: Buffer) {
    if buffer.is_empty() {
        return;
    }
    // SAFETY: the caller guarantees this is a whole owned reservation.
    if let Err(err) = unsafe { rustix::mm::munmap(buffer.as_ptr().cast(), buffer.len()) } {
        fatal("release", buffer.len(), err);
    }
}

/// Reserve a new range of `new_size` bytes, commit up to
/// `max(content_size, commit_size)`, copy `content_size` bytes from `old`,
/// and return the new buffer.
///
/// Used for grow/shrink-by-replacement. Does not release `old`; that stays
/// the caller's responsibility.
///
/// # Safety
///
/// `old` must hold at least `content_size` committed, readable bytes, and
/// `content_size <= new_size`.
pub unsafe fn remake(old: Buffer, new_size: usize, content_size: usize, commit_size: usize) -> Buffer {
    debug_assert!(content_size <= new_size);
    let fresh = reserve(new_size, false);
    let up_front = content_size.max(commit_size).min(new_size);
    if up_front > 0 {
        // SAFETY: `fresh` is our own reservation.
        unsafe { commit(fresh.truncated(up_front)) };
    }
    if content_size > 0 {
        // SAFETY: the caller guarantees `old` holds `content_size` readable
        // bytes; the destination was just committed and the ranges are
        // distinct mappings.
        unsafe { std::ptr::copy_nonoverlapping(old.as_ptr(), fresh.as_ptr(), content_size) };
    }
    fresh
}
