//! The allocator capability: one strategy operation over byte buffers.
//!
//! [`Allocator`] pairs an allocation context with a single polymorphic
//! operation, so arena-backed, fixed-buffer ("stack"), and heap-backed
//! allocators satisfy one call signature. Generic code takes
//! `&mut impl Allocator` and stays monomorphized; there is no boxing or
//! vtable on the allocation path.
//!
//! The strategy convention, from the caller's side:
//!
//! - `resize(empty, size > 0)` — allocate;
//! - `resize(buffer, size > 0)` — resize (grow or shrink);
//! - `resize(buffer, 0)` — deallocate.

use crate::arena::Arena;
use crate::buffer::Buffer;

/// Default alignment for untyped and array allocations, matching the
/// strongest alignment the typed helpers hand out.
pub const DEFAULT_ALIGN: usize = 16;

/// A capability for allocating, resizing, and freeing byte buffers.
///
/// Implementors interpret the single [`Allocator::resize`] operation by the
/// module-level convention; the provided wrappers spell the three cases
/// out. Failure is signalled by the empty buffer — whether that can happen
/// depends on the backing strategy's policy (see [`Arena`]'s
/// `allow_failure`).
pub trait Allocator {
    /// The strategy operation: reshape `existing` to `size` bytes.
    fn resize(&mut self, existing: Buffer, size: usize) -> Buffer;

    /// Allocate `size` fresh bytes.
    fn alloc(&mut self, size: usize) -> Buffer {
        self.resize(Buffer::empty(), size)
    }

    /// Resize `buffer` to `size` bytes, preserving the common prefix.
    fn realloc(&mut self, buffer: Buffer, size: usize) -> Buffer {
        self.resize(buffer, size)
    }

    /// Release `buffer` back to the allocator.
    fn dealloc(&mut self, buffer: Buffer) {
        self.resize(buffer, 0);
    }
}

/// Arena-backed allocation. A `from_buffer` arena under this impl is the
/// fixed-buffer ("stack") allocator; a vmem arena brings its growth policy
/// along.
impl Allocator for Arena {
    fn resize(&mut self, existing: Buffer, size: usize) -> Buffer {
        self.morph(existing, size, DEFAULT_ALIGN)
    }
}

/// The process heap as an [`Allocator`].
///
/// Buffers from `Heap` carry no header; the length in the buffer view is
/// the layout, so only buffers this allocator handed out may be resized or
/// freed through it. A failed heap allocation returns the empty buffer.
#[derive(Clone, Copy, Debug, Default)]
pub struct Heap;

impl Allocator for Heap {
    fn resize(&mut self, existing: Buffer, size: usize) -> Buffer {
        use std::alloc::{self, Layout};

        if size == 0 {
            if !existing.is_empty() {
                // SAFETY: buffers handed out by this allocator were
                // allocated with (len, DEFAULT_ALIGN).
                unsafe {
                    alloc::dealloc(
                        existing.as_ptr(),
                        Layout::from_size_align_unchecked(existing.len(), DEFAULT_ALIGN),
                    )
                };
            }
            return Buffer::empty();
        }

        let Ok(layout) = Layout::from_size_align(size, DEFAULT_ALIGN) else {
            return Buffer::empty();
        };
        let ptr = if existing.is_empty() {
            // SAFETY: layout has non-zero size.
            unsafe { alloc::alloc(layout) }
        } else {
            // SAFETY: `existing` came from this allocator with the same
            // alignment; `size` is non-zero.
            unsafe {
                let old = Layout::from_size_align_unchecked(existing.len(), DEFAULT_ALIGN);
                alloc::realloc(existing.as_ptr(), old, size)
            }
        };
        Buffer::new(ptr, size)
    }
}

/// Allocate space for `count` elements of `T`.
///
/// `T`'s alignment must not exceed [`DEFAULT_ALIGN`].
pub fn alloc_array<T: Copy>(allocator: &mut impl Allocator, count: usize) -> Buffer {
    debug_assert!(std::mem::align_of::<T>() <= DEFAULT_ALIGN);
    allocator.alloc(std::mem::size_of::<T>() * count)
}

/// Resize an array allocation to `count` elements of `T`.
pub fn realloc_array<T: Copy>(
    allocator: &mut impl Allocator,
    buffer: Buffer,
    count: usize,
) -> Buffer {
    debug_assert!(std::mem::align_of::<T>() <= DEFAULT_ALIGN);
    allocator.realloc(buffer, std::mem::size_of::<T>() * count)
}

/// Release an array allocation.
pub fn dealloc_array(allocator: &mut impl Allocator, buffer: Buffer) {
    allocator.dealloc(buffer);
}

/// Allocate a copy of `items` through `allocator`.
pub fn duplicate_array<T: Copy>(allocator: &mut impl Allocator, items: &[T]) -> Buffer {
    let buffer = alloc_array::<T>(allocator, items.len());
    if !buffer.is_empty() {
        // SAFETY: freshly allocated writable range of exactly the source
        // size, disjoint from `items`.
        unsafe {
            std::ptr::copy_nonoverlapping(
                items.as_ptr().cast::<u8>(),
                buffer.as_ptr(),
                std::mem::size_of_val(items),
            )
        };
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::ArenaConfig;

    #[test]
    fn test_heap_alloc_realloc_dealloc() {
        let mut heap = Heap;
        let buffer = heap.alloc(64);
        assert_eq!(buffer.len(), 64);
        assert_eq!(buffer.addr() % DEFAULT_ALIGN, 0);

        unsafe { buffer.as_mut_slice().fill(0x3C) };
        let grown = heap.realloc(buffer, 256);
        assert_eq!(grown.len(), 256);
        assert!(unsafe { grown.truncated(64).as_slice() }.iter().all(|&b| b == 0x3C));

        heap.dealloc(grown);
    }

    #[test]
    fn test_heap_dealloc_empty_is_noop() {
        Heap.dealloc(Buffer::empty());
    }

    #[test]
    fn test_arena_satisfies_allocator() {
        let mut arena = Arena::from_vmem(1 << 16, ArenaConfig::lazy()).unwrap();
        let buffer = arena.alloc(100);
        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.addr() % DEFAULT_ALIGN, 0);

        // Tip resize stays in place.
        let grown = arena.realloc(buffer, 200);
        assert_eq!(grown.addr(), buffer.addr());

        arena.dealloc(grown);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_generic_code_over_both_backends() {
        fn fill_pattern(allocator: &mut impl Allocator) -> Buffer {
            let buffer = allocator.alloc(32);
            unsafe { buffer.as_mut_slice().fill(7) };
            buffer
        }

        let mut arena = Arena::from_vmem(4096, ArenaConfig::lazy()).unwrap();
        let from_arena = fill_pattern(&mut arena);
        assert!(unsafe { from_arena.as_slice() }.iter().all(|&b| b == 7));

        let mut heap = Heap;
        let from_heap = fill_pattern(&mut heap);
        assert!(unsafe { from_heap.as_slice() }.iter().all(|&b| b == 7));
        heap.dealloc(from_heap);
    }

    #[test]
    fn test_duplicate_array_round_trip() {
        let mut arena = Arena::from_vmem(4096, ArenaConfig::lazy()).unwrap();
        let values = [1u32, 2, 3, 4, 5];
        let buffer = duplicate_array(&mut arena, &values);
        assert_eq!(unsafe { buffer.as_slice_of::<u32>() }, &values);
    }

    #[test]
    fn test_alloc_array_sizing() {
        let mut arena = Arena::from_vmem(4096, ArenaConfig::lazy()).unwrap();
        let buffer = alloc_array::<u64>(&mut arena, 10);
        assert_eq!(buffer.len(), 80);
        let shrunk = realloc_array::<u64>(&mut arena, buffer, 4);
        assert_eq!(shrunk.len(), 32);
        dealloc_array(&mut arena, shrunk);
        assert_eq!(arena.used(), 0);
    }

    #[test]
    fn test_fixed_buffer_stack_allocator() {
        let mut storage = vec![0u8; 256];
        let view = Buffer::new(storage.as_mut_ptr(), storage.len());
        let config = ArenaConfig {
            allow_failure: true,
            ..ArenaConfig::fixed()
        };
        let mut stack = Arena::from_buffer(view, config).unwrap();

        assert!(!stack.alloc(128).is_empty());
        // Exhaustion surfaces as the empty buffer under allow_failure.
        assert!(stack.alloc(512).is_empty());
    }
}
