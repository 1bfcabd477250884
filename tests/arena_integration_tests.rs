//! Integration tests for arena behavior in realistic allocation flows.
//!
//! These exercise the public surface end to end: scope discipline across
//! chains, morph sequences a string builder would produce, generic code
//! over the allocator capability, and scratch scopes from library-style
//! call sites.

use vmarena::alloc::{duplicate_array, Allocator, Heap, DEFAULT_ALIGN};
use vmarena::arena::{Arena, ArenaConfig};
use vmarena::buffer::Buffer;
use vmarena::scratch::Scratch;

// ============================================================================
// Concrete Scenarios
// ============================================================================

/// 1024 bytes, full commit: push(16, 8) at offset 0, push(10, 8) at offset
/// 16 (padding rounds the next start up to a multiple of 8), reset drains.
#[test]
fn test_fixed_arena_offset_sequence() {
    let mut arena = Arena::from_vmem(1024, ArenaConfig::fixed()).unwrap();
    let base = arena.reserved().addr();

    let first = arena.push_bytes(16, 8, false);
    assert_eq!(first.addr() - base, 0);
    assert_eq!(first.len(), 16);

    let second = arena.push_bytes(10, 8, false);
    assert_eq!(second.addr() - base, 16);
    assert_eq!(second.len(), 10);

    arena.reset();
    assert_eq!(arena.used(), 0);
}

/// A 4 KiB chain-growth arena pushed 8 KiB must create exactly one
/// successor holding the buffer, with the root's tip unchanged.
#[test]
fn test_chain_growth_overflow_scenario() {
    let config = ArenaConfig {
        commit_on_push: true,
        chain_growth: true,
        ..ArenaConfig::default()
    };
    let mut arena = Arena::from_vmem(4096, config).unwrap();

    let buffer = arena.push_bytes(8192, 8, false);
    assert_eq!(buffer.len(), 8192);
    assert_eq!(arena.chain_len(), 1);
    assert_eq!(arena.used(), 0);

    let root = arena.reserved();
    let inside_root = buffer.addr() >= root.addr() && buffer.addr() < root.addr() + root.len();
    assert!(!inside_root, "overflow allocation must land in the successor");
}

// ============================================================================
// Scope Discipline
// ============================================================================

#[test]
fn test_nested_scopes_across_a_chain() {
    let mut arena = Arena::from_vmem(4096, ArenaConfig::scratch()).unwrap();

    let outer = arena.scope();
    arena.push_bytes(2048, 16, false);

    let inner = arena.scope();
    // Overflows into a successor.
    arena.push_bytes(16 * 1024, 16, false);
    arena.push_bytes(512, 16, false);
    assert!(arena.chain_len() >= 1);

    arena.pop_to(inner);
    assert_eq!(arena.scope(), inner);
    assert_eq!(arena.chain_len(), 0, "drained successors are released");

    arena.pop_to(outer);
    assert_eq!(arena.scope(), 0);
}

#[test]
fn test_interleaved_push_pop_workload() {
    let mut arena = Arena::from_vmem(1 << 20, ArenaConfig::lazy()).unwrap();

    for round in 0..50u64 {
        let marker = arena.scope();
        for i in 0..20usize {
            let buffer = arena.push_bytes(16 + i * 8, 8, false);
            assert_eq!(buffer.addr() % 8, 0);
        }
        arena.pop_to(marker);
        assert_eq!(arena.scope(), marker, "round {round}");
    }
    assert_eq!(arena.scope(), 0);
}

// ============================================================================
// Morph Sequences
// ============================================================================

/// The append loop a string builder produces: repeated tip grows, never a
/// copy, stable start address throughout.
#[test]
fn test_string_builder_style_growth() {
    let mut arena = Arena::from_vmem(1 << 16, ArenaConfig::lazy()).unwrap();

    let mut text = arena.push_str("hello");
    let start = text.addr();
    for word in [" scratch", " arena", " world"] {
        let old_len = text.len();
        text = arena.morph(text, old_len + word.len(), 1);
        assert_eq!(text.addr(), start);
        unsafe { text.as_mut_slice()[old_len..].copy_from_slice(word.as_bytes()) };
    }
    assert_eq!(
        unsafe { std::str::from_utf8(text.as_slice()).unwrap() },
        "hello scratch arena world"
    );
}

#[test]
fn test_morph_shrink_never_moves() {
    let mut arena = Arena::from_vmem(4096, ArenaConfig::lazy()).unwrap();
    let a = arena.push_bytes(256, 16, false);
    let b = arena.push_bytes(256, 16, false);

    // Tip shrink and non-tip shrink both keep the start address.
    let b2 = arena.morph(b, 100, 16);
    assert_eq!(b2.addr(), b.addr());
    let a2 = arena.morph(a, 10, 16);
    assert_eq!(a2.addr(), a.addr());
}

// ============================================================================
// Allocator Capability
// ============================================================================

/// A generic growable byte stage, written once against the capability and
/// run over both backends.
fn stage_chunks(allocator: &mut impl Allocator, chunks: &[&[u8]]) -> Buffer {
    let mut staged = Buffer::empty();
    let mut filled = 0;
    for chunk in chunks {
        staged = allocator.realloc(staged, filled + chunk.len());
        assert!(!staged.is_empty());
        unsafe { staged.as_mut_slice()[filled..].copy_from_slice(chunk) };
        filled += chunk.len();
    }
    staged
}

#[test]
fn test_generic_staging_over_arena_and_heap() {
    let chunks: &[&[u8]] = &[b"alpha", b"beta", b"gamma"];

    let mut arena = Arena::from_vmem(1 << 16, ArenaConfig::lazy()).unwrap();
    let from_arena = stage_chunks(&mut arena, chunks);
    assert_eq!(unsafe { from_arena.as_slice() }, b"alphabetagamma");
    assert_eq!(from_arena.addr() % DEFAULT_ALIGN, 0);

    let mut heap = Heap;
    let from_heap = stage_chunks(&mut heap, chunks);
    assert_eq!(unsafe { from_heap.as_slice() }, b"alphabetagamma");
    heap.dealloc(from_heap);
}

#[test]
fn test_duplicate_through_self_contained_arena() {
    let arena = Arena::from_vmem(1 << 16, ArenaConfig::lazy()).unwrap();
    let mut contained = arena.into_self_contained().unwrap();

    let values: Vec<u64> = (0..100).collect();
    let copy = duplicate_array(&mut *contained, &values);
    assert_eq!(unsafe { copy.as_slice_of::<u64>() }, values.as_slice());
}

// ============================================================================
// Scratch Scopes
// ============================================================================

/// A helper that needs scratch space while its caller's scratch buffer must
/// stay valid: the caller's scope goes in the collision set.
fn checksum_with_scratch(data: &[u8], caller: &Scratch) -> u64 {
    let scratch = Scratch::acquire(data.len(), &[caller]);
    let staged = scratch.push_array(data);
    unsafe { staged.as_slice() }
        .iter()
        .fold(0u64, |acc, &b| acc.rotate_left(7) ^ u64::from(b))
}

#[test]
fn test_scratch_collision_across_call_boundary() {
    let outer = Scratch::acquire(4096, &[]);
    let kept = outer.push_array(&[0xA5u8; 512]);

    let sum = checksum_with_scratch(&[1, 2, 3, 4], &outer);
    let again = checksum_with_scratch(&[1, 2, 3, 4], &outer);
    assert_eq!(sum, again);

    // The outer scope's data survived the helper's scratch traffic.
    assert!(unsafe { kept.as_slice() }.iter().all(|&b| b == 0xA5));
}

#[test]
fn test_scratch_handles_oversized_requests() {
    let scratch = Scratch::acquire(1 << 10, &[]);
    // Far past the entry's reservation: the scratch policy chains.
    let big = scratch.push_bytes(8 << 20, 64, false);
    assert!(!big.is_empty());
    assert_eq!(big.addr() % 64, 0);
    unsafe { big.as_mut_slice()[8 * 1024 * 1024 - 1] = 1 };
}
