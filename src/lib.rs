//! # vmarena
//!
//! Arena (bump-pointer) allocation over raw virtual memory, with a
//! thread-local pool of reusable scratch arenas.
//!
//! Built for latency-sensitive, short-lived-allocation workloads — engines,
//! compilers, batch transforms — that want to sidestep general-purpose heap
//! overhead and fragmentation: allocation is a pointer bump, release is a
//! bulk pop back to a scope marker.
//!
//! ## Pieces
//!
//! - [`vmem`]: reserve / commit / decommit / release over raw address
//!   ranges. No policy, just the OS primitive.
//! - [`arena::Arena`]: bump allocation with alignment, chunked page commit,
//!   scope-based release, chain or reservation growth, in-place resize
//!   ("morph"), and self-containment.
//! - [`alloc::Allocator`]: one strategy operation that arena-backed,
//!   fixed-buffer, and heap-backed allocators all satisfy, so generic code
//!   depends on exactly one abstraction.
//! - [`scratch::Scratch`]: thread-local scratch scopes with caller-declared
//!   collision sets.
//!
//! ## Quick start
//!
//! ```
//! use vmarena::prelude::*;
//!
//! let mut arena = Arena::from_vmem(1 << 20, ArenaConfig::lazy())?;
//! let marker = arena.scope();
//!
//! let header = arena.push_str("frame 42");
//! let samples = arena.push_bytes(64 * 1024, 64, true);
//! assert_eq!(samples.addr() % 64, 0);
//!
//! arena.pop_to(marker); // bulk release, header and samples are gone
//! # let _ = header;
//! # Ok::<(), vmarena::Error>(())
//! ```
//!
//! ## Error handling
//!
//! Three regimes, by failure class:
//!
//! - **OS failures** (denied reserve/commit) abort the process with a
//!   diagnostic — continuing with a partially valid address space is worse.
//! - **Arena exhaustion** aborts by default; arenas configured with
//!   `allow_failure` return the empty [`buffer::Buffer`] instead and the
//!   caller must check.
//! - **Misuse** (over-popping, touching retired memory) is caught by debug
//!   assertions and memory poisoning; release builds leave the hot path
//!   unchecked.
//!
//! ## Threading
//!
//! An arena belongs to exactly one execution context: `Send`, not `Sync`,
//! no locks, no atomics. The scratch pool is per-thread rather than shared,
//! which removes contention instead of synchronizing it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod alloc;
pub mod arena;
pub mod buffer;
pub mod error;
pub mod scratch;
pub mod vmem;

mod poison;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::alloc::{Allocator, Heap};
    pub use crate::arena::{Arena, ArenaConfig, SelfContainedArena};
    pub use crate::buffer::Buffer;
    pub use crate::error::{Error, Result};
    pub use crate::scratch::Scratch;
}

pub use error::{Error, Result};
