//! Debug-time memory poisoning around allocation boundaries.
//!
//! Arenas poison the range between the allocation tip and the committed
//! extent when bytes are retired, and unpoison ranges as they are handed
//! out, so accesses outside the currently allocated extent get caught.
//!
//! With the `sanitize` feature this is wired to AddressSanitizer's manual
//! poisoning interface (build with `-Zsanitizer=address`). Without it,
//! debug builds fill retired ranges with a sentinel byte so stale reads are
//! conspicuous; release builds do nothing.

#[cfg(feature = "sanitize")]
extern "C" {
    fn __asan_poison_memory_region(addr: *const std::ffi::c_void, size: usize);
    fn __asan_unpoison_memory_region(addr: *const std::ffi::c_void, size: usize);
}

/// Byte written over retired ranges in debug builds.
#[cfg(all(debug_assertions, not(feature = "sanitize")))]
const POISON_BYTE: u8 = 0xDD;

/// Mark `len` bytes at `ptr` as invalid for reads and writes.
///
/// The range must be committed memory owned by the caller.
pub(crate) fn poison(ptr: *mut u8, len: usize) {
    if ptr.is_null() || len == 0 {
        return;
    }
    #[cfg(feature = "sanitize")]
    // SAFETY: the range is committed and owned per this function's contract.
    unsafe {
        __asan_poison_memory_region(ptr.cast(), len)
    };
    #[cfg(all(debug_assertions, not(feature = "sanitize")))]
    // SAFETY: the range is committed and owned per this function's contract.
    unsafe {
        std::ptr::write_bytes(ptr, POISON_BYTE, len)
    };
    #[cfg(all(not(debug_assertions), not(feature = "sanitize")))]
    let _ = (ptr, len);
}

/// Mark `len` bytes at `ptr` as valid again.
///
/// No-op unless the `sanitize` feature is active; the sentinel fill is left
/// in place for the caller to overwrite (or zero via the allocation API).
pub(crate) fn unpoison(ptr: *mut u8, len: usize) {
    #[cfg(feature = "sanitize")]
    if !ptr.is_null() && len > 0 {
        // SAFETY: the range is committed and owned per this function's contract.
        unsafe { __asan_unpoison_memory_region(ptr.cast(), len) };
    }
    #[cfg(not(feature = "sanitize"))]
    let _ = (ptr, len);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_handles_empty_range() {
        poison(std::ptr::null_mut(), 0);
        poison(std::ptr::null_mut(), 16);
        unpoison(std::ptr::null_mut(), 16);
    }

    #[cfg(all(debug_assertions, not(feature = "sanitize")))]
    #[test]
    fn test_poison_fills_sentinel() {
        let mut storage = [0u8; 32];
        poison(storage.as_mut_ptr(), storage.len());
        assert!(storage.iter().all(|&b| b == POISON_BYTE));
    }
}
