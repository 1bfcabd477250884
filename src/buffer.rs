//! Non-owning byte-range views.
//!
//! [`Buffer`] is the currency of the whole crate: a `(pointer, length)` pair
//! over a contiguous byte range with no lifecycle of its own. Its validity
//! is determined entirely by the arena or reservation that produced it, so
//! dereferencing one is always `unsafe` and bound to the owner's rules
//! (don't read past a `pop_to`, don't outlive a released reservation).

use std::ptr;

/// A non-owning view over a contiguous byte range.
///
/// `Buffer` is `Copy`; copying the view does not duplicate or extend the
/// underlying memory. The empty buffer (null pointer, zero length) doubles
/// as the "no allocation" value throughout the crate: allocators return it
/// on opt-in failure and accept it to mean "allocate fresh".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Buffer {
    ptr: *mut u8,
    len: usize,
}

impl Buffer {
    /// The empty view: null pointer, zero length.
    pub const fn empty() -> Self {
        Self {
            ptr: ptr::null_mut(),
            len: 0,
        }
    }

    /// Create a view over `len` bytes starting at `ptr`.
    ///
    /// A null pointer or zero length collapses to [`Buffer::empty`].
    pub fn new(ptr: *mut u8, len: usize) -> Self {
        if ptr.is_null() || len == 0 {
            Self::empty()
        } else {
            Self { ptr, len }
        }
    }

    /// Length of the view in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether this is the empty view.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ptr.is_null() || self.len == 0
    }

    /// Raw pointer to the first byte. Null for the empty view.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Pointer one past the last byte.
    #[inline]
    pub fn end(&self) -> *mut u8 {
        // Stays within (one past) the same allocation by the view's contract.
        self.ptr.wrapping_add(self.len)
    }

    /// Start address as an integer.
    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr as usize
    }

    /// A prefix view of at most `len` bytes.
    pub fn truncated(self, len: usize) -> Self {
        Self::new(self.ptr, len.min(self.len))
    }

    /// A sub-view of `len` bytes starting `offset` bytes in.
    pub fn slice(self, offset: usize, len: usize) -> Self {
        debug_assert!(
            offset <= self.len && len <= self.len - offset,
            "sub-view out of bounds"
        );
        Self::new(self.ptr.wrapping_add(offset), len)
    }

    /// View the bytes as a shared slice.
    ///
    /// # Safety
    ///
    /// The range must be committed, initialized for reads, and not written
    /// through any other path for the lifetime of the returned slice.
    #[inline]
    pub unsafe fn as_slice<'a>(self) -> &'a [u8] {
        if self.is_empty() {
            return &[];
        }
        // SAFETY: non-null and in-bounds per the caller's guarantee.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    /// View the bytes as an exclusive slice.
    ///
    /// # Safety
    ///
    /// The range must be committed and not aliased by any other live
    /// reference for the lifetime of the returned slice.
    #[inline]
    pub unsafe fn as_mut_slice<'a>(self) -> &'a mut [u8] {
        if self.is_empty() {
            return &mut [];
        }
        // SAFETY: non-null, in-bounds, exclusive per the caller's guarantee.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }

    /// View the bytes as a shared slice of `T`.
    ///
    /// The element count is `len / size_of::<T>()`; trailing bytes that do
    /// not fill an element are dropped from the view.
    ///
    /// # Safety
    ///
    /// Same rules as [`Buffer::as_slice`], plus the start must be aligned
    /// for `T` and the bytes must be a valid bit pattern for `T`.
    #[inline]
    pub unsafe fn as_slice_of<'a, T>(self) -> &'a [T] {
        if self.is_empty() {
            return &[];
        }
        debug_assert!(self.addr() % std::mem::align_of::<T>() == 0);
        // SAFETY: alignment asserted, count bounded by the byte length.
        unsafe {
            std::slice::from_raw_parts(self.ptr.cast::<T>(), self.len / std::mem::size_of::<T>())
        }
    }

    /// View the bytes as an exclusive slice of `T`.
    ///
    /// # Safety
    ///
    /// Same rules as [`Buffer::as_mut_slice`], plus the start must be
    /// aligned for `T` and the bytes must be a valid bit pattern for `T`.
    #[inline]
    pub unsafe fn as_mut_slice_of<'a, T>(self) -> &'a mut [T] {
        if self.is_empty() {
            return &mut [];
        }
        debug_assert!(self.addr() % std::mem::align_of::<T>() == 0);
        // SAFETY: alignment asserted, count bounded by the byte length.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.ptr.cast::<T>(),
                self.len / std::mem::size_of::<T>(),
            )
        }
    }
}

impl Default for Buffer {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let b = Buffer::empty();
        assert!(b.is_empty());
        assert_eq!(b.len(), 0);
        assert!(b.as_ptr().is_null());
        assert_eq!(unsafe { b.as_slice() }, &[] as &[u8]);
    }

    #[test]
    fn test_null_or_zero_collapses_to_empty() {
        assert!(Buffer::new(std::ptr::null_mut(), 16).is_empty());
        let mut storage = [0u8; 4];
        assert!(Buffer::new(storage.as_mut_ptr(), 0).is_empty());
    }

    #[test]
    fn test_view_over_storage() {
        let mut storage = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let b = Buffer::new(storage.as_mut_ptr(), storage.len());
        assert_eq!(b.len(), 8);
        assert_eq!(b.end() as usize - b.addr(), 8);
        assert_eq!(unsafe { b.as_slice() }, &storage);
    }

    #[test]
    fn test_truncated_and_slice() {
        let mut storage = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let b = Buffer::new(storage.as_mut_ptr(), storage.len());

        let prefix = b.truncated(3);
        assert_eq!(unsafe { prefix.as_slice() }, &[0, 1, 2]);
        // Truncating past the end keeps the original length.
        assert_eq!(b.truncated(100).len(), 8);

        let mid = b.slice(2, 4);
        assert_eq!(unsafe { mid.as_slice() }, &[2, 3, 4, 5]);
    }

    #[test]
    fn test_typed_views() {
        let mut storage = [0u64; 4];
        let bytes = storage.len() * std::mem::size_of::<u64>();
        let b = Buffer::new(storage.as_mut_ptr().cast(), bytes);

        let words = unsafe { b.as_mut_slice_of::<u64>() };
        assert_eq!(words.len(), 4);
        words[3] = 0xDEAD_BEEF;
        assert_eq!(unsafe { b.as_slice_of::<u64>() }[3], 0xDEAD_BEEF);
    }
}
