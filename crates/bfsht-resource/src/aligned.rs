// crates/bfsht-resource/src/aligned.rs

//! Page-aligned owned byte buffers for node-local blob copies.
//!
//! Copying a blob out of the mapping must preserve the format's alignment
//! guarantee; a page-aligned allocation gives 16-byte blob alignment and
//! page-granular first-touch placement in one go.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ops::Deref;
use std::ptr::NonNull;

const PAGE: usize = 4096;

/// Immutable page-aligned copy of a byte slice.
#[derive(Debug)]
pub struct AlignedBytes {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: the buffer is written once in `copy_from` before the value is
// shared and never mutated afterwards; ownership of the allocation is unique.
unsafe impl Send for AlignedBytes {}
unsafe impl Sync for AlignedBytes {}

impl AlignedBytes {
    /// Copy `bytes` into a fresh page-aligned allocation.
    ///
    /// The copy is performed by the calling thread, so on a first-touch NUMA
    /// policy the pages land on the caller's node.
    #[must_use]
    pub fn copy_from(bytes: &[u8]) -> Self {
        if bytes.is_empty() {
            return Self {
                ptr: NonNull::dangling(),
                len: 0,
            };
        }
        let layout = Layout::from_size_align(bytes.len(), PAGE)
            .expect("blob size overflows allocation layout");
        // SAFETY: layout has nonzero size; the write stays within the fresh
        // allocation of the same length.
        let ptr = unsafe {
            let raw = alloc(layout);
            if raw.is_null() {
                handle_alloc_error(layout);
            }
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), raw, bytes.len());
            NonNull::new_unchecked(raw)
        };
        Self {
            ptr,
            len: bytes.len(),
        }
    }
}

impl Deref for AlignedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        if self.len == 0 {
            return &[];
        }
        // SAFETY: `ptr` owns `len` initialized bytes.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for AlignedBytes {
    fn drop(&mut self) {
        if self.len != 0 {
            // SAFETY: allocated in `copy_from` with the identical layout.
            unsafe {
                dealloc(
                    self.ptr.as_ptr(),
                    Layout::from_size_align_unchecked(self.len, PAGE),
                );
            }
        }
    }
}
