//! Reference-counted media buffers.
//!
//! A [`Buffer`] is a cheap handle: cloning only bumps a reference count.
//! Mutation goes through [`Buffer::data_mut`] / [`Buffer::metadata_mut`],
//! which copy the payload first if the buffer is shared (copy-on-write).
//!
//! # Example
//!
//! ```rust
//! use mediaflow::buffer::Buffer;
//! use mediaflow::clock::ClockTime;
//!
//! let mut buffer = Buffer::from_vec(vec![1, 2, 3]);
//! buffer.set_pts(ClockTime::from_millis(40));
//!
//! let shared = buffer.clone();
//! buffer.data_mut()[0] = 9;
//!
//! assert_eq!(shared.data(), &[1, 2, 3]);
//! assert_eq!(buffer.data(), &[9, 2, 3]);
//! ```

use std::sync::Arc;

use crate::clock::ClockTime;
use crate::metadata::{BufferFlags, Metadata};

#[derive(Debug, Clone)]
struct BufferInner {
    data: Vec<u8>,
    metadata: Metadata,
}

/// A payload plus timing metadata, shared by reference count.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<BufferInner>,
}

impl Buffer {
    /// Create a buffer owning `data`, with unset timestamps.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self::with_metadata(data, Metadata::new())
    }

    /// Create a buffer by copying `data`.
    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_vec(data.to_vec())
    }

    /// Create a zero-filled buffer of `size` bytes.
    pub fn with_size(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    /// Create a buffer with explicit metadata.
    pub fn with_metadata(data: Vec<u8>, metadata: Metadata) -> Self {
        Self {
            inner: Arc::new(BufferInner { data, metadata }),
        }
    }

    /// Payload bytes.
    pub fn data(&self) -> &[u8] {
        &self.inner.data
    }

    /// Mutable payload; copies the buffer first if it is shared.
    pub fn data_mut(&mut self) -> &mut Vec<u8> {
        &mut Arc::make_mut(&mut self.inner).data
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.inner.data.len()
    }

    /// Check if the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.data.is_empty()
    }

    /// Buffer metadata.
    pub fn metadata(&self) -> &Metadata {
        &self.inner.metadata
    }

    /// Mutable metadata; copies the buffer first if it is shared.
    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut Arc::make_mut(&mut self.inner).metadata
    }

    /// True if this handle is the only reference, so mutation won't copy.
    pub fn is_writable(&self) -> bool {
        Arc::strong_count(&self.inner) == 1
    }

    /// True if both handles share the same payload.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Presentation timestamp.
    pub fn pts(&self) -> ClockTime {
        self.inner.metadata.pts
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: ClockTime) {
        self.metadata_mut().pts = pts;
    }

    /// Duration.
    pub fn duration(&self) -> ClockTime {
        self.inner.metadata.duration
    }

    /// Set the duration.
    pub fn set_duration(&mut self, duration: ClockTime) {
        self.metadata_mut().duration = duration;
    }

    /// Buffer flags.
    pub fn flags(&self) -> BufferFlags {
        self.inner.metadata.flags
    }

    /// Add flags.
    pub fn set_flags(&mut self, flags: BufferFlags) {
        let meta = self.metadata_mut();
        meta.flags = meta.flags.union(flags);
    }

    /// Copy a byte range into a new buffer with the same metadata.
    ///
    /// The range is clamped to the payload.
    pub fn copy_region(&self, offset: usize, len: usize) -> Buffer {
        let start = offset.min(self.len());
        let end = start.saturating_add(len).min(self.len());
        Self::with_metadata(
            self.inner.data[start..end].to_vec(),
            self.inner.metadata.clone(),
        )
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("len", &self.len())
            .field("pts", &self.pts())
            .field("duration", &self.duration())
            .field("flags", &self.flags())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_clone_is_cheap() {
        let buffer = Buffer::with_size(1024);
        let buffer2 = buffer.clone();
        assert!(buffer.ptr_eq(&buffer2));
        assert!(!buffer.is_writable());
    }

    #[test]
    fn test_copy_on_write_metadata() {
        let mut a = Buffer::from_slice(b"abc");
        let b = a.clone();
        a.set_pts(ClockTime::from_secs(1));

        assert!(!a.ptr_eq(&b));
        assert!(b.pts().is_none());
        assert_eq!(a.pts(), ClockTime::from_secs(1));
        assert_eq!(a.data(), b.data());
    }

    #[test]
    fn test_unshared_mutation_does_not_copy() {
        let mut a = Buffer::from_slice(b"abc");
        let before = a.data().as_ptr();
        a.data_mut()[0] = b'x';
        assert_eq!(a.data().as_ptr(), before);
    }

    #[test]
    fn test_copy_region_clamps() {
        let buffer = Buffer::from_slice(b"0123456789");
        assert_eq!(buffer.copy_region(2, 3).data(), b"234");
        assert_eq!(buffer.copy_region(8, 10).data(), b"89");
        assert!(buffer.copy_region(20, 1).is_empty());
    }
}
