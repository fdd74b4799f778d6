//! Byte buffers that cross the operation boundary.
//!
//! A blob is either borrowed from the caller for the duration of a call, or
//! owned. Owned blobs allocated by an operation carry a [`ReleaseGuard`], so
//! the runtime's handle counters see them released exactly once, when the
//! last clone is dropped. Borrowed bytes are never released by the blob; the
//! borrow checker keeps them alive for as long as the blob exists.

use crate::runtime::ReleaseGuard;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Clone)]
pub enum Blob<'a> {
    Borrowed(&'a [u8]),
    Owned(Arc<OwnedBytes>),
}

/// Heap bytes owned by a blob.
pub struct OwnedBytes {
    bytes: Box<[u8]>,
    _release: Option<ReleaseGuard>,
}

impl<'a> Blob<'a> {
    /// Wrap caller bytes without copying. The caller stays the owner.
    pub fn borrowed(bytes: &'a [u8]) -> Self {
        Blob::Borrowed(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Blob::Borrowed(bytes) => bytes,
            Blob::Owned(owned) => &owned.bytes,
        }
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    pub fn is_borrowed(&self) -> bool {
        matches!(self, Blob::Borrowed(_))
    }

    /// Copy the contents out; the blob itself is untouched.
    pub fn to_vec(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    /// Detach from borrowed bytes by copying them into an untracked buffer.
    /// Owned blobs are returned as they are.
    pub fn into_static(self) -> Blob<'static> {
        match self {
            Blob::Borrowed(bytes) => Blob::from_vec(bytes.to_vec()),
            Blob::Owned(owned) => Blob::Owned(owned),
        }
    }
}

impl Blob<'static> {
    /// Take ownership of caller bytes. Not counted as a library handle.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Blob::Owned(Arc::new(OwnedBytes {
            bytes: bytes.into_boxed_slice(),
            _release: None,
        }))
    }

    pub(crate) fn allocated(bytes: Vec<u8>, release: ReleaseGuard) -> Self {
        Blob::Owned(Arc::new(OwnedBytes {
            bytes: bytes.into_boxed_slice(),
            _release: Some(release),
        }))
    }
}

impl Deref for Blob<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl fmt::Debug for Blob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.len())
            .field("borrowed", &self.is_borrowed())
            .finish()
    }
}

impl fmt::Display for Blob<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<blob {} bytes>", self.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{HandleKind, HandleTracker};

    #[test]
    fn borrowed_blob_leaves_caller_bytes_alone() {
        let bytes = vec![1u8, 2, 3];
        {
            let blob = Blob::borrowed(&bytes);
            let copy = blob.clone();
            assert!(copy.is_borrowed());
            assert_eq!(copy.as_bytes(), &[1, 2, 3]);
        }
        assert_eq!(bytes, vec![1, 2, 3]);
    }

    #[test]
    fn allocated_blob_is_released_once_after_last_clone() {
        let tracker = Arc::new(HandleTracker::default());
        let blob = Blob::allocated(vec![9; 16], tracker.acquire(HandleKind::Blob));
        let clone = blob.clone();
        assert_eq!(tracker.stats().live_blobs, 1);

        drop(blob);
        assert_eq!(tracker.stats().live_blobs, 1);
        assert_eq!(tracker.stats().released_blobs, 0);

        drop(clone);
        assert_eq!(tracker.stats().live_blobs, 0);
        assert_eq!(tracker.stats().released_blobs, 1);
    }

    #[test]
    fn into_static_copies_borrowed_bytes() {
        let bytes = [4u8, 5];
        let owned = Blob::borrowed(&bytes).into_static();
        assert!(!owned.is_borrowed());
        assert_eq!(owned.to_vec(), vec![4, 5]);
    }

    #[test]
    fn display_shows_length() {
        assert_eq!(Blob::from_vec(vec![0; 3]).to_string(), "<blob 3 bytes>");
    }
}
