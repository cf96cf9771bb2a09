//! Upload staging resources.
//!
//! A staging buffer carries CPU-written bytes into device-visible memory.
//! The backend that creates one hands it to a caller-supplied collection
//! (the "uploaders"), and the caller keeps that collection alive until the
//! submission referencing the staging memory has completed; the device may
//! still be reading from it long after the CPU copy returns. The initial
//! post-upload wait is the retirement point.

use crate::types::ResourceId;

/// Handle to a transient upload buffer.
///
/// Dropping the handle does not free the backing memory; the owning backend
/// does that when the handle is returned through its retire call.
#[derive(Debug)]
pub struct StagingBuffer {
    id: ResourceId,
    len: usize,
    label: Option<String>,
}

impl StagingBuffer {
    /// Create a staging handle. Called by backends only.
    pub fn new(id: ResourceId, len: usize, label: Option<String>) -> Self {
        Self { id, len, label }
    }

    /// The backend-issued resource handle.
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Number of staged bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer stages zero bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Debug label, if any.
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_staging_buffer_accessors() {
        let staging = StagingBuffer::new(ResourceId::from_raw(3), 256, Some("upload".into()));
        assert_eq!(staging.id(), ResourceId::from_raw(3));
        assert_eq!(staging.len(), 256);
        assert!(!staging.is_empty());
        assert_eq!(staging.label(), Some("upload"));
    }
}
