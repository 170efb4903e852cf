use crate::error::EngineResult;
use crate::renderer::device::{BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::error::buffer_mapping_error;

/// Fixed-capacity buffer rewritten whole from the host.
///
/// Every upload replaces the full contents (discard-and-rewrite). The last
/// uploaded bytes are kept so an identical upload is skipped.
pub struct DynamicBuffer<D: RenderDevice> {
    buffer: D::Buffer,
    label: String,
    capacity: u64,
    /// Bytes currently on the device; `None` until the first upload
    cached: Option<Vec<u8>>,
    uploads: u64,
    skipped: u64,
}

impl<D: RenderDevice> DynamicBuffer<D> {
    pub fn new(device: &mut D, label: &str, kind: BufferKind, capacity: u64) -> EngineResult<Self> {
        let buffer = device.create_buffer(&BufferDescriptor {
            label,
            size: capacity,
            kind,
        })?;
        Ok(Self {
            buffer,
            label: label.to_string(),
            capacity,
            cached: None,
            uploads: 0,
            skipped: 0,
        })
    }

    /// Uploads `bytes` unless they equal the last upload. Returns whether a
    /// write was issued. On failure the device keeps the previous contents.
    pub fn update(&mut self, device: &mut D, bytes: &[u8]) -> EngineResult<bool> {
        if bytes.len() as u64 > self.capacity {
            return Err(buffer_mapping_error(
                &self.label,
                format!("{} bytes exceed capacity of {}", bytes.len(), self.capacity),
            ));
        }
        if self.cached.as_deref() == Some(bytes) {
            self.skipped += 1;
            return Ok(false);
        }

        device.write_buffer(&self.buffer, 0, bytes)?;
        let cached = self.cached.get_or_insert_with(Vec::new);
        cached.clear();
        cached.extend_from_slice(bytes);
        self.uploads += 1;
        Ok(true)
    }

    /// Forces the next `update` to write even if the bytes are unchanged
    pub fn invalidate(&mut self) {
        self.cached = None;
    }

    pub fn buffer(&self) -> &D::Buffer {
        &self.buffer
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// (writes issued, writes skipped as unchanged)
    pub fn upload_counts(&self) -> (u64, u64) {
        (self.uploads, self.skipped)
    }

    pub fn release(self, device: &mut D) {
        device.release_buffer(self.buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::device::SoftwareDevice;

    #[test]
    fn test_identical_upload_is_skipped() {
        let mut device = SoftwareDevice::new();
        let mut buffer = DynamicBuffer::new(&mut device, "Params", BufferKind::Uniform, 16).unwrap();
        let bytes = [1u8; 16];

        assert!(buffer.update(&mut device, &bytes).unwrap());
        assert!(!buffer.update(&mut device, &bytes).unwrap());
        assert!(buffer.update(&mut device, &[2u8; 16]).unwrap());
        assert_eq!(buffer.upload_counts(), (2, 1));
        assert_eq!(device.stats().uploaded_bytes, 32);

        buffer.invalidate();
        assert!(buffer.update(&mut device, &[2u8; 16]).unwrap());
    }

    #[test]
    fn test_oversized_upload_keeps_previous_contents() {
        let mut device = SoftwareDevice::new();
        let mut buffer = DynamicBuffer::new(&mut device, "Small", BufferKind::Storage, 8).unwrap();
        buffer.update(&mut device, &[3u8; 8]).unwrap();

        assert!(buffer.update(&mut device, &[4u8; 12]).is_err());
        let words = device.peek_words(buffer.buffer());
        assert_eq!(words, vec![0x0303_0303, 0x0303_0303]);
    }
}
