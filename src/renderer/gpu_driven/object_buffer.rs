use crate::error::EngineResult;
use crate::renderer::device::{BufferDescriptor, BufferKind, RenderDevice};
use crate::renderer::error::allocation_error;
use crate::scene::ObjectRecord;

const RECORD_SIZE: u64 = std::mem::size_of::<ObjectRecord>() as u64;
const MATRIX_SIZE: u64 = std::mem::size_of::<[[f32; 4]; 4]>() as u64;

/// Device-side object records plus the world matrices the GPU derives.
///
/// Capacity is fixed at creation. Records are uploaded whole and only when
/// they differ from the last upload; the host copy doubles as the CPU
/// fallback's input and the reference for cross-validation.
pub struct ObjectBufferStore<D: RenderDevice> {
    records: D::Buffer,
    world_matrices: D::Buffer,
    capacity: u32,
    object_count: u32,
    host_records: Vec<ObjectRecord>,
}

impl<D: RenderDevice> ObjectBufferStore<D> {
    pub fn new(device: &mut D, max_objects: u32) -> EngineResult<Self> {
        if max_objects == 0 {
            return Err(allocation_error("Object Records", 0, "capacity must be non-zero"));
        }

        let records = device.create_buffer(&BufferDescriptor {
            label: "Object Records",
            size: max_objects as u64 * RECORD_SIZE,
            kind: BufferKind::Storage,
        })?;
        let world_matrices = match device.create_buffer(&BufferDescriptor {
            label: "World Matrices",
            size: max_objects as u64 * MATRIX_SIZE,
            kind: BufferKind::Storage,
        }) {
            Ok(buffer) => buffer,
            Err(e) => {
                device.release_buffer(records);
                return Err(e);
            }
        };

        log::info!(
            "[ObjectBufferStore::new] Allocated storage for {} objects ({} KB)",
            max_objects,
            max_objects as u64 * (RECORD_SIZE + MATRIX_SIZE) / 1024
        );

        Ok(Self {
            records,
            world_matrices,
            capacity: max_objects,
            object_count: 0,
            host_records: Vec::with_capacity(max_objects as usize),
        })
    }

    /// Replaces the object set. An empty slice leaves everything unchanged;
    /// use [`clear`](Self::clear) to drop all objects. Records beyond
    /// capacity are ignored. Returns whether an upload was issued.
    pub fn update(&mut self, device: &mut D, records: &[ObjectRecord]) -> bool {
        if records.is_empty() {
            log::trace!("[ObjectBufferStore::update] Empty record set, keeping {} objects", self.object_count);
            return false;
        }

        let accepted = if records.len() > self.capacity as usize {
            log::warn!(
                "[ObjectBufferStore::update] {} records exceed capacity {}; truncating",
                records.len(),
                self.capacity
            );
            &records[..self.capacity as usize]
        } else {
            records
        };

        if accepted == self.host_records.as_slice() {
            return false;
        }

        match device.write_buffer(&self.records, 0, bytemuck::cast_slice(accepted)) {
            Ok(()) => {
                self.host_records.clear();
                self.host_records.extend_from_slice(accepted);
                self.object_count = accepted.len() as u32;
                true
            }
            Err(e) => {
                log::error!(
                    "[ObjectBufferStore::update] Upload failed, keeping previous {} objects: {}",
                    self.object_count,
                    e
                );
                false
            }
        }
    }

    pub fn clear(&mut self) {
        self.host_records.clear();
        self.object_count = 0;
    }

    pub fn object_count(&self) -> u32 {
        self.object_count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn records_buffer(&self) -> &D::Buffer {
        &self.records
    }

    pub fn world_matrices(&self) -> &D::Buffer {
        &self.world_matrices
    }

    /// Records currently on the device
    pub fn host_records(&self) -> &[ObjectRecord] {
        &self.host_records
    }

    /// Host memory held for the CPU copy
    pub fn host_bytes(&self) -> u64 {
        self.host_records.capacity() as u64 * RECORD_SIZE
    }

    pub fn release(self, device: &mut D) {
        device.release_buffer(self.world_matrices);
        device.release_buffer(self.records);
    }
}
