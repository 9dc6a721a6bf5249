//! Device Storage
//!
//! Physical byte blocks backing float records. The pool stands in for the
//! GPU allocator: it hands out storage ids, keeps allocation statistics and
//! is the only place bytes are created or dropped.

use std::collections::HashMap;

use serde::Serialize;
use tracing::trace;

use crate::record::StorageId;

/// Block of device bytes holding little-endian f32 values.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceStorage {
    data: Vec<u8>,
}

impl DeviceStorage {
    /// Create storage with the given size, filled with zeros
    pub fn zeroed(size: usize) -> Self {
        Self {
            data: vec![0u8; size],
        }
    }

    /// Encode f32 values into a new block
    pub fn from_f32(values: &[f32]) -> Self {
        let mut data = Vec::with_capacity(values.len() * 4);
        for v in values {
            data.extend_from_slice(&v.to_le_bytes());
        }
        Self { data }
    }

    /// Decode the block as f32 values
    pub fn to_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Overwrite the block with f32 values. Returns false if the lengths differ.
    pub fn write_f32(&mut self, values: &[f32]) -> bool {
        if values.len() * 4 != self.data.len() {
            return false;
        }
        for (chunk, v) in self.data.chunks_exact_mut(4).zip(values) {
            chunk.copy_from_slice(&v.to_le_bytes());
        }
        true
    }
}

impl AsRef<[u8]> for DeviceStorage {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Allocation statistics for a storage pool
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub allocations: u64,
    pub deallocations: u64,
    pub current_bytes: usize,
    pub peak_bytes: usize,
}

/// Owner of all physical storage blocks.
#[derive(Debug)]
pub struct StoragePool {
    blocks: HashMap<StorageId, DeviceStorage>,
    next_id: StorageId,
    stats: StorageStats,
}

impl StoragePool {
    pub fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            next_id: 1,
            stats: StorageStats::default(),
        }
    }

    /// Store a block and return its id
    pub fn store(&mut self, block: DeviceStorage) -> StorageId {
        let id = self.next_id;
        self.next_id += 1;

        self.stats.allocations += 1;
        self.stats.current_bytes += block.len();
        self.stats.peak_bytes = self.stats.peak_bytes.max(self.stats.current_bytes);
        trace!(storage = id, bytes = block.len(), "allocated storage");

        self.blocks.insert(id, block);
        id
    }

    pub fn get(&self, id: StorageId) -> Option<&DeviceStorage> {
        self.blocks.get(&id)
    }

    pub fn get_mut(&mut self, id: StorageId) -> Option<&mut DeviceStorage> {
        self.blocks.get_mut(&id)
    }

    /// Drop a block and return it
    pub fn release(&mut self, id: StorageId) -> Option<DeviceStorage> {
        let block = self.blocks.remove(&id)?;
        self.stats.deallocations += 1;
        self.stats.current_bytes -= block.len();
        trace!(storage = id, bytes = block.len(), "released storage");
        Some(block)
    }

    pub fn contains(&self, id: StorageId) -> bool {
        self.blocks.contains_key(&id)
    }

    /// Number of live blocks
    pub fn count(&self) -> usize {
        self.blocks.len()
    }

    pub fn stats(&self) -> &StorageStats {
        &self.stats
    }
}

impl Default for StoragePool {
    fn default() -> Self {
        Self::new()
    }
}
