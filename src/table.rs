//! Record Table
//!
//! [`BufferTable`] is the boundary between the aliasing core and the engine
//! that owns buffer records. The core only ever allocates, looks up, bumps
//! counters and removes composite records through this trait; deciding when
//! bytes are actually freed stays with the engine.
//!
//! [`RecordTable`] is the in-memory engine shipped with the crate. It keeps
//! records in an explicit table (no global state), gates physical release on
//! both counters reaching zero, and defers release requests that arrive while
//! a record is still referenced.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{debug, trace};

use crate::config::TableConfig;
use crate::error::{AliasError, AliasResult};
use crate::record::{BufferHandle, BufferRecord, DType};
use crate::storage::{DeviceStorage, StoragePool};

/// Engine-side operations the aliasing core depends on.
pub trait BufferTable {
    /// Create a new record with both counters at zero.
    fn allocate(&mut self, shape: &[usize], dtype: DType) -> BufferHandle;

    fn lookup(&self, handle: BufferHandle) -> Option<&BufferRecord>;

    fn lookup_mut(&mut self, handle: BufferHandle) -> Option<&mut BufferRecord>;

    /// Drop a record from the table, returning it.
    fn remove(&mut self, handle: BufferHandle) -> Option<BufferRecord>;

    /// True if `handle` was issued by this table and has since been removed.
    fn is_disposed(&self, handle: BufferHandle) -> bool;

    fn increment_standard_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        self.lookup_mut(handle)
            .map(BufferRecord::increment_standard)
            .ok_or(AliasError::InvalidReference(handle))
    }

    fn decrement_standard_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        self.lookup_mut(handle)
            .ok_or(AliasError::InvalidReference(handle))?
            .decrement_standard()
    }

    fn increment_kept_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        self.lookup_mut(handle)
            .map(BufferRecord::increment_kept)
            .ok_or(AliasError::InvalidReference(handle))
    }

    fn decrement_kept_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        self.lookup_mut(handle)
            .ok_or(AliasError::InvalidReference(handle))?
            .decrement_kept()
    }

    /// Resolve a handle or fail with the error matching its history.
    fn resolve(&self, handle: BufferHandle) -> AliasResult<&BufferRecord> {
        match self.lookup(handle) {
            Some(record) => Ok(record),
            None if self.is_disposed(handle) => Err(AliasError::DoubleDispose(handle)),
            None => Err(AliasError::InvalidReference(handle)),
        }
    }
}

/// Outcome of a disposal request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposal {
    /// Record and storage were released.
    Released,
    /// A refcount is still live; the record is released once both reach zero.
    Deferred,
}

/// Summary of table usage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryInfo {
    pub num_records: usize,
    pub num_composites: usize,
    pub num_pending: usize,
    pub num_bytes: usize,
    pub num_storage_allocations: u64,
}

/// In-memory record table with I4-gated release.
#[derive(Debug)]
pub struct RecordTable {
    records: HashMap<BufferHandle, BufferRecord>,
    storage: StoragePool,
    next_handle: BufferHandle,
    release_deferred_on_zero: bool,
}

impl RecordTable {
    pub fn new() -> Self {
        Self::with_config(&TableConfig::default())
    }

    pub fn with_config(config: &TableConfig) -> Self {
        Self {
            records: HashMap::with_capacity(config.initial_capacity),
            storage: StoragePool::new(),
            next_handle: 1,
            release_deferred_on_zero: config.release_deferred_on_zero,
        }
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn storage(&self) -> &StoragePool {
        &self.storage
    }

    /// Raw bytes backing a record, if it owns storage.
    pub fn storage_bytes(&self, handle: BufferHandle) -> Option<&[u8]> {
        let id = self.records.get(&handle)?.storage()?;
        self.storage.get(id).map(DeviceStorage::as_slice)
    }

    /// Whether the engine may physically release `handle` right now.
    pub fn is_releasable(&self, handle: BufferHandle) -> AliasResult<bool> {
        self.resolve(handle).map(BufferRecord::is_releasable)
    }

    /// Upload f32 values into a plain record, allocating storage on first write.
    pub fn write(&mut self, handle: BufferHandle, values: &[f32]) -> AliasResult<()> {
        let record = self
            .records
            .get_mut(&handle)
            .ok_or(AliasError::InvalidReference(handle))?;
        if record.is_composite() {
            return Err(AliasError::AliasedWrite(handle));
        }
        if values.len() != record.size() {
            return Err(AliasError::SizeMismatch {
                expected: record.size(),
                got: values.len(),
            });
        }

        match record.storage().and_then(|id| self.storage.get_mut(id)) {
            Some(block) => {
                if !block.write_f32(values) {
                    return Err(AliasError::SizeMismatch {
                        expected: block.len() / 4,
                        got: values.len(),
                    });
                }
            }
            None => {
                let id = self.storage.store(DeviceStorage::from_f32(values));
                record.set_storage(Some(id));
            }
        }
        trace!(handle, len = values.len(), "wrote values");
        Ok(())
    }

    /// Read a record's values.
    ///
    /// Records that were never written read as zeros. Composite records read
    /// through their links and come back interleaved as `[re, im, re, im, ..]`.
    pub fn read(&self, handle: BufferHandle) -> AliasResult<Vec<f32>> {
        let record = self.resolve(handle)?;
        match record.alias_links() {
            Some(links) => {
                let real = self.read_plain(links.real.handle)?;
                let imag = self.read_plain(links.imag.handle)?;
                Ok(real
                    .into_iter()
                    .zip(imag)
                    .flat_map(|(re, im)| [re, im])
                    .collect())
            }
            None => self.read_plain(handle),
        }
    }

    fn read_plain(&self, handle: BufferHandle) -> AliasResult<Vec<f32>> {
        let record = self.resolve(handle)?;
        Ok(match record.storage().and_then(|id| self.storage.get(id)) {
            Some(block) => block.to_f32(),
            None => vec![0.0; record.size()],
        })
    }

    /// Request physical release of a record that aliases nothing.
    ///
    /// Linked composites must go through the composite disposer so their
    /// constituents' kept counts are returned; they are rejected here. A
    /// composite that never got links holds no counts and is released like
    /// any plain record.
    pub fn dispose(&mut self, handle: BufferHandle) -> AliasResult<Disposal> {
        self.resolve(handle)?;
        let record = self
            .records
            .get_mut(&handle)
            .ok_or(AliasError::InvalidReference(handle))?;
        if record.is_aliasing() {
            return Err(AliasError::CompositeDispose(handle));
        }
        if record.is_pending_disposal() {
            return Ok(Disposal::Deferred);
        }

        if record.is_releasable() {
            self.release(handle);
            return Ok(Disposal::Released);
        }

        record.set_pending_disposal(true);
        debug!(
            handle,
            standard = record.standard_ref_count(),
            kept = record.kept_ref_count(),
            "deferred release"
        );
        Ok(Disposal::Deferred)
    }

    /// Release every pending record whose counters have both reached zero.
    ///
    /// Pending linked composites are left alone; their teardown belongs to the
    /// composite disposer.
    pub fn sweep(&mut self) -> Vec<BufferHandle> {
        let mut ready: Vec<BufferHandle> = self
            .records
            .values()
            .filter(|r| !r.is_aliasing() && r.is_pending_disposal() && r.is_releasable())
            .map(BufferRecord::handle)
            .collect();
        ready.sort_unstable();
        for &handle in &ready {
            self.release(handle);
        }
        ready
    }

    pub fn memory_info(&self) -> MemoryInfo {
        MemoryInfo {
            num_records: self.records.len(),
            num_composites: self.records.values().filter(|r| r.is_composite()).count(),
            num_pending: self
                .records
                .values()
                .filter(|r| r.is_pending_disposal())
                .count(),
            num_bytes: self.storage.stats().current_bytes,
            num_storage_allocations: self.storage.stats().allocations,
        }
    }

    /// All live records, ordered by handle.
    pub fn snapshot(&self) -> Vec<BufferRecord> {
        let mut records: Vec<BufferRecord> = self.records.values().cloned().collect();
        records.sort_by_key(BufferRecord::handle);
        records
    }

    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }

    fn release(&mut self, handle: BufferHandle) {
        if let Some(record) = self.records.remove(&handle) {
            if let Some(id) = record.storage() {
                self.storage.release(id);
            }
            debug!(handle, dtype = %record.dtype(), "released record");
        }
    }

    fn release_if_pending(&mut self, handle: BufferHandle) {
        if !self.release_deferred_on_zero {
            return;
        }
        let ready = self
            .records
            .get(&handle)
            .is_some_and(|r| !r.is_aliasing() && r.is_pending_disposal() && r.is_releasable());
        if ready {
            self.release(handle);
        }
    }
}

impl Default for RecordTable {
    fn default() -> Self {
        Self::new()
    }
}

impl BufferTable for RecordTable {
    fn allocate(&mut self, shape: &[usize], dtype: DType) -> BufferHandle {
        let handle = self.next_handle;
        self.next_handle += 1;
        self.records
            .insert(handle, BufferRecord::new(handle, shape, dtype));
        trace!(handle, ?shape, %dtype, "allocated record");
        handle
    }

    fn lookup(&self, handle: BufferHandle) -> Option<&BufferRecord> {
        self.records.get(&handle)
    }

    fn lookup_mut(&mut self, handle: BufferHandle) -> Option<&mut BufferRecord> {
        self.records.get_mut(&handle)
    }

    fn remove(&mut self, handle: BufferHandle) -> Option<BufferRecord> {
        let record = self.records.remove(&handle)?;
        if let Some(id) = record.storage() {
            self.storage.release(id);
        }
        Some(record)
    }

    fn is_disposed(&self, handle: BufferHandle) -> bool {
        handle != 0 && handle < self.next_handle && !self.records.contains_key(&handle)
    }

    fn decrement_standard_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        let count = self
            .records
            .get_mut(&handle)
            .ok_or(AliasError::InvalidReference(handle))?
            .decrement_standard()?;
        self.release_if_pending(handle);
        Ok(count)
    }

    fn decrement_kept_ref_count(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        let count = self
            .records
            .get_mut(&handle)
            .ok_or(AliasError::InvalidReference(handle))?
            .decrement_kept()?;
        self.release_if_pending(handle);
        Ok(count)
    }
}
