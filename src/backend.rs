//! Backend Facade
//!
//! [`AliasBackend`] bundles a record table, the kernel registry and the
//! loaded configuration. It is the piece an embedding engine talks to:
//! consumers take and drop standard references, request disposal, and run
//! kernels by name. Disposal of a composite is routed through the composite
//! disposer so the constituents' kept counts are always returned.

use std::path::Path;

use tracing::debug;

use crate::composite::dispose_composite;
use crate::config::{ConfigResult, TexaliasConfig};
use crate::error::{AliasError, AliasResult};
use crate::kernels::{KernelRegistry, COMPLEX, IMAG, REAL};
use crate::record::{BufferHandle, DType, TensorInfo};
use crate::table::{BufferTable, Disposal, MemoryInfo, RecordTable};

pub struct AliasBackend {
    table: RecordTable,
    kernels: KernelRegistry,
    config: TexaliasConfig,
}

impl AliasBackend {
    pub fn new(config: TexaliasConfig) -> Self {
        Self {
            table: RecordTable::with_config(&config.table),
            kernels: KernelRegistry::with_builtins(),
            config,
        }
    }

    /// Build a backend from a texalias.toml found at or above `dir`.
    pub fn from_dir(dir: &Path) -> ConfigResult<Self> {
        Ok(Self::new(TexaliasConfig::find_and_load(dir)?))
    }

    pub fn config(&self) -> &TexaliasConfig {
        &self.config
    }

    pub fn table(&self) -> &RecordTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut RecordTable {
        &mut self.table
    }

    pub fn kernels(&self) -> &KernelRegistry {
        &self.kernels
    }

    pub fn kernels_mut(&mut self) -> &mut KernelRegistry {
        &mut self.kernels
    }

    /// Allocate a float32 tensor, uploading `values` if given.
    pub fn make_tensor(
        &mut self,
        shape: &[usize],
        values: Option<&[f32]>,
    ) -> AliasResult<TensorInfo> {
        let handle = self.table.allocate(shape, DType::Float32);
        if let Some(values) = values {
            if let Err(e) = self.table.write(handle, values) {
                self.table.remove(handle);
                return Err(e);
            }
        }
        Ok(TensorInfo::new(handle, shape, DType::Float32))
    }

    pub fn write(&mut self, handle: BufferHandle, values: &[f32]) -> AliasResult<()> {
        self.table.write(handle, values)
    }

    pub fn read(&self, handle: BufferHandle) -> AliasResult<Vec<f32>> {
        self.table.read(handle)
    }

    pub fn run_kernel(&mut self, name: &str, inputs: &[BufferHandle]) -> AliasResult<TensorInfo> {
        self.kernels
            .call(name, &mut self.table, inputs, &self.config.composite)
    }

    /// Build a complex tensor aliasing `real` and `imag`.
    pub fn complex(&mut self, real: BufferHandle, imag: BufferHandle) -> AliasResult<TensorInfo> {
        self.run_kernel(COMPLEX, &[real, imag])
    }

    pub fn real(&mut self, composite: BufferHandle) -> AliasResult<TensorInfo> {
        self.run_kernel(REAL, &[composite])
    }

    pub fn imag(&mut self, composite: BufferHandle) -> AliasResult<TensorInfo> {
        self.run_kernel(IMAG, &[composite])
    }

    /// A consumer takes a standard reference.
    pub fn inc_ref(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        self.table.increment_standard_ref_count(handle)
    }

    /// A consumer drops a standard reference. Pending records are released
    /// once nothing holds them.
    pub fn dec_ref(&mut self, handle: BufferHandle) -> AliasResult<u32> {
        let count = self.table.decrement_standard_ref_count(handle)?;
        let pending_composite = self
            .table
            .lookup(handle)
            .is_some_and(|r| r.is_aliasing() && r.is_pending_disposal() && r.is_releasable());
        if pending_composite {
            dispose_composite(&mut self.table, handle)?;
        }
        Ok(count)
    }

    /// Request disposal of any record.
    ///
    /// Composites still held by consumers are marked pending and torn down
    /// by the last [`dec_ref`](Self::dec_ref) or by [`sweep`](Self::sweep).
    pub fn dispose_data(&mut self, handle: BufferHandle) -> AliasResult<Disposal> {
        let record = self.table.resolve(handle)?;
        if !record.is_aliasing() {
            return self.table.dispose(handle);
        }
        if record.is_releasable() {
            dispose_composite(&mut self.table, handle)?;
            return Ok(Disposal::Released);
        }

        if let Some(record) = self.table.lookup_mut(handle) {
            record.set_pending_disposal(true);
            debug!(
                handle,
                standard = record.standard_ref_count(),
                "deferred composite disposal"
            );
        }
        Ok(Disposal::Deferred)
    }

    /// Release everything pending whose counters allow it. Composites go
    /// first so the constituents they free are picked up in the same pass.
    pub fn sweep(&mut self) -> AliasResult<Vec<BufferHandle>> {
        let mut composites: Vec<BufferHandle> = self
            .table
            .snapshot()
            .into_iter()
            .filter(|r| r.is_aliasing() && r.is_pending_disposal() && r.is_releasable())
            .map(|r| r.handle())
            .collect();
        for &handle in &composites {
            dispose_composite(&mut self.table, handle)?;
        }
        composites.extend(self.table.sweep());
        Ok(composites)
    }

    pub fn memory_info(&self) -> MemoryInfo {
        self.table.memory_info()
    }

    /// Number of live records
    pub fn num_data_ids(&self) -> usize {
        self.table.len()
    }

    /// Standard refcount of a live record.
    pub fn ref_count(&self, handle: BufferHandle) -> AliasResult<u32> {
        self.table
            .lookup(handle)
            .map(|r| r.standard_ref_count())
            .ok_or(AliasError::InvalidReference(handle))
    }
}

impl Default for AliasBackend {
    fn default() -> Self {
        Self::new(TexaliasConfig::default())
    }
}
