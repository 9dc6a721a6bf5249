//! Thread-shared backend.
//!
//! Construction and disposal update a standard and a kept counter as two
//! separate steps. Concurrent callers must not observe the table between
//! them, so every operation here holds the backend lock for its whole run.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::backend::AliasBackend;
use crate::config::TexaliasConfig;
use crate::error::AliasResult;
use crate::record::{BufferHandle, TensorInfo};
use crate::table::{Disposal, MemoryInfo};

/// Cloneable handle to a backend behind a mutex
#[derive(Clone, Default)]
pub struct SharedBackend {
    inner: Arc<Mutex<AliasBackend>>,
}

impl SharedBackend {
    pub fn new(config: TexaliasConfig) -> Self {
        Self::from_backend(AliasBackend::new(config))
    }

    pub fn from_backend(backend: AliasBackend) -> Self {
        Self {
            inner: Arc::new(Mutex::new(backend)),
        }
    }

    /// Run `f` with exclusive access to the backend
    pub fn with<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut AliasBackend) -> R,
    {
        let mut backend = self.inner.lock();
        f(&mut backend)
    }

    pub fn make_tensor(
        &self,
        shape: &[usize],
        values: Option<&[f32]>,
    ) -> AliasResult<TensorInfo> {
        self.with(|b| b.make_tensor(shape, values))
    }

    pub fn complex(&self, real: BufferHandle, imag: BufferHandle) -> AliasResult<TensorInfo> {
        self.with(|b| b.complex(real, imag))
    }

    pub fn dispose_data(&self, handle: BufferHandle) -> AliasResult<Disposal> {
        self.with(|b| b.dispose_data(handle))
    }

    pub fn memory_info(&self) -> MemoryInfo {
        self.with(|b| b.memory_info())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::BufferTable;

    #[test]
    fn test_with_exposes_backend() {
        let shared = SharedBackend::default();
        let re = shared.make_tensor(&[2], None).unwrap();
        let im = shared.make_tensor(&[2], None).unwrap();
        let c = shared.complex(re.handle, im.handle).unwrap();

        let kept = shared.with(|b| b.table().lookup(re.handle).map(|r| r.kept_ref_count()));
        assert_eq!(kept, Some(1));

        assert_eq!(shared.dispose_data(c.handle), Ok(Disposal::Released));
        assert_eq!(shared.memory_info().num_composites, 0);
    }
}
