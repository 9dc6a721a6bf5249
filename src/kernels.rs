//! Kernel Dispatch
//!
//! Routes kernel names to implementations. The aliasing core registers three
//! bookkeeping kernels; none of them issue GPU work.
//!
//! | Kernel | Inputs | Output |
//! |--------|--------|--------|
//! | `Complex` | real, imag | new composite aliasing both |
//! | `Real` | composite | real part (caller holds a standard ref) |
//! | `Imag` | composite | imaginary part (caller holds a standard ref) |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::composite::{imag_part, make_composite, real_part};
use crate::config::CompositeConfig;
use crate::error::{AliasError, AliasResult};
use crate::record::{BufferHandle, TensorInfo};
use crate::table::BufferTable;

/// Backend name the built-in kernels register under.
pub const BACKEND_NAME: &str = "texalias";

pub const COMPLEX: &str = "Complex";
pub const REAL: &str = "Real";
pub const IMAG: &str = "Imag";

/// Function signature for a kernel
pub type KernelFn = Arc<
    dyn Fn(&mut dyn BufferTable, &[BufferHandle], &CompositeConfig) -> AliasResult<TensorInfo>
        + Send
        + Sync,
>;

/// A registered kernel
#[derive(Clone)]
pub struct KernelConfig {
    pub kernel_name: String,
    pub backend_name: String,
    /// Number of input handles the kernel expects
    pub arg_count: usize,
    pub kernel_func: KernelFn,
}

impl KernelConfig {
    pub fn new<F>(kernel_name: &str, backend_name: &str, arg_count: usize, func: F) -> Self
    where
        F: Fn(&mut dyn BufferTable, &[BufferHandle], &CompositeConfig) -> AliasResult<TensorInfo>
            + Send
            + Sync
            + 'static,
    {
        Self {
            kernel_name: kernel_name.to_string(),
            backend_name: backend_name.to_string(),
            arg_count,
            kernel_func: Arc::new(func),
        }
    }
}

impl fmt::Debug for KernelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelConfig")
            .field("kernel_name", &self.kernel_name)
            .field("backend_name", &self.backend_name)
            .field("arg_count", &self.arg_count)
            .finish()
    }
}

/// Registry of kernels keyed by name
#[derive(Default)]
pub struct KernelRegistry {
    kernels: HashMap<String, KernelConfig>,
}

impl KernelRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            kernels: HashMap::new(),
        }
    }

    /// Create a registry with the aliasing kernels registered
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    pub fn register_builtins(&mut self) {
        self.register(KernelConfig::new(
            COMPLEX,
            BACKEND_NAME,
            2,
            |table, inputs, options| {
                let composite = make_composite(table, inputs[0], inputs[1], options)?;
                table
                    .lookup(composite)
                    .map(|r| r.info())
                    .ok_or(AliasError::InvalidReference(composite))
            },
        ));
        self.register(KernelConfig::new(REAL, BACKEND_NAME, 1, |table, inputs, _| {
            real_part(table, inputs[0])
        }));
        self.register(KernelConfig::new(IMAG, BACKEND_NAME, 1, |table, inputs, _| {
            imag_part(table, inputs[0])
        }));
    }

    /// Register a kernel, returning the one it replaced
    pub fn register(&mut self, config: KernelConfig) -> Option<KernelConfig> {
        let previous = self.kernels.insert(config.kernel_name.clone(), config);
        if let Some(prev) = &previous {
            warn!(
                kernel = %prev.kernel_name,
                backend = %prev.backend_name,
                "kernel already registered, overriding"
            );
        }
        previous
    }

    pub fn get(&self, name: &str) -> Option<&KernelConfig> {
        self.kernels.get(name)
    }

    /// Run a kernel by name
    pub fn call(
        &self,
        name: &str,
        table: &mut dyn BufferTable,
        inputs: &[BufferHandle],
        options: &CompositeConfig,
    ) -> AliasResult<TensorInfo> {
        let kernel = self
            .kernels
            .get(name)
            .ok_or_else(|| AliasError::KernelNotFound(name.to_string()))?;
        if inputs.len() != kernel.arg_count {
            return Err(AliasError::InvalidArgCount {
                expected: kernel.arg_count,
                got: inputs.len(),
            });
        }
        (kernel.kernel_func)(table, inputs, options)
    }

    /// Names of all registered kernels, sorted
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.kernels.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kernels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::DType;
    use crate::table::RecordTable;

    #[test]
    fn test_builtins_registered() {
        let registry = KernelRegistry::with_builtins();
        assert_eq!(registry.list(), vec![COMPLEX, IMAG, REAL]);
        let complex = registry.get(COMPLEX).unwrap();
        assert_eq!(complex.backend_name, BACKEND_NAME);
        assert_eq!(complex.arg_count, 2);
    }

    #[test]
    fn test_call_complex_and_parts() {
        let registry = KernelRegistry::with_builtins();
        let mut table = RecordTable::new();
        let r = table.allocate(&[2], DType::Float32);
        let i = table.allocate(&[2], DType::Float32);
        let options = CompositeConfig::default();

        let c = registry.call(COMPLEX, &mut table, &[r, i], &options).unwrap();
        assert_eq!(c.dtype, DType::Complex64);
        assert_eq!(c.shape, vec![2]);

        let im = registry.call(IMAG, &mut table, &[c.handle], &options).unwrap();
        assert_eq!(im.handle, i);
        assert_eq!(table.lookup(i).unwrap().standard_ref_count(), 2);
    }

    #[test]
    fn test_call_errors() {
        let registry = KernelRegistry::with_builtins();
        let mut table = RecordTable::new();
        let options = CompositeConfig::default();

        assert_eq!(
            registry.call("Fft", &mut table, &[], &options),
            Err(AliasError::KernelNotFound("Fft".to_string()))
        );
        assert_eq!(
            registry.call(COMPLEX, &mut table, &[1], &options),
            Err(AliasError::InvalidArgCount {
                expected: 2,
                got: 1
            })
        );
    }

    #[test]
    fn test_register_override() {
        let mut registry = KernelRegistry::new();
        assert!(registry.is_empty());

        let first = KernelConfig::new("Noop", "test", 1, |table, inputs, _| {
            table
                .lookup(inputs[0])
                .map(|r| r.info())
                .ok_or(AliasError::InvalidReference(inputs[0]))
        });
        assert!(registry.register(first.clone()).is_none());
        let replaced = registry.register(first).unwrap();
        assert_eq!(replaced.kernel_name, "Noop");
        assert_eq!(registry.len(), 1);
    }
}
