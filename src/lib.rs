//! Texalias - Zero-Copy Complex Tensors over GPU Buffers
//!
//! GPU storage (textures, device buffers) can't be cheaply copied, so a
//! complex tensor is represented as a record that *aliases* two existing
//! float32 records: its real part and its imaginary part. No bytes move.
//!
//! # Two Refcounts
//!
//! - **Standard**: the engine's own count of consumers holding a record.
//! - **Kept**: a guard the engine can't infer from its consumers. Every live
//!   composite holds one kept reference on each constituent.
//!
//! A record is physically released only when both counts are zero.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐   run_kernel("Complex", [re, im])
//! │   AliasBackend   │──────────────────────────────┐
//! └────────┬─────────┘                              ▼
//!          │                              ┌──────────────────┐
//!          │ dispose_data                 │  KernelRegistry  │
//!          ▼                              └────────┬─────────┘
//! ┌──────────────────┐  make_composite /           │
//! │    composite     │◀─ dispose_composite ────────┘
//! └────────┬─────────┘
//!          │ BufferTable trait
//!          ▼
//! ┌──────────────────┐      ┌──────────────────┐
//! │   RecordTable    │─────▶│   StoragePool    │
//! └──────────────────┘      └──────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use texalias::{AliasBackend, BufferTable, Disposal};
//!
//! let mut backend = AliasBackend::default();
//! let re = backend.make_tensor(&[2], Some(&[1.0, 2.0])).unwrap();
//! let im = backend.make_tensor(&[2], Some(&[3.0, 4.0])).unwrap();
//!
//! let c = backend.complex(re.handle, im.handle).unwrap();
//! assert_eq!(backend.read(c.handle).unwrap(), vec![1.0, 3.0, 2.0, 4.0]);
//!
//! // The real part can't be freed while the composite aliases it.
//! assert_eq!(backend.dispose_data(re.handle).unwrap(), Disposal::Deferred);
//!
//! backend.dispose_data(c.handle).unwrap();
//! assert!(backend.table().lookup(re.handle).is_none());
//! ```

#![warn(clippy::all)]

pub mod backend;
pub mod composite;
pub mod config;
pub mod error;
pub mod kernels;
pub mod record;
pub mod shared;
pub mod storage;
pub mod table;

pub use backend::AliasBackend;
pub use composite::{dispose_composite, imag_part, make_composite, real_part, Part};
pub use config::{CompositeConfig, ConfigError, ConfigResult, TableConfig, TexaliasConfig};
pub use error::{AliasError, AliasResult, Counter};
pub use kernels::{KernelConfig, KernelFn, KernelRegistry};
pub use record::{AliasLinks, BufferHandle, BufferRecord, DType, StorageId, TensorInfo};
pub use shared::SharedBackend;
pub use storage::{DeviceStorage, StoragePool, StorageStats};
pub use table::{BufferTable, Disposal, MemoryInfo, RecordTable};
