//! Buffer Records
//!
//! One record describes one logical storage entry: its shape, element type,
//! the two refcounts and, for composite tensors, the links back to the real
//! and imaginary records whose storage it borrows.
//!
//! ```text
//!   composite (complex64)          real (float32)      imag (float32)
//!   ┌─────────────────────┐        ┌──────────────┐    ┌──────────────┐
//!   │ storage: none       │  ───▶  │ storage: #1  │    │ storage: #2  │
//!   │ alias_links.real ───┼────────┘ kept: 1      │    │ kept: 1      │
//!   │ alias_links.imag ───┼───────────────────────┼────┘              │
//!   └─────────────────────┘        └──────────────┘    └──────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{AliasError, AliasResult, Counter};

/// Opaque identifier of a record, unique for the lifetime of a table.
pub type BufferHandle = u64;

/// Identifier of a physical storage block.
pub type StorageId = u64;

/// Element type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Float32,
    Int32,
    Bool,
    Complex64,
}

impl DType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Int32 => "int32",
            DType::Bool => "bool",
            DType::Complex64 => "complex64",
        }
    }

    /// Bytes one element occupies in physical storage.
    pub fn bytes_per_element(&self) -> usize {
        match self {
            DType::Float32 | DType::Int32 | DType::Bool => 4,
            DType::Complex64 => 8,
        }
    }

    pub fn is_composite(&self) -> bool {
        matches!(self, DType::Complex64)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Number of elements described by `shape`. A rank-0 shape is a scalar.
pub fn size_from_shape(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Lightweight, non-owning reference to a record.
///
/// Holding a `TensorInfo` says nothing about lifetime; the shape and dtype are
/// cached copies so callers can inspect them without a table lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorInfo {
    pub handle: BufferHandle,
    pub shape: Vec<usize>,
    pub dtype: DType,
}

impl TensorInfo {
    pub fn new(handle: BufferHandle, shape: &[usize], dtype: DType) -> Self {
        Self {
            handle,
            shape: shape.to_vec(),
            dtype,
        }
    }

    pub fn size(&self) -> usize {
        size_from_shape(&self.shape)
    }
}

/// Back-references from a composite record to its constituents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasLinks {
    pub real: TensorInfo,
    pub imag: TensorInfo,
}

impl AliasLinks {
    /// Iterate over the two constituent references, real first.
    pub fn iter(&self) -> impl Iterator<Item = &TensorInfo> {
        [&self.real, &self.imag].into_iter()
    }
}

/// Metadata entry for one logical storage allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferRecord {
    handle: BufferHandle,
    shape: Vec<usize>,
    dtype: DType,
    standard_ref_count: u32,
    kept_ref_count: u32,
    alias_links: Option<AliasLinks>,
    storage: Option<StorageId>,
    pending_disposal: bool,
}

impl BufferRecord {
    /// Create a record with both counters at zero and no storage.
    pub fn new(handle: BufferHandle, shape: &[usize], dtype: DType) -> Self {
        Self {
            handle,
            shape: shape.to_vec(),
            dtype,
            standard_ref_count: 0,
            kept_ref_count: 0,
            alias_links: None,
            storage: None,
            pending_disposal: false,
        }
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn size(&self) -> usize {
        size_from_shape(&self.shape)
    }

    pub fn standard_ref_count(&self) -> u32 {
        self.standard_ref_count
    }

    pub fn kept_ref_count(&self) -> u32 {
        self.kept_ref_count
    }

    pub fn alias_links(&self) -> Option<&AliasLinks> {
        self.alias_links.as_ref()
    }

    pub fn storage(&self) -> Option<StorageId> {
        self.storage
    }

    pub fn is_composite(&self) -> bool {
        self.dtype.is_composite()
    }

    /// Composite with constituent links attached. Only these hold kept
    /// counts on other records.
    pub fn is_aliasing(&self) -> bool {
        self.alias_links.is_some()
    }

    /// Whether disposal was requested but blocked by a live refcount.
    pub fn is_pending_disposal(&self) -> bool {
        self.pending_disposal
    }

    /// Both counters are zero, so the engine may release this record.
    pub fn is_releasable(&self) -> bool {
        self.standard_ref_count == 0 && self.kept_ref_count == 0
    }

    /// Build a non-owning reference to this record.
    pub fn info(&self) -> TensorInfo {
        TensorInfo::new(self.handle, &self.shape, self.dtype)
    }

    pub fn increment_standard(&mut self) -> u32 {
        self.standard_ref_count += 1;
        self.standard_ref_count
    }

    pub fn decrement_standard(&mut self) -> AliasResult<u32> {
        self.standard_ref_count = self
            .standard_ref_count
            .checked_sub(1)
            .ok_or(AliasError::CounterUnderflow {
                handle: self.handle,
                counter: Counter::Standard,
            })?;
        Ok(self.standard_ref_count)
    }

    pub fn increment_kept(&mut self) -> u32 {
        self.kept_ref_count += 1;
        self.kept_ref_count
    }

    pub fn decrement_kept(&mut self) -> AliasResult<u32> {
        self.kept_ref_count =
            self.kept_ref_count
                .checked_sub(1)
                .ok_or(AliasError::CounterUnderflow {
                    handle: self.handle,
                    counter: Counter::Kept,
                })?;
        Ok(self.kept_ref_count)
    }

    /// Attach constituent links. Only composite records carry links.
    pub fn set_alias_links(&mut self, links: AliasLinks) -> AliasResult<()> {
        if !self.is_composite() {
            return Err(AliasError::NotComposite(self.handle));
        }
        self.alias_links = Some(links);
        Ok(())
    }

    pub fn set_storage(&mut self, storage: Option<StorageId>) {
        self.storage = storage;
    }

    pub fn set_pending_disposal(&mut self, pending: bool) {
        self.pending_disposal = pending;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_releasable() {
        let rec = BufferRecord::new(1, &[2, 3], DType::Float32);
        assert_eq!(rec.size(), 6);
        assert_eq!(rec.standard_ref_count(), 0);
        assert_eq!(rec.kept_ref_count(), 0);
        assert!(rec.alias_links().is_none());
        assert!(rec.storage().is_none());
        assert!(rec.is_releasable());
    }

    #[test]
    fn test_kept_count_blocks_release() {
        let mut rec = BufferRecord::new(1, &[4], DType::Float32);
        rec.increment_kept();
        assert!(!rec.is_releasable());
        assert_eq!(rec.decrement_kept().unwrap(), 0);
        assert!(rec.is_releasable());
    }

    #[test]
    fn test_decrement_underflow() {
        let mut rec = BufferRecord::new(9, &[1], DType::Float32);
        assert_eq!(
            rec.decrement_kept(),
            Err(AliasError::CounterUnderflow {
                handle: 9,
                counter: Counter::Kept
            })
        );
        assert_eq!(
            rec.decrement_standard(),
            Err(AliasError::CounterUnderflow {
                handle: 9,
                counter: Counter::Standard
            })
        );
        assert_eq!(rec.kept_ref_count(), 0);
    }

    #[test]
    fn test_links_only_on_composite() {
        let links = AliasLinks {
            real: TensorInfo::new(1, &[2], DType::Float32),
            imag: TensorInfo::new(2, &[2], DType::Float32),
        };

        let mut plain = BufferRecord::new(3, &[2], DType::Float32);
        assert_eq!(
            plain.set_alias_links(links.clone()),
            Err(AliasError::NotComposite(3))
        );

        let mut composite = BufferRecord::new(4, &[2], DType::Complex64);
        composite.set_alias_links(links).unwrap();
        let handles: Vec<_> = composite
            .alias_links()
            .unwrap()
            .iter()
            .map(|t| t.handle)
            .collect();
        assert_eq!(handles, vec![1, 2]);
    }

    #[test]
    fn test_scalar_shape_size() {
        assert_eq!(size_from_shape(&[]), 1);
        assert_eq!(size_from_shape(&[3, 0]), 0);
    }

    #[test]
    fn test_dtype_serde_names() {
        let json = serde_json::to_string(&DType::Complex64).unwrap();
        assert_eq!(json, "\"complex64\"");
        let back: DType = serde_json::from_str("\"float32\"").unwrap();
        assert_eq!(back, DType::Float32);
    }
}
