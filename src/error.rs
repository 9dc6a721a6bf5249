//! Error types for aliasing operations.

use thiserror::Error;

use crate::record::{BufferHandle, DType};

/// Which of the two refcounts on a record a fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Standard,
    Kept,
}

impl std::fmt::Display for Counter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Counter::Standard => write!(f, "standard"),
            Counter::Kept => write!(f, "kept"),
        }
    }
}

/// Errors raised by the record table and the composite constructor/disposer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AliasError {
    #[error("Invalid reference: handle {0} does not resolve to a live record")]
    InvalidReference(BufferHandle),

    #[error("Shape mismatch: real part {real:?} vs imaginary part {imag:?}")]
    ShapeMismatch { real: Vec<usize>, imag: Vec<usize> },

    #[error("Counter underflow: {counter} refcount of handle {handle} is already zero")]
    CounterUnderflow { handle: BufferHandle, counter: Counter },

    #[error("Double dispose: handle {0} was already disposed")]
    DoubleDispose(BufferHandle),

    #[error("Handle {0} is not a composite record")]
    NotComposite(BufferHandle),

    #[error("Handle {handle} has element type {dtype}, expected float32")]
    InvalidConstituent { handle: BufferHandle, dtype: DType },

    #[error("Handle {0} was passed as both the real and the imaginary part")]
    DuplicateConstituent(BufferHandle),

    #[error("Handle {0} is a composite record; dispose it with dispose_composite")]
    CompositeDispose(BufferHandle),

    #[error("Handle {0} aliases foreign storage and cannot be written")]
    AliasedWrite(BufferHandle),

    #[error("Size mismatch: expected {expected} values, got {got}")]
    SizeMismatch { expected: usize, got: usize },

    #[error("Kernel not found: {0}")]
    KernelNotFound(String),

    #[error("Expected {expected} inputs, got {got}")]
    InvalidArgCount { expected: usize, got: usize },
}

impl AliasError {
    /// A fatal error means the bookkeeping is already inconsistent and
    /// retrying or continuing is meaningless.
    pub fn is_fatal(&self) -> bool {
        matches!(self, AliasError::CounterUnderflow { .. })
    }
}

/// Result type for aliasing operations.
pub type AliasResult<T> = Result<T, AliasError>;
